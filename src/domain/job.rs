// ==========================================
// 承包商派单引擎 - 工单领域模型
// ==========================================
// 工单由外部系统创建(NEW)，派单引擎只负责状态推进与指派结果
// ==========================================

use crate::domain::types::{AssignmentMethod, JobPriority, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// GeoPoint - 地理坐标
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

// ==========================================
// Job - 服务工单
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    // ===== 主键 =====
    pub job_id: String,

    // ===== 业务属性 =====
    pub customer_id: Option<String>, // 客户ID (用于老客户匹配)
    pub service_type: String,        // 服务类型, 形如 "plumbing.drain"
    pub location: GeoPoint,          // 上门地址坐标
    pub priority: JobPriority,       // 紧急/预约

    // ===== 派单状态 =====
    pub status: JobStatus,
    pub assigned_contractor_id: Option<String>,
    pub assignment_method: Option<AssignmentMethod>,

    // ===== 审计 =====
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// 创建新工单 (状态 NEW)
    pub fn new(
        job_id: impl Into<String>,
        service_type: impl Into<String>,
        location: GeoPoint,
        priority: JobPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            customer_id: None,
            service_type: service_type.into(),
            location,
            priority,
            status: JobStatus::New,
            assigned_contractor_id: None,
            assignment_method: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 设置客户ID
    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    /// 服务大类 ("plumbing.drain" → "plumbing")
    pub fn service_category(&self) -> &str {
        service_category(&self.service_type)
    }
}

/// 提取服务大类
pub fn service_category(service_type: &str) -> &str {
    service_type.split('.').next().unwrap_or(service_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_category() {
        assert_eq!(service_category("plumbing.drain"), "plumbing");
        assert_eq!(service_category("hvac"), "hvac");

        let job = Job::new("J1", "electrical.panel", GeoPoint::new(0.0, 0.0), JobPriority::Scheduled);
        assert_eq!(job.service_category(), "electrical");
        assert_eq!(job.status, JobStatus::New);
        assert!(job.assigned_contractor_id.is_none());
    }
}
