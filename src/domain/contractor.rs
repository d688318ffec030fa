// ==========================================
// 承包商派单引擎 - 承包商领域模型
// ==========================================
// 红线: 容量(current_workload / max_concurrent_jobs)只能通过
//       仓储层原子"检查并递增"修改，领域对象只读
// ==========================================

use crate::domain::job::{service_category, GeoPoint};
use crate::domain::types::{Availability, SpecializationMatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 通用服务专业标签
pub const GENERAL_SERVICE: &str = "general";

// ==========================================
// OfferHistory - 报价与履约历史
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferHistory {
    pub offers_accepted: i64,
    pub offers_declined: i64,
    pub offers_timed_out: i64,
    pub jobs_assigned: i64,       // 本平台累计指派
    pub jobs_completed: i64,      // 本平台累计完工
    pub jobs_completed_on_time: i64,
}

impl OfferHistory {
    /// 完工率; 无指派历史时为 None
    pub fn completion_rate(&self) -> Option<f64> {
        if self.jobs_assigned <= 0 {
            return None;
        }
        Some((self.jobs_completed as f64 / self.jobs_assigned as f64).clamp(0.0, 1.0))
    }

    /// 准时率; 无完工历史时为 None
    pub fn on_time_rate(&self) -> Option<f64> {
        if self.jobs_completed <= 0 {
            return None;
        }
        Some((self.jobs_completed_on_time as f64 / self.jobs_completed as f64).clamp(0.0, 1.0))
    }

    /// 接单率
    pub fn acceptance_rate(&self) -> Option<f64> {
        let total = self.offers_accepted + self.offers_declined + self.offers_timed_out;
        if total <= 0 {
            return None;
        }
        Some(self.offers_accepted as f64 / total as f64)
    }
}

// ==========================================
// ContractorPreferences - 承包商声明的偏好
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractorPreferences {
    #[serde(default)]
    pub preferred_service_types: Vec<String>,
    #[serde(default)]
    pub max_travel_miles: Option<f64>,
    #[serde(default = "default_accepts_emergency")]
    pub accepts_emergency: bool,
}

fn default_accepts_emergency() -> bool {
    true
}

impl Default for ContractorPreferences {
    fn default() -> Self {
        Self {
            preferred_service_types: Vec::new(),
            max_travel_miles: None,
            accepts_emergency: true,
        }
    }
}

impl ContractorPreferences {
    /// 是否未声明任何偏好
    pub fn is_empty(&self) -> bool {
        self.preferred_service_types.is_empty()
            && self.max_travel_miles.is_none()
            && self.accepts_emergency
    }
}

// ==========================================
// Contractor - 承包商
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contractor {
    pub contractor_id: String,
    pub name: String,
    pub location: GeoPoint,
    pub availability: Availability,
    pub rating: Option<f64>, // 0-5; 新人可为空
    pub completed_jobs: i64, // 全部从业完工数 (经验)
    pub specializations: BTreeSet<String>,

    // ===== 容量 =====
    pub current_workload: i32,
    pub max_concurrent_jobs: i32,

    pub history: OfferHistory,
    pub preferences: ContractorPreferences,
    pub updated_at: DateTime<Utc>,
}

impl Contractor {
    /// 创建空闲承包商
    pub fn new(contractor_id: impl Into<String>, location: GeoPoint) -> Self {
        let id = contractor_id.into();
        Self {
            name: id.clone(),
            contractor_id: id,
            location,
            availability: Availability::Available,
            rating: None,
            completed_jobs: 0,
            specializations: BTreeSet::new(),
            current_workload: 0,
            max_concurrent_jobs: 1,
            history: OfferHistory::default(),
            preferences: ContractorPreferences::default(),
            updated_at: Utc::now(),
        }
    }

    /// 是否还有容量余量
    pub fn has_spare_capacity(&self) -> bool {
        self.current_workload < self.max_concurrent_jobs
    }

    /// 是否可接新单
    ///
    /// AVAILABLE 或 BUSY 且有容量余量
    pub fn is_dispatchable(&self) -> bool {
        match self.availability {
            Availability::Available | Availability::Busy => self.has_spare_capacity(),
            Availability::Offline | Availability::OnJob => false,
        }
    }

    /// 工作负载比例 (0.0 - 1.0)
    pub fn workload_ratio(&self) -> f64 {
        if self.max_concurrent_jobs <= 0 {
            return 1.0;
        }
        (self.current_workload as f64 / self.max_concurrent_jobs as f64).clamp(0.0, 1.0)
    }

    /// 计算与服务类型的专业匹配度
    ///
    /// - 精确持有该服务类型 → Exact
    /// - 持有通用服务 + 同大类技能 → Related
    /// - 仅持有通用服务 → General
    /// - 其他 → None
    pub fn specialization_match(&self, service_type: &str) -> SpecializationMatch {
        if self.specializations.contains(service_type) {
            return SpecializationMatch::Exact;
        }

        if !self.specializations.contains(GENERAL_SERVICE) {
            return SpecializationMatch::None;
        }

        let category = service_category(service_type);
        let has_related = self
            .specializations
            .iter()
            .any(|s| s != GENERAL_SERVICE && service_category(s) == category);

        if has_related {
            SpecializationMatch::Related
        } else {
            SpecializationMatch::General
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contractor_with(specs: &[&str]) -> Contractor {
        let mut c = Contractor::new("C1", GeoPoint::new(0.0, 0.0));
        c.specializations = specs.iter().map(|s| s.to_string()).collect();
        c
    }

    #[test]
    fn test_specialization_match() {
        assert_eq!(
            contractor_with(&["plumbing.drain"]).specialization_match("plumbing.drain"),
            SpecializationMatch::Exact
        );
        assert_eq!(
            contractor_with(&["general", "plumbing.heater"]).specialization_match("plumbing.drain"),
            SpecializationMatch::Related
        );
        assert_eq!(
            contractor_with(&["general"]).specialization_match("plumbing.drain"),
            SpecializationMatch::General
        );
        // 无通用标签时同类技能不算兼容
        assert_eq!(
            contractor_with(&["plumbing.heater"]).specialization_match("plumbing.drain"),
            SpecializationMatch::None
        );
    }

    #[test]
    fn test_dispatchable() {
        let mut c = contractor_with(&["general"]);
        c.max_concurrent_jobs = 2;
        c.current_workload = 1;
        c.availability = Availability::Busy;
        assert!(c.is_dispatchable());

        c.current_workload = 2;
        assert!(!c.is_dispatchable());

        c.current_workload = 0;
        c.availability = Availability::Offline;
        assert!(!c.is_dispatchable());
    }

    #[test]
    fn test_history_rates() {
        let history = OfferHistory {
            offers_accepted: 3,
            offers_declined: 1,
            offers_timed_out: 0,
            jobs_assigned: 4,
            jobs_completed: 2,
            jobs_completed_on_time: 1,
        };
        assert_eq!(history.completion_rate(), Some(0.5));
        assert_eq!(history.on_time_rate(), Some(0.5));
        assert_eq!(history.acceptance_rate(), Some(0.75));
        assert_eq!(OfferHistory::default().completion_rate(), None);
    }
}
