// ==========================================
// 承包商派单引擎 - 派单尝试领域模型
// ==========================================
// 红线: 同一工单任一时刻至多一个 PENDING 尝试
// ==========================================

use crate::domain::types::{AssignmentMethod, AttemptOutcome};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 投递失败转隐式拒绝
pub const REASON_DELIVERY_FAILED: &str = "OFFER_DELIVERY_FAILED";
/// 接受时承包商容量已满
pub const REASON_AT_CAPACITY: &str = "CONTRACTOR_AT_CAPACITY";
/// 工单取消撤回报价
pub const REASON_JOB_CANCELLED: &str = "JOB_CANCELLED";
/// 承包商主动拒绝
pub const REASON_CONTRACTOR_DECLINED: &str = "CONTRACTOR_DECLINED";
/// 超过 offer_timeout_seconds 未响应
pub const REASON_OFFER_EXPIRED: &str = "OFFER_EXPIRED";

// ==========================================
// AssignmentAttempt - 一次派单尝试
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentAttempt {
    pub attempt_id: String,
    pub job_id: String,
    pub run_id: Option<String>, // 人工指派无评分运行
    pub attempt_number: i32,
    pub contractor_id: String,
    pub score_id: Option<String>,
    pub composite_score: Option<f64>,
    pub method: AssignmentMethod,
    pub offered_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>, // 兜底/人工指派无报价窗口
    pub outcome: AttemptOutcome,
    pub outcome_reason: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AssignmentAttempt {
    /// 创建渐进派单报价 (PENDING)
    pub fn offer(
        job_id: &str,
        run_id: &str,
        attempt_number: i32,
        contractor_id: &str,
        score_id: &str,
        composite_score: f64,
        offered_at: DateTime<Utc>,
        timeout_seconds: i64,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            run_id: Some(run_id.to_string()),
            attempt_number,
            contractor_id: contractor_id.to_string(),
            score_id: Some(score_id.to_string()),
            composite_score: Some(composite_score),
            method: AssignmentMethod::Progressive,
            offered_at,
            expires_at: Some(offered_at + Duration::seconds(timeout_seconds)),
            outcome: AttemptOutcome::Pending,
            outcome_reason: None,
            resolved_at: None,
        }
    }

    /// 创建直接指派记录 (兜底/人工，无需协商)
    pub fn direct(
        job_id: &str,
        run_id: Option<&str>,
        attempt_number: i32,
        contractor_id: &str,
        method: AssignmentMethod,
        reason: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            attempt_id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            run_id: run_id.map(|r| r.to_string()),
            attempt_number,
            contractor_id: contractor_id.to_string(),
            score_id: None,
            composite_score: None,
            method,
            offered_at: now,
            expires_at: None,
            outcome: AttemptOutcome::Accepted,
            outcome_reason: Some(reason.to_string()),
            resolved_at: Some(now),
        }
    }

    /// 报价是否已过期
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }
}
