// ==========================================
// 承包商派单引擎 - 评分运行
// ==========================================
// 一次评分运行 = 一个工单的一次候选生成 + 评分
// 运行内的所有报价共享同一配置快照
// ==========================================

use crate::config::AssignmentConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==========================================
// RunOutcome - 运行终局
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    AssignedProgressive, // 渐进报价被接受
    AssignedFallback,    // 兜底轮询指派
    Unassignable,        // 无法指派
    Cancelled,           // 运行中被取消
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::AssignedProgressive => "ASSIGNED_PROGRESSIVE",
            RunOutcome::AssignedFallback => "ASSIGNED_FALLBACK",
            RunOutcome::Unassignable => "UNASSIGNABLE",
            RunOutcome::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ASSIGNED_PROGRESSIVE" => Some(RunOutcome::AssignedProgressive),
            "ASSIGNED_FALLBACK" => Some(RunOutcome::AssignedFallback),
            "UNASSIGNABLE" => Some(RunOutcome::Unassignable),
            "CANCELLED" => Some(RunOutcome::Cancelled),
            _ => None,
        }
    }
}

// ==========================================
// DispatchRun - 评分运行记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRun {
    pub run_id: String,
    pub job_id: String,
    pub config: AssignmentConfig, // 运行开始时的配置快照
    pub search_radius_miles: Option<f64>, // 无候选时为空
    pub eligible_contractor_ids: Vec<String>,
    pub excluded_contractor_ids: Vec<String>,
    pub final_outcome: Option<RunOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DispatchRun {
    pub fn start(job_id: &str, config: AssignmentConfig, excluded: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            config,
            search_radius_miles: None,
            eligible_contractor_ids: Vec::new(),
            excluded_contractor_ids: excluded,
            final_outcome: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn config_version(&self) -> i64 {
        self.config.version
    }
}
