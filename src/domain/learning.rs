// ==========================================
// 承包商派单引擎 - 学习调参领域模型
// ==========================================
// 红线: 提案只能由运维显式激活，绝不自动改写线上配置
// ==========================================

use crate::domain::score::{Factor, FactorWeights};
use crate::domain::types::ProposalStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// JobCompletion - 指派后的履约结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompletion {
    pub job_id: String,
    pub contractor_id: String,
    pub completed: bool,
    pub on_time: bool,
    pub customer_rating: Option<f64>, // 0-5
    pub recorded_at: DateTime<Utc>,
}

impl JobCompletion {
    /// 履约质量 (0.0 - 1.0)
    ///
    /// 未完工为 0；完工时取 准时(0/1) 与 评分/5 的均值，无评分按准时计
    pub fn quality(&self) -> f64 {
        if !self.completed {
            return 0.0;
        }
        let on_time = if self.on_time { 1.0 } else { 0.0 };
        match self.customer_rating {
            Some(r) => (on_time + (r / 5.0).clamp(0.0, 1.0)) / 2.0,
            None => on_time,
        }
    }
}

// ==========================================
// WeightProposal - 权重调整提案
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightProposal {
    pub proposal_id: String,
    pub base_config_version: i64,
    pub current_weights: FactorWeights,
    pub proposed_weights: FactorWeights,
    pub correlations: BTreeMap<Factor, f64>, // 因子得分与履约质量的相关系数
    pub sample_size: i64,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub applied_config_version: Option<i64>,
}
