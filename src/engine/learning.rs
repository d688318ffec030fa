// ==========================================
// 承包商派单引擎 - 学习调参
// ==========================================
// 批处理: 中标报价的因子得分 × 履约质量 → 皮尔逊相关系数 → 权重提案
// 红线: 只产出提案，激活必须由运维显式操作，激活即写入新配置版本
// ==========================================

use crate::config::{AssignmentConfig, ConfigManager};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::learning::WeightProposal;
use crate::domain::score::{Factor, FactorWeights};
use crate::domain::types::ProposalStatus;
use crate::engine::error::{DispatchError, DispatchResult};
use crate::repository::{ActionLogRepository, JobCompletionRepository, LearningSample, WeightProposalRepository};
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// 生成提案所需的最少样本数
pub const MIN_SAMPLE_SIZE: usize = 20;
/// 相关系数对权重的调整幅度
pub const LEARNING_RATE: f64 = 0.5;
/// 非零权重的下限
pub const MIN_WEIGHT: f64 = 1.0;
/// 单次学习读取的最大样本数
pub const SAMPLE_LIMIT: i64 = 1000;

pub struct LearningAdjuster {
    config: Arc<ConfigManager>,
    completions: Arc<JobCompletionRepository>,
    proposals: Arc<WeightProposalRepository>,
    action_log: Arc<ActionLogRepository>,
    decisions: Mutex<()>,
}

impl LearningAdjuster {
    pub fn new(
        config: Arc<ConfigManager>,
        completions: Arc<JobCompletionRepository>,
        proposals: Arc<WeightProposalRepository>,
        action_log: Arc<ActionLogRepository>,
    ) -> Self {
        Self {
            config,
            completions,
            proposals,
            action_log,
            decisions: Mutex::new(()),
        }
    }

    /// 生成权重提案
    ///
    /// # 返回
    /// - Ok(Some): 已生成并保存的提案
    /// - Ok(None): 样本不足
    /// - Err(Validation): 学习调参未启用
    pub fn generate_proposal(&self, actor: &str) -> DispatchResult<Option<WeightProposal>> {
        let active = self.config.get_active()?;
        if !active.learning_enabled {
            return Err(DispatchError::Validation("学习调参未启用 (learning_enabled = false)".to_string()));
        }

        let samples = self.completions.find_learning_samples(SAMPLE_LIMIT)?;
        if samples.len() < MIN_SAMPLE_SIZE {
            info!(sample_size = samples.len(), min = MIN_SAMPLE_SIZE, "样本不足, 不生成提案");
            return Ok(None);
        }

        let correlations = factor_correlations(&samples);
        let proposal = WeightProposal {
            proposal_id: Uuid::new_v4().to_string(),
            base_config_version: active.version,
            current_weights: active.weights,
            proposed_weights: propose_weights(&active.weights, &correlations),
            correlations,
            sample_size: samples.len() as i64,
            status: ProposalStatus::Proposed,
            created_at: Utc::now(),
            decided_at: None,
            decided_by: None,
            applied_config_version: None,
        };
        self.proposals.insert(&proposal)?;

        self.action_log.insert(
            &ActionLog::new(ActionType::ProposalGenerated, actor, None).with_payload(json!({
                "proposal_id": proposal.proposal_id,
                "base_config_version": proposal.base_config_version,
                "sample_size": proposal.sample_size,
            })),
        )?;

        info!(
            proposal_id = %proposal.proposal_id,
            sample_size = proposal.sample_size,
            "权重提案已生成"
        );
        Ok(Some(proposal))
    }

    /// 激活提案: 写入新配置版本
    pub fn activate_proposal(&self, proposal_id: &str, actor: &str) -> DispatchResult<AssignmentConfig> {
        let _decision = self.decisions.lock().unwrap_or_else(|e| e.into_inner());
        let proposal = self.load_open(proposal_id)?;

        let active = self.config.get_active()?;
        if active.version != proposal.base_config_version {
            warn!(
                proposal_id,
                base_version = proposal.base_config_version,
                active_version = active.version,
                "提案基于旧配置版本, 仅替换权重"
            );
        }

        let mut next = (*active).clone();
        next.weights = proposal.proposed_weights;
        let note = format!("激活权重提案 {}", proposal_id);
        let written = self.config.put_config(&next, actor, Some(&note))?;

        self.proposals.decide(
            proposal_id,
            ProposalStatus::Activated,
            actor,
            Utc::now(),
            Some(written.version),
        )?;
        self.action_log.insert(
            &ActionLog::new(ActionType::ProposalActivated, actor, None).with_payload(json!({
                "proposal_id": proposal_id,
                "config_version": written.version,
            })),
        )?;

        info!(proposal_id, config_version = written.version, actor, "权重提案已激活");
        Ok(written)
    }

    /// 驳回提案
    pub fn reject_proposal(&self, proposal_id: &str, actor: &str, reason: Option<&str>) -> DispatchResult<()> {
        let _decision = self.decisions.lock().unwrap_or_else(|e| e.into_inner());
        self.load_open(proposal_id)?;

        self.proposals
            .decide(proposal_id, ProposalStatus::Rejected, actor, Utc::now(), None)?;

        let mut log = ActionLog::new(ActionType::ProposalRejected, actor, None)
            .with_payload(json!({ "proposal_id": proposal_id }));
        if let Some(reason) = reason {
            log = log.with_detail(reason);
        }
        self.action_log.insert(&log)?;

        info!(proposal_id, actor, "权重提案已驳回");
        Ok(())
    }

    pub fn list_proposals(&self, status: Option<ProposalStatus>) -> DispatchResult<Vec<WeightProposal>> {
        Ok(self.proposals.list(status)?)
    }

    fn load_open(&self, proposal_id: &str) -> DispatchResult<WeightProposal> {
        let proposal = self
            .proposals
            .find_by_id(proposal_id)?
            .ok_or_else(|| DispatchError::not_found("WeightProposal", proposal_id))?;
        if proposal.status != ProposalStatus::Proposed {
            return Err(DispatchError::Validation(format!(
                "提案 {} 已处理: {}",
                proposal_id, proposal.status
            )));
        }
        Ok(proposal)
    }
}

// ==========================================
// 纯计算
// ==========================================

/// 各因子得分与履约质量的相关系数
pub fn factor_correlations(samples: &[LearningSample]) -> BTreeMap<Factor, f64> {
    let quality: Vec<f64> = samples.iter().map(|s| s.completion.quality()).collect();
    Factor::ALL
        .iter()
        .map(|f| {
            let xs: Vec<f64> = samples.iter().map(|s| s.factor_scores.get(*f)).collect();
            (*f, pearson(&xs, &quality))
        })
        .collect()
}

/// 皮尔逊相关系数; 样本不足或方差为 0 时为 0
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let (dx, dy) = (xs[i] - mean_x, ys[i] - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom <= f64::EPSILON || !denom.is_finite() {
        return 0.0;
    }
    (cov / denom).clamp(-1.0, 1.0)
}

/// 按相关系数调整权重，归一化到 100 并保留两位小数
///
/// 权重为 0 的因子保持 0；舍入误差补到最大权重上
pub fn propose_weights(current: &FactorWeights, correlations: &BTreeMap<Factor, f64>) -> FactorWeights {
    let mut raw = FactorWeights::default();
    for (factor, w) in current.iter() {
        let corr = correlations.get(&factor).copied().unwrap_or(0.0);
        let adjusted = if w > 0.0 {
            (w * (1.0 + LEARNING_RATE * corr)).max(MIN_WEIGHT)
        } else {
            0.0
        };
        raw.set(factor, adjusted);
    }

    let sum = raw.sum();
    if sum <= 0.0 || !sum.is_finite() {
        return *current;
    }

    let mut proposed = FactorWeights::default();
    for (factor, w) in raw.iter() {
        proposed.set(factor, round2(w / sum * 100.0));
    }

    let residual = 100.0 - proposed.sum();
    let largest = proposed.iter().max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((largest, w)) = largest {
        proposed.set(largest, round2(w + residual));
    }
    proposed
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WEIGHT_SUM_TOLERANCE;
    use crate::db::open_in_memory;

    #[test]
    fn test_pearson() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&xs, &[2.0, 4.0, 6.0, 8.0]) - 1.0).abs() < 1e-9);
        assert!((pearson(&xs, &[8.0, 6.0, 4.0, 2.0]) + 1.0).abs() < 1e-9);
        assert_eq!(pearson(&xs, &[5.0, 5.0, 5.0, 5.0]), 0.0);
        assert_eq!(pearson(&[1.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_proposed_weights_sum_to_100() {
        let current = FactorWeights::default_weights();
        let mut correlations = BTreeMap::new();
        correlations.insert(Factor::Proximity, 0.8);
        correlations.insert(Factor::Rating, -0.9);
        correlations.insert(Factor::Experience, 0.33);

        let proposed = propose_weights(&current, &correlations);
        assert!((proposed.sum() - 100.0).abs() <= WEIGHT_SUM_TOLERANCE);
        assert!(proposed.proximity > current.proximity);
        assert!(proposed.rating < current.rating);
        for (_, w) in proposed.iter() {
            assert_eq!(w, round2(w));
        }
    }

    #[test]
    fn test_zero_weight_stays_zero_and_floor_applies() {
        let mut current = FactorWeights::default_weights();
        current.workload = 0.0;
        current.proximity = 30.0;
        current.preference = 1.0;
        current.experience = 9.0;
        let mut correlations = BTreeMap::new();
        correlations.insert(Factor::Workload, 1.0);
        correlations.insert(Factor::Preference, -1.0);

        let proposed = propose_weights(&current, &correlations);
        assert_eq!(proposed.workload, 0.0);
        // 1.0 × 0.5 被抬到下限 1.0 后再归一化
        assert!(proposed.preference > 0.9);
        assert!((proposed.sum() - 100.0).abs() <= WEIGHT_SUM_TOLERANCE);
    }

    fn adjuster(learning_enabled: bool) -> LearningAdjuster {
        let conn = open_in_memory().unwrap();
        let config = Arc::new(ConfigManager::new(conn.clone()).unwrap());
        if learning_enabled {
            let mut c = (*config.get_active().unwrap()).clone();
            c.learning_enabled = true;
            config.put_config(&c, "ops", None).unwrap();
        }
        LearningAdjuster::new(
            config,
            Arc::new(JobCompletionRepository::new(conn.clone())),
            Arc::new(WeightProposalRepository::new(conn.clone())),
            Arc::new(ActionLogRepository::new(conn)),
        )
    }

    #[test]
    fn test_disabled_learning_is_rejected() {
        let err = adjuster(false).generate_proposal("ops").unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn test_insufficient_samples_yields_no_proposal() {
        let adjuster = adjuster(true);
        assert!(adjuster.generate_proposal("ops").unwrap().is_none());
        assert!(adjuster.list_proposals(None).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_proposal_not_found() {
        let err = adjuster(true).activate_proposal("missing", "ops").unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { .. }));
    }
}
