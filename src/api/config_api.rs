// ==========================================
// 承包商派单引擎 - 配置管理 API
// ==========================================
// 职责: 派单配置查询、更新、版本激活、学习提案审批
// 约束: 每次配置变更写入 ActionLog
// ==========================================

use std::sync::Arc;

use serde_json::json;

use crate::api::error::{ApiError, ApiResult};
use crate::config::{AssignmentConfig, ConfigManager, ConfigVersionRecord};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::learning::WeightProposal;
use crate::domain::types::ProposalStatus;
use crate::engine::LearningAdjuster;
use crate::repository::ActionLogRepository;

// ==========================================
// ConfigApi - 配置管理 API
// ==========================================

/// 配置管理API
///
/// 职责：
/// 1. 派单配置查询与更新（每次更新产生新版本）
/// 2. 历史版本重新激活
/// 3. 权重提案的生成与审批
/// 4. ActionLog记录
pub struct ConfigApi {
    config_manager: Arc<ConfigManager>,
    learning: Arc<LearningAdjuster>,
    action_log_repo: Arc<ActionLogRepository>,
}

impl ConfigApi {
    pub fn new(
        config_manager: Arc<ConfigManager>,
        learning: Arc<LearningAdjuster>,
        action_log_repo: Arc<ActionLogRepository>,
    ) -> Self {
        Self {
            config_manager,
            learning,
            action_log_repo,
        }
    }

    // ==========================================
    // 派单配置
    // ==========================================

    /// 查询当前激活配置
    pub fn get_active_config(&self) -> ApiResult<AssignmentConfig> {
        Ok(self.config_manager.get_active()?.as_ref().clone())
    }

    /// 查询指定版本
    pub fn get_config_version(&self, version: i64) -> ApiResult<AssignmentConfig> {
        self.config_manager
            .get_version(version)?
            .ok_or_else(|| ApiError::NotFound(format!("AssignmentConfig(version={})不存在", version)))
    }

    /// 列出全部版本 (新版本在前)
    pub fn list_versions(&self) -> ApiResult<Vec<ConfigVersionRecord>> {
        Ok(self.config_manager.list_versions()?)
    }

    /// 更新配置
    ///
    /// # 参数
    /// - config: 新配置 (version 字段忽略，由存储分配)
    /// - operator: 操作人
    /// - reason: 操作原因
    ///
    /// # 返回
    /// - Ok(AssignmentConfig): 已激活的新版本
    /// - Err(ValidationError): 配置非法，原激活配置不变
    pub fn put_config(&self, config: &AssignmentConfig, operator: &str, reason: &str) -> ApiResult<AssignmentConfig> {
        if operator.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作人不能为空".to_string()));
        }
        if reason.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作原因不能为空".to_string()));
        }

        let previous = self.config_manager.get_active()?.version;
        let stored = self.config_manager.put_config(config, operator, Some(reason))?;

        let log = ActionLog::new(ActionType::ConfigUpdate, operator, None)
            .with_detail(format!("派单配置 v{} → v{}: {}", previous, stored.version, reason))
            .with_payload(json!({
                "previous_version": previous,
                "version": stored.version,
                "config": &stored,
            }));
        self.action_log_repo.insert(&log)?;

        Ok(stored)
    }

    /// 重新激活历史版本
    pub fn activate_version(&self, version: i64, operator: &str) -> ApiResult<AssignmentConfig> {
        if operator.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作人不能为空".to_string()));
        }

        let previous = self.config_manager.get_active()?.version;
        let config = self.config_manager.activate_version(version)?;

        let log = ActionLog::new(ActionType::ConfigActivate, operator, None)
            .with_detail(format!("重新激活派单配置 v{} (原 v{})", version, previous))
            .with_payload(json!({ "previous_version": previous, "version": version }));
        self.action_log_repo.insert(&log)?;

        Ok(config)
    }

    /// 当前激活配置的 JSON 快照
    pub fn get_config_snapshot(&self) -> ApiResult<String> {
        Ok(self.config_manager.get_config_snapshot()?)
    }

    // ==========================================
    // 学习调参提案
    // ==========================================

    /// 生成权重提案
    ///
    /// # 返回
    /// - Ok(Some): 新提案 (PROPOSED)
    /// - Ok(None): 样本不足，未生成
    pub fn generate_proposal(&self, operator: &str) -> ApiResult<Option<WeightProposal>> {
        if operator.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作人不能为空".to_string()));
        }
        Ok(self.learning.generate_proposal(operator)?)
    }

    pub fn list_proposals(&self, status: Option<ProposalStatus>) -> ApiResult<Vec<WeightProposal>> {
        Ok(self.learning.list_proposals(status)?)
    }

    /// 激活提案 (写入新配置版本)
    pub fn activate_proposal(&self, proposal_id: &str, operator: &str) -> ApiResult<AssignmentConfig> {
        if proposal_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("提案ID不能为空".to_string()));
        }
        if operator.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作人不能为空".to_string()));
        }
        Ok(self.learning.activate_proposal(proposal_id, operator)?)
    }

    pub fn reject_proposal(&self, proposal_id: &str, operator: &str, reason: Option<&str>) -> ApiResult<()> {
        if proposal_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("提案ID不能为空".to_string()));
        }
        if operator.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作人不能为空".to_string()));
        }
        Ok(self.learning.reject_proposal(proposal_id, operator, reason)?)
    }
}
