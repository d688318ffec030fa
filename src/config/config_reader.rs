// ==========================================
// 承包商派单引擎 - 配置读取接口
// ==========================================
// 职责: 定义派单引擎读取配置的能力接口
// 说明: 引擎依赖接口而非 ConfigManager，便于测试替换
// ==========================================

use crate::config::assignment_config::AssignmentConfig;
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use std::sync::Arc;

/// 派单配置读取器
///
/// 每次评分运行开始时读取一次当前激活配置并快照，
/// 运行中的报价一律使用快照，不受后续配置变更影响。
#[async_trait]
pub trait AssignmentConfigReader: Send + Sync {
    /// 获取当前激活配置
    async fn get_active_config(&self) -> RepositoryResult<Arc<AssignmentConfig>>;

    /// 获取指定版本配置
    async fn get_config_version(&self, version: i64) -> RepositoryResult<Option<AssignmentConfig>>;
}
