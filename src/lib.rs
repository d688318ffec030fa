// ==========================================
// 承包商派单引擎 - 核心库
// ==========================================
// 职责: 候选筛选、多因子评分、渐进式报价、兜底轮询、效果统计、学习调参
// 技术栈: Rust + tokio + SQLite
// 系统定位: 自动派单为主，运维保留最终干预权
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 派单配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组件装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AssignmentMethod, AttemptOutcome, Availability, JobPriority, JobStatus, PeriodKind,
    ProposalStatus, ScoreOutcome, SpecializationMatch,
};

// 领域实体
pub use domain::{
    ActionLog, ActionType, AssignmentAttempt, AssignmentScore, Contractor, DispatchRun,
    EffectivenessSnapshot, GeoPoint, Job, JobCompletion, WeightProposal,
};

// 引擎
pub use engine::{
    AssignmentOrchestrator, DispatchError, DispatchOutcome, DispatchWorkerPool, EffectivenessTracker,
    LearningAdjuster,
};

// 配置
pub use config::{AssignmentConfig, ConfigManager};

// API
pub use api::{ApiError, ConfigApi, DispatchApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "承包商派单引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
