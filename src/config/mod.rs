// ==========================================
// 承包商派单引擎 - 配置层
// ==========================================
// 职责: 派单配置的校验、版本化存储与热加载
// 存储: assignment_config 表 (每次写入产生新版本)
// ==========================================

pub mod assignment_config;
pub mod config_manager;
pub mod config_reader;

// 重导出核心配置类型
pub use assignment_config::{AssignmentConfig, MAX_PROGRESSIVE_ATTEMPTS_CEILING, WEIGHT_SUM_TOLERANCE};
pub use config_manager::{ConfigManager, ConfigVersionRecord};
pub use config_reader::AssignmentConfigReader;
