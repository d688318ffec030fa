// ==========================================
// 承包商派单引擎 - API 层
// ==========================================
// 职责: 入参校验与错误归一，供嵌入方/传输层调用
// ==========================================

pub mod config_api;
pub mod dispatch_api;
pub mod error;

// 重导出核心类型
pub use config_api::ConfigApi;
pub use dispatch_api::commands::JobCompletionRequest;
pub use dispatch_api::DispatchApi;
pub use error::{ApiError, ApiResult};
