// ==========================================
// 承包商派单引擎 - 应用层
// ==========================================
// 职责: 装配各层组件，供进程入口与嵌入方使用
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState, Collaborators, DB_PATH_ENV};
