// ==========================================
// 承包商派单引擎 - 操作日志数据仓储
// ==========================================
// 存储: action_log 表
// 红线: 人工操作、配置变更、告警、挂起均必须记录
// ==========================================

mod core;
mod queries;


pub use core::ActionLogRepository;
