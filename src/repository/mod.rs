// ==========================================
// 承包商派单引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod action_log_repo;
pub mod attempt_repo;
pub mod completion_repo;
pub mod contractor_repo;
pub mod dispatch_run_repo;
pub mod effectiveness_repo;
pub mod error;
pub mod fallback_cursor_repo;
pub mod job_repo;
pub mod proposal_repo;
pub mod score_repo;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use attempt_repo::AttemptRepository;
pub use completion_repo::{JobCompletionRepository, LearningSample};
pub use contractor_repo::ContractorRepository;
pub use dispatch_run_repo::DispatchRunRepository;
pub use effectiveness_repo::EffectivenessRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use fallback_cursor_repo::FallbackCursorRepository;
pub use job_repo::JobRepository;
pub use proposal_repo::WeightProposalRepository;
pub use score_repo::ScoreRepository;
