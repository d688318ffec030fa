// ==========================================
// 承包商派单引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod attempt;
pub mod contractor;
pub mod dispatch_run;
pub mod effectiveness;
pub mod job;
pub mod learning;
pub mod score;
pub mod types;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use attempt::AssignmentAttempt;
pub use contractor::{Contractor, ContractorPreferences, OfferHistory, GENERAL_SERVICE};
pub use dispatch_run::{DispatchRun, RunOutcome};
pub use effectiveness::{period_end, period_start, EffectivenessSnapshot};
pub use job::{GeoPoint, Job};
pub use learning::{JobCompletion, WeightProposal};
pub use score::{AssignmentScore, Factor, FactorScores, FactorValues, FactorWeights};
pub use types::{
    AssignmentMethod, AttemptOutcome, Availability, JobPriority, JobStatus, PeriodKind,
    ProposalStatus, ScoreOutcome, SpecializationMatch,
};
