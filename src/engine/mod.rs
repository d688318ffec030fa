// ==========================================
// 承包商派单引擎 - 引擎层
// ==========================================
// 职责: 候选生成、评分、派单编排、效果统计、学习调参
// 红线: Engine 不拼 SQL，数据访问一律经由仓储
// 红线: 每个评分都带推荐说明，每次落定都带原因
// ==========================================

pub mod candidate;
pub mod collaborators;
pub mod effectiveness;
pub mod error;
pub mod events;
pub mod fallback;
pub mod job_lock;
pub mod learning;
pub mod offer_timer;
pub mod orchestrator;
pub mod repositories;
pub mod scoring;
pub mod worker_pool;

// 重导出核心引擎
pub use candidate::{Candidate, CandidateGenerator, CandidateSet};
pub use collaborators::{
    AlertKind, DeliveryRetryPolicy, LocationService, LoggingAlerter, LoggingOfferNotifier,
    OfferNotice, OfferNotifier, OperatorAlert, OperatorAlerter, StraightLineLocationService,
};
pub use effectiveness::EffectivenessTracker;
pub use error::{DispatchError, DispatchResult};
pub use events::{ChannelOutcomePublisher, NoOpOutcomePublisher, OutcomeEvent, OutcomePublisher};
pub use fallback::RoundRobinFallback;
pub use job_lock::JobLocks;
pub use learning::LearningAdjuster;
pub use offer_timer::OfferTimers;
pub use orchestrator::{AssignmentOrchestrator, DispatchOutcome, SYSTEM_ACTOR};
pub use repositories::{ContractorDirectory, DispatchRepositories, JobStore};
pub use scoring::Scorer;
pub use worker_pool::{DispatchWorkerPool, JobReport};
