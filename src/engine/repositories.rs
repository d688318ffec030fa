// ==========================================
// 承包商派单引擎 - 引擎层仓储聚合
// ==========================================
// 职责:
// - 定义引擎访问工单/承包商目录的接口 (JobStore / ContractorDirectory)
// - 聚合派单引擎所需的所有 Repository，简化依赖注入
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::domain::contractor::Contractor;
use crate::domain::job::Job;
use crate::domain::types::{AssignmentMethod, AttemptOutcome, JobStatus};
use crate::repository::{
    ActionLogRepository, AttemptRepository, ContractorRepository, DispatchRunRepository,
    FallbackCursorRepository, JobCompletionRepository, JobRepository, RepositoryResult,
    ScoreRepository,
};

// ==========================================
// JobStore - 工单状态存储接口
// ==========================================
// 状态写入全部带 from 条件，返回 false 表示并发下状态已变化
pub trait JobStore: Send + Sync {
    fn find_job(&self, job_id: &str) -> RepositoryResult<Option<Job>>;

    fn transition_status(&self, job_id: &str, from: JobStatus, to: JobStatus) -> RepositoryResult<bool>;

    fn mark_assigned(
        &self,
        job_id: &str,
        from: JobStatus,
        contractor_id: &str,
        method: AssignmentMethod,
    ) -> RepositoryResult<bool>;

    fn reopen(&self, job_id: &str, from: JobStatus) -> RepositoryResult<bool>;

    fn count_prior_customer_jobs(
        &self,
        customer_id: &str,
        contractor_id: &str,
        exclude_job_id: &str,
    ) -> RepositoryResult<i64>;
}

// ==========================================
// ContractorDirectory - 承包商目录接口
// ==========================================
pub trait ContractorDirectory: Send + Sync {
    fn find_contractor(&self, contractor_id: &str) -> RepositoryResult<Option<Contractor>>;

    fn list_dispatchable(&self) -> RepositoryResult<Vec<Contractor>>;

    /// 原子检查并递增容量
    fn try_reserve_capacity(&self, contractor_id: &str) -> RepositoryResult<bool>;

    fn release_capacity(&self, contractor_id: &str) -> RepositoryResult<bool>;

    /// 撤销未提交指派的预占 (连同指派计数)
    fn rollback_reservation(&self, contractor_id: &str) -> RepositoryResult<bool>;

    fn record_offer_outcome(&self, contractor_id: &str, outcome: AttemptOutcome) -> RepositoryResult<()>;

    fn record_completion(&self, contractor_id: &str, completed: bool, on_time: bool) -> RepositoryResult<()>;
}

impl JobStore for JobRepository {
    fn find_job(&self, job_id: &str) -> RepositoryResult<Option<Job>> {
        self.find_by_id(job_id)
    }

    fn transition_status(&self, job_id: &str, from: JobStatus, to: JobStatus) -> RepositoryResult<bool> {
        JobRepository::transition_status(self, job_id, from, to)
    }

    fn mark_assigned(
        &self,
        job_id: &str,
        from: JobStatus,
        contractor_id: &str,
        method: AssignmentMethod,
    ) -> RepositoryResult<bool> {
        JobRepository::mark_assigned(self, job_id, from, contractor_id, method)
    }

    fn reopen(&self, job_id: &str, from: JobStatus) -> RepositoryResult<bool> {
        JobRepository::reopen(self, job_id, from)
    }

    fn count_prior_customer_jobs(
        &self,
        customer_id: &str,
        contractor_id: &str,
        exclude_job_id: &str,
    ) -> RepositoryResult<i64> {
        JobRepository::count_prior_customer_jobs(self, customer_id, contractor_id, exclude_job_id)
    }
}

impl ContractorDirectory for ContractorRepository {
    fn find_contractor(&self, contractor_id: &str) -> RepositoryResult<Option<Contractor>> {
        self.find_by_id(contractor_id)
    }

    fn list_dispatchable(&self) -> RepositoryResult<Vec<Contractor>> {
        self.find_dispatchable()
    }

    fn try_reserve_capacity(&self, contractor_id: &str) -> RepositoryResult<bool> {
        ContractorRepository::try_reserve_capacity(self, contractor_id)
    }

    fn release_capacity(&self, contractor_id: &str) -> RepositoryResult<bool> {
        ContractorRepository::release_capacity(self, contractor_id)
    }

    fn rollback_reservation(&self, contractor_id: &str) -> RepositoryResult<bool> {
        ContractorRepository::rollback_reservation(self, contractor_id)
    }

    fn record_offer_outcome(&self, contractor_id: &str, outcome: AttemptOutcome) -> RepositoryResult<()> {
        ContractorRepository::record_offer_outcome(self, contractor_id, outcome)
    }

    fn record_completion(&self, contractor_id: &str, completed: bool, on_time: bool) -> RepositoryResult<()> {
        ContractorRepository::record_completion(self, contractor_id, completed, on_time)
    }
}

/// 派单引擎仓储集合
///
/// # 包含的仓储
/// - `jobs` / `contractors`: 通过接口访问，可替换为外部系统适配
/// - `runs` / `scores` / `attempts`: 只追加的评分与尝试日志
/// - `cursors`: 兜底轮询游标
/// - `completions`: 完工回传
/// - `action_log`: 操作日志
#[derive(Clone)]
pub struct DispatchRepositories {
    pub jobs: Arc<dyn JobStore>,
    pub contractors: Arc<dyn ContractorDirectory>,
    pub runs: Arc<DispatchRunRepository>,
    pub scores: Arc<ScoreRepository>,
    pub attempts: Arc<AttemptRepository>,
    pub cursors: Arc<FallbackCursorRepository>,
    pub completions: Arc<JobCompletionRepository>,
    pub action_log: Arc<ActionLogRepository>,
}

impl DispatchRepositories {
    /// 基于同一 SQLite 连接构建全部仓储
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            jobs: Arc::new(JobRepository::new(conn.clone())),
            contractors: Arc::new(ContractorRepository::new(conn.clone())),
            runs: Arc::new(DispatchRunRepository::new(conn.clone())),
            scores: Arc::new(ScoreRepository::new(conn.clone())),
            attempts: Arc::new(AttemptRepository::new(conn.clone())),
            cursors: Arc::new(FallbackCursorRepository::new(conn.clone())),
            completions: Arc::new(JobCompletionRepository::new(conn.clone())),
            action_log: Arc::new(ActionLogRepository::new(conn)),
        }
    }
}
