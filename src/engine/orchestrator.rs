// ==========================================
// 承包商派单引擎 - 派单编排器
// ==========================================
// 状态机:
//   NEW → SCORING → OFFERING(n) → ASSIGNED
//                       ↓ 拒绝/超时/投递失败
//                   OFFERING(n+1) ... 用尽 → 兜底轮询 → ASSIGNED
//                                             ↘ UNASSIGNABLE (告警)
//   任意非终态 → CANCELLED
// 并发:
// - 同一工单的所有写操作在工单锁内执行 (单写者)
// - 接受与超时通过尝试记录的 CAS 落定，败者为空操作
// - 同一工单至多一个 PENDING 尝试 (数据库部分唯一索引兜底)
// 完整性:
// - 状态 CAS 失败 → 记录 JOB_PARKED + 告警，返回 InvalidStateTransition
// ==========================================

use crate::config::{AssignmentConfig, AssignmentConfigReader};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::attempt::{
    AssignmentAttempt, REASON_AT_CAPACITY, REASON_CONTRACTOR_DECLINED, REASON_DELIVERY_FAILED,
    REASON_JOB_CANCELLED, REASON_OFFER_EXPIRED,
};
use crate::domain::job::Job;
use crate::domain::learning::JobCompletion;
use crate::domain::types::{AssignmentMethod, AttemptOutcome, JobStatus, ScoreOutcome};
use crate::domain::{DispatchRun, RunOutcome};
use crate::engine::candidate::CandidateGenerator;
use crate::engine::collaborators::{
    AlertKind, DeliveryRetryPolicy, LocationService, OfferNotice, OfferNotifier, OperatorAlert,
    OperatorAlerter,
};
use crate::engine::error::{DispatchError, DispatchResult};
use crate::engine::events::{NoOpOutcomePublisher, OutcomeEvent, OutcomePublisher};
use crate::engine::fallback::RoundRobinFallback;
use crate::engine::job_lock::JobLocks;
use crate::engine::offer_timer::OfferTimers;
use crate::engine::repositories::DispatchRepositories;
use crate::engine::scoring::Scorer;
use crate::repository::RepositoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// 系统自动操作的操作人
pub const SYSTEM_ACTOR: &str = "system";

// ==========================================
// DispatchOutcome - 一次编排调用的结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchOutcome {
    /// 已向承包商发出报价，等待响应
    Offered {
        job_id: String,
        attempt_id: String,
        contractor_id: String,
        attempt_number: i32,
        expires_at: DateTime<Utc>,
    },
    /// 工单已指派
    Assigned {
        job_id: String,
        contractor_id: String,
        method: AssignmentMethod,
    },
    /// 工单无法指派 (已告警)
    Unassignable { job_id: String, reason: String },
}

impl DispatchOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            DispatchOutcome::Offered { job_id, .. } => job_id,
            DispatchOutcome::Assigned { job_id, .. } => job_id,
            DispatchOutcome::Unassignable { job_id, .. } => job_id,
        }
    }
}

// ==========================================
// AssignmentOrchestrator - 派单编排器
// ==========================================
pub struct AssignmentOrchestrator {
    repos: DispatchRepositories,
    config: Arc<dyn AssignmentConfigReader>,
    candidates: CandidateGenerator,
    scorer: Scorer,
    fallback: RoundRobinFallback,
    notifier: Arc<dyn OfferNotifier>,
    alerter: Arc<dyn OperatorAlerter>,
    publisher: Arc<dyn OutcomePublisher>,
    retry: DeliveryRetryPolicy,
    locks: JobLocks,
    timers: OfferTimers,
}

impl AssignmentOrchestrator {
    /// 创建编排器
    ///
    /// # 参数
    /// - repos: 仓储集合
    /// - config: 配置读取器 (每次评分运行快照一次)
    /// - location: 距离服务
    /// - notifier: 报价通知
    /// - alerter: 运维告警
    pub fn new(
        repos: DispatchRepositories,
        config: Arc<dyn AssignmentConfigReader>,
        location: Arc<dyn LocationService>,
        notifier: Arc<dyn OfferNotifier>,
        alerter: Arc<dyn OperatorAlerter>,
    ) -> Self {
        Self {
            candidates: CandidateGenerator::new(repos.contractors.clone(), repos.jobs.clone(), location),
            fallback: RoundRobinFallback::new(repos.contractors.clone(), repos.cursors.clone()),
            scorer: Scorer::new(),
            publisher: Arc::new(NoOpOutcomePublisher),
            retry: DeliveryRetryPolicy::default(),
            locks: JobLocks::new(),
            timers: OfferTimers::new(),
            repos,
            config,
            notifier,
            alerter,
        }
    }

    /// 设置结果事件发布者
    pub fn with_publisher(mut self, publisher: Arc<dyn OutcomePublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// 设置投递重试策略
    pub fn with_retry_policy(mut self, retry: DeliveryRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn repositories(&self) -> &DispatchRepositories {
        &self.repos
    }

    /// 当前登记的超时任务数
    pub fn pending_timer_count(&self) -> usize {
        self.timers.pending_count()
    }

    // ==========================================
    // 入站: 派单触发
    // ==========================================

    /// 触发派单 (按工单ID)
    ///
    /// # 返回
    /// - Offered: 已发出第一个报价
    /// - Assigned: 兜底直接指派
    /// - Unassignable: 无法指派，已告警
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn assign_job(self: &Arc<Self>, job_id: &str) -> DispatchResult<DispatchOutcome> {
        let _guard = self.locks.lock(job_id).await;
        let job = self.load_job(job_id)?;

        match job.status {
            JobStatus::New => self.start_run(job, HashSet::new()).await,
            JobStatus::Assigned => Err(already_assigned(&job)),
            JobStatus::Unassignable | JobStatus::Cancelled => Err(DispatchError::JobNotActive {
                job_id: job.job_id,
                status: job.status,
            }),
            JobStatus::Scoring | JobStatus::Offering => Err(DispatchError::InvalidStateTransition {
                job_id: job.job_id,
                from: job.status,
                to: JobStatus::Scoring,
            }),
        }
    }

    // ==========================================
    // 入站: 报价回调
    // ==========================================

    /// 承包商接受报价
    #[instrument(skip(self), fields(attempt_id = %attempt_id))]
    pub async fn accept_offer(self: &Arc<Self>, attempt_id: &str) -> DispatchResult<DispatchOutcome> {
        let job_id = self.load_attempt(attempt_id)?.job_id;
        let _guard = self.locks.lock(&job_id).await;

        let attempt = self.load_attempt(attempt_id)?;
        let job = self.load_job(&job_id)?;

        if job.status == JobStatus::Assigned {
            return Err(already_assigned(&job));
        }
        if job.status.is_terminal() {
            return Err(DispatchError::JobNotActive {
                job_id,
                status: job.status,
            });
        }
        if attempt.outcome != AttemptOutcome::Pending {
            return Err(offer_not_active(&attempt));
        }

        // 晚到的接受: 超时任务尚未执行时在这里落定
        if attempt.is_expired_at(Utc::now()) {
            self.timers.cancel(attempt_id);
            if self.resolve_attempt(&attempt, AttemptOutcome::Timeout, Some(REASON_OFFER_EXPIRED))? {
                self.advance_after_rejection(&attempt).await?;
            }
            return Err(DispatchError::OfferNotActive {
                attempt_id: attempt_id.to_string(),
                outcome: AttemptOutcome::Timeout,
            });
        }

        let contractor_id = attempt.contractor_id.clone();
        if !self.repos.contractors.try_reserve_capacity(&contractor_id)? {
            warn!(contractor_id = %contractor_id, "接受时容量已满, 转为拒绝");
            self.timers.cancel(attempt_id);
            if self.resolve_attempt(&attempt, AttemptOutcome::Declined, Some(REASON_AT_CAPACITY))? {
                self.advance_after_rejection(&attempt).await?;
            }
            return Err(DispatchError::ContractorAtCapacity(contractor_id));
        }

        if !self.resolve_attempt(&attempt, AttemptOutcome::Accepted, None)? {
            self.repos.contractors.rollback_reservation(&contractor_id)?;
            let current = self.load_attempt(attempt_id)?;
            return Err(offer_not_active(&current));
        }
        self.timers.cancel(attempt_id);

        if !self.repos.jobs.mark_assigned(
            &job_id,
            JobStatus::Offering,
            &contractor_id,
            AssignmentMethod::Progressive,
        )? {
            self.repos.contractors.rollback_reservation(&contractor_id)?;
            return Err(self
                .park_job(&job_id, JobStatus::Offering, JobStatus::Assigned, "接受报价时工单状态已变化")
                .await);
        }

        if let Some(run_id) = attempt.run_id.as_deref() {
            self.repos.runs.finish(run_id, RunOutcome::AssignedProgressive)?;
            self.repos.scores.mark_pending_not_offered(run_id)?;
        }

        info!(
            job_id = %job_id,
            contractor_id = %contractor_id,
            attempt_number = attempt.attempt_number,
            "报价已接受, 工单已指派"
        );
        Ok(DispatchOutcome::Assigned {
            job_id,
            contractor_id,
            method: AssignmentMethod::Progressive,
        })
    }

    /// 承包商拒绝报价，推进到下一候选
    #[instrument(skip(self), fields(attempt_id = %attempt_id))]
    pub async fn decline_offer(
        self: &Arc<Self>,
        attempt_id: &str,
        reason: Option<&str>,
    ) -> DispatchResult<DispatchOutcome> {
        let job_id = self.load_attempt(attempt_id)?.job_id;
        let _guard = self.locks.lock(&job_id).await;

        let attempt = self.load_attempt(attempt_id)?;
        if attempt.outcome != AttemptOutcome::Pending {
            return Err(offer_not_active(&attempt));
        }

        self.timers.cancel(attempt_id);
        let reason = reason.unwrap_or(REASON_CONTRACTOR_DECLINED);
        if !self.resolve_attempt(&attempt, AttemptOutcome::Declined, Some(reason))? {
            let current = self.load_attempt(attempt_id)?;
            return Err(offer_not_active(&current));
        }

        info!(job_id = %job_id, contractor_id = %attempt.contractor_id, reason, "报价被拒绝");
        self.advance_after_rejection(&attempt).await
    }

    /// 报价超时 (计时器触发)
    ///
    /// 已被接受/拒绝/撤回时为空操作
    pub async fn on_offer_expired(self: &Arc<Self>, attempt_id: &str) -> DispatchResult<()> {
        let job_id = match self.repos.attempts.find_by_id(attempt_id)? {
            Some(a) => a.job_id,
            None => {
                warn!(attempt_id, "超时触发但尝试记录不存在");
                return Ok(());
            }
        };
        let _guard = self.locks.lock(&job_id).await;

        let attempt = self.load_attempt(attempt_id)?;
        if attempt.outcome != AttemptOutcome::Pending {
            debug!(attempt_id, outcome = %attempt.outcome, "报价已落定, 忽略超时");
            return Ok(());
        }
        if !self.resolve_attempt(&attempt, AttemptOutcome::Timeout, Some(REASON_OFFER_EXPIRED))? {
            return Ok(());
        }

        info!(job_id = %job_id, contractor_id = %attempt.contractor_id, "报价超时");
        self.advance_after_rejection(&attempt).await.map(|_| ())
    }

    // ==========================================
    // 入站: 取消
    // ==========================================

    /// 取消工单: 撤回未决报价并取消计时器
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn cancel_job(self: &Arc<Self>, job_id: &str, actor: &str, reason: Option<&str>) -> DispatchResult<()> {
        let _guard = self.locks.lock(job_id).await;
        let job = self.load_job(job_id)?;

        if !job.status.can_transition_to(JobStatus::Cancelled) {
            return Err(DispatchError::JobNotActive {
                job_id: job.job_id,
                status: job.status,
            });
        }

        if let Some(attempt) = self.repos.attempts.find_pending_by_job(job_id)? {
            self.timers.cancel(&attempt.attempt_id);
            if self.resolve_attempt(&attempt, AttemptOutcome::Withdrawn, Some(REASON_JOB_CANCELLED))? {
                let notice = withdrawal_notice(&job, &attempt);
                if let Err(e) = self.notifier.withdraw_offer(&notice, REASON_JOB_CANCELLED).await {
                    warn!(attempt_id = %attempt.attempt_id, error = %e, "撤回通知发送失败");
                }
            }
        }

        if let Some(run) = self.repos.runs.find_latest_for_job(job_id)? {
            if run.final_outcome.is_none() {
                self.repos.scores.mark_pending_not_offered(&run.run_id)?;
                self.repos.runs.finish(&run.run_id, RunOutcome::Cancelled)?;
            }
        }

        self.transition(job_id, job.status, JobStatus::Cancelled).await?;

        let mut log = ActionLog::new(ActionType::CancelJob, actor, Some(job_id))
            .with_payload(json!({ "from_status": job.status.as_str() }));
        if let Some(reason) = reason {
            log = log.with_detail(reason);
        }
        self.repos.action_log.insert(&log)?;

        info!(job_id, actor, "工单已取消");
        Ok(())
    }

    // ==========================================
    // 人工干预
    // ==========================================

    /// 改派
    ///
    /// # 参数
    /// - target: 指定承包商 (人工指派)；为空时排除原承包商重新智能派单
    #[instrument(skip(self, reason), fields(job_id = %job_id, actor = %actor))]
    pub async fn reassign(
        self: &Arc<Self>,
        job_id: &str,
        actor: &str,
        reason: &str,
        target: Option<&str>,
    ) -> DispatchResult<DispatchOutcome> {
        if reason.trim().is_empty() {
            return Err(DispatchError::Validation("改派必须填写原因".to_string()));
        }

        let _guard = self.locks.lock(job_id).await;
        let job = self.load_job(job_id)?;
        if !job.status.can_reopen() {
            return Err(DispatchError::JobNotActive {
                job_id: job.job_id,
                status: job.status,
            });
        }

        let previous = job.assigned_contractor_id.clone();
        if let Some(target) = target {
            if previous.as_deref() == Some(target) {
                return Err(DispatchError::Validation(format!(
                    "目标承包商与当前承包商相同: {}",
                    target
                )));
            }
            if self.repos.contractors.find_contractor(target)?.is_none() {
                return Err(DispatchError::not_found("Contractor", target));
            }
            if !self.repos.contractors.try_reserve_capacity(target)? {
                return Err(DispatchError::ContractorAtCapacity(target.to_string()));
            }
        }

        if !self.repos.jobs.reopen(job_id, job.status)? {
            if let Some(target) = target {
                self.repos.contractors.rollback_reservation(target)?;
            }
            return Err(self
                .park_job(job_id, job.status, JobStatus::New, "改派时工单状态已变化")
                .await);
        }
        if job.status == JobStatus::Assigned {
            if let Some(previous) = previous.as_deref() {
                self.repos.contractors.release_capacity(previous)?;
            }
        }

        self.repos.action_log.insert(
            &ActionLog::new(ActionType::Reassign, actor, Some(job_id))
                .with_detail(reason)
                .with_payload(json!({
                    "from_status": job.status.as_str(),
                    "previous_contractor_id": previous,
                    "target_contractor_id": target,
                })),
        )?;

        let excluded: HashSet<String> = previous.into_iter().collect();
        match target {
            Some(target) => self.assign_manually(job_id, target, actor, reason).await,
            None => {
                let job = self.load_job(job_id)?;
                self.start_run(job, excluded).await
            }
        }
    }

    /// 立即智能派单 (NEW 或 UNASSIGNABLE 工单)
    #[instrument(skip(self), fields(job_id = %job_id, actor = %actor))]
    pub async fn ai_assign_now(self: &Arc<Self>, job_id: &str, actor: &str) -> DispatchResult<DispatchOutcome> {
        let _guard = self.locks.lock(job_id).await;
        let job = self.load_job(job_id)?;

        match job.status {
            JobStatus::New => {}
            JobStatus::Unassignable => {
                if !self.repos.jobs.reopen(job_id, JobStatus::Unassignable)? {
                    return Err(self
                        .park_job(job_id, JobStatus::Unassignable, JobStatus::New, "重新打开工单失败")
                        .await);
                }
            }
            JobStatus::Assigned => return Err(already_assigned(&job)),
            status => return Err(DispatchError::JobNotActive { job_id: job.job_id, status }),
        }

        self.repos.action_log.insert(
            &ActionLog::new(ActionType::ManualDispatch, actor, Some(job_id))
                .with_payload(json!({ "from_status": job.status.as_str() })),
        )?;

        let job = self.load_job(job_id)?;
        self.start_run(job, HashSet::new()).await
    }

    /// 记录完工结果 (学习调参与承包商历史)
    #[instrument(skip(self, completion), fields(job_id = %completion.job_id))]
    pub async fn record_job_completion(&self, completion: JobCompletion) -> DispatchResult<()> {
        if let Some(rating) = completion.customer_rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(DispatchError::Validation(format!("客户评分必须在 [0, 5], 实际 {}", rating)));
            }
        }

        let _guard = self.locks.lock(&completion.job_id).await;
        let job = self.load_job(&completion.job_id)?;
        if job.status != JobStatus::Assigned
            || job.assigned_contractor_id.as_deref() != Some(completion.contractor_id.as_str())
        {
            return Err(DispatchError::Validation(format!(
                "工单 {} 未指派给承包商 {}",
                completion.job_id, completion.contractor_id
            )));
        }

        match self.repos.completions.insert(&completion) {
            Ok(()) => {}
            Err(RepositoryError::UniqueConstraintViolation(_)) => {
                return Err(DispatchError::Validation(format!(
                    "工单 {} 完工结果已记录",
                    completion.job_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let contractors = &self.repos.contractors;
        contractors.record_completion(&completion.contractor_id, completion.completed, completion.on_time)?;
        contractors.release_capacity(&completion.contractor_id)?;

        self.repos.action_log.insert(
            &ActionLog::new(ActionType::JobCompletion, SYSTEM_ACTOR, Some(&completion.job_id)).with_payload(
                json!({
                    "contractor_id": completion.contractor_id,
                    "completed": completion.completed,
                    "on_time": completion.on_time,
                    "customer_rating": completion.customer_rating,
                }),
            ),
        )?;
        Ok(())
    }

    /// 进程重启后为未决报价重新登记超时任务
    pub fn recover_pending_offers(self: &Arc<Self>) -> DispatchResult<usize> {
        let pending = self.repos.attempts.find_all_pending()?;
        let now = Utc::now();
        for attempt in &pending {
            let delay = attempt
                .expires_at
                .map(|e| remaining_until(e, now))
                .unwrap_or(Duration::ZERO);
            self.schedule_expiry(&attempt.attempt_id, delay);
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "已恢复未决报价计时器");
        }
        Ok(pending.len())
    }

    /// 关闭: 取消全部计时器
    pub fn shutdown(&self) {
        self.timers.cancel_all();
    }

    // ==========================================
    // 评分运行
    // ==========================================

    /// 开始一次评分运行 (调用方持有工单锁，工单为 NEW)
    async fn start_run(self: &Arc<Self>, job: Job, excluded: HashSet<String>) -> DispatchResult<DispatchOutcome> {
        self.transition(&job.job_id, JobStatus::New, JobStatus::Scoring).await?;

        let config: AssignmentConfig = (*self.config.get_active_config().await?).clone();
        let mut excluded_ids: Vec<String> = excluded.iter().cloned().collect();
        excluded_ids.sort();
        let mut run = DispatchRun::start(&job.job_id, config, excluded_ids);

        info!(
            job_id = %job.job_id,
            run_id = %run.run_id,
            config_version = run.config_version(),
            "开始评分运行"
        );

        if !run.config.progressive_enabled {
            self.repos.runs.insert(&run)?;
            return self.exhaust(&job, &run, JobStatus::Scoring, "评分派单已关闭").await;
        }

        match self.candidates.generate(&job, &run.config, &excluded).await {
            Ok(set) => {
                run.search_radius_miles = Some(set.radius_miles);
                run.eligible_contractor_ids = set
                    .candidates
                    .iter()
                    .map(|c| c.contractor.contractor_id.clone())
                    .collect();
                self.repos.runs.insert(&run)?;

                let scores = self.scorer.rank(&job, &run, &set.candidates);
                self.repos.scores.insert_batch(&scores)?;
                debug!(run_id = %run.run_id, count = scores.len(), "评分完成");

                self.offer_next(&job, &run, JobStatus::Scoring).await
            }
            Err(DispatchError::NoCandidatesAvailable { radius_miles, .. }) => {
                self.repos.runs.insert(&run)?;
                let reason = format!("{} 英里内无可用候选", radius_miles);
                self.exhaust(&job, &run, JobStatus::Scoring, &reason).await
            }
            Err(e) => {
                self.repos.runs.insert(&run)?;
                error!(job_id = %job.job_id, error = %e, "候选生成失败");
                let detail = format!("候选生成失败: {}", e);
                self.park_job(&job.job_id, JobStatus::Scoring, JobStatus::Offering, &detail)
                    .await;
                Err(e)
            }
        }
    }

    /// 拒绝/超时后推进到下一候选
    async fn advance_after_rejection(self: &Arc<Self>, attempt: &AssignmentAttempt) -> DispatchResult<DispatchOutcome> {
        let job = self.load_job(&attempt.job_id)?;
        if job.status != JobStatus::Offering {
            return Err(self
                .park_job(&job.job_id, job.status, JobStatus::Offering, "报价落定后工单不在派单中")
                .await);
        }

        let run_id = attempt
            .run_id
            .as_deref()
            .ok_or_else(|| DispatchError::not_found("DispatchRun", format!("attempt {}", attempt.attempt_id)))?;
        let run = self
            .repos
            .runs
            .find_by_id(run_id)?
            .ok_or_else(|| DispatchError::not_found("DispatchRun", run_id))?;

        self.offer_next(&job, &run, JobStatus::Offering).await
    }

    /// 向下一个达标候选发报价; 投递失败视为拒绝并继续
    async fn offer_next(
        self: &Arc<Self>,
        job: &Job,
        run: &DispatchRun,
        mut status: JobStatus,
    ) -> DispatchResult<DispatchOutcome> {
        let config = &run.config;

        loop {
            let offered = self.repos.attempts.count_progressive_by_run(&run.run_id)?;
            if offered >= config.max_progressive_attempts as i64 {
                let reason = format!("已达最大报价次数 {}", config.max_progressive_attempts);
                return self.exhaust(job, run, status, &reason).await;
            }

            let score = match self
                .repos
                .scores
                .find_next_offerable(&run.run_id, config.min_score_threshold)?
            {
                Some(score) => score,
                None => {
                    let reason = format!("无综合分达到门槛 {} 的候选", config.min_score_threshold);
                    return self.exhaust(job, run, status, &reason).await;
                }
            };

            self.transition(&job.job_id, status, JobStatus::Offering).await?;
            status = JobStatus::Offering;

            let attempt = AssignmentAttempt::offer(
                &job.job_id,
                &run.run_id,
                self.repos.attempts.next_attempt_number(&job.job_id)?,
                &score.contractor_id,
                &score.score_id,
                score.composite_score,
                Utc::now(),
                config.offer_timeout_seconds as i64,
            );
            self.repos.attempts.insert(&attempt)?;
            self.repos
                .scores
                .advance_outcome(&score.score_id, ScoreOutcome::Pending, ScoreOutcome::Offered)?;

            let expires_at = attempt.expires_at.unwrap_or(attempt.offered_at);
            let notice = OfferNotice {
                attempt_id: attempt.attempt_id.clone(),
                job_id: job.job_id.clone(),
                contractor_id: score.contractor_id.clone(),
                service_type: job.service_type.clone(),
                priority: job.priority,
                attempt_number: attempt.attempt_number,
                composite_score: score.composite_score,
                expires_at,
            };

            match self.deliver_with_retry(&notice).await {
                Ok(()) => {
                    // 截止时间在投递前已确定，扣除重试耗时
                    self.schedule_expiry(&attempt.attempt_id, remaining_until(expires_at, Utc::now()));
                    info!(
                        job_id = %job.job_id,
                        attempt_id = %attempt.attempt_id,
                        contractor_id = %score.contractor_id,
                        attempt_number = attempt.attempt_number,
                        composite_score = score.composite_score,
                        "报价已发出"
                    );
                    return Ok(DispatchOutcome::Offered {
                        job_id: job.job_id.clone(),
                        attempt_id: attempt.attempt_id,
                        contractor_id: score.contractor_id,
                        attempt_number: attempt.attempt_number,
                        expires_at,
                    });
                }
                Err(e) => {
                    warn!(job_id = %job.job_id, error = %e, "报价投递失败, 视为拒绝");
                    self.resolve_attempt(&attempt, AttemptOutcome::Declined, Some(REASON_DELIVERY_FAILED))?;
                }
            }
        }
    }

    /// 渐进派单用尽: 兜底轮询或 UNASSIGNABLE
    async fn exhaust(
        &self,
        job: &Job,
        run: &DispatchRun,
        from: JobStatus,
        reason: &str,
    ) -> DispatchResult<DispatchOutcome> {
        self.repos.scores.mark_pending_not_offered(&run.run_id)?;
        let mut reason = reason.to_string();

        if run.config.fallback_enabled {
            if let Some(outcome) = self.try_fallback(job, run, from, &reason).await? {
                return Ok(outcome);
            }
            reason = format!("{}; 兜底轮询无可用承包商", reason);
        }

        let exhausted = DispatchError::AssignmentExhausted {
            job_id: job.job_id.clone(),
            reason: reason.clone(),
        };
        warn!(error = %exhausted, "工单无法指派");

        self.transition(&job.job_id, from, JobStatus::Unassignable).await?;
        self.repos.runs.finish(&run.run_id, RunOutcome::Unassignable)?;
        self.publish(OutcomeEvent::JobUnassignable {
            job_id: job.job_id.clone(),
            at: Utc::now(),
        });
        self.raise_alert(AlertKind::Unassignable, &job.job_id, &exhausted.to_string())
            .await;

        Ok(DispatchOutcome::Unassignable {
            job_id: job.job_id.clone(),
            reason,
        })
    }

    /// 兜底轮询直接指派
    ///
    /// 本次运行中拒绝/超时过的承包商不参与兜底
    async fn try_fallback(
        &self,
        job: &Job,
        run: &DispatchRun,
        from: JobStatus,
        reason: &str,
    ) -> DispatchResult<Option<DispatchOutcome>> {
        let mut excluded: HashSet<String> = run.excluded_contractor_ids.iter().cloned().collect();
        for attempt in self.repos.attempts.find_by_job(&job.job_id)? {
            if attempt.run_id.as_deref() == Some(run.run_id.as_str())
                && matches!(attempt.outcome, AttemptOutcome::Declined | AttemptOutcome::Timeout)
            {
                excluded.insert(attempt.contractor_id);
            }
        }

        let pool: Vec<String> = match self.candidates.eligible_within_max(job, &run.config, &excluded).await {
            Ok(candidates) => candidates
                .into_iter()
                .map(|c| c.contractor.contractor_id)
                .collect(),
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "兜底候选查询失败");
                Vec::new()
            }
        };

        let contractor_id = match self.fallback.select(&job.service_type, &pool)? {
            Some(id) => id,
            None => return Ok(None),
        };

        if !self.repos.jobs.mark_assigned(&job.job_id, from, &contractor_id, AssignmentMethod::Fallback)? {
            self.repos.contractors.rollback_reservation(&contractor_id)?;
            return Err(self
                .park_job(&job.job_id, from, JobStatus::Assigned, "兜底指派时工单状态已变化")
                .await);
        }

        let attempt = AssignmentAttempt::direct(
            &job.job_id,
            Some(&run.run_id),
            self.repos.attempts.next_attempt_number(&job.job_id)?,
            &contractor_id,
            AssignmentMethod::Fallback,
            reason,
        );
        self.repos.attempts.insert(&attempt)?;
        self.repos.runs.finish(&run.run_id, RunOutcome::AssignedFallback)?;
        self.publish_direct(&attempt);

        info!(job_id = %job.job_id, contractor_id = %contractor_id, reason, "兜底轮询指派完成");
        Ok(Some(DispatchOutcome::Assigned {
            job_id: job.job_id.clone(),
            contractor_id,
            method: AssignmentMethod::Fallback,
        }))
    }

    /// 人工指定承包商 (工单已重新打开为 NEW，目标容量已占用)
    async fn assign_manually(
        &self,
        job_id: &str,
        contractor_id: &str,
        actor: &str,
        reason: &str,
    ) -> DispatchResult<DispatchOutcome> {
        self.transition(job_id, JobStatus::New, JobStatus::Scoring).await?;
        if !self
            .repos
            .jobs
            .mark_assigned(job_id, JobStatus::Scoring, contractor_id, AssignmentMethod::Manual)?
        {
            self.repos.contractors.rollback_reservation(contractor_id)?;
            return Err(self
                .park_job(job_id, JobStatus::Scoring, JobStatus::Assigned, "人工指派时工单状态已变化")
                .await);
        }

        let attempt = AssignmentAttempt::direct(
            job_id,
            None,
            self.repos.attempts.next_attempt_number(job_id)?,
            contractor_id,
            AssignmentMethod::Manual,
            reason,
        );
        self.repos.attempts.insert(&attempt)?;
        self.publish_direct(&attempt);

        self.repos.action_log.insert(
            &ActionLog::new(ActionType::ManualAssign, actor, Some(job_id))
                .with_detail(reason)
                .with_payload(json!({ "contractor_id": contractor_id })),
        )?;

        info!(job_id, contractor_id, actor, "人工指派完成");
        Ok(DispatchOutcome::Assigned {
            job_id: job_id.to_string(),
            contractor_id: contractor_id.to_string(),
            method: AssignmentMethod::Manual,
        })
    }

    // ==========================================
    // 内部工具
    // ==========================================

    /// 落定尝试 (CAS) 并同步评分结果、承包商历史、结果事件
    ///
    /// # 返回
    /// 是否赢得落定
    fn resolve_attempt(
        &self,
        attempt: &AssignmentAttempt,
        outcome: AttemptOutcome,
        reason: Option<&str>,
    ) -> DispatchResult<bool> {
        let resolved_at = Utc::now();
        if !self
            .repos
            .attempts
            .resolve(&attempt.attempt_id, outcome, reason, resolved_at)?
        {
            debug!(attempt_id = %attempt.attempt_id, outcome = %outcome, "尝试已被其他路径落定");
            return Ok(false);
        }

        if let Some(score_id) = attempt.score_id.as_deref() {
            self.repos
                .scores
                .advance_outcome(score_id, ScoreOutcome::Offered, outcome.to_score_outcome())?;
        }
        self.repos
            .contractors
            .record_offer_outcome(&attempt.contractor_id, outcome)?;

        self.publish(OutcomeEvent::AttemptResolved {
            job_id: attempt.job_id.clone(),
            attempt_id: attempt.attempt_id.clone(),
            contractor_id: attempt.contractor_id.clone(),
            method: attempt.method,
            outcome,
            composite_score: attempt.composite_score,
            resolved_at,
        });
        Ok(true)
    }

    /// 状态机迁移 (校验 + CAS)，失败挂起工单
    async fn transition(&self, job_id: &str, from: JobStatus, to: JobStatus) -> DispatchResult<()> {
        if from.can_transition_to(to) && self.repos.jobs.transition_status(job_id, from, to)? {
            return Ok(());
        }
        Err(self.park_job(job_id, from, to, "状态迁移被拒绝").await)
    }

    /// 投递报价，有界指数退避重试
    async fn deliver_with_retry(&self, notice: &OfferNotice) -> DispatchResult<()> {
        let max_tries = self.retry.max_tries.max(1);
        let mut last_error = String::new();

        for try_no in 1..=max_tries {
            match self.notifier.deliver_offer(notice).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        attempt_id = %notice.attempt_id,
                        contractor_id = %notice.contractor_id,
                        try_no,
                        error = %e,
                        "报价投递失败"
                    );
                    last_error = e.to_string();
                    if try_no < max_tries {
                        tokio::time::sleep(self.retry.delay_for(try_no)).await;
                    }
                }
            }
        }

        Err(DispatchError::OfferDeliveryFailure {
            attempt_id: notice.attempt_id.clone(),
            contractor_id: notice.contractor_id.clone(),
            tries: max_tries,
            message: last_error,
        })
    }

    /// 登记报价超时任务
    ///
    /// 任务只持有弱引用，编排器释放后不再触发
    fn schedule_expiry(self: &Arc<Self>, attempt_id: &str, delay: Duration) {
        let weak = Arc::downgrade(self);
        let id = attempt_id.to_string();
        self.timers.schedule(attempt_id, delay, async move {
            if let Some(this) = weak.upgrade() {
                this.timers.complete(&id);
                if let Err(e) = this.on_offer_expired(&id).await {
                    error!(attempt_id = %id, error = %e, "报价超时处理失败");
                }
            }
        });
    }

    /// 挂起工单待人工处理
    async fn park_job(&self, job_id: &str, from: JobStatus, to: JobStatus, detail: &str) -> DispatchError {
        let actual = self
            .repos
            .jobs
            .find_job(job_id)
            .ok()
            .flatten()
            .map(|j| j.status)
            .unwrap_or(from);
        error!(job_id, expected = %from, actual = %actual, to = %to, detail, "非法状态迁移, 工单挂起");

        let log = ActionLog::new(ActionType::JobParked, SYSTEM_ACTOR, Some(job_id))
            .with_detail(detail)
            .with_payload(json!({
                "expected_status": from.as_str(),
                "actual_status": actual.as_str(),
                "target_status": to.as_str(),
            }));
        if let Err(e) = self.repos.action_log.insert(&log) {
            error!(job_id, error = %e, "挂起记录写入失败");
        }

        let message = format!("{}: {} -> {} (当前 {})", detail, from, to, actual);
        self.raise_alert(AlertKind::JobParked, job_id, &message).await;

        DispatchError::InvalidStateTransition {
            job_id: job_id.to_string(),
            from: actual,
            to,
        }
    }

    /// 发送运维告警并记入操作日志; 失败只记日志
    async fn raise_alert(&self, kind: AlertKind, job_id: &str, message: &str) {
        let alert = OperatorAlert {
            kind,
            job_id: job_id.to_string(),
            message: message.to_string(),
            raised_at: Utc::now(),
        };
        if let Err(e) = self.alerter.raise(&alert).await {
            error!(job_id, error = %e, "运维告警发送失败");
        }

        let log = ActionLog::new(ActionType::OperatorAlert, SYSTEM_ACTOR, Some(job_id))
            .with_detail(message)
            .with_payload(json!({ "kind": kind.as_str() }));
        if let Err(e) = self.repos.action_log.insert(&log) {
            error!(job_id, error = %e, "告警记录写入失败");
        }
    }

    fn publish(&self, event: OutcomeEvent) {
        if let Err(e) = self.publisher.publish(event) {
            warn!(error = %e, "派单结果事件发布失败");
        }
    }

    fn publish_direct(&self, attempt: &AssignmentAttempt) {
        self.publish(OutcomeEvent::AttemptResolved {
            job_id: attempt.job_id.clone(),
            attempt_id: attempt.attempt_id.clone(),
            contractor_id: attempt.contractor_id.clone(),
            method: attempt.method,
            outcome: attempt.outcome,
            composite_score: None,
            resolved_at: attempt.resolved_at.unwrap_or(attempt.offered_at),
        });
    }

    fn load_job(&self, job_id: &str) -> DispatchResult<Job> {
        self.repos
            .jobs
            .find_job(job_id)?
            .ok_or_else(|| DispatchError::not_found("Job", job_id))
    }

    fn load_attempt(&self, attempt_id: &str) -> DispatchResult<AssignmentAttempt> {
        self.repos
            .attempts
            .find_by_id(attempt_id)?
            .ok_or_else(|| DispatchError::not_found("AssignmentAttempt", attempt_id))
    }
}

fn already_assigned(job: &Job) -> DispatchError {
    DispatchError::AlreadyAssigned {
        job_id: job.job_id.clone(),
        contractor_id: job.assigned_contractor_id.clone().unwrap_or_default(),
    }
}

fn offer_not_active(attempt: &AssignmentAttempt) -> DispatchError {
    DispatchError::OfferNotActive {
        attempt_id: attempt.attempt_id.clone(),
        outcome: attempt.outcome,
    }
}

fn withdrawal_notice(job: &Job, attempt: &AssignmentAttempt) -> OfferNotice {
    OfferNotice {
        attempt_id: attempt.attempt_id.clone(),
        job_id: job.job_id.clone(),
        contractor_id: attempt.contractor_id.clone(),
        service_type: job.service_type.clone(),
        priority: job.priority,
        attempt_number: attempt.attempt_number,
        composite_score: attempt.composite_score.unwrap_or(0.0),
        expires_at: attempt.expires_at.unwrap_or(attempt.offered_at),
    }
}

/// 距截止时间的剩余时长; 已过期为 0
fn remaining_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now).to_std().unwrap_or(Duration::ZERO)
}
