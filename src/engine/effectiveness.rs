// ==========================================
// 承包商派单引擎 - 派单效果统计
// ==========================================
// 增量: 后台任务消费结果事件，按事件日期重建 DAY/WEEK/MONTH 快照
// 全量: 按周期从尝试日志与评分运行重建
// 快照一律由日志派生，同一事件重复应用或与按需重算交错都不会重复计数
// 口径:
// - 渐进报价 接受 → total+1, successful+1, score_sum += 综合分
// - 渐进报价 拒绝/超时 → total+1, failed+1
// - 撤回不计
// - 兜底/人工指派、无法指派 各自单独计数
// ==========================================

use crate::domain::effectiveness::{period_end, period_start, EffectivenessSnapshot};
use crate::domain::types::{AssignmentMethod, AttemptOutcome, PeriodKind};
use crate::domain::RunOutcome;
use crate::engine::events::OutcomeEvent;
use crate::repository::{AttemptRepository, DispatchRunRepository, EffectivenessRepository, RepositoryResult};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct EffectivenessTracker {
    snapshots: Arc<EffectivenessRepository>,
    attempts: Arc<AttemptRepository>,
    runs: Arc<DispatchRunRepository>,
    rebuild: Mutex<()>, // 读日志 + 写快照 串行化，避免旧结果覆盖新结果
}

impl EffectivenessTracker {
    pub fn new(
        snapshots: Arc<EffectivenessRepository>,
        attempts: Arc<AttemptRepository>,
        runs: Arc<DispatchRunRepository>,
    ) -> Self {
        Self {
            snapshots,
            attempts,
            runs,
            rebuild: Mutex::new(()),
        }
    }

    /// 启动后台消费任务
    ///
    /// 通道关闭 (所有发布者释放) 后任务退出
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<OutcomeEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = self.apply(&event) {
                    error!(job_id = event.job_id(), error = %e, "效果快照增量更新失败");
                }
            }
            debug!("结果事件通道已关闭, 效果统计任务退出");
        })
    }

    /// 应用一个结果事件: 重建事件所在的三个周期
    ///
    /// 幂等: 事件已落在日志中，重复应用结果不变
    pub fn apply(&self, event: &OutcomeEvent) -> RepositoryResult<()> {
        if !affects_snapshot(event) {
            return Ok(());
        }
        let date = event.occurred_at().date_naive();
        for kind in PeriodKind::ALL {
            self.rebuild(kind, date)?;
        }
        debug!(job_id = event.job_id(), date = %date, "效果快照已按事件刷新");
        Ok(())
    }

    /// 从日志全量重算某周期快照并落库
    pub fn recompute(&self, kind: PeriodKind, date: NaiveDate) -> RepositoryResult<EffectivenessSnapshot> {
        let snapshot = self.rebuild(kind, date)?;
        info!(
            period = %kind,
            period_start = %snapshot.period_start,
            total = snapshot.total_assignments,
            success_rate = snapshot.success_rate,
            "效果快照已重算"
        );
        Ok(snapshot)
    }

    /// 查询快照; 不存在时重算
    pub fn get_snapshot(&self, kind: PeriodKind, date: NaiveDate) -> RepositoryResult<EffectivenessSnapshot> {
        match self.snapshots.find(kind, period_start(kind, date))? {
            Some(snapshot) => Ok(snapshot),
            None => self.recompute(kind, date),
        }
    }

    /// 查询区间内已落库的快照
    pub fn list_snapshots(
        &self,
        kind: PeriodKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<EffectivenessSnapshot>> {
        self.snapshots.find_range(kind, from, to)
    }

    fn rebuild(&self, kind: PeriodKind, date: NaiveDate) -> RepositoryResult<EffectivenessSnapshot> {
        let _guard = self.rebuild.lock().unwrap_or_else(|e| e.into_inner());

        let start = period_start(kind, date);
        let (from, to) = (day_start(start), day_start(period_end(kind, start)));

        let mut snapshot = EffectivenessSnapshot::empty(kind, start);
        for attempt in self.attempts.find_resolved_between(from, to)? {
            count_attempt(&mut snapshot, attempt.method, attempt.outcome, attempt.composite_score);
        }
        snapshot.unassignable_jobs = self
            .runs
            .count_finished_between(RunOutcome::Unassignable, from, to)?;
        snapshot.recalculate();

        self.snapshots.upsert(&snapshot)?;
        Ok(snapshot)
    }
}

/// 事件是否影响快照 (撤回等不计入的事件跳过重建)
fn affects_snapshot(event: &OutcomeEvent) -> bool {
    match event {
        OutcomeEvent::AttemptResolved { method, outcome, .. } => {
            let mut scratch = EffectivenessSnapshot::empty(PeriodKind::Day, event.occurred_at().date_naive());
            count_attempt(&mut scratch, *method, *outcome, None)
        }
        OutcomeEvent::JobUnassignable { .. } => true,
    }
}

fn count_attempt(
    snapshot: &mut EffectivenessSnapshot,
    method: AssignmentMethod,
    outcome: AttemptOutcome,
    composite_score: Option<f64>,
) -> bool {
    match (method, outcome) {
        (AssignmentMethod::Progressive, AttemptOutcome::Accepted) => {
            snapshot.total_assignments += 1;
            snapshot.successful_assignments += 1;
            snapshot.score_sum += composite_score.unwrap_or(0.0);
        }
        (AssignmentMethod::Progressive, AttemptOutcome::Declined | AttemptOutcome::Timeout) => {
            snapshot.total_assignments += 1;
            snapshot.failed_assignments += 1;
        }
        (AssignmentMethod::Fallback, AttemptOutcome::Accepted) => snapshot.fallback_assignments += 1,
        (AssignmentMethod::Manual, AttemptOutcome::Accepted) => snapshot.manual_assignments += 1,
        _ => return false,
    }
    true
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssignmentConfig;
    use crate::db::open_in_memory;
    use crate::domain::{AssignmentAttempt, DispatchRun};

    struct Fixture {
        tracker: EffectivenessTracker,
        attempts: Arc<AttemptRepository>,
        runs: Arc<DispatchRunRepository>,
    }

    fn fixture() -> Fixture {
        let conn = open_in_memory().unwrap();
        let attempts = Arc::new(AttemptRepository::new(conn.clone()));
        let runs = Arc::new(DispatchRunRepository::new(conn.clone()));
        Fixture {
            tracker: EffectivenessTracker::new(
                Arc::new(EffectivenessRepository::new(conn)),
                attempts.clone(),
                runs.clone(),
            ),
            attempts,
            runs,
        }
    }

    /// 写入一条已落定的尝试并返回对应事件
    fn log_attempt(
        fx: &Fixture,
        method: AssignmentMethod,
        outcome: AttemptOutcome,
        score: f64,
    ) -> OutcomeEvent {
        let now = Utc::now();
        let job_id = uuid::Uuid::new_v4().to_string();
        let mut attempt = AssignmentAttempt::offer(&job_id, "RUN-T", 1, "C1", "S-T", score, now, 120);
        attempt.method = method;
        attempt.outcome = outcome;
        attempt.resolved_at = Some(now);
        fx.attempts.insert(&attempt).unwrap();

        OutcomeEvent::AttemptResolved {
            job_id,
            attempt_id: attempt.attempt_id,
            contractor_id: "C1".to_string(),
            method,
            outcome,
            composite_score: Some(score),
            resolved_at: now,
        }
    }

    #[test]
    fn test_ten_attempts_seven_successful_is_seventy_percent() {
        let fx = fixture();
        for _ in 0..7 {
            let event = log_attempt(&fx, AssignmentMethod::Progressive, AttemptOutcome::Accepted, 80.0);
            fx.tracker.apply(&event).unwrap();
        }
        for outcome in [AttemptOutcome::Declined, AttemptOutcome::Declined, AttemptOutcome::Timeout] {
            let event = log_attempt(&fx, AssignmentMethod::Progressive, outcome, 70.0);
            fx.tracker.apply(&event).unwrap();
        }

        let today = Utc::now().date_naive();
        for kind in PeriodKind::ALL {
            let snapshot = fx.tracker.get_snapshot(kind, today).unwrap();
            assert_eq!(snapshot.total_assignments, 10, "{}", kind);
            assert_eq!(snapshot.successful_assignments, 7);
            assert_eq!(snapshot.failed_assignments, 3);
            assert_eq!(snapshot.success_rate, 70.0);
            assert_eq!(snapshot.average_score, 80.0);
        }
    }

    #[test]
    fn test_query_before_event_applied_counts_once() {
        let fx = fixture();
        let today = Utc::now().date_naive();
        let event = log_attempt(&fx, AssignmentMethod::Progressive, AttemptOutcome::Accepted, 90.0);

        // 事件尚在通道中时按需查询，已从日志计入
        let before = fx.tracker.get_snapshot(PeriodKind::Day, today).unwrap();
        assert_eq!(before.total_assignments, 1);

        fx.tracker.apply(&event).unwrap();
        fx.tracker.apply(&event).unwrap();
        let after = fx.tracker.get_snapshot(PeriodKind::Day, today).unwrap();
        assert_eq!(after.total_assignments, 1);
        assert_eq!(after.successful_assignments, 1);
        assert_eq!(after.success_rate, 100.0);
        assert_eq!(after.average_score, 90.0);
    }

    #[test]
    fn test_fallback_manual_and_unassignable_counted_separately() {
        let fx = fixture();
        let events = [
            log_attempt(&fx, AssignmentMethod::Fallback, AttemptOutcome::Accepted, 0.0),
            log_attempt(&fx, AssignmentMethod::Manual, AttemptOutcome::Accepted, 0.0),
            log_attempt(&fx, AssignmentMethod::Progressive, AttemptOutcome::Withdrawn, 90.0),
        ];

        let run = DispatchRun::start("J2", AssignmentConfig::default(), Vec::new());
        fx.runs.insert(&run).unwrap();
        fx.runs.finish(&run.run_id, RunOutcome::Unassignable).unwrap();
        let unassignable = OutcomeEvent::JobUnassignable {
            job_id: "J2".to_string(),
            at: Utc::now(),
        };

        for event in events.iter().chain(std::iter::once(&unassignable)) {
            fx.tracker.apply(event).unwrap();
        }
        // 重复应用不改变计数
        fx.tracker.apply(&unassignable).unwrap();

        let snapshot = fx
            .tracker
            .snapshots
            .find(PeriodKind::Day, Utc::now().date_naive())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.total_assignments, 0);
        assert_eq!(snapshot.fallback_assignments, 1);
        assert_eq!(snapshot.manual_assignments, 1);
        assert_eq!(snapshot.unassignable_jobs, 1);
        assert_eq!(snapshot.success_rate, 0.0);
    }

    #[test]
    fn test_withdrawn_event_does_not_create_snapshot() {
        let fx = fixture();
        let event = log_attempt(&fx, AssignmentMethod::Progressive, AttemptOutcome::Withdrawn, 75.0);
        fx.tracker.apply(&event).unwrap();
        assert!(fx
            .tracker
            .snapshots
            .find(PeriodKind::Day, Utc::now().date_naive())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_background_task_consumes_channel() {
        let fx = fixture();
        let event = log_attempt(&fx, AssignmentMethod::Progressive, AttemptOutcome::Accepted, 60.0);
        let tracker = Arc::new(fx.tracker);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tracker.clone().spawn(rx);

        tx.send(event).unwrap();
        drop(tx);
        handle.await.unwrap();

        let snapshot = tracker
            .snapshots
            .find(PeriodKind::Month, period_start(PeriodKind::Month, Utc::now().date_naive()))
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.successful_assignments, 1);
        assert_eq!(snapshot.average_score, 60.0);
    }
}
