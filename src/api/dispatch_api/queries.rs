use super::*;
use crate::domain::action_log::ActionLog;
use crate::domain::attempt::AssignmentAttempt;
use crate::domain::effectiveness::EffectivenessSnapshot;
use crate::domain::job::Job;
use crate::domain::score::AssignmentScore;
use crate::domain::types::PeriodKind;
use chrono::NaiveDate;

impl DispatchApi {
    // ==========================================
    // 派单查询
    // ==========================================

    pub fn get_job(&self, job_id: &str) -> ApiResult<Job> {
        require(job_id, "工单ID")?;
        self.orchestrator
            .repositories()
            .jobs
            .find_job(job_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Job(id={})不存在", job_id)))
    }

    /// 查询工单的全部评分记录 (按运行、名次)
    pub fn get_job_scores(&self, job_id: &str) -> ApiResult<Vec<AssignmentScore>> {
        require(job_id, "工单ID")?;
        Ok(self.orchestrator.repositories().scores.find_by_job(job_id)?)
    }

    /// 查询工单的全部派单尝试 (按序号)
    pub fn get_job_attempts(&self, job_id: &str) -> ApiResult<Vec<AssignmentAttempt>> {
        require(job_id, "工单ID")?;
        Ok(self.orchestrator.repositories().attempts.find_by_job(job_id)?)
    }

    /// 挂起待人工处理的工单 (尚未改派/取消)
    pub fn list_parked_jobs(&self) -> ApiResult<Vec<ActionLog>> {
        Ok(self.orchestrator.repositories().action_log.find_open_parked()?)
    }

    // ==========================================
    // 效果统计
    // ==========================================

    /// 查询周期效果快照 (date 所在周期)
    pub fn get_effectiveness(&self, period: PeriodKind, date: NaiveDate) -> ApiResult<EffectivenessSnapshot> {
        Ok(self.tracker.get_snapshot(period, date)?)
    }

    /// 按日志全量重算周期效果快照
    pub fn recompute_effectiveness(&self, period: PeriodKind, date: NaiveDate) -> ApiResult<EffectivenessSnapshot> {
        Ok(self.tracker.recompute(period, date)?)
    }

    /// 查询区间内已落库的快照
    pub fn list_effectiveness(
        &self,
        period: PeriodKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ApiResult<Vec<EffectivenessSnapshot>> {
        if from > to {
            return Err(ApiError::InvalidInput(format!("起始日期 {} 晚于结束日期 {}", from, to)));
        }
        Ok(self.tracker.list_snapshots(period, from, to)?)
    }
}
