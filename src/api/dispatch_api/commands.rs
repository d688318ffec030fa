use super::*;
use crate::domain::learning::JobCompletion;
use crate::engine::DispatchOutcome;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 完工回传请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompletionRequest {
    pub job_id: String,
    pub contractor_id: String,
    pub completed: bool,
    pub on_time: bool,
    pub customer_rating: Option<f64>,
}

impl DispatchApi {
    // ==========================================
    // 入站触发
    // ==========================================

    /// 触发派单
    pub async fn assign_job(&self, job_id: &str) -> ApiResult<DispatchOutcome> {
        require(job_id, "工单ID")?;
        Ok(self.orchestrator.assign_job(job_id).await?)
    }

    /// 接受报价
    ///
    /// # 返回
    /// - Ok(Assigned): 工单已指派给该承包商
    /// - Err(AlreadyAssigned): 重复接受，指派结果不变
    /// - Err(OfferNotActive): 报价已超时/拒绝/撤回
    pub async fn accept_offer(&self, attempt_id: &str) -> ApiResult<DispatchOutcome> {
        require(attempt_id, "尝试ID")?;
        Ok(self.orchestrator.accept_offer(attempt_id).await?)
    }

    /// 拒绝报价
    pub async fn decline_offer(&self, attempt_id: &str, reason: Option<&str>) -> ApiResult<DispatchOutcome> {
        require(attempt_id, "尝试ID")?;
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        Ok(self.orchestrator.decline_offer(attempt_id, reason).await?)
    }

    /// 取消工单
    pub async fn cancel_job(&self, job_id: &str, actor: &str, reason: Option<&str>) -> ApiResult<()> {
        require(job_id, "工单ID")?;
        require(actor, "操作人")?;
        Ok(self.orchestrator.cancel_job(job_id, actor, reason).await?)
    }

    /// 完工回传
    pub async fn record_job_completion(&self, request: JobCompletionRequest) -> ApiResult<()> {
        require(&request.job_id, "工单ID")?;
        require(&request.contractor_id, "承包商ID")?;

        let completion = JobCompletion {
            job_id: request.job_id,
            contractor_id: request.contractor_id,
            completed: request.completed,
            on_time: request.on_time,
            customer_rating: request.customer_rating,
            recorded_at: Utc::now(),
        };
        Ok(self.orchestrator.record_job_completion(completion).await?)
    }

    // ==========================================
    // 人工干预
    // ==========================================

    /// 立即智能派单
    pub async fn ai_assign_now(&self, job_id: &str, actor: &str) -> ApiResult<DispatchOutcome> {
        require(job_id, "工单ID")?;
        require(actor, "操作人")?;
        Ok(self.orchestrator.ai_assign_now(job_id, actor).await?)
    }

    /// 改派 (必须填写原因)
    ///
    /// # 参数
    /// - target_contractor_id: 指定承包商; 为空时排除原承包商重新智能派单
    pub async fn reassign(
        &self,
        job_id: &str,
        actor: &str,
        reason: &str,
        target_contractor_id: Option<&str>,
    ) -> ApiResult<DispatchOutcome> {
        require(job_id, "工单ID")?;
        require(actor, "操作人")?;
        require(reason, "改派原因")?;
        let target = target_contractor_id.map(str::trim).filter(|t| !t.is_empty());
        Ok(self.orchestrator.reassign(job_id, actor, reason, target).await?)
    }
}
