// ==========================================
// 承包商派单引擎 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 约束: 完整性错误 (非法状态迁移) 必须记录并挂起工单，绝不静默丢单
// ==========================================

use crate::domain::types::{AttemptOutcome, JobStatus};
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 派单引擎错误类型
#[derive(Error, Debug)]
pub enum DispatchError {
    // ===== 调用方错误 =====
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    // ===== 派单流程 =====
    #[error("无可用候选承包商: job_id={job_id}, 最大搜索半径={radius_miles} 英里")]
    NoCandidatesAvailable { job_id: String, radius_miles: f64 },

    #[error("报价投递失败: attempt_id={attempt_id}, contractor_id={contractor_id}, 已重试 {tries} 次: {message}")]
    OfferDeliveryFailure {
        attempt_id: String,
        contractor_id: String,
        tries: u32,
        message: String,
    },

    #[error("工单已指派: job_id={job_id}, contractor_id={contractor_id}")]
    AlreadyAssigned { job_id: String, contractor_id: String },

    #[error("派单已用尽: job_id={job_id}, {reason}")]
    AssignmentExhausted { job_id: String, reason: String },

    #[error("非法状态迁移: job_id={job_id}, {from} -> {to}")]
    InvalidStateTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("报价已失效: attempt_id={attempt_id}, outcome={outcome}")]
    OfferNotActive {
        attempt_id: String,
        outcome: AttemptOutcome,
    },

    #[error("工单不在可操作状态: job_id={job_id}, status={status}")]
    JobNotActive { job_id: String, status: JobStatus },

    #[error("承包商容量已满: contractor_id={0}")]
    ContractorAtCapacity(String),

    // ===== 协作方 / 基础设施 =====
    #[error("位置服务错误: {0}")]
    Location(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DispatchError {
    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        DispatchError::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }
}

/// Result 类型别名
pub type DispatchResult<T> = Result<T, DispatchError>;
