// ==========================================
// 承包商派单引擎 - API层错误类型
// ==========================================
// 职责: 将 Repository / Engine 错误转换为调用方可理解的错误
// 约束: 所有错误信息必须包含显式原因
// ==========================================

use crate::engine::error::DispatchError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 调用方错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ==========================================
    // 派单流程错误
    // ==========================================
    #[error("工单已指派: job_id={job_id}, contractor_id={contractor_id}")]
    AlreadyAssigned { job_id: String, contractor_id: String },

    #[error("报价已失效: {0}")]
    OfferNotActive(String),

    #[error("工单不在可操作状态: {0}")]
    JobNotActive(String),

    #[error("承包商容量已满: {0}")]
    ContractorAtCapacity(String),

    #[error("无可用候选: {0}")]
    NoCandidatesAvailable(String),

    #[error("派单已用尽: {0}")]
    AssignmentExhausted(String),

    #[error("报价投递失败: {0}")]
    OfferDeliveryFailure(String),

    #[error("无效的状态转换: job_id={job_id}, from={from} to={to}")]
    InvalidStateTransition { job_id: String, from: String, to: String },

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => ApiError::DatabaseTransactionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::InvalidStateTransition { from, to } => ApiError::InvalidStateTransition {
                job_id: String::new(),
                from,
                to,
            },
            RepositoryError::ValidationError(msg) => ApiError::ValidationError(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 DispatchError 转换
// ==========================================
impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Validation(msg) => ApiError::ValidationError(msg),
            DispatchError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            DispatchError::NoCandidatesAvailable { job_id, radius_miles } => {
                ApiError::NoCandidatesAvailable(format!("job_id={}, 最大半径 {} 英里", job_id, radius_miles))
            }
            DispatchError::OfferDeliveryFailure {
                attempt_id,
                contractor_id,
                tries,
                message,
            } => ApiError::OfferDeliveryFailure(format!(
                "attempt_id={}, contractor_id={}, 已重试 {} 次: {}",
                attempt_id, contractor_id, tries, message
            )),
            DispatchError::AlreadyAssigned { job_id, contractor_id } => {
                ApiError::AlreadyAssigned { job_id, contractor_id }
            }
            DispatchError::AssignmentExhausted { job_id, reason } => {
                ApiError::AssignmentExhausted(format!("job_id={}, {}", job_id, reason))
            }
            DispatchError::InvalidStateTransition { job_id, from, to } => ApiError::InvalidStateTransition {
                job_id,
                from: from.to_string(),
                to: to.to_string(),
            },
            DispatchError::OfferNotActive { attempt_id, outcome } => {
                ApiError::OfferNotActive(format!("attempt_id={}, outcome={}", attempt_id, outcome))
            }
            DispatchError::JobNotActive { job_id, status } => {
                ApiError::JobNotActive(format!("job_id={}, status={}", job_id, status))
            }
            DispatchError::ContractorAtCapacity(contractor_id) => ApiError::ContractorAtCapacity(contractor_id),
            DispatchError::Location(msg) => ApiError::InternalError(format!("位置服务错误: {}", msg)),
            DispatchError::Repository(e) => ApiError::from(e),
            DispatchError::Other(e) => ApiError::Other(e),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AttemptOutcome, JobStatus};

    #[test]
    fn test_dispatch_errors_keep_reason() {
        let err: ApiError = DispatchError::AlreadyAssigned {
            job_id: "J1".to_string(),
            contractor_id: "C2".to_string(),
        }
        .into();
        assert!(matches!(err, ApiError::AlreadyAssigned { .. }));
        assert!(err.to_string().contains("C2"));

        let err: ApiError = DispatchError::OfferNotActive {
            attempt_id: "A1".to_string(),
            outcome: AttemptOutcome::Timeout,
        }
        .into();
        assert!(err.to_string().contains("TIMEOUT"));

        let err: ApiError = DispatchError::InvalidStateTransition {
            job_id: "J1".to_string(),
            from: JobStatus::Assigned,
            to: JobStatus::Offering,
        }
        .into();
        assert!(err.to_string().contains("ASSIGNED"));
    }

    #[test]
    fn test_repository_error_inside_dispatch_error() {
        let err: ApiError = DispatchError::Repository(RepositoryError::ValidationError("权重合计".to_string())).into();
        assert!(matches!(err, ApiError::ValidationError(_)));

        let err: ApiError = RepositoryError::not_found("Job", "J9").into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
