// ==========================================
// 承包商派单引擎 - 操作日志领域模型
// ==========================================
// 红线: 人工操作、配置变更、告警、挂起均必须记录
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,
    pub job_id: Option<String>,      // 配置类操作可为 None
    pub action_type: String,         // 存储为字符串
    pub action_ts: DateTime<Utc>,
    pub actor: String,
    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>,
}

impl ActionLog {
    pub fn new(action_type: ActionType, actor: &str, job_id: Option<&str>) -> Self {
        Self {
            action_id: Uuid::new_v4().to_string(),
            job_id: job_id.map(|j| j.to_string()),
            action_type: action_type.as_str().to_string(),
            action_ts: Utc::now(),
            actor: actor.to_string(),
            payload_json: None,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload_json = Some(payload);
        self
    }
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    ManualDispatch,     // 人工触发立即智能派单
    ManualAssign,       // 人工指定承包商
    Reassign,           // 改派
    CancelJob,          // 取消工单
    ConfigUpdate,       // 写入新配置版本
    ConfigActivate,     // 重新激活历史版本
    ProposalGenerated,  // 生成权重提案
    ProposalActivated,  // 激活权重提案
    ProposalRejected,   // 驳回权重提案
    OperatorAlert,      // 运维告警
    JobParked,          // 状态异常挂起待人工处理
    JobCompletion,      // 完工回传
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ManualDispatch => "MANUAL_DISPATCH",
            ActionType::ManualAssign => "MANUAL_ASSIGN",
            ActionType::Reassign => "REASSIGN",
            ActionType::CancelJob => "CANCEL_JOB",
            ActionType::ConfigUpdate => "CONFIG_UPDATE",
            ActionType::ConfigActivate => "CONFIG_ACTIVATE",
            ActionType::ProposalGenerated => "PROPOSAL_GENERATED",
            ActionType::ProposalActivated => "PROPOSAL_ACTIVATED",
            ActionType::ProposalRejected => "PROPOSAL_REJECTED",
            ActionType::OperatorAlert => "OPERATOR_ALERT",
            ActionType::JobParked => "JOB_PARKED",
            ActionType::JobCompletion => "JOB_COMPLETION",
        }
    }
}
