// ==========================================
// 承包商派单引擎 - 派单结果事件发布
// ==========================================
// 职责: 定义派单结果事件与发布 trait
// 说明: 编排器只发布事件，效果统计在后台异步消费
// ==========================================

use crate::domain::types::{AssignmentMethod, AttemptOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use tokio::sync::mpsc;

// ==========================================
// 派单结果事件
// ==========================================

/// 派单结果事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeEvent {
    /// 一次尝试落定 (接受/拒绝/超时/撤回，含兜底与人工直接指派)
    AttemptResolved {
        job_id: String,
        attempt_id: String,
        contractor_id: String,
        method: AssignmentMethod,
        outcome: AttemptOutcome,
        composite_score: Option<f64>,
        resolved_at: DateTime<Utc>,
    },
    /// 工单进入 UNASSIGNABLE
    JobUnassignable { job_id: String, at: DateTime<Utc> },
}

impl OutcomeEvent {
    pub fn job_id(&self) -> &str {
        match self {
            OutcomeEvent::AttemptResolved { job_id, .. } => job_id,
            OutcomeEvent::JobUnassignable { job_id, .. } => job_id,
        }
    }

    /// 事件发生时间
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OutcomeEvent::AttemptResolved { resolved_at, .. } => *resolved_at,
            OutcomeEvent::JobUnassignable { at, .. } => *at,
        }
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 派单结果发布者
///
/// 发布失败只记日志，不影响派单结果
pub trait OutcomePublisher: Send + Sync {
    fn publish(&self, event: OutcomeEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作发布者 (单元测试/不需要统计的场景)
#[derive(Debug, Clone, Default)]
pub struct NoOpOutcomePublisher;

impl OutcomePublisher for NoOpOutcomePublisher {
    fn publish(&self, event: OutcomeEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(job_id = event.job_id(), "NoOpOutcomePublisher: 跳过事件发布");
        Ok(())
    }
}

/// 通道发布者: 投递到后台消费任务
#[derive(Debug, Clone)]
pub struct ChannelOutcomePublisher {
    tx: mpsc::UnboundedSender<OutcomeEvent>,
}

impl ChannelOutcomePublisher {
    /// 创建发布者与接收端
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutcomeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutcomePublisher for ChannelOutcomePublisher {
    fn publish(&self, event: OutcomeEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.tx
            .send(event)
            .map_err(|e| format!("结果事件通道已关闭: job_id={}", e.0.job_id()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> OutcomeEvent {
        OutcomeEvent::AttemptResolved {
            job_id: "J1".to_string(),
            attempt_id: "A1".to_string(),
            contractor_id: "C1".to_string(),
            method: AssignmentMethod::Progressive,
            outcome: AttemptOutcome::Accepted,
            composite_score: Some(82.0),
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn test_noop_publisher() {
        assert!(NoOpOutcomePublisher.publish(resolved()).is_ok());
    }

    #[tokio::test]
    async fn test_channel_publisher_delivers_in_order() {
        let (publisher, mut rx) = ChannelOutcomePublisher::channel();
        publisher.publish(resolved()).unwrap();
        publisher
            .publish(OutcomeEvent::JobUnassignable {
                job_id: "J2".to_string(),
                at: Utc::now(),
            })
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().job_id(), "J1");
        assert_eq!(rx.recv().await.unwrap().job_id(), "J2");
    }

    #[test]
    fn test_channel_closed_is_error() {
        let (publisher, rx) = ChannelOutcomePublisher::channel();
        drop(rx);
        assert!(publisher.publish(resolved()).is_err());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(resolved()).unwrap();
        assert_eq!(json["kind"], "ATTEMPT_RESOLVED");
        assert_eq!(json["outcome"], "ACCEPTED");
    }
}
