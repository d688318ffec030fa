// ==========================================
// 承包商派单引擎 - 派单 API
// ==========================================
// 职责: 派单触发、报价回调、取消、人工干预、派单查询
// 说明: 入参校验在本层完成，业务规则由编排器执行
// ==========================================

pub mod commands;
mod queries;

use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::engine::{AssignmentOrchestrator, EffectivenessTracker};

// ==========================================
// DispatchApi - 派单 API
// ==========================================

/// 派单API
///
/// 职责：
/// 1. 入站触发（派单、接受/拒绝报价、取消、完工回传）
/// 2. 人工干预（立即智能派单、改派）
/// 3. 查询（评分、尝试、效果快照、挂起工单）
pub struct DispatchApi {
    orchestrator: Arc<AssignmentOrchestrator>,
    tracker: Arc<EffectivenessTracker>,
}

impl DispatchApi {
    pub fn new(orchestrator: Arc<AssignmentOrchestrator>, tracker: Arc<EffectivenessTracker>) -> Self {
        Self { orchestrator, tracker }
    }
}

fn require(value: &str, what: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!("{}不能为空", what)));
    }
    Ok(())
}
