// ==========================================
// 承包商派单引擎 - 派单工作池
// ==========================================
// 多工单并发派单，Semaphore 限制并发度
// 同一工单的串行化由编排器工单锁保证
// ==========================================

use crate::engine::error::{DispatchError, DispatchResult};
use crate::engine::orchestrator::{AssignmentOrchestrator, DispatchOutcome};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 单个工单的派单结果
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    pub result: Result<DispatchOutcome, String>,
}

pub struct DispatchWorkerPool {
    tx: mpsc::Sender<String>,
    dispatcher: JoinHandle<()>,
}

impl DispatchWorkerPool {
    /// 启动工作池
    ///
    /// # 参数
    /// - concurrency: 同时处理的工单数上限
    /// - queue_capacity: 待处理队列容量 (满时 submit 等待)
    ///
    /// # 返回
    /// (工作池, 结果接收端)
    pub fn start(
        orchestrator: Arc<AssignmentOrchestrator>,
        concurrency: usize,
        queue_capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<JobReport>) {
        let concurrency = concurrency.max(1);
        let (tx, mut rx) = mpsc::channel::<String>(queue_capacity.max(1));
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        let dispatcher = tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(concurrency));

            while let Some(job_id) = rx.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let orchestrator = orchestrator.clone();
                let report_tx = report_tx.clone();

                tokio::spawn(async move {
                    let result = orchestrator.assign_job(&job_id).await;
                    match &result {
                        Ok(outcome) => debug!(job_id = %job_id, outcome = ?outcome, "工单派单完成"),
                        Err(e) => warn!(job_id = %job_id, error = %e, "工单派单失败"),
                    }
                    let _ = report_tx.send(JobReport {
                        job_id,
                        result: result.map_err(|e| e.to_string()),
                    });
                    drop(permit);
                });
            }

            // 等待在途任务全部完成
            let _ = semaphore.acquire_many(concurrency as u32).await;
            debug!("派单工作池已排空");
        });

        (Self { tx, dispatcher }, report_rx)
    }

    /// 提交工单
    pub async fn submit(&self, job_id: impl Into<String>) -> DispatchResult<()> {
        self.tx
            .send(job_id.into())
            .await
            .map_err(|e| DispatchError::Other(anyhow::anyhow!("派单工作池已关闭: job_id={}", e.0)))
    }

    /// 停止接收并等待在途任务完成
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.dispatcher.await {
            warn!(error = %e, "派单工作池调度任务异常退出");
        }
    }
}
