// ==========================================
// 承包商派单引擎 - 报价超时计时器
// ==========================================
// 每个未决报价一个可取消的截止任务
// 接受/拒绝/取消时立即 abort; 迟到的触发在工单锁内做 CAS，失败即空操作
// ==========================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

#[derive(Default)]
pub struct OfferTimers {
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl OfferTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记超时任务: delay 后执行 on_expire
    ///
    /// 同一报价重复登记时旧任务被取消
    pub fn schedule<F>(&self, attempt_id: &str, delay: Duration, on_expire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let handle = tokio::spawn(async move {
            sleep_until(deadline).await;
            on_expire.await;
        });

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = handles.insert(attempt_id.to_string(), handle) {
            previous.abort();
        }
    }

    /// 取消超时任务
    ///
    /// # 返回
    /// 是否存在并取消了任务
    pub fn cancel(&self, attempt_id: &str) -> bool {
        let handle = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(attempt_id);
        match handle {
            Some(h) => {
                h.abort();
                true
            }
            None => false,
        }
    }

    /// 超时任务自身触发后注销 (不能 abort 自己)
    pub fn complete(&self, attempt_id: &str) {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(attempt_id);
    }

    pub fn is_scheduled(&self, attempt_id: &str) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(attempt_id)
    }

    pub fn pending_count(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 取消全部任务 (关闭时)
    pub fn cancel_all(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for (_, h) in handles.drain() {
            h.abort();
        }
    }
}
