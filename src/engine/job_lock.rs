// ==========================================
// 承包商派单引擎 - 工单级互斥锁
// ==========================================
// 同一工单的编排单写者: 派单/接受/拒绝/超时/取消 都在该锁内执行
// 不同工单之间互不阻塞
// ==========================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// 工单锁表
#[derive(Default)]
pub struct JobLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// 持有期间独占该工单
pub struct JobGuard {
    _guard: OwnedMutexGuard<()>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取工单锁 (异步等待)
    pub async fn lock(&self, job_id: &str) -> JobGuard {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // 清理无人持有的条目
            locks.retain(|id, m| id == job_id || Arc::strong_count(m) > 1);
            locks
                .entry(job_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        JobGuard {
            _guard: entry.lock_owned().await,
        }
    }

    /// 当前登记的锁条目数
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_job_is_serialized() {
        let locks = Arc::new(JobLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (locks, active, max_seen) = (locks.clone(), active.clone(), max_seen.clone());
            handles.push(tokio::spawn(async move {
                let _g = locks.lock("J1").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_jobs_do_not_block() {
        let locks = JobLocks::new();
        let _a = locks.lock("J1").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("J2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = JobLocks::new();
        drop(locks.lock("J1").await);
        drop(locks.lock("J2").await);
        let _g = locks.lock("J3").await;
        assert_eq!(locks.len(), 1);
    }
}
