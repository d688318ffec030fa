// ==========================================
// 承包商派单引擎 - 兜底轮询
// ==========================================
// 跳过评分与协商，从轮转队列直接指派
// 游标按服务类型持久化: 上次指派者之后的下一位开始，环绕
// 指派即占用容量 (原子检查并递增)
// ==========================================

use crate::engine::repositories::ContractorDirectory;
use crate::repository::{FallbackCursorRepository, RepositoryResult};
use std::sync::Arc;
use tracing::{debug, info};

pub struct RoundRobinFallback {
    contractors: Arc<dyn ContractorDirectory>,
    cursors: Arc<FallbackCursorRepository>,
}

impl RoundRobinFallback {
    pub fn new(contractors: Arc<dyn ContractorDirectory>, cursors: Arc<FallbackCursorRepository>) -> Self {
        Self { contractors, cursors }
    }

    /// 选出并占用下一位承包商
    ///
    /// # 参数
    /// - service_type: 游标维度
    /// - candidate_ids: 准入承包商 (顺序无关)
    ///
    /// # 返回
    /// - Some(contractor_id): 已占用容量
    /// - None: 无人可占用
    pub fn select(&self, service_type: &str, candidate_ids: &[String]) -> RepositoryResult<Option<String>> {
        let mut queue: Vec<&String> = candidate_ids.iter().collect();
        queue.sort();
        queue.dedup();
        if queue.is_empty() {
            return Ok(None);
        }

        let last = self.cursors.get(service_type)?;
        let start = match last.as_deref() {
            Some(last) => queue.partition_point(|id| id.as_str() <= last),
            None => 0,
        };

        for offset in 0..queue.len() {
            let contractor_id = queue[(start + offset) % queue.len()];
            if self.contractors.try_reserve_capacity(contractor_id)? {
                self.cursors.set(service_type, contractor_id)?;
                info!(service_type, contractor_id = %contractor_id, "兜底轮询选中承包商");
                return Ok(Some(contractor_id.clone()));
            }
            debug!(contractor_id = %contractor_id, "兜底轮询: 容量已满, 跳过");
        }

        Ok(None)
    }
}
