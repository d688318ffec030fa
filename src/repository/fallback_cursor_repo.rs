// ==========================================
// 承包商派单引擎 - 兜底轮询游标数据仓储
// ==========================================
// 存储: fallback_cursor 表 (按服务类型记录上次兜底指派的承包商)
// ==========================================

use crate::db::format_timestamp;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct FallbackCursorRepository {
    conn: Arc<Mutex<Connection>>,
}

impl FallbackCursorRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 上次兜底指派的承包商
    pub fn get(&self, service_type: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let last = conn
            .query_row(
                "SELECT last_contractor_id FROM fallback_cursor WHERE service_type = ?1",
                params![service_type],
                |row| row.get(0),
            )
            .optional()?;
        Ok(last)
    }

    /// 推进游标
    pub fn set(&self, service_type: &str, contractor_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO fallback_cursor (service_type, last_contractor_id, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(service_type) DO UPDATE SET last_contractor_id = ?2, updated_at = ?3
            "#,
            params![service_type, contractor_id, format_timestamp(&Utc::now())],
        )?;
        Ok(())
    }
}
