use super::core::ActionLogRepository;
use crate::db::parse_timestamp;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::repository::error::RepositoryResult;
use rusqlite::{params, OptionalExtension, Result as SqliteResult, Row};

const SELECT_COLUMNS: &str =
    "SELECT action_id, job_id, action_type, action_ts, actor, payload_json, detail FROM action_log";

impl ActionLogRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 按 action_id 查询单个日志
    pub fn find_by_id(&self, action_id: &str) -> RepositoryResult<Option<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE action_id = ?1", SELECT_COLUMNS);
        let log = conn
            .query_row(&sql, params![action_id], map_row)
            .optional()?;
        Ok(log)
    }

    /// 查询指定工单的全部操作日志 (时间正序)
    pub fn find_by_job(&self, job_id: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE job_id = ?1 ORDER BY action_ts ASC", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![job_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(logs)
    }

    /// 按操作类型查询最近日志
    pub fn find_by_type(&self, action_type: ActionType, limit: i64) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE action_type = ?1 ORDER BY action_ts DESC LIMIT ?2",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![action_type.as_str(), limit], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(logs)
    }

    /// 查询仍待人工处理的挂起记录
    ///
    /// 挂起之后若同一工单已有人工改派/立即派单/指定/取消操作，视为已处理。
    pub fn find_open_parked(&self) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT p.action_id, p.job_id, p.action_type, p.action_ts, p.actor, p.payload_json, p.detail
            FROM action_log p
            WHERE p.action_type = ?1
              AND NOT EXISTS (
                SELECT 1 FROM action_log r
                WHERE r.job_id = p.job_id
                  AND r.action_type IN (?2, ?3, ?4, ?5)
                  AND r.action_ts > p.action_ts
              )
            ORDER BY p.action_ts DESC
            "#,
        )?;
        let logs = stmt
            .query_map(
                params![
                    ActionType::JobParked.as_str(),
                    ActionType::Reassign.as_str(),
                    ActionType::ManualDispatch.as_str(),
                    ActionType::ManualAssign.as_str(),
                    ActionType::CancelJob.as_str(),
                ],
                map_row,
            )?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(logs)
    }

    /// 统计某类操作条数
    pub fn count_by_type(&self, action_type: ActionType) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM action_log WHERE action_type = ?1",
            params![action_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn map_row(row: &Row<'_>) -> SqliteResult<ActionLog> {
    let payload: Option<String> = row.get(5)?;
    Ok(ActionLog {
        action_id: row.get(0)?,
        job_id: row.get(1)?,
        action_type: row.get(2)?,
        action_ts: parse_timestamp(&row.get::<_, String>(3)?),
        actor: row.get(4)?,
        payload_json: payload.and_then(|s| serde_json::from_str(&s).ok()),
        detail: row.get(6)?,
    })
}
