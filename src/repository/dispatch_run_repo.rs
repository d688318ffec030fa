// ==========================================
// 承包商派单引擎 - 评分运行数据仓储
// ==========================================
// 存储: dispatch_run 表 (含配置快照 JSON)
// ==========================================

use crate::config::AssignmentConfig;
use crate::db::{format_timestamp, parse_timestamp};
use crate::domain::dispatch_run::{DispatchRun, RunOutcome};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT run_id, job_id, config_version, config_snapshot_json, search_radius_miles,
           eligible_json, excluded_json, final_outcome, started_at, finished_at
    FROM dispatch_run
"#;

pub struct DispatchRunRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DispatchRunRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入评分运行
    pub fn insert(&self, run: &DispatchRun) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO dispatch_run (
                run_id, job_id, config_version, config_snapshot_json, search_radius_miles,
                eligible_json, excluded_json, final_outcome, started_at, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                run.run_id,
                run.job_id,
                run.config.version,
                serde_json::to_string(&run.config)?,
                run.search_radius_miles,
                serde_json::to_string(&run.eligible_contractor_ids)?,
                serde_json::to_string(&run.excluded_contractor_ids)?,
                run.final_outcome.map(|o| o.as_str()),
                format_timestamp(&run.started_at),
                run.finished_at.as_ref().map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    /// 按 ID 查询
    pub fn find_by_id(&self, run_id: &str) -> RepositoryResult<Option<DispatchRun>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE run_id = ?1", SELECT_COLUMNS);
        let run = conn.query_row(&sql, params![run_id], map_row).optional()?;
        Ok(run)
    }

    /// 工单最近一次评分运行
    pub fn find_latest_for_job(&self, job_id: &str) -> RepositoryResult<Option<DispatchRun>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE job_id = ?1 ORDER BY started_at DESC, rowid DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let run = conn.query_row(&sql, params![job_id], map_row).optional()?;
        Ok(run)
    }

    /// 工单全部评分运行 (时间正序)
    pub fn find_by_job(&self, job_id: &str) -> RepositoryResult<Vec<DispatchRun>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE job_id = ?1 ORDER BY started_at, rowid", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let runs = stmt
            .query_map(params![job_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(runs)
    }

    /// 记录运行终局 (只写一次)
    pub fn finish(&self, run_id: &str, outcome: RunOutcome) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE dispatch_run SET final_outcome = ?1, finished_at = ?2
            WHERE run_id = ?3 AND final_outcome IS NULL
            "#,
            params![outcome.as_str(), format_timestamp(&Utc::now()), run_id],
        )?;
        Ok(rows == 1)
    }

    /// 统计时间窗口内某终局的运行数
    pub fn count_finished_between(
        &self,
        outcome: RunOutcome,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            r#"
            SELECT COUNT(*) FROM dispatch_run
            WHERE final_outcome = ?1 AND finished_at >= ?2 AND finished_at < ?3
            "#,
            params![outcome.as_str(), format_timestamp(&start), format_timestamp(&end)],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn map_row(row: &Row<'_>) -> SqliteResult<DispatchRun> {
    let version: i64 = row.get(2)?;
    let snapshot: String = row.get(3)?;
    let mut config: AssignmentConfig = serde_json::from_str(&snapshot).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    config.version = version;

    let eligible: String = row.get(5)?;
    let excluded: String = row.get(6)?;
    let outcome: Option<String> = row.get(7)?;
    let finished_at: Option<String> = row.get(9)?;

    Ok(DispatchRun {
        run_id: row.get(0)?,
        job_id: row.get(1)?,
        config,
        search_radius_miles: row.get(4)?,
        eligible_contractor_ids: serde_json::from_str(&eligible).unwrap_or_default(),
        excluded_contractor_ids: serde_json::from_str(&excluded).unwrap_or_default(),
        final_outcome: outcome.as_deref().and_then(RunOutcome::from_str),
        started_at: parse_timestamp(&row.get::<_, String>(8)?),
        finished_at: finished_at.as_deref().map(parse_timestamp),
    })
}
