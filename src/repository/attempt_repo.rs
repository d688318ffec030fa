// ==========================================
// 承包商派单引擎 - 派单尝试数据仓储
// ==========================================
// 存储: assignment_attempt 表
// 红线:
// - 同一工单至多一个 PENDING 尝试 (部分唯一索引兜底)
// - 接受/拒绝/超时/撤回均通过 resolve 的 CAS 落定，输家无副作用
// ==========================================

use crate::db::{format_timestamp, parse_timestamp};
use crate::domain::attempt::AssignmentAttempt;
use crate::domain::types::{AssignmentMethod, AttemptOutcome};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT attempt_id, job_id, run_id, attempt_number, contractor_id, score_id,
           composite_score, method, offered_at, expires_at, outcome, outcome_reason, resolved_at
    FROM assignment_attempt
"#;

pub struct AttemptRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AttemptRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入尝试记录
    pub fn insert(&self, attempt: &AssignmentAttempt) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO assignment_attempt (
                attempt_id, job_id, run_id, attempt_number, contractor_id, score_id,
                composite_score, method, offered_at, expires_at, outcome, outcome_reason, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                attempt.attempt_id,
                attempt.job_id,
                attempt.run_id,
                attempt.attempt_number,
                attempt.contractor_id,
                attempt.score_id,
                attempt.composite_score,
                attempt.method.as_str(),
                format_timestamp(&attempt.offered_at),
                attempt.expires_at.as_ref().map(format_timestamp),
                attempt.outcome.as_str(),
                attempt.outcome_reason,
                attempt.resolved_at.as_ref().map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, attempt_id: &str) -> RepositoryResult<Option<AssignmentAttempt>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE attempt_id = ?1", SELECT_COLUMNS);
        let attempt = conn.query_row(&sql, params![attempt_id], map_row).optional()?;
        Ok(attempt)
    }

    /// 工单全部尝试 (按尝试序号)
    pub fn find_by_job(&self, job_id: &str) -> RepositoryResult<Vec<AssignmentAttempt>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE job_id = ?1 ORDER BY attempt_number", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let attempts = stmt
            .query_map(params![job_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(attempts)
    }

    /// 工单当前未决尝试
    pub fn find_pending_by_job(&self, job_id: &str) -> RepositoryResult<Option<AssignmentAttempt>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE job_id = ?1 AND outcome = ?2", SELECT_COLUMNS);
        let attempt = conn
            .query_row(&sql, params![job_id, AttemptOutcome::Pending.as_str()], map_row)
            .optional()?;
        Ok(attempt)
    }

    /// 全部未决尝试 (启动时恢复超时定时器)
    pub fn find_all_pending(&self) -> RepositoryResult<Vec<AssignmentAttempt>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE outcome = ?1 ORDER BY offered_at", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let attempts = stmt
            .query_map(params![AttemptOutcome::Pending.as_str()], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(attempts)
    }

    /// 一次评分运行已发出的渐进报价数
    pub fn count_progressive_by_run(&self, run_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM assignment_attempt WHERE run_id = ?1 AND method = ?2",
            params![run_id, AssignmentMethod::Progressive.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 工单下一个尝试序号 (跨运行递增)
    pub fn next_attempt_number(&self, job_id: &str) -> RepositoryResult<i32> {
        let conn = self.get_conn()?;
        let next = conn.query_row(
            "SELECT COALESCE(MAX(attempt_number), 0) + 1 FROM assignment_attempt WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    /// 落定未决尝试 (CAS: 仅 PENDING 可落定)
    ///
    /// # 返回
    /// - Ok(true): 本次调用赢得落定
    /// - Ok(false): 已被其他路径落定，调用方应视为空操作
    pub fn resolve(
        &self,
        attempt_id: &str,
        outcome: AttemptOutcome,
        reason: Option<&str>,
        resolved_at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE assignment_attempt
            SET outcome = ?1, outcome_reason = ?2, resolved_at = ?3
            WHERE attempt_id = ?4 AND outcome = ?5
            "#,
            params![
                outcome.as_str(),
                reason,
                format_timestamp(&resolved_at),
                attempt_id,
                AttemptOutcome::Pending.as_str()
            ],
        )?;
        Ok(rows == 1)
    }

    /// 时间窗口内落定的尝试 (效果重算)
    pub fn find_resolved_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<Vec<AssignmentAttempt>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE outcome <> ?1 AND resolved_at >= ?2 AND resolved_at < ?3 ORDER BY resolved_at",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let attempts = stmt
            .query_map(
                params![
                    AttemptOutcome::Pending.as_str(),
                    format_timestamp(&start),
                    format_timestamp(&end)
                ],
                map_row,
            )?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(attempts)
    }
}

fn map_row(row: &Row<'_>) -> SqliteResult<AssignmentAttempt> {
    let expires_at: Option<String> = row.get(9)?;
    let resolved_at: Option<String> = row.get(12)?;
    Ok(AssignmentAttempt {
        attempt_id: row.get(0)?,
        job_id: row.get(1)?,
        run_id: row.get(2)?,
        attempt_number: row.get(3)?,
        contractor_id: row.get(4)?,
        score_id: row.get(5)?,
        composite_score: row.get(6)?,
        method: AssignmentMethod::from_str(&row.get::<_, String>(7)?),
        offered_at: parse_timestamp(&row.get::<_, String>(8)?),
        expires_at: expires_at.as_deref().map(parse_timestamp),
        outcome: AttemptOutcome::from_str(&row.get::<_, String>(10)?),
        outcome_reason: row.get(11)?,
        resolved_at: resolved_at.as_deref().map(parse_timestamp),
    })
}
