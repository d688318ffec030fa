// ==========================================
// 承包商派单引擎 - 派单效果快照数据仓储
// ==========================================
// 存储: effectiveness_snapshot 表 (PK: period + period_start)
// ==========================================

use crate::db::{format_timestamp, parse_timestamp};
use crate::domain::effectiveness::EffectivenessSnapshot;
use crate::domain::types::PeriodKind;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT period, period_start, total_assignments, successful_assignments, failed_assignments,
           score_sum, fallback_assignments, manual_assignments, unassignable_jobs,
           success_rate, average_score, last_updated
    FROM effectiveness_snapshot
"#;

pub struct EffectivenessRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EffectivenessRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find(
        &self,
        period: PeriodKind,
        period_start: NaiveDate,
    ) -> RepositoryResult<Option<EffectivenessSnapshot>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE period = ?1 AND period_start = ?2", SELECT_COLUMNS);
        let snapshot = conn
            .query_row(
                &sql,
                params![period.as_str(), period_start.format("%Y-%m-%d").to_string()],
                map_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// 查询周期区间内的快照 (按起始日)
    pub fn find_range(
        &self,
        period: PeriodKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<EffectivenessSnapshot>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE period = ?1 AND period_start BETWEEN ?2 AND ?3 ORDER BY period_start",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let snapshots = stmt
            .query_map(
                params![
                    period.as_str(),
                    from.format("%Y-%m-%d").to_string(),
                    to.format("%Y-%m-%d").to_string()
                ],
                map_row,
            )?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(snapshots)
    }

    /// 插入或覆盖快照
    pub fn upsert(&self, snapshot: &EffectivenessSnapshot) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO effectiveness_snapshot (
                period, period_start, total_assignments, successful_assignments, failed_assignments,
                score_sum, fallback_assignments, manual_assignments, unassignable_jobs,
                success_rate, average_score, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                snapshot.period.as_str(),
                snapshot.period_start.format("%Y-%m-%d").to_string(),
                snapshot.total_assignments,
                snapshot.successful_assignments,
                snapshot.failed_assignments,
                snapshot.score_sum,
                snapshot.fallback_assignments,
                snapshot.manual_assignments,
                snapshot.unassignable_jobs,
                snapshot.success_rate,
                snapshot.average_score,
                format_timestamp(&snapshot.last_updated),
            ],
        )?;
        Ok(())
    }
}

fn map_row(row: &Row<'_>) -> SqliteResult<EffectivenessSnapshot> {
    let period_raw: String = row.get(0)?;
    let period = PeriodKind::from_str(&period_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("未知统计周期: {}", period_raw).into(),
        )
    })?;
    let start_raw: String = row.get(1)?;
    let period_start = NaiveDate::parse_from_str(&start_raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(EffectivenessSnapshot {
        period,
        period_start,
        total_assignments: row.get(2)?,
        successful_assignments: row.get(3)?,
        failed_assignments: row.get(4)?,
        score_sum: row.get(5)?,
        fallback_assignments: row.get(6)?,
        manual_assignments: row.get(7)?,
        unassignable_jobs: row.get(8)?,
        success_rate: row.get(9)?,
        average_score: row.get(10)?,
        last_updated: parse_timestamp(&row.get::<_, String>(11)?),
    })
}
