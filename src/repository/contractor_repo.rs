// ==========================================
// 承包商派单引擎 - 承包商目录数据仓储
// ==========================================
// 存储: contractor 表
// 红线: 容量只能通过 try_reserve_capacity / release_capacity 修改,
//       单条 UPDATE 完成检查与递增，不存在读后写窗口
// ==========================================

use crate::db::{format_timestamp, parse_timestamp};
use crate::domain::contractor::{Contractor, ContractorPreferences, OfferHistory};
use crate::domain::job::GeoPoint;
use crate::domain::types::{AttemptOutcome, Availability};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT contractor_id, name, lat, lon, availability, rating, completed_jobs,
           specializations_json, current_workload, max_concurrent_jobs,
           offers_accepted, offers_declined, offers_timed_out,
           jobs_assigned, jobs_completed, jobs_completed_on_time,
           preferences_json, updated_at
    FROM contractor
"#;

// ==========================================
// ContractorRepository - 承包商仓储
// ==========================================
pub struct ContractorRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ContractorRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入或更新承包商主数据
    pub fn upsert(&self, contractor: &Contractor) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let specializations = serde_json::to_string(&contractor.specializations)?;
        let preferences = serde_json::to_string(&contractor.preferences)?;
        let h = &contractor.history;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO contractor (
                contractor_id, name, lat, lon, availability, rating, completed_jobs,
                specializations_json, current_workload, max_concurrent_jobs,
                offers_accepted, offers_declined, offers_timed_out,
                jobs_assigned, jobs_completed, jobs_completed_on_time,
                preferences_json, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
            params![
                contractor.contractor_id,
                contractor.name,
                contractor.location.lat,
                contractor.location.lon,
                contractor.availability.as_str(),
                contractor.rating,
                contractor.completed_jobs,
                specializations,
                contractor.current_workload,
                contractor.max_concurrent_jobs,
                h.offers_accepted,
                h.offers_declined,
                h.offers_timed_out,
                h.jobs_assigned,
                h.jobs_completed,
                h.jobs_completed_on_time,
                preferences,
                format_timestamp(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// 按 ID 查询承包商
    pub fn find_by_id(&self, contractor_id: &str) -> RepositoryResult<Option<Contractor>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE contractor_id = ?1", SELECT_COLUMNS);
        let contractor = conn
            .query_row(&sql, params![contractor_id], map_row)
            .optional()?;
        Ok(contractor)
    }

    /// 查询当前可接单的承包商 (AVAILABLE/BUSY 且有容量余量)
    pub fn find_dispatchable(&self) -> RepositoryResult<Vec<Contractor>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE availability IN (?1, ?2) AND current_workload < max_concurrent_jobs ORDER BY contractor_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let contractors = stmt
            .query_map(
                params![Availability::Available.as_str(), Availability::Busy.as_str()],
                map_row,
            )?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(contractors)
    }

    /// 查询全部承包商
    pub fn find_all(&self) -> RepositoryResult<Vec<Contractor>> {
        let conn = self.get_conn()?;
        let sql = format!("{} ORDER BY contractor_id", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let contractors = stmt
            .query_map([], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(contractors)
    }

    /// 更新可用状态
    pub fn set_availability(&self, contractor_id: &str, availability: Availability) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE contractor SET availability = ?1, updated_at = ?2 WHERE contractor_id = ?3",
            params![availability.as_str(), format_timestamp(&Utc::now()), contractor_id],
        )?;
        Ok(rows == 1)
    }

    // ==========================================
    // 容量 (原子检查并递增)
    // ==========================================

    /// 预占一个容量名额
    ///
    /// # 返回
    /// - Ok(true): 预占成功 (workload + 1, jobs_assigned + 1)
    /// - Ok(false): 已满 / 不可接单 / 不存在
    ///
    /// 指派未落定时须用 rollback_reservation 撤销，而不是 release_capacity
    pub fn try_reserve_capacity(&self, contractor_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE contractor
            SET current_workload = current_workload + 1,
                jobs_assigned = jobs_assigned + 1,
                updated_at = ?1
            WHERE contractor_id = ?2
              AND current_workload < max_concurrent_jobs
              AND availability IN (?3, ?4)
            "#,
            params![
                format_timestamp(&Utc::now()),
                contractor_id,
                Availability::Available.as_str(),
                Availability::Busy.as_str()
            ],
        )?;
        Ok(rows == 1)
    }

    /// 释放一个容量名额 (不会低于 0)
    pub fn release_capacity(&self, contractor_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE contractor
            SET current_workload = current_workload - 1, updated_at = ?1
            WHERE contractor_id = ?2 AND current_workload > 0
            "#,
            params![format_timestamp(&Utc::now()), contractor_id],
        )?;
        Ok(rows == 1)
    }

    /// 撤销未落定的预占 (指派未提交时使用)
    ///
    /// 同时回退 workload 与 jobs_assigned，不影响履约率
    pub fn rollback_reservation(&self, contractor_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE contractor
            SET current_workload = current_workload - 1,
                jobs_assigned = MAX(jobs_assigned - 1, 0),
                updated_at = ?1
            WHERE contractor_id = ?2 AND current_workload > 0
            "#,
            params![format_timestamp(&Utc::now()), contractor_id],
        )?;
        Ok(rows == 1)
    }

    // ==========================================
    // 历史计数
    // ==========================================

    /// 记录报价结果 (接受/拒绝/超时)，撤回不计
    pub fn record_offer_outcome(&self, contractor_id: &str, outcome: AttemptOutcome) -> RepositoryResult<()> {
        let column = match outcome {
            AttemptOutcome::Accepted => "offers_accepted",
            AttemptOutcome::Declined => "offers_declined",
            AttemptOutcome::Timeout => "offers_timed_out",
            AttemptOutcome::Pending | AttemptOutcome::Withdrawn => return Ok(()),
        };
        let conn = self.get_conn()?;
        let sql = format!(
            "UPDATE contractor SET {col} = {col} + 1, updated_at = ?1 WHERE contractor_id = ?2",
            col = column
        );
        conn.execute(&sql, params![format_timestamp(&Utc::now()), contractor_id])?;
        Ok(())
    }

    /// 记录完工回传
    pub fn record_completion(&self, contractor_id: &str, completed: bool, on_time: bool) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let completed_inc = i64::from(completed);
        let on_time_inc = i64::from(completed && on_time);
        conn.execute(
            r#"
            UPDATE contractor
            SET jobs_completed = jobs_completed + ?1,
                completed_jobs = completed_jobs + ?1,
                jobs_completed_on_time = jobs_completed_on_time + ?2,
                updated_at = ?3
            WHERE contractor_id = ?4
            "#,
            params![completed_inc, on_time_inc, format_timestamp(&Utc::now()), contractor_id],
        )?;
        Ok(())
    }
}

fn map_row(row: &Row<'_>) -> SqliteResult<Contractor> {
    let specializations_raw: String = row.get(7)?;
    let preferences_raw: String = row.get(16)?;
    let specializations: BTreeSet<String> =
        serde_json::from_str(&specializations_raw).unwrap_or_default();
    let preferences: ContractorPreferences =
        serde_json::from_str(&preferences_raw).unwrap_or_default();

    Ok(Contractor {
        contractor_id: row.get(0)?,
        name: row.get(1)?,
        location: GeoPoint::new(row.get(2)?, row.get(3)?),
        availability: Availability::from_str(&row.get::<_, String>(4)?),
        rating: row.get(5)?,
        completed_jobs: row.get(6)?,
        specializations,
        current_workload: row.get(8)?,
        max_concurrent_jobs: row.get(9)?,
        history: OfferHistory {
            offers_accepted: row.get(10)?,
            offers_declined: row.get(11)?,
            offers_timed_out: row.get(12)?,
            jobs_assigned: row.get(13)?,
            jobs_completed: row.get(14)?,
            jobs_completed_on_time: row.get(15)?,
        },
        preferences,
        updated_at: parse_timestamp(&row.get::<_, String>(17)?),
    })
}
