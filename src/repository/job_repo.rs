// ==========================================
// 承包商派单引擎 - 工单数据仓储
// ==========================================
// 存储: job 表
// 红线: Repository 不含业务逻辑
// 说明: 状态迁移一律带 from 条件 (compare-and-set)，
//       迁移合法性由引擎按状态机判定
// ==========================================

use crate::db::{format_timestamp, parse_timestamp};
use crate::domain::job::{GeoPoint, Job};
use crate::domain::types::{AssignmentMethod, JobPriority, JobStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT job_id, customer_id, service_type, lat, lon, priority, status,
           assigned_contractor_id, assignment_method, created_at, updated_at
    FROM job
"#;

// ==========================================
// JobRepository - 工单仓储
// ==========================================
pub struct JobRepository {
    conn: Arc<Mutex<Connection>>,
}

impl JobRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入工单
    pub fn insert(&self, job: &Job) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO job (
                job_id, customer_id, service_type, lat, lon, priority, status,
                assigned_contractor_id, assignment_method, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                job.job_id,
                job.customer_id,
                job.service_type,
                job.location.lat,
                job.location.lon,
                job.priority.to_string(),
                job.status.as_str(),
                job.assigned_contractor_id,
                job.assignment_method.map(|m| m.as_str()),
                format_timestamp(&job.created_at),
                format_timestamp(&job.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 按 ID 查询工单
    pub fn find_by_id(&self, job_id: &str) -> RepositoryResult<Option<Job>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE job_id = ?1", SELECT_COLUMNS);
        let job = conn.query_row(&sql, params![job_id], map_row).optional()?;
        Ok(job)
    }

    /// 按状态查询工单
    pub fn find_by_status(&self, status: JobStatus) -> RepositoryResult<Vec<Job>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE status = ?1 ORDER BY created_at", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![status.as_str()], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(jobs)
    }

    /// 状态迁移 (CAS)
    ///
    /// # 返回
    /// - Ok(true): 迁移成功
    /// - Ok(false): 当前状态已不是 from
    pub fn transition_status(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE job SET status = ?1, updated_at = ?2 WHERE job_id = ?3 AND status = ?4",
            params![
                to.as_str(),
                format_timestamp(&Utc::now()),
                job_id,
                from.as_str()
            ],
        )?;
        Ok(rows == 1)
    }

    /// 标记已指派 (CAS)
    pub fn mark_assigned(
        &self,
        job_id: &str,
        from: JobStatus,
        contractor_id: &str,
        method: AssignmentMethod,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE job
            SET status = ?1, assigned_contractor_id = ?2, assignment_method = ?3, updated_at = ?4
            WHERE job_id = ?5 AND status = ?6
            "#,
            params![
                JobStatus::Assigned.as_str(),
                contractor_id,
                method.as_str(),
                format_timestamp(&Utc::now()),
                job_id,
                from.as_str()
            ],
        )?;
        Ok(rows == 1)
    }

    /// 重新打开工单 (CAS)，清空指派信息
    pub fn reopen(&self, job_id: &str, from: JobStatus) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE job
            SET status = ?1, assigned_contractor_id = NULL, assignment_method = NULL, updated_at = ?2
            WHERE job_id = ?3 AND status = ?4
            "#,
            params![
                JobStatus::New.as_str(),
                format_timestamp(&Utc::now()),
                job_id,
                from.as_str()
            ],
        )?;
        Ok(rows == 1)
    }

    /// 统计承包商为同一客户服务过的已指派工单数 (不含当前工单)
    pub fn count_prior_customer_jobs(
        &self,
        customer_id: &str,
        contractor_id: &str,
        exclude_job_id: &str,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            r#"
            SELECT COUNT(*) FROM job
            WHERE customer_id = ?1 AND assigned_contractor_id = ?2
              AND status = ?3 AND job_id <> ?4
            "#,
            params![customer_id, contractor_id, JobStatus::Assigned.as_str(), exclude_job_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn map_row(row: &Row<'_>) -> SqliteResult<Job> {
    let status_raw: String = row.get(6)?;
    let status = JobStatus::from_str(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("未知工单状态: {}", status_raw).into(),
        )
    })?;
    let method: Option<String> = row.get(8)?;

    Ok(Job {
        job_id: row.get(0)?,
        customer_id: row.get(1)?,
        service_type: row.get(2)?,
        location: GeoPoint::new(row.get(3)?, row.get(4)?),
        priority: JobPriority::from_str(&row.get::<_, String>(5)?),
        status,
        assigned_contractor_id: row.get(7)?,
        assignment_method: method.map(|m| AssignmentMethod::from_str(&m)),
        created_at: parse_timestamp(&row.get::<_, String>(9)?),
        updated_at: parse_timestamp(&row.get::<_, String>(10)?),
    })
}
