// ==========================================
// 承包商派单引擎 - 完工回传数据仓储
// ==========================================
// 存储: job_completion 表
// 说明: 学习样本 = 已接受的评分记录 ⋈ 完工回传
// ==========================================

use crate::db::{format_timestamp, parse_timestamp};
use crate::domain::learning::JobCompletion;
use crate::domain::score::FactorScores;
use crate::domain::types::ScoreOutcome;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::score_repo::map_factor_scores;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

/// 学习样本: 中标报价的因子得分 + 履约结果
#[derive(Debug, Clone)]
pub struct LearningSample {
    pub factor_scores: FactorScores,
    pub composite_score: f64,
    pub completion: JobCompletion,
}

pub struct JobCompletionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl JobCompletionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入完工回传 (每个工单一次)
    pub fn insert(&self, completion: &JobCompletion) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO job_completion (job_id, contractor_id, completed, on_time, customer_rating, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                completion.job_id,
                completion.contractor_id,
                completion.completed,
                completion.on_time,
                completion.customer_rating,
                format_timestamp(&completion.recorded_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_job(&self, job_id: &str) -> RepositoryResult<Option<JobCompletion>> {
        let conn = self.get_conn()?;
        let completion = conn
            .query_row(
                r#"
                SELECT job_id, contractor_id, completed, on_time, customer_rating, recorded_at
                FROM job_completion WHERE job_id = ?1
                "#,
                params![job_id],
                |row| map_completion(row, 0),
            )
            .optional()?;
        Ok(completion)
    }

    /// 学习样本 (最近 limit 条)
    pub fn find_learning_samples(&self, limit: i64) -> RepositoryResult<Vec<LearningSample>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.proximity_score, s.availability_score, s.rating_score, s.specialization_score,
                   s.performance_score, s.workload_score, s.preference_score, s.experience_score,
                   s.composite_score,
                   c.job_id, c.contractor_id, c.completed, c.on_time, c.customer_rating, c.recorded_at
            FROM assignment_score s
            JOIN job_completion c
              ON c.job_id = s.job_id AND c.contractor_id = s.contractor_id
            WHERE s.outcome = ?1
            ORDER BY c.recorded_at DESC
            LIMIT ?2
            "#,
        )?;
        let samples = stmt
            .query_map(params![ScoreOutcome::Accepted.as_str(), limit], |row| {
                Ok(LearningSample {
                    factor_scores: map_factor_scores(row, 0)?,
                    composite_score: row.get(8)?,
                    completion: map_completion(row, 9)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(samples)
    }
}

fn map_completion(row: &Row<'_>, offset: usize) -> SqliteResult<JobCompletion> {
    Ok(JobCompletion {
        job_id: row.get(offset)?,
        contractor_id: row.get(offset + 1)?,
        completed: row.get(offset + 2)?,
        on_time: row.get(offset + 3)?,
        customer_rating: row.get(offset + 4)?,
        recorded_at: parse_timestamp(&row.get::<_, String>(offset + 5)?),
    })
}
