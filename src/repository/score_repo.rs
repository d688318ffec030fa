// ==========================================
// 承包商派单引擎 - 评分记录数据仓储
// ==========================================
// 存储: assignment_score 表
// 红线: 评分记录只追加；唯一可变字段 outcome 只能单向推进 (CAS)
// ==========================================

use crate::db::{format_timestamp, parse_timestamp};
use crate::domain::score::{AssignmentScore, FactorScores};
use crate::domain::types::ScoreOutcome;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT score_id, run_id, job_id, contractor_id, rank, distance_miles,
           proximity_score, availability_score, rating_score, specialization_score,
           performance_score, workload_score, preference_score, experience_score,
           composite_score, recommendation, outcome, config_version, computed_at
    FROM assignment_score
"#;

pub struct ScoreRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ScoreRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批量写入一次评分运行的全部评分 (单事务)
    pub fn insert_batch(&self, scores: &[AssignmentScore]) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        for s in scores {
            let f = &s.factor_scores;
            tx.execute(
                r#"
                INSERT INTO assignment_score (
                    score_id, run_id, job_id, contractor_id, rank, distance_miles,
                    proximity_score, availability_score, rating_score, specialization_score,
                    performance_score, workload_score, preference_score, experience_score,
                    composite_score, recommendation, outcome, config_version, computed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                "#,
                params![
                    s.score_id,
                    s.run_id,
                    s.job_id,
                    s.contractor_id,
                    s.rank,
                    s.distance_miles,
                    f.proximity,
                    f.availability,
                    f.rating,
                    f.specialization,
                    f.performance,
                    f.workload,
                    f.preference,
                    f.experience,
                    s.composite_score,
                    s.recommendation,
                    s.outcome.as_str(),
                    s.config_version,
                    format_timestamp(&s.computed_at),
                ],
            )?;
        }

        tx.commit()?;
        Ok(scores.len())
    }

    pub fn find_by_id(&self, score_id: &str) -> RepositoryResult<Option<AssignmentScore>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE score_id = ?1", SELECT_COLUMNS);
        let score = conn.query_row(&sql, params![score_id], map_row).optional()?;
        Ok(score)
    }

    /// 查询工单全部评分 (按运行时间、名次)
    pub fn find_by_job(&self, job_id: &str) -> RepositoryResult<Vec<AssignmentScore>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE job_id = ?1 ORDER BY computed_at, run_id, rank",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let scores = stmt
            .query_map(params![job_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(scores)
    }

    /// 查询一次运行的评分 (按名次)
    pub fn find_by_run(&self, run_id: &str) -> RepositoryResult<Vec<AssignmentScore>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE run_id = ?1 ORDER BY rank", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let scores = stmt
            .query_map(params![run_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(scores)
    }

    /// 下一个可报价候选: 本次运行中名次最高、仍待定、达到门槛
    pub fn find_next_offerable(
        &self,
        run_id: &str,
        min_score: f64,
    ) -> RepositoryResult<Option<AssignmentScore>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE run_id = ?1 AND outcome = ?2 AND composite_score >= ?3 ORDER BY rank LIMIT 1",
            SELECT_COLUMNS
        );
        let score = conn
            .query_row(
                &sql,
                params![run_id, ScoreOutcome::Pending.as_str(), min_score],
                map_row,
            )
            .optional()?;
        Ok(score)
    }

    /// 推进评分结果 (CAS)
    ///
    /// # 返回
    /// - Ok(true): 当前结果为 from，已推进为 to
    /// - Ok(false): 结果已被推进过
    pub fn advance_outcome(
        &self,
        score_id: &str,
        from: ScoreOutcome,
        to: ScoreOutcome,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE assignment_score SET outcome = ?1 WHERE score_id = ?2 AND outcome = ?3",
            params![to.as_str(), score_id, from.as_str()],
        )?;
        Ok(rows == 1)
    }

    /// 将运行中剩余待定评分标记为未报价
    pub fn mark_pending_not_offered(&self, run_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE assignment_score SET outcome = ?1 WHERE run_id = ?2 AND outcome = ?3",
            params![
                ScoreOutcome::NotOffered.as_str(),
                run_id,
                ScoreOutcome::Pending.as_str()
            ],
        )?;
        Ok(rows)
    }
}

pub(crate) fn map_factor_scores(row: &Row<'_>, offset: usize) -> SqliteResult<FactorScores> {
    Ok(FactorScores {
        proximity: row.get(offset)?,
        availability: row.get(offset + 1)?,
        rating: row.get(offset + 2)?,
        specialization: row.get(offset + 3)?,
        performance: row.get(offset + 4)?,
        workload: row.get(offset + 5)?,
        preference: row.get(offset + 6)?,
        experience: row.get(offset + 7)?,
    })
}

fn map_row(row: &Row<'_>) -> SqliteResult<AssignmentScore> {
    Ok(AssignmentScore {
        score_id: row.get(0)?,
        run_id: row.get(1)?,
        job_id: row.get(2)?,
        contractor_id: row.get(3)?,
        rank: row.get(4)?,
        distance_miles: row.get(5)?,
        factor_scores: map_factor_scores(row, 6)?,
        composite_score: row.get(14)?,
        recommendation: row.get(15)?,
        outcome: ScoreOutcome::from_str(&row.get::<_, String>(16)?),
        config_version: row.get(17)?,
        computed_at: parse_timestamp(&row.get::<_, String>(18)?),
    })
}
