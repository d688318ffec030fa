// ==========================================
// 承包商派单引擎 - 权重提案数据仓储
// ==========================================
// 存储: weight_proposal 表
// 红线: 提案状态只能从 PROPOSED 单向落定为 ACTIVATED / REJECTED
// ==========================================

use crate::db::{format_timestamp, parse_timestamp};
use crate::domain::learning::WeightProposal;
use crate::domain::types::ProposalStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT proposal_id, base_config_version, current_weights_json, proposed_weights_json,
           correlations_json, sample_size, status, created_at, decided_at, decided_by,
           applied_config_version
    FROM weight_proposal
"#;

pub struct WeightProposalRepository {
    conn: Arc<Mutex<Connection>>,
}

impl WeightProposalRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, proposal: &WeightProposal) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO weight_proposal (
                proposal_id, base_config_version, current_weights_json, proposed_weights_json,
                correlations_json, sample_size, status, created_at, decided_at, decided_by,
                applied_config_version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                proposal.proposal_id,
                proposal.base_config_version,
                serde_json::to_string(&proposal.current_weights)?,
                serde_json::to_string(&proposal.proposed_weights)?,
                serde_json::to_string(&proposal.correlations)?,
                proposal.sample_size,
                proposal.status.as_str(),
                format_timestamp(&proposal.created_at),
                proposal.decided_at.as_ref().map(format_timestamp),
                proposal.decided_by,
                proposal.applied_config_version,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, proposal_id: &str) -> RepositoryResult<Option<WeightProposal>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE proposal_id = ?1", SELECT_COLUMNS);
        let proposal = conn.query_row(&sql, params![proposal_id], map_row).optional()?;
        Ok(proposal)
    }

    /// 列出提案 (新提案在前)，可按状态过滤
    pub fn list(&self, status: Option<ProposalStatus>) -> RepositoryResult<Vec<WeightProposal>> {
        let conn = self.get_conn()?;
        let proposals = match status {
            Some(s) => {
                let sql = format!("{} WHERE status = ?1 ORDER BY created_at DESC", SELECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![s.as_str()], map_row)?
                    .collect::<SqliteResult<Vec<_>>>()?;
                rows
            }
            None => {
                let sql = format!("{} ORDER BY created_at DESC", SELECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], map_row)?
                    .collect::<SqliteResult<Vec<_>>>()?;
                rows
            }
        };
        Ok(proposals)
    }

    /// 落定提案 (CAS: 仅 PROPOSED 可落定)
    pub fn decide(
        &self,
        proposal_id: &str,
        status: ProposalStatus,
        decided_by: &str,
        decided_at: DateTime<Utc>,
        applied_config_version: Option<i64>,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE weight_proposal
            SET status = ?1, decided_by = ?2, decided_at = ?3, applied_config_version = ?4
            WHERE proposal_id = ?5 AND status = ?6
            "#,
            params![
                status.as_str(),
                decided_by,
                format_timestamp(&decided_at),
                applied_config_version,
                proposal_id,
                ProposalStatus::Proposed.as_str()
            ],
        )?;
        Ok(rows == 1)
    }
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> SqliteResult<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn map_row(row: &Row<'_>) -> SqliteResult<WeightProposal> {
    let decided_at: Option<String> = row.get(8)?;
    Ok(WeightProposal {
        proposal_id: row.get(0)?,
        base_config_version: row.get(1)?,
        current_weights: json_column(row, 2)?,
        proposed_weights: json_column(row, 3)?,
        correlations: json_column(row, 4)?,
        sample_size: row.get(5)?,
        status: ProposalStatus::from_str(&row.get::<_, String>(6)?),
        created_at: parse_timestamp(&row.get::<_, String>(7)?),
        decided_at: decided_at.as_deref().map(parse_timestamp),
        decided_by: row.get(9)?,
        applied_config_version: row.get(10)?,
    })
}
