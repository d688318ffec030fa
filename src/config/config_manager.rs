// ==========================================
// 承包商派单引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、校验、版本化写入、热加载
// 存储: assignment_config 表 (version + config_json + is_active)
// ==========================================
// 约束:
// - 写入前校验，非法配置原样拒绝，激活配置不变
// - 每次写入产生新版本，旧版本只读保留
// - 内存缓存随写入/激活同步刷新，下一次评分运行即生效
// ==========================================

use crate::config::assignment_config::AssignmentConfig;
use crate::config::config_reader::AssignmentConfigReader;
use crate::db::{format_timestamp, parse_timestamp};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};

/// 首次启动写入默认配置时使用的操作人
const SYSTEM_ACTOR: &str = "system";

// ==========================================
// ConfigVersionRecord - 配置版本记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigVersionRecord {
    pub version: i64,
    pub config: AssignmentConfig,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub note: Option<String>,
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
    active: RwLock<Arc<AssignmentConfig>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    ///
    /// 若库中尚无任何配置版本，写入默认配置作为版本 1 并激活。
    pub fn new(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        let active = {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            match Self::load_active(&guard)? {
                Some(config) => config,
                None => {
                    let mut config = AssignmentConfig::default();
                    config.version = 1;
                    Self::insert_version(&guard, &config, SYSTEM_ACTOR, Some("默认配置"))?;
                    tracing::info!(version = 1, "已写入默认派单配置");
                    config
                }
            }
        };

        Ok(Self {
            conn,
            active: RwLock::new(Arc::new(active)),
        })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 当前激活配置 (内存缓存)
    pub fn get_active(&self) -> RepositoryResult<Arc<AssignmentConfig>> {
        let guard = self
            .active
            .read()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(Arc::clone(&guard))
    }

    fn set_cache(&self, config: AssignmentConfig) -> RepositoryResult<()> {
        let mut guard = self
            .active
            .write()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        *guard = Arc::new(config);
        Ok(())
    }

    /// 写入新配置并激活
    ///
    /// # 返回
    /// - Ok(AssignmentConfig): 带新版本号的已激活配置
    /// - Err(ValidationError): 配置非法，激活配置保持不变
    pub fn put_config(
        &self,
        config: &AssignmentConfig,
        actor: &str,
        note: Option<&str>,
    ) -> RepositoryResult<AssignmentConfig> {
        let violations = config.validate();
        if !violations.is_empty() {
            tracing::warn!(actor, violations = ?violations, "拒绝非法派单配置");
            return Err(RepositoryError::ValidationError(violations.join("; ")));
        }

        let mut stored = config.clone();
        {
            let conn = self.get_conn()?;
            let tx = conn.unchecked_transaction()?;
            let next: i64 = tx.query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM assignment_config",
                [],
                |row| row.get(0),
            )?;
            stored.version = next;
            tx.execute("UPDATE assignment_config SET is_active = 0 WHERE is_active = 1", [])?;
            Self::insert_version(&tx, &stored, actor, note)?;
            tx.commit()?;
        }

        self.set_cache(stored.clone())?;
        tracing::info!(version = stored.version, actor, "派单配置已更新");
        Ok(stored)
    }

    /// 重新激活历史版本
    pub fn activate_version(&self, version: i64) -> RepositoryResult<AssignmentConfig> {
        let config = {
            let conn = self.get_conn()?;
            let config = Self::load_version(&conn, version)?.ok_or_else(|| RepositoryError::NotFound {
                entity: "AssignmentConfig".to_string(),
                id: version.to_string(),
            })?;

            // 历史版本若按当前规则已不合法，拒绝激活
            let violations = config.validate();
            if !violations.is_empty() {
                return Err(RepositoryError::ValidationError(violations.join("; ")));
            }

            let tx = conn.unchecked_transaction()?;
            tx.execute("UPDATE assignment_config SET is_active = 0 WHERE is_active = 1", [])?;
            tx.execute(
                "UPDATE assignment_config SET is_active = 1 WHERE version = ?1",
                params![version],
            )?;
            tx.commit()?;
            config
        };

        self.set_cache(config.clone())?;
        tracing::info!(version, "派单配置版本已重新激活");
        Ok(config)
    }

    /// 从数据库重新加载激活配置
    pub fn reload(&self) -> RepositoryResult<Arc<AssignmentConfig>> {
        let loaded = {
            let conn = self.get_conn()?;
            Self::load_active(&conn)?
        };
        if let Some(config) = loaded {
            self.set_cache(config)?;
        }
        self.get_active()
    }

    /// 按版本号读取配置
    pub fn get_version(&self, version: i64) -> RepositoryResult<Option<AssignmentConfig>> {
        let conn = self.get_conn()?;
        Self::load_version(&conn, version)
    }

    /// 列出全部配置版本 (新版本在前)
    pub fn list_versions(&self) -> RepositoryResult<Vec<ConfigVersionRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT version, config_json, is_active, created_at, created_by, note
            FROM assignment_config
            ORDER BY version DESC
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(version, json, is_active, created_at, created_by, note)| {
                Ok(ConfigVersionRecord {
                    version,
                    config: decode_config(version, &json)?,
                    is_active: is_active != 0,
                    created_at: parse_timestamp(&created_at),
                    created_by,
                    note,
                })
            })
            .collect()
    }

    /// 当前激活配置的 JSON 快照
    ///
    /// # 用途
    /// - 每次评分运行记录配置快照，事后可复现评分
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let active = self.get_active()?;
        serde_json::to_string(active.as_ref()).map_err(|e| RepositoryError::InternalError(e.to_string()))
    }

    // ===== 内部 SQL =====

    fn insert_version(
        conn: &Connection,
        config: &AssignmentConfig,
        actor: &str,
        note: Option<&str>,
    ) -> RepositoryResult<()> {
        let json =
            serde_json::to_string(config).map_err(|e| RepositoryError::InternalError(e.to_string()))?;
        conn.execute(
            r#"
            INSERT INTO assignment_config (version, config_json, is_active, created_at, created_by, note)
            VALUES (?1, ?2, 1, ?3, ?4, ?5)
            "#,
            params![config.version, json, format_timestamp(&Utc::now()), actor, note],
        )?;
        Ok(())
    }

    fn load_active(conn: &Connection) -> RepositoryResult<Option<AssignmentConfig>> {
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, config_json FROM assignment_config WHERE is_active = 1 ORDER BY version DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(version, json)| decode_config(version, &json)).transpose()
    }

    fn load_version(conn: &Connection, version: i64) -> RepositoryResult<Option<AssignmentConfig>> {
        let json: Option<String> = conn
            .query_row(
                "SELECT config_json FROM assignment_config WHERE version = ?1",
                params![version],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| decode_config(version, &j)).transpose()
    }
}

fn decode_config(version: i64, json: &str) -> RepositoryResult<AssignmentConfig> {
    let mut config: AssignmentConfig = serde_json::from_str(json).map_err(|e| {
        RepositoryError::FieldValueError {
            field: "config_json".to_string(),
            message: format!("version={}: {}", version, e),
        }
    })?;
    config.version = version;
    Ok(config)
}

// ==========================================
// AssignmentConfigReader Trait 实现
// ==========================================
#[async_trait]
impl AssignmentConfigReader for ConfigManager {
    async fn get_active_config(&self) -> RepositoryResult<Arc<AssignmentConfig>> {
        self.get_active()
    }

    async fn get_config_version(&self, version: i64) -> RepositoryResult<Option<AssignmentConfig>> {
        self.get_version(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn manager() -> ConfigManager {
        ConfigManager::new(open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn test_seeds_default_version() {
        let mgr = manager();
        let active = mgr.get_active().unwrap();
        assert_eq!(active.version, 1);
        assert_eq!(active.min_score_threshold, 60.0);
        assert_eq!(mgr.list_versions().unwrap().len(), 1);
    }

    #[test]
    fn test_put_config_creates_new_version() {
        let mgr = manager();
        let mut config = AssignmentConfig::default();
        config.min_score_threshold = 70.0;

        let stored = mgr.put_config(&config, "ops", Some("提高门槛")).unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(mgr.get_active().unwrap().min_score_threshold, 70.0);

        let versions = mgr.list_versions().unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_active);
        assert!(!versions[1].is_active);
        assert_eq!(versions[0].created_by, "ops");
    }

    #[test]
    fn test_invalid_config_rejected_active_unchanged() {
        let mgr = manager();
        let mut config = AssignmentConfig::default();
        config.weights.proximity = 50.0;

        let err = mgr.put_config(&config, "ops", None).unwrap_err();
        assert!(matches!(err, RepositoryError::ValidationError(_)));
        assert_eq!(mgr.get_active().unwrap().version, 1);
        assert_eq!(mgr.list_versions().unwrap().len(), 1);
    }

    #[test]
    fn test_activate_previous_version() {
        let mgr = manager();
        let mut config = AssignmentConfig::default();
        config.offer_timeout_seconds = 30;
        mgr.put_config(&config, "ops", None).unwrap();

        let restored = mgr.activate_version(1).unwrap();
        assert_eq!(restored.offer_timeout_seconds, 120);
        assert_eq!(mgr.get_active().unwrap().version, 1);

        assert!(matches!(
            mgr.activate_version(99),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_reload_picks_up_existing_active() {
        let conn = open_in_memory().unwrap();
        let first = ConfigManager::new(conn.clone()).unwrap();
        let mut config = AssignmentConfig::default();
        config.fallback_enabled = false;
        first.put_config(&config, "ops", None).unwrap();

        let second = ConfigManager::new(conn).unwrap();
        assert_eq!(second.get_active().unwrap().version, 2);
        assert!(!second.reload().unwrap().fallback_enabled);
    }
}
