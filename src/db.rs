// ==========================================
// 承包商派单引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 幂等建表 (CREATE TABLE IF NOT EXISTS)
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、建表并包装为共享连接
pub fn open_shared_connection(db_path: &str) -> rusqlite::Result<Arc<Mutex<Connection>>> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 内存库 (测试 / 演示)
pub fn open_in_memory() -> rusqlite::Result<Arc<Mutex<Connection>>> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化数据库 schema (幂等)
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 时间戳统一存储格式 (RFC 3339, 毫秒精度, UTC)
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// 解析时间戳; 格式错误时回退到 UNIX 纪元
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- 工单 (外部系统拥有, 派单引擎读写状态)
CREATE TABLE IF NOT EXISTS job (
    job_id TEXT PRIMARY KEY,
    customer_id TEXT,
    service_type TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    priority TEXT NOT NULL,
    status TEXT NOT NULL,
    assigned_contractor_id TEXT,
    assignment_method TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_customer
  ON job(customer_id, assigned_contractor_id);

-- 承包商目录 (容量通过原子检查并递增修改)
CREATE TABLE IF NOT EXISTS contractor (
    contractor_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    availability TEXT NOT NULL,
    rating REAL,
    completed_jobs INTEGER NOT NULL DEFAULT 0,
    specializations_json TEXT NOT NULL DEFAULT '[]',
    current_workload INTEGER NOT NULL DEFAULT 0 CHECK (current_workload >= 0),
    max_concurrent_jobs INTEGER NOT NULL DEFAULT 1,
    offers_accepted INTEGER NOT NULL DEFAULT 0,
    offers_declined INTEGER NOT NULL DEFAULT 0,
    offers_timed_out INTEGER NOT NULL DEFAULT 0,
    jobs_assigned INTEGER NOT NULL DEFAULT 0,
    jobs_completed INTEGER NOT NULL DEFAULT 0,
    jobs_completed_on_time INTEGER NOT NULL DEFAULT 0,
    preferences_json TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL
);

-- 派单配置 (版本化)
CREATE TABLE IF NOT EXISTS assignment_config (
    version INTEGER PRIMARY KEY,
    config_json TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL,
    note TEXT
);

-- 评分运行 (配置快照)
CREATE TABLE IF NOT EXISTS dispatch_run (
    run_id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    config_version INTEGER NOT NULL,
    config_snapshot_json TEXT NOT NULL,
    search_radius_miles REAL,
    eligible_json TEXT NOT NULL DEFAULT '[]',
    excluded_json TEXT NOT NULL DEFAULT '[]',
    final_outcome TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_dispatch_run_job
  ON dispatch_run(job_id, started_at);

CREATE INDEX IF NOT EXISTS idx_dispatch_run_finished
  ON dispatch_run(final_outcome, finished_at);

-- 评分记录 (只追加)
CREATE TABLE IF NOT EXISTS assignment_score (
    score_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES dispatch_run(run_id),
    job_id TEXT NOT NULL,
    contractor_id TEXT NOT NULL,
    rank INTEGER NOT NULL,
    distance_miles REAL NOT NULL,
    proximity_score REAL NOT NULL,
    availability_score REAL NOT NULL,
    rating_score REAL NOT NULL,
    specialization_score REAL NOT NULL,
    performance_score REAL NOT NULL,
    workload_score REAL NOT NULL,
    preference_score REAL NOT NULL,
    experience_score REAL NOT NULL,
    composite_score REAL NOT NULL CHECK (composite_score >= 0 AND composite_score <= 100),
    recommendation TEXT NOT NULL,
    outcome TEXT NOT NULL,
    config_version INTEGER NOT NULL,
    computed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_assignment_score_job
  ON assignment_score(job_id, computed_at);

CREATE INDEX IF NOT EXISTS idx_assignment_score_run
  ON assignment_score(run_id, rank);

-- 派单尝试 (只追加, outcome 单向推进)
CREATE TABLE IF NOT EXISTS assignment_attempt (
    attempt_id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    run_id TEXT,
    attempt_number INTEGER NOT NULL,
    contractor_id TEXT NOT NULL,
    score_id TEXT,
    composite_score REAL,
    method TEXT NOT NULL,
    offered_at TEXT NOT NULL,
    expires_at TEXT,
    outcome TEXT NOT NULL,
    outcome_reason TEXT,
    resolved_at TEXT
);

-- 同一工单至多一个未决报价
CREATE UNIQUE INDEX IF NOT EXISTS uq_assignment_attempt_pending
  ON assignment_attempt(job_id) WHERE outcome = 'PENDING';

CREATE INDEX IF NOT EXISTS idx_assignment_attempt_resolved
  ON assignment_attempt(method, outcome, resolved_at);

-- 派单效果快照
CREATE TABLE IF NOT EXISTS effectiveness_snapshot (
    period TEXT NOT NULL,
    period_start TEXT NOT NULL,
    total_assignments INTEGER NOT NULL DEFAULT 0,
    successful_assignments INTEGER NOT NULL DEFAULT 0,
    failed_assignments INTEGER NOT NULL DEFAULT 0,
    score_sum REAL NOT NULL DEFAULT 0,
    fallback_assignments INTEGER NOT NULL DEFAULT 0,
    manual_assignments INTEGER NOT NULL DEFAULT 0,
    unassignable_jobs INTEGER NOT NULL DEFAULT 0,
    success_rate REAL NOT NULL DEFAULT 0,
    average_score REAL NOT NULL DEFAULT 0,
    last_updated TEXT NOT NULL,
    PRIMARY KEY (period, period_start)
);

-- 完工回传
CREATE TABLE IF NOT EXISTS job_completion (
    job_id TEXT PRIMARY KEY,
    contractor_id TEXT NOT NULL,
    completed INTEGER NOT NULL,
    on_time INTEGER NOT NULL,
    customer_rating REAL,
    recorded_at TEXT NOT NULL
);

-- 权重调整提案
CREATE TABLE IF NOT EXISTS weight_proposal (
    proposal_id TEXT PRIMARY KEY,
    base_config_version INTEGER NOT NULL,
    current_weights_json TEXT NOT NULL,
    proposed_weights_json TEXT NOT NULL,
    correlations_json TEXT NOT NULL,
    sample_size INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    decided_at TEXT,
    decided_by TEXT,
    applied_config_version INTEGER
);

-- 兜底轮询游标
CREATE TABLE IF NOT EXISTS fallback_cursor (
    service_type TEXT PRIMARY KEY,
    last_contractor_id TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- 操作日志
CREATE TABLE IF NOT EXISTS action_log (
    action_id TEXT PRIMARY KEY,
    job_id TEXT,
    action_type TEXT NOT NULL,
    action_ts TEXT NOT NULL,
    actor TEXT NOT NULL,
    payload_json TEXT,
    detail TEXT
);

CREATE INDEX IF NOT EXISTS idx_action_log_job
  ON action_log(job_id, action_ts);

CREATE INDEX IF NOT EXISTS idx_action_log_type
  ON action_log(action_type, action_ts);
"#;
