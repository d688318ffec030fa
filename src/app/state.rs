// ==========================================
// 承包商派单引擎 - 应用状态
// ==========================================
// 职责: 装配仓储、引擎、API，管理后台任务生命周期
// 约束: 必须在 tokio 运行时内创建 (效果统计任务随状态启动)
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::task::JoinHandle;

use crate::api::{ConfigApi, DispatchApi};
use crate::config::ConfigManager;
use crate::db::open_shared_connection;
use crate::engine::{
    AssignmentOrchestrator, ChannelOutcomePublisher, DispatchRepositories, EffectivenessTracker,
    LearningAdjuster, LocationService, LoggingAlerter, LoggingOfferNotifier, OfferNotifier,
    OperatorAlerter, StraightLineLocationService,
};
use crate::repository::{EffectivenessRepository, WeightProposalRepository};

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "CONTRACTOR_DISPATCH_DB_PATH";

/// 外部协作方 (位置服务、报价通知、运维告警)
///
/// 默认使用直线距离与日志实现，接入真实渠道时替换
pub struct Collaborators {
    pub location: Arc<dyn LocationService>,
    pub notifier: Arc<dyn OfferNotifier>,
    pub alerter: Arc<dyn OperatorAlerter>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            location: Arc::new(StraightLineLocationService),
            notifier: Arc::new(LoggingOfferNotifier),
            alerter: Arc::new(LoggingAlerter),
        }
    }
}

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 派单API
    pub dispatch_api: Arc<DispatchApi>,

    /// 配置管理API
    pub config_api: Arc<ConfigApi>,

    /// 派单编排器 (工作池、重启恢复使用)
    pub orchestrator: Arc<AssignmentOrchestrator>,

    /// 效果统计
    pub tracker: Arc<EffectivenessTracker>,

    tracker_task: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    /// 打开数据库并装配 (默认协作方)
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_shared_connection(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        Self::from_connection(db_path, conn, Collaborators::default())
    }

    /// 基于已打开的连接装配
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 初始化所有Repository与配置管理器
    /// 2. 初始化编排器，结果事件经通道送往效果统计任务
    /// 3. 创建所有API实例
    pub fn from_connection(
        db_path: String,
        conn: Arc<Mutex<Connection>>,
        collaborators: Collaborators,
    ) -> Result<Self, String> {
        // ==========================================
        // 初始化Repository层
        // ==========================================
        let repos = DispatchRepositories::from_connection(conn.clone());
        let snapshot_repo = Arc::new(EffectivenessRepository::new(conn.clone()));
        let proposal_repo = Arc::new(WeightProposalRepository::new(conn.clone()));

        let config_manager =
            Arc::new(ConfigManager::new(conn).map_err(|e| format!("无法创建ConfigManager: {}", e))?);

        // ==========================================
        // 初始化Engine层
        // ==========================================
        let tracker = Arc::new(EffectivenessTracker::new(
            snapshot_repo,
            repos.attempts.clone(),
            repos.runs.clone(),
        ));
        let learning = Arc::new(LearningAdjuster::new(
            config_manager.clone(),
            repos.completions.clone(),
            proposal_repo,
            repos.action_log.clone(),
        ));
        let action_log_repo = repos.action_log.clone();

        let (publisher, events) = ChannelOutcomePublisher::channel();
        let orchestrator = Arc::new(
            AssignmentOrchestrator::new(
                repos,
                config_manager.clone(),
                collaborators.location,
                collaborators.notifier,
                collaborators.alerter,
            )
            .with_publisher(Arc::new(publisher)),
        );
        let tracker_task = tracker.clone().spawn(events);

        // ==========================================
        // 初始化API层
        // ==========================================
        let dispatch_api = Arc::new(DispatchApi::new(orchestrator.clone(), tracker.clone()));
        let config_api = Arc::new(ConfigApi::new(config_manager, learning, action_log_repo));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            dispatch_api,
            config_api,
            orchestrator,
            tracker,
            tracker_task: Mutex::new(Some(tracker_task)),
        })
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }

    /// 为库中未决报价重新登记超时任务
    pub fn recover_pending_offers(&self) -> Result<usize, String> {
        self.orchestrator
            .recover_pending_offers()
            .map_err(|e| format!("恢复未决报价失败: {}", e))
    }

    /// 关闭: 取消计时器并停止效果统计任务
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
        let task = match self.tracker_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
        tracing::info!("AppState已关闭");
    }
}

// ==========================================
// 默认数据库路径辅助函数
// ==========================================

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 CONTRACTOR_DISPATCH_DB_PATH (非空时)
/// - 开发环境: 用户数据目录/contractor-dispatch-dev/dispatch.db
/// - 生产环境: 用户数据目录/contractor-dispatch/dispatch.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./dispatch.db");

    if let Some(data_dir) = dirs::data_dir() {
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("contractor-dispatch-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("contractor-dispatch");
        }

        // 目录创建失败时回退到工作目录
        if std::fs::create_dir_all(&path).is_ok() {
            path = path.join("dispatch.db");
        } else {
            path = PathBuf::from("./dispatch.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[tokio::test]
    async fn test_app_state_wires_temp_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("dispatch.db").to_string_lossy().to_string();

        let state = AppState::new(db_path.clone()).unwrap();
        assert_eq!(state.get_db_path(), db_path);
        assert_eq!(state.config_api.get_active_config().unwrap().version, 1);
        assert_eq!(state.recover_pending_offers().unwrap(), 0);
        state.shutdown();
    }
}
