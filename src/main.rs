// ==========================================
// 承包商派单引擎 - 进程入口
// ==========================================
// 启动: 日志 → 数据库 → 装配 → 恢复未决报价 → 等待退出信号
// ==========================================

use contractor_dispatch::app::{get_default_db_path, AppState};
use contractor_dispatch::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", contractor_dispatch::APP_NAME);
    tracing::info!("系统版本: {}", contractor_dispatch::VERSION);
    tracing::info!("==================================================");

    let db_path = std::env::args()
        .nth(1)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path).map_err(anyhow::Error::msg)?;

    let recovered = state.recover_pending_offers().map_err(anyhow::Error::msg)?;
    let config = state.config_api.get_active_config()?;
    tracing::info!(
        recovered,
        config_version = config.version,
        progressive = config.progressive_enabled,
        fallback = config.fallback_enabled,
        "派单引擎已就绪，等待退出信号"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到退出信号");
    state.shutdown();
    Ok(())
}
