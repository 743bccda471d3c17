use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};
use vpn_batch_orchestrator::orchestrator::App;
use vpn_batch_orchestrator::utils::logging;
use vpn_batch_orchestrator::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置
    let config = Config::from_env();

    // 操作员停止信号（Ctrl-C）：在所有挂起边界被响应
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 收到 Ctrl-C，正在安全停止（当前批次将被终止并落账）...");
            let _ = shutdown_tx.send(true);
        }
    });

    // 初始化并运行编排器
    let mut app = App::initialize(config, shutdown_rx).await?;
    let summary = app.run().await?;

    if summary.interrupted {
        info!(
            "已中断: 确认 {}/{}，重新启动即可从断点恢复",
            summary.confirmed_index, summary.target_index
        );
    } else {
        info!(
            "运行结束: 确认 {}/{}，共 {} 个批次",
            summary.confirmed_index, summary.target_index, summary.batches_run
        );
    }

    Ok(())
}
