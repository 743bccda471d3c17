/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use crate::config::Config;
use crate::models::{BatchTask, LocationPool, ProgressState, RunOutcome};
use crate::services::RotationDecision;
use anyhow::Result;
use chrono::{DateTime, Local};
use std::fs;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 初始化 tracing 日志
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n批次编排日志 - {}\n{}\n\n",
        "=".repeat(60),
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config, progress: &ProgressState, pool_len: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批次编排 + 地理多样性轮换模式");
    info!("📊 目标总数: {} | 批次大小: {}", progress.target_index, config.batch_size);
    info!("📍 恢复索引: {} (剩余 {} 条)", progress.confirmed_index, progress.remaining());
    info!("🌐 候选线路: {} 条", pool_len);
    info!("💡 策略: 批次完成后切换线路，绝不在批次中途切换");
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
pub fn log_batch_start(
    batch_num: usize,
    task: &BatchTask,
    location: Option<&str>,
    progress: &ProgressState,
) {
    info!("\n{}", "=".repeat(60));
    info!("📦 批次 {} 开始", batch_num);
    info!("📄 索引区间: {} / 已确认 {}/{}", task, progress.confirmed_index, progress.target_index);
    info!("🌐 当前线路: {}", location.unwrap_or("(未连接)"));
    if progress.attempts_at_current_index > 0 {
        info!("🔁 该区间第 {} 次重试", progress.attempts_at_current_index);
    }
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(batch_num: usize, outcome: &RunOutcome) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 批次 {} 终态: 退出码 {:?} | 确认 {}/{} | 信号: {} | 耗时 {:.1}秒",
        batch_num,
        outcome.exit_status,
        outcome.items_confirmed,
        outcome.task.size,
        outcome.block_signal.label(),
        outcome.duration_ms as f64 / 1000.0
    );
    info!("{}", "─".repeat(60));
}

/// 记录轮换决定（审计：信号、前后线路、延迟）
pub fn log_rotation_decision(decision: &RotationDecision, from: Option<&str>) {
    if decision.should_rotate {
        info!(
            "🔁 轮换决定: {} → {} | 等待 {}秒 | 依据: {}",
            from.unwrap_or("(无)"),
            decision.target_location.as_deref().unwrap_or("(无)"),
            decision.wait_before_resume.as_secs(),
            decision.reason
        );
    } else {
        info!(
            "⏸️ 不轮换 | 等待 {}秒 | 依据: {}",
            decision.wait_before_resume.as_secs(),
            decision.reason
        );
    }
}

/// 打印最终统计信息
pub fn print_final_stats(
    progress: &ProgressState,
    started_at: DateTime<Local>,
    pool: &LocationPool,
) {
    let elapsed = Local::now().signed_duration_since(started_at);
    info!("\n{}", "=".repeat(60));
    info!("📊 全部批次完成统计");
    info!("完成时间: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("{}", "=".repeat(60));
    info!("✅ 已确认: {}/{}", progress.confirmed_index, progress.target_index);
    info!("📦 执行批次数: {}", progress.history.len());
    info!("⏱️ 总耗时: {} 分钟", elapsed.num_minutes());
    info!("🌐 线路使用序列:");
    for (i, id) in pool.used_sequence().iter().enumerate() {
        info!(
            "  第 {} 次: {} ({})",
            i + 1,
            id,
            pool.region_of(id).unwrap_or("unknown")
        );
    }
    info!("{}", "=".repeat(60));
}

/// 记录中断信息，提示可恢复索引
pub fn log_interrupted(progress: &ProgressState) {
    warn!("\n{}", "=".repeat(60));
    warn!("🛑 运行被中断");
    warn!("📍 可恢复索引: {} (下次启动自动从此恢复)", progress.confirmed_index);
    warn!("{}", "=".repeat(60));
}
