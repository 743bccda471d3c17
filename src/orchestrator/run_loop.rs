//! 编排主循环 - 编排层
//!
//! ## 职责
//!
//! 顶层状态机，把所有组件组合成完整的运行：
//!
//! ```text
//! IDLE → RUNNING_BATCH → EVALUATING → ROTATING → COOLING_DOWN
//!            ↑                                        │
//!            └────────────────────────────────────────┘
//!                 （直到 DONE 或 FAILED / INTERRUPTED）
//! ```
//!
//! ## 核心规则
//!
//! 1. **单批次串行**：任意时刻最多一个批次在飞行中
//! 2. **先落账再行动**：每个批次结果先原子写入账本，再执行轮换决定
//! 3. **轮换只在批次边界**：ROTATING 状态只会出现在 EVALUATING 之后
//! 4. **切换器故障 ≠ 封锁**：连接重试耗尽是环境故障，直接 FAILED，
//!    绝不被解释为封锁信号
//! 5. **每个挂起点有界且可取消**：停止信号在所有挂起边界被响应，
//!    部分结果照常记录，账本先落盘再退出

use crate::config::Config;
use crate::error::{AppError, SwitcherError};
use crate::infrastructure::{IdentitySwitcher, VpnCli};
use crate::models::{BlockSignal, LocationPool, ProgressState, RunOutcome};
use crate::services::{IpProbe, RotationDecision, RotationPolicy};
use crate::utils::logging;
use crate::workflow::{BatchCtx, BatchExecutor, BatchFlow};
use anyhow::Result;
use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// 状态机状态
#[derive(Debug)]
enum LoopState {
    /// 加载进度，确认起点
    Idle,
    /// 一个批次在飞行中
    RunningBatch,
    /// 批次已终态，落账并征询轮换策略
    Evaluating(RunOutcome),
    /// 执行轮换决定（携带触发它的信号，用于线路池更新）
    Rotating(RotationDecision, BlockSignal),
    /// 退避/稳定等待
    CoolingDown(Duration),
    /// 目标达成
    Done,
    /// 操作员请求停止
    Interrupted,
    /// 不可恢复失败
    Failed(String),
}

/// 一次运行的汇总结果
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub confirmed_index: usize,
    pub target_index: usize,
    pub batches_run: usize,
    pub interrupted: bool,
}

/// 应用主结构
///
/// 对切换器和批次执行器使用 trait 边界，生产组合是
/// `App<VpnCli, BatchFlow>`，测试注入 mock
pub struct App<S: IdentitySwitcher, E: BatchExecutor> {
    config: Config,
    switcher: S,
    executor: E,
    pool: LocationPool,
    progress: ProgressState,
    policy: RotationPolicy,
    ip_probe: Option<IpProbe>,
    current_location: Option<String>,
    batch_num: usize,
    consecutive_timeouts: u32,
    shutdown: watch::Receiver<bool>,
    started_at: DateTime<Local>,
}

impl App<VpnCli, BatchFlow> {
    /// 初始化生产组合：加载线路池和账本，装配真实的切换器与执行器
    ///
    /// 账本损坏会在这里直接失败——拒绝猜测恢复点
    pub async fn initialize(config: Config, shutdown: watch::Receiver<bool>) -> Result<Self> {
        logging::init_log_file(&config.output_log_file)?;

        let pool = LocationPool::load(&config.locations_file).await?;
        let progress = ProgressState::load(&config.ledger_file, config.target_total)?;

        let switcher = VpnCli::new(
            &config.vpn_cli_path,
            Duration::from_secs(config.switch_timeout_secs),
        );
        let executor = BatchFlow::new(&config)?;

        let ip_probe = match IpProbe::new() {
            Ok(probe) => Some(probe),
            Err(e) => {
                warn!("⚠️ 出口 IP 探测不可用: {}", e);
                None
            }
        };

        let mut app = Self::new(config, switcher, executor, pool, progress, shutdown);
        app.ip_probe = ip_probe;
        Ok(app)
    }
}

impl<S: IdentitySwitcher, E: BatchExecutor> App<S, E> {
    /// 用现成的组件装配（测试从这里注入 mock）
    pub fn new(
        config: Config,
        switcher: S,
        executor: E,
        pool: LocationPool,
        progress: ProgressState,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let policy = RotationPolicy::new(&config);
        Self {
            config,
            switcher,
            executor,
            pool,
            progress,
            policy,
            ip_probe: None,
            current_location: None,
            batch_num: 0,
            consecutive_timeouts: 0,
            shutdown,
            started_at: Local::now(),
        }
    }

    /// 运行状态机直到终态
    pub async fn run(&mut self) -> Result<RunSummary> {
        let mut state = LoopState::Idle;

        loop {
            state = match state {
                LoopState::Idle => self.on_idle().await?,
                LoopState::RunningBatch => self.on_running_batch().await?,
                LoopState::Evaluating(outcome) => self.on_evaluating(outcome),
                LoopState::Rotating(decision, signal) => self.on_rotating(decision, signal).await,
                LoopState::CoolingDown(wait) => self.on_cooling_down(wait).await,
                LoopState::Done => {
                    logging::print_final_stats(&self.progress, self.started_at, &self.pool);
                    return Ok(self.summary(false));
                }
                LoopState::Interrupted => {
                    self.flush_ledger();
                    logging::log_interrupted(&self.progress);
                    return Ok(self.summary(true));
                }
                LoopState::Failed(reason) => {
                    self.flush_ledger();
                    error!(
                        "❌ 致命错误: {} | 最后确认索引: {}",
                        reason, self.progress.confirmed_index
                    );
                    anyhow::bail!(
                        "{} (可恢复索引: {})",
                        reason,
                        self.progress.confirmed_index
                    );
                }
            };
        }
    }

    /// IDLE: 检查起点，必要时建立初始连接
    async fn on_idle(&mut self) -> Result<LoopState> {
        if self.progress.is_complete() {
            info!("✓ 账本显示目标已达成，无需运行");
            return Ok(LoopState::Done);
        }

        logging::log_startup(&self.config, &self.progress, self.pool.len());

        // 同步切换器当前状态
        match self.switcher.status().await {
            Ok(status) if status.connected => {
                info!("🌐 切换器已连接: {:?}", status.location_id);
                self.current_location = status.location_id;
            }
            Ok(_) => {
                info!("🌐 切换器未连接，建立初始连接...");
                if let Some(state) = self.establish_initial_connection().await {
                    return Ok(state);
                }
            }
            Err(e) => {
                warn!("⚠️ 查询切换器状态失败: {}，尝试建立初始连接", e);
                if let Some(state) = self.establish_initial_connection().await {
                    return Ok(state);
                }
            }
        }

        Ok(LoopState::RunningBatch)
    }

    /// 建立初始连接；失败时返回 FAILED 状态
    async fn establish_initial_connection(&mut self) -> Option<LoopState> {
        let now = Local::now();
        let target = match self.policy.initial_location(&self.pool, now) {
            Some(t) => t,
            None => {
                return Some(LoopState::Failed(
                    AppError::Pool(crate::error::PoolError::Empty).to_string(),
                ))
            }
        };

        let decision = RotationDecision {
            should_rotate: true,
            target_location: Some(target.clone()),
            wait_before_resume: Duration::from_secs(self.config.vpn_stabilize_secs),
            reason: "初始连接".to_string(),
        };

        match self.connect_with_retries(&target).await {
            Ok(()) => {
                self.policy
                    .apply(&mut self.pool, &decision, None, BlockSignal::None, now);
                self.current_location = Some(target);
                self.probe_egress_ip().await;
                None
            }
            Err(reason) => Some(LoopState::Failed(reason)),
        }
    }

    /// RUNNING_BATCH: 从已确认索引构造任务并执行
    async fn on_running_batch(&mut self) -> Result<LoopState> {
        if self.stop_requested() {
            return Ok(LoopState::Interrupted);
        }

        let task = match self.progress.next_task(self.config.batch_size) {
            Some(task) => task,
            None => return Ok(LoopState::Done),
        };

        self.batch_num += 1;
        let ctx = BatchCtx::new(self.batch_num, task, self.current_location.clone());
        logging::log_batch_start(self.batch_num, &task, ctx.location.as_deref(), &self.progress);

        let outcome = self.executor.execute(&ctx, &mut self.shutdown).await?;
        Ok(LoopState::Evaluating(outcome))
    }

    /// EVALUATING: 先落账，再征询轮换策略
    fn on_evaluating(&mut self, outcome: RunOutcome) -> LoopState {
        logging::log_batch_complete(self.batch_num, &outcome);

        let signal = outcome.block_signal;
        let advanced = self
            .progress
            .record(outcome.clone(), self.current_location.clone());

        // 账本必须先于任何后续动作落盘：崩溃不能被观察为进度丢失
        if let Err(e) = self.progress.save(&self.config.ledger_file) {
            return LoopState::Failed(e.to_string());
        }

        if advanced {
            info!(
                "📈 进度推进: {}/{}",
                self.progress.confirmed_index, self.progress.target_index
            );
        } else {
            warn!(
                "📉 索引不变 ({})，区间 {} 将重排",
                self.progress.confirmed_index, outcome.task
            );
        }

        // 连续超时阈值：区分"伪装成挂起的封锁"与环境故障
        if signal == BlockSignal::UnknownHang {
            self.consecutive_timeouts += 1;
            if self.consecutive_timeouts >= self.config.max_consecutive_timeouts {
                return LoopState::Failed(format!(
                    "连续 {} 次批次超时，判定为环境故障",
                    self.consecutive_timeouts
                ));
            }
        } else {
            self.consecutive_timeouts = 0;
        }

        if self.stop_requested() {
            return LoopState::Interrupted;
        }

        if self.progress.is_complete() {
            return LoopState::Done;
        }

        let decision = match self.policy.decide(
            &outcome,
            &self.pool,
            self.current_location.as_deref(),
            Local::now(),
        ) {
            Ok(decision) => decision,
            // 强制轮换遇到线路池耗尽：对本次运行致命
            Err(e) => return LoopState::Failed(e.to_string()),
        };

        logging::log_rotation_decision(&decision, self.current_location.as_deref());
        LoopState::Rotating(decision, signal)
    }

    /// ROTATING: 执行切换（断开 → 连接，带有界重试）
    async fn on_rotating(&mut self, decision: RotationDecision, signal: BlockSignal) -> LoopState {
        if !decision.should_rotate {
            return LoopState::CoolingDown(decision.wait_before_resume);
        }

        let target = match decision.target_location.clone() {
            Some(t) => t,
            None => return LoopState::CoolingDown(decision.wait_before_resume),
        };

        if let Err(e) = self.switcher.disconnect().await {
            // 断开失败不致命，连接动作本身会覆盖旧隧道
            warn!("⚠️ 断开连接失败（继续尝试连接）: {}", e);
        }

        if let Err(reason) = self.connect_with_retries(&target).await {
            return LoopState::Failed(reason);
        }

        let vacated = self.current_location.take();
        self.policy.apply(
            &mut self.pool,
            &decision,
            vacated.as_deref(),
            signal,
            Local::now(),
        );
        self.current_location = Some(target.clone());

        info!(
            "✓ 线路轮换完成: {} → {} ({})",
            vacated.as_deref().unwrap_or("(无)"),
            target,
            self.pool.region_of(&target).unwrap_or("unknown")
        );
        self.probe_egress_ip().await;

        LoopState::CoolingDown(decision.wait_before_resume)
    }

    /// COOLING_DOWN: 可取消的有界等待
    async fn on_cooling_down(&mut self, wait: Duration) -> LoopState {
        if wait > Duration::ZERO {
            info!("⏸️ 冷却 {} 秒后继续", wait.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                res = self.shutdown.changed() => {
                    if res.is_err() || *self.shutdown.borrow() {
                        return LoopState::Interrupted;
                    }
                }
            }
        }
        LoopState::RunningBatch
    }

    /// 有界重试的连接；重试耗尽返回诊断文本
    ///
    /// 切换器基础设施被假定比目标平台可靠：反复失败是环境故障，
    /// 不是封锁事件，错误信息里明确注明
    async fn connect_with_retries(&mut self, target: &str) -> std::result::Result<(), String> {
        for attempt in 1..=self.config.max_switch_retries {
            info!(
                "🔌 连接线路 {} (第 {}/{} 次)...",
                target, attempt, self.config.max_switch_retries
            );
            match self.switcher.connect(target).await {
                Ok(()) => {
                    info!("✓ 已连接到 {}", target);
                    return Ok(());
                }
                Err(e) => {
                    error!("❌ 连接失败 (第 {} 次): {}", attempt, e);
                    if attempt < self.config.max_switch_retries {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }

        Err(SwitcherError::RetriesExhausted {
            location: target.to_string(),
            attempts: self.config.max_switch_retries,
        }
        .to_string())
    }

    /// 切换后探测一次出口 IP（失败只记日志）
    async fn probe_egress_ip(&self) {
        if let Some(probe) = &self.ip_probe {
            match probe.current_ip().await {
                Ok(ip) => info!("🌐 当前出口 IP: {}", ip),
                Err(e) => warn!("⚠️ 出口 IP 探测失败: {}", e),
            }
        }
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// 退出前尽力落盘账本
    fn flush_ledger(&self) {
        if let Err(e) = self.progress.save(&self.config.ledger_file) {
            error!("❌ 退出前账本落盘失败: {}", e);
        }
    }

    fn summary(&self, interrupted: bool) -> RunSummary {
        RunSummary {
            confirmed_index: self.progress.confirmed_index,
            target_index: self.progress.target_index,
            batches_run: self.batch_num,
            interrupted,
        }
    }

    /// 当前生效的线路（测试断言用）
    pub fn current_location(&self) -> Option<&str> {
        self.current_location.as_deref()
    }

    /// 线路池快照（测试断言用）
    pub fn pool(&self) -> &LocationPool {
        &self.pool
    }

    /// 进度快照（测试断言用）
    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }
}
