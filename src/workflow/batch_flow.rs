//! 批次执行流程 - 流程层
//!
//! ## 职责
//!
//! 端到端执行"一个批次"：启动提取子进程，把 stdout/stderr 逐行
//! （在到达时，而不是结束后）喂给封锁检测器，统计逐条确认标记，
//! 在硬超时内等待进程退出，产出一份 `RunOutcome`。
//!
//! ## 边界
//!
//! - 运行器只是传输层，不做策略：进程为什么失败由检测器的信号说话
//! - 超时未退出按硬失败处理：杀掉进程，信号记为"未知挂起"
//! - 收到取消信号时同样杀掉进程，部分结果照常返回（绝不丢弃）

use crate::config::Config;
use crate::error::RunnerError;
use crate::infrastructure::ExtractorCommand;
use crate::models::{BlockSignal, RunOutcome};
use crate::services::BlockDetector;
use crate::workflow::batch_ctx::BatchCtx;
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// 逐条确认标记：子进程每持久化一条结果输出一行
const SUCCESS_MARKER: &str = r"(?i)successfully processed video";

/// 批次执行器
///
/// 外部子进程的执行边界；生产实现是 `BatchFlow`，测试用 mock 替换
#[async_trait]
pub trait BatchExecutor: Send {
    /// 执行一个批次直到终态（退出 / 超时 / 取消），返回结果
    async fn execute(
        &mut self,
        ctx: &BatchCtx,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<RunOutcome>;
}

/// 行来源标记
#[derive(Debug, Clone, Copy)]
enum LineSource {
    Stdout,
    Stderr,
}

/// 批次执行流程
pub struct BatchFlow {
    command: ExtractorCommand,
    detector: BlockDetector,
    success_marker: Regex,
    timeout: Duration,
    verbose_logging: bool,
    /// 子进程输出的归档文件（追加模式），打不开时只告警
    output_log: Option<std::fs::File>,
}

impl BatchFlow {
    pub fn new(config: &Config) -> Result<Self> {
        let output_log = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.output_log_file)
        {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("⚠️ 输出日志文件不可写 ({}): {}", config.output_log_file, e);
                None
            }
        };

        Ok(Self {
            command: ExtractorCommand::from_config(config),
            detector: BlockDetector::new()?,
            success_marker: Regex::new(SUCCESS_MARKER)?,
            timeout: Duration::from_secs(config.batch_timeout_secs),
            verbose_logging: config.verbose_logging,
            output_log,
        })
    }
}

#[async_trait]
impl BatchExecutor for BatchFlow {
    async fn execute(
        &mut self,
        ctx: &BatchCtx,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<RunOutcome> {
        let started = std::time::Instant::now();

        // 信号在每个批次开始时归零
        self.detector.reset();

        let describe = self.command.describe(&ctx.task);
        info!("[批次 {}] 🚀 启动子进程: {}", ctx.batch_num, describe);
        self.archive_line(&format!("[批次 {}] 启动: {}", ctx.batch_num, describe));
        let mut child = self.command.spawn(&ctx.task)?;

        let stdout = child
            .stdout
            .take()
            .ok_or(RunnerError::MissingPipe { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(RunnerError::MissingPipe { stream: "stderr" })?;

        // 两个并发读取任务：逐行分类不能阻塞在子进程的缓冲上
        let (tx, mut rx) = mpsc::channel::<(LineSource, String)>(256);
        spawn_line_reader(stdout, tx.clone(), LineSource::Stdout);
        spawn_line_reader(stderr, tx, LineSource::Stderr);

        let deadline = tokio::time::Instant::now() + self.timeout;
        let timeout_sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(timeout_sleep);

        let mut items_confirmed: usize = 0;
        let mut timed_out = false;
        let mut cancelled = false;

        loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some((source, line)) => {
                        self.log_line(ctx, source, &line);

                        if self.success_marker.is_match(&line) && items_confirmed < ctx.task.size {
                            items_confirmed += 1;
                            info!(
                                "[批次 {}] ✓ 条目确认 ({}/{})",
                                ctx.batch_num, items_confirmed, ctx.task.size
                            );
                        }

                        let before = self.detector.current();
                        let after = self.detector.observe(&line);
                        if after > before {
                            warn!(
                                "[批次 {}] ⚠️ 封锁信号升级: {} → {}",
                                ctx.batch_num,
                                before.label(),
                                after.label()
                            );
                        }
                    }
                    // 两个输出流都已结束
                    None => break,
                },
                _ = &mut timeout_sleep => {
                    error!(
                        "[批次 {}] ❌ 超过硬超时 ({}秒)，强制终止子进程",
                        ctx.batch_num,
                        self.timeout.as_secs()
                    );
                    timed_out = true;
                    break;
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        warn!("[批次 {}] 🛑 收到停止信号，终止子进程", ctx.batch_num);
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        // 确定退出状态
        let exit_status = if timed_out || cancelled {
            kill_child(&mut child, ctx.batch_num).await;
            None
        } else {
            match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(Ok(status)) => status.code(),
                Ok(Err(source)) => return Err(RunnerError::WaitFailed { source }.into()),
                Err(_) => {
                    error!("[批次 {}] ❌ 等待子进程退出超时，强制终止", ctx.batch_num);
                    timed_out = true;
                    kill_child(&mut child, ctx.batch_num).await;
                    None
                }
            }
        };

        let block_signal = if timed_out {
            BlockSignal::UnknownHang
        } else {
            self.detector.current()
        };

        Ok(RunOutcome {
            task: ctx.task,
            exit_status,
            items_confirmed,
            block_signal,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

impl BatchFlow {
    fn log_line(&mut self, ctx: &BatchCtx, source: LineSource, line: &str) {
        match source {
            LineSource::Stdout => {
                if self.verbose_logging {
                    info!("[批次 {}] STDOUT: {}", ctx.batch_num, line);
                } else {
                    debug!("[批次 {}] STDOUT: {}", ctx.batch_num, line);
                }
                self.archive_line(&format!("[批次 {}] {}", ctx.batch_num, line));
            }
            LineSource::Stderr => {
                error!("[批次 {}] STDERR: {}", ctx.batch_num, line);
                self.archive_line(&format!("[批次 {}] STDERR: {}", ctx.batch_num, line));
            }
        }
    }

    /// 追加一行到输出归档文件；写失败不影响批次执行
    fn archive_line(&mut self, line: &str) {
        if let Some(file) = self.output_log.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// 为一个输出流启动后台逐行读取任务
fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<(LineSource, String)>, source: LineSource)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((source, line)).await.is_err() {
                break;
            }
        }
    });
}

async fn kill_child(child: &mut tokio::process::Child, batch_num: usize) {
    if let Err(e) = child.kill().await {
        warn!("[批次 {}] 终止子进程失败（可能已退出）: {}", batch_num, e);
    }
}
