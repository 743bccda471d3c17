//! VPN 切换器 - 基础设施层
//!
//! ## 职责
//!
//! 包装外部 VPN 控制程序，只暴露四个能力：connect / disconnect /
//! status / list_locations。不认识批次，不做轮换决策。
//!
//! connect/disconnect 对调用方是同步语义：返回时网络转换要么已生效
//! 要么已失败——编排器不能在不确定的转换过程中启动批次。
//!
//! ## 外部命令契约
//!
//! - `<program> connect <location_id>` - 零退出码表示连接已生效
//! - `<program> disconnect` - 零退出码表示已断开
//! - `<program> status` - 输出 `connected <location_id>` 或 `disconnected`
//! - `<program> list` - 每行输出一个 location_id

use crate::error::{AppResult, SwitcherError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// 切换器连接状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitcherStatus {
    pub connected: bool,
    pub location_id: Option<String>,
}

/// 网络身份切换器
///
/// 外部协作者的抽象边界；生产实现是 `VpnCli`，测试用 mock 替换
#[async_trait]
pub trait IdentitySwitcher: Send + Sync {
    /// 连接到指定线路，返回时转换已生效或已失败
    async fn connect(&self, location_id: &str) -> AppResult<()>;
    /// 断开当前连接
    async fn disconnect(&self) -> AppResult<()>;
    /// 查询当前连接状态
    async fn status(&self) -> AppResult<SwitcherStatus>;
    /// 列出全部可用线路
    async fn list_locations(&self) -> AppResult<Vec<String>>;
}

/// 基于外部控制程序的 VPN 切换器
pub struct VpnCli {
    program: String,
    timeout: Duration,
}

impl VpnCli {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// 执行一条控制命令，带超时，返回 stdout
    async fn run_command(&self, op: &str, args: &[&str]) -> AppResult<String> {
        debug!("执行 VPN 控制命令: {} {} {}", self.program, op, args.join(" "));

        let child = Command::new(&self.program)
            .arg(op)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SwitcherError::SpawnFailed {
                program: self.program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SwitcherError::CommandTimeout {
                op: op.to_string(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|source| SwitcherError::SpawnFailed {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                format!("退出码 {:?}", output.status.code())
            } else {
                stderr.trim().to_string()
            };
            Err(command_error(op, detail))
        }
    }
}

fn command_error(op: &str, detail: String) -> crate::error::AppError {
    let err = match op {
        "connect" => SwitcherError::ConnectFailed {
            location: String::new(),
            detail,
        },
        "disconnect" => SwitcherError::DisconnectFailed { detail },
        _ => SwitcherError::StatusFailed { detail },
    };
    err.into()
}

#[async_trait]
impl IdentitySwitcher for VpnCli {
    async fn connect(&self, location_id: &str) -> AppResult<()> {
        self.run_command("connect", &[location_id])
            .await
            .map_err(|e| match e {
                // 给连接失败补上线路信息
                crate::error::AppError::Switcher(SwitcherError::ConnectFailed {
                    detail, ..
                }) => SwitcherError::ConnectFailed {
                    location: location_id.to_string(),
                    detail,
                }
                .into(),
                other => other,
            })?;
        Ok(())
    }

    async fn disconnect(&self) -> AppResult<()> {
        self.run_command("disconnect", &[]).await?;
        Ok(())
    }

    async fn status(&self) -> AppResult<SwitcherStatus> {
        let stdout = self.run_command("status", &[]).await?;
        let first_line = stdout.lines().next().unwrap_or("").trim();

        if let Some(rest) = first_line.strip_prefix("connected") {
            let location = rest.trim();
            Ok(SwitcherStatus {
                connected: true,
                location_id: if location.is_empty() {
                    None
                } else {
                    Some(location.to_string())
                },
            })
        } else {
            Ok(SwitcherStatus {
                connected: false,
                location_id: None,
            })
        }
    }

    async fn list_locations(&self) -> AppResult<Vec<String>> {
        let stdout = self.run_command("list", &[]).await?;
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}
