//! 基础设施层（Infrastructure Layer）
//!
//! 持有外部进程表面，只暴露能力：
//!
//! - `VpnCli` - 外部 VPN 控制程序的包装（connect / disconnect / status / list）
//! - `ExtractorCommand` - 提取子进程的命令构造与启动
//!
//! 本层不认识批次流程，不做任何策略判断。

pub mod extractor;
pub mod vpn_cli;

pub use extractor::ExtractorCommand;
pub use vpn_cli::{IdentitySwitcher, SwitcherStatus, VpnCli};
