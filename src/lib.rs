//! # VPN Batch Orchestrator
//!
//! 针对主动反爬平台的批次编排与反封锁轮换引擎：
//! 在单一网络身份下串行执行固定大小的提取批次，从子进程日志流中
//! 识别封锁信号，硬封锁时强制轮换出口线路并重排同一区间，
//! 软限流时指数退避，全程维护崩溃安全的恢复状态。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部进程表面，只暴露能力
//! - `VpnCli` - VPN 控制程序包装（connect / disconnect / status / list）
//! - `ExtractorCommand` - 提取子进程的命令构造与启动
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，每个服务一项能力
//! - `BlockDetector` - 流式封锁信号分类（只升不降）
//! - `RotationPolicy` - 轮换决策、线路选择、退避计算
//! - `IpProbe` - 切换后的出口 IP 验证
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个批次"的完整执行流程
//! - `BatchCtx` - 批次上下文封装
//! - `BatchFlow` - 子进程启动 → 逐行分类 → 超时守护 → RunOutcome
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/run_loop` - 顶层状态机，组合以上全部组件
//!
//! ## 数据层
//!
//! - `models/` - `BatchTask` / `BlockSignal` / `RunOutcome` /
//!   `LocationPool` / `ProgressState`（唯一必须持久化的实体）

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{ExtractorCommand, IdentitySwitcher, SwitcherStatus, VpnCli};
pub use models::{BatchTask, BlockSignal, LocationPool, LocationRecord, ProgressState, RunOutcome};
pub use orchestrator::{App, RunSummary};
pub use services::{BlockDetector, IpProbe, RotationDecision, RotationPolicy};
pub use workflow::{BatchCtx, BatchExecutor, BatchFlow};
