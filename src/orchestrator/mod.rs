//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层是整个系统的"指挥中心"：顶层状态机驱动批次序列、
//! 落账、轮换和冷却，直到目标达成或不可恢复失败。
//!
//! ## 层次关系
//!
//! ```text
//! orchestrator::App (状态机主循环)
//!     ↓
//! workflow::BatchFlow (执行单个批次)
//!     ↓
//! services (能力层: 封锁检测 / 轮换策略 / IP 探测)
//!     ↓
//! infrastructure (基础设施: VPN 控制程序 / 提取子进程)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一写者**：账本只由主循环写入，原子落盘
//! 2. **资源隔离**：只有编排层同时持有切换器和执行器
//! 3. **无隐藏状态**：每个决策点的输入都来自显式传入的实体，
//!    决策可以从日志中完整重建

pub mod run_loop;

pub use run_loop::{App, RunSummary};
