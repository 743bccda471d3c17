//! 封锁检测服务 - 业务能力层
//!
//! ## 职责
//!
//! 纯流式分类器：逐行消费子进程输出，输出本次运行观察到的最强封锁信号。
//!
//! - 信号在单次运行内只升不降：`无封锁 < 软限流 < 硬封锁`
//! - 后续的正常行永远不会降级已观察到的信号
//! - 下一个批次开始前调用 `reset()` 归零
//! - 不跨重启持有任何状态
//!
//! 封锁是从行为中经验性判断出来的，没有官方错误码可依赖，
//! 所以分类必须保守（只升级）。

use crate::models::BlockSignal;
use anyhow::Result;
use regex::RegexSet;

/// 硬封锁签名：明确的拒绝、重试耗尽后的失败
const HARD_BLOCK_PATTERNS: &[&str] = &[
    r"(?i)ipblocked",
    r"(?i)ip blocked",
    r"(?i)blocking requests",
    r"(?i)requestblocked",
    r"(?i)request blocked",
];

/// 软限流签名：延迟升高、单次重试警告
const SOFT_THROTTLE_PATTERNS: &[&str] = &[
    r"(?i)rate limit",
    r"(?i)too many requests",
    r"\b429\b",
    r"(?i)quota exceeded",
];

/// 封锁检测器
pub struct BlockDetector {
    hard: RegexSet,
    soft: RegexSet,
    current: BlockSignal,
}

impl BlockDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            hard: RegexSet::new(HARD_BLOCK_PATTERNS)?,
            soft: RegexSet::new(SOFT_THROTTLE_PATTERNS)?,
            current: BlockSignal::None,
        })
    }

    /// 消费一行输出，返回升级后的当前信号
    ///
    /// 硬封锁签名无条件升级到硬封锁；软签名只在尚未达到硬封锁时升级
    pub fn observe(&mut self, line: &str) -> BlockSignal {
        let observed = if self.hard.is_match(line) {
            BlockSignal::HardBlock
        } else if self.soft.is_match(line) {
            BlockSignal::SoftThrottle
        } else {
            BlockSignal::None
        };

        self.current = self.current.max(observed);
        self.current
    }

    /// 当前观察到的最强信号
    pub fn current(&self) -> BlockSignal {
        self.current
    }

    /// 在下一个批次开始前归零
    pub fn reset(&mut self) {
        self.current = BlockSignal::None;
    }
}
