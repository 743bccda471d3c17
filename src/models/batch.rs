//! 批次数据模型 - 数据层
//!
//! ## 核心类型
//!
//! - `BatchTask` - 一次子进程调用对应的半开区间 `[start, start+size)`
//! - `BlockSignal` - 封锁信号分级（只升不降）
//! - `RunOutcome` - 一次批次执行的完整结果

use serde::{Deserialize, Serialize};
use std::fmt;

/// 批次任务
///
/// 对固定有序目录的一段连续半开索引区间 `[start, start+size)`。
/// 创建后不可变，唯一标识一次子进程调用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTask {
    /// 起始索引（含）
    pub start: usize,
    /// 批次大小
    pub size: usize,
}

impl BatchTask {
    pub fn new(start: usize, size: usize) -> Self {
        Self { start, size }
    }

    /// 结束索引（不含）
    pub fn end(&self) -> usize {
        self.start + self.size
    }
}

impl fmt::Display for BatchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

/// 封锁信号
///
/// 分级顺序：`None < SoftThrottle < HardBlock`。
/// `UnknownHang` 只由批次运行器在硬超时后赋值，检测器永远不会产生它。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum BlockSignal {
    /// 无封锁迹象
    None,
    /// 软限流（提高延迟即可恢复）
    SoftThrottle,
    /// 硬封锁（必须轮换线路）
    HardBlock,
    /// 子进程挂起，无法判断原因
    UnknownHang,
}

impl BlockSignal {
    /// 该信号是否允许推进已确认索引（信号 ≤ 软限流）
    pub fn allows_advance(&self) -> bool {
        matches!(self, BlockSignal::None | BlockSignal::SoftThrottle)
    }

    /// 该信号是否强制轮换线路
    pub fn forces_rotation(&self) -> bool {
        matches!(self, BlockSignal::HardBlock | BlockSignal::UnknownHang)
    }

    /// 信号的中文描述（用于日志）
    pub fn label(&self) -> &'static str {
        match self {
            BlockSignal::None => "无封锁",
            BlockSignal::SoftThrottle => "软限流",
            BlockSignal::HardBlock => "硬封锁",
            BlockSignal::UnknownHang => "未知挂起",
        }
    }
}

/// 一次批次执行的结果
///
/// `items_confirmed` 永远不超过任务大小；部分成功必须被记录，不能丢弃。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// 对应的批次任务
    pub task: BatchTask,
    /// 子进程退出码（超时被杀 / 被取消时为 None）
    pub exit_status: Option<i32>,
    /// 已确认完成的条目数
    pub items_confirmed: usize,
    /// 本次观察到的最强封锁信号
    pub block_signal: BlockSignal,
    /// 批次耗时（毫秒）
    pub duration_ms: u64,
}

impl RunOutcome {
    /// 是否完整确认：零退出码且所有条目都已确认
    ///
    /// 非零退出码一律视为失败任务，即使部分输出已被下游捕获
    pub fn fully_confirmed(&self) -> bool {
        self.exit_status == Some(0) && self.items_confirmed == self.task.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_half_open_range() {
        let task = BatchTask::new(100, 10);
        assert_eq!(task.end(), 110);
        assert_eq!(task.to_string(), "[100, 110)");
    }

    #[test]
    fn test_signal_ordering() {
        assert!(BlockSignal::None < BlockSignal::SoftThrottle);
        assert!(BlockSignal::SoftThrottle < BlockSignal::HardBlock);
        // 升级只取最大值
        let escalated = BlockSignal::HardBlock.max(BlockSignal::SoftThrottle);
        assert_eq!(escalated, BlockSignal::HardBlock);
    }

    #[test]
    fn test_signal_advance_rules() {
        assert!(BlockSignal::None.allows_advance());
        assert!(BlockSignal::SoftThrottle.allows_advance());
        assert!(!BlockSignal::HardBlock.allows_advance());
        assert!(!BlockSignal::UnknownHang.allows_advance());
        assert!(BlockSignal::HardBlock.forces_rotation());
        assert!(BlockSignal::UnknownHang.forces_rotation());
    }

    #[test]
    fn test_fully_confirmed_requires_zero_exit_and_full_count() {
        let task = BatchTask::new(0, 10);
        let outcome = RunOutcome {
            task,
            exit_status: Some(0),
            items_confirmed: 10,
            block_signal: BlockSignal::None,
            duration_ms: 1000,
        };
        assert!(outcome.fully_confirmed());

        // 部分成功不算完整确认
        let partial = RunOutcome {
            items_confirmed: 4,
            ..outcome.clone()
        };
        assert!(!partial.fully_confirmed());

        // 非零退出码即使条目数齐全也算失败
        let bad_exit = RunOutcome {
            exit_status: Some(1),
            ..outcome
        };
        assert!(!bad_exit.fully_confirmed());
    }
}
