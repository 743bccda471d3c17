//! 批次上下文 - 流程层
//!
//! 封装一次批次执行所需的只读上下文，供日志前缀使用

use crate::models::BatchTask;

/// 批次上下文
#[derive(Debug, Clone)]
pub struct BatchCtx {
    /// 批次编号（从 1 开始，用于日志）
    pub batch_num: usize,
    /// 本批次的索引区间
    pub task: BatchTask,
    /// 执行本批次时生效的线路
    pub location: Option<String>,
}

impl BatchCtx {
    pub fn new(batch_num: usize, task: BatchTask, location: Option<String>) -> Self {
        Self {
            batch_num,
            task,
            location,
        }
    }
}
