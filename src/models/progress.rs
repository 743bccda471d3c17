//! 进度账本 - 数据层
//!
//! ## 职责
//!
//! `ProgressState` 是整个系统中唯一必须持久化的实体：
//!
//! - `confirmed_index` 单调递增，只在一个批次完整确认且信号不超过
//!   软限流时推进，推进量恰好等于该批次大小（无缺口、无回退）
//! - 部分成功或被封锁的批次不推进索引，但会追加到历史中供事后诊断
//! - 写入采用"临时文件 + 原子改名"，崩溃不会造成进度丢失或重复计数
//! - 账本不可读/损坏时在启动阶段直接报错，拒绝猜测恢复点

use crate::error::{AppResult, LedgerError};
use crate::models::batch::{BatchTask, RunOutcome};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 单条历史记录：一次批次执行的完整结果 + 当时生效的线路
///
/// 历史是追加式的，足以重建每一次轮换发生的原因（审计用途）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub outcome: RunOutcome,
    /// 执行该批次时生效的线路
    pub location: Option<String>,
    pub finished_at: DateTime<Local>,
}

/// 持久化的进度状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    /// 已确认完成的最高索引（恢复的唯一事实来源）
    pub confirmed_index: usize,
    /// 目标总索引
    pub target_index: usize,
    /// 当前索引位置已尝试的次数
    pub attempts_at_current_index: u32,
    /// 追加式历史
    pub history: Vec<OutcomeRecord>,
}

impl ProgressState {
    pub fn new(target_index: usize) -> Self {
        Self {
            confirmed_index: 0,
            target_index,
            attempts_at_current_index: 0,
            history: Vec::new(),
        }
    }

    /// 从账本文件加载；文件不存在时创建新状态
    ///
    /// 账本存在但无法读取/解析时返回错误——宁可失败也不猜测恢复点
    pub fn load(path: &str, target_index: usize) -> AppResult<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::new(target_index));
        }

        let content = fs::read_to_string(path).map_err(|source| LedgerError::ReadFailed {
            path: path.to_string(),
            source,
        })?;

        let mut state: ProgressState =
            serde_json::from_str(&content).map_err(|source| LedgerError::Corrupted {
                path: path.to_string(),
                source,
            })?;

        if state.confirmed_index > state.target_index.max(target_index) {
            return Err(LedgerError::Inconsistent {
                path: path.to_string(),
                reason: format!(
                    "confirmed_index ({}) 超过目标 ({})",
                    state.confirmed_index,
                    state.target_index.max(target_index)
                ),
            }
            .into());
        }

        // 目标以本次配置为准（允许在恢复时扩大目标）
        state.target_index = target_index;
        Ok(state)
    }

    /// 原子化保存：先写临时文件，再改名覆盖
    pub fn save(&self, path: &str) -> AppResult<()> {
        let wrap = |source: std::io::Error| LedgerError::WriteFailed {
            path: path.to_string(),
            source,
        };

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(wrap)?;
            }
        }

        let json = serde_json::to_string_pretty(self).map_err(|source| LedgerError::Corrupted {
            path: path.to_string(),
            source,
        })?;

        let tmp_path = format!("{}.tmp", path);
        fs::write(&tmp_path, json).map_err(wrap)?;
        fs::rename(&tmp_path, path).map_err(wrap)?;
        Ok(())
    }

    /// 记录一次批次结果，必要时推进已确认索引
    ///
    /// 返回本次是否推进了索引。推进条件：
    /// 1. 批次完整确认（零退出码 + 全部条目确认）
    /// 2. 信号不超过软限流
    /// 3. 批次起点恰好等于当前已确认索引（防止错位推进）
    pub fn record(&mut self, outcome: RunOutcome, location: Option<String>) -> bool {
        let advanced = outcome.fully_confirmed()
            && outcome.block_signal.allows_advance()
            && outcome.task.start == self.confirmed_index;

        if advanced {
            self.confirmed_index += outcome.task.size;
            self.attempts_at_current_index = 0;
        } else {
            self.attempts_at_current_index += 1;
        }

        self.history.push(OutcomeRecord {
            outcome,
            location,
            finished_at: Local::now(),
        });

        advanced
    }

    /// 是否已达到目标
    pub fn is_complete(&self) -> bool {
        self.confirmed_index >= self.target_index
    }

    /// 剩余条目数
    pub fn remaining(&self) -> usize {
        self.target_index.saturating_sub(self.confirmed_index)
    }

    /// 计算下一个批次任务；目标已达成时返回 None
    ///
    /// 被封锁的批次不推进索引，因此这里会自动重排同一区间
    pub fn next_task(&self, batch_size: usize) -> Option<BatchTask> {
        if self.is_complete() || batch_size == 0 {
            return None;
        }
        let size = batch_size.min(self.remaining());
        Some(BatchTask::new(self.confirmed_index, size))
    }
}
