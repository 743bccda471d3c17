//! 轮换策略服务 - 业务能力层
//!
//! ## 决策规则（按优先级）
//!
//! 1. 硬封锁 / 未知挂起：必须轮换。同一区间重排到下一轮（不推进索引），
//!    在新线路下重试——同一线路上重试只会加重封锁
//! 2. 无信号且完整确认：按固定节奏轮换（每个批次完成后），保持地理
//!    多样性。轮换只发生在批次边界之后，绝不在批次进行中
//! 3. 软限流：不轮换，在当前线路下指数退避（有上限）后继续
//!
//! ## 线路选择
//!
//! 排除冷却中的线路和上一条线路；优先选择与最近两次使用区域不同的
//! 线路（地理多样性）；其余按 blocked_count 最低、最久未使用排序，
//! 完全相同时均匀随机打破平局，避免可指纹化的确定性序列。
//!
//! 注意："批次完成后切换安全、批次中途切换易触发封锁"是针对目标平台
//! 的经验结论而非逻辑不变量，规则 2 刻意保持孤立、可替换。

use crate::config::Config;
use crate::error::{AppResult, PoolError};
use crate::models::{BlockSignal, LocationPool, RunOutcome};
use chrono::{DateTime, Local};
use rand::seq::SliceRandom;
use std::time::Duration;

/// 轮换决定
///
/// 派生值，不持久化，但全部写入日志供审计
#[derive(Debug, Clone)]
pub struct RotationDecision {
    pub should_rotate: bool,
    pub target_location: Option<String>,
    pub wait_before_resume: Duration,
    /// 决策依据（写入日志）
    pub reason: String,
}

impl RotationDecision {
    fn stay(wait: Duration, reason: impl Into<String>) -> Self {
        Self {
            should_rotate: false,
            target_location: None,
            wait_before_resume: wait,
            reason: reason.into(),
        }
    }

    fn rotate(target: String, wait: Duration, reason: impl Into<String>) -> Self {
        Self {
            should_rotate: true,
            target_location: Some(target),
            wait_before_resume: wait,
            reason: reason.into(),
        }
    }
}

/// 轮换策略
pub struct RotationPolicy {
    /// 硬封锁后线路的冷却时长
    cooldown: chrono::Duration,
    /// 软限流退避基础延迟
    backoff_base: Duration,
    /// 软限流退避延迟上限
    backoff_cap: Duration,
    /// 切换后等待网络稳定的时长
    stabilize: Duration,
    /// 连续软限流批次计数（决定退避指数）
    soft_streak: u32,
}

impl RotationPolicy {
    pub fn new(config: &Config) -> Self {
        Self {
            cooldown: chrono::Duration::seconds(config.location_cooldown_secs as i64),
            backoff_base: Duration::from_secs(config.soft_backoff_base_secs),
            backoff_cap: Duration::from_secs(config.soft_backoff_cap_secs),
            stabilize: Duration::from_secs(config.vpn_stabilize_secs),
            soft_streak: 0,
        }
    }

    /// 每个批次结束后调用一次，产出轮换决定
    ///
    /// 只有硬封锁/挂起时线路池耗尽才是错误（对本次运行致命）；
    /// 可选轮换遇到无可用线路时退化为原地继续
    pub fn decide(
        &mut self,
        outcome: &RunOutcome,
        pool: &LocationPool,
        current: Option<&str>,
        now: DateTime<Local>,
    ) -> AppResult<RotationDecision> {
        match outcome.block_signal {
            // 规则 1: 硬封锁/挂起必须轮换，同区间重试
            BlockSignal::HardBlock | BlockSignal::UnknownHang => {
                self.soft_streak = 0;
                let target = self.select_location(pool, current, now).ok_or(
                    PoolError::Exhausted {
                        resume_index: outcome.task.start,
                    },
                )?;
                Ok(RotationDecision::rotate(
                    target,
                    self.stabilize,
                    format!("{}，强制更换线路后重试区间 {}", outcome.block_signal.label(), outcome.task),
                ))
            }

            // 规则 3: 软限流不轮换，指数退避
            BlockSignal::SoftThrottle => {
                let delay = self.backoff_delay();
                self.soft_streak += 1;
                Ok(RotationDecision::stay(
                    delay,
                    format!("软限流，当前线路仍可用，退避 {} 秒", delay.as_secs()),
                ))
            }

            // 规则 2: 干净批次按节奏轮换；无信号的失败批次也换线路重试
            BlockSignal::None => {
                self.soft_streak = 0;
                let reason = if outcome.fully_confirmed() {
                    "批次完成，按节奏轮换保持地理多样性"
                } else {
                    "批次失败（无封锁签名），更换线路后重试"
                };

                match self.select_location(pool, current, now) {
                    Some(target) => Ok(RotationDecision::rotate(target, self.stabilize, reason)),
                    // 可选轮换没有可用线路时原地继续，不算致命
                    None => Ok(RotationDecision::stay(
                        Duration::ZERO,
                        "无可用轮换线路，保持当前线路",
                    )),
                }
            }
        }
    }

    /// 轮换执行成功后更新线路池状态
    ///
    /// 线路池状态只允许在这里变更：
    /// - 硬封锁/挂起导致的轮换：被腾空的线路进入冷却并累计封锁次数
    /// - 可选轮换：只更新新线路的使用统计
    pub fn apply(
        &self,
        pool: &mut LocationPool,
        decision: &RotationDecision,
        vacated: Option<&str>,
        signal: BlockSignal,
        now: DateTime<Local>,
    ) {
        if !decision.should_rotate {
            return;
        }

        if signal.forces_rotation() {
            if let Some(blocked) = vacated {
                pool.mark_blocked(blocked, now, self.cooldown);
            }
        }

        if let Some(target) = decision.target_location.as_deref() {
            pool.mark_used(target, now);
        }
    }

    /// 启动阶段的初始线路选择（与轮换选择同一套规则）
    pub fn initial_location(&self, pool: &LocationPool, now: DateTime<Local>) -> Option<String> {
        self.select_location(pool, None, now)
    }

    /// 当前的软限流退避延迟（`base * 2^streak`，封顶）
    fn backoff_delay(&self) -> Duration {
        let factor = 1u64 << self.soft_streak.min(16);
        self.backoff_base
            .saturating_mul(factor as u32)
            .min(self.backoff_cap)
    }

    /// 选择下一条线路；无可用线路时返回 None
    fn select_location(
        &self,
        pool: &LocationPool,
        previous: Option<&str>,
        now: DateTime<Local>,
    ) -> Option<String> {
        let eligible = pool.eligible(now, previous);
        if eligible.is_empty() {
            return None;
        }

        // 地理多样性：优先与最近两次使用的区域不同；过滤到空则放弃过滤
        let recent_regions = pool.recent_regions(2);
        let diverse: Vec<_> = eligible
            .iter()
            .filter(|r| !recent_regions.contains(&r.region))
            .copied()
            .collect();
        let mut candidates = if diverse.is_empty() { eligible } else { diverse };

        // blocked_count 最低者优先
        let min_blocked = candidates.iter().map(|r| r.blocked_count).min()?;
        candidates.retain(|r| r.blocked_count == min_blocked);

        // 最久未使用优先（从未使用排最前）
        let oldest = candidates.iter().map(|r| r.last_used_at).min()?;
        candidates.retain(|r| r.last_used_at == oldest);

        // 均匀随机打破平局，避免可指纹化的确定性序列
        candidates
            .choose(&mut rand::thread_rng())
            .map(|r| r.id.clone())
    }
}
