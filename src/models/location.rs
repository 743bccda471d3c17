//! 线路池数据模型 - 数据层
//!
//! ## 职责
//!
//! - `LocationRecord` - 单条候选出口线路及其冷却/使用状态
//! - `LocationPool` - 整个候选线路集合，进程生命周期内常驻
//!
//! ## 不变量
//!
//! `LocationRecord` 的状态字段只允许轮换策略（RotationPolicy）在
//! 做出轮换决定之后修改，其他模块只读。

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

/// 单条候选出口线路
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRecord {
    /// 线路标识（VPN 客户端可识别的 id）
    pub id: String,
    /// 所属地理区域（用于地理多样性选择）
    pub region: String,
    /// 最近一次被使用的时间
    pub last_used_at: Option<DateTime<Local>>,
    /// 累计使用次数
    pub uses_count: u32,
    /// 冷却结束时间（在此之前不可被选中）
    pub cooldown_until: Option<DateTime<Local>>,
    /// 累计触发硬封锁的次数
    pub blocked_count: u32,
}

impl LocationRecord {
    pub fn new(id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            region: region.into(),
            last_used_at: None,
            uses_count: 0,
            cooldown_until: None,
            blocked_count: 0,
        }
    }

    /// 在给定时刻是否处于冷却中
    pub fn in_cooldown(&self, now: DateTime<Local>) -> bool {
        match self.cooldown_until {
            Some(until) => until > now,
            None => false,
        }
    }
}

/// TOML 线路配置文件结构
#[derive(Debug, Deserialize)]
struct LocationsFile {
    locations: Vec<LocationEntry>,
}

#[derive(Debug, Deserialize)]
struct LocationEntry {
    id: String,
    region: String,
}

/// 候选线路池
///
/// 启动时从配置创建一次，进程生命周期内常驻。
/// `recent` 按使用顺序记录线路 id，用于地理多样性选择。
#[derive(Debug, Clone)]
pub struct LocationPool {
    records: Vec<LocationRecord>,
    recent: Vec<String>,
}

impl LocationPool {
    pub fn new(records: Vec<LocationRecord>) -> Self {
        Self {
            records,
            recent: Vec::new(),
        }
    }

    /// 从 TOML 文件加载线路池；文件不存在时退回内置默认线路池
    pub async fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            warn!("⚠️ 线路配置文件不存在: {}，使用内置默认线路池", path);
            return Ok(Self::default_pool());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("无法读取线路配置文件: {}", path))?;

        let file: LocationsFile = toml::from_str(&content)
            .with_context(|| format!("无法解析线路配置文件: {}", path))?;

        let records: Vec<LocationRecord> = file
            .locations
            .into_iter()
            .map(|e| LocationRecord::new(e.id, e.region))
            .collect();

        if records.is_empty() {
            anyhow::bail!("线路配置文件为空: {}", path);
        }

        info!("✓ 已加载 {} 条候选线路 (来自 {})", records.len(), path);
        Ok(Self::new(records))
    }

    /// 内置默认线路池（按美国地理区域分组，保证区域多样性）
    pub fn default_pool() -> Self {
        let regions: [(&str, &[&str]); 7] = [
            ("northeast", &["boston-us", "new-york-us", "philadelphia-us"]),
            ("southeast", &["atlanta-us", "miami-us", "charlotte-us"]),
            ("midwest", &["chicago-us", "detroit-us", "louisville-us"]),
            ("south_central", &["dallas-us", "oklahoma-city-us", "houston-us"]),
            ("mountain", &["denver-us", "phoenix-us", "salt-lake-us"]),
            ("northwest", &["seattle-us", "portland-us"]),
            ("west", &["los-angeles-us", "san-francisco-us", "idaho-falls-us"]),
        ];

        let mut records = Vec::new();
        for (region, ids) in regions {
            for id in ids {
                records.push(LocationRecord::new(*id, region));
            }
        }
        Self::new(records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[LocationRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&LocationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut LocationRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    /// 根据 id 查询所属区域
    pub fn region_of(&self, id: &str) -> Option<&str> {
        self.get(id).map(|r| r.region.as_str())
    }

    /// 最近使用的 n 条线路所属的区域（用于地理多样性过滤）
    pub fn recent_regions(&self, n: usize) -> Vec<String> {
        self.recent
            .iter()
            .rev()
            .take(n)
            .filter_map(|id| self.region_of(id).map(|r| r.to_string()))
            .collect()
    }

    /// 按使用顺序记录的全部线路 id
    pub fn used_sequence(&self) -> &[String] {
        &self.recent
    }

    /// 给定时刻可被选中的线路：排除冷却中的线路和上一条线路
    pub fn eligible(&self, now: DateTime<Local>, previous: Option<&str>) -> Vec<&LocationRecord> {
        self.records
            .iter()
            .filter(|r| !r.in_cooldown(now))
            .filter(|r| previous != Some(r.id.as_str()))
            .collect()
    }

    /// 是否所有线路都不可用（线路池耗尽，对本次运行是致命的）
    pub fn is_exhausted(&self, now: DateTime<Local>, previous: Option<&str>) -> bool {
        self.eligible(now, previous).is_empty()
    }

    // ========== 以下状态变更只允许轮换策略调用 ==========

    /// 记录一条线路被启用
    pub(crate) fn mark_used(&mut self, id: &str, now: DateTime<Local>) {
        if let Some(record) = self.get_mut(id) {
            record.uses_count += 1;
            record.last_used_at = Some(now);
        }
        self.recent.push(id.to_string());
    }

    /// 记录一条线路触发了硬封锁，进入冷却
    pub(crate) fn mark_blocked(&mut self, id: &str, now: DateTime<Local>, cooldown: chrono::Duration) {
        if let Some(record) = self.get_mut(id) {
            record.blocked_count += 1;
            record.cooldown_until = Some(now + cooldown);
        }
    }
}
