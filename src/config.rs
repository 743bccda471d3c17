/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    /// 目标提取总条目数
    pub target_total: usize,
    /// 每个批次的条目数量
    pub batch_size: usize,
    /// 进度账本文件路径
    pub ledger_file: String,
    /// 线路池配置文件路径（TOML）
    pub locations_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    // --- 提取子进程配置 ---
    pub extractor_program: String,
    pub extractor_script: String,
    pub extractor_input_file: String,
    /// 单个批次的硬超时（秒）
    pub batch_timeout_secs: u64,
    /// 连续超时多少次后判定为环境故障
    pub max_consecutive_timeouts: u32,
    // --- VPN 切换器配置 ---
    pub vpn_cli_path: String,
    /// 单条切换命令的超时（秒）
    pub switch_timeout_secs: u64,
    /// 切换失败的最大重试次数
    pub max_switch_retries: u32,
    /// 切换成功后等待网络稳定的时间（秒）
    pub vpn_stabilize_secs: u64,
    // --- 轮换策略配置 ---
    /// 硬封锁后线路的冷却时间（秒）
    pub location_cooldown_secs: u64,
    /// 软限流退避的基础延迟（秒）
    pub soft_backoff_base_secs: u64,
    /// 软限流退避的延迟上限（秒）
    pub soft_backoff_cap_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_total: 100,
            batch_size: 10,
            ledger_file: "data/progress_ledger.json".to_string(),
            locations_file: "locations.toml".to_string(),
            verbose_logging: false,
            output_log_file: "orchestrator_output.txt".to_string(),
            extractor_program: "python3".to_string(),
            extractor_script: "scripts/transcript_extractor_human_batch.py".to_string(),
            extractor_input_file: "data/processed/filtered_catalog.json".to_string(),
            batch_timeout_secs: 1800,
            max_consecutive_timeouts: 3,
            vpn_cli_path: "hma-vpn".to_string(),
            switch_timeout_secs: 120,
            max_switch_retries: 3,
            vpn_stabilize_secs: 15,
            location_cooldown_secs: 1800,
            soft_backoff_base_secs: 30,
            soft_backoff_cap_secs: 600,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            target_total: std::env::var("TARGET_TOTAL").ok().and_then(|v| v.parse().ok()).unwrap_or(default.target_total),
            batch_size: std::env::var("BATCH_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.batch_size),
            ledger_file: std::env::var("LEDGER_FILE").unwrap_or(default.ledger_file),
            locations_file: std::env::var("LOCATIONS_FILE").unwrap_or(default.locations_file),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            extractor_program: std::env::var("EXTRACTOR_PROGRAM").unwrap_or(default.extractor_program),
            extractor_script: std::env::var("EXTRACTOR_SCRIPT").unwrap_or(default.extractor_script),
            extractor_input_file: std::env::var("EXTRACTOR_INPUT_FILE").unwrap_or(default.extractor_input_file),
            batch_timeout_secs: std::env::var("BATCH_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.batch_timeout_secs),
            max_consecutive_timeouts: std::env::var("MAX_CONSECUTIVE_TIMEOUTS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_consecutive_timeouts),
            vpn_cli_path: std::env::var("VPN_CLI_PATH").unwrap_or(default.vpn_cli_path),
            switch_timeout_secs: std::env::var("SWITCH_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.switch_timeout_secs),
            max_switch_retries: std::env::var("MAX_SWITCH_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_switch_retries),
            vpn_stabilize_secs: std::env::var("VPN_STABILIZE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.vpn_stabilize_secs),
            location_cooldown_secs: std::env::var("LOCATION_COOLDOWN_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.location_cooldown_secs),
            soft_backoff_base_secs: std::env::var("SOFT_BACKOFF_BASE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.soft_backoff_base_secs),
            soft_backoff_cap_secs: std::env::var("SOFT_BACKOFF_CAP_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.soft_backoff_cap_secs),
        }
    }
}
