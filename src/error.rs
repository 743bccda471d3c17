//! 应用程序错误类型
//!
//! 按领域拆分错误：切换器 / 批次运行 / 进度账本 / 线路池。
//! 切换器故障是环境故障，绝不允许被解释为平台封锁信号。

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// VPN 切换器相关错误
    #[error("切换器错误: {0}")]
    Switcher(#[from] SwitcherError),
    /// 批次子进程相关错误
    #[error("批次运行错误: {0}")]
    Runner(#[from] RunnerError),
    /// 进度账本相关错误
    #[error("账本错误: {0}")]
    Ledger(#[from] LedgerError),
    /// 线路池相关错误
    #[error("线路池错误: {0}")]
    Pool(#[from] PoolError),
}

/// VPN 切换器错误
///
/// 注意：这些都是环境故障，不是封锁信号
#[derive(Debug, Error)]
pub enum SwitcherError {
    /// 连接指定线路失败
    #[error("无法连接到线路 {location}: {detail}")]
    ConnectFailed { location: String, detail: String },
    /// 断开连接失败
    #[error("断开 VPN 连接失败: {detail}")]
    DisconnectFailed { detail: String },
    /// 查询状态失败
    #[error("查询 VPN 状态失败: {detail}")]
    StatusFailed { detail: String },
    /// 控制命令执行超时
    #[error("VPN 控制命令 `{op}` 执行超时 ({timeout_secs}秒)")]
    CommandTimeout { op: String, timeout_secs: u64 },
    /// 控制命令无法启动
    #[error("无法启动 VPN 控制程序 {program}: {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },
    /// 重试次数耗尽
    #[error("切换到线路 {location} 连续失败 {attempts} 次，判定为环境故障（非封锁信号）")]
    RetriesExhausted { location: String, attempts: u32 },
}

/// 批次子进程错误
#[derive(Debug, Error)]
pub enum RunnerError {
    /// 子进程无法启动
    #[error("无法启动提取子进程 {program}: {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },
    /// 子进程输出管道缺失
    #[error("子进程 {stream} 管道不可用")]
    MissingPipe { stream: &'static str },
    /// 等待子进程退出失败
    #[error("等待子进程退出失败: {source}")]
    WaitFailed { source: std::io::Error },
}

/// 进度账本错误
///
/// 账本损坏时拒绝猜测恢复点，直接在启动阶段报错
#[derive(Debug, Error)]
pub enum LedgerError {
    /// 读取账本文件失败
    #[error("读取账本失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },
    /// 账本内容无法解析
    #[error("账本内容损坏 ({path}): {source}")]
    Corrupted {
        path: String,
        source: serde_json::Error,
    },
    /// 账本内容自相矛盾
    #[error("账本状态非法 ({path}): {reason}")]
    Inconsistent { path: String, reason: String },
    /// 写入账本失败
    #[error("写入账本失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        source: std::io::Error,
    },
}

/// 线路池错误
#[derive(Debug, Error)]
pub enum PoolError {
    /// 线路池为空
    #[error("线路池为空，无法进行轮换")]
    Empty,
    /// 没有可用的轮换线路（其余均在冷却或刚被封锁）
    #[error("没有可用的轮换线路，本次运行无法继续 (可恢复索引: {resume_index})")]
    Exhausted { resume_index: usize },
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
