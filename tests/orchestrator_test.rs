//! 编排主循环集成测试
//!
//! 用 mock 切换器 + 脚本化批次执行器驱动完整状态机，
//! 覆盖：单调推进、硬封锁重排、冷却排除、批次边界轮换、断点恢复

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use vpn_batch_orchestrator::error::{AppResult, SwitcherError};
use vpn_batch_orchestrator::{
    App, BatchCtx, BatchExecutor, BlockSignal, Config, IdentitySwitcher, LocationPool,
    LocationRecord, ProgressState, RunOutcome, SwitcherStatus,
};

/// 全局事件序列（跨 mock 共享，用于断言时序）
#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    BatchStart(usize),
    BatchEnd(usize),
    Connect(String),
    Disconnect,
}

type EventLog = Arc<Mutex<Vec<Event>>>;

// ========== mock 切换器 ==========

struct MockSwitcher {
    events: EventLog,
    initial_location: Option<String>,
    fail_connect: bool,
}

#[async_trait]
impl IdentitySwitcher for MockSwitcher {
    async fn connect(&self, location_id: &str) -> AppResult<()> {
        if self.fail_connect {
            return Err(SwitcherError::ConnectFailed {
                location: location_id.to_string(),
                detail: "mock 连接失败".to_string(),
            }
            .into());
        }
        self.events
            .lock()
            .unwrap()
            .push(Event::Connect(location_id.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> AppResult<()> {
        self.events.lock().unwrap().push(Event::Disconnect);
        Ok(())
    }

    async fn status(&self) -> AppResult<SwitcherStatus> {
        Ok(SwitcherStatus {
            connected: self.initial_location.is_some(),
            location_id: self.initial_location.clone(),
        })
    }

    async fn list_locations(&self) -> AppResult<Vec<String>> {
        Ok(vec![])
    }
}

// ========== 脚本化批次执行器 ==========

#[derive(Debug, Clone, Copy)]
enum Step {
    /// 完整确认，无信号
    Clean,
    /// 硬封锁，只确认了部分条目
    HardBlockAt(usize),
    /// 软限流但完整确认
    SoftThrottle,
    /// 超时挂起
    Hang,
}

struct ScriptedExecutor {
    events: EventLog,
    script: Vec<Step>,
    calls: usize,
}

#[async_trait]
impl BatchExecutor for ScriptedExecutor {
    async fn execute(
        &mut self,
        ctx: &BatchCtx,
        _shutdown: &mut watch::Receiver<bool>,
    ) -> Result<RunOutcome> {
        self.events
            .lock()
            .unwrap()
            .push(Event::BatchStart(ctx.task.start));

        let step = self.script.get(self.calls).copied().unwrap_or(Step::Clean);
        self.calls += 1;

        let outcome = match step {
            Step::Clean => RunOutcome {
                task: ctx.task,
                exit_status: Some(0),
                items_confirmed: ctx.task.size,
                block_signal: BlockSignal::None,
                duration_ms: 100,
            },
            Step::HardBlockAt(confirmed) => RunOutcome {
                task: ctx.task,
                exit_status: Some(1),
                items_confirmed: confirmed,
                block_signal: BlockSignal::HardBlock,
                duration_ms: 100,
            },
            Step::SoftThrottle => RunOutcome {
                task: ctx.task,
                exit_status: Some(0),
                items_confirmed: ctx.task.size,
                block_signal: BlockSignal::SoftThrottle,
                duration_ms: 100,
            },
            Step::Hang => RunOutcome {
                task: ctx.task,
                exit_status: None,
                items_confirmed: 0,
                block_signal: BlockSignal::UnknownHang,
                duration_ms: 100,
            },
        };

        self.events
            .lock()
            .unwrap()
            .push(Event::BatchEnd(ctx.task.start));
        Ok(outcome)
    }
}

// ========== 测试装配 ==========

fn test_config(ledger_path: &str) -> Config {
    Config {
        target_total: 30,
        batch_size: 10,
        ledger_file: ledger_path.to_string(),
        // 测试里不真正睡眠
        vpn_stabilize_secs: 0,
        soft_backoff_base_secs: 0,
        soft_backoff_cap_secs: 0,
        max_switch_retries: 3,
        max_consecutive_timeouts: 3,
        location_cooldown_secs: 1800,
        ..Config::default()
    }
}

/// 三条线路 A/B/C，不同区域；使用时间刻意错开，
/// 让 LRU 打破平局而不触发随机选择
fn pool_abc() -> LocationPool {
    let now = Local::now();
    let mut a = LocationRecord::new("a-us", "east");
    a.last_used_at = Some(now - chrono::Duration::hours(1));
    let mut b = LocationRecord::new("b-us", "central");
    b.last_used_at = Some(now - chrono::Duration::hours(3));
    let mut c = LocationRecord::new("c-us", "west");
    c.last_used_at = Some(now - chrono::Duration::hours(2));
    LocationPool::new(vec![a, b, c])
}

struct Harness {
    events: EventLog,
    shutdown_tx: watch::Sender<bool>,
    app: App<MockSwitcher, ScriptedExecutor>,
    _dir: tempfile::TempDir,
    ledger_path: String,
}

fn build_harness(
    script: Vec<Step>,
    pool: LocationPool,
    target: usize,
    initial_location: Option<&str>,
    fail_connect: bool,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.json").to_str().unwrap().to_string();
    let config = Config {
        target_total: target,
        ..test_config(&ledger_path)
    };

    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let switcher = MockSwitcher {
        events: events.clone(),
        initial_location: initial_location.map(|s| s.to_string()),
        fail_connect,
    };
    let executor = ScriptedExecutor {
        events: events.clone(),
        script,
        calls: 0,
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let progress = ProgressState::load(&ledger_path, target).unwrap();
    let app = App::new(config, switcher, executor, pool, progress, shutdown_rx);

    Harness {
        events,
        shutdown_tx,
        app,
        _dir: dir,
        ledger_path,
    }
}

// ========== 场景测试（目标 30 / 批次 10 / 三条线路） ==========

#[tokio::test]
async fn test_full_scenario_with_hard_block_requeue() {
    let script = vec![
        Step::Clean,          // [0,10) 在 a 上干净完成
        Step::HardBlockAt(4), // [10,20) 在 b 上第 5 条被硬封
        Step::Clean,          // [10,20) 在 c 上重试成功
        Step::Clean,          // [20,30) 在 a 上完成
    ];
    let mut h = build_harness(script, pool_abc(), 30, Some("a-us"), false);

    let summary = h.app.run().await.unwrap();

    assert_eq!(summary.confirmed_index, 30);
    assert_eq!(summary.batches_run, 4);
    assert!(!summary.interrupted);

    // 批次区间序列：硬封锁后重排同一区间，而不是跳到下一段
    let starts: Vec<usize> = h
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::BatchStart(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec![0, 10, 10, 20]);

    // 轮换序列：a → b（LRU 最久），封锁后 → c（不是 b），再 → a（b 在冷却）
    let connects: Vec<String> = h
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::Connect(id) => Some(id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(connects, vec!["b-us", "c-us", "a-us"]);

    // 被封线路进入冷却并累计封锁次数
    let b = h.app.pool().get("b-us").unwrap();
    assert_eq!(b.blocked_count, 1);
    assert!(b.in_cooldown(Local::now()));

    // 账本落盘：确认索引 30，历史 4 条，其中第二条记录了封锁
    let ledger = ProgressState::load(&h.ledger_path, 30).unwrap();
    assert!(ledger.is_complete());
    assert_eq!(ledger.history.len(), 4);
    assert_eq!(ledger.history[1].outcome.block_signal, BlockSignal::HardBlock);
    assert_eq!(ledger.history[1].outcome.items_confirmed, 4);
}

#[tokio::test]
async fn test_no_rotation_strictly_inside_a_batch() {
    let script = vec![Step::Clean, Step::HardBlockAt(0), Step::Clean, Step::Clean];
    let mut h = build_harness(script, pool_abc(), 30, Some("a-us"), false);
    h.app.run().await.unwrap();

    // 任何 Connect/Disconnect 事件都不允许落在批次开始与终态之间
    let events = h.events.lock().unwrap();
    let mut in_batch = false;
    for event in events.iter() {
        match event {
            Event::BatchStart(_) => in_batch = true,
            Event::BatchEnd(_) => in_batch = false,
            Event::Connect(_) | Event::Disconnect => {
                assert!(!in_batch, "批次进行中发生了轮换: {:?}", events);
            }
        }
    }
}

#[tokio::test]
async fn test_confirmed_index_is_monotonic() {
    let script = vec![
        Step::Clean,
        Step::SoftThrottle,
        Step::HardBlockAt(2),
        Step::Hang,
        Step::Clean,
    ];
    let mut h = build_harness(script, pool_abc(), 30, Some("a-us"), false);
    h.app.run().await.unwrap();

    // 按历史逐条重放，索引必须单调不减，且只按完整确认的批次大小推进
    let ledger = ProgressState::load(&h.ledger_path, 30).unwrap();
    let mut replayed = ProgressState::new(30);
    let mut last = 0usize;
    for record in &ledger.history {
        replayed.record(record.outcome.clone(), record.location.clone());
        assert!(replayed.confirmed_index >= last);
        last = replayed.confirmed_index;
    }
    assert_eq!(replayed.confirmed_index, ledger.confirmed_index);
}

// ========== 恢复语义 ==========

#[tokio::test]
async fn test_resume_from_existing_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.json").to_str().unwrap().to_string();

    // 预置一份确认到 70 的账本
    let mut prior = ProgressState::new(100);
    for i in 0..7 {
        prior.record(
            RunOutcome {
                task: vpn_batch_orchestrator::BatchTask::new(i * 10, 10),
                exit_status: Some(0),
                items_confirmed: 10,
                block_signal: BlockSignal::None,
                duration_ms: 100,
            },
            None,
        );
    }
    prior.save(&ledger_path).unwrap();

    let config = Config {
        target_total: 100,
        ..test_config(&ledger_path)
    };
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let switcher = MockSwitcher {
        events: events.clone(),
        initial_location: Some("a-us".to_string()),
        fail_connect: false,
    };
    let executor = ScriptedExecutor {
        events: events.clone(),
        script: vec![Step::Clean, Step::Clean, Step::Clean],
        calls: 0,
    };
    let (_tx, rx) = watch::channel(false);
    let progress = ProgressState::load(&ledger_path, 100).unwrap();
    let mut app = App::new(config, switcher, executor, pool_abc(), progress, rx);

    let summary = app.run().await.unwrap();
    assert_eq!(summary.confirmed_index, 100);

    // 恢复后的第一个批次恰好是 [70, 80)，与从未崩溃时一致
    let starts: Vec<usize> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::BatchStart(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec![70, 80, 90]);
}

#[tokio::test]
async fn test_completed_ledger_short_circuits_to_done() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.json").to_str().unwrap().to_string();

    // 预置一份已达标的账本
    let mut prior = ProgressState::new(30);
    for i in 0..3 {
        prior.record(
            RunOutcome {
                task: vpn_batch_orchestrator::BatchTask::new(i * 10, 10),
                exit_status: Some(0),
                items_confirmed: 10,
                block_signal: BlockSignal::None,
                duration_ms: 100,
            },
            None,
        );
    }
    prior.save(&ledger_path).unwrap();

    let config = test_config(&ledger_path);
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let switcher = MockSwitcher {
        events: events.clone(),
        initial_location: Some("a-us".to_string()),
        fail_connect: false,
    };
    let executor = ScriptedExecutor {
        events: events.clone(),
        script: vec![],
        calls: 0,
    };
    let (_tx, rx) = watch::channel(false);
    let progress = ProgressState::load(&ledger_path, 30).unwrap();
    let mut app = App::new(config, switcher, executor, pool_abc(), progress, rx);

    let summary = app.run().await.unwrap();
    assert_eq!(summary.batches_run, 0);
    assert!(events.lock().unwrap().is_empty());
}

// ========== 致命路径 ==========

#[tokio::test]
async fn test_switcher_exhaustion_is_environment_fault() {
    // 第一个批次干净完成后尝试轮换，连接永远失败
    let mut h = build_harness(vec![Step::Clean], pool_abc(), 30, Some("a-us"), true);
    let err = h.app.run().await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("连续失败"), "诊断必须注明重试已耗尽: {}", msg);
    assert!(msg.contains("环境故障"), "诊断必须注明环境故障: {}", msg);
    assert!(msg.contains("非封锁信号"), "诊断必须与封锁信号划清界限: {}", msg);
    assert!(msg.contains("可恢复索引"), "必须报告可恢复索引: {}", msg);
    // 第一批的进度不能丢
    assert!(msg.contains("10"), "可恢复索引应为 10: {}", msg);
}

#[tokio::test]
async fn test_pool_exhaustion_on_hard_block_is_fatal() {
    // 只有一条线路：硬封锁后没有任何可轮换目标
    let pool = LocationPool::new(vec![LocationRecord::new("only-us", "east")]);
    let mut h = build_harness(vec![Step::HardBlockAt(0)], pool, 30, Some("only-us"), false);
    let err = h.app.run().await.unwrap_err();
    assert!(err.to_string().contains("可恢复索引"));
}

#[tokio::test]
async fn test_consecutive_hangs_escalate_to_fatal() {
    let script = vec![Step::Hang, Step::Hang, Step::Hang, Step::Hang];
    let mut h = build_harness(script, pool_abc(), 30, Some("a-us"), false);
    let err = h.app.run().await.unwrap_err();
    assert!(err.to_string().contains("连续"), "连续超时应判定为环境故障: {}", err);
}

// ========== 取消语义 ==========

#[tokio::test]
async fn test_stop_signal_flushes_ledger_and_reports_resume_index() {
    let script = vec![Step::Clean, Step::Clean, Step::Clean];
    let mut h = build_harness(script, pool_abc(), 30, Some("a-us"), false);

    // 启动前就已请求停止：循环在第一个挂起边界退出
    h.shutdown_tx.send(true).unwrap();
    let summary = h.app.run().await.unwrap();

    assert!(summary.interrupted);
    // 账本已落盘，重启即可恢复
    let ledger = ProgressState::load(&h.ledger_path, 30).unwrap();
    assert_eq!(ledger.confirmed_index, summary.confirmed_index);
}
