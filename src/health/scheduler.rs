//! 任务调度器模块
//!
//! 每个检测器运行在独立的任务中，按各自的周期执行，
//! 结果附加主机名后送入消费者的结果通道

use crate::error::CheckError;
use crate::health::checker::Checker;
use crate::health::context::ProbeContext;
use crate::health::result::{CheckResult, ResultWithHostname, Status};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 运行期限之外留给检测器自行收尾的时间
pub const RUN_GRACE: Duration = Duration::from_millis(500);

/// 调度默认值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDefaults {
    /// 默认检测间隔
    pub periodicity: Duration,
    /// 默认单次运行超时
    pub timeout: Duration,
}

impl Default for ScheduleDefaults {
    fn default() -> Self {
        Self {
            periodicity: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ScheduleDefaults {
    /// 检测器的实际周期
    pub fn periodicity_for(&self, checker: &dyn Checker) -> Duration {
        checker.periodicity().unwrap_or(self.periodicity)
    }

    /// 检测器的实际超时
    pub fn timeout_for(&self, checker: &dyn Checker) -> Duration {
        checker.timeout().unwrap_or(self.timeout)
    }
}

/// 单个检测任务的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// 等待下一次触发
    Idle,
    /// 检测执行中
    Running,
    /// 已停止
    Cancelled,
}

/// 任务状态表，键为 `插件/服务名`
type StateTable = Arc<RwLock<HashMap<String, TaskState>>>;

/// 检测调度器
pub struct CheckScheduler {
    /// 结果附加的主机名
    hostname: String,
    /// 调度默认值
    defaults: ScheduleDefaults,
    /// 结果通道
    results: mpsc::Sender<ResultWithHostname>,
    /// 全局关闭令牌
    shutdown: CancellationToken,
    /// 任务跟踪器，用于关闭时等待任务退出
    tracker: TaskTracker,
    /// 各任务状态
    states: StateTable,
}

impl CheckScheduler {
    /// 创建新的检测调度器
    ///
    /// # 参数
    /// * `hostname` - 结果附加的主机名
    /// * `defaults` - 调度默认值
    /// * `results` - 消费者结果通道的发送端
    /// * `shutdown` - 全局关闭令牌
    /// * `tracker` - 任务跟踪器
    pub fn new(
        hostname: impl Into<String>,
        defaults: ScheduleDefaults,
        results: mpsc::Sender<ResultWithHostname>,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            defaults,
            results,
            shutdown,
            tracker,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 为全部检测器启动调度任务
    pub async fn start(&self, checkers: Vec<Arc<dyn Checker>>) {
        info!("启动检测调度器，检测器数量: {}", checkers.len());
        for checker in checkers {
            self.spawn(checker).await;
        }
    }

    /// 为单个检测器启动调度任务
    pub async fn spawn(&self, checker: Arc<dyn Checker>) {
        let key = format!("{}/{}", checker.name(), checker.service_name());
        let period = self.defaults.periodicity_for(checker.as_ref());
        let timeout = self.defaults.timeout_for(checker.as_ref());

        self.states
            .write()
            .await
            .insert(key.clone(), TaskState::Idle);

        let hostname = self.hostname.clone();
        let results = self.results.clone();
        let shutdown = self.shutdown.clone();
        let states = Arc::clone(&self.states);

        self.tracker.spawn(async move {
            info!(
                "启动检测任务: {}，周期 {:?}，超时 {:?}",
                key, period, timeout
            );

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                set_state(&states, &key, TaskState::Running).await;
                debug!("开始检测: {}", key);

                let Some(result) = run_once(checker.as_ref(), timeout, &shutdown).await else {
                    break;
                };
                log_result(&key, &result);

                set_state(&states, &key, TaskState::Idle).await;

                let message = ResultWithHostname::new(result, hostname.clone());
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    sent = results.send(message) => {
                        if sent.is_err() {
                            warn!("结果通道已关闭，停止检测任务: {}", key);
                            break;
                        }
                    }
                }
            }

            set_state(&states, &key, TaskState::Cancelled).await;
            info!("检测任务已停止: {}", key);
        });
    }

    /// 当前各任务状态的快照
    pub async fn states(&self) -> HashMap<String, TaskState> {
        self.states.read().await.clone()
    }

    /// 调度默认值
    pub fn defaults(&self) -> ScheduleDefaults {
        self.defaults
    }
}

async fn set_state(states: &StateTable, key: &str, state: TaskState) {
    if let Some(entry) = states.write().await.get_mut(key) {
        *entry = state;
    }
}

fn log_result(key: &str, result: &CheckResult) {
    match result.status {
        Status::Ok => debug!("检测正常: {} - {}", key, result.message),
        status => warn!("检测异常: {} [{}] {}", key, status, result.message),
    }
}

/// 执行一次检测
///
/// 检测器超过 `timeout + RUN_GRACE` 仍未返回时放弃本次运行并生成 CRITICAL 结果；
/// 收到关闭信号时立即放弃并返回 `None`
///
/// # 参数
/// * `checker` - 检测器
/// * `timeout` - 运行超时
/// * `shutdown` - 全局关闭令牌
pub async fn run_once(
    checker: &dyn Checker,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> Option<CheckResult> {
    let ctx = ProbeContext::new(shutdown, timeout);

    tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        result = checker.run(&ctx) => Some(result),
        _ = sleep(timeout + RUN_GRACE) => {
            warn!(
                "检测器未在期限内返回，放弃本次运行: {}/{}",
                checker.name(),
                checker.service_name()
            );
            Some(CheckResult::from_error(
                checker,
                &CheckError::Timeout(timeout.as_millis()),
                "",
            ))
        }
    }
}

/// 并发执行一批检测各一次
pub async fn check_batch(
    checkers: &[Arc<dyn Checker>],
    defaults: ScheduleDefaults,
) -> Vec<CheckResult> {
    let shutdown = CancellationToken::new();
    let futures = checkers.iter().map(|checker| {
        let shutdown = shutdown.clone();
        async move {
            let timeout = defaults.timeout_for(checker.as_ref());
            run_once(checker.as_ref(), timeout, &shutdown)
                .await
                .unwrap_or_else(|| {
                    CheckResult::new(checker.as_ref(), Status::Unknown, "check aborted")
                })
        }
    });
    futures::future::join_all(futures).await
}
