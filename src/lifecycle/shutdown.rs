//! 关闭协调器
//!
//! 整个进程共用一棵取消令牌树：根令牌取消后，所有检测任务、
//! 消费者和传输层都会看到关闭信号，协调器再等待它们全部退出

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// 关闭协调器
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
    triggered: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    /// 创建新的关闭协调器
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发关闭
    ///
    /// # 返回
    /// * `bool` - 只有第一次调用返回 true
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("触发关闭，通知所有任务退出");
        self.tracker.close();
        self.token.cancel();
        true
    }

    /// 是否已经触发
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// 根令牌
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 任务跟踪器
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// 在跟踪器中启动任务
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// 等待所有任务退出
    ///
    /// # 参数
    /// * `timeout` - 最长等待时间
    ///
    /// # 返回
    /// * `bool` - 所有任务在期限内退出时返回 true
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.tracker.close();
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("所有任务已退出");
                true
            }
            Err(_) => {
                warn!(
                    "等待任务退出超时 ({:?})，仍有 {} 个任务在运行",
                    timeout,
                    self.tracker.len()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_exactly_once() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_triggered());
        assert!(coordinator.trigger());
        assert!(!coordinator.trigger());
        assert!(coordinator.is_triggered());
        assert!(coordinator.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_trigger_reaches_child_tokens() {
        let coordinator = ShutdownCoordinator::new();
        let child = coordinator.token().child_token();
        let clone = coordinator.clone();

        clone.trigger();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_for_tasks() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();
        coordinator.spawn(async move {
            token.cancelled().await;
        });

        coordinator.trigger();
        assert!(coordinator.wait(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_wait_timeout_with_stuck_task() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        coordinator.trigger();
        assert!(!coordinator.wait(Duration::from_millis(50)).await);
    }
}
