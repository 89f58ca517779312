//! 检测运行上下文
//!
//! 为单次检测提供截止时间和取消信号

use std::fmt;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// 上下文结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// 被显式取消（进程关闭）
    Cancelled,
    /// 超过截止时间
    DeadlineExceeded,
}

impl fmt::Display for DoneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoneReason::Cancelled => write!(f, "context canceled"),
            DoneReason::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// 单次检测的运行上下文
///
/// 由调度器为每次运行创建，取消令牌挂在全局关闭令牌之下
#[derive(Debug, Clone)]
pub struct ProbeContext {
    /// 取消令牌
    token: CancellationToken,
    /// 截止时间
    deadline: Instant,
}

impl ProbeContext {
    /// 创建挂在父令牌下的上下文
    ///
    /// # 参数
    /// * `parent` - 父取消令牌
    /// * `timeout` - 本次运行允许的最长时间
    ///
    /// # 返回
    /// * `Self` - 上下文实例
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            deadline: Instant::now() + timeout,
        }
    }

    /// 创建独立的上下文（一次性检测、测试）
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(&CancellationToken::new(), timeout)
    }

    /// 等待上下文结束并返回原因
    pub async fn done(&self) -> DoneReason {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => DoneReason::Cancelled,
            _ = sleep_until(self.deadline) => DoneReason::DeadlineExceeded,
        }
    }

    /// 非阻塞地查询上下文是否已结束
    pub fn err(&self) -> Option<DoneReason> {
        if self.token.is_cancelled() {
            Some(DoneReason::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(DoneReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// 剩余时间
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// 截止时间
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 取消本上下文（不影响父令牌）
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = ProbeContext::with_timeout(Duration::from_millis(20));
        assert!(ctx.err().is_none());
        assert_eq!(ctx.done().await, DoneReason::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(DoneReason::DeadlineExceeded));
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let ctx = ProbeContext::new(&parent, Duration::from_secs(30));
        parent.cancel();
        assert_eq!(ctx.done().await, DoneReason::Cancelled);
        assert_eq!(ctx.err().unwrap().to_string(), "context canceled");
    }

    #[tokio::test]
    async fn test_done_pending_until_cancelled() {
        let ctx = ProbeContext::with_timeout(Duration::from_secs(30));
        let mut done = tokio_test::task::spawn(ctx.done());
        tokio_test::assert_pending!(done.poll());

        ctx.cancel();
        assert!(done.is_woken());
        tokio_test::assert_ready_eq!(done.poll(), DoneReason::Cancelled);
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_touch_parent() {
        let parent = CancellationToken::new();
        let ctx = ProbeContext::new(&parent, Duration::from_secs(30));
        ctx.cancel();
        assert!(!parent.is_cancelled());
        assert_eq!(ctx.err(), Some(DoneReason::Cancelled));
    }
}
