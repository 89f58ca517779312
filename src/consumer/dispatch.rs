//! 消费者投递管道
//!
//! 每个消费者一个投递任务：从结果通道取出结果，转换为传输层消息，
//! 在等待预算内交给传输层。传输层迟迟不接收时丢弃消息并回报错误，
//! 不会阻塞检测任务，也不会阻止关闭

use crate::consumer::transport::{Transport, TransportMessage};
use crate::error::DispatchError;
use crate::health::ResultWithHostname;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 默认等待预算
pub const DEFAULT_DISPATCH_WAIT: Duration = Duration::from_secs(2);

/// 默认结果通道容量
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// 有限等待发送的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// 接收方已接收
    Delivered,
    /// 等待预算耗尽
    TimedOut,
    /// 等待期间收到关闭信号
    Cancelled,
    /// 接收方已关闭
    Closed,
}

/// 在等待预算内发送一条消息
///
/// 关闭信号优先检查，等待期间到达的关闭不会被发送结果掩盖
///
/// # 参数
/// * `tx` - 发送端
/// * `item` - 消息
/// * `wait` - 等待预算
/// * `shutdown` - 关闭令牌
pub async fn send_with_deadline<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    wait: Duration,
    shutdown: &CancellationToken,
) -> SendOutcome {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => SendOutcome::Cancelled,
        sent = tx.send(item) => match sent {
            Ok(()) => SendOutcome::Delivered,
            Err(_) => SendOutcome::Closed,
        },
        _ = tokio::time::sleep(wait) => SendOutcome::TimedOut,
    }
}

/// 投递参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// 结果通道容量
    pub capacity: usize,
    /// 交给传输层的等待预算
    pub wait: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
            wait: DEFAULT_DISPATCH_WAIT,
        }
    }
}

/// 消费者退出句柄，只会生效一次
#[derive(Debug, Clone)]
pub struct ExitHandle {
    token: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl ExitHandle {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 通知投递任务退出
    ///
    /// # 返回
    /// * `bool` - 本次调用关闭了句柄时返回 true；已关闭或上级令牌已取消时返回 false
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) || self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    /// 是否已经关闭（包括上级令牌取消）
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.token.is_cancelled()
    }

    /// 退出令牌
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// 消费者会话
pub struct Consumer {
    kind: String,
    messages: mpsc::Sender<ResultWithHostname>,
    errors: Option<mpsc::UnboundedReceiver<DispatchError>>,
    exit: ExitHandle,
    task: Option<JoinHandle<()>>,
}

impl Consumer {
    /// 启动投递任务
    ///
    /// # 参数
    /// * `transport` - 传输层
    /// * `settings` - 投递参数
    /// * `parent` - 上级关闭令牌，取消时投递任务随之退出
    pub fn start(
        transport: Arc<dyn Transport>,
        settings: DispatchSettings,
        parent: &CancellationToken,
    ) -> Self {
        let kind = transport.kind().to_string();
        let (messages, inbound) = mpsc::channel(settings.capacity.max(1));
        let (error_tx, errors) = mpsc::unbounded_channel();
        let exit = ExitHandle::new(parent.child_token());

        info!(
            "启动消费者: {}，通道容量 {}，等待预算 {:?}",
            kind, settings.capacity, settings.wait
        );
        let task = tokio::spawn(dispatch_loop(
            transport,
            inbound,
            error_tx,
            settings.wait,
            exit.token().clone(),
        ));

        Self {
            kind,
            messages,
            errors: Some(errors),
            exit,
            task: Some(task),
        }
    }

    /// 传输层类型
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// 结果通道的发送端
    pub fn message_channel(&self) -> mpsc::Sender<ResultWithHostname> {
        self.messages.clone()
    }

    /// 退出句柄
    pub fn exit_handle(&self) -> ExitHandle {
        self.exit.clone()
    }

    /// 取走错误通道的接收端，只能取一次
    pub fn take_error_channel(&mut self) -> Option<mpsc::UnboundedReceiver<DispatchError>> {
        self.errors.take()
    }

    /// 关闭并等待投递任务退出
    pub async fn unload(&mut self) {
        self.exit.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("消费者 {} 投递任务异常退出: {}", self.kind, e);
            }
        }
        debug!("消费者已卸载: {}", self.kind);
    }
}

async fn dispatch_loop(
    transport: Arc<dyn Transport>,
    mut inbound: mpsc::Receiver<ResultWithHostname>,
    errors: mpsc::UnboundedSender<DispatchError>,
    wait: Duration,
    exit: CancellationToken,
) {
    let outbound = transport.inbound();

    loop {
        let item = tokio::select! {
            biased;
            _ = exit.cancelled() => break,
            item = inbound.recv() => item,
        };
        let Some(item) = item else { break };

        let service = item.result.service_name().to_string();
        let message = TransportMessage {
            severity: item.result.status.code(),
            host: item.hostname,
            service: service.clone(),
            message: item.result.message,
            status: errors.clone(),
        };

        match send_with_deadline(&outbound, message, wait, &exit).await {
            SendOutcome::Delivered => debug!("结果已交给传输层: {}", service),
            SendOutcome::TimedOut => {
                warn!(
                    "传输层 {} 未在 {:?} 内接收消息，丢弃: {}",
                    transport.kind(),
                    wait,
                    service
                );
                let _ = errors.send(DispatchError::Timeout {
                    service,
                    waited_ms: wait.as_millis(),
                });
            }
            SendOutcome::Cancelled => break,
            SendOutcome::Closed => {
                error!("传输层 {} 已关闭，停止投递", transport.kind());
                let _ = errors.send(DispatchError::TransportClosed(transport.kind().to_string()));
                break;
            }
        }
    }

    debug!("投递任务已退出: {}", transport.kind());
}
