//! 传输层接口
//!
//! 消费者只依赖一个很窄的发送接口：向传输层的入口通道写入消息，
//! 失败由传输层通过消息携带的状态通道回报

use crate::config::ConsumerConfig;
use crate::error::{ConfigError, DispatchError};
use crate::health::Status;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 日志传输层的类型名
pub const LOG_TRANSPORT: &str = "log";

/// 交给传输层的单条消息
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// 严重级别代码（0-3）
    pub severity: i16,
    /// 主机名
    pub host: String,
    /// 服务名
    pub service: String,
    /// 附加消息
    pub message: String,
    /// 发送失败时的回报通道
    pub status: mpsc::UnboundedSender<DispatchError>,
}

/// 传输层
pub trait Transport: Send + Sync {
    /// 传输层类型
    fn kind(&self) -> &str;

    /// 消息入口
    fn inbound(&self) -> mpsc::Sender<TransportMessage>;
}

/// 把每条消息写入日志的传输层
///
/// 不连接任何监控服务端，用于本地运行和调试
/// 目标地址、加密方式和连接超时取自消费者配置，只用于日志
#[derive(Debug)]
pub struct LogTransport {
    endpoint: String,
    encryption: u32,
    connect_timeout: Duration,
    sender: mpsc::Sender<TransportMessage>,
}

impl LogTransport {
    /// 启动日志传输层
    ///
    /// # 参数
    /// * `config` - 消费者配置
    /// * `capacity` - 入口通道容量
    /// * `shutdown` - 关闭令牌
    /// * `tracker` - 任务跟踪器
    pub fn start(
        config: &ConsumerConfig,
        capacity: usize,
        shutdown: CancellationToken,
        tracker: &TaskTracker,
    ) -> Self {
        let endpoint = config.endpoint();
        let encryption = config.encryption;
        let (sender, mut receiver) = mpsc::channel::<TransportMessage>(capacity.max(1));

        let target = endpoint.clone();
        tracker.spawn(async move {
            debug!("日志传输层已启动: {}", target);
            loop {
                let message = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    message = receiver.recv() => message,
                };
                let Some(message) = message else { break };
                deliver(&target, encryption, message);
            }
            debug!("日志传输层已停止: {}", target);
        });

        Self {
            endpoint,
            encryption,
            connect_timeout: config.connect_timeout(),
            sender,
        }
    }

    /// 目标地址
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 加密方式
    pub fn encryption(&self) -> u32 {
        self.encryption
    }

    /// 连接超时
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

fn deliver(target: &str, encryption: u32, message: TransportMessage) {
    if !(0..=3).contains(&message.severity) {
        let _ = message.status.send(DispatchError::Rejected {
            service: message.service.clone(),
            reason: format!("invalid severity {}", message.severity),
        });
        return;
    }

    let status = Status::from_code(message.severity);
    info!(
        target: "probe_agent::transport",
        endpoint = target,
        encryption,
        host = %message.host,
        service = %message.service,
        status = %status,
        "{}",
        message.message
    );
}

impl Transport for LogTransport {
    fn kind(&self) -> &str {
        LOG_TRANSPORT
    }

    fn inbound(&self) -> mpsc::Sender<TransportMessage> {
        self.sender.clone()
    }
}

/// 按消费者配置创建传输层
///
/// # 参数
/// * `config` - 消费者配置
/// * `capacity` - 入口通道容量
/// * `shutdown` - 关闭令牌
/// * `tracker` - 任务跟踪器
pub fn build_transport(
    config: &ConsumerConfig,
    capacity: usize,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
) -> Result<Arc<dyn Transport>, ConfigError> {
    match config.kind.to_ascii_lowercase().as_str() {
        LOG_TRANSPORT => {
            info!(
                "创建日志传输层: {}，加密方式 {}，密钥{}，连接超时 {:?}",
                config.endpoint(),
                config.encryption,
                if config.key.is_empty() { "未配置" } else { "已配置" },
                config.connect_timeout()
            );
            Ok(Arc::new(LogTransport::start(
                config, capacity, shutdown, tracker,
            )))
        }
        other => {
            warn!("未知的消费者类型: {}", other);
            Err(ConfigError::UnknownConsumer(config.kind.clone()))
        }
    }
}
