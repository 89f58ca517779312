//! 消费者模块
//!
//! 检测结果经由消费者的投递任务交给传输层，发往监控服务端

pub mod dispatch;
pub mod transport;

// 重新导出主要类型
pub use dispatch::{
    send_with_deadline, Consumer, DispatchSettings, ExitHandle, SendOutcome,
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_DISPATCH_WAIT,
};
pub use transport::{build_transport, LogTransport, Transport, TransportMessage, LOG_TRANSPORT};
