//! Probe Agent - 可插拔的健康探测代理
//!
//! 按计划运行一组探测插件，把结果归一化为状态和消息后，
//! 通过消费者发往监控服务端：
//! - 命令、HTTP、进程三种内置检测器
//! - 可自定义的失败消息模板
//! - 有界等待的投递管道，传输层缓慢时不阻塞检测
//! - 基于取消令牌树的优雅关闭
//! - 结构化日志记录

pub mod cli;
pub mod config;
pub mod consumer;
pub mod core;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod logging;
pub mod plugins;

// 重新导出主要类型
pub use config::{Config, GlobalConfig};
pub use error::AgentError;
pub use health::{CheckResult, Checker, Status};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
