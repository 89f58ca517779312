//! 进程生命周期模块
//!
//! 关闭协调和信号处理

pub mod shutdown;
pub mod signals;

// 重新导出主要类型
pub use shutdown::ShutdownCoordinator;
pub use signals::setup_signal_handlers;
