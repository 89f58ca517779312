//! 核心模块
//!
//! 包含应用程序的核心逻辑和生命周期管理

pub mod agent;
pub mod app;

// 重新导出主要类型
pub use agent::{build_checkers, Agent, RejectedCheck};
pub use app::execute_command;
