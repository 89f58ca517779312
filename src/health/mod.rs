//! 健康检测模块
//!
//! 提供检测器接口、检测结果、模板渲染、插件注册表和任务调度功能

pub mod checker;
pub mod context;
pub mod registry;
pub mod result;
pub mod scheduler;
pub mod template;

// 重新导出主要类型
pub use checker::Checker;
pub use context::{DoneReason, ProbeContext};
pub use registry::{CheckerConstructor, PluginRegistry, RegistryBuilder};
pub use result::{CheckResult, CheckerInfo, ResultWithHostname, Status};
pub use scheduler::{CheckScheduler, ScheduleDefaults, TaskState};
pub use template::{render_error, MessageTemplate, TemplateSet};
