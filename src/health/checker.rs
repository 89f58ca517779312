//! 检测器接口定义
//!
//! 所有检测插件（命令、HTTP、进程）都实现同一个 `Checker` trait，
//! 调度器只依赖这个接口

use crate::health::context::ProbeContext;
use crate::health::result::CheckResult;
use async_trait::async_trait;
use std::time::Duration;

/// 检测器trait，定义检测接口
#[async_trait]
pub trait Checker: Send + Sync {
    /// 插件类型标识，如 `HTTP`
    fn name(&self) -> &str;

    /// 运维人员为被监控服务指定的名称
    fn service_name(&self) -> &str;

    /// 检测间隔，`None` 时使用全局默认值
    fn periodicity(&self) -> Option<Duration> {
        None
    }

    /// 单次运行超时，`None` 时使用全局默认值
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// 执行一次检测
    ///
    /// # 参数
    /// * `ctx` - 运行上下文，结束后检测应尽快返回
    ///
    /// # 返回
    /// * `CheckResult` - 检测结果，失败也以结果的形式返回
    async fn run(&self, ctx: &ProbeContext) -> CheckResult;
}

#[cfg(test)]
pub(crate) use test_support::StaticChecker;
