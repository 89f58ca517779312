//! 探测代理
//!
//! 把配置装配为运行中的系统：按插件注册表构造检测器，为每个消费者
//! 启动投递任务，再由调度器驱动全部检测器，直到收到关闭信号

use crate::config::Config;
use crate::consumer::{build_transport, Consumer};
use crate::error::{ConfigError, DispatchError, Result};
use crate::health::{CheckScheduler, Checker, PluginRegistry, ResultWithHostname};
use crate::lifecycle::ShutdownCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 关闭时等待任务退出的最长时间
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// 构造失败的检测项
#[derive(Debug)]
pub struct RejectedCheck {
    /// 插件类型
    pub plugin: String,
    /// 检测项名称（能读到时）
    pub name: Option<String>,
    /// 失败原因
    pub error: ConfigError,
}

/// 按配置构造全部检测器
///
/// 单个检测项构造失败不影响其他检测项
///
/// # 参数
/// * `config` - 配置
/// * `registry` - 插件注册表
///
/// # 返回
/// * 构造成功的检测器和构造失败的检测项
pub fn build_checkers(
    config: &Config,
    registry: &PluginRegistry,
) -> (Vec<Arc<dyn Checker>>, Vec<RejectedCheck>) {
    let mut checkers = Vec::new();
    let mut rejected = Vec::new();

    for plugin in &config.plugins {
        for check in &plugin.checks {
            match registry.create(&plugin.kind, check, plugin.config.as_ref()) {
                Ok(checker) => {
                    debug!(
                        "检测器已创建: {}/{}",
                        checker.name(),
                        checker.service_name()
                    );
                    checkers.push(checker);
                }
                Err(e) => {
                    let name = check
                        .get("name")
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    error!(
                        "创建检测器失败 {}/{}: {}",
                        plugin.kind,
                        name.as_deref().unwrap_or("?"),
                        e
                    );
                    rejected.push(RejectedCheck {
                        plugin: plugin.kind.clone(),
                        name,
                        error: e,
                    });
                }
            }
        }
    }

    (checkers, rejected)
}

/// 探测代理
pub struct Agent {
    config: Config,
    checkers: Vec<Arc<dyn Checker>>,
}

impl Agent {
    /// 由配置装配代理
    ///
    /// 没有任何可运行的检测器时返回错误
    pub fn build(config: Config, registry: &PluginRegistry) -> Result<Self> {
        let (checkers, rejected) = build_checkers(&config, registry);
        if checkers.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "没有可运行的检测器（{} 个检测项构造失败）",
                rejected.len()
            ))
            .into());
        }
        if !rejected.is_empty() {
            warn!("{} 个检测项构造失败，已跳过", rejected.len());
        }

        Ok(Self { config, checkers })
    }

    /// 已装配的检测器
    pub fn checkers(&self) -> &[Arc<dyn Checker>] {
        &self.checkers
    }

    /// 运行直到关闭协调器被触发
    ///
    /// # 参数
    /// * `coordinator` - 关闭协调器，由调用方或信号处理器触发
    pub async fn run(self, coordinator: ShutdownCoordinator) -> Result<()> {
        let global = &self.config.global;
        let hostname = global.resolved_hostname();
        let settings = global.dispatch_settings();
        let root = coordinator.token();
        let tracker = coordinator.tracker();

        let mut consumers = Vec::new();
        for consumer_config in &self.config.consumers {
            let transport =
                build_transport(consumer_config, settings.capacity, root.clone(), &tracker)?;
            let mut consumer = Consumer::start(transport, settings, &root);
            if let Some(errors) = consumer.take_error_channel() {
                coordinator.spawn(drain_errors(
                    consumer.kind().to_string(),
                    errors,
                    root.clone(),
                ));
            }
            consumers.push(consumer);
        }

        let (results_tx, results_rx) = mpsc::channel(settings.capacity.max(1));
        let outlets: Vec<_> = consumers.iter().map(Consumer::message_channel).collect();
        coordinator.spawn(fan_out(results_rx, outlets, root.clone()));

        let scheduler = CheckScheduler::new(
            hostname.clone(),
            global.schedule_defaults(),
            results_tx,
            root.clone(),
            tracker,
        );
        info!(
            "探测代理启动，主机名 {}，检测器 {} 个，消费者 {} 个",
            hostname,
            self.checkers.len(),
            consumers.len()
        );
        scheduler.start(self.checkers.clone()).await;
        drop(scheduler);

        root.cancelled().await;
        info!("探测代理开始关闭");

        for consumer in &mut consumers {
            consumer.unload().await;
        }
        coordinator.wait(SHUTDOWN_TIMEOUT).await;

        info!("探测代理已停止");
        Ok(())
    }
}

/// 把调度器产生的结果分发给每个消费者
async fn fan_out(
    mut results: mpsc::Receiver<ResultWithHostname>,
    outlets: Vec<mpsc::Sender<ResultWithHostname>>,
    shutdown: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            item = results.recv() => item,
        };
        let Some(item) = item else { break };

        for outlet in &outlets {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                sent = outlet.send(item.clone()) => {
                    if sent.is_err() {
                        debug!("消费者结果通道已关闭");
                    }
                }
            }
        }
    }
}

/// 记录消费者回报的投递错误
async fn drain_errors(
    kind: String,
    mut errors: mpsc::UnboundedReceiver<DispatchError>,
    shutdown: CancellationToken,
) {
    loop {
        let err = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            err = errors.recv() => err,
        };
        match err {
            Some(err) => warn!("消费者 {} 投递失败: {}", kind, err),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(src: &str) -> Config {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn test_build_checkers_skips_invalid_entries() {
        let config = config(
            r#"
[[consumers]]
type = "log"

[[plugins]]
type = "command"
[[plugins.checks]]
name = "ok"
command = "/bin/true"
[[plugins.checks]]
name = "broken"
command = "echo \"unterminated"

[[plugins]]
type = "ftp"
[[plugins.checks]]
name = "nope"
"#,
        );

        let (checkers, rejected) = build_checkers(&config, PluginRegistry::global());
        assert_eq!(checkers.len(), 1);
        assert_eq!(checkers[0].service_name(), "ok");
        assert_eq!(rejected.len(), 2);
        assert!(matches!(rejected[0].error, ConfigError::InvalidCommand { .. }));
        assert!(matches!(rejected[1].error, ConfigError::UnknownPlugin(_)));
        assert_eq!(rejected[1].name.as_deref(), Some("nope"));
    }

    #[test]
    fn test_build_without_runnable_checkers_fails() {
        let config = config(
            r#"
[[consumers]]
type = "log"

[[plugins]]
type = "ftp"
[[plugins.checks]]
name = "nope"
"#,
        );
        assert!(Agent::build(config, PluginRegistry::global()).is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_trigger() {
        let config = config(
            r#"
[global]
hostname = "test-host"
periodicity_seconds = 1

[[consumers]]
type = "log"

[[plugins]]
type = "Command"
[[plugins.checks]]
name = "true"
command = "/bin/true"
"#,
        );
        let agent = Agent::build(config, PluginRegistry::global()).unwrap();
        assert_eq!(agent.checkers().len(), 1);

        let coordinator = ShutdownCoordinator::new();
        let handle = tokio::spawn(agent.run(coordinator.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(coordinator.trigger());
        tokio::time::timeout(Duration::from_secs(6), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
