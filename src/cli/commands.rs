//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::cli::args::{Args, Commands, OutputFormat};
use crate::config::{Config, ConfigLoader, TomlConfigLoader};
use crate::core::agent::{build_checkers, Agent};
use crate::error::{ConfigError, Result};
use crate::health::scheduler::check_batch;
use crate::health::{CheckResult, PluginRegistry, Status};
use crate::lifecycle::{setup_signal_handlers, ShutdownCoordinator};
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use tracing::info;

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 加载并验证配置文件
async fn load_config(path: &Path) -> Result<Config> {
    let loader = TomlConfigLoader::new(true);
    loader.load_from_file(path).await
}

/// 运行命令
pub struct RunCommand;

#[async_trait]
impl Command for RunCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let config = load_config(&args.get_config_path()).await?;
        let agent = Agent::build(config, PluginRegistry::global())?;

        let coordinator = ShutdownCoordinator::new();
        setup_signal_handlers(coordinator.clone())?;
        info!("探测代理已就绪，等待 SIGINT/SIGTERM 退出");

        agent.run(coordinator).await
    }
}

/// 检测命令
pub struct CheckCommand;

#[async_trait]
impl Command for CheckCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Check { service, format } = &args.command {
            self.perform_check(args, service.as_deref(), *format).await
        } else {
            Ok(())
        }
    }
}

impl CheckCommand {
    /// 执行一次性检测
    async fn perform_check(
        &self,
        args: &Args,
        service_name: Option<&str>,
        format: OutputFormat,
    ) -> Result<()> {
        let config = load_config(&args.get_config_path()).await?;
        let (checkers, rejected) = build_checkers(&config, PluginRegistry::global());
        for entry in &rejected {
            eprintln!(
                "✗ {}/{}: {}",
                entry.plugin,
                entry.name.as_deref().unwrap_or("?"),
                entry.error
            );
        }

        let selected: Vec<_> = checkers
            .into_iter()
            .filter(|c| service_name.is_none_or(|name| c.service_name() == name))
            .collect();

        if selected.is_empty() {
            if let Some(name) = service_name {
                eprintln!("未找到名为 '{name}' 的检测项");
            } else {
                eprintln!("未找到任何可运行的检测项");
            }
            return Ok(());
        }

        let results = check_batch(&selected, config.global.schedule_defaults()).await;
        let hostname = config.global.resolved_hostname();

        match format {
            OutputFormat::Json => {
                let records: Vec<_> = results
                    .iter()
                    .map(|result| result_record(result, &hostname))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
            OutputFormat::Text => print_text_results(&results),
        }

        Ok(())
    }
}

/// 单个结果的JSON记录
fn result_record(result: &CheckResult, hostname: &str) -> serde_json::Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "host": hostname,
        "plugin": result.checker.plugin,
        "service": result.checker.service,
        "status": result.status,
        "code": result.status.code(),
        "message": result.message,
    })
}

/// 打印文本格式结果
fn print_text_results(results: &[CheckResult]) {
    for result in results {
        let status_icon = if result.status.is_ok() { "✓" } else { "✗" };
        println!(
            "{} {}/{} [{}] {}",
            status_icon,
            result.checker.plugin,
            result.checker.service,
            result.status,
            result.message
        );
    }
    let failed = results.iter().filter(|r| r.status != Status::Ok).count();
    println!("共 {} 项，异常 {} 项", results.len(), failed);
}

/// 验证命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Validate { verbose } = &args.command {
            self.validate_config_file(&args.get_config_path(), *verbose)
                .await
        } else {
            Ok(())
        }
    }
}

impl ValidateCommand {
    /// 验证配置文件并尝试构造每个检测器
    async fn validate_config_file(&self, config_path: &Path, verbose: bool) -> Result<()> {
        println!("验证配置文件: {}", config_path.display());

        let config = load_config(config_path).await?;
        let (checkers, rejected) = build_checkers(&config, PluginRegistry::global());

        if verbose {
            println!("全局配置:");
            println!("  主机名: {}", config.global.resolved_hostname());
            println!("  检测间隔: {}秒", config.global.periodicity_seconds);
            println!("  运行超时: {}毫秒", config.global.timeout_ms);
            println!("  通道容量: {}", config.global.channel_capacity);
            println!("  投递等待: {}毫秒", config.global.dispatch_timeout_ms);
            println!("消费者:");
            for consumer in &config.consumers {
                println!("  - {} ({}:{})", consumer.kind, consumer.server, consumer.port);
            }
            println!("检测器:");
            for checker in &checkers {
                println!("  - {}/{}", checker.name(), checker.service_name());
            }
        }

        for entry in &rejected {
            println!(
                "✗ {}/{}: {}",
                entry.plugin,
                entry.name.as_deref().unwrap_or("?"),
                entry.error
            );
        }
        if !rejected.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} 个检测项无法构造",
                rejected.len()
            ))
            .into());
        }

        println!("✓ 配置文件验证通过");
        println!("✓ 找到 {} 个检测器", checkers.len());
        Ok(())
    }
}

/// 插件列表命令
pub struct PluginsCommand;

#[async_trait]
impl Command for PluginsCommand {
    async fn execute(&self, _args: &Args) -> Result<()> {
        for name in PluginRegistry::global().names() {
            println!("{name}");
        }
        Ok(())
    }
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Version { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    let version_info = json!({
                        "name": crate::APP_NAME,
                        "version": crate::VERSION,
                        "description": crate::APP_DESCRIPTION,
                        "plugins": PluginRegistry::global().names(),
                    });
                    println!("{}", serde_json::to_string_pretty(&version_info)?);
                }
                OutputFormat::Text => {
                    println!("{} v{}", crate::APP_NAME, crate::VERSION);
                    println!("{}", crate::APP_DESCRIPTION);
                }
            }
        }
        Ok(())
    }
}
