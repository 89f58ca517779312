//! 应用程序核心逻辑
//!
//! 包含主函数、命令执行和应用程序生命周期管理

use crate::cli::args::{Args, Commands};
use crate::cli::commands::{
    CheckCommand, Command, PluginsCommand, RunCommand, ValidateCommand, VersionCommand,
};
use crate::config::{ConfigLoader, TomlConfigLoader};
use crate::logging::{parse_level, LogConfig, LoggingSystem};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

/// 应用程序主函数
pub async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 初始化日志系统
    let log_config = LogConfig {
        level: resolve_log_level(&args).await,
        console: true,
        json_format: args.json_logs,
        ..Default::default()
    };

    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    info!("Probe Agent v{} 启动", crate::VERSION);

    // 执行命令
    if let Err(e) = execute_command(&args).await {
        error!("命令执行失败: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// 命令行优先，其次为配置文件中的级别
async fn resolve_log_level(args: &Args) -> log::LevelFilter {
    if let Some(level) = args.log_level {
        return level.into();
    }
    if !matches!(args.command, Commands::Run | Commands::Check { .. }) {
        return log::LevelFilter::Info;
    }

    let loader = TomlConfigLoader::new(true);
    match loader.load_from_file(args.get_config_path()).await {
        Ok(config) => parse_level(&config.global.log_level),
        Err(_) => log::LevelFilter::Info,
    }
}

/// 执行CLI命令
pub async fn execute_command(args: &Args) -> Result<()> {
    let command: &dyn Command = match &args.command {
        Commands::Run => &RunCommand,
        Commands::Check { .. } => &CheckCommand,
        Commands::Validate { .. } => &ValidateCommand,
        Commands::Plugins => &PluginsCommand,
        Commands::Version { .. } => &VersionCommand,
    };

    command.execute(args).await.map_err(anyhow::Error::from)
}
