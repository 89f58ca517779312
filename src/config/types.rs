//! 配置数据结构定义
//!
//! 定义应用程序的配置结构体和验证逻辑

use crate::consumer::DispatchSettings;
use crate::health::ScheduleDefaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 主配置结构，包含全局配置、消费者列表和插件列表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// 全局配置项
    #[serde(default)]
    pub global: GlobalConfig,
    /// 消费者配置列表
    #[serde(default)]
    pub consumers: Vec<ConsumerConfig>,
    /// 插件配置列表
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// 全局配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 结果附加的主机名，未设置时使用系统主机名
    pub hostname: Option<String>,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 默认检测间隔（秒）
    #[serde(default = "default_periodicity")]
    pub periodicity_seconds: u64,
    /// 默认单次运行超时（毫秒）
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// 消费者结果通道容量
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// 交给传输层的等待预算（毫秒）
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_ms: u64,
}

/// 消费者配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerConfig {
    /// 传输层类型
    #[serde(rename = "type")]
    pub kind: String,
    /// 监控服务端地址
    #[serde(default = "default_server")]
    pub server: String,
    /// 监控服务端端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 加密密钥，`encryption` 非0时必须配置
    #[serde(default)]
    pub key: String,
    /// 加密方式，0表示不加密
    #[serde(default)]
    pub encryption: u32,
    /// 连接超时（毫秒）
    #[serde(default = "default_consumer_timeout")]
    pub timeout_ms: u64,
}

/// 插件配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginConfig {
    /// 插件类型
    #[serde(rename = "type")]
    pub kind: String,
    /// 插件级配置，作为各检测项的默认值
    #[serde(default)]
    pub config: Option<toml::Value>,
    /// 检测项列表，每项的键由插件自行解释
    #[serde(default)]
    pub checks: Vec<toml::Value>,
}

// 默认值函数
fn default_log_level() -> String {
    "info".to_string()
}
fn default_periodicity() -> u64 {
    60
}
fn default_timeout() -> u64 {
    10_000
}
fn default_channel_capacity() -> usize {
    100
}
fn default_dispatch_timeout() -> u64 {
    2_000
}
fn default_server() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5667
}
fn default_consumer_timeout() -> u64 {
    1_000
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            log_level: default_log_level(),
            periodicity_seconds: default_periodicity(),
            timeout_ms: default_timeout(),
            channel_capacity: default_channel_capacity(),
            dispatch_timeout_ms: default_dispatch_timeout(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            kind: "log".to_string(),
            server: default_server(),
            port: default_port(),
            key: String::new(),
            encryption: 0,
            timeout_ms: default_consumer_timeout(),
        }
    }
}

impl GlobalConfig {
    /// 结果中使用的主机名
    pub fn resolved_hostname(&self) -> String {
        match &self.hostname {
            Some(hostname) if !hostname.trim().is_empty() => hostname.clone(),
            _ => system_hostname(),
        }
    }

    /// 调度默认值
    pub fn schedule_defaults(&self) -> ScheduleDefaults {
        ScheduleDefaults {
            periodicity: Duration::from_secs(self.periodicity_seconds),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    /// 投递参数
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            capacity: self.channel_capacity,
            wait: Duration::from_millis(self.dispatch_timeout_ms),
        }
    }
}

impl ConsumerConfig {
    /// 监控服务端地址，形如 `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// 连接超时
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 是否启用加密
    pub fn is_encrypted(&self) -> bool {
        self.encryption != 0
    }
}

#[cfg(unix)]
fn system_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(not(unix))]
fn system_hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &Config) -> Result<(), String> {
    // 验证全局配置
    if config.global.periodicity_seconds == 0 {
        return Err("检测间隔不能为0".to_string());
    }

    if config.global.timeout_ms == 0 {
        return Err("运行超时时间不能为0".to_string());
    }

    if config.global.channel_capacity == 0 {
        return Err("结果通道容量不能为0".to_string());
    }

    if config.global.dispatch_timeout_ms == 0 {
        return Err("投递等待时间不能为0".to_string());
    }

    // 验证日志级别
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&config.global.log_level.as_str()) {
        return Err(format!(
            "无效的日志级别: {}，有效值: {:?}",
            config.global.log_level, valid_log_levels
        ));
    }

    // 验证消费者配置
    if config.consumers.is_empty() {
        return Err("至少需要配置一个消费者".to_string());
    }
    for (index, consumer) in config.consumers.iter().enumerate() {
        if consumer.kind.trim().is_empty() {
            return Err(format!("消费者 #{} 缺少类型", index + 1));
        }
        if consumer.server.trim().is_empty() {
            return Err(format!("消费者 #{} 的服务端地址不能为空", index + 1));
        }
        if consumer.timeout_ms == 0 {
            return Err(format!("消费者 #{} 的连接超时不能为0", index + 1));
        }
        if consumer.is_encrypted() && consumer.key.is_empty() {
            return Err(format!(
                "消费者 #{} 启用了加密方式 {}，但未配置 key",
                index + 1,
                consumer.encryption
            ));
        }
    }

    // 验证插件配置
    if config.plugins.is_empty() {
        return Err("至少需要配置一个插件".to_string());
    }
    for plugin in &config.plugins {
        if plugin.kind.trim().is_empty() {
            return Err("插件缺少类型".to_string());
        }
        if plugin.checks.is_empty() {
            return Err(format!("插件 {} 没有配置检测项", plugin.kind));
        }
        for (index, check) in plugin.checks.iter().enumerate() {
            let has_name = check
                .get("name")
                .and_then(|v| v.as_str())
                .is_some_and(|name| !name.trim().is_empty());
            if !has_name {
                return Err(format!(
                    "插件 {} 的第 {} 个检测项缺少 name",
                    plugin.kind,
                    index + 1
                ));
            }
        }
    }

    Ok(())
}
