//! 检测插件模块
//!
//! 内置的命令、HTTP和进程检测器，以及插件共用的配置解码逻辑

pub mod command;
pub mod http;
pub mod processes;

use crate::error::ConfigError;
use crate::health::RegistryBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// 重新导出主要类型
pub use command::CommandChecker;
pub use http::HttpChecker;
pub use processes::ProcessesChecker;

/// 注册全部内置插件
pub fn register_builtin(builder: &mut RegistryBuilder) -> Result<(), ConfigError> {
    builder.register(command::PLUGIN_NAME, command::new_checker)?;
    builder.register(http::PLUGIN_NAME, http::new_checker)?;
    builder.register(processes::PLUGIN_NAME, processes::new_checker)?;
    Ok(())
}

/// 所有检测项共有的配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommonConfig {
    /// 服务名称
    pub name: String,
    /// 检测间隔（秒）
    #[serde(default)]
    pub periodicity: Option<u64>,
    /// 单次运行超时（毫秒）
    #[serde(default)]
    pub timeout: Option<u64>,
    /// 失败情况到消息模板的映射
    #[serde(default)]
    pub templates: HashMap<String, String>,
}

impl CommonConfig {
    /// 检测间隔
    pub fn periodicity(&self) -> Option<Duration> {
        self.periodicity.map(Duration::from_secs)
    }

    /// 单次运行超时
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    /// 校验共有字段
    pub fn validate(&self, plugin: &str) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::plugin(plugin, "检测名称不能为空"));
        }
        if self.periodicity == Some(0) {
            return Err(ConfigError::plugin(plugin, "检测间隔不能为0"));
        }
        if self.timeout == Some(0) {
            return Err(ConfigError::plugin(plugin, "超时时间不能为0"));
        }
        Ok(())
    }
}

/// 将插件级配置作为默认值合并到检测项配置中，检测项中的同名键优先
pub fn merge_plugin_defaults(check: &toml::Value, plugin: Option<&toml::Value>) -> toml::Value {
    let (Some(toml::Value::Table(defaults)), toml::Value::Table(own)) = (plugin, check) else {
        return check.clone();
    };

    let mut merged = defaults.clone();
    for (key, value) in own {
        merged.insert(key.clone(), value.clone());
    }
    toml::Value::Table(merged)
}

/// 将无类型的配置解码为插件的强类型配置
pub fn decode<T: DeserializeOwned>(
    plugin: &str,
    check: &toml::Value,
    plugin_config: Option<&toml::Value>,
) -> Result<T, ConfigError> {
    merge_plugin_defaults(check, plugin_config)
        .try_into()
        .map_err(|e| ConfigError::plugin(plugin, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_plugin_defaults() {
        let check: toml::Value = toml::from_str("name = \"api\"\ntimeout = 100").unwrap();
        let plugin: toml::Value = toml::from_str("timeout = 500\nperiodicity = 30").unwrap();

        let merged = merge_plugin_defaults(&check, Some(&plugin));
        assert_eq!(merged.get("timeout").and_then(|v| v.as_integer()), Some(100));
        assert_eq!(merged.get("periodicity").and_then(|v| v.as_integer()), Some(30));
        assert_eq!(merged.get("name").and_then(|v| v.as_str()), Some("api"));
    }

    #[test]
    fn test_decode_common_config() {
        let check: toml::Value = toml::from_str("name = \"api\"\nperiodicity = 15").unwrap();
        let cfg: CommonConfig = decode("Test", &check, None).unwrap();
        assert_eq!(cfg.name, "api");
        assert_eq!(cfg.periodicity(), Some(Duration::from_secs(15)));
        assert_eq!(cfg.timeout(), None);
        assert!(cfg.validate("Test").is_ok());
    }

    #[test]
    fn test_decode_missing_name() {
        let check: toml::Value = toml::from_str("periodicity = 15").unwrap();
        let err = decode::<CommonConfig>("Test", &check, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPluginConfig { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let check: toml::Value = toml::from_str("name = \"api\"\ntimeout = 0").unwrap();
        let cfg: CommonConfig = decode("Test", &check, None).unwrap();
        assert!(cfg.validate("Test").is_err());
    }
}
