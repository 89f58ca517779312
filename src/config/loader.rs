//! 配置加载器实现
//!
//! 提供TOML配置文件解析、环境变量替换和错误处理功能

use crate::config::types::{validate_config, Config};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};

/// 配置加载器trait，定义配置加载接口
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// 从文件加载配置
    ///
    /// # 参数
    /// * `path` - 配置文件路径
    ///
    /// # 返回
    /// * `Result<Config>` - 加载的配置或错误
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<Config>;

    /// 从字符串加载配置
    ///
    /// # 参数
    /// * `content` - 配置文件内容
    ///
    /// # 返回
    /// * `Result<Config>` - 加载的配置或错误
    async fn load_from_string(&self, content: &str) -> Result<Config>;

    /// 验证配置
    ///
    /// # 参数
    /// * `config` - 要验证的配置
    ///
    /// # 返回
    /// * `Result<()>` - 验证结果
    fn validate(&self, config: &Config) -> Result<()>;
}

/// TOML配置加载器实现
#[derive(Debug, Clone)]
pub struct TomlConfigLoader {
    /// 是否启用环境变量替换
    enable_env_substitution: bool,
}

impl TomlConfigLoader {
    /// 创建新的TOML配置加载器
    ///
    /// # 参数
    /// * `enable_env_substitution` - 是否启用环境变量替换
    ///
    /// # 返回
    /// * `Self` - 配置加载器实例
    pub fn new(enable_env_substitution: bool) -> Self {
        Self {
            enable_env_substitution,
        }
    }

    /// 替换配置中的环境变量
    ///
    /// 只替换字符串值中的 `${VAR}`。全局、消费者和插件级配置中引用未设置的变量
    /// 时整个加载失败；`[[plugins.checks]]` 中未设置的变量原样保留，交给插件处理，
    /// 单个检测项不会拖垮整个配置
    ///
    /// # 参数
    /// * `document` - 已解析的TOML文档
    ///
    /// # 返回
    /// * `Result<()>` - 替换结果
    fn substitute_env_vars(&self, document: &mut toml::Table) -> Result<()> {
        if !self.enable_env_substitution {
            return Ok(());
        }

        // 匹配 ${VAR_NAME} 格式的环境变量，命令行里的 $VAR 留给插件展开
        let env_var_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| ConfigError::ParseError(format!("正则表达式错误: {}", e)))?;

        for (key, value) in document.iter_mut() {
            if key != "plugins" {
                substitute_value(&env_var_regex, value, false)?;
                continue;
            }
            let Some(plugins) = value.as_array_mut() else {
                continue;
            };
            for plugin in plugins.iter_mut().filter_map(toml::Value::as_table_mut) {
                for (field, entry) in plugin.iter_mut() {
                    substitute_value(&env_var_regex, entry, field == "checks")?;
                }
            }
        }

        Ok(())
    }

    /// 解析TOML内容
    ///
    /// # 参数
    /// * `content` - TOML内容
    ///
    /// # 返回
    /// * `Result<Config>` - 解析的配置或错误
    fn parse_toml(&self, content: &str) -> Result<Config> {
        let mut document: toml::Table = toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("TOML解析失败: {}", e)))?;

        // 替换环境变量
        self.substitute_env_vars(&mut document)?;

        let config: Config = toml::Value::Table(document)
            .try_into()
            .map_err(|e| ConfigError::ParseError(format!("TOML解析失败: {}", e)))?;

        Ok(config)
    }
}

/// 递归替换值中的环境变量
///
/// # 参数
/// * `regex` - 环境变量匹配规则
/// * `value` - 要处理的值
/// * `keep_unset` - 未设置的变量是否原样保留
fn substitute_value(regex: &Regex, value: &mut toml::Value, keep_unset: bool) -> Result<()> {
    match value {
        toml::Value::String(text) => {
            let mut result = text.clone();
            for captures in regex.captures_iter(text) {
                let full_match = &captures[0];
                let var_name = &captures[1];

                match std::env::var(var_name) {
                    Ok(env_value) => result = result.replace(full_match, &env_value),
                    Err(_) if keep_unset => {}
                    Err(_) => {
                        return Err(ConfigError::EnvVarError {
                            var: var_name.to_string(),
                        }
                        .into());
                    }
                }
            }
            *text = result;
        }
        toml::Value::Array(items) => {
            for item in items {
                substitute_value(regex, item, keep_unset)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                substitute_value(regex, item, keep_unset)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[async_trait]
impl ConfigLoader for TomlConfigLoader {
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<Config> {
        let path = path.as_ref();

        // 检查文件是否存在
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            }
            .into());
        }

        // 读取文件内容
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::ParseError(format!("读取文件失败: {}", e)))?;

        // 解析配置
        let config = self.parse_toml(&content)?;

        // 验证配置
        self.validate(&config)?;

        log::info!(
            "成功加载配置文件: {}，消费者 {} 个，插件 {} 个",
            path.display(),
            config.consumers.len(),
            config.plugins.len()
        );
        log::debug!("配置内容: {:?}", config);

        Ok(config)
    }

    async fn load_from_string(&self, content: &str) -> Result<Config> {
        // 解析配置
        let config = self.parse_toml(content)?;

        // 验证配置
        self.validate(&config)?;

        log::debug!("成功解析配置字符串");

        Ok(config)
    }

    fn validate(&self, config: &Config) -> Result<()> {
        validate_config(config).map_err(|e| ConfigError::ValidationError(e).into())
    }
}

/// 获取默认配置文件路径
///
/// 当前目录存在 `config.toml` 时优先使用，否则为用户配置目录下的 `probe-agent/config.toml`
pub fn get_default_config_path() -> PathBuf {
    let local = Path::new("config.toml");
    if local.exists() {
        return local.to_path_buf();
    }
    dirs::config_dir()
        .map(|config_dir| config_dir.join(crate::APP_NAME).join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;

    const TEST_CONFIG_TOML: &str = r#"
[global]
hostname = "web-01"
periodicity_seconds = 30
log_level = "debug"

[[consumers]]
type = "log"
server = "nsca.example.com"

[[plugins]]
type = "HTTP"
[plugins.config]
timeout = 500

[[plugins.checks]]
name = "api"
url = "http://localhost:8080/health"
warn = 200
crit = 400

[[plugins]]
type = "Processes"
[[plugins.checks]]
name = "nginx"
exec = "/usr/sbin/nginx"
args = "-g daemon off;"
"#;

    const TEST_CONFIG_WITH_ENV_VARS: &str = r#"
[[consumers]]
type = "log"
key = "${PROBE_AGENT_TEST_KEY}"

[[plugins]]
type = "Command"
[[plugins.checks]]
name = "disk"
command = "df -h $HOME"
"#;

    #[tokio::test]
    async fn test_toml_parsing() {
        let loader = TomlConfigLoader::new(false);
        let config = loader.load_from_string(TEST_CONFIG_TOML).await.unwrap();

        assert_eq!(config.global.periodicity_seconds, 30);
        assert_eq!(config.global.log_level, "debug");
        assert_eq!(config.consumers[0].server, "nsca.example.com");
        assert_eq!(config.plugins.len(), 2);
        assert_eq!(config.plugins[0].kind, "HTTP");
        assert_eq!(
            config.plugins[0]
                .config
                .as_ref()
                .and_then(|c| c.get("timeout"))
                .and_then(|v| v.as_integer()),
            Some(500)
        );
        assert_eq!(
            config.plugins[1].checks[0].get("args").and_then(|v| v.as_str()),
            Some("-g daemon off;")
        );
    }

    #[tokio::test]
    async fn test_env_var_substitution() {
        env::set_var("PROBE_AGENT_TEST_KEY", "secret-123");

        let loader = TomlConfigLoader::new(true);
        let config = loader
            .load_from_string(TEST_CONFIG_WITH_ENV_VARS)
            .await
            .unwrap();

        assert_eq!(config.consumers[0].key, "secret-123");
        assert_eq!(
            config.plugins[0].checks[0].get("command").and_then(|v| v.as_str()),
            Some("df -h $HOME")
        );

        env::remove_var("PROBE_AGENT_TEST_KEY");
    }

    #[tokio::test]
    async fn test_env_var_substitution_missing_var() {
        let loader = TomlConfigLoader::new(true);
        let result = loader
            .load_from_string(
                "[[consumers]]\ntype = \"log\"\nkey = \"${PROBE_AGENT_MISSING_VAR}\"\n",
            )
            .await;

        assert!(result.is_err());
        if let Err(e) = result {
            assert!(e.to_string().contains("PROBE_AGENT_MISSING_VAR"));
        }
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TEST_CONFIG_TOML.as_bytes()).unwrap();

        let loader = TomlConfigLoader::new(true);
        let config = loader.load_from_file(file.path()).await.unwrap();
        assert_eq!(config.global.resolved_hostname(), "web-01");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let loader = TomlConfigLoader::new(true);
        let err = loader
            .load_from_file("/nonexistent/probe-agent.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::AgentError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_validation_failure() {
        let loader = TomlConfigLoader::new(false);
        let err = loader
            .load_from_string("[global]\nperiodicity_seconds = 0\n")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::AgentError::Config(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_substitute_env_vars_disabled() {
        let loader = TomlConfigLoader::new(false);
        let mut document: toml::Table =
            toml::from_str("key = \"test ${PROBE_AGENT_DISABLED_VAR} content\"").unwrap();
        loader.substitute_env_vars(&mut document).unwrap();
        assert_eq!(
            document["key"].as_str(),
            Some("test ${PROBE_AGENT_DISABLED_VAR} content")
        );
    }

    #[tokio::test]
    async fn test_unset_var_in_check_keeps_other_checks() {
        env::set_var("PROBE_AGENT_TEST_TARGET", "/tmp");
        env::remove_var("PROBE_AGENT_UNSET_CHECK_VAR");

        let loader = TomlConfigLoader::new(true);
        let config = loader
            .load_from_string(
                r#"
[[consumers]]
type = "log"

[[plugins]]
type = "Command"
[[plugins.checks]]
name = "good"
command = "/bin/true"
[[plugins.checks]]
name = "unset"
command = "echo ${PROBE_AGENT_UNSET_CHECK_VAR}"
[[plugins.checks]]
name = "target"
command = "ls ${PROBE_AGENT_TEST_TARGET}"
"#,
            )
            .await
            .unwrap();

        let checks = &config.plugins[0].checks;
        assert_eq!(
            checks[1].get("command").and_then(|v| v.as_str()),
            Some("echo ${PROBE_AGENT_UNSET_CHECK_VAR}")
        );
        assert_eq!(
            checks[2].get("command").and_then(|v| v.as_str()),
            Some("ls /tmp")
        );

        let (checkers, rejected) = crate::core::agent::build_checkers(
            &config,
            crate::health::PluginRegistry::global(),
        );
        assert!(rejected.is_empty());
        assert_eq!(checkers.len(), 3);

        env::remove_var("PROBE_AGENT_TEST_TARGET");
    }

    #[tokio::test]
    async fn test_unset_var_in_plugin_config_fails() {
        let loader = TomlConfigLoader::new(true);
        let result = loader
            .load_from_string(
                r#"
[[consumers]]
type = "log"

[[plugins]]
type = "HTTP"
[plugins.config]
url = "${PROBE_AGENT_UNSET_PLUGIN_VAR}"
[[plugins.checks]]
name = "api"
"#,
            )
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("PROBE_AGENT_UNSET_PLUGIN_VAR"));
    }

    #[test]
    fn test_get_default_config_path() {
        let path = get_default_config_path();
        assert!(path.to_string_lossy().contains("config.toml"));
    }
}
