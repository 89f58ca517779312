//! 插件注册表
//!
//! 启动阶段由各插件注册构造函数，之后冻结为只读查找表

use crate::error::ConfigError;
use crate::health::checker::Checker;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error};

/// 检测器构造函数
///
/// 第一个参数为单个检测项的配置，第二个为插件级的全局配置（可选）
pub type CheckerConstructor =
    fn(&toml::Value, Option<&toml::Value>) -> Result<Arc<dyn Checker>, ConfigError>;

/// 全局插件注册表
static GLOBAL_REGISTRY: OnceLock<PluginRegistry> = OnceLock::new();

/// 注册阶段使用的构建器
#[derive(Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<String, (String, CheckerConstructor)>,
}

impl RegistryBuilder {
    /// 创建空的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册插件
    ///
    /// # 参数
    /// * `name` - 插件名称，查找时不区分大小写
    /// * `constructor` - 构造函数
    ///
    /// # 返回
    /// * `Result<(), ConfigError>` - 名称重复时返回错误
    pub fn register(
        &mut self,
        name: &str,
        constructor: CheckerConstructor,
    ) -> Result<(), ConfigError> {
        let key = name.to_ascii_lowercase();
        if self.entries.contains_key(&key) {
            return Err(ConfigError::DuplicatePlugin(name.to_string()));
        }
        debug!("注册插件: {}", name);
        self.entries.insert(key, (name.to_string(), constructor));
        Ok(())
    }

    /// 冻结为只读注册表
    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            entries: self.entries,
        }
    }
}

/// 只读插件注册表
pub struct PluginRegistry {
    entries: BTreeMap<String, (String, CheckerConstructor)>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

impl PluginRegistry {
    /// 包含全部内置插件的注册表
    pub fn builtin() -> Self {
        let mut builder = RegistryBuilder::new();
        if let Err(e) = crate::plugins::register_builtin(&mut builder) {
            error!("注册内置插件失败: {}", e);
        }
        builder.build()
    }

    /// 进程级注册表，首次访问时初始化
    pub fn global() -> &'static PluginRegistry {
        GLOBAL_REGISTRY.get_or_init(Self::builtin)
    }

    /// 查找插件构造函数
    pub fn get(&self, name: &str) -> Result<CheckerConstructor, ConfigError> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, constructor)| *constructor)
            .ok_or_else(|| ConfigError::UnknownPlugin(name.to_string()))
    }

    /// 按插件名称和配置构造检测器
    ///
    /// # 参数
    /// * `name` - 插件名称
    /// * `check` - 检测项配置
    /// * `plugin` - 插件级配置
    pub fn create(
        &self,
        name: &str,
        check: &toml::Value,
        plugin: Option<&toml::Value>,
    ) -> Result<Arc<dyn Checker>, ConfigError> {
        let constructor = self.get(name)?;
        constructor(check, plugin)
    }

    /// 已注册的插件名称（注册时的写法）
    pub fn names(&self) -> Vec<&str> {
        self.entries.values().map(|(name, _)| name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::checker::StaticChecker;
    use crate::health::result::Status;

    fn static_constructor(
        check: &toml::Value,
        _plugin: Option<&toml::Value>,
    ) -> Result<Arc<dyn Checker>, ConfigError> {
        let name = check
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConfigError::plugin("Static", "missing name"))?;
        Ok(Arc::new(StaticChecker::new(name, Status::Ok, "static")))
    }

    #[test]
    fn test_register_and_lookup_case_insensitive() {
        let mut builder = RegistryBuilder::new();
        builder.register("Static", static_constructor).unwrap();
        let registry = builder.build();

        let check: toml::Value = toml::from_str("name = \"svc\"").unwrap();
        let checker = registry.create("STATIC", &check, None).unwrap();
        assert_eq!(checker.service_name(), "svc");
        assert_eq!(registry.names(), vec!["Static"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register("Static", static_constructor).unwrap();
        let err = builder.register("static", static_constructor).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePlugin(_)));
    }

    #[test]
    fn test_unknown_plugin() {
        let registry = RegistryBuilder::new().build();
        let check: toml::Value = toml::from_str("name = \"svc\"").unwrap();
        let err = registry.create("ftp", &check, None).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownPlugin(ref name) if name == "ftp"));
    }

    #[test]
    fn test_constructor_failure_surfaces() {
        let mut builder = RegistryBuilder::new();
        builder.register("Static", static_constructor).unwrap();
        let registry = builder.build();

        let check: toml::Value = toml::from_str("other = 1").unwrap();
        assert!(registry.create("static", &check, None).is_err());
    }

    #[test]
    fn test_global_registry_has_builtin_plugins() {
        let registry = PluginRegistry::global();
        assert!(registry.get("command").is_ok());
        assert!(registry.get("HTTP").is_ok());
        assert!(registry.get("Processes").is_ok());
    }
}
