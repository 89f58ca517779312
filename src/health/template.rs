//! 消息模板模块
//!
//! 运维人员可以为检测器的每种失败情况配置 Handlebars 模板，
//! 模板渲染失败时失败信息本身成为结果消息

use crate::error::ConfigError;
use handlebars::{no_escape, Handlebars};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 模板为空时的固定消息
pub const ERR_NIL_TEMPLATE: &str = "unable to apply nil template";

/// 已编译的消息模板
#[derive(Clone)]
pub struct MessageTemplate {
    /// 模板名称（对应失败情况）
    name: String,
    /// 只包含这一个模板的注册表
    registry: Arc<Handlebars<'static>>,
}

impl MessageTemplate {
    /// 编译模板
    ///
    /// # 参数
    /// * `name` - 模板名称
    /// * `source` - 模板源文本
    ///
    /// # 返回
    /// * `Result<Self, ConfigError>` - 编译后的模板，语法错误时返回配置错误
    pub fn compile(name: &str, source: &str) -> Result<Self, ConfigError> {
        let mut registry = Handlebars::new();
        // 缺失字段视为渲染失败，而不是静默输出空字符串
        registry.set_strict_mode(true);
        registry.register_escape_fn(no_escape);
        registry
            .register_template_string(name, source)
            .map_err(|e| ConfigError::InvalidTemplate {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name: name.to_string(),
            registry: Arc::new(registry),
        })
    }

    /// 模板名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 渲染模板
    pub fn render<T: Serialize>(&self, model: &T) -> Result<String, handlebars::RenderError> {
        self.registry.render(&self.name, model)
    }
}

impl fmt::Debug for MessageTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageTemplate")
            .field("name", &self.name)
            .finish()
    }
}

/// 按模板渲染错误消息
///
/// 渲染永远不会失败：模板为空或执行出错时返回描述性的消息
pub fn render_error<T: Serialize>(template: Option<&MessageTemplate>, model: &T) -> String {
    let Some(template) = template else {
        return ERR_NIL_TEMPLATE.to_string();
    };

    match template.render(model) {
        Ok(message) => message,
        Err(e) => format!("unable to apply template {:?}: {}", template.name(), e),
    }
}

/// 配置了模板时按模板渲染，否则使用默认消息
pub fn render_or_default<T, F>(template: Option<&MessageTemplate>, model: &T, default: F) -> String
where
    T: Serialize,
    F: FnOnce() -> String,
{
    match template {
        Some(_) => render_error(template, model),
        None => default(),
    }
}

/// 检测器的模板集合，键为失败情况名称
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: HashMap<String, MessageTemplate>,
}

impl TemplateSet {
    /// 编译配置中的全部模板
    ///
    /// # 参数
    /// * `raw` - 失败情况到模板源文本的映射
    /// * `cases` - 检测器支持的失败情况
    pub fn compile(raw: &HashMap<String, String>, cases: &[&str]) -> Result<Self, ConfigError> {
        let mut templates = HashMap::with_capacity(raw.len());
        for (case, source) in raw {
            if !cases.contains(&case.as_str()) {
                return Err(ConfigError::InvalidTemplate {
                    name: case.clone(),
                    reason: format!("未知的失败情况，支持: {cases:?}"),
                });
            }
            templates.insert(case.clone(), MessageTemplate::compile(case, source)?);
        }
        Ok(Self { templates })
    }

    /// 获取某个失败情况的模板
    pub fn get(&self, case: &str) -> Option<&MessageTemplate> {
        self.templates.get(case)
    }

    /// 是否未配置任何模板
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
