//! HTTP检测器
//!
//! 发送一次HTTP请求，按状态码和响应时间判定服务状态

use crate::error::{CheckError, ConfigError};
use crate::health::template::render_or_default;
use crate::health::{CheckResult, Checker, ProbeContext, Status, TemplateSet};
use crate::plugins::{decode, CommonConfig};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// 插件名称
pub const PLUGIN_NAME: &str = "HTTP";

/// 状态码不符
const CASE_STATUS_CODE: &str = "status_code";
/// 超过警告阈值
const CASE_TIMEOUT: &str = "timeout";
/// 超过严重阈值或请求超时
const CASE_CRITICAL_TIMEOUT: &str = "critical_timeout";

const TEMPLATE_CASES: &[&str] = &[CASE_STATUS_CODE, CASE_TIMEOUT, CASE_CRITICAL_TIMEOUT];

fn default_method() -> String {
    "GET".to_string()
}

fn default_code() -> u16 {
    200
}

/// HTTP检测器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// 共有配置
    #[serde(flatten)]
    pub common: CommonConfig,
    /// 请求地址
    pub url: String,
    /// 请求方法
    #[serde(default = "default_method")]
    pub method: String,
    /// 期望的状态码
    #[serde(default = "default_code")]
    pub code: u16,
    /// 警告阈值（毫秒）
    #[serde(default)]
    pub warn: Option<u64>,
    /// 严重阈值（毫秒），未设置时使用超时时间
    #[serde(default)]
    pub crit: Option<u64>,
    /// 附加请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 请求体
    #[serde(default)]
    pub body: Option<String>,
}

impl HttpConfig {
    fn critical_ms(&self) -> Option<u64> {
        self.crit.or(self.common.timeout)
    }
}

/// HTTP检测器
#[derive(Debug)]
pub struct HttpChecker {
    cfg: HttpConfig,
    method: Method,
    client: Client,
    templates: TemplateSet,
}

/// 模板中可用的响应信息
#[derive(Debug, Serialize)]
struct ResponseModel {
    status_code: u16,
    status: String,
    headers: HashMap<String, String>,
}

/// 错误模板可用的数据
#[derive(Debug, Serialize)]
struct HttpModel<'a> {
    cfg: &'a HttpConfig,
    response: Option<ResponseModel>,
    response_body: serde_json::Value,
    elapsed_time: String,
    err: String,
}

/// 拼接错误及其全部来源
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// 响应体能解析为JSON时按JSON提供给模板
fn body_value(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into_owned()))
}

impl HttpChecker {
    /// 由强类型配置创建HTTP检测器
    pub fn from_config(cfg: HttpConfig) -> Result<Self, ConfigError> {
        cfg.common.validate(PLUGIN_NAME)?;
        if cfg.url.trim().is_empty() {
            return Err(ConfigError::plugin(PLUGIN_NAME, "url不能为空"));
        }

        let method = Method::from_bytes(cfg.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| {
                ConfigError::plugin(PLUGIN_NAME, CheckError::InvalidMethod(cfg.method.clone()))
            })?;

        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = cfg.common.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ConfigError::plugin(PLUGIN_NAME, format!("创建HTTP客户端失败: {e}")))?;

        let templates = TemplateSet::compile(&cfg.common.templates, TEMPLATE_CASES)?;

        info!("http: 检测器已启用，监控地址 {:?}", cfg.url);
        Ok(Self {
            cfg,
            method,
            client,
            templates,
        })
    }

    /// 当前配置
    pub fn config(&self) -> &HttpConfig {
        &self.cfg
    }

    fn result(&self, status: Status, case: &str, model: HttpModel<'_>) -> CheckResult {
        let message = render_or_default(self.templates.get(case), &model, || model.err.clone());
        CheckResult::new(self, status, message)
    }

    fn timeout_result(&self, took_ms: u128, elapsed: Duration) -> CheckResult {
        let crit = self
            .cfg
            .critical_ms()
            .map_or_else(|| "?".to_string(), |v| v.to_string());
        let model = HttpModel {
            cfg: &self.cfg,
            response: None,
            response_body: serde_json::Value::Null,
            elapsed_time: format!("{}ms", elapsed.as_millis()),
            err: format!("critical timeout: request took {took_ms}ms instead of {crit}ms"),
        };
        self.result(Status::Critical, CASE_CRITICAL_TIMEOUT, model)
    }
}

/// 插件构造函数
pub fn new_checker(
    check: &toml::Value,
    plugin: Option<&toml::Value>,
) -> Result<Arc<dyn Checker>, ConfigError> {
    let cfg: HttpConfig = decode(PLUGIN_NAME, check, plugin)?;
    Ok(Arc::new(HttpChecker::from_config(cfg)?))
}

#[async_trait]
impl Checker for HttpChecker {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn service_name(&self) -> &str {
        &self.cfg.common.name
    }

    fn periodicity(&self) -> Option<Duration> {
        self.cfg.common.periodicity()
    }

    fn timeout(&self) -> Option<Duration> {
        self.cfg.common.timeout()
    }

    async fn run(&self, ctx: &ProbeContext) -> CheckResult {
        if let Some(reason) = ctx.err() {
            return CheckResult::from_error(self, &CheckError::Cancelled(reason), "http");
        }

        let mut request = self.client.request(self.method.clone(), &self.cfg.url);
        for (name, value) in &self.cfg.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &self.cfg.body {
            request = request.body(body.clone());
        }

        let started = Instant::now();
        let sent = tokio::select! {
            biased;
            reason = ctx.done() => Err(reason),
            response = request.send() => Ok(response),
        };
        let elapsed = started.elapsed();

        let response = match sent {
            Err(crate::health::DoneReason::DeadlineExceeded) => {
                return self.timeout_result(elapsed.as_millis(), elapsed);
            }
            Err(reason) => {
                return CheckResult::from_error(self, &CheckError::Cancelled(reason), "http");
            }
            Ok(Err(e)) if e.is_timeout() => {
                let took = self.cfg.common.timeout.map_or(elapsed.as_millis(), u128::from);
                return self.timeout_result(took, elapsed);
            }
            Ok(Err(e)) => {
                debug!("http: 请求 {} 失败: {}", self.cfg.url, e);
                return CheckResult::from_error(self, &CheckError::Request(error_chain(&e)), "");
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let response_model = ResponseModel {
            status_code: status.as_u16(),
            status: status.to_string(),
            headers: response
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
                .collect(),
        };
        let body = tokio::select! {
            biased;
            _ = ctx.done() => Vec::new(),
            bytes = response.bytes() => bytes.map(|b| b.to_vec()).unwrap_or_default(),
        };

        let elapsed_ms = elapsed.as_millis();
        let mut model = HttpModel {
            cfg: &self.cfg,
            response: Some(response_model),
            response_body: body_value(&body),
            elapsed_time: format!("{elapsed_ms}ms"),
            err: String::new(),
        };

        if status.as_u16() != self.cfg.code {
            model.err = format!(
                "invalid status code: {} instead of {}",
                status.as_u16(),
                self.cfg.code
            );
            return self.result(Status::Critical, CASE_STATUS_CODE, model);
        }

        if let Some(crit) = self.cfg.critical_ms() {
            if elapsed_ms > u128::from(crit) {
                model.err =
                    format!("critical timeout: request took {elapsed_ms}ms instead of {crit}ms");
                return self.result(Status::Critical, CASE_CRITICAL_TIMEOUT, model);
            }
        }

        if let Some(warn) = self.cfg.warn {
            if elapsed_ms > u128::from(warn) {
                model.err = format!("timeout: request took {elapsed_ms}ms instead of {warn}ms");
                return self.result(Status::Warning, CASE_TIMEOUT, model);
            }
        }

        CheckResult::ok(self, status.to_string())
    }
}
