//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use thiserror::Error;

/// Probe Agent 应用程序的主要错误类型
#[derive(Error, Debug)]
pub enum AgentError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 健康检测相关错误
    #[error("检测错误: {0}")]
    Check(#[from] CheckError),

    /// 消息投递相关错误
    #[error("投递错误: {0}")]
    Dispatch(#[from] DispatchError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
///
/// 只在启动阶段出现，影响的是单个检测器或单个消费者
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },

    /// 未注册的插件类型
    #[error("未知的插件类型: {0}")]
    UnknownPlugin(String),

    /// 插件重复注册
    #[error("插件重复注册: {0}")]
    DuplicatePlugin(String),

    /// 未知的消费者类型
    #[error("未知的消费者类型: {0}")]
    UnknownConsumer(String),

    /// 插件配置无法解码
    #[error("插件 {plugin} 配置无效: {reason}")]
    InvalidPluginConfig { plugin: String, reason: String },

    /// 命令行语法错误
    #[error("命令解析失败 {command:?}: {reason}")]
    InvalidCommand { command: String, reason: String },

    /// 模板编译失败
    #[error("模板 {name} 编译失败: {reason}")]
    InvalidTemplate { name: String, reason: String },
}

impl ConfigError {
    /// 构造插件配置错误
    pub fn plugin(plugin: &str, reason: impl std::fmt::Display) -> Self {
        ConfigError::InvalidPluginConfig {
            plugin: plugin.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// 检测执行错误类型
///
/// 这些错误的文本会直接成为发往监控服务端的消息，因此使用英文
#[derive(Error, Debug)]
pub enum CheckError {
    /// 进程启动失败
    #[error("unable to start command: {0}")]
    Spawn(#[source] std::io::Error),

    /// 命令以非零状态退出
    #[error("{status}: {stderr}")]
    ExitStatus { status: String, stderr: String },

    /// HTTP请求失败
    #[error("{0}")]
    Request(String),

    /// HTTP方法非法
    #[error("invalid method {0:?}")]
    InvalidMethod(String),

    /// 读取进程表失败
    #[error("{0}")]
    ProcessTable(#[source] std::io::Error),

    /// 检测超出运行期限
    #[error("probe timed out after {0}ms")]
    Timeout(u128),

    /// 检测在开始前或执行中被取消
    #[error("{0}")]
    Cancelled(crate::health::DoneReason),
}

/// 投递错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// 传输层未在等待预算内接收消息
    #[error("consumer: timeout to push message for {service} to transport after {waited_ms}ms")]
    Timeout { service: String, waited_ms: u128 },

    /// 传输层入口已关闭
    #[error("consumer: transport {0} is closed")]
    TransportClosed(String),

    /// 传输层报告发送失败
    #[error("consumer: transport rejected message for {service}: {reason}")]
    Rejected { service: String, reason: String },
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_conversion() {
        let err: AgentError = ConfigError::UnknownPlugin("ftp".to_string()).into();
        assert!(err.to_string().contains("ftp"));
        assert!(matches!(err, AgentError::Config(ConfigError::UnknownPlugin(_))));
    }

    #[test]
    fn test_exit_status_message_embeds_stderr() {
        let err = CheckError::ExitStatus {
            status: "exit status: 1".to_string(),
            stderr: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "exit status: 1: boom");
    }

    #[test]
    fn test_dispatch_timeout_message() {
        let err = DispatchError::Timeout {
            service: "api".to_string(),
            waited_ms: 2000,
        };
        assert!(err.to_string().contains("timeout to push message"));
        assert!(err.to_string().contains("2000ms"));
    }
}
