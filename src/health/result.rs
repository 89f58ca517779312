//! 检测结果数据结构
//!
//! 定义检测结果类型和状态枚举

use crate::health::checker::Checker;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 检测状态枚举，取值与监控服务端的严重级别一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// 服务正常
    Ok,
    /// 服务需要关注
    Warning,
    /// 服务需要立即处理
    Critical,
    /// 服务状态未知
    Unknown,
}

impl Status {
    /// 监控协议中的严重级别代码
    pub fn code(&self) -> i16 {
        match self {
            Status::Ok => 0,
            Status::Warning => 1,
            Status::Critical => 2,
            Status::Unknown => 3,
        }
    }

    /// 从严重级别代码转换，未知代码视为 UNKNOWN
    pub fn from_code(code: i16) -> Self {
        match code {
            0 => Status::Ok,
            1 => Status::Warning,
            2 => Status::Critical,
            _ => Status::Unknown,
        }
    }

    /// 判断状态是否为健康
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Warning => write!(f, "WARNING"),
            Status::Critical => write!(f, "CRITICAL"),
            Status::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// 产生结果的检测器标识
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerInfo {
    /// 插件类型
    pub plugin: String,
    /// 服务名称
    pub service: String,
}

impl CheckerInfo {
    /// 从检测器提取标识
    pub fn of(checker: &(impl Checker + ?Sized)) -> Self {
        Self {
            plugin: checker.name().to_string(),
            service: checker.service_name().to_string(),
        }
    }
}

/// 单次检测的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// 检测状态
    pub status: Status,
    /// 发往监控服务端的附加消息
    pub message: String,
    /// 产生该结果的检测器
    pub checker: CheckerInfo,
}

impl CheckResult {
    /// 创建新的检测结果
    ///
    /// # 参数
    /// * `checker` - 产生结果的检测器
    /// * `status` - 检测状态
    /// * `message` - 消息
    ///
    /// # 返回
    /// * `Self` - 检测结果实例
    pub fn new(
        checker: &(impl Checker + ?Sized),
        status: Status,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            checker: CheckerInfo::of(checker),
        }
    }

    /// OK 结果
    pub fn ok(checker: &(impl Checker + ?Sized), message: impl Into<String>) -> Self {
        Self::new(checker, Status::Ok, message)
    }

    /// WARNING 结果
    pub fn warning(checker: &(impl Checker + ?Sized), message: impl Into<String>) -> Self {
        Self::new(checker, Status::Warning, message)
    }

    /// CRITICAL 结果
    pub fn critical(checker: &(impl Checker + ?Sized), message: impl Into<String>) -> Self {
        Self::new(checker, Status::Critical, message)
    }

    /// 由错误生成 CRITICAL 结果
    ///
    /// # 参数
    /// * `checker` - 产生结果的检测器
    /// * `err` - 错误
    /// * `prefix` - 消息前缀，为空时不添加
    pub fn from_error(
        checker: &(impl Checker + ?Sized),
        err: &impl fmt::Display,
        prefix: &str,
    ) -> Self {
        let message = if prefix.is_empty() {
            err.to_string()
        } else {
            format!("{prefix}: {err}")
        };
        Self::critical(checker, message)
    }

    /// 服务名称
    pub fn service_name(&self) -> &str {
        &self.checker.service
    }
}

/// 携带主机名的检测结果，仅在投递边界使用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultWithHostname {
    /// 检测结果
    pub result: CheckResult,
    /// 来源主机
    pub hostname: String,
}

impl ResultWithHostname {
    /// 为结果附加主机名
    pub fn new(result: CheckResult, hostname: impl Into<String>) -> Self {
        Self {
            result,
            hostname: hostname.into(),
        }
    }
}
