//! 命令检测器
//!
//! 执行一条命令，退出码为0即为正常，标准输出作为结果消息

use crate::error::{CheckError, ConfigError};
use crate::health::template::render_or_default;
use crate::health::{CheckResult, Checker, ProbeContext, TemplateSet};
use crate::plugins::{decode, CommonConfig};
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 插件名称
pub const PLUGIN_NAME: &str = "Command";

/// 支持的模板失败情况
const TEMPLATE_CASES: &[&str] = &["error"];

/// 进程退出后等待输出管道读完的最长时间
const PIPE_DRAIN: Duration = Duration::from_millis(200);

/// 命令检测器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandConfig {
    /// 共有配置
    #[serde(flatten)]
    pub common: CommonConfig,
    /// 要执行的命令行
    pub command: String,
}

/// 命令检测器
#[derive(Debug)]
pub struct CommandChecker {
    cfg: CommandConfig,
    program: String,
    args: Vec<String>,
    templates: TemplateSet,
}

/// 错误模板可用的数据
#[derive(Debug, Serialize)]
struct CommandModel<'a> {
    cfg: &'a CommandConfig,
    command: &'a str,
    args: &'a [String],
    stdout: String,
    stderr: String,
    err: String,
}

/// 进程结束方式
enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Expired,
}

/// 持续收集的管道输出
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn append(&self, chunk: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(chunk);
    }

    fn snapshot(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

fn pump<R>(reader: Option<R>, capture: Capture) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else { return };
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => capture.append(&buf[..n]),
            }
        }
    })
}

/// 展开命令行中的 `$VAR` 和 `${VAR}`，未设置的变量展开为空
fn expand_env(command: &str) -> Result<String, regex::Error> {
    let re = Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")?;
    let expanded = re.replace_all(command, |caps: &Captures| {
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        std::env::var(name).unwrap_or_default()
    });
    Ok(expanded.into_owned())
}

/// 上下文结束后终止进程的结果消息，终止失败时消息中带上失败原因
fn expiry_message(pid: u32, killed: std::io::Result<()>, stderr: &str) -> String {
    match killed {
        Ok(()) => format!(
            "command: context finished before command finished execution: {stderr}"
        ),
        Err(e) => format!("command: context expired, kill pid {pid} failed: {e}"),
    }
}

impl CommandChecker {
    /// 由强类型配置创建命令检测器
    pub fn from_config(cfg: CommandConfig) -> Result<Self, ConfigError> {
        cfg.common.validate(PLUGIN_NAME)?;

        let expanded = expand_env(&cfg.command).map_err(|e| ConfigError::InvalidCommand {
            command: cfg.command.clone(),
            reason: format!("正则表达式错误: {e}"),
        })?;
        let mut words = shell_words::split(&expanded)
            .map_err(|e| ConfigError::InvalidCommand {
                command: cfg.command.clone(),
                reason: e.to_string(),
            })?
            .into_iter();
        let program = words.next().ok_or_else(|| ConfigError::InvalidCommand {
            command: cfg.command.clone(),
            reason: "命令为空".to_string(),
        })?;
        let args = words.collect();
        let templates = TemplateSet::compile(&cfg.common.templates, TEMPLATE_CASES)?;

        info!("command: 检测器已启用，监控命令 {:?}", cfg.command);
        Ok(Self {
            cfg,
            program,
            args,
            templates,
        })
    }

    /// 可执行文件
    pub fn program(&self) -> &str {
        &self.program
    }

    /// 命令参数
    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn failure(&self, err: String, stdout: String, stderr: String) -> CheckResult {
        let model = CommandModel {
            cfg: &self.cfg,
            command: &self.program,
            args: &self.args,
            stdout,
            stderr,
            err,
        };
        let message = render_or_default(self.templates.get("error"), &model, || {
            model.err.clone()
        });
        CheckResult::critical(self, message)
    }
}

/// 插件构造函数
pub fn new_checker(
    check: &toml::Value,
    plugin: Option<&toml::Value>,
) -> Result<Arc<dyn Checker>, ConfigError> {
    let cfg: CommandConfig = decode(PLUGIN_NAME, check, plugin)?;
    Ok(Arc::new(CommandChecker::from_config(cfg)?))
}

#[async_trait]
impl Checker for CommandChecker {
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
            return CheckResult::from_error(self, &CheckError::Cancelled(reason), "command");
        }

        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("command: 无法启动 {:?}: {}", self.cfg.command, e);
                let err = CheckError::Spawn(e).to_string();
                return self.failure(err, String::new(), String::new());
            }
        };

        let stdout = Capture::default();
        let stderr = Capture::default();
        let mut stdout_task = pump(child.stdout.take(), stdout.clone());
        let mut stderr_task = pump(child.stderr.take(), stderr.clone());

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = ctx.done() => Outcome::Expired,
        };

        let err = match outcome {
            Outcome::Expired => {
                let pid = child.id().unwrap_or_default();
                let killed = child.kill().await;
                if let Err(e) = &killed {
                    warn!("command: 无法终止进程 {}: {}", pid, e);
                }
                Some(expiry_message(pid, killed, &stderr.snapshot()))
            }
            Outcome::Exited(Ok(status)) => {
                let _ = tokio::time::timeout(PIPE_DRAIN, async {
                    let _ = (&mut stdout_task).await;
                    let _ = (&mut stderr_task).await;
                })
                .await;
                if status.success() {
                    None
                } else {
                    Some(
                        CheckError::ExitStatus {
                            status: status.to_string(),
                            stderr: stderr.snapshot(),
                        }
                        .to_string(),
                    )
                }
            }
            Outcome::Exited(Err(e)) => Some(format!("{}: {}", e, stderr.snapshot())),
        };
        stdout_task.abort();
        stderr_task.abort();

        match err {
            None => CheckResult::ok(self, stdout.snapshot().trim().to_string()),
            Some(err) => self.failure(err, stdout.snapshot(), stderr.snapshot()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Status;

    fn checker(command: &str) -> CommandChecker {
        CommandChecker::from_config(CommandConfig {
            common: CommonConfig {
                name: "test-1".to_string(),
                periodicity: None,
                timeout: None,
                templates: Default::default(),
            },
            command: command.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_command_parsing() {
        let checker = checker(r#"/bin/sh -c "echo 'hello world'""#);
        assert_eq!(checker.program(), "/bin/sh");
        assert_eq!(checker.args(), &["-c", "echo 'hello world'"]);
        assert_eq!(checker.name(), "Command");
        assert_eq!(checker.service_name(), "test-1");
    }

    #[test]
    fn test_expiry_message_reports_kill_failure() {
        let killed = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "operation not permitted",
        ));
        assert_eq!(
            expiry_message(4242, killed, "partial output"),
            "command: context expired, kill pid 4242 failed: operation not permitted"
        );
        assert_eq!(
            expiry_message(4242, Ok(()), "still working"),
            "command: context finished before command finished execution: still working"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_of_reaped_child_fails() {
        let mut child = Command::new("/bin/true").spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();

        let message = expiry_message(pid, child.kill().await, "");
        assert!(
            message.starts_with(&format!("command: context expired, kill pid {pid} failed: ")),
            "unexpected message: {message}"
        );
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("PROBE_AGENT_TEST_DIR", "/tmp/probe dir");
        assert_eq!(
            expand_env("ls ${PROBE_AGENT_TEST_DIR} $PROBE_AGENT_TEST_UNSET_VAR").unwrap(),
            "ls /tmp/probe dir "
        );
    }

    #[test]
    fn test_invalid_shell_syntax() {
        let err = CommandChecker::from_config(CommandConfig {
            common: CommonConfig {
                name: "broken".to_string(),
                periodicity: None,
                timeout: None,
                templates: Default::default(),
            },
            command: "echo \"unterminated".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCommand { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let checker = checker("/bin/true");
        let ctx = ProbeContext::with_timeout(Duration::from_secs(1));
        ctx.cancel();
        let result = checker.run(&ctx).await;
        assert_eq!(result.status, Status::Critical);
        assert_eq!(result.message, "command: context canceled");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_failure() {
        let checker = checker("/nonexistent/probe-agent-binary");
        let result = checker
            .run(&ProbeContext::with_timeout(Duration::from_secs(1)))
            .await;
        assert_eq!(result.status, Status::Critical);
        assert!(result.message.starts_with("unable to start command"));
    }
}
