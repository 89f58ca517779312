//! 进程检测器
//!
//! 遍历 `/proc`，统计可执行文件和参数都匹配的进程数量

use crate::error::{CheckError, ConfigError};
use crate::health::{CheckResult, Checker, ProbeContext};
use crate::plugins::{decode, CommonConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// 插件名称
pub const PLUGIN_NAME: &str = "Processes";

/// 内核保存的进程名最大长度
const COMM_LEN: usize = 15;

const PROC_ROOT: &str = "/proc";

/// 进程检测器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessesConfig {
    /// 共有配置
    #[serde(flatten)]
    pub common: CommonConfig,
    /// 可执行文件的绝对路径
    pub exec: String,
    /// 以空格连接的完整参数
    #[serde(default)]
    pub args: String,
}

/// 进程检测器
#[derive(Debug)]
pub struct ProcessesChecker {
    cfg: ProcessesConfig,
    executable: PathBuf,
    comm: String,
}

/// 扫描进程表时的失败位置
#[derive(Debug)]
enum ScanError {
    Listing(io::Error),
    Executable(io::Error),
    Cmdline(io::Error),
}

impl ScanError {
    fn prefix(&self) -> &'static str {
        match self {
            ScanError::Listing(_) => "unable to retrieve processes",
            ScanError::Executable(_) => "can't open executable symlink from pid",
            ScanError::Cmdline(_) => "can't open cmdline",
        }
    }

    fn into_check_error(self) -> CheckError {
        match self {
            ScanError::Listing(e) | ScanError::Executable(e) | ScanError::Cmdline(e) => {
                CheckError::ProcessTable(e)
            }
        }
    }
}

/// 待匹配的进程特征
#[derive(Debug, Clone)]
struct Matcher {
    executable: PathBuf,
    comm: String,
    args: String,
}

/// 将 cmdline 中除程序名外的参数以空格连接
fn joined_args(cmdline: &[u8]) -> String {
    let trimmed = cmdline.strip_suffix(b"\0").unwrap_or(cmdline);
    trimmed
        .split(|b| *b == 0)
        .skip(1)
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

/// 进程消失时按不匹配处理
#[cfg(unix)]
fn vanished(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::NotFound)
        || err.raw_os_error() == Some(nix::errno::Errno::ESRCH as i32)
}

#[cfg(not(unix))]
fn vanished(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::NotFound)
}

fn count_matching(root: &Path, matcher: &Matcher) -> Result<usize, ScanError> {
    let mut count = 0;
    for entry in fs::read_dir(root).map_err(ScanError::Listing)? {
        let entry = entry.map_err(ScanError::Listing)?;
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        let dir = entry.path();

        let comm = match fs::read_to_string(dir.join("comm")) {
            Ok(comm) => comm,
            Err(e) if vanished(&e) => continue,
            Err(e) => return Err(ScanError::Listing(e)),
        };
        if comm.trim_end_matches('\n') != matcher.comm {
            continue;
        }

        let path = match fs::canonicalize(dir.join("exe")) {
            Ok(path) => path,
            Err(e) if vanished(&e) => continue,
            Err(e) => return Err(ScanError::Executable(e)),
        };
        if path != matcher.executable {
            debug!("processes: pid [{}] {:?} 可执行文件不匹配", pid, path);
            continue;
        }

        let cmdline = match fs::read(dir.join("cmdline")) {
            Ok(cmdline) => cmdline,
            Err(e) if vanished(&e) => continue,
            Err(e) => return Err(ScanError::Cmdline(e)),
        };
        let args = joined_args(&cmdline);
        if args != matcher.args {
            debug!("processes: pid [{}] {:?} {:?} 参数不匹配", pid, path, args);
            continue;
        }

        count += 1;
    }
    Ok(count)
}

impl ProcessesChecker {
    /// 由强类型配置创建进程检测器
    pub fn from_config(cfg: ProcessesConfig) -> Result<Self, ConfigError> {
        cfg.common.validate(PLUGIN_NAME)?;
        let raw = Path::new(&cfg.exec);
        if !raw.is_absolute() {
            return Err(ConfigError::plugin(
                PLUGIN_NAME,
                format!("exec 必须是绝对路径: {}", cfg.exec),
            ));
        }

        // 内核按执行时路径的文件名记录 comm，符号链接不解析
        let comm: String = raw
            .file_name()
            .map(|name| name.to_string_lossy().chars().take(COMM_LEN).collect())
            .unwrap_or_default();
        let executable = fs::canonicalize(raw).unwrap_or_else(|_| raw.to_path_buf());

        info!("processes: 检测器已启用，监控进程 {:?}", cfg.exec);
        Ok(Self {
            cfg,
            executable,
            comm,
        })
    }

    fn matcher(&self) -> Matcher {
        Matcher {
            executable: self.executable.clone(),
            comm: self.comm.clone(),
            args: self.cfg.args.clone(),
        }
    }
}

/// 插件构造函数
pub fn new_checker(
    check: &toml::Value,
    plugin: Option<&toml::Value>,
) -> Result<Arc<dyn Checker>, ConfigError> {
    let cfg: ProcessesConfig = decode(PLUGIN_NAME, check, plugin)?;
    Ok(Arc::new(ProcessesChecker::from_config(cfg)?))
}

#[async_trait]
impl Checker for ProcessesChecker {
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
            return CheckResult::from_error(self, &CheckError::Cancelled(reason), "processes");
        }

        let matcher = self.matcher();
        let scan =
            tokio::task::spawn_blocking(move || count_matching(Path::new(PROC_ROOT), &matcher));
        let counted = tokio::select! {
            biased;
            reason = ctx.done() => {
                return CheckResult::from_error(self, &CheckError::Cancelled(reason), "processes");
            }
            joined = scan => joined,
        };

        let count = match counted {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                let prefix = e.prefix();
                return CheckResult::from_error(self, &e.into_check_error(), prefix);
            }
            Err(e) => {
                return CheckResult::from_error(self, &e, "unable to retrieve processes");
            }
        };

        let target = format!("{} {}", self.cfg.exec, self.cfg.args);
        match count {
            0 => CheckResult::critical(self, format!("Process {target} is not running")),
            1 => CheckResult::ok(self, format!("Process {target} is running")),
            _ => CheckResult::warning(
                self,
                format!("Process {target} have too many instances running"),
            ),
        }
    }
}
