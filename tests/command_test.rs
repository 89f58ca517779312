//! 命令检测器集成测试

#![cfg(unix)]

use probe_agent::health::{Checker, PluginRegistry, ProbeContext, Status};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn command_checker(toml_src: &str) -> Arc<dyn Checker> {
    let check: toml::Value = toml::from_str(toml_src).unwrap();
    PluginRegistry::global()
        .create("command", &check, None)
        .unwrap()
}

fn ctx(timeout: Duration) -> ProbeContext {
    ProbeContext::with_timeout(timeout)
}

#[tokio::test]
async fn test_stdout_on_success() {
    let checker = command_checker(
        r#"
name = "echo"
command = "/bin/sh -c 'echo hello world'"
"#,
    );
    assert_eq!(checker.name(), "Command");

    let result = checker.run(&ctx(Duration::from_secs(2))).await;
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.message, "hello world");
    assert_eq!(result.checker.service, "echo");
}

#[tokio::test]
async fn test_non_zero_exit_reports_stderr() {
    let checker = command_checker(
        r#"
name = "failing"
command = "/bin/sh -c 'echo broken pipe >&2; exit 3'"
"#,
    );

    let result = checker.run(&ctx(Duration::from_secs(2))).await;
    assert_eq!(result.status, Status::Critical);
    assert!(
        result.message.starts_with("exit status: 3: broken pipe"),
        "{}",
        result.message
    );
}

#[tokio::test]
async fn test_context_expiry_kills_command() {
    let checker = command_checker(
        r#"
name = "slow"
command = "/bin/sh -c 'echo still working >&2; sleep 10'"
"#,
    );

    let started = Instant::now();
    let result = checker.run(&ctx(Duration::from_millis(300))).await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(result.status, Status::Critical);
    let expected = "command: context finished before command finished execution: still working";
    assert!(result.message.starts_with(expected), "{}", result.message);
}

#[tokio::test]
async fn test_error_template() {
    let checker = command_checker(
        r#"
name = "templated"
command = "/bin/sh -c 'echo out; echo err >&2; exit 1'"

[templates]
error = "{{cfg.name}} failed running {{command}} {{args.[0]}}: stdout={{stdout}} stderr={{stderr}}"
"#,
    );

    let result = checker.run(&ctx(Duration::from_secs(2))).await;
    assert_eq!(result.status, Status::Critical);
    assert_eq!(
        result.message,
        "templated failed running /bin/sh -c: stdout=out\n stderr=err\n"
    );
}

#[tokio::test]
async fn test_plugin_defaults_apply() {
    let check: toml::Value = toml::from_str("name = \"uptime\"\ncommand = \"/bin/true\"").unwrap();
    let plugin: toml::Value = toml::from_str("periodicity = 15\ntimeout = 250").unwrap();
    let checker = PluginRegistry::global()
        .create("Command", &check, Some(&plugin))
        .unwrap();

    assert_eq!(checker.periodicity(), Some(Duration::from_secs(15)));
    assert_eq!(checker.timeout(), Some(Duration::from_millis(250)));
}
