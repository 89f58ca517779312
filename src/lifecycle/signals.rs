//! 信号处理模块
//!
//! 收到 SIGINT/SIGTERM 时触发关闭协调器

use crate::error::Result;
use crate::lifecycle::ShutdownCoordinator;
use tracing::{error, info};

#[cfg(unix)]
use signal_hook::consts::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook_tokio::Signals;

/// 设置信号处理器，收到退出信号后触发关闭
pub fn setup_signal_handlers(coordinator: ShutdownCoordinator) -> Result<()> {
    #[cfg(unix)]
    {
        setup_unix_signals(coordinator)
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("接收到 Ctrl+C，开始优雅关闭...");
                    coordinator.trigger();
                }
                Err(e) => error!("监听 Ctrl+C 失败: {e}"),
            }
        });
        Ok(())
    }
}

/// Unix/Linux系统信号处理
#[cfg(unix)]
fn setup_unix_signals(coordinator: ShutdownCoordinator) -> Result<()> {
    use futures::stream::StreamExt;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let handle = signals.handle();
    let token = coordinator.token();

    tokio::spawn(async move {
        loop {
            let signal = tokio::select! {
                _ = token.cancelled() => break,
                signal = signals.next() => signal,
            };
            match signal {
                Some(SIGINT) => info!("接收到 SIGINT 信号，开始优雅关闭..."),
                Some(SIGTERM) => info!("接收到 SIGTERM 信号，开始优雅关闭..."),
                Some(other) => {
                    error!("接收到未处理的信号: {other}");
                    continue;
                }
                None => break,
            }
            coordinator.trigger();
            break;
        }
        handle.close();
    });

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        setup_signal_handlers(coordinator.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        nix::sys::signal::kill(nix::unistd::Pid::this(), nix::sys::signal::Signal::SIGTERM)
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), coordinator.token().cancelled())
            .await
            .unwrap();
        assert!(coordinator.is_triggered());
    }
}
