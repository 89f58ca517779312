//! Probe Agent 主程序入口
//!
//! 可插拔的健康探测代理

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    probe_agent::core::app::main().await
}
