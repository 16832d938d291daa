mod brew;
mod config;
mod tui;

use anyhow::{Context, Result};
use brew::{Brew, BrewState, Orchestrator};
use std::fs;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = config::Config::load_or_default()?;

    // TUI 占用终端，日志写入文件
    if let Some(parent) = config.log_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .with_context(|| format!("无法打开日志文件 {}", config.log_file.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();

    // brew 路径优先级：配置文件 > 自动检测
    let brew = match &config.brew_path {
        Some(path) => Brew::new(path),
        None => Brew::detect().unwrap_or_else(|e| {
            eprintln!("错误: {}", e);
            eprintln!("请安装 Homebrew，或在 {} 中设置 brew_path", config::Config::config_path().display());
            std::process::exit(1);
        }),
    }
    .with_auto_update(config.allow_auto_update);
    log::info!("使用 brew: {}", brew.executable().display());

    let (alert_tx, alert_rx) = mpsc::unbounded_channel();
    let orchestrator = Arc::new(Orchestrator::new(brew, BrewState::global()).with_alerts(alert_tx));

    tui::run(orchestrator, alert_rx, config).await?;

    Ok(())
}
