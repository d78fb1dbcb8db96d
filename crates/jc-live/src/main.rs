use anyhow::Context;
use clap::Parser;
use jc_core::config::{parse_bool_flag, ConfigOverrides, LiveConfig};
use std::io;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "jc-live", about = "Headless live view of the job-center site core")]
struct Args {
    /// REST base url (overrides JC_API_URL).
    #[arg(long)]
    api_url: Option<String>,
    /// Push channel base url (overrides JC_WS_URL).
    #[arg(long)]
    ws_url: Option<String>,
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let overrides = ConfigOverrides {
        api_url: args.api_url,
        ws_url: args.ws_url,
    };
    let config = LiveConfig::resolve(&overrides).context("invalid configuration")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "shutdown_requested");
        let _ = shutdown_tx.send(true);
    });

    jc_live::run(config, shutdown_rx).await.context("live session failed")?;
    Ok(())
}

fn init_logging(flag: Option<&str>) {
    let filter = match flag.map(str::trim).filter(|level| !level.is_empty()) {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = std::env::var("JC_LOG_LEVEL")
                .ok()
                .filter(|level| !level.trim().is_empty())
                .unwrap_or_else(|| "info".to_string());
            EnvFilter::new(level)
        }),
    };
    let stdout_enabled = std::env::var("JC_LOG_STDOUT")
        .ok()
        .as_deref()
        .and_then(parse_bool_flag)
        .unwrap_or(false);
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}
