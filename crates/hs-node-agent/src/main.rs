//! HumiSense node agent: humidity/temperature telemetry to an AWS IoT
//! device shadow over mutually-authenticated MQTT.
//!
//! One cooperative loop on a single-threaded runtime; see `app`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

use hs_node_agent::app;
use hs_node_agent::config::{LogFormat, NodeConfig};

const DEFAULT_CONFIG_PATH: &str = "/etc/humisense/node.toml";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_logging(format: LogFormat) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = {
        // Plain text until the config names a format.
        let early = tracing_subscriber::fmt().with_env_filter(env_filter()).finish();
        let _guard = tracing::subscriber::set_default(early);
        NodeConfig::load(&config_path)?
    };

    init_logging(config.log_format);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path,
        "hs-node-agent starting"
    );

    // ── Build context (fails fast on bad credentials/certs) ─────
    let mut ctx = app::build(&config).inspect_err(|e| {
        tracing::error!(error = %e, "boot failed");
    })?;

    // Graceful shutdown on SIGINT, observed between loop iterations
    let stop = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&stop);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown signal received");
                signal.store(true, Ordering::SeqCst);
            }
            Err(e) => tracing::error!(error = %e, "cannot listen for shutdown signal"),
        }
    });

    ctx.run(&stop).await;
    ctx.shutdown().await;
    tracing::info!("hs-node-agent stopped");
    Ok(())
}
