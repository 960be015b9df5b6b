//! Editor Host
//!
//! Boots the plugin runtime, runs until a termination signal arrives and
//! shuts the plugins down.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use editor_host::{bootstrap, HostConfig};

/// Editor plugin host
#[derive(Parser, Debug)]
#[command(name = "editor-host")]
#[command(about = "Editor plugin host", long_about = None)]
struct Args {
    /// Path to the host configuration file
    #[arg(short, long, default_value = "editor-host.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Override the parallel invocation timeout
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Fail invocations on the first plugin error
    #[arg(long)]
    fail_fast: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("editor_host=info,plugin_runtime=info,editor=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(args.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting editor host v{}", env!("CARGO_PKG_VERSION"));

    let mut config = HostConfig::load(&args.config).await?;
    if let Some(timeout_ms) = args.timeout_ms {
        config.invoke.timeout_ms = timeout_ms.max(1);
    }
    if args.fail_fast {
        config.invoke.fail_fast = true;
    }

    let app = bootstrap(&config)?;
    let state = app.current_state()?;

    let installed = app.install_plugins(state).await?;
    report("install", &installed);

    let started = app.start().await?;
    report("start", &started);

    info!(
        plugins = ?app.plugins().dependency_order(),
        status = %app.status(),
        "Editor host running"
    );

    shutdown_signal().await;

    let stopped = app.shutdown().await;
    report("shutdown", &stopped);

    info!("Editor host shutdown complete");
    Ok(())
}

/// Log the failed entries of a lifecycle settle-report
fn report(phase: &str, settlements: &[plugin_runtime::Settlement]) {
    for failure in settlements.iter().filter(|s| !s.is_fulfilled()) {
        if let Some(e) = failure.error() {
            warn!(phase, plugin = %failure.plugin, error = %e, "Plugin lifecycle hook failed");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
