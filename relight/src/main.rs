use clap::Parser;
use relight::{
    Application,
    config::{Args, Config},
    telemetry,
};
use std::{future::pending, time::Duration};
use tokio::signal;
use tracing::{info, warn};

/// Resolves on Ctrl+C, or SIGTERM on unix. A handler that cannot be installed never resolves.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = pending::<()>();

    let received = tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    info!(signal = received, "Draining in-flight requests before exit");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // reqwest and the AWS SDK both need a process-wide rustls provider
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    let config = Config::load(&args)?;
    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(
        &config.log_level,
        Duration::from_secs(config.log_dedup_timeout_secs),
        config.enable_otel_export,
    )?;
    info!(version = env!("CARGO_PKG_VERSION"), config_file = %args.config, "Starting relight");

    Application::new(config).await?.serve(shutdown_signal()).await
}
