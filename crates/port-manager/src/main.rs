use std::sync::Arc;

use clap::Parser;
use tracing::info;

use netpilot_port_manager::{AppState, FileLeaseStore, PortAllocator, PortManagerConfig, router};

/// NetPilot port lease authority.
#[derive(Parser, Debug)]
#[command(name = "netpilot-port-manager", about = "Tunnel port lease authority")]
struct Cli {
    /// Address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 7070)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PortManagerConfig::from_env()?;

    let store = Arc::new(FileLeaseStore::new(&config.lease_file));
    let allocator =
        Arc::new(PortAllocator::new(config.range_min, config.range_max, store).await?);

    let state = AppState {
        allocator,
        token: Arc::new(config.token),
    };
    let app = router(state);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        address = %addr,
        range_min = config.range_min,
        range_max = config.range_max,
        "netpilot-port-manager listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("netpilot-port-manager shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
