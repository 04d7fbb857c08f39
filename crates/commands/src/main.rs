use std::sync::Arc;

use clap::Parser;
use tracing::info;

use netpilot_client::PortManagerClient;
use netpilot_commands::{
    AppState, CommandsConfig, Deadlines, Dispatcher, LeaseLookup, RusshConnector, SessionRegistry,
    router, spawn_idle_reaper,
};

/// NetPilot command execution server.
#[derive(Parser, Debug)]
#[command(
    name = "netpilot-commands",
    about = "Executes router operations through reverse tunnels"
)]
struct Cli {
    /// Address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9090)]
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
    let config = CommandsConfig::from_env()?;

    let ports = PortManagerClient::new(&config.port_manager_url, &config.port_manager_token)?;
    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::new(LeaseLookup::new(ports)),
        Arc::new(RusshConnector::new(&config.ssh_user, &config.ssh_password)),
        Deadlines {
            command: config.command_timeout,
            scan: config.scan_timeout,
        },
    ));

    let _reaper = spawn_idle_reaper(Arc::clone(&registry), config.session_idle_ttl);

    let state = AppState {
        registry,
        dispatcher,
    };
    let app = router(state);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "netpilot-commands listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("netpilot-commands shut down");
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
