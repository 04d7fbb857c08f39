use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use netpilot_client::CommandsClient;
use netpilot_crypto::SeedCipher;
use netpilot_server::api::AppState;
use netpilot_server::auth::GoogleOAuth;
use netpilot_server::config::ServerConfig;
use netpilot_server::store::PostgresUserStore;
use netpilot_server::twofactor::TwoFactorService;

/// NetPilot user-facing API server.
#[derive(Parser, Debug)]
#[command(name = "netpilot-server", about = "Auth/DB orchestrator for NetPilot")]
struct Cli {
    /// Address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
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
    let config = ServerConfig::from_env()?;

    let store = Arc::new(PostgresUserStore::new(&config.database_url, config.db_pool_size).await?);
    info!("database ready");

    let commands = Arc::new(
        CommandsClient::builder(&config.commands_server_url)
            .timeout(config.command_timeout + Duration::from_secs(5))
            .build()?,
    );
    let oauth = Arc::new(GoogleOAuth::new(
        &config.google_client_id,
        &config.google_client_secret,
        &config.oauth_redirect_url,
    )?);
    let twofactor = Arc::new(TwoFactorService::new(
        Arc::clone(&store) as Arc<dyn netpilot_server::store::UserStore>,
        SeedCipher::new(config.totp_key.clone()),
        "NetPilot",
    ));

    let state = AppState {
        store,
        commands,
        oauth,
        twofactor,
        cookie_key: config.cookie_key.clone(),
        session_ttl: config.session_ttl,
    };
    let app = netpilot_server::router(state);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "netpilot-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("netpilot-server shut down");
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
