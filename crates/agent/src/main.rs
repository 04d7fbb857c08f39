use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use netpilot_agent::{
    AgentConfig, AgentService, PortManagerLeases, RusshDialer, TunnelStateFile, TunnelSupervisor,
};
use netpilot_client::PortManagerClient;

/// NetPilot desktop agent (tunnel supervisor CLI).
#[derive(Parser, Debug)]
#[command(name = "netpilot-agent", about = "Manages the router's reverse tunnel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Establish (or re-establish) the tunnel.
    Connect,
    /// Stop the tunnel, keeping the port lease.
    Disconnect,
    /// Remove everything from the router, release the port, clear state.
    Reset,
    /// Print the current tunnel status.
    Status,
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
    let config = AgentConfig::from_env()?;

    let ports = PortManagerClient::new(&config.port_manager_url, &config.port_manager_token)?;
    let supervisor = TunnelSupervisor::new(
        Arc::new(RusshDialer::new(
            &config.router_host,
            &config.router_user,
            &config.router_password,
        )),
        Arc::new(PortManagerLeases::new(ports)),
        TunnelStateFile::new(&config.state_file),
        &config.vm_host,
        &config.vm_user,
        &config.vm_password,
    );

    let status = match cli.command {
        Commands::Connect => supervisor.connect().await?,
        Commands::Disconnect => supervisor.disconnect().await?,
        Commands::Reset => supervisor.reset().await?,
        Commands::Status => supervisor.status().await?,
    };

    println!("{}", serde_json::to_string_pretty(&status)?);
    info!(state = ?status.state, "done");
    Ok(())
}
