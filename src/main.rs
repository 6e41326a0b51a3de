//! Burrow - Minimal Coordination Service
//!
//! A hierarchical namespace of versioned data nodes served over UDP.

mod config;
mod dispatch;
mod network;
mod protocol;
mod store;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use network::{resolve_host, Client, Server, ServerEvent};

/// Burrow - hierarchical coordination service over UDP
#[derive(Parser)]
#[command(name = "burrow")]
#[command(author = "Burrow Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Serve and query a hierarchical namespace of versioned nodes", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server
    Server {
        /// UDP port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to bind to
        #[arg(short, long)]
        bind: Option<String>,

        /// Comma-separated peer addresses (reserved, not used yet)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,
    },

    /// Send a single request to a server
    Client {
        /// Server address (`host` or `host:port`)
        #[arg(short, long)]
        server: Option<String>,

        /// Server port, when not part of the address
        #[arg(short, long)]
        port: Option<u16>,

        #[command(subcommand)]
        op: ClientOp,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum ClientOp {
    /// Ping the server with a message
    Ping { message: String },

    /// Create a node
    Create {
        path: String,
        #[arg(default_value = "")]
        data: String,
    },

    /// Check whether a node exists
    Exists { path: String },

    /// Read a node's data and stat
    Get { path: String },

    /// Replace a node's data
    Set { path: String, data: String },

    /// Create a node and any missing ancestors
    Ensure { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Server { port, bind, peers } => {
            run_server(config, port, bind, peers).await?;
        }
        Commands::Client { server, port, op } => {
            run_client(config, server, port, op).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                if let Some(path) = output {
                    config::sample_config().save(&path)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", config::generate_sample_config()?);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_info();
        }
    }

    Ok(())
}

/// Run the server until Ctrl+C
async fn run_server(
    mut config: Config,
    port: Option<u16>,
    bind: Option<String>,
    peers: Vec<String>,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(bind) = bind {
        config.server.bind_address = bind;
    }
    if !peers.is_empty() {
        config.peers = peers;
    }

    let mut server = Server::new(config.server_network());
    let mut event_rx = server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("server event receiver already taken"))?;

    let local_addr = server.start().await?;
    tracing::info!("Burrow server listening on {}", local_addr);
    println!("Burrow server listening on {}. Press Ctrl+C to stop.", local_addr);

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::RequestHandled { addr, request_id, op, error } => {
                        let op = op.map(|op| op.name()).unwrap_or("unknown");
                        match error {
                            Some(kind) => tracing::debug!(
                                "{} request {} from {} failed: {}", op, request_id, addr, kind
                            ),
                            None => tracing::debug!("{} request {} from {} ok", op, request_id, addr),
                        }
                    }
                    ServerEvent::DatagramDropped { addr, reason } => {
                        tracing::debug!("Dropped datagram from {}: {}", addr, reason);
                    }
                    ServerEvent::Error { message } => {
                        tracing::error!("Server error: {}", message);
                    }
                    ServerEvent::Started { bind_addr } => {
                        tracing::debug!("Serving on {}", bind_addr);
                    }
                    ServerEvent::Stopped => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    if let Some(addr) = server.local_addr() {
        tracing::info!("Stopping server on {}", addr);
    }
    server.stop().await?;

    if let Some(store) = server.dispatcher().map(|d| d.store()) {
        let top_level = store.node("/").map(|root| root.children().count()).unwrap_or(0);
        tracing::info!(
            "Namespace held {} nodes ({} top-level) at shutdown",
            store.len(),
            top_level
        );
    }
    Ok(())
}

/// Issue one client request and print the result
async fn run_client(
    config: Config,
    server: Option<String>,
    port: Option<u16>,
    op: ClientOp,
) -> anyhow::Result<()> {
    let host = server.unwrap_or_else(|| config.client.server.clone());
    let port = port.unwrap_or(config.server.port);
    let server_addr = resolve_host(&host, port).await?;

    let client = Client::connect(server_addr, config.client_network()).await?;
    tracing::debug!("Sending {:?} to {}", op, client.server_addr());

    match op {
        ClientOp::Ping { message } => {
            let reply = client.ping(message.as_bytes()).await?;
            println!("{}", String::from_utf8_lossy(&reply));
        }
        ClientOp::Create { path, data } => {
            let stat = client.create(&path, data.as_bytes()).await?;
            println!("Created {}", path);
            println!("{}", serde_json::to_string_pretty(&stat)?);
        }
        ClientOp::Exists { path } => {
            println!("{}", client.exists(&path).await?);
        }
        ClientOp::Get { path } => {
            let (data, stat) = client.get(&path).await?;
            println!("{}", String::from_utf8_lossy(&data));
            println!("{}", serde_json::to_string_pretty(&stat)?);
        }
        ClientOp::Set { path, data } => {
            let stat = client.set(&path, data.as_bytes()).await?;
            println!("{}", serde_json::to_string_pretty(&stat)?);
        }
        ClientOp::Ensure { path } => {
            client.ensure_path(&path).await?;
            println!("Ensured {}", path);
        }
    }

    Ok(())
}

/// Print protocol information
fn print_info() {
    println!("Burrow Protocol Information");
    println!("===========================\n");
    println!("Default Port: {}", protocol::DEFAULT_PORT);
    println!("Max Datagram Size: {} bytes", protocol::MAX_DATAGRAM_SIZE);
    println!("Max Path Length: {} bytes", protocol::MAX_PATH_LEN);
    println!(
        "Max Node Data: {} bytes",
        protocol::max_get_data_len(protocol::MAX_DATAGRAM_SIZE)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["burrow", "info"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_server_peers_parsing() {
        let cli = Cli::try_parse_from([
            "burrow",
            "server",
            "--port",
            "12001",
            "--peers",
            "127.0.0.1:12000,127.0.0.1:12002",
        ])
        .unwrap();

        match cli.command {
            Commands::Server { port, peers, .. } => {
                assert_eq!(port, Some(12001));
                assert_eq!(peers, vec!["127.0.0.1:12000", "127.0.0.1:12002"]);
            }
            _ => panic!("expected server command"),
        }
    }

    #[test]
    fn test_client_parsing() {
        let cli = Cli::try_parse_from(["burrow", "client", "-s", "10.0.0.1", "create", "/foo"])
            .unwrap();

        match cli.command {
            Commands::Client { server, op, .. } => {
                assert_eq!(server.as_deref(), Some("10.0.0.1"));
                assert_eq!(
                    op,
                    ClientOp::Create {
                        path: "/foo".to_string(),
                        data: String::new(),
                    }
                );
            }
            _ => panic!("expected client command"),
        }
    }
}
