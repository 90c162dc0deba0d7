//! Bootnode demo
//!
//! Runs a bootnode (or any serving peer) from a JSON configuration file, or
//! joins the overlay through the bootnodes a configuration file lists.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use p2p_bootstrap::api::load_config;
use p2p_bootstrap::network::generate_self_signed_pem;
use p2p_bootstrap::{BootstrapClient, EchoResponder, Event, JoinOutcome, NodeBuilder};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "TLS bootnode and joining peer", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections, advertise endpoints and echo one request per peer
    Serve {
        /// Node configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Contact the configured bootnodes and send one request to an advertised peer
    Join {
        /// Node configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Request payload
        #[arg(short, long, default_value = "ping")]
        message: String,
    },

    /// Write a self-signed certificate and key for development
    GenerateCertificate {
        /// Directory to write `<name>.crt` and `<name>.key` into
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// File name stem
        #[arg(short, long, default_value = "node")]
        name: String,

        /// Subject alternative names (DNS names or IP addresses)
        #[arg(short, long = "san", default_values_t = vec!["localhost".to_string(), "127.0.0.1".to_string()])]
        sans: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides the default level
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("bootnode={0},p2p_bootstrap={0}", log_level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Command::Serve { config } => serve(config).await,
        Command::Join { config, message } => join(config, message).await,
        Command::GenerateCertificate {
            out_dir,
            name,
            sans,
        } => generate_certificate(out_dir, name, sans),
    }
}

async fn serve(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let mut node = NodeBuilder::from_config_file(&config)?
        .with_responder(EchoResponder)
        .build()?;

    node.on_event(|event| match event {
        Event::Listening {
            address,
            fingerprint,
        } => info!("Listening on {} (certificate {})", address, fingerprint),
        Event::AdvertisementSent { peer, endpoints } => {
            info!("Advertised {} endpoint(s) to {}", endpoints, peer)
        },
        Event::SessionCompleted { peer, .. } => info!("Answered {}", peer),
        Event::ConnectionFailed { peer, reason } => warn!("Connection from {} failed: {}", peer, reason),
        _ => {},
    });

    node.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    node.stop().await?;

    Ok(())
}

async fn join(config_path: PathBuf, message: String) -> Result<()> {
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if config.bootnodes.is_empty() {
        bail!("{} lists no bootnodes", config_path.display());
    }

    let material = config.certificate_material()?;
    let client = BootstrapClient::new(config.transport_config(&material)?)
        .with_advertisement_timeout(config.advertisement_timeout());

    // The caller owns the retry policy: try each bootnode once, in order
    for bootnode in &config.bootnodes {
        match client.join(bootnode).await {
            Ok(JoinOutcome::Alone) => {
                info!("Bootnode {} knows no peers; joined alone", bootnode);
                return Ok(());
            },
            Ok(JoinOutcome::Connected { endpoint, session }) => {
                let response = session.request(message.as_bytes()).await?;
                info!(
                    "Response from {}: {}",
                    endpoint,
                    String::from_utf8_lossy(&response)
                );
                return Ok(());
            },
            Err(e) => warn!("Bootstrap through {} failed: {}", bootnode, e),
        }
    }

    bail!("every bootnode failed")
}

fn generate_certificate(out_dir: PathBuf, name: String, sans: Vec<String>) -> Result<()> {
    let names: Vec<&str> = sans.iter().map(String::as_str).collect();
    let (cert_pem, key_pem) = generate_self_signed_pem(&names)?;

    std::fs::create_dir_all(&out_dir)?;
    let cert_path = out_dir.join(format!("{}.crt", name));
    let key_path = out_dir.join(format!("{}.key", name));
    std::fs::write(&cert_path, cert_pem)?;
    std::fs::write(&key_path, key_pem)?;

    info!(
        "Wrote {} and {}",
        cert_path.display(),
        key_path.display()
    );
    Ok(())
}
