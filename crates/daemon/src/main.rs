/// PeerNet Daemon - Peer-to-Peer Overlay Node
///
/// This daemon runs a PeerNet node that:
/// - Registers with the rendezvous directory service
/// - Publishes this user's public key on first start
/// - Listens for direct deliveries from other peers
/// - Decrypts sealed payloads addressed to this user

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

use peernet_common::{NodeConfig, Username};
use peernet_core::identity::FileKeyStore;
use peernet_core::PeerNode;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting PeerNet Daemon v{}", env!("CARGO_PKG_VERSION"));

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "help" | "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "version" | "--version" | "-v" => {
                println!("PeerNet Daemon v{}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            username => {
                let username: Username = username
                    .parse()
                    .context("invalid username argument")?;
                run_node(Some(username)).await?;
            }
        }
    } else {
        run_node(None).await?;
    }

    Ok(())
}

/// Run the node, reading `peernet.toml` when present
async fn run_node(username: Option<Username>) -> Result<()> {
    let config_path = PathBuf::from("peernet.toml");

    let config = if config_path.exists() {
        info!("Loading configuration from {:?}", config_path);
        let mut config = NodeConfig::from_file(&config_path)?;
        if let Some(username) = username {
            config.username = username;
        }
        config
    } else {
        let username =
            username.context("no peernet.toml found; pass a username: peernet-daemon <name>")?;

        info!("No configuration file found, using defaults");
        let config = NodeConfig::new(username);

        // Save default config for next time
        if let Err(e) = config.to_file(&config_path) {
            warn!("Failed to save default config: {}", e);
        } else {
            info!("Saved default configuration to {:?}", config_path);
        }

        config
    };

    info!(
        "Running as {} against rendezvous {}",
        config.username, config.rendezvous_addr
    );

    let store = Arc::new(FileKeyStore::new(config.data_dir.clone()));
    let node = PeerNode::new(config, store).await?;

    let listener = node.start().await?;
    info!("Listening for peers on {}", listener.local_addr());

    node.ensure_identity().await?;
    info!("Identity ready for {}", node.username());

    // Serve inbound events until the process is stopped
    while let Some(inbound) = listener.next_event().await {
        if inbound.event.signature.is_some() {
            match node.decrypt(&inbound.event.payload).await {
                Ok(plaintext) => info!(
                    "{} from {}: {}",
                    inbound.event.name,
                    inbound.from,
                    String::from_utf8_lossy(&plaintext)
                ),
                Err(e) => warn!(
                    "Failed to decrypt {} from {}: {}",
                    inbound.event.name, inbound.from, e
                ),
            }
        } else {
            info!(
                "{} from {}: {}",
                inbound.event.name,
                inbound.from,
                String::from_utf8_lossy(&inbound.event.payload)
            );
        }
    }

    Ok(())
}

fn print_help() {
    println!("PeerNet Daemon v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("    peernet-daemon [USERNAME | COMMAND]");
    println!();
    println!("COMMANDS:");
    println!("    help       Show this help message");
    println!("    version    Show version information");
    println!();
    println!("With a USERNAME, runs a node registered under that name.");
    println!("Without arguments, reads peernet.toml from the working directory.");
}
