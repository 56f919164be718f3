use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use ledgerd::config::{init_tracing, Config, ProducerConfig};
use ledgerd::parameters::{get_config, INIT_PRODUCER};
use ledgerd::runtime::Node;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "ledgerd", version, about = "Ledger node")]
struct Cli {
    /// TOML config file. Without it, settings come from LEDGERD_* variables.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the ledger and serve until Ctrl-C.
    Run {
        /// Produce blocks with the configured producer key.
        #[arg(long)]
        produce: bool,
    },
    /// Print the protocol constants as JSON.
    Config,
    /// Rebuild state from the block log and report the head.
    Replay,
    /// Print a `[producer]` config section with a fresh signing seed.
    Keygen {
        #[arg(long, default_value = INIT_PRODUCER)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    init_tracing(&config.logging)?;

    match cli.command {
        Command::Config => {
            let genesis = config.load_genesis()?;
            let constants = get_config(&genesis.parameters, &genesis.chain_id());
            println!("{}", serde_json::to_string_pretty(&constants)?);
        }
        Command::Replay => {
            let started = Instant::now();
            let node = Node::open(&config)?;
            let (num, id) = node.head()?;
            info!(head = num, %id, elapsed_ms = started.elapsed().as_millis() as u64, "replay finished");
            println!("head block #{num} {id}");
        }
        Command::Keygen { name } => {
            let producer = ProducerConfig::generate(&name);
            let public = producer.signing_key().public_key();
            println!("# signing key {public}");
            println!("[producer]");
            println!("{}", toml::to_string(&producer)?);
        }
        Command::Run { produce } => run(config, produce).await?,
    }
    Ok(())
}

async fn run(config: Config, produce: bool) -> Result<(), Box<dyn std::error::Error>> {
    let node = Arc::new(Node::open(&config)?);
    let (num, id) = node.head()?;
    info!(data_dir = %config.data_dir.display(), head = num, %id, "node started");

    let mut applied = {
        let db = node.database();
        let guard = db.lock().map_err(|_| "ledger lock poisoned")?;
        guard.signals().subscribe_applied_blocks()
    };
    tokio::spawn(async move {
        loop {
            match applied.recv().await {
                Ok(block) => debug!(num = block.block_num(), "applied block"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "block subscriber fell behind")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let producer = if produce {
        let node = Arc::clone(&node);
        Some(tokio::spawn(async move { node.run_producer(shutdown_rx).await }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown_tx.send_replace(true);
    if let Some(handle) = producer {
        handle.await??;
    }
    node.flush()?;
    Ok(())
}
