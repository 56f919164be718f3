//! Node configuration and logging setup.

use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{ChainError, Result};
use crate::parameters::GenesisState;
use crate::types::PrivateKey;

const SEED_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the block log.
    pub data_dir: PathBuf,

    /// Genesis state file (toml). The built-in testnet genesis is used when
    /// unset.
    pub genesis_file: Option<PathBuf>,

    pub logging: LoggingConfig,

    pub storage: StorageConfig,

    /// Produce blocks as this producer.
    pub producer: Option<ProducerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Flush the block log after this many appended blocks.
    pub flush_every_blocks: u32,

    pub cache_capacity_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Producer account name.
    pub name: String,

    /// Seed of the block signing key.
    pub seed: String,
}

impl ProducerConfig {
    /// A producer entry with a fresh random seed.
    pub fn generate(name: &str) -> Self {
        let seed = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SEED_LEN)
            .map(char::from)
            .collect();
        ProducerConfig {
            name: name.to_string(),
            seed,
        }
    }

    pub fn signing_key(&self) -> PrivateKey {
        PrivateKey::from_seed(&self.seed)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledgerd"),
            genesis_file: None,
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            producer: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            flush_every_blocks: 100,
            cache_capacity_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| ChainError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGERD_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(genesis) = std::env::var("LEDGERD_GENESIS_FILE") {
            config.genesis_file = Some(PathBuf::from(genesis));
        }

        if let Ok(filter) = std::env::var("LEDGERD_LOG") {
            config.logging.filter = filter;
        }

        if let Ok(json) = std::env::var("LEDGERD_LOG_JSON") {
            config.logging.json = parse_flag(&json)?;
        }

        if let Ok(flush) = std::env::var("LEDGERD_FLUSH_EVERY_BLOCKS") {
            config.storage.flush_every_blocks = flush
                .parse()
                .map_err(|e| ChainError::Config(format!("invalid LEDGERD_FLUSH_EVERY_BLOCKS: {e}")))?;
        }

        match (
            std::env::var("LEDGERD_PRODUCER"),
            std::env::var("LEDGERD_PRODUCER_SEED"),
        ) {
            (Ok(name), Ok(seed)) => config.producer = Some(ProducerConfig { name, seed }),
            (Ok(_), Err(_)) => {
                return Err(ChainError::Config(
                    "LEDGERD_PRODUCER is set without LEDGERD_PRODUCER_SEED".into(),
                ))
            }
            _ => {}
        }

        Ok(config)
    }

    /// The genesis file if configured, otherwise the built-in genesis.
    pub fn load_genesis(&self) -> Result<GenesisState> {
        let genesis = match &self.genesis_file {
            Some(path) => GenesisState::from_file(path)?,
            None => GenesisState::default(),
        };
        genesis.validate()?;
        Ok(genesis)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ChainError::Config(format!("not a boolean: {other}"))),
    }
}

/// Install the global tracing subscriber.
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .map_err(|e| ChainError::Config(format!("invalid log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if logging.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.map_err(|e| ChainError::Config(format!("failed to install logger: {e}")))
}
