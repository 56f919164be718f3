//! Protocol constants and genesis state.
//!
//! Everything here is fixed at compile time or at genesis; nothing is
//! runtime-mutable. [`get_config`] exposes the full set as one snapshot for
//! external tooling.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::authority::Authority;
use crate::error::{ChainError, Result};
use crate::types::{ChainId, PrivateKey, PublicKey};

pub const BLOCK_INTERVAL: u32 = 3;
pub const BLOCKS_PER_HOUR: u32 = 60 * 60 / BLOCK_INTERVAL;
pub const MAX_TIME_UNTIL_EXPIRATION: u32 = 60 * 60;
pub const MAX_PROPOSAL_LIFETIME_SEC: u32 = 60 * 60 * 24 * 7 * 4;

pub const MIN_ACCOUNT_NAME_LENGTH: usize = 3;
pub const MAX_ACCOUNT_NAME_LENGTH: usize = 16;
pub const MIN_ASSET_SYMBOL_LENGTH: usize = 2;
pub const MAX_ASSET_SYMBOL_LENGTH: usize = 13;
pub const MAX_ASSET_PRECISION: u8 = 12;
pub const ASSET_PRECISION: u8 = 6;
pub const MAX_ASSET_DESCRIPTION_LENGTH: usize = 1000;
pub const MAX_URL_LENGTH: usize = 127;

pub const MAX_SHARE_SUPPLY: i64 = 30_000_000_000_000;

pub const ASSET_CREATION_FEE: i64 = 100 * 1_000_000;
pub const SUBASSET_CREATION_FEE: i64 = 50 * 1_000_000;
pub const ASSET_CREATION_FEE_POST_UPGRADE: i64 = 10 * 1_000_000;
pub const ACCOUNT_CREATION_FEE: i64 = 1_000_000;

pub const MAX_SIG_CHECK_DEPTH: u32 = 2;
pub const MAX_AUTHORITY_MEMBERSHIP: usize = 10;

pub const MAX_TRANSACTION_SIZE: usize = 1024 * 64;
pub const MAX_BLOCK_SIZE: usize = MAX_TRANSACTION_SIZE * BLOCK_INTERVAL as usize * 2000;

pub const MIN_UNDO_HISTORY: u32 = 10;
pub const MAX_UNDO_HISTORY: u32 = 10_000;

pub const PERCENT_100: u32 = 10_000;
pub const PERCENT_1: u32 = PERCENT_100 / 100;
pub const IRREVERSIBLE_THRESHOLD: u32 = 51 * PERCENT_1;

pub const CORE_SYMBOL: &str = "CORE";
pub const DOLLAR_SYMBOL: &str = "USDX";
pub const TREASURY_ACCOUNT: &str = "treasury";
pub const NULL_ACCOUNT: &str = "null";
pub const NFT_SYMBOL_PREFIX: &str = "NFT";

/// Protocol upgrade identifiers. Hardforks are applied in order.
pub const HARDFORK_0_1: u32 = 1;
pub const NUM_HARDFORKS: u32 = 1;

/// Asset flag and permission bits. The low byte holds the classic bits that
/// are cleared when `HARDFORK_0_1` activates.
pub mod asset_flags {
    pub const CHARGE_MARKET_FEE: u16 = 0x01;
    pub const WHITE_LIST: u16 = 0x02;
    pub const OVERRIDE_AUTHORITY: u16 = 0x04;
    pub const TRANSFER_RESTRICTED: u16 = 0x08;
    pub const DISABLE_FORCE_SETTLE: u16 = 0x10;
    pub const GLOBAL_SETTLE: u16 = 0x20;
    pub const DISABLE_CONFIDENTIAL: u16 = 0x40;
    pub const WITNESS_FED_ASSET: u16 = 0x80;
    pub const HASHTAG: u16 = 0x100;
    pub const ALLOW_SUBASSET_CREATION: u16 = 0x200;

    pub const ALLOWED_ASSET_PERMISSIONS: u16 = HASHTAG | ALLOW_SUBASSET_CREATION;
}

/// Consensus parameters carried in global properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParameters {
    pub block_interval: u32,
    pub maximum_time_until_expiration: u32,
    pub maximum_proposal_lifetime: u32,
    pub maximum_transaction_size: usize,
    pub maximum_block_size: usize,
    pub max_authority_depth: u32,
    pub max_authority_membership: usize,
    pub min_undo_history: u32,
    pub max_undo_history: u32,
    /// Feeds are folded into a new median every this many blocks.
    pub feed_interval_blocks: u32,
}

impl Default for ChainParameters {
    fn default() -> Self {
        ChainParameters {
            block_interval: BLOCK_INTERVAL,
            maximum_time_until_expiration: MAX_TIME_UNTIL_EXPIRATION,
            maximum_proposal_lifetime: MAX_PROPOSAL_LIFETIME_SEC,
            maximum_transaction_size: MAX_TRANSACTION_SIZE,
            maximum_block_size: MAX_BLOCK_SIZE,
            max_authority_depth: MAX_SIG_CHECK_DEPTH,
            max_authority_membership: MAX_AUTHORITY_MEMBERSHIP,
            min_undo_history: MIN_UNDO_HISTORY,
            max_undo_history: MAX_UNDO_HISTORY,
            feed_interval_blocks: BLOCKS_PER_HOUR,
        }
    }
}

impl ChainParameters {
    /// Number of trailing blocks kept reversible for `producer_count`
    /// producers: the confirmations needed to pass the irreversibility
    /// threshold, clamped to the undo history bounds.
    pub fn reversible_blocks(&self, producer_count: usize) -> u32 {
        let producers = u32::try_from(producer_count).unwrap_or(u32::MAX);
        let confirmations = (producers.saturating_mul(IRREVERSIBLE_THRESHOLD)).div_ceil(PERCENT_100);
        confirmations.clamp(self.min_undo_history, self.max_undo_history)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub name: String,
    pub memo_key: PublicKey,
    #[serde(default)]
    pub core_balance: i64,
    #[serde(default)]
    pub dollar_balance: i64,
    pub owner: Authority,
    pub active: Authority,
    pub basic: Authority,
}

impl GenesisAccount {
    /// Account whose owner, active and basic authorities are all the single
    /// `key`.
    pub fn with_key(name: &str, key: PublicKey) -> Self {
        let authority = Authority::from_key(key);
        GenesisAccount {
            name: name.to_string(),
            memo_key: key,
            core_balance: 0,
            dollar_balance: 0,
            owner: authority.clone(),
            active: authority.clone(),
            basic: authority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisProducer {
    pub account: String,
    pub signing_key: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisState {
    pub chain_name: String,
    pub initial_timestamp: u32,
    /// Core amount bought by one whole dollar unit at genesis.
    pub initial_core_per_dollar: i64,
    pub hardfork_0_1_time: u32,
    pub accounts: Vec<GenesisAccount>,
    pub producers: Vec<GenesisProducer>,
    #[serde(default)]
    pub parameters: ChainParameters,
}

/// Seed of the key owning the default genesis producer and treasury.
pub const INIT_KEY_SEED: &str = "init_key";
pub const INIT_PRODUCER: &str = "init";

impl Default for GenesisState {
    fn default() -> Self {
        let init_key = PrivateKey::from_seed(INIT_KEY_SEED).public_key();
        let mut init = GenesisAccount::with_key(INIT_PRODUCER, init_key);
        init.core_balance = MAX_SHARE_SUPPLY / 10;
        init.dollar_balance = MAX_SHARE_SUPPLY / 10;
        GenesisState {
            chain_name: "ledgerd testnet".to_string(),
            initial_timestamp: 1_700_000_001,
            accounts: vec![
                init,
                GenesisAccount::with_key(TREASURY_ACCOUNT, init_key),
                GenesisAccount {
                    owner: Authority::null(),
                    active: Authority::null(),
                    basic: Authority::null(),
                    ..GenesisAccount::with_key(NULL_ACCOUNT, init_key)
                },
            ],
            producers: vec![GenesisProducer {
                account: INIT_PRODUCER.to_string(),
                signing_key: init_key,
            }],
            initial_core_per_dollar: 1,
            hardfork_0_1_time: 0,
            parameters: ChainParameters::default(),
        }
    }
}

impl GenesisState {
    pub fn chain_id(&self) -> ChainId {
        ChainId::from_name(&self.chain_name)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ChainError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.producers.is_empty() {
            return Err(ChainError::Config("genesis needs at least one producer".into()));
        }
        if self.initial_core_per_dollar <= 0 {
            return Err(ChainError::Config("initial price feed must be positive".into()));
        }
        if self.initial_timestamp % self.parameters.block_interval != 0 {
            return Err(ChainError::Config(
                "genesis time must be aligned to the block interval".into(),
            ));
        }
        for producer in &self.producers {
            if !self.accounts.iter().any(|a| a.name == producer.account) {
                return Err(ChainError::Config(format!(
                    "producer {} has no genesis account",
                    producer.account
                )));
            }
        }
        for required in [TREASURY_ACCOUNT, NULL_ACCOUNT] {
            if !self.accounts.iter().any(|a| a.name == required) {
                return Err(ChainError::Config(format!("genesis lacks the {required} account")));
            }
        }
        Ok(())
    }
}

/// Snapshot of every protocol constant, keyed by name.
pub fn get_config(parameters: &ChainParameters, chain_id: &ChainId) -> BTreeMap<String, Value> {
    let mut result = BTreeMap::new();
    let mut put = |name: &str, value: Value| {
        result.insert(name.to_string(), value);
    };
    put("CHAIN_ID", json!(chain_id.to_string()));
    put("BLOCK_INTERVAL", json!(parameters.block_interval));
    put("BLOCKS_PER_HOUR", json!(BLOCKS_PER_HOUR));
    put("MAX_TIME_UNTIL_EXPIRATION", json!(parameters.maximum_time_until_expiration));
    put("MAX_PROPOSAL_LIFETIME_SEC", json!(parameters.maximum_proposal_lifetime));
    put("MIN_ACCOUNT_NAME_LENGTH", json!(MIN_ACCOUNT_NAME_LENGTH));
    put("MAX_ACCOUNT_NAME_LENGTH", json!(MAX_ACCOUNT_NAME_LENGTH));
    put("MIN_ASSET_SYMBOL_LENGTH", json!(MIN_ASSET_SYMBOL_LENGTH));
    put("MAX_ASSET_SYMBOL_LENGTH", json!(MAX_ASSET_SYMBOL_LENGTH));
    put("MAX_ASSET_PRECISION", json!(MAX_ASSET_PRECISION));
    put("ASSET_PRECISION", json!(ASSET_PRECISION));
    put("MAX_SHARE_SUPPLY", json!(MAX_SHARE_SUPPLY));
    put("ASSET_CREATION_FEE", json!(ASSET_CREATION_FEE));
    put("SUBASSET_CREATION_FEE", json!(SUBASSET_CREATION_FEE));
    put("ASSET_CREATION_FEE_POST_UPGRADE", json!(ASSET_CREATION_FEE_POST_UPGRADE));
    put("ACCOUNT_CREATION_FEE", json!(ACCOUNT_CREATION_FEE));
    put("MAX_SIG_CHECK_DEPTH", json!(parameters.max_authority_depth));
    put("MAX_AUTHORITY_MEMBERSHIP", json!(parameters.max_authority_membership));
    put("MAX_TRANSACTION_SIZE", json!(parameters.maximum_transaction_size));
    put("MAX_BLOCK_SIZE", json!(parameters.maximum_block_size));
    put("MIN_UNDO_HISTORY", json!(parameters.min_undo_history));
    put("MAX_UNDO_HISTORY", json!(parameters.max_undo_history));
    put("FEED_INTERVAL_BLOCKS", json!(parameters.feed_interval_blocks));
    put("IRREVERSIBLE_THRESHOLD", json!(IRREVERSIBLE_THRESHOLD));
    put("PERCENT_100", json!(PERCENT_100));
    put("CORE_SYMBOL", json!(CORE_SYMBOL));
    put("DOLLAR_SYMBOL", json!(DOLLAR_SYMBOL));
    put("TREASURY_ACCOUNT", json!(TREASURY_ACCOUNT));
    put("NULL_ACCOUNT", json!(NULL_ACCOUNT));
    put("NUM_HARDFORKS", json!(NUM_HARDFORKS));
    put(
        "ALLOWED_ASSET_PERMISSIONS",
        json!(asset_flags::ALLOWED_ASSET_PERMISSIONS),
    );
    result
}
