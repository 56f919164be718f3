//! Node runtime: shares one [`Database`] between the transaction and block
//! entry points and the block producer loop.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::block::SignedBlock;
use crate::config::{Config, ProducerConfig};
use crate::consensus::ProducerSchedule;
use crate::database::Database;
use crate::error::ChainError;
use crate::storage::BlockStore;
use crate::transaction::{ProcessedTransaction, SignedTransaction};
use crate::types::{BlockId, PrivateKey};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("ledger error: {0}")]
    Chain(#[from] ChainError),
    #[error("ledger lock poisoned")]
    LockPoisoned,
    #[error("this node has no producer configured")]
    NotProducer,
    #[error("system clock is before the unix epoch")]
    Clock,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

struct Producer {
    name: String,
    key: PrivateKey,
}

pub struct Node {
    db: Arc<Mutex<Database>>,
    producer: Option<Producer>,
}

impl Node {
    pub fn new(db: Database, producer: Option<&ProducerConfig>) -> Self {
        Node {
            db: Arc::new(Mutex::new(db)),
            producer: producer.map(|p| Producer {
                name: p.name.clone(),
                key: p.signing_key(),
            }),
        }
    }

    /// Open the ledger described by `config`, replaying its block log.
    pub fn open(config: &Config) -> Result<Self> {
        let genesis = config.load_genesis()?;
        let db = Database::open(config, genesis)?;
        Ok(Self::new(db, config.producer.as_ref()))
    }

    pub fn database(&self) -> Arc<Mutex<Database>> {
        Arc::clone(&self.db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| RuntimeError::LockPoisoned)
    }

    pub fn head(&self) -> Result<(u32, BlockId)> {
        let db = self.lock()?;
        Ok((db.head_block_num()?, db.head_block_id()?))
    }

    pub fn submit_transaction(&self, trx: SignedTransaction) -> Result<ProcessedTransaction> {
        let processed = self.lock()?.push_transaction(trx)?;
        debug!(operations = processed.operation_results.len(), "transaction accepted");
        Ok(processed)
    }

    pub fn submit_block(&self, block: SignedBlock) -> Result<()> {
        self.lock()?.push_block(block)?;
        Ok(())
    }

    /// Produce a block at `now` if this node's producer owns that slot.
    /// Returns `None` when it is someone else's turn.
    pub fn produce_block(&self, now: u32) -> Result<Option<SignedBlock>> {
        let producer = self.producer.as_ref().ok_or(RuntimeError::NotProducer)?;
        let mut db = self.lock()?;
        let scheduled = {
            let schedule = ProducerSchedule::new(
                db.get_global_properties()?,
                db.get_dynamic_global_properties()?,
            );
            let slot = schedule.slot_at_time(now);
            slot > 0
                && schedule
                    .scheduled_producer(slot)
                    .is_some_and(|p| p.account == producer.name)
        };
        if !scheduled {
            return Ok(None);
        }
        let block = db.generate_block(now, &producer.name, &producer.key)?;
        Ok(Some(block))
    }

    pub fn flush(&self) -> Result<()> {
        self.lock()?.block_log().flush()?;
        Ok(())
    }

    /// Tick once per block interval and produce whenever scheduled, until
    /// `shutdown` flips to true.
    pub async fn run_producer(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.producer.is_none() {
            return Err(RuntimeError::NotProducer);
        }
        let interval_secs = self.lock()?.get_global_properties()?.parameters.block_interval;
        let mut ticker = tokio::time::interval(Duration::from_secs(u64::from(interval_secs.max(1))));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs, "block producer started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = unix_now()?;
                    match self.produce_block(now) {
                        Ok(Some(block)) => info!(
                            num = block.block_num(),
                            transactions = block.transactions.len(),
                            "produced block"
                        ),
                        Ok(None) => debug!(now, "not our slot"),
                        Err(e) => warn!(error = %e, "block production failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("block producer stopped");
        self.flush()
    }
}

fn unix_now() -> Result<u32> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::Clock)?
        .as_secs();
    u32::try_from(secs).map_err(|_| RuntimeError::Clock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{GenesisState, INIT_KEY_SEED, INIT_PRODUCER};

    fn node(producer: Option<ProducerConfig>) -> Node {
        let db = Database::open_temporary(GenesisState::default()).unwrap();
        Node::new(db, producer.as_ref())
    }

    fn init_producer() -> ProducerConfig {
        ProducerConfig {
            name: INIT_PRODUCER.into(),
            seed: INIT_KEY_SEED.into(),
        }
    }

    #[test]
    fn test_produce_only_in_own_slot() {
        let node = node(Some(init_producer()));
        let genesis_time = GenesisState::default().initial_timestamp;

        // still inside the head block's slot
        assert!(node.produce_block(genesis_time).unwrap().is_none());

        let block = node.produce_block(genesis_time + 3).unwrap().unwrap();
        assert_eq!(block.block_num(), 1);
        assert_eq!(node.head().unwrap().0, 1);
    }

    #[test]
    fn test_non_producer_cannot_produce() {
        let node = node(None);
        assert!(matches!(node.produce_block(0), Err(RuntimeError::NotProducer)));

        let stranger = node_with("stranger");
        let now = GenesisState::default().initial_timestamp + 3;
        assert!(stranger.produce_block(now).unwrap().is_none());
    }

    fn node_with(name: &str) -> Node {
        node(Some(ProducerConfig {
            name: name.into(),
            seed: "whatever".into(),
        }))
    }

    #[test]
    fn test_submitted_block_moves_head() {
        let producer = node(Some(init_producer()));
        let follower = node(None);
        let now = GenesisState::default().initial_timestamp + 3;
        let block = producer.produce_block(now).unwrap().unwrap();
        follower.submit_block(block.clone()).unwrap();
        assert_eq!(follower.head().unwrap(), (1, block.id().unwrap()));
    }

    #[tokio::test]
    async fn test_producer_loop_stops_on_shutdown() {
        let node = node(Some(init_producer()));
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        node.run_producer(rx).await.unwrap();
    }
}
