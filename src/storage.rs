//! Persistent log of irreversible blocks.
//!
//! The object store lives in memory; what survives a restart is the list of
//! blocks that can no longer be undone. On open the ledger replays them.

use std::path::Path;

use sled::{Db, Tree};

use crate::block::SignedBlock;
use crate::error::{ChainError, Result};
use crate::types::BlockId;

/// Append-only store of irreversible blocks.
pub trait BlockStore: Send + Sync {
    fn append(&self, block: &SignedBlock) -> Result<()>;
    fn fetch_by_number(&self, num: u32) -> Result<Option<SignedBlock>>;
    fn fetch_by_id(&self, id: &BlockId) -> Result<Option<SignedBlock>>;
    fn last(&self) -> Result<Option<SignedBlock>>;
    /// Drop every block above `num`.
    fn truncate_after(&self, num: u32) -> Result<()>;
    fn flush(&self) -> Result<()>;
}

pub struct BlockLog {
    db: Db,
    blocks_by_num: Tree,
    block_ids: Tree,
}

impl BlockLog {
    pub fn open(path: impl AsRef<Path>, cache_capacity_bytes: u64) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .cache_capacity(cache_capacity_bytes)
            .open()?;
        Self::from_db(db)
    }

    /// A log that is deleted when dropped.
    pub fn open_temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            blocks_by_num: db.open_tree("blocks_by_num")?,
            block_ids: db.open_tree("block_ids")?,
            db,
        })
    }

    pub fn len(&self) -> usize {
        self.blocks_by_num.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks_by_num.is_empty()
    }

    /// Stored blocks numbered `from..=to`, ascending.
    pub fn iter_range(&self, from: u32, to: u32) -> impl Iterator<Item = Result<SignedBlock>> + '_ {
        self.blocks_by_num
            .range(from.to_be_bytes()..=to.to_be_bytes())
            .values()
            .map(|encoded| Ok(bincode::deserialize(&encoded?)?))
    }
}

impl BlockStore for BlockLog {
    fn append(&self, block: &SignedBlock) -> Result<()> {
        let num = block.block_num();
        if let Some(last) = self.last()? {
            if last.block_num() + 1 != num {
                return Err(ChainError::UnlinkableBlock(format!(
                    "block log ends at #{}, cannot append #{num}",
                    last.block_num()
                )));
            }
        }
        let id = block.id()?;
        let encoded = bincode::serialize(block)?;
        self.blocks_by_num.insert(num.to_be_bytes(), encoded)?;
        self.block_ids.insert(id.0, num.to_be_bytes().to_vec())?;
        Ok(())
    }

    fn fetch_by_number(&self, num: u32) -> Result<Option<SignedBlock>> {
        let encoded = self.blocks_by_num.get(num.to_be_bytes())?;
        Ok(encoded.map(|e| bincode::deserialize(&e)).transpose()?)
    }

    fn fetch_by_id(&self, id: &BlockId) -> Result<Option<SignedBlock>> {
        match self.block_ids.get(id.0)? {
            Some(num) => {
                let bytes: [u8; 4] = num[..].try_into().map_err(|_| {
                    ChainError::IndexCorruption(format!("bad block number for {id}"))
                })?;
                self.fetch_by_number(u32::from_be_bytes(bytes))
            }
            None => Ok(None),
        }
    }

    fn last(&self) -> Result<Option<SignedBlock>> {
        match self.blocks_by_num.last()? {
            Some((_key, encoded)) => Ok(Some(bincode::deserialize(&encoded)?)),
            None => Ok(None),
        }
    }

    fn truncate_after(&self, num: u32) -> Result<()> {
        let Some(first) = num.checked_add(1) else {
            return Ok(());
        };
        let mut batch_nums = sled::Batch::default();
        let mut batch_ids = sled::Batch::default();
        for item in self.blocks_by_num.range(first.to_be_bytes()..) {
            let (key, encoded) = item?;
            let block: SignedBlock = bincode::deserialize(&encoded)?;
            batch_ids.remove(&block.id()?.0[..]);
            batch_nums.remove(key);
        }
        self.block_ids.apply_batch(batch_ids)?;
        self.blocks_by_num.apply_batch(batch_nums)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
