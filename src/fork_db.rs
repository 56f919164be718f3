//! In-memory tree of recent blocks, used to pick the longest chain and to
//! find the common ancestor when switching forks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::block::SignedBlock;
use crate::error::{ChainError, Result};
use crate::types::BlockId;

#[derive(Debug)]
pub struct ForkItem {
    pub num: u32,
    pub id: BlockId,
    pub previous_id: BlockId,
    pub data: Arc<SignedBlock>,
}

/// Each branch is ordered from its tip down to the block just above the
/// common ancestor.
pub type BranchPair = (Vec<Arc<ForkItem>>, Vec<Arc<ForkItem>>);

pub struct ForkDatabase {
    items: HashMap<BlockId, Arc<ForkItem>>,
    by_num: BTreeMap<u32, BTreeSet<BlockId>>,
    head: Option<Arc<ForkItem>>,
    max_size: u32,
    /// Blocks at or below this number can no longer be replaced.
    irreversible: u32,
}

impl ForkDatabase {
    pub fn new(max_size: u32) -> Self {
        ForkDatabase {
            items: HashMap::new(),
            by_num: BTreeMap::new(),
            head: None,
            max_size,
            irreversible: 0,
        }
    }

    pub fn reset(&mut self) {
        self.items.clear();
        self.by_num.clear();
        self.head = None;
        self.irreversible = 0;
    }

    /// Forget everything and root the tree at `block`.
    pub fn start_block(&mut self, block: SignedBlock) -> Result<Arc<ForkItem>> {
        self.reset();
        let item = Self::make_item(block)?;
        self.insert(Arc::clone(&item));
        self.head = Some(Arc::clone(&item));
        Ok(item)
    }

    fn make_item(block: SignedBlock) -> Result<Arc<ForkItem>> {
        Ok(Arc::new(ForkItem {
            num: block.block_num(),
            id: block.id()?,
            previous_id: block.previous(),
            data: Arc::new(block),
        }))
    }

    fn insert(&mut self, item: Arc<ForkItem>) {
        self.by_num.entry(item.num).or_default().insert(item.id);
        self.items.insert(item.id, item);
    }

    /// Insert `block`. It must be above the irreversible block and link to
    /// a known block, unless the tree is empty or nothing is irreversible
    /// yet and the block builds on genesis. The block becomes the head if it
    /// is the highest seen.
    pub fn push_block(&mut self, block: SignedBlock) -> Result<Arc<ForkItem>> {
        let item = Self::make_item(block)?;
        if let Some(existing) = self.items.get(&item.id) {
            return Ok(Arc::clone(existing));
        }
        if item.num <= self.irreversible {
            return Err(ChainError::UnlinkableBlock(format!(
                "#{} {} is at or below irreversible block #{}",
                item.num, item.id, self.irreversible
            )));
        }
        let genesis_child = item.previous_id == BlockId::default() && self.irreversible == 0;
        if self.head.is_some() && !genesis_child && !self.items.contains_key(&item.previous_id) {
            return Err(ChainError::UnlinkableBlock(format!(
                "#{} {} builds on unknown block {}",
                item.num, item.id, item.previous_id
            )));
        }
        self.insert(Arc::clone(&item));

        let higher = self.head.as_ref().map_or(true, |head| item.num > head.num);
        if higher {
            self.head = Some(Arc::clone(&item));
            self.prune();
        }
        Ok(item)
    }

    fn prune(&mut self) {
        let Some(head) = &self.head else {
            return;
        };
        if head.num <= self.max_size {
            return;
        }
        let min_num = head.num - self.max_size;
        let stale: Vec<u32> = self.by_num.range(..min_num).map(|(num, _)| *num).collect();
        for num in stale {
            if let Some(ids) = self.by_num.remove(&num) {
                for id in ids {
                    self.items.remove(&id);
                }
            }
        }
    }

    pub fn set_irreversible(&mut self, num: u32) {
        self.irreversible = self.irreversible.max(num);
    }

    pub fn irreversible(&self) -> u32 {
        self.irreversible
    }

    pub fn set_max_size(&mut self, max_size: u32) {
        self.max_size = max_size;
        self.prune();
    }

    pub fn head(&self) -> Option<Arc<ForkItem>> {
        self.head.clone()
    }

    pub fn set_head(&mut self, id: &BlockId) -> Result<()> {
        let item = self
            .items
            .get(id)
            .ok_or_else(|| ChainError::UnlinkableBlock(format!("cannot set head to unknown {id}")))?;
        self.head = Some(Arc::clone(item));
        Ok(())
    }

    /// Step the head back to its parent, or clear it if the parent was pruned.
    pub fn pop_block(&mut self) -> Result<()> {
        let head = self.head.take().ok_or(ChainError::PopEmptyChain)?;
        self.head = self.items.get(&head.previous_id).cloned();
        Ok(())
    }

    pub fn is_known_block(&self, id: &BlockId) -> bool {
        self.items.contains_key(id)
    }

    pub fn fetch_block(&self, id: &BlockId) -> Option<Arc<ForkItem>> {
        self.items.get(id).cloned()
    }

    /// Every known block at height `num`, on any branch.
    pub fn fetch_block_by_number(&self, num: u32) -> Vec<Arc<ForkItem>> {
        self.by_num
            .get(&num)
            .map(|ids| ids.iter().filter_map(|id| self.items.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// The block at `num` on the branch ending at the head.
    pub fn fetch_on_main_branch(&self, num: u32) -> Option<Arc<ForkItem>> {
        let mut cursor = self.head.clone()?;
        while cursor.num > num {
            cursor = self.items.get(&cursor.previous_id).cloned()?;
        }
        (cursor.num == num).then_some(cursor)
    }

    /// Walk both tips back to their common ancestor.
    pub fn fetch_branch_from(&self, first: &BlockId, second: &BlockId) -> Result<BranchPair> {
        let lookup = |id: &BlockId| {
            self.items.get(id).cloned().ok_or_else(|| {
                ChainError::UnlinkableBlock(format!("block {id} is not in the fork database"))
            })
        };
        let mut first_branch = Vec::new();
        let mut second_branch = Vec::new();
        let mut a = lookup(first)?;
        let mut b = lookup(second)?;

        while a.num > b.num {
            let previous = a.previous_id;
            first_branch.push(a);
            a = lookup(&previous)?;
        }
        while b.num > a.num {
            let previous = b.previous_id;
            second_branch.push(b);
            b = lookup(&previous)?;
        }
        while a.id != b.id {
            let (pa, pb) = (a.previous_id, b.previous_id);
            first_branch.push(a);
            second_branch.push(b);
            if pa == pb {
                return Ok((first_branch, second_branch));
            }
            a = lookup(&pa)?;
            b = lookup(&pb)?;
        }
        Ok((first_branch, second_branch))
    }

    /// Remove `id` and every block built on it. A removed head falls back to
    /// its closest surviving ancestor.
    pub fn remove(&mut self, id: &BlockId) {
        let mut doomed = vec![*id];
        let mut removed = Vec::new();
        while let Some(id) = doomed.pop() {
            let Some(item) = self.items.remove(&id) else {
                continue;
            };
            if let Some(ids) = self.by_num.get_mut(&item.num) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_num.remove(&item.num);
                }
            }
            if let Some(children) = self.by_num.get(&(item.num + 1)) {
                doomed.extend(
                    children
                        .iter()
                        .filter(|child| {
                            self.items
                                .get(*child)
                                .is_some_and(|c| c.previous_id == id)
                        })
                        .copied(),
                );
            }
            removed.push(item);
        }

        let head_removed = self
            .head
            .as_ref()
            .is_some_and(|head| removed.iter().any(|item| item.id == head.id));
        if head_removed {
            let mut cursor = self.head.take();
            while let Some(item) = cursor {
                if let Some(survivor) = self.items.get(&item.id) {
                    self.head = Some(Arc::clone(survivor));
                    break;
                }
                cursor = removed
                    .iter()
                    .find(|r| r.id == item.previous_id)
                    .cloned()
                    .or_else(|| self.items.get(&item.previous_id).cloned());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
