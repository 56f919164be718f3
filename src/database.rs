//! The ledger: object store, fork database and block log behind one API.
//!
//! Every mutation happens inside an undo session. Pending transactions share
//! one session that is set aside whenever a block is pushed; each applied
//! block keeps its own session on the undo stack until it becomes
//! irreversible, at which point the block is written to the block log.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::authority::{self, Approvals, Authority, AuthorityProvider, RequiredAuthorities};
use crate::block::SignedBlock;
use crate::config::Config;
use crate::consensus::ProducerSchedule;
use crate::ensure;
use crate::error::{ChainError, Result};
use crate::evaluator::{EvaluatorRegistry, TransactionEvaluationState};
use crate::fork_db::{ForkDatabase, ForkItem};
use crate::object_store::{Id, Index, Object, ObjectDatabase, UndoDatabase, UndoSession};
use crate::objects::{
    register_indices, AccountBalanceObject, AccountObject, AssetObject, BlockSummaryObject,
    ContentObject, DynamicGlobalPropertyObject, FeedHistoryObject, GlobalPropertyObject,
    ProducerInfo, ProposalObject, TransactionObject, CORE_ASSET, DOLLAR_ASSET,
};
use crate::operations::Operation;
use crate::parameters::{
    GenesisState, ASSET_PRECISION, CORE_SYMBOL, DOLLAR_SYMBOL, HARDFORK_0_1, MAX_SHARE_SUPPLY,
    NULL_ACCOUNT, NUM_HARDFORKS, TREASURY_ACCOUNT,
};
use crate::signals::{OperationNotification, Signals};
use crate::storage::{BlockLog, BlockStore};
use crate::transaction::{OperationResult, ProcessedTransaction, SignedTransaction};
use crate::types::{
    AccountName, Asset, AssetId, BlockId, ChainId, Digest, Price, PrivateKey,
};

const GLOBAL_PROPERTIES: Id<GlobalPropertyObject> = Id::new(0);
const DYNAMIC_GLOBAL_PROPERTIES: Id<DynamicGlobalPropertyObject> = Id::new(0);
const FEED_HISTORY: Id<FeedHistoryObject> = Id::new(0);

/// Checks that may be skipped, for replay of trusted blocks and for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipFlags {
    pub producer_signature: bool,
    pub transaction_signatures: bool,
    pub tapos_check: bool,
    pub merkle_check: bool,
    pub block_size_check: bool,
}

impl SkipFlags {
    pub const NONE: SkipFlags = SkipFlags {
        producer_signature: false,
        transaction_signatures: false,
        tapos_check: false,
        merkle_check: false,
        block_size_check: false,
    };

    /// Blocks from our own block log were fully validated once already.
    pub fn replay() -> Self {
        SkipFlags {
            producer_signature: true,
            transaction_signatures: true,
            tapos_check: true,
            ..Self::NONE
        }
    }
}

pub struct Database {
    objects: ObjectDatabase,
    fork_db: ForkDatabase,
    block_log: BlockLog,
    registry: EvaluatorRegistry,
    signals: Signals,
    chain_id: ChainId,
    genesis: GenesisState,
    skip: SkipFlags,

    pending_session: bool,
    pending_transactions: Vec<ProcessedTransaction>,
    popped_transactions: VecDeque<SignedTransaction>,
    /// Number of the block operations are currently applied for.
    notify_block_num: u32,

    /// Highest block whose undo state has been discarded. Nothing at or
    /// below it can be popped.
    committed_through: u32,
    last_persisted: u32,
    flush_every_blocks: u32,
    blocks_since_flush: u32,
}

impl UndoDatabase for Database {
    fn object_database(&mut self) -> &mut ObjectDatabase {
        &mut self.objects
    }
}

impl Database {
    /// Open the ledger under `config.data_dir`, initialize `genesis` and
    /// replay the block log.
    pub fn open(config: &Config, genesis: GenesisState) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let block_log = BlockLog::open(
            config.data_dir.join("blocks"),
            config.storage.cache_capacity_bytes,
        )?;
        let mut db = Self::with_block_log(block_log, genesis, config.storage.flush_every_blocks)?;
        db.reindex()?;
        Ok(db)
    }

    /// A ledger whose block log disappears on drop.
    pub fn open_temporary(genesis: GenesisState) -> Result<Self> {
        Self::with_block_log(BlockLog::open_temporary()?, genesis, 1)
    }

    fn with_block_log(
        block_log: BlockLog,
        genesis: GenesisState,
        flush_every_blocks: u32,
    ) -> Result<Self> {
        genesis.validate()?;
        let mut db = Database {
            objects: ObjectDatabase::new(),
            fork_db: ForkDatabase::new(genesis.parameters.max_undo_history),
            block_log,
            registry: EvaluatorRegistry::with_defaults(),
            signals: Signals::new(),
            chain_id: genesis.chain_id(),
            genesis,
            skip: SkipFlags::NONE,
            pending_session: false,
            pending_transactions: Vec::new(),
            popped_transactions: VecDeque::new(),
            notify_block_num: 0,
            committed_through: 0,
            last_persisted: 0,
            flush_every_blocks: flush_every_blocks.max(1),
            blocks_since_flush: 0,
        };
        db.init_genesis()?;
        Ok(db)
    }

    fn init_genesis(&mut self) -> Result<()> {
        let mut objects = ObjectDatabase::new();
        register_indices(&mut objects);
        self.objects = objects;
        self.fork_db.reset();
        self.pending_session = false;
        self.pending_transactions.clear();
        self.popped_transactions.clear();
        self.notify_block_num = 0;
        self.committed_through = 0;

        let genesis = self.genesis.clone();
        self.objects.create::<GlobalPropertyObject>(|p| {
            p.parameters = genesis.parameters.clone();
            p.active_producers = genesis
                .producers
                .iter()
                .map(|producer| ProducerInfo {
                    account: producer.account.clone(),
                    signing_key: producer.signing_key,
                })
                .collect();
        })?;
        self.objects.create::<DynamicGlobalPropertyObject>(|d| {
            d.time = genesis.initial_timestamp;
        })?;

        let core_supply = genesis_supply(&genesis, |a| a.core_balance)?;
        let dollar_supply = genesis_supply(&genesis, |a| a.dollar_balance)?;
        let core = self.objects.create::<AssetObject>(|a| {
            a.symbol = CORE_SYMBOL.to_string();
            a.issuer = NULL_ACCOUNT.to_string();
            a.precision = ASSET_PRECISION;
            a.current_supply = core_supply;
            a.options.max_supply = MAX_SHARE_SUPPLY;
        })?;
        ensure!(
            core.id == CORE_ASSET,
            ChainError::IndexCorruption("core asset must be the first asset".into())
        );
        let dollar = self.objects.create::<AssetObject>(|a| {
            a.symbol = DOLLAR_SYMBOL.to_string();
            a.issuer = TREASURY_ACCOUNT.to_string();
            a.precision = ASSET_PRECISION;
            a.current_supply = dollar_supply;
            a.options.max_supply = MAX_SHARE_SUPPLY;
        })?;
        ensure!(
            dollar.id == DOLLAR_ASSET,
            ChainError::IndexCorruption("dollar asset must be the second asset".into())
        );

        for account in &genesis.accounts {
            self.objects.create::<AccountObject>(|a| {
                a.name = account.name.clone();
                a.owner = account.owner.clone();
                a.active = account.active.clone();
                a.basic = account.basic.clone();
                a.memo_key = Some(account.memo_key);
                a.created = genesis.initial_timestamp;
            })?;
            if account.core_balance > 0 {
                self.adjust_balance(&account.name, Asset::new(account.core_balance, CORE_ASSET))?;
            }
            if account.dollar_balance > 0 {
                self.adjust_balance(
                    &account.name,
                    Asset::new(account.dollar_balance, DOLLAR_ASSET),
                )?;
            }
        }

        let initial_price = Price::new(
            Asset::new(1, DOLLAR_ASSET),
            Asset::new(genesis.initial_core_per_dollar, CORE_ASSET),
        );
        self.objects.create::<FeedHistoryObject>(|f| {
            f.current_median = initial_price;
            f.previous_median = initial_price;
        })?;
        self.objects.create::<BlockSummaryObject>(|s| {
            s.slot = 0;
            s.block_id = BlockId::default();
        })?;

        self.process_hardforks()?;
        info!(chain_id = %self.chain_id, "initialized genesis state");
        Ok(())
    }

    /// Rebuild state from genesis and replay every block in the block log.
    /// Returns the new head block number.
    pub fn reindex(&mut self) -> Result<u32> {
        self.init_genesis()?;
        let Some(last) = self.block_log.last()? else {
            self.last_persisted = 0;
            return Ok(0);
        };
        let last_num = last.block_num();
        info!(blocks = last_num, "replaying block log");
        self.last_persisted = last_num;

        let skip = SkipFlags::replay();
        for num in 1..=last_num {
            let block = self.block_log.fetch_by_number(num)?.ok_or_else(|| {
                ChainError::IndexCorruption(format!("block log is missing block #{num}"))
            })?;
            self.apply_block_with_session(&block, skip)?;
        }
        self.objects.commit(i64::from(last_num));
        self.committed_through = last_num;
        self.fork_db.start_block(last)?;
        self.fork_db.set_irreversible(last_num);
        info!(head = last_num, "replay complete");
        Ok(last_num)
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn genesis(&self) -> &GenesisState {
        &self.genesis
    }

    pub fn set_skip_flags(&mut self, skip: SkipFlags) {
        self.skip = skip;
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn signals_mut(&mut self) -> &mut Signals {
        &mut self.signals
    }

    /// Replace the evaluator table, e.g. to register extra evaluators.
    pub fn registry_mut(&mut self) -> &mut EvaluatorRegistry {
        &mut self.registry
    }

    pub fn block_log(&self) -> &BlockLog {
        &self.block_log
    }

    pub fn fork_db(&self) -> &ForkDatabase {
        &self.fork_db
    }

    pub fn pending_transactions(&self) -> &[ProcessedTransaction] {
        &self.pending_transactions
    }

    pub fn popped_transactions(&self) -> impl Iterator<Item = &SignedTransaction> {
        self.popped_transactions.iter()
    }

    // ---------------------------------------------------------------------
    // object access

    pub fn index<T: Object>(&self) -> Result<&Index<T>> {
        self.objects.index::<T>()
    }

    pub fn get<T: Object>(&self, id: Id<T>) -> Result<&T> {
        self.objects.get(id)
    }

    pub fn find<T: Object>(&self, id: Id<T>) -> Option<&T> {
        self.objects.find(id)
    }

    pub fn find_by_key<T: Object>(&self, key: &T::Key) -> Option<&T> {
        self.objects.find_by_key::<T>(key)
    }

    pub fn create<T: Object>(&mut self, constructor: impl FnOnce(&mut T)) -> Result<&T> {
        self.objects.create(constructor)
    }

    pub fn modify<T: Object>(&mut self, id: Id<T>, modifier: impl FnOnce(&mut T)) -> Result<()> {
        self.objects.modify(id, modifier)
    }

    pub fn remove<T: Object>(&mut self, id: Id<T>) -> Result<T> {
        self.objects.remove(id)
    }

    /// Digest over every index; equal digests mean equal ledger state.
    pub fn state_digest(&self) -> Result<Digest> {
        self.objects.state_digest()
    }

    pub fn revision(&self) -> i64 {
        self.objects.revision()
    }

    // ---------------------------------------------------------------------
    // queries

    pub fn get_global_properties(&self) -> Result<&GlobalPropertyObject> {
        self.objects.get(GLOBAL_PROPERTIES)
    }

    pub fn get_dynamic_global_properties(&self) -> Result<&DynamicGlobalPropertyObject> {
        self.objects.get(DYNAMIC_GLOBAL_PROPERTIES)
    }

    pub fn get_feed_history(&self) -> Result<&FeedHistoryObject> {
        self.objects.get(FEED_HISTORY)
    }

    pub fn head_block_num(&self) -> Result<u32> {
        Ok(self.get_dynamic_global_properties()?.head_block_number)
    }

    pub fn head_block_id(&self) -> Result<BlockId> {
        Ok(self.get_dynamic_global_properties()?.head_block_id)
    }

    pub fn head_block_time(&self) -> Result<u32> {
        Ok(self.get_dynamic_global_properties()?.time)
    }

    pub fn last_irreversible_block_num(&self) -> Result<u32> {
        Ok(self.get_dynamic_global_properties()?.last_irreversible_block_num)
    }

    pub fn has_hardfork(&self, hardfork: u32) -> Result<bool> {
        Ok(self.get_dynamic_global_properties()?.last_hardfork >= hardfork)
    }

    pub fn find_account(&self, name: &str) -> Option<&AccountObject> {
        self.objects.find_by_key::<AccountObject>(&name.to_string())
    }

    pub fn get_account(&self, name: &str) -> Result<&AccountObject> {
        self.find_account(name)
            .ok_or_else(|| ChainError::DatabaseQuery(format!("unknown account {name}")))
    }

    pub fn find_asset_by_symbol(&self, symbol: &str) -> Option<&AssetObject> {
        self.objects.find_by_key::<AssetObject>(&symbol.to_string())
    }

    pub fn get_asset(&self, symbol: &str) -> Result<&AssetObject> {
        self.find_asset_by_symbol(symbol)
            .ok_or_else(|| ChainError::DatabaseQuery(format!("unknown asset {symbol}")))
    }

    pub fn get_asset_by_id(&self, id: AssetId) -> Result<&AssetObject> {
        self.objects.get(id)
    }

    pub fn find_content(&self, url: &str) -> Option<&ContentObject> {
        self.objects.find_by_key::<ContentObject>(&url.to_string())
    }

    pub fn get_proposal(&self, id: Id<ProposalObject>) -> Result<&ProposalObject> {
        self.objects.get(id)
    }

    /// Balance of `owner` in `asset_id`, zero if never touched.
    pub fn get_balance(&self, owner: &str, asset_id: AssetId) -> Asset {
        self.objects
            .find_by_key::<AccountBalanceObject>(&(owner.to_string(), asset_id))
            .map_or(Asset::new(0, asset_id), AccountBalanceObject::get_balance)
    }

    /// The account holding a hashtag token, if anyone does.
    pub fn get_nft_holder(&self, asset: &AssetObject) -> Result<Option<AccountName>> {
        Ok(self
            .objects
            .index::<AccountBalanceObject>()?
            .iter()
            .find(|b| b.asset_id == asset.id && b.balance > 0)
            .map(|b| b.owner.clone()))
    }

    /// Add `delta` to a balance, creating the balance object on first use.
    pub fn adjust_balance(&mut self, owner: &str, delta: Asset) -> Result<()> {
        let key = (owner.to_string(), delta.asset_id);
        let existing = self
            .objects
            .find_by_key::<AccountBalanceObject>(&key)
            .map(|b| (b.id, b.balance));
        let current = existing.map_or(0, |(_, balance)| balance);
        let updated = current
            .checked_add(delta.amount)
            .filter(|b| *b >= 0)
            .ok_or_else(|| {
                ChainError::Utility(format!(
                    "balance of {owner} in {} cannot change by {} from {current}",
                    delta.asset_id, delta.amount
                ))
            })?;
        match existing {
            Some((id, _)) => self.objects.modify(id, |b| b.balance = updated),
            None => self
                .objects
                .create::<AccountBalanceObject>(|b| {
                    b.owner = owner.to_string();
                    b.asset_id = delta.asset_id;
                    b.balance = updated;
                })
                .map(|_| ()),
        }
    }

    /// Adjust the circulating supply of an asset.
    pub fn adjust_supply(&mut self, asset_id: AssetId, delta: i64) -> Result<()> {
        let asset = self.objects.get(asset_id)?;
        let updated = asset
            .current_supply
            .checked_add(delta)
            .filter(|s| (0..=asset.options.max_supply).contains(s))
            .ok_or_else(|| {
                ChainError::Utility(format!(
                    "supply of {} cannot change by {delta}",
                    asset.symbol
                ))
            })?;
        self.objects.modify(asset_id, |a| a.current_supply = updated)
    }

    pub fn fetch_block_by_id(&self, id: &BlockId) -> Result<Option<SignedBlock>> {
        if let Some(item) = self.fork_db.fetch_block(id) {
            return Ok(Some((*item.data).clone()));
        }
        self.block_log.fetch_by_id(id)
    }

    /// Block `num` on the current chain.
    pub fn fetch_block_by_number(&self, num: u32) -> Result<Option<SignedBlock>> {
        if num > self.head_block_num()? {
            return Ok(None);
        }
        if let Some(item) = self.fork_db.fetch_on_main_branch(num) {
            return Ok(Some((*item.data).clone()));
        }
        self.block_log.fetch_by_number(num)
    }

    // ---------------------------------------------------------------------
    // transactions

    /// Apply `trx` on top of the pending state and queue it for the next
    /// block.
    pub fn push_transaction(&mut self, trx: SignedTransaction) -> Result<ProcessedTransaction> {
        let skip = self.skip;
        self.push_transaction_with_skip(trx, skip)
    }

    pub fn push_transaction_with_skip(
        &mut self,
        trx: SignedTransaction,
        skip: SkipFlags,
    ) -> Result<ProcessedTransaction> {
        if !self.pending_session {
            self.objects.start_undo_session()?;
            self.pending_session = true;
        }
        self.notify_block_num = self.head_block_num()? + 1;

        let processed = {
            let mut session = UndoSession::start(self)?;
            let processed = session.apply_transaction(&trx, skip).inspect_err(log_internal)?;
            session.squash()?;
            processed
        };
        debug!(
            trx_id = %processed.signed.id()?,
            ops = processed.signed.trx.operations.len(),
            "pushed transaction"
        );
        self.pending_transactions.push(processed.clone());
        self.signals.emit_pending_transaction(&processed.signed);
        Ok(processed)
    }

    fn apply_transaction(
        &mut self,
        trx: &SignedTransaction,
        skip: SkipFlags,
    ) -> Result<ProcessedTransaction> {
        trx.trx.validate()?;

        let trx_id = trx.id()?;
        ensure!(
            self.objects
                .find_by_key::<TransactionObject>(&trx_id)
                .is_none(),
            ChainError::DuplicateTransaction(trx_id.to_string())
        );

        let params = self.get_global_properties()?.parameters.clone();
        if !skip.transaction_signatures {
            trx.verify_authority(&self.chain_id, &*self, params.max_authority_depth)?;
        }

        let head_time = self.head_block_time()?;
        if !skip.tapos_check {
            let summary = self
                .objects
                .find_by_key::<BlockSummaryObject>(&trx.trx.ref_block_num)
                .ok_or_else(|| {
                    ChainError::TaposMismatch(format!(
                        "no recent block in slot {}",
                        trx.trx.ref_block_num
                    ))
                })?;
            ensure!(
                summary.block_id.prefix() == trx.trx.ref_block_prefix,
                ChainError::TaposMismatch(format!(
                    "prefix {} does not match block {}",
                    trx.trx.ref_block_prefix, summary.block_id
                ))
            );
        }

        let expiration = trx.trx.expiration;
        ensure!(
            expiration > head_time,
            ChainError::TransactionExpired(format!("{expiration} is not after {head_time}"))
        );
        ensure!(
            expiration <= head_time.saturating_add(params.maximum_time_until_expiration),
            ChainError::TransactionExpired(format!(
                "{expiration} is more than {}s ahead of {head_time}",
                params.maximum_time_until_expiration
            ))
        );

        let size = trx.packed_size()?;
        ensure!(
            size <= params.maximum_transaction_size,
            ChainError::TransactionTooLarge {
                size,
                limit: params.maximum_transaction_size,
            }
        );

        self.objects.create::<TransactionObject>(|t| {
            t.trx_id = trx_id;
            t.expiration = expiration;
        })?;

        let state = TransactionEvaluationState::default();
        let mut operation_results = Vec::with_capacity(trx.trx.operations.len());
        for op in &trx.trx.operations {
            operation_results.push(self.apply_operation(&state, op)?);
        }
        Ok(ProcessedTransaction {
            signed: trx.clone(),
            operation_results,
        })
    }

    /// Dispatch one operation to its evaluator, notifying observers around it.
    pub(crate) fn apply_operation(
        &mut self,
        state: &TransactionEvaluationState,
        op: &Operation,
    ) -> Result<OperationResult> {
        let mut note = OperationNotification {
            op: op.clone(),
            result: None,
            block_num: self.notify_block_num,
            is_virtual: false,
            is_proposed: state.is_proposed_trx,
        };
        self.signals.emit_pre_apply_operation(&note);

        let evaluate = self.registry.get(op.tag())?;
        let result = evaluate(self, state, op, true)?;

        note.result = Some(result);
        self.signals.emit_post_apply_operation(&note);
        Ok(result)
    }

    /// Report an operation the ledger performed on its own.
    pub(crate) fn push_virtual_operation(&self, op: Operation) {
        let mut note = OperationNotification {
            op,
            result: None,
            block_num: self.notify_block_num,
            is_virtual: true,
            is_proposed: false,
        };
        self.signals.emit_pre_apply_operation(&note);
        note.result = Some(OperationResult::Void);
        self.signals.emit_post_apply_operation(&note);
    }

    // ---------------------------------------------------------------------
    // proposals

    /// True if the approvals collected so far satisfy every authority the
    /// proposed transaction needs.
    pub fn is_authorized_to_execute(&self, proposal: &ProposalObject) -> bool {
        let Ok(props) = self.get_global_properties() else {
            return false;
        };
        let required = RequiredAuthorities {
            active: proposal.required_active_approvals.clone(),
            owner: proposal.required_owner_approvals.clone(),
            basic: proposal
                .required_basic_approvals
                .difference(&proposal.available_basic_approvals)
                .cloned()
                .collect(),
            master_content: proposal.required_master_content_approvals.clone(),
            comp_content: proposal.required_comp_content_approvals.clone(),
            other: Vec::new(),
        };
        let approvals = Approvals {
            active: proposal.available_active_approvals.clone(),
            owner: proposal.available_owner_approvals.clone(),
        };
        match authority::verify_authority(
            &required,
            &proposal.available_key_approvals,
            self,
            props.parameters.max_authority_depth,
            true,
            &approvals,
        ) {
            Ok(()) => true,
            Err(e) => {
                log_internal(&e);
                false
            }
        }
    }

    /// Execute a proposal's operations atomically and remove it.
    pub fn push_proposal(&mut self, id: Id<ProposalObject>) -> Result<ProcessedTransaction> {
        let proposed = self.get_proposal(id)?.proposed_transaction.clone();
        let state = TransactionEvaluationState {
            is_proposed_trx: true,
        };

        let mut session = UndoSession::start(self)?;
        let mut operation_results = Vec::with_capacity(proposed.operations.len());
        for op in &proposed.operations {
            operation_results.push(session.apply_operation(&state, op)?);
        }
        session.remove(id)?;
        session.squash()?;

        Ok(ProcessedTransaction {
            signed: SignedTransaction::from(proposed),
            operation_results,
        })
    }

    // ---------------------------------------------------------------------
    // blocks

    pub fn push_block(&mut self, block: SignedBlock) -> Result<()> {
        let skip = self.skip;
        self.push_block_with_skip(block, skip)
    }

    /// Add a block to the fork database and apply it, switching forks if it
    /// completes a longer chain. Pending transactions are set aside while
    /// the block is applied and re-applied afterwards.
    pub fn push_block_with_skip(&mut self, block: SignedBlock, skip: SkipFlags) -> Result<()> {
        let mut pending = self.take_pending()?;
        let result = self.push_block_without_pending(block, skip);

        let mut restore: Vec<SignedTransaction> = self.popped_transactions.drain(..).collect();
        restore.append(&mut pending);
        self.restore_pending(restore);
        result
    }

    fn push_block_without_pending(&mut self, block: SignedBlock, skip: SkipFlags) -> Result<()> {
        let head_id = self.head_block_id()?;
        if self.fork_db.head().is_none() && block.previous() != head_id {
            return Err(ChainError::UnlinkableBlock(format!(
                "#{} does not build on the head {head_id}",
                block.block_num()
            )));
        }
        self.fork_db.push_block(block)?;
        let Some(new_head) = self.fork_db.head() else {
            return Ok(());
        };
        if new_head.id == head_id {
            return Ok(());
        }

        if new_head.previous_id != head_id {
            if new_head.num > self.head_block_num()? {
                return self.switch_forks(&new_head, skip);
            }
            debug!(num = new_head.num, "stored block on a shorter fork");
            return Ok(());
        }

        if let Err(e) = self.apply_block_with_session(&new_head.data, skip) {
            warn!(num = new_head.num, id = %new_head.id, error = %e, "rejected block");
            log_internal(&e);
            self.fork_db.remove(&new_head.id);
            return Err(e);
        }
        Ok(())
    }

    fn switch_forks(&mut self, new_head: &Arc<ForkItem>, skip: SkipFlags) -> Result<()> {
        let old_head_id = self.head_block_id()?;
        let (new_branch, old_branch) = self.fork_db.fetch_branch_from(&new_head.id, &old_head_id)?;
        let Some(fork_root) = new_branch.last().cloned() else {
            return Ok(());
        };
        let ancestor = fork_root.previous_id;
        if fork_root.num <= self.committed_through {
            self.fork_db.remove(&fork_root.id);
            self.fork_db.set_head(&old_head_id)?;
            return Err(ChainError::UnlinkableBlock(format!(
                "fork from #{} {ancestor} reaches below irreversible block #{}",
                fork_root.num - 1,
                self.committed_through
            )));
        }
        info!(
            from = self.head_block_num()?,
            to = new_head.num,
            popped = old_branch.len(),
            "switching forks"
        );

        let mut unwound = Vec::new();
        while self.head_block_id()? != ancestor {
            match self.pop_block_internal() {
                Ok(block) => unwound.push(block),
                Err(e) => {
                    error!(error = %e, "could not unwind to the fork point, restoring head");
                    self.fork_db.set_head(&old_head_id)?;
                    for block in unwound.iter().rev() {
                        self.apply_block_with_session(block, skip)?;
                    }
                    self.popped_transactions.clear();
                    return Err(e);
                }
            }
        }

        for item in new_branch.iter().rev() {
            let Err(e) = self.apply_block_with_session(&item.data, skip) else {
                continue;
            };
            warn!(num = item.num, id = %item.id, error = %e, "fork block failed, restoring previous branch");
            log_internal(&e);
            self.fork_db.remove(&item.id);

            while self.head_block_id()? != ancestor {
                self.pop_block_internal()?;
            }
            self.fork_db.set_head(&old_head_id)?;
            for old in old_branch.iter().rev() {
                self.apply_block_with_session(&old.data, skip)?;
            }
            self.popped_transactions.clear();
            return Err(e);
        }
        Ok(())
    }

    fn apply_block_with_session(&mut self, block: &SignedBlock, skip: SkipFlags) -> Result<()> {
        let mut session = UndoSession::start(self)?;
        session.apply_block(block, skip)?;
        session.push();

        let lib = self.last_irreversible_block_num()?;
        self.objects.commit(i64::from(lib));
        self.committed_through = self.committed_through.max(lib);
        self.fork_db.set_irreversible(self.committed_through);
        if let Err(e) = self.persist_irreversible(lib) {
            error!(error = %e, lib, "failed to write irreversible blocks");
        }
        self.trim_fork_db();
        info!(
            num = block.block_num(),
            producer = %block.header.producer,
            transactions = block.transactions.len(),
            lib,
            "applied block"
        );
        self.signals.emit_applied_block(block);
        Ok(())
    }

    fn apply_block(&mut self, block: &SignedBlock, skip: SkipFlags) -> Result<()> {
        let block_num = block.block_num();
        self.notify_block_num = block_num;

        let head_id = self.head_block_id()?;
        ensure!(
            block.previous() == head_id,
            ChainError::UnlinkableBlock(format!("#{block_num} does not build on {head_id}"))
        );

        let params = self.get_global_properties()?.parameters.clone();
        if !skip.block_size_check {
            let size = block.packed_size()?;
            ensure!(
                size <= params.maximum_block_size,
                ChainError::BlockTooLarge {
                    size,
                    limit: params.maximum_block_size,
                }
            );
        }

        let slot = ProducerSchedule::new(
            self.get_global_properties()?,
            self.get_dynamic_global_properties()?,
        )
        .validate_header(&block.header, &block.producer_signature, !skip.producer_signature)?;

        if !skip.merkle_check {
            ensure!(
                block.calculate_merkle_root()? == block.header.transaction_merkle_root,
                ChainError::MerkleMismatch
            );
        }

        for trx in &block.transactions {
            let processed = self.apply_transaction(&trx.signed, skip)?;
            ensure!(
                processed.operation_results == trx.operation_results,
                ChainError::BlockValidate(format!(
                    "operation results of {} differ from the block",
                    processed.signed.id()?
                ))
            );
        }

        self.update_global_dynamic_data(block, slot)?;
        self.update_block_summary(block)?;
        self.process_hardforks()?;
        self.clear_expired_transactions()?;
        self.clear_expired_proposals()?;
        self.update_median_feeds(block_num, params.feed_interval_blocks)?;
        self.update_last_irreversible_block()?;
        Ok(())
    }

    fn update_global_dynamic_data(&mut self, block: &SignedBlock, slot: u32) -> Result<()> {
        let id = block.id()?;
        self.objects.modify(DYNAMIC_GLOBAL_PROPERTIES, |d| {
            d.head_block_number = block.block_num();
            d.head_block_id = id;
            d.time = block.timestamp();
            d.current_producer = block.header.producer.clone();
            d.current_aslot += u64::from(slot);
        })
    }

    fn update_block_summary(&mut self, block: &SignedBlock) -> Result<()> {
        let id = block.id()?;
        let slot = (block.block_num() & 0xffff) as u16;
        match self
            .objects
            .find_by_key::<BlockSummaryObject>(&slot)
            .map(|s| s.id)
        {
            Some(summary) => self.objects.modify(summary, |s| s.block_id = id),
            None => self
                .objects
                .create::<BlockSummaryObject>(|s| {
                    s.slot = slot;
                    s.block_id = id;
                })
                .map(|_| ()),
        }
    }

    fn hardfork_time(&self, hardfork: u32) -> Result<u32> {
        match hardfork {
            HARDFORK_0_1 => Ok(self.genesis.hardfork_0_1_time),
            other => Err(ChainError::UnknownHardfork(other)),
        }
    }

    fn process_hardforks(&mut self) -> Result<()> {
        let head_time = self.head_block_time()?;
        let last = self.get_dynamic_global_properties()?.last_hardfork;
        for hardfork in (last + 1)..=NUM_HARDFORKS {
            if head_time < self.hardfork_time(hardfork)? {
                break;
            }
            self.apply_hardfork(hardfork)?;
        }
        Ok(())
    }

    fn apply_hardfork(&mut self, hardfork: u32) -> Result<()> {
        match hardfork {
            HARDFORK_0_1 => {
                let assets: Vec<AssetId> = self
                    .objects
                    .index::<AssetObject>()?
                    .iter()
                    .map(|a| a.id)
                    .collect();
                for id in assets {
                    self.objects.modify(id, |a| {
                        a.options.flags = 0;
                        a.options.issuer_permissions = 0;
                    })?;
                }
            }
            other => return Err(ChainError::UnknownHardfork(other)),
        }
        self.objects
            .modify(DYNAMIC_GLOBAL_PROPERTIES, |d| d.last_hardfork = hardfork)?;
        info!(hardfork, head = self.head_block_num()?, "applied hardfork");
        Ok(())
    }

    fn clear_expired_transactions(&mut self) -> Result<()> {
        let head_time = self.head_block_time()?;
        let expired: Vec<Id<TransactionObject>> = self
            .objects
            .index::<TransactionObject>()?
            .iter()
            .filter(|t| t.expiration <= head_time)
            .map(|t| t.id)
            .collect();
        for id in expired {
            self.objects.remove(id)?;
        }
        Ok(())
    }

    fn clear_expired_proposals(&mut self) -> Result<()> {
        let head_time = self.head_block_time()?;
        loop {
            let next = self
                .objects
                .index::<ProposalObject>()?
                .iter_by_key()
                .next()
                .filter(|p| p.expiration_time <= head_time)
                .cloned();
            let Some(proposal) = next else {
                return Ok(());
            };

            if self.is_authorized_to_execute(&proposal) {
                match self.push_proposal(proposal.id) {
                    Ok(_) => {
                        info!(proposal = %proposal.id, "executed expiring proposal");
                        continue;
                    }
                    Err(e) => {
                        info!(proposal = %proposal.id, error = %e, "expiring proposal failed to execute");
                    }
                }
            }
            self.objects.remove(proposal.id)?;
        }
    }

    fn update_median_feeds(&mut self, block_num: u32, interval: u32) -> Result<()> {
        if interval == 0 || block_num % interval != 0 {
            return Ok(());
        }
        let median = self.get_feed_history()?.median_feed();
        self.objects.modify(FEED_HISTORY, |f| {
            f.previous_median = f.current_median;
            if let Some(median) = median {
                f.current_median = median;
            }
        })
    }

    fn update_last_irreversible_block(&mut self) -> Result<()> {
        let props = self.get_global_properties()?;
        let reversible = props
            .parameters
            .reversible_blocks(props.active_producers.len());
        let dynamic = self.get_dynamic_global_properties()?;
        let lib = dynamic.head_block_number.saturating_sub(reversible);
        if lib > dynamic.last_irreversible_block_num {
            self.objects
                .modify(DYNAMIC_GLOBAL_PROPERTIES, |d| d.last_irreversible_block_num = lib)?;
        }
        Ok(())
    }

    /// Keep only the reversible blocks, plus irreversible ones still waiting
    /// for the block log.
    fn trim_fork_db(&mut self) {
        let keep_from = self.committed_through.min(self.last_persisted + 1);
        if let Some(head) = self.fork_db.head() {
            self.fork_db
                .set_max_size(head.num.saturating_sub(keep_from) + 1);
        }
    }

    fn persist_irreversible(&mut self, lib: u32) -> Result<()> {
        while self.last_persisted < lib {
            let num = self.last_persisted + 1;
            let item = self.fork_db.fetch_on_main_branch(num).ok_or_else(|| {
                ChainError::IndexCorruption(format!(
                    "irreversible block #{num} is not in the fork database"
                ))
            })?;
            self.block_log.append(&item.data)?;
            self.last_persisted = num;
            self.blocks_since_flush += 1;
            if self.blocks_since_flush >= self.flush_every_blocks {
                self.block_log.flush()?;
                self.blocks_since_flush = 0;
            }
        }
        Ok(())
    }

    /// Undo the head block. Its transactions, followed by any pending ones,
    /// are kept and re-applied on the next push.
    pub fn pop_block(&mut self) -> Result<SignedBlock> {
        let pending = self.take_pending()?;
        let popped = self.pop_block_internal();
        self.popped_transactions.extend(pending);
        popped
    }

    fn pop_block_internal(&mut self) -> Result<SignedBlock> {
        let head_num = self.head_block_num()?;
        ensure!(head_num > 0, ChainError::PopEmptyChain);
        ensure!(
            head_num > self.committed_through,
            ChainError::UndoDatabase(format!("block #{head_num} is irreversible"))
        );
        let head_id = self.head_block_id()?;
        let item = self.fork_db.fetch_block(&head_id).ok_or_else(|| {
            ChainError::UndoDatabase(format!("head block {head_id} is no longer reversible"))
        })?;

        self.objects.undo()?;
        if self.fork_db.head().is_some_and(|h| h.id == head_id) {
            self.fork_db.pop_block()?;
        }
        for trx in item.data.transactions.iter().rev() {
            self.popped_transactions.push_front(trx.signed.clone());
        }
        debug!(num = head_num, "popped block");
        Ok((*item.data).clone())
    }

    /// Undo the pending session and hand back every transaction waiting for
    /// a block, popped ones first.
    fn take_pending(&mut self) -> Result<Vec<SignedTransaction>> {
        if self.pending_session {
            self.objects.undo()?;
            self.pending_session = false;
        }
        let mut transactions: Vec<SignedTransaction> = self.popped_transactions.drain(..).collect();
        transactions.extend(self.pending_transactions.drain(..).map(|p| p.signed));
        Ok(transactions)
    }

    fn restore_pending(&mut self, transactions: Vec<SignedTransaction>) {
        for trx in transactions {
            if let Err(e) = self.push_transaction(trx) {
                debug!(error = %e, "dropped pending transaction");
            }
        }
    }

    /// Build a block for `when` from the pending transactions, sign it and
    /// push it.
    pub fn generate_block(
        &mut self,
        when: u32,
        producer: &str,
        signing_key: &PrivateKey,
    ) -> Result<SignedBlock> {
        let skip = self.skip;
        let timestamp = {
            let schedule = ProducerSchedule::new(
                self.get_global_properties()?,
                self.get_dynamic_global_properties()?,
            );
            let slot = schedule.slot_at_time(when);
            ensure!(
                slot > 0,
                ChainError::BlockTimestamp(format!("{when} is not after the head block"))
            );
            let scheduled = schedule.scheduled_producer(slot).ok_or_else(|| {
                ChainError::BlockValidate("no active producers are scheduled".into())
            })?;
            ensure!(
                scheduled.account == producer,
                ChainError::WrongProducer {
                    expected: scheduled.account.clone(),
                    actual: producer.to_string(),
                }
            );
            ensure!(
                scheduled.signing_key == signing_key.public_key(),
                ChainError::BadProducerSignature
            );
            schedule.slot_time(slot)
        };

        let candidates = self.take_pending()?;
        let head_id = self.head_block_id()?;
        let limit = self.get_global_properties()?.parameters.maximum_block_size;
        let mut total_size = 0usize;
        let mut included = Vec::new();
        {
            let mut outer = UndoSession::start(self)?;
            outer.notify_block_num = head_id.num() + 1;
            for trx in &candidates {
                let size = trx.packed_size()?;
                if total_size + size > limit {
                    debug!(size, "transaction does not fit in the block");
                    continue;
                }
                let mut inner = UndoSession::start(&mut *outer)?;
                let applied = inner.apply_transaction(trx, skip);
                match applied {
                    Ok(processed) => {
                        inner.squash()?;
                        total_size += size;
                        included.push(processed);
                    }
                    Err(e) => debug!(error = %e, "left transaction out of the block"),
                }
            }
        }

        let block = SignedBlock::new(head_id, timestamp, producer.to_string(), included, signing_key)?;
        self.popped_transactions.extend(candidates);
        self.push_block_with_skip(block.clone(), skip)?;
        Ok(block)
    }
}

fn genesis_supply(
    genesis: &GenesisState,
    balance: impl Fn(&crate::parameters::GenesisAccount) -> i64,
) -> Result<i64> {
    genesis
        .accounts
        .iter()
        .map(balance)
        .try_fold(0i64, |total, b| {
            if b < 0 {
                return None;
            }
            total.checked_add(b).filter(|t| *t <= MAX_SHARE_SUPPLY)
        })
        .ok_or_else(|| ChainError::Config("genesis balances are out of range".into()))
}

fn log_internal(e: &ChainError) {
    if e.is_internal() {
        error!(code = e.code(), error = %e, "internal ledger error");
    }
}

impl AuthorityProvider for Database {
    fn active_authority(&self, account: &str) -> Option<&Authority> {
        self.find_account(account).map(|a| &a.active)
    }

    fn owner_authority(&self, account: &str) -> Option<&Authority> {
        self.find_account(account).map(|a| &a.owner)
    }

    fn basic_authority(&self, account: &str) -> Option<&Authority> {
        self.find_account(account).map(|a| &a.basic)
    }

    fn master_content_authority(&self, url: &str) -> Option<&Authority> {
        self.find_content(url).map(|c| &c.manage_master)
    }

    fn comp_content_authority(&self, url: &str) -> Option<&Authority> {
        self.find_content(url).map(|c| &c.manage_comp)
    }
}

/// Accounts among `names` that do not exist.
pub(crate) fn missing_accounts<'a>(
    db: &Database,
    names: impl IntoIterator<Item = &'a AccountName>,
) -> BTreeSet<AccountName> {
    names
        .into_iter()
        .filter(|name| db.find_account(name).is_none())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::TransferOperation;
    use crate::parameters::{GenesisAccount, INIT_KEY_SEED, INIT_PRODUCER};
    use crate::transaction::Transaction;

    fn init_key() -> PrivateKey {
        PrivateKey::from_seed(INIT_KEY_SEED)
    }

    fn genesis() -> GenesisState {
        let mut genesis = GenesisState::default();
        let mut alice = GenesisAccount::with_key("alice", PrivateKey::from_seed("alice").public_key());
        alice.core_balance = 1_000;
        genesis.accounts.push(alice);
        genesis
            .accounts
            .push(GenesisAccount::with_key("bob", PrivateKey::from_seed("bob").public_key()));
        genesis
    }

    fn transfer(db: &Database, amount: i64) -> SignedTransaction {
        let mut trx = Transaction::new(vec![TransferOperation {
            from: "alice".into(),
            to: "bob".into(),
            amount: Asset::new(amount, CORE_ASSET),
            memo: None,
        }
        .into()]);
        trx.set_reference_block(&db.head_block_id().unwrap());
        trx.expiration = db.head_block_time().unwrap() + 60;
        let mut signed = SignedTransaction::from(trx);
        signed
            .sign(&PrivateKey::from_seed("alice"), db.chain_id())
            .unwrap();
        signed
    }

    fn next_block(db: &mut Database) -> SignedBlock {
        let when = db.head_block_time().unwrap() + db.genesis().parameters.block_interval;
        db.generate_block(when, INIT_PRODUCER, &init_key()).unwrap()
    }

    #[test]
    fn test_genesis_state() {
        let db = Database::open_temporary(genesis()).unwrap();
        assert_eq!(db.head_block_num().unwrap(), 0);
        assert_eq!(db.get_asset(CORE_SYMBOL).unwrap().id, CORE_ASSET);
        assert_eq!(db.get_asset(DOLLAR_SYMBOL).unwrap().id, DOLLAR_ASSET);
        assert_eq!(db.get_balance("alice", CORE_ASSET).amount, 1_000);
        let core = db.get_asset_by_id(CORE_ASSET).unwrap();
        let init = db.get_balance(INIT_PRODUCER, CORE_ASSET).amount;
        assert_eq!(core.current_supply, init + 1_000);
        assert!(db.has_hardfork(HARDFORK_0_1).unwrap());
        assert_eq!(db.revision(), 0);
    }

    #[test]
    fn test_pending_transaction_is_included() {
        let mut db = Database::open_temporary(genesis()).unwrap();
        db.push_transaction(transfer(&db, 100)).unwrap();
        assert_eq!(db.get_balance("bob", CORE_ASSET).amount, 100);
        assert_eq!(db.pending_transactions().len(), 1);

        let block = next_block(&mut db);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(db.head_block_num().unwrap(), 1);
        assert!(db.pending_transactions().is_empty());
        assert_eq!(db.get_balance("bob", CORE_ASSET).amount, 100);
        assert_eq!(db.revision(), 1);
    }

    #[test]
    fn test_duplicate_transaction_rejected() {
        let mut db = Database::open_temporary(genesis()).unwrap();
        let trx = transfer(&db, 100);
        db.push_transaction(trx.clone()).unwrap();
        let err = db.push_transaction(trx.clone()).unwrap_err();
        assert_eq!(err.code(), 3_030_012);

        next_block(&mut db);
        assert!(matches!(
            db.push_transaction(trx),
            Err(ChainError::DuplicateTransaction(_))
        ));
    }

    #[test]
    fn test_failed_transaction_leaves_no_trace() {
        let mut db = Database::open_temporary(genesis()).unwrap();
        let before = db.state_digest().unwrap();
        assert!(db.push_transaction(transfer(&db, 5_000)).is_err());
        assert!(db.pending_transactions().is_empty());
        // the failed transaction opened the pending session, nothing else
        db.take_pending().unwrap();
        assert_eq!(db.state_digest().unwrap(), before);
    }

    #[test]
    fn test_pop_block_restores_state() {
        let mut db = Database::open_temporary(genesis()).unwrap();
        let before = db.state_digest().unwrap();
        db.push_transaction(transfer(&db, 100)).unwrap();
        next_block(&mut db);

        let popped = db.pop_block().unwrap();
        assert_eq!(popped.block_num(), 1);
        assert_eq!(db.head_block_num().unwrap(), 0);
        assert_eq!(db.state_digest().unwrap(), before);
        assert_eq!(db.popped_transactions().count(), 1);

        // the popped transfer is re-applied with the next block
        next_block(&mut db);
        assert_eq!(db.get_balance("bob", CORE_ASSET).amount, 100);
    }

    #[test]
    fn test_pop_empty_chain() {
        let mut db = Database::open_temporary(genesis()).unwrap();
        assert!(matches!(db.pop_block(), Err(ChainError::PopEmptyChain)));
    }

    #[test]
    fn test_expired_and_future_transactions() {
        let mut db = Database::open_temporary(genesis()).unwrap();
        let mut signed = transfer(&db, 1);
        signed.trx.expiration = db.head_block_time().unwrap();
        signed.signatures.clear();
        signed.sign(&PrivateKey::from_seed("alice"), db.chain_id()).unwrap();
        assert_eq!(db.push_transaction(signed).unwrap_err().code(), 3_030_010);

        let mut signed = transfer(&db, 1);
        signed.trx.expiration = db.head_block_time().unwrap() + 2 * 60 * 60;
        signed.signatures.clear();
        signed.sign(&PrivateKey::from_seed("alice"), db.chain_id()).unwrap();
        assert_eq!(db.push_transaction(signed).unwrap_err().code(), 3_030_010);
    }

    #[test]
    fn test_tapos_mismatch() {
        let mut db = Database::open_temporary(genesis()).unwrap();
        let mut signed = transfer(&db, 1);
        signed.trx.ref_block_prefix ^= 1;
        signed.signatures.clear();
        signed.sign(&PrivateKey::from_seed("alice"), db.chain_id()).unwrap();
        assert_eq!(db.push_transaction(signed).unwrap_err().code(), 3_030_011);
    }

    #[test]
    fn test_wrong_producer_cannot_generate() {
        let mut db = Database::open_temporary(genesis()).unwrap();
        let when = db.head_block_time().unwrap() + 3;
        let err = db
            .generate_block(when, "alice", &PrivateKey::from_seed("alice"))
            .unwrap_err();
        assert!(matches!(err, ChainError::WrongProducer { .. }));
        let err = db
            .generate_block(when, INIT_PRODUCER, &PrivateKey::from_seed("alice"))
            .unwrap_err();
        assert!(matches!(err, ChainError::BadProducerSignature));
    }

    #[test]
    fn test_irreversible_blocks_reach_the_log() {
        let mut db = Database::open_temporary(genesis()).unwrap();
        for _ in 0..15 {
            next_block(&mut db);
        }
        let lib = db.last_irreversible_block_num().unwrap();
        assert_eq!(lib, 15 - db.genesis().parameters.min_undo_history);
        assert_eq!(db.block_log().last().unwrap().map(|b| b.block_num()), Some(lib));
        assert_eq!(db.objects.undo_depth(), (15 - lib) as usize);
        assert_eq!(
            db.fetch_block_by_number(2).unwrap().map(|b| b.block_num()),
            Some(2)
        );
    }

    #[test]
    fn test_missing_accounts() {
        let db = Database::open_temporary(genesis()).unwrap();
        let names = vec!["alice".to_string(), "zed".to_string()];
        assert_eq!(missing_accounts(&db, &names), BTreeSet::from(["zed".to_string()]));
    }
}
