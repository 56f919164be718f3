//! Notification hooks for code that observes the ledger without driving it.
//!
//! Observers run synchronously, in registration order, with read-only data.
//! Applied blocks are additionally fanned out over a tokio broadcast channel
//! for async consumers.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::block::SignedBlock;
use crate::operations::Operation;
use crate::transaction::{OperationResult, SignedTransaction};

/// Capacity of the applied block broadcast channel.
const APPLIED_BLOCK_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// An operation as seen by observers.
#[derive(Debug, Clone)]
pub struct OperationNotification {
    pub op: Operation,
    /// Unset before the operation is applied.
    pub result: Option<OperationResult>,
    /// Number of the block being built or applied.
    pub block_num: u32,
    /// Emitted by the ledger itself rather than carried in a transaction.
    pub is_virtual: bool,
    pub is_proposed: bool,
}

type Observer<T> = Box<dyn Fn(&T) + Send + Sync>;

struct ObserverList<T: ?Sized> {
    observers: Vec<(SubscriptionId, Observer<T>)>,
}

impl<T: ?Sized> Default for ObserverList<T> {
    fn default() -> Self {
        ObserverList {
            observers: Vec::new(),
        }
    }
}

impl<T: ?Sized> ObserverList<T> {
    fn notify(&self, value: &T) {
        for (_, observer) in &self.observers {
            observer(value);
        }
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }
}

pub struct Signals {
    next_id: u64,
    pre_apply_operation: ObserverList<OperationNotification>,
    post_apply_operation: ObserverList<OperationNotification>,
    applied_block: ObserverList<SignedBlock>,
    pending_transaction: ObserverList<SignedTransaction>,
    applied_block_tx: broadcast::Sender<Arc<SignedBlock>>,
}

impl Default for Signals {
    fn default() -> Self {
        let (applied_block_tx, _) = broadcast::channel(APPLIED_BLOCK_CHANNEL_CAPACITY);
        Signals {
            next_id: 0,
            pre_apply_operation: ObserverList::default(),
            post_apply_operation: ObserverList::default(),
            applied_block: ObserverList::default(),
            pending_transaction: ObserverList::default(),
            applied_block_tx,
        }
    }
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    pub fn on_pre_apply_operation(
        &mut self,
        observer: impl Fn(&OperationNotification) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.pre_apply_operation.observers.push((id, Box::new(observer)));
        id
    }

    pub fn on_post_apply_operation(
        &mut self,
        observer: impl Fn(&OperationNotification) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.post_apply_operation.observers.push((id, Box::new(observer)));
        id
    }

    pub fn on_applied_block(
        &mut self,
        observer: impl Fn(&SignedBlock) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.applied_block.observers.push((id, Box::new(observer)));
        id
    }

    pub fn on_pending_transaction(
        &mut self,
        observer: impl Fn(&SignedTransaction) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.pending_transaction.observers.push((id, Box::new(observer)));
        id
    }

    /// Receiver for every block applied from now on.
    pub fn subscribe_applied_blocks(&self) -> broadcast::Receiver<Arc<SignedBlock>> {
        self.applied_block_tx.subscribe()
    }

    /// Remove a synchronous observer. Returns false for unknown ids.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.pre_apply_operation.remove(id)
            || self.post_apply_operation.remove(id)
            || self.applied_block.remove(id)
            || self.pending_transaction.remove(id)
    }

    pub(crate) fn emit_pre_apply_operation(&self, note: &OperationNotification) {
        self.pre_apply_operation.notify(note);
    }

    pub(crate) fn emit_post_apply_operation(&self, note: &OperationNotification) {
        self.post_apply_operation.notify(note);
    }

    pub(crate) fn emit_pending_transaction(&self, trx: &SignedTransaction) {
        self.pending_transaction.notify(trx);
    }

    pub(crate) fn emit_applied_block(&self, block: &SignedBlock) {
        self.applied_block.notify(block);
        if self.applied_block_tx.receiver_count() > 0
            && self.applied_block_tx.send(Arc::new(block.clone())).is_err()
        {
            debug!("applied block receivers went away");
        }
    }
}
