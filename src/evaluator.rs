//! Operation evaluators and the registry that dispatches to them.
//!
//! Evaluation is split in two: [`Evaluator::do_evaluate`] sees the ledger
//! read-only and checks stateful preconditions, [`Evaluator::do_apply`] gets
//! mutable access and performs the change. A fresh evaluator is built for
//! every operation so state found during evaluation can be carried into apply.

use std::collections::HashMap;

use tracing::debug;

use crate::database::Database;
use crate::error::{ChainError, Result};
use crate::operations::{CustomOperation, Operation, OperationKind, OperationTag};
use crate::transaction::OperationResult;

/// Context of the transaction an operation is evaluated in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionEvaluationState {
    /// The operation comes from an approved proposal rather than a signed
    /// transaction.
    pub is_proposed_trx: bool,
}

pub trait Evaluator: Default + 'static {
    type Operation: OperationKind;

    fn do_evaluate(&mut self, db: &Database, op: &Self::Operation) -> Result<()>;

    fn do_apply(&mut self, db: &mut Database, op: &Self::Operation) -> Result<OperationResult>;

    /// Evaluate `op` and, unless `apply` is false, apply it.
    fn start_evaluate(
        &mut self,
        db: &mut Database,
        state: &TransactionEvaluationState,
        op: &Operation,
        apply: bool,
    ) -> Result<OperationResult> {
        let concrete = <Self::Operation as OperationKind>::extract(op)
            .ok_or(ChainError::MissingEvaluator(op.tag()))?;
        debug!(
            op = <Self::Operation as OperationKind>::NAME,
            proposed = state.is_proposed_trx,
            apply,
            "evaluating operation"
        );
        self.do_evaluate(db, concrete)?;
        if !apply {
            return Ok(OperationResult::Void);
        }
        self.do_apply(db, concrete)
    }
}

/// Builds an evaluator and runs it.
pub type EvaluateFn =
    fn(&mut Database, &TransactionEvaluationState, &Operation, bool) -> Result<OperationResult>;

fn run_evaluator<E: Evaluator>(
    db: &mut Database,
    state: &TransactionEvaluationState,
    op: &Operation,
    apply: bool,
) -> Result<OperationResult> {
    E::default().start_evaluate(db, state, op, apply)
}

#[derive(Default, Clone)]
pub struct EvaluatorRegistry {
    evaluators: HashMap<OperationTag, EvaluateFn>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `E` for its operation tag, replacing any earlier evaluator.
    pub fn register_evaluator<E: Evaluator>(&mut self) {
        self.evaluators.insert(
            <E::Operation as OperationKind>::TAG,
            run_evaluator::<E> as EvaluateFn,
        );
    }

    pub fn get(&self, tag: OperationTag) -> Result<EvaluateFn> {
        self.evaluators
            .get(&tag)
            .copied()
            .ok_or(ChainError::MissingEvaluator(tag))
    }

    pub fn is_registered(&self, tag: OperationTag) -> bool {
        self.evaluators.contains_key(&tag)
    }

    /// Registry with every built-in evaluator.
    pub fn with_defaults() -> Self {
        use crate::account_evaluator::{
            AccountCreateEvaluator, AccountUpdateEvaluator, TransferEvaluator,
        };
        use crate::asset_evaluator::{
            AssetCreateEvaluator, AssetIssueEvaluator, AssetReserveEvaluator, AssetUpdateEvaluator,
        };
        use crate::content_evaluator::{ContentCreateEvaluator, ContentUpdateEvaluator};
        use crate::feed_evaluator::FeedPublishEvaluator;
        use crate::proposal_evaluator::{
            ProposalCreateEvaluator, ProposalDeleteEvaluator, ProposalUpdateEvaluator,
        };

        let mut registry = Self::new();
        registry.register_evaluator::<TransferEvaluator>();
        registry.register_evaluator::<AccountCreateEvaluator>();
        registry.register_evaluator::<AccountUpdateEvaluator>();
        registry.register_evaluator::<FeedPublishEvaluator>();
        registry.register_evaluator::<AssetCreateEvaluator>();
        registry.register_evaluator::<AssetIssueEvaluator>();
        registry.register_evaluator::<AssetReserveEvaluator>();
        registry.register_evaluator::<AssetUpdateEvaluator>();
        registry.register_evaluator::<ContentCreateEvaluator>();
        registry.register_evaluator::<ContentUpdateEvaluator>();
        registry.register_evaluator::<ProposalCreateEvaluator>();
        registry.register_evaluator::<ProposalUpdateEvaluator>();
        registry.register_evaluator::<ProposalDeleteEvaluator>();
        registry.register_evaluator::<CustomEvaluator>();
        registry
    }
}

/// Accepts custom operations without touching state. Applications interpret
/// them through the operation signals.
#[derive(Default)]
pub struct CustomEvaluator;

impl Evaluator for CustomEvaluator {
    type Operation = CustomOperation;

    fn do_evaluate(&mut self, _db: &Database, _op: &CustomOperation) -> Result<()> {
        Ok(())
    }

    fn do_apply(&mut self, _db: &mut Database, _op: &CustomOperation) -> Result<OperationResult> {
        Ok(OperationResult::Void)
    }
}

/// Error for a failed stateful precondition of operation `O`.
pub fn evaluate_error<O: OperationKind>(reason: impl Into<String>) -> ChainError {
    ChainError::OperationEvaluate {
        op: O::NAME,
        tag: O::TAG,
        reason: reason.into(),
    }
}

pub fn unknown_object<O: OperationKind>(kind: &'static str, key: impl ToString) -> ChainError {
    ChainError::UnknownObject {
        tag: O::TAG,
        kind,
        key: key.to_string(),
    }
}

pub fn insufficient_balance<O: OperationKind>(
    account: &str,
    required: i64,
    available: i64,
) -> ChainError {
    ChainError::InsufficientBalance {
        tag: O::TAG,
        account: account.to_string(),
        required,
        available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::TransferOperation;

    #[test]
    fn test_defaults_cover_every_operation() {
        let registry = EvaluatorRegistry::with_defaults();
        for tag in 0..=CustomOperation::TAG {
            assert!(registry.is_registered(tag), "tag {tag} has no evaluator");
        }
        assert!(matches!(
            registry.get(CustomOperation::TAG + 1),
            Err(ChainError::MissingEvaluator(14))
        ));
    }

    #[test]
    fn test_error_codes_follow_tag() {
        let err = evaluate_error::<TransferOperation>("nope");
        assert_eq!(err.code(), 3_050_000);
        let err = insufficient_balance::<CustomOperation>("alice", 2, 1);
        assert_eq!(err.code(), 3_051_302);
    }
}
