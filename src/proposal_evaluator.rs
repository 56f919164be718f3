//! Proposals: transactions stored on chain that gather approvals from
//! several accounts before they execute.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::asset_evaluator::check_asset_flags;
use crate::authority::Authority;
use crate::database::Database;
use crate::ensure;
use crate::error::Result;
use crate::evaluator::{evaluate_error, unknown_object, Evaluator};
use crate::objects::ProposalObject;
use crate::operations::{
    operation_get_required_authorities, AssetCreateOperation, Operation,
    ProposalCreateOperation, ProposalDeleteOperation, ProposalUpdateOperation,
};
use crate::parameters::{HARDFORK_0_1, MAX_SIG_CHECK_DEPTH};
use crate::transaction::{OperationResult, Transaction};
use crate::types::AccountName;

#[derive(Default)]
pub struct ProposalCreateEvaluator {
    proposed_trx: Transaction,
    required_active: BTreeSet<AccountName>,
    required_owner: BTreeSet<AccountName>,
    required_basic: BTreeSet<AccountName>,
    master_content: BTreeSet<String>,
    comp_content: BTreeSet<String>,
    can_veto: BTreeSet<AccountName>,
}

impl ProposalCreateEvaluator {
    fn check_nested_ops(db: &Database, op: &ProposalCreateOperation) -> Result<()> {
        let upgraded = db.has_hardfork(HARDFORK_0_1)?;
        let mut update_seen = false;
        let mut max_referenced: Option<u64> = None;

        for nested in &op.proposed_ops {
            match nested {
                Operation::AssetCreate(create) if upgraded => {
                    check_asset_flags::<AssetCreateOperation>(
                        create.precision,
                        &create.common_options,
                    )?;
                }
                Operation::ProposalCreate(_) => {
                    return Err(evaluate_error::<ProposalCreateOperation>(
                        "cannot propose a proposal",
                    ));
                }
                Operation::ProposalUpdate(update) => {
                    ensure!(
                        !update_seen,
                        evaluate_error::<ProposalCreateOperation>(
                            "at most one proposal update can be nested in a proposal"
                        )
                    );
                    update_seen = true;
                    max_referenced = max_referenced.max(Some(update.proposal.instance()));
                }
                Operation::ProposalDelete(delete) => {
                    max_referenced = max_referenced.max(Some(delete.proposal.instance()));
                }
                _ => {}
            }
        }

        let next = db.index::<ProposalObject>()?.next_id().instance();
        if let Some(max) = max_referenced {
            ensure!(
                max < next,
                evaluate_error::<ProposalCreateOperation>(
                    "cannot update or delete a proposal with a future id"
                )
            );
        }
        Ok(())
    }
}

/// Accounts reachable through `authority`'s account delegates whose active
/// authority holds keys, following delegates up to `MAX_SIG_CHECK_DEPTH`.
fn collect_key_holders(
    db: &Database,
    authority: &Authority,
    depth: u32,
    dest: &mut BTreeSet<AccountName>,
) -> Result<()> {
    for name in authority.account_auths.keys() {
        let parent = &db
            .find_account(name)
            .ok_or_else(|| unknown_object::<ProposalCreateOperation>("account", name))?
            .active;
        if !parent.key_auths.is_empty() {
            dest.insert(name.clone());
        }
        if depth < MAX_SIG_CHECK_DEPTH {
            collect_key_holders(db, parent, depth + 1, dest)?;
        }
    }
    Ok(())
}

impl Evaluator for ProposalCreateEvaluator {
    type Operation = ProposalCreateOperation;

    fn do_evaluate(&mut self, db: &Database, op: &ProposalCreateOperation) -> Result<()> {
        Self::check_nested_ops(db, op)?;

        let head_time = db.head_block_time()?;
        let lifetime = db.get_global_properties()?.parameters.maximum_proposal_lifetime;
        ensure!(
            op.expiration_time > head_time,
            evaluate_error::<ProposalCreateOperation>("proposal has already expired on creation")
        );
        ensure!(
            u64::from(op.expiration_time) <= u64::from(head_time) + u64::from(lifetime),
            evaluate_error::<ProposalCreateOperation>(
                "proposal expiration time is too far in the future"
            )
        );
        if let Some(review) = op.review_period_seconds {
            ensure!(
                review < op.expiration_time - head_time,
                evaluate_error::<ProposalCreateOperation>(
                    "proposal review period must be less than its overall lifetime"
                )
            );
        }

        let mut trx = Transaction::new(op.proposed_ops.clone());
        trx.expiration = op.expiration_time;
        trx.validate()?;

        let mut required = operation_get_required_authorities(&trx.operations);
        self.can_veto = required
            .active
            .iter()
            .chain(&required.owner)
            .chain(&required.basic)
            .cloned()
            .collect();
        required.erase_subsumed_basic();

        ensure!(
            required.other.is_empty(),
            evaluate_error::<ProposalCreateOperation>(
                "cannot propose operations that require other authority"
            )
        );
        ensure!(
            required.basic.is_empty()
                || (required.active.is_empty()
                    && required.owner.is_empty()
                    && required.master_content.is_empty()
                    && required.comp_content.is_empty()),
            evaluate_error::<ProposalCreateOperation>(
                "cannot combine operations with basic approval and others"
            )
        );

        let mut content_accounts = BTreeSet::new();
        for url in &required.master_content {
            let content = db
                .find_content(url)
                .ok_or_else(|| unknown_object::<ProposalCreateOperation>("content", url))?;
            collect_key_holders(db, &content.manage_master, 0, &mut content_accounts)?;
        }
        for url in &required.comp_content {
            let content = db
                .find_content(url)
                .ok_or_else(|| unknown_object::<ProposalCreateOperation>("content", url))?;
            collect_key_holders(db, &content.manage_comp, 0, &mut content_accounts)?;
        }
        self.can_veto.extend(content_accounts.iter().cloned());
        required.active.extend(content_accounts);

        // owner approval implies active approval
        self.required_active = required
            .active
            .difference(&required.owner)
            .cloned()
            .collect();
        self.required_owner = required.owner;
        self.required_basic = required.basic;
        self.master_content = required.master_content;
        self.comp_content = required.comp_content;
        self.proposed_trx = trx;
        Ok(())
    }

    fn do_apply(
        &mut self,
        db: &mut Database,
        op: &ProposalCreateOperation,
    ) -> Result<OperationResult> {
        let head_time = db.head_block_time()?;
        let evaluated = std::mem::take(self);
        let proposal = db.create::<ProposalObject>(|p| {
            p.proposed_transaction = evaluated.proposed_trx;
            p.expiration_time = op.expiration_time;
            p.review_period_time = op.review_period_seconds.map(|s| head_time + s);
            p.required_active_approvals = evaluated.required_active;
            p.required_owner_approvals = evaluated.required_owner;
            p.required_basic_approvals = evaluated.required_basic;
            p.required_master_content_approvals = evaluated.master_content;
            p.required_comp_content_approvals = evaluated.comp_content;
            p.can_veto = evaluated.can_veto;
        })?;
        debug!(proposal = %proposal.id, expiration = proposal.expiration_time, "proposal created");
        Ok(OperationResult::ObjectId(proposal.id.raw()))
    }
}

#[derive(Default)]
pub struct ProposalUpdateEvaluator;

impl Evaluator for ProposalUpdateEvaluator {
    type Operation = ProposalUpdateOperation;

    fn do_evaluate(&mut self, db: &Database, op: &ProposalUpdateOperation) -> Result<()> {
        let proposal = db
            .find(op.proposal)
            .ok_or_else(|| unknown_object::<ProposalUpdateOperation>("proposal", op.proposal))?;

        if let Some(review) = proposal.review_period_time {
            ensure!(
                db.head_block_time()? > review
                    || (op.active_approvals_to_add.is_empty()
                        && op.owner_approvals_to_add.is_empty()),
                evaluate_error::<ProposalUpdateOperation>(
                    "proposal is in its review period, no new approvals may be added"
                )
            );
        }

        for id in &op.active_approvals_to_remove {
            ensure!(
                proposal.available_active_approvals.contains(id),
                evaluate_error::<ProposalUpdateOperation>(format!(
                    "{id} has not given active approval"
                ))
            );
        }
        for id in &op.owner_approvals_to_remove {
            ensure!(
                proposal.available_owner_approvals.contains(id),
                evaluate_error::<ProposalUpdateOperation>(format!(
                    "{id} has not given owner approval"
                ))
            );
        }
        for key in &op.key_approvals_to_remove {
            ensure!(
                proposal.available_key_approvals.contains(key),
                evaluate_error::<ProposalUpdateOperation>(format!("key {key} has not approved"))
            );
        }

        for id in &op.active_approvals_to_add {
            ensure!(
                !proposal.available_active_approvals.contains(id),
                evaluate_error::<ProposalUpdateOperation>(format!(
                    "already approved by active authority {id}"
                ))
            );
            ensure!(
                proposal.required_active_approvals.contains(id)
                    || proposal.required_basic_approvals.contains(id),
                evaluate_error::<ProposalUpdateOperation>(format!(
                    "active approval from {id} is not required"
                ))
            );
        }
        for id in &op.owner_approvals_to_add {
            ensure!(
                !proposal.available_owner_approvals.contains(id),
                evaluate_error::<ProposalUpdateOperation>(format!(
                    "already approved by owner authority {id}"
                ))
            );
            ensure!(
                proposal.required_owner_approvals.contains(id)
                    || proposal.required_active_approvals.contains(id)
                    || proposal.required_basic_approvals.contains(id),
                evaluate_error::<ProposalUpdateOperation>(format!(
                    "owner approval from {id} is not required"
                ))
            );
        }
        for key in &op.key_approvals_to_add {
            ensure!(
                !proposal.available_key_approvals.contains(key),
                evaluate_error::<ProposalUpdateOperation>(format!("key {key} already approved"))
            );
        }
        Ok(())
    }

    fn do_apply(
        &mut self,
        db: &mut Database,
        op: &ProposalUpdateOperation,
    ) -> Result<OperationResult> {
        db.modify(op.proposal, |p| {
            p.available_active_approvals
                .extend(op.active_approvals_to_add.iter().cloned());
            p.available_owner_approvals
                .extend(op.owner_approvals_to_add.iter().cloned());
            p.available_key_approvals
                .extend(op.key_approvals_to_add.iter().copied());
            for id in &op.active_approvals_to_remove {
                p.available_active_approvals.remove(id);
            }
            for id in &op.owner_approvals_to_remove {
                p.available_owner_approvals.remove(id);
            }
            for key in &op.key_approvals_to_remove {
                p.available_key_approvals.remove(key);
            }
        })?;

        // Proposals with a review period only execute at expiration.
        let proposal = db.get(op.proposal)?;
        if proposal.review_period_time.is_some() || !db.is_authorized_to_execute(proposal) {
            return Ok(OperationResult::Void);
        }
        match db.push_proposal(op.proposal) {
            Ok(_) => info!(proposal = %op.proposal, "approved proposal executed"),
            Err(e) => info!(
                proposal = %op.proposal,
                error = %e,
                "approved proposal failed to execute, will retry at expiration"
            ),
        }
        Ok(OperationResult::Void)
    }
}

#[derive(Default)]
pub struct ProposalDeleteEvaluator;

impl Evaluator for ProposalDeleteEvaluator {
    type Operation = ProposalDeleteOperation;

    fn do_evaluate(&mut self, db: &Database, op: &ProposalDeleteOperation) -> Result<()> {
        let proposal = db
            .find(op.proposal)
            .ok_or_else(|| unknown_object::<ProposalDeleteOperation>("proposal", op.proposal))?;
        ensure!(
            proposal.can_veto.contains(&op.vetoer),
            evaluate_error::<ProposalDeleteOperation>(format!(
                "{} can not veto this proposal",
                op.vetoer
            ))
        );
        Ok(())
    }

    fn do_apply(
        &mut self,
        db: &mut Database,
        op: &ProposalDeleteOperation,
    ) -> Result<OperationResult> {
        db.remove(op.proposal)?;
        Ok(OperationResult::Void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::AuthorityClass;
    use crate::objects::CORE_ASSET;
    use crate::object_store::Id;
    use crate::operations::{ContentCreateOperation, ContentSide, ContentUpdateOperation, TransferOperation};
    use crate::parameters::{GenesisAccount, GenesisState, TREASURY_ACCOUNT};
    use crate::types::{Asset, PrivateKey};

    fn db() -> Database {
        let mut genesis = GenesisState::default();
        for name in ["alice", "bob"] {
            let mut account =
                GenesisAccount::with_key(name, PrivateKey::from_seed(name).public_key());
            account.core_balance = 1_000;
            genesis.accounts.push(account);
        }
        Database::open_temporary(genesis).unwrap()
    }

    fn run<E: Evaluator>(db: &mut Database, op: &E::Operation) -> Result<OperationResult> {
        let mut evaluator = E::default();
        evaluator.do_evaluate(db, op)?;
        evaluator.do_apply(db, op)
    }

    fn transfer(from: &str, amount: i64) -> Operation {
        TransferOperation {
            from: from.into(),
            to: TREASURY_ACCOUNT.into(),
            amount: Asset::new(amount, CORE_ASSET),
            memo: None,
        }
        .into()
    }

    fn propose(db: &mut Database, ops: Vec<Operation>, review: Option<u32>) -> Id<ProposalObject> {
        let head = db.head_block_time().unwrap();
        let op = ProposalCreateOperation {
            expiration_time: head + 3600,
            proposed_ops: ops,
            review_period_seconds: review,
        };
        match run::<ProposalCreateEvaluator>(db, &op).unwrap() {
            OperationResult::ObjectId(raw) => Id::new(raw.instance),
            OperationResult::Void => panic!("proposal create returns its id"),
        }
    }

    fn approve(proposal: Id<ProposalObject>, account: &str) -> ProposalUpdateOperation {
        ProposalUpdateOperation {
            proposal,
            active_approvals_to_add: [account.to_string()].into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_collects_required_approvals() {
        let mut db = db();
        let id = propose(&mut db, vec![transfer("alice", 10), transfer("bob", 10)], None);
        let proposal = db.get(id).unwrap();
        let expected: BTreeSet<AccountName> = ["alice".to_string(), "bob".to_string()].into();
        assert_eq!(proposal.required_active_approvals, expected);
        assert_eq!(proposal.can_veto, expected);
        assert_eq!(
            proposal.proposed_transaction.expiration,
            proposal.expiration_time
        );
    }

    #[test]
    fn test_create_rejections() {
        let mut db = db();
        let head = db.head_block_time().unwrap();
        let lifetime = db
            .get_global_properties()
            .unwrap()
            .parameters
            .maximum_proposal_lifetime;
        let create = |expiration_time, review| ProposalCreateOperation {
            expiration_time,
            proposed_ops: vec![transfer("alice", 10)],
            review_period_seconds: review,
        };

        let expired = create(head, None);
        assert!(ProposalCreateEvaluator::default().do_evaluate(&db, &expired).is_err());
        let too_far = create(head + lifetime + 1, None);
        assert!(ProposalCreateEvaluator::default().do_evaluate(&db, &too_far).is_err());
        let long_review = create(head + 100, Some(100));
        assert!(ProposalCreateEvaluator::default().do_evaluate(&db, &long_review).is_err());

        let nested = ProposalCreateOperation {
            proposed_ops: vec![create(head + 100, None).into()],
            ..create(head + 100, None)
        };
        let err = ProposalCreateEvaluator::default()
            .do_evaluate(&db, &nested)
            .unwrap_err();
        assert_eq!(err.code(), 3_051_000);

        let future = ProposalCreateOperation {
            proposed_ops: vec![approve(Id::new(0), "alice").into()],
            ..create(head + 100, None)
        };
        assert!(ProposalCreateEvaluator::default().do_evaluate(&db, &future).is_err());

        let existing = propose(&mut db, vec![transfer("alice", 1)], None);
        let update_existing = ProposalCreateOperation {
            proposed_ops: vec![approve(existing, "alice").into()],
            ..create(head + 100, None)
        };
        ProposalCreateEvaluator::default()
            .do_evaluate(&db, &update_existing)
            .unwrap();
    }

    #[test]
    fn test_basic_cannot_mix_with_active() {
        let db = db();
        let custom = crate::operations::CustomOperation {
            required_auths: Default::default(),
            required_basic_auths: ["bob".to_string()].into(),
            id: 1,
            data: vec![],
        };
        let op = ProposalCreateOperation {
            expiration_time: db.head_block_time().unwrap() + 100,
            proposed_ops: vec![transfer("alice", 1), custom.into()],
            review_period_seconds: None,
        };
        assert!(ProposalCreateEvaluator::default().do_evaluate(&db, &op).is_err());
    }

    #[test]
    fn test_approval_executes_proposal() {
        let mut db = db();
        let treasury_before = db.get_balance(TREASURY_ACCOUNT, CORE_ASSET).amount;
        let id = propose(&mut db, vec![transfer("alice", 10), transfer("bob", 20)], None);

        run::<ProposalUpdateEvaluator>(&mut db, &approve(id, "alice")).unwrap();
        assert!(db.find(id).is_some());
        assert_eq!(db.get_balance("alice", CORE_ASSET).amount, 1_000);

        // already approved
        assert!(ProposalUpdateEvaluator
            .do_evaluate(&db, &approve(id, "alice"))
            .is_err());
        // not required
        assert!(ProposalUpdateEvaluator
            .do_evaluate(&db, &approve(id, TREASURY_ACCOUNT))
            .is_err());

        run::<ProposalUpdateEvaluator>(&mut db, &approve(id, "bob")).unwrap();
        assert!(db.find(id).is_none());
        assert_eq!(db.get_balance("alice", CORE_ASSET).amount, 990);
        assert_eq!(db.get_balance("bob", CORE_ASSET).amount, 980);
        assert_eq!(
            db.get_balance(TREASURY_ACCOUNT, CORE_ASSET).amount,
            treasury_before + 30
        );
    }

    #[test]
    fn test_failed_execution_keeps_proposal() {
        let mut db = db();
        let id = propose(&mut db, vec![transfer("alice", 5_000)], None);
        run::<ProposalUpdateEvaluator>(&mut db, &approve(id, "alice")).unwrap();
        let proposal = db.get(id).unwrap();
        assert!(proposal.available_active_approvals.contains("alice"));
        assert_eq!(db.get_balance("alice", CORE_ASSET).amount, 1_000);
    }

    #[test]
    fn test_review_period_blocks_new_approvals() {
        let mut db = db();
        let id = propose(&mut db, vec![transfer("alice", 10)], Some(60));
        let err = ProposalUpdateEvaluator
            .do_evaluate(&db, &approve(id, "alice"))
            .unwrap_err();
        assert_eq!(err.code(), 3_051_100);

        let remove = ProposalUpdateOperation {
            proposal: id,
            active_approvals_to_remove: ["alice".to_string()].into(),
            ..Default::default()
        };
        assert!(ProposalUpdateEvaluator.do_evaluate(&db, &remove).is_err());
    }

    #[test]
    fn test_delete_requires_veto_right() {
        let mut db = db();
        let id = propose(&mut db, vec![transfer("alice", 10)], None);
        let delete = |vetoer: &str| ProposalDeleteOperation {
            vetoer: vetoer.into(),
            authority_class: AuthorityClass::Active,
            proposal: id,
        };
        assert!(ProposalDeleteEvaluator.do_evaluate(&db, &delete("bob")).is_err());
        run::<ProposalDeleteEvaluator>(&mut db, &delete("alice")).unwrap();
        assert!(db.find(id).is_none());
    }

    #[test]
    fn test_content_update_needs_delegate_approval() {
        let mut db = db();
        let create = ContentCreateOperation {
            uploader: "alice".into(),
            url: "ipfs://song".into(),
            title: "song".into(),
            manage_master: Authority::new(1).with_account("bob", 1),
            manage_comp: Authority::new(1).with_account("alice", 1),
        };
        run::<crate::content_evaluator::ContentCreateEvaluator>(&mut db, &create).unwrap();

        let update = ContentUpdateOperation {
            side: ContentSide::Master,
            url: "ipfs://song".into(),
            new_title: Some("renamed".into()),
            new_manage_master: None,
            new_manage_comp: None,
        };
        let id = propose(&mut db, vec![update.into()], None);
        let proposal = db.get(id).unwrap();
        assert!(proposal.required_active_approvals.contains("bob"));
        assert!(proposal.can_veto.contains("bob"));

        run::<ProposalUpdateEvaluator>(&mut db, &approve(id, "bob")).unwrap();
        assert!(db.find(id).is_none());
        assert_eq!(db.find_content("ipfs://song").unwrap().title, "renamed");
    }
}
