use crate::authority::Authority;
use crate::database::{missing_accounts, Database};
use crate::ensure;
use crate::error::{ChainError, Result};
use crate::evaluator::{evaluate_error, insufficient_balance, unknown_object, Evaluator};
use crate::objects::{AccountObject, CORE_ASSET};
use crate::operations::{
    AccountCreateOperation, AccountUpdateOperation, OperationKind, TransferOperation,
};
use crate::parameters::{ACCOUNT_CREATION_FEE, TREASURY_ACCOUNT};
use crate::transaction::OperationResult;
use crate::types::Asset;

#[derive(Default)]
pub struct TransferEvaluator;

impl Evaluator for TransferEvaluator {
    type Operation = TransferOperation;

    fn do_evaluate(&mut self, db: &Database, op: &TransferOperation) -> Result<()> {
        db.get_asset_by_id(op.amount.asset_id)
            .map_err(|_| unknown_object::<TransferOperation>("asset", op.amount.asset_id))?;
        ensure!(
            db.find_account(&op.from).is_some(),
            unknown_object::<TransferOperation>("account", &op.from)
        );
        ensure!(
            db.find_account(&op.to).is_some(),
            unknown_object::<TransferOperation>("account", &op.to)
        );
        let available = db.get_balance(&op.from, op.amount.asset_id).amount;
        ensure!(
            available >= op.amount.amount,
            insufficient_balance::<TransferOperation>(&op.from, op.amount.amount, available)
        );
        Ok(())
    }

    fn do_apply(&mut self, db: &mut Database, op: &TransferOperation) -> Result<OperationResult> {
        db.adjust_balance(&op.from, Asset::new(-op.amount.amount, op.amount.asset_id))?;
        db.adjust_balance(&op.to, op.amount)?;
        Ok(OperationResult::Void)
    }
}

/// Every account named by `authorities` must exist.
pub(crate) fn check_authority_accounts<'a, O: OperationKind>(
    db: &Database,
    authorities: impl IntoIterator<Item = &'a Authority>,
) -> Result<()> {
    let missing = missing_accounts(db, authorities.into_iter().flat_map(|a| a.account_auths.keys()));
    match missing.into_iter().next() {
        Some(name) => Err(unknown_object::<O>("account", name)),
        None => Ok(()),
    }
}

#[derive(Default)]
pub struct AccountCreateEvaluator;

impl Evaluator for AccountCreateEvaluator {
    type Operation = AccountCreateOperation;

    fn do_evaluate(&mut self, db: &Database, op: &AccountCreateOperation) -> Result<()> {
        ensure!(
            db.find_account(&op.name).is_none(),
            evaluate_error::<AccountCreateOperation>(format!("account {} already exists", op.name))
        );
        ensure!(
            db.find_account(&op.creator).is_some(),
            unknown_object::<AccountCreateOperation>("account", &op.creator)
        );
        ensure!(
            op.fee.asset_id == CORE_ASSET && op.fee.amount >= ACCOUNT_CREATION_FEE,
            ChainError::InsufficientFee {
                required: format!("{ACCOUNT_CREATION_FEE} of asset {CORE_ASSET}"),
                provided: op.fee.to_string(),
            }
        );
        let available = db.get_balance(&op.creator, CORE_ASSET).amount;
        ensure!(
            available >= op.fee.amount,
            insufficient_balance::<AccountCreateOperation>(&op.creator, op.fee.amount, available)
        );
        check_authority_accounts::<AccountCreateOperation>(db, [&op.owner, &op.active, &op.basic])
    }

    fn do_apply(
        &mut self,
        db: &mut Database,
        op: &AccountCreateOperation,
    ) -> Result<OperationResult> {
        let created = db.head_block_time()?;
        db.adjust_balance(&op.creator, Asset::new(-op.fee.amount, CORE_ASSET))?;
        db.adjust_balance(TREASURY_ACCOUNT, op.fee)?;
        let account = db.create::<AccountObject>(|a| {
            a.name = op.name.clone();
            a.owner = op.owner.clone();
            a.active = op.active.clone();
            a.basic = op.basic.clone();
            a.memo_key = Some(op.memo_key);
            a.created = created;
        })?;
        Ok(OperationResult::ObjectId(account.id.raw()))
    }
}

#[derive(Default)]
pub struct AccountUpdateEvaluator;

impl Evaluator for AccountUpdateEvaluator {
    type Operation = AccountUpdateOperation;

    fn do_evaluate(&mut self, db: &Database, op: &AccountUpdateOperation) -> Result<()> {
        ensure!(
            db.find_account(&op.account).is_some(),
            unknown_object::<AccountUpdateOperation>("account", &op.account)
        );
        check_authority_accounts::<AccountUpdateOperation>(
            db,
            [&op.owner, &op.active, &op.basic].into_iter().flatten(),
        )
    }

    fn do_apply(
        &mut self,
        db: &mut Database,
        op: &AccountUpdateOperation,
    ) -> Result<OperationResult> {
        let id = db.get_account(&op.account)?.id;
        db.modify(id, |a| {
            if let Some(owner) = &op.owner {
                a.owner = owner.clone();
            }
            if let Some(active) = &op.active {
                a.active = active.clone();
            }
            if let Some(basic) = &op.basic {
                a.basic = basic.clone();
            }
            if let Some(memo_key) = op.memo_key {
                a.memo_key = Some(memo_key);
            }
        })?;
        Ok(OperationResult::Void)
    }
}
