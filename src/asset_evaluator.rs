//! Asset creation, issuance, burning and option updates.
//!
//! Before [`HARDFORK_0_1`] assets start with zero supply and the creation fee
//! is burned. After it, the whole `max_supply` is minted to the issuer at
//! creation, the fee is priced through the dollar feed and paid to the
//! treasury, and hashtag tokens can gate sub-asset creation.

use crate::database::Database;
use crate::ensure;
use crate::error::{ChainError, Result};
use crate::evaluator::{evaluate_error, insufficient_balance, unknown_object, Evaluator};
use crate::objects::{parent_symbol, AssetObject, AssetOptions, DOLLAR_ASSET};
use crate::operations::{
    AssetCreateOperation, AssetIssueOperation, AssetReserveOperation, AssetUpdateOperation,
    OperationKind,
};
use crate::parameters::{
    asset_flags, ASSET_CREATION_FEE, ASSET_CREATION_FEE_POST_UPGRADE, HARDFORK_0_1,
    NFT_SYMBOL_PREFIX, SUBASSET_CREATION_FEE, TREASURY_ACCOUNT,
};
use crate::transaction::OperationResult;
use crate::types::{AccountName, Asset, Price};

/// Flag rules that apply once the upgrade is active. Proposal creation runs
/// the same check on proposed asset creations.
pub fn check_asset_flags<O: OperationKind>(precision: u8, options: &AssetOptions) -> Result<()> {
    use asset_flags::{ALLOWED_ASSET_PERMISSIONS, ALLOW_SUBASSET_CREATION, HASHTAG};

    ensure!(
        options.issuer_permissions & !ALLOWED_ASSET_PERMISSIONS == 0,
        evaluate_error::<O>("disallowed permissions")
    );
    ensure!(
        options.flags & !ALLOWED_ASSET_PERMISSIONS == 0,
        evaluate_error::<O>("disallowed flags")
    );
    let hashtag = (options.flags | options.issuer_permissions) & HASHTAG != 0;
    ensure!(
        !hashtag || (precision == 0 && options.max_supply == 1),
        evaluate_error::<O>("hashtag assets need precision 0 and a max supply of 1")
    );
    ensure!(
        options.flags & ALLOW_SUBASSET_CREATION == 0 || options.flags & HASHTAG != 0,
        evaluate_error::<O>("allow_subasset_creation flag requires the hashtag flag")
    );
    ensure!(
        options.issuer_permissions & ALLOW_SUBASSET_CREATION == 0
            || options.issuer_permissions & HASHTAG != 0,
        evaluate_error::<O>("allow_subasset_creation permission requires the hashtag permission")
    );
    Ok(())
}

/// Minimum fee for creating `symbol`. Before the upgrade it is a flat dollar
/// amount; after it, the dollar amount is converted to core at the lower of
/// the previous and current median feeds.
pub fn asset_creation_fee(db: &Database, symbol: &str) -> Result<Asset> {
    let upgraded = db.has_hardfork(HARDFORK_0_1)?;
    let amount = if parent_symbol(symbol).is_some() {
        SUBASSET_CREATION_FEE
    } else if upgraded {
        ASSET_CREATION_FEE_POST_UPGRADE
    } else {
        ASSET_CREATION_FEE
    };
    let fee = Asset::new(amount, DOLLAR_ASSET);
    if !upgraded {
        return Ok(fee);
    }

    let feed = db.get_feed_history()?;
    let convert = |price: &Price| {
        fee.convert(price).ok_or_else(|| {
            ChainError::Utility(format!("cannot price {fee} through the median feed"))
        })
    };
    let previous = convert(&feed.previous_median)?;
    let current = convert(&feed.current_median)?;
    Ok(if previous.amount <= current.amount {
        previous
    } else {
        current
    })
}

#[derive(Default)]
pub struct AssetCreateEvaluator {
    upgraded: bool,
    /// Holder of the parent hashtag and its half of the fee.
    holder_share: Option<(AccountName, Asset)>,
}

impl Evaluator for AssetCreateEvaluator {
    type Operation = AssetCreateOperation;

    fn do_evaluate(&mut self, db: &Database, op: &AssetCreateOperation) -> Result<()> {
        self.upgraded = db.has_hardfork(HARDFORK_0_1)?;
        if self.upgraded {
            check_asset_flags::<AssetCreateOperation>(op.precision, &op.common_options)?;
        }

        ensure!(
            db.find_asset_by_symbol(&op.symbol).is_none(),
            ChainError::AssetAlreadyExists {
                tag: AssetCreateOperation::TAG,
                symbol: op.symbol.clone(),
            }
        );
        ensure!(
            db.find_account(&op.issuer).is_some(),
            unknown_object::<AssetCreateOperation>("account", &op.issuer)
        );

        let min_fee = asset_creation_fee(db, &op.symbol)?;
        ensure!(
            op.fee.asset_id == min_fee.asset_id && op.fee.amount >= min_fee.amount,
            ChainError::InsufficientFee {
                required: min_fee.to_string(),
                provided: op.fee.to_string(),
            }
        );
        let available = db.get_balance(&op.issuer, op.fee.asset_id).amount;
        ensure!(
            available >= op.fee.amount,
            insufficient_balance::<AssetCreateOperation>(&op.issuer, op.fee.amount, available)
        );

        let Some(prefix) = parent_symbol(&op.symbol) else {
            return Ok(());
        };
        let parent = db.find_asset_by_symbol(prefix).ok_or_else(|| {
            evaluate_error::<AssetCreateOperation>(format!(
                "sub-asset {} needs an existing {prefix}",
                op.symbol
            ))
        })?;
        if self.upgraded && prefix == NFT_SYMBOL_PREFIX {
            return Ok(());
        }
        if self.upgraded && parent.is_hashtag() {
            let holder = db.get_nft_holder(parent)?.ok_or_else(|| {
                evaluate_error::<AssetCreateOperation>(format!("nobody holds {prefix}"))
            })?;
            if parent.allows_subassets() {
                let share = Asset::new(op.fee.amount / 2, op.fee.asset_id);
                self.holder_share = Some((holder, share));
            } else {
                ensure!(
                    holder == op.issuer,
                    evaluate_error::<AssetCreateOperation>(format!(
                        "{} may only be created by the holder of {prefix}",
                        op.symbol
                    ))
                );
            }
            return Ok(());
        }
        ensure!(
            parent.issuer == op.issuer,
            evaluate_error::<AssetCreateOperation>(format!(
                "{} may only be created by the issuer of {prefix}",
                op.symbol
            ))
        );
        Ok(())
    }

    fn do_apply(&mut self, db: &mut Database, op: &AssetCreateOperation) -> Result<OperationResult> {
        db.adjust_balance(&op.issuer, Asset::new(-op.fee.amount, op.fee.asset_id))?;
        if self.upgraded {
            let mut treasury_fee = op.fee;
            if let Some((holder, share)) = &self.holder_share {
                db.adjust_balance(holder, *share)?;
                treasury_fee.amount -= share.amount;
            }
            db.adjust_balance(TREASURY_ACCOUNT, treasury_fee)?;
        } else {
            db.adjust_supply(op.fee.asset_id, -op.fee.amount)?;
        }

        let upgraded = self.upgraded;
        let asset = db.create::<AssetObject>(|a| {
            a.symbol = op.symbol.clone();
            a.issuer = op.issuer.clone();
            a.precision = op.precision;
            a.options = op.common_options.clone();
            a.current_supply = if upgraded { a.options.max_supply } else { 0 };
        })?;
        let (id, raw, max_supply) = (asset.id, asset.id.raw(), asset.options.max_supply);

        if self.upgraded {
            let supply = Asset::new(max_supply, id);
            db.adjust_balance(&op.issuer, supply)?;
            db.push_virtual_operation(
                AssetIssueOperation {
                    issuer: op.issuer.clone(),
                    asset_to_issue: supply,
                    issue_to_account: op.issuer.clone(),
                    memo: None,
                }
                .into(),
            );
        }
        Ok(OperationResult::ObjectId(raw))
    }
}

#[derive(Default)]
pub struct AssetIssueEvaluator;

impl Evaluator for AssetIssueEvaluator {
    type Operation = AssetIssueOperation;

    fn do_evaluate(&mut self, db: &Database, op: &AssetIssueOperation) -> Result<()> {
        let asset = db
            .get_asset_by_id(op.asset_to_issue.asset_id)
            .map_err(|_| unknown_object::<AssetIssueOperation>("asset", op.asset_to_issue.asset_id))?;
        ensure!(
            asset.issuer == op.issuer,
            evaluate_error::<AssetIssueOperation>(format!(
                "only {} may issue {}",
                asset.issuer, asset.symbol
            ))
        );
        // any existing account may hold any asset
        ensure!(
            db.find_account(&op.issue_to_account).is_some(),
            unknown_object::<AssetIssueOperation>("account", &op.issue_to_account)
        );
        let within_supply = asset
            .current_supply
            .checked_add(op.asset_to_issue.amount)
            .is_some_and(|supply| supply <= asset.options.max_supply);
        ensure!(
            within_supply,
            evaluate_error::<AssetIssueOperation>(format!(
                "issuing {} would exceed the max supply of {}",
                op.asset_to_issue.amount, asset.symbol
            ))
        );
        Ok(())
    }

    fn do_apply(&mut self, db: &mut Database, op: &AssetIssueOperation) -> Result<OperationResult> {
        db.adjust_balance(&op.issue_to_account, op.asset_to_issue)?;
        db.adjust_supply(op.asset_to_issue.asset_id, op.asset_to_issue.amount)?;
        Ok(OperationResult::Void)
    }
}

#[derive(Default)]
pub struct AssetReserveEvaluator;

impl Evaluator for AssetReserveEvaluator {
    type Operation = AssetReserveOperation;

    fn do_evaluate(&mut self, db: &Database, op: &AssetReserveOperation) -> Result<()> {
        let asset_id = op.amount_to_reserve.asset_id;
        db.get_asset_by_id(asset_id)
            .map_err(|_| unknown_object::<AssetReserveOperation>("asset", asset_id))?;
        ensure!(
            db.find_account(&op.payer).is_some(),
            unknown_object::<AssetReserveOperation>("account", &op.payer)
        );
        let available = db.get_balance(&op.payer, asset_id).amount;
        ensure!(
            available >= op.amount_to_reserve.amount,
            insufficient_balance::<AssetReserveOperation>(
                &op.payer,
                op.amount_to_reserve.amount,
                available
            )
        );
        Ok(())
    }

    fn do_apply(&mut self, db: &mut Database, op: &AssetReserveOperation) -> Result<OperationResult> {
        let reserved = op.amount_to_reserve;
        db.adjust_balance(&op.payer, Asset::new(-reserved.amount, reserved.asset_id))?;
        db.adjust_supply(reserved.asset_id, -reserved.amount)?;
        Ok(OperationResult::Void)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum UpdatePath {
    #[default]
    Issuer,
    /// Holder of a hashtag token toggling sub-asset creation.
    Holder,
}

#[derive(Default)]
pub struct AssetUpdateEvaluator {
    path: UpdatePath,
}

impl AssetUpdateEvaluator {
    fn check_issuer_update(asset: &AssetObject, op: &AssetUpdateOperation) -> Result<()> {
        let old = &asset.options;
        let new = &op.new_options;
        ensure!(
            new.issuer_permissions & !old.issuer_permissions == 0,
            evaluate_error::<AssetUpdateOperation>("cannot reinstate revoked issuer permissions")
        );
        ensure!(
            new.max_supply >= asset.current_supply,
            evaluate_error::<AssetUpdateOperation>(format!(
                "max supply cannot drop below the current supply of {}",
                asset.current_supply
            ))
        );
        check_asset_flags::<AssetUpdateOperation>(asset.precision, new)
    }

    /// Applies to holder and issuer alike: a flag may only change if the
    /// issuer holds the matching permission.
    fn check_flag_permissions(asset: &AssetObject, op: &AssetUpdateOperation) -> Result<()> {
        let old = &asset.options;
        ensure!(
            (op.new_options.flags ^ old.flags) & !old.issuer_permissions == 0,
            evaluate_error::<AssetUpdateOperation>("flag change is forbidden by issuer permissions")
        );
        Ok(())
    }

    /// A holder may only flip the sub-asset flag, nothing else.
    fn is_holder_update(asset: &AssetObject, op: &AssetUpdateOperation) -> bool {
        let old = &asset.options;
        let new = &op.new_options;
        op.new_issuer.is_none()
            && (new.flags ^ old.flags) & !asset_flags::ALLOW_SUBASSET_CREATION == 0
            && new.max_supply == old.max_supply
            && new.issuer_permissions == old.issuer_permissions
            && new.description == old.description
    }
}

impl Evaluator for AssetUpdateEvaluator {
    type Operation = AssetUpdateOperation;

    fn do_evaluate(&mut self, db: &Database, op: &AssetUpdateOperation) -> Result<()> {
        ensure!(
            db.has_hardfork(HARDFORK_0_1)?,
            evaluate_error::<AssetUpdateOperation>("assets cannot be updated before the upgrade")
        );
        let asset = db
            .get_asset_by_id(op.asset_to_update)
            .map_err(|_| unknown_object::<AssetUpdateOperation>("asset", op.asset_to_update))?;
        if let Some(new_issuer) = &op.new_issuer {
            ensure!(
                db.find_account(new_issuer).is_some(),
                unknown_object::<AssetUpdateOperation>("account", new_issuer)
            );
        }

        Self::check_flag_permissions(asset, op)?;

        let holds_token = asset.is_hashtag()
            && db.get_nft_holder(asset)?.is_some_and(|holder| holder == op.issuer);
        if holds_token && Self::is_holder_update(asset, op) {
            self.path = UpdatePath::Holder;
            return Ok(());
        }
        ensure!(
            asset.issuer == op.issuer,
            evaluate_error::<AssetUpdateOperation>(format!(
                "only the issuer may update {}",
                asset.symbol
            ))
        );
        self.path = UpdatePath::Issuer;
        Self::check_issuer_update(asset, op)
    }

    fn do_apply(&mut self, db: &mut Database, op: &AssetUpdateOperation) -> Result<OperationResult> {
        let path = self.path;
        db.modify(op.asset_to_update, |a| match path {
            UpdatePath::Holder => a.options.flags = op.new_options.flags,
            UpdatePath::Issuer => {
                a.options = op.new_options.clone();
                if let Some(new_issuer) = &op.new_issuer {
                    a.issuer = new_issuer.clone();
                }
            }
        })?;
        Ok(OperationResult::Void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::CORE_ASSET;
    use crate::parameters::{GenesisAccount, GenesisState};
    use crate::types::PrivateKey;

    fn db(upgraded: bool) -> Database {
        let mut genesis = GenesisState::default();
        if !upgraded {
            genesis.hardfork_0_1_time = u32::MAX;
        }
        let mut alice =
            GenesisAccount::with_key("alice", PrivateKey::from_seed("alice").public_key());
        alice.core_balance = 1_000 * 1_000_000;
        alice.dollar_balance = 1_000 * 1_000_000;
        genesis.accounts.push(alice);
        Database::open_temporary(genesis).unwrap()
    }

    fn create(symbol: &str, fee: Asset, flags: u16) -> AssetCreateOperation {
        let hashtag = flags & asset_flags::HASHTAG != 0;
        AssetCreateOperation {
            fee,
            issuer: "alice".into(),
            symbol: symbol.into(),
            precision: if hashtag { 0 } else { 4 },
            common_options: AssetOptions {
                max_supply: if hashtag { 1 } else { 1_000_000 },
                issuer_permissions: flags,
                flags,
                description: String::new(),
            },
        }
    }

    fn run<E: Evaluator>(db: &mut Database, op: &E::Operation) -> Result<OperationResult> {
        let mut evaluator = E::default();
        evaluator.do_evaluate(db, op)?;
        evaluator.do_apply(db, op)
    }

    #[test]
    fn test_flag_rules() {
        use asset_flags::*;
        let options = |flags, permissions, max_supply| AssetOptions {
            max_supply,
            issuer_permissions: permissions,
            flags,
            description: String::new(),
        };
        check_asset_flags::<AssetCreateOperation>(0, &options(HASHTAG, HASHTAG, 1)).unwrap();
        check_asset_flags::<AssetCreateOperation>(
            0,
            &options(HASHTAG | ALLOW_SUBASSET_CREATION, 0, 1),
        )
        .unwrap();
        assert!(check_asset_flags::<AssetCreateOperation>(0, &options(WHITE_LIST, 0, 10)).is_err());
        assert!(check_asset_flags::<AssetCreateOperation>(2, &options(HASHTAG, 0, 1)).is_err());
        assert!(check_asset_flags::<AssetCreateOperation>(0, &options(0, HASHTAG, 5)).is_err());
        assert!(check_asset_flags::<AssetCreateOperation>(
            0,
            &options(ALLOW_SUBASSET_CREATION, 0, 1)
        )
        .is_err());
        assert!(check_asset_flags::<AssetCreateOperation>(
            0,
            &options(HASHTAG, ALLOW_SUBASSET_CREATION, 1)
        )
        .is_err());
    }

    #[test]
    fn test_fee_before_upgrade_is_burned() {
        let mut db = db(false);
        let fee = asset_creation_fee(&db, "GOLD").unwrap();
        assert_eq!(fee, Asset::new(ASSET_CREATION_FEE, DOLLAR_ASSET));
        assert_eq!(
            asset_creation_fee(&db, "GOLD.BAR").unwrap().amount,
            SUBASSET_CREATION_FEE
        );

        let supply_before = db.get_asset_by_id(DOLLAR_ASSET).unwrap().current_supply;
        run::<AssetCreateEvaluator>(&mut db, &create("GOLD", fee, 0)).unwrap();
        let gold = db.get_asset("GOLD").unwrap();
        assert_eq!(gold.current_supply, 0);
        assert_eq!(
            db.get_asset_by_id(DOLLAR_ASSET).unwrap().current_supply,
            supply_before - ASSET_CREATION_FEE
        );
    }

    #[test]
    fn test_upgraded_create_mints_and_pays_treasury() {
        let mut db = db(true);
        let fee = asset_creation_fee(&db, "GOLD").unwrap();
        // one core per dollar at genesis
        assert_eq!(fee, Asset::new(ASSET_CREATION_FEE_POST_UPGRADE, CORE_ASSET));
        let treasury = db.get_balance(TREASURY_ACCOUNT, CORE_ASSET).amount;

        let err = run::<AssetCreateEvaluator>(
            &mut db,
            &create("GOLD", Asset::new(fee.amount, DOLLAR_ASSET), 0),
        )
        .unwrap_err();
        assert_eq!(err.code(), 3_030_007);

        run::<AssetCreateEvaluator>(&mut db, &create("GOLD", fee, 0)).unwrap();
        let gold = db.get_asset("GOLD").unwrap();
        assert_eq!(gold.current_supply, 1_000_000);
        assert_eq!(db.get_balance("alice", gold.id).amount, 1_000_000);
        assert_eq!(
            db.get_balance(TREASURY_ACCOUNT, CORE_ASSET).amount,
            treasury + fee.amount
        );

        let err = run::<AssetCreateEvaluator>(&mut db, &create("GOLD", fee, 0)).unwrap_err();
        assert_eq!(err.code(), 3_050_401);
    }

    #[test]
    fn test_hashtag_holder_controls_subassets() {
        let mut db = db(true);
        let fee = asset_creation_fee(&db, "TAG").unwrap();
        let mut tag_op = create("TAG", fee, asset_flags::HASHTAG);
        tag_op.common_options.issuer_permissions |= asset_flags::ALLOW_SUBASSET_CREATION;
        run::<AssetCreateEvaluator>(&mut db, &tag_op).unwrap();
        let tag = db.get_asset("TAG").unwrap().clone();
        assert_eq!(db.get_nft_holder(&tag).unwrap().as_deref(), Some("alice"));

        // hand the token to the treasury; alice can no longer create sub-assets
        run::<crate::account_evaluator::TransferEvaluator>(
            &mut db,
            &crate::operations::TransferOperation {
                from: "alice".into(),
                to: TREASURY_ACCOUNT.into(),
                amount: Asset::new(1, tag.id),
                memo: None,
            },
        )
        .unwrap();
        let sub_fee = asset_creation_fee(&db, "TAG.SUB").unwrap();
        assert!(run::<AssetCreateEvaluator>(&mut db, &create("TAG.SUB", sub_fee, 0)).is_err());

        // the holder opens sub-asset creation and collects half the fee
        run::<AssetUpdateEvaluator>(
            &mut db,
            &AssetUpdateOperation {
                issuer: TREASURY_ACCOUNT.into(),
                asset_to_update: tag.id,
                new_issuer: None,
                new_options: AssetOptions {
                    flags: asset_flags::HASHTAG | asset_flags::ALLOW_SUBASSET_CREATION,
                    ..tag.options.clone()
                },
            },
        )
        .unwrap();
        let treasury = db.get_balance(TREASURY_ACCOUNT, CORE_ASSET).amount;
        run::<AssetCreateEvaluator>(&mut db, &create("TAG.SUB", sub_fee, 0)).unwrap();
        assert_eq!(
            db.get_balance(TREASURY_ACCOUNT, CORE_ASSET).amount,
            treasury + sub_fee.amount
        );
    }

    #[test]
    fn test_holder_toggle_needs_issuer_permission() {
        let mut db = db(true);
        let fee = asset_creation_fee(&db, "TAG").unwrap();
        let mut tag_op = create("TAG", fee, asset_flags::HASHTAG);
        tag_op.common_options.issuer_permissions = 0;
        run::<AssetCreateEvaluator>(&mut db, &tag_op).unwrap();
        let tag = db.get_asset("TAG").unwrap().clone();
        assert_eq!(db.get_nft_holder(&tag).unwrap().as_deref(), Some("alice"));

        let toggle = AssetUpdateOperation {
            issuer: "alice".into(),
            asset_to_update: tag.id,
            new_issuer: None,
            new_options: AssetOptions {
                flags: asset_flags::HASHTAG | asset_flags::ALLOW_SUBASSET_CREATION,
                ..tag.options.clone()
            },
        };
        let err = AssetUpdateEvaluator::default()
            .do_evaluate(&db, &toggle)
            .unwrap_err();
        assert_eq!(err.code(), 3_050_700);
        assert!(!db.get_asset("TAG").unwrap().allows_subassets());
    }

    #[test]
    fn test_nft_children_are_open() {
        let mut db = db(true);
        let fee = asset_creation_fee(&db, "NFT").unwrap();
        let mut nft = create("NFT", fee, 0);
        nft.issuer = TREASURY_ACCOUNT.into();
        db.adjust_balance(TREASURY_ACCOUNT, fee).unwrap();
        run::<AssetCreateEvaluator>(&mut db, &nft).unwrap();

        let sub_fee = asset_creation_fee(&db, "NFT.A1").unwrap();
        let mut child = create("NFT.A1", sub_fee, asset_flags::HASHTAG);
        child.issuer = "alice".into();
        run::<AssetCreateEvaluator>(&mut db, &child).unwrap();
        assert_eq!(db.get_asset("NFT.A1").unwrap().issuer, "alice");
    }

    #[test]
    fn test_issue_and_reserve_move_supply() {
        let mut db = db(false);
        let fee = asset_creation_fee(&db, "GOLD").unwrap();
        run::<AssetCreateEvaluator>(&mut db, &create("GOLD", fee, 0)).unwrap();
        let gold = db.get_asset("GOLD").unwrap().id;

        let issue = AssetIssueOperation {
            issuer: "alice".into(),
            asset_to_issue: Asset::new(600_000, gold),
            issue_to_account: "alice".into(),
            memo: None,
        };
        run::<AssetIssueEvaluator>(&mut db, &issue).unwrap();
        // 1_200_000 would pass max_supply
        assert!(run::<AssetIssueEvaluator>(&mut db, &issue).is_err());

        let mut wrong_issuer = issue.clone();
        wrong_issuer.issuer = TREASURY_ACCOUNT.into();
        assert!(AssetIssueEvaluator.do_evaluate(&db, &wrong_issuer).is_err());

        let reserve = AssetReserveOperation {
            payer: "alice".into(),
            amount_to_reserve: Asset::new(100_000, gold),
        };
        run::<AssetReserveEvaluator>(&mut db, &reserve).unwrap();
        assert_eq!(db.get_asset_by_id(gold).unwrap().current_supply, 500_000);
        assert_eq!(db.get_balance("alice", gold).amount, 500_000);

        let too_much = AssetReserveOperation {
            amount_to_reserve: Asset::new(500_001, gold),
            ..reserve
        };
        let err = AssetReserveEvaluator.do_evaluate(&db, &too_much).unwrap_err();
        assert_eq!(err.code(), 3_050_602);
    }

    #[test]
    fn test_issuer_update_rules() {
        let mut db = db(true);
        let fee = asset_creation_fee(&db, "TAG").unwrap();
        run::<AssetCreateEvaluator>(
            &mut db,
            &create("TAG", fee, asset_flags::HASHTAG),
        )
        .unwrap();
        let tag = db.get_asset("TAG").unwrap().clone();

        let update = |options: AssetOptions, new_issuer: Option<&str>| AssetUpdateOperation {
            issuer: "alice".into(),
            asset_to_update: tag.id,
            new_issuer: new_issuer.map(str::to_string),
            new_options: options,
        };

        // revoke the hashtag permission, then try to get it back
        let revoked = AssetOptions {
            issuer_permissions: 0,
            ..tag.options.clone()
        };
        run::<AssetUpdateEvaluator>(&mut db, &update(revoked.clone(), None)).unwrap();
        let reinstate = update(tag.options.clone(), None);
        assert!(AssetUpdateEvaluator::default()
            .do_evaluate(&db, &reinstate)
            .is_err());

        // flags are frozen without permissions
        let unflag = AssetOptions {
            flags: 0,
            ..revoked.clone()
        };
        assert!(AssetUpdateEvaluator::default()
            .do_evaluate(&db, &update(unflag, None))
            .is_err());

        run::<AssetUpdateEvaluator>(&mut db, &update(revoked, Some(TREASURY_ACCOUNT))).unwrap();
        assert_eq!(db.get_asset("TAG").unwrap().issuer, TREASURY_ACCOUNT);
    }

    #[test]
    fn test_update_needs_upgrade() {
        let mut db = db(false);
        let fee = asset_creation_fee(&db, "GOLD").unwrap();
        run::<AssetCreateEvaluator>(&mut db, &create("GOLD", fee, 0)).unwrap();
        let gold = db.get_asset("GOLD").unwrap().clone();
        let op = AssetUpdateOperation {
            issuer: "alice".into(),
            asset_to_update: gold.id,
            new_issuer: None,
            new_options: gold.options.clone(),
        };
        let err = AssetUpdateEvaluator::default()
            .do_evaluate(&db, &op)
            .unwrap_err();
        assert_eq!(err.code(), 3_050_700);
    }
}
