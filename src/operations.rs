//! Typed ledger operations.
//!
//! Each operation validates itself statelessly and reports the authorities
//! that must sign for it. The [`Operation`] enum is the closed set carried in
//! transactions; its bincode tag is the variant index.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::authority::{Authority, AuthorityClass, RequiredAuthorities};
use crate::ensure;
use crate::error::{ChainError, Result};
use crate::object_store::Id;
use crate::objects::{AssetOptions, ProposalObject};
use crate::parameters::{
    MAX_ASSET_DESCRIPTION_LENGTH, MAX_ASSET_PRECISION, MAX_SHARE_SUPPLY, MAX_URL_LENGTH,
};
use crate::types::{is_valid_account_name, is_valid_symbol, AccountName, Asset, AssetId, Price, PublicKey};

pub type OperationTag = u16;

/// Per-variant behaviour shared by every operation struct.
pub trait OperationKind: Sized {
    const TAG: OperationTag;
    const NAME: &'static str;

    fn validate(&self) -> Result<()>;
    fn get_required_authorities(&self, required: &mut RequiredAuthorities);

    /// Borrow the concrete operation out of the enum.
    fn extract(op: &Operation) -> Option<&Self>;

    fn invalid(reason: impl Into<String>) -> ChainError {
        ChainError::OperationValidate {
            op: Self::NAME,
            tag: Self::TAG,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub amount: Asset,
    pub memo: Option<String>,
}

impl OperationKind for TransferOperation {
    const TAG: OperationTag = 0;
    const NAME: &'static str = "transfer";

    fn validate(&self) -> Result<()> {
        ensure!(self.amount.amount > 0, Self::invalid("must transfer a positive amount"));
        ensure!(self.from != self.to, Self::invalid("cannot transfer to self"));
        ensure!(
            is_valid_account_name(&self.to),
            Self::invalid(format!("invalid recipient {}", self.to))
        );
        Ok(())
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        required.active.insert(self.from.clone());
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::Transfer(o) => Some(o),
            _ => None,
        }
    }
}

fn validate_authority<O: OperationKind>(authority: &Authority, what: &str) -> Result<()> {
    ensure!(
        !authority.is_impossible(),
        O::invalid(format!("{what} authority can never be satisfied"))
    );
    for account in authority.account_auths.keys() {
        ensure!(
            is_valid_account_name(account),
            O::invalid(format!("{what} authority names invalid account {account}"))
        );
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCreateOperation {
    pub fee: Asset,
    pub creator: AccountName,
    pub name: AccountName,
    pub owner: Authority,
    pub active: Authority,
    pub basic: Authority,
    pub memo_key: PublicKey,
}

impl OperationKind for AccountCreateOperation {
    const TAG: OperationTag = 1;
    const NAME: &'static str = "account_create";

    fn validate(&self) -> Result<()> {
        ensure!(self.fee.amount >= 0, Self::invalid("fee cannot be negative"));
        ensure!(
            is_valid_account_name(&self.name),
            Self::invalid(format!("invalid account name {}", self.name))
        );
        validate_authority::<Self>(&self.owner, "owner")?;
        validate_authority::<Self>(&self.active, "active")?;
        validate_authority::<Self>(&self.basic, "basic")?;
        Ok(())
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        required.active.insert(self.creator.clone());
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::AccountCreate(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdateOperation {
    pub account: AccountName,
    pub owner: Option<Authority>,
    pub active: Option<Authority>,
    pub basic: Option<Authority>,
    pub memo_key: Option<PublicKey>,
}

impl OperationKind for AccountUpdateOperation {
    const TAG: OperationTag = 2;
    const NAME: &'static str = "account_update";

    fn validate(&self) -> Result<()> {
        ensure!(
            self.owner.is_some()
                || self.active.is_some()
                || self.basic.is_some()
                || self.memo_key.is_some(),
            Self::invalid("nothing to update")
        );
        for (authority, what) in [
            (&self.owner, "owner"),
            (&self.active, "active"),
            (&self.basic, "basic"),
        ] {
            if let Some(authority) = authority {
                validate_authority::<Self>(authority, what)?;
            }
        }
        Ok(())
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        if self.owner.is_some() {
            required.owner.insert(self.account.clone());
        } else {
            required.active.insert(self.account.clone());
        }
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::AccountUpdate(o) => Some(o),
            _ => None,
        }
    }
}

/// A producer's view of the dollar price in core: `base` is dollars, `quote`
/// is core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPublishOperation {
    pub publisher: AccountName,
    pub price: Price,
}

impl OperationKind for FeedPublishOperation {
    const TAG: OperationTag = 3;
    const NAME: &'static str = "feed_publish";

    fn validate(&self) -> Result<()> {
        ensure!(self.price.is_valid(), Self::invalid("price must be positive in two assets"));
        Ok(())
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        required.active.insert(self.publisher.clone());
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::FeedPublish(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetCreateOperation {
    pub fee: Asset,
    pub issuer: AccountName,
    pub symbol: String,
    pub precision: u8,
    pub common_options: AssetOptions,
}

impl OperationKind for AssetCreateOperation {
    const TAG: OperationTag = 4;
    const NAME: &'static str = "asset_create";

    fn validate(&self) -> Result<()> {
        ensure!(
            is_valid_symbol(&self.symbol),
            Self::invalid(format!("invalid symbol {}", self.symbol))
        );
        ensure!(
            self.precision <= MAX_ASSET_PRECISION,
            Self::invalid(format!("precision {} exceeds {MAX_ASSET_PRECISION}", self.precision))
        );
        ensure!(self.fee.amount >= 0, Self::invalid("fee cannot be negative"));
        validate_options::<Self>(&self.common_options)
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        required.active.insert(self.issuer.clone());
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::AssetCreate(o) => Some(o),
            _ => None,
        }
    }
}

fn validate_options<O: OperationKind>(options: &AssetOptions) -> Result<()> {
    ensure!(
        options.max_supply > 0 && options.max_supply <= MAX_SHARE_SUPPLY,
        O::invalid(format!("max supply must be within 1..={MAX_SHARE_SUPPLY}"))
    );
    ensure!(
        options.description.len() <= MAX_ASSET_DESCRIPTION_LENGTH,
        O::invalid("description is too long")
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetIssueOperation {
    pub issuer: AccountName,
    pub asset_to_issue: Asset,
    pub issue_to_account: AccountName,
    pub memo: Option<String>,
}

impl OperationKind for AssetIssueOperation {
    const TAG: OperationTag = 5;
    const NAME: &'static str = "asset_issue";

    fn validate(&self) -> Result<()> {
        ensure!(
            self.asset_to_issue.amount > 0 && self.asset_to_issue.amount <= MAX_SHARE_SUPPLY,
            Self::invalid("issued amount out of range")
        );
        Ok(())
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        required.active.insert(self.issuer.clone());
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::AssetIssue(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReserveOperation {
    pub payer: AccountName,
    pub amount_to_reserve: Asset,
}

impl OperationKind for AssetReserveOperation {
    const TAG: OperationTag = 6;
    const NAME: &'static str = "asset_reserve";

    fn validate(&self) -> Result<()> {
        ensure!(
            self.amount_to_reserve.amount > 0 && self.amount_to_reserve.amount <= MAX_SHARE_SUPPLY,
            Self::invalid("reserved amount out of range")
        );
        Ok(())
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        required.active.insert(self.payer.clone());
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::AssetReserve(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetUpdateOperation {
    /// The account performing the update: the issuer, or the holder of a
    /// hashtag asset.
    pub issuer: AccountName,
    pub asset_to_update: AssetId,
    pub new_issuer: Option<AccountName>,
    pub new_options: AssetOptions,
}

impl OperationKind for AssetUpdateOperation {
    const TAG: OperationTag = 7;
    const NAME: &'static str = "asset_update";

    fn validate(&self) -> Result<()> {
        if let Some(new_issuer) = &self.new_issuer {
            ensure!(
                new_issuer != &self.issuer,
                Self::invalid("new issuer must differ from the current one")
            );
        }
        validate_options::<Self>(&self.new_options)
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        required.active.insert(self.issuer.clone());
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::AssetUpdate(o) => Some(o),
            _ => None,
        }
    }
}

fn validate_url<O: OperationKind>(url: &str) -> Result<()> {
    ensure!(
        !url.is_empty() && url.len() <= MAX_URL_LENGTH,
        O::invalid(format!("url must be 1..={MAX_URL_LENGTH} bytes"))
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentCreateOperation {
    pub uploader: AccountName,
    pub url: String,
    pub title: String,
    pub manage_master: Authority,
    pub manage_comp: Authority,
}

impl OperationKind for ContentCreateOperation {
    const TAG: OperationTag = 8;
    const NAME: &'static str = "content_create";

    fn validate(&self) -> Result<()> {
        validate_url::<Self>(&self.url)?;
        validate_authority::<Self>(&self.manage_master, "master content")?;
        validate_authority::<Self>(&self.manage_comp, "comp content")
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        required.active.insert(self.uploader.clone());
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::ContentCreate(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentSide {
    Master,
    Comp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUpdateOperation {
    pub side: ContentSide,
    pub url: String,
    pub new_title: Option<String>,
    pub new_manage_master: Option<Authority>,
    pub new_manage_comp: Option<Authority>,
}

impl OperationKind for ContentUpdateOperation {
    const TAG: OperationTag = 9;
    const NAME: &'static str = "content_update";

    fn validate(&self) -> Result<()> {
        validate_url::<Self>(&self.url)?;
        ensure!(
            self.new_title.is_some()
                || self.new_manage_master.is_some()
                || self.new_manage_comp.is_some(),
            Self::invalid("nothing to update")
        );
        ensure!(
            self.side == ContentSide::Master || self.new_manage_master.is_none(),
            Self::invalid("only the master side may replace the master authority")
        );
        if let Some(authority) = &self.new_manage_master {
            validate_authority::<Self>(authority, "master content")?;
        }
        if let Some(authority) = &self.new_manage_comp {
            validate_authority::<Self>(authority, "comp content")?;
        }
        Ok(())
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        match self.side {
            ContentSide::Master => required.master_content.insert(self.url.clone()),
            ContentSide::Comp => required.comp_content.insert(self.url.clone()),
        };
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::ContentUpdate(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalCreateOperation {
    pub expiration_time: u32,
    pub proposed_ops: Vec<Operation>,
    pub review_period_seconds: Option<u32>,
}

impl OperationKind for ProposalCreateOperation {
    const TAG: OperationTag = 10;
    const NAME: &'static str = "proposal_create";

    fn validate(&self) -> Result<()> {
        ensure!(!self.proposed_ops.is_empty(), Self::invalid("no operations proposed"));
        for op in &self.proposed_ops {
            op.validate()?;
        }
        Ok(())
    }

    fn get_required_authorities(&self, _required: &mut RequiredAuthorities) {}

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::ProposalCreate(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalUpdateOperation {
    pub proposal: Id<ProposalObject>,
    pub active_approvals_to_add: BTreeSet<AccountName>,
    pub active_approvals_to_remove: BTreeSet<AccountName>,
    pub owner_approvals_to_add: BTreeSet<AccountName>,
    pub owner_approvals_to_remove: BTreeSet<AccountName>,
    pub key_approvals_to_add: BTreeSet<PublicKey>,
    pub key_approvals_to_remove: BTreeSet<PublicKey>,
}

impl OperationKind for ProposalUpdateOperation {
    const TAG: OperationTag = 11;
    const NAME: &'static str = "proposal_update";

    fn validate(&self) -> Result<()> {
        ensure!(
            !(self.active_approvals_to_add.is_empty()
                && self.active_approvals_to_remove.is_empty()
                && self.owner_approvals_to_add.is_empty()
                && self.owner_approvals_to_remove.is_empty()
                && self.key_approvals_to_add.is_empty()
                && self.key_approvals_to_remove.is_empty()),
            Self::invalid("no approvals added or removed")
        );
        ensure!(
            self.active_approvals_to_add
                .is_disjoint(&self.active_approvals_to_remove),
            Self::invalid("cannot add and remove the same active approval")
        );
        ensure!(
            self.owner_approvals_to_add
                .is_disjoint(&self.owner_approvals_to_remove),
            Self::invalid("cannot add and remove the same owner approval")
        );
        ensure!(
            self.key_approvals_to_add.is_disjoint(&self.key_approvals_to_remove),
            Self::invalid("cannot add and remove the same key approval")
        );
        Ok(())
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        required.active.extend(self.active_approvals_to_add.iter().cloned());
        required.active.extend(self.active_approvals_to_remove.iter().cloned());
        required.owner.extend(self.owner_approvals_to_add.iter().cloned());
        required.owner.extend(self.owner_approvals_to_remove.iter().cloned());

        let keys: Vec<&PublicKey> = self
            .key_approvals_to_add
            .iter()
            .chain(self.key_approvals_to_remove.iter())
            .collect();
        if !keys.is_empty() {
            let mut other = Authority::new(keys.len() as u32);
            for key in keys {
                other.key_auths.insert(*key, 1);
            }
            required.other.push(other);
        }
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::ProposalUpdate(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDeleteOperation {
    pub vetoer: AccountName,
    pub authority_class: AuthorityClass,
    pub proposal: Id<ProposalObject>,
}

impl OperationKind for ProposalDeleteOperation {
    const TAG: OperationTag = 12;
    const NAME: &'static str = "proposal_delete";

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        let set = match self.authority_class {
            AuthorityClass::Owner => &mut required.owner,
            AuthorityClass::Active => &mut required.active,
            AuthorityClass::Basic => &mut required.basic,
        };
        set.insert(self.vetoer.clone());
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::ProposalDelete(o) => Some(o),
            _ => None,
        }
    }
}

/// Opaque payload for applications layered on the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomOperation {
    pub required_auths: BTreeSet<AccountName>,
    pub required_basic_auths: BTreeSet<AccountName>,
    pub id: u16,
    pub data: Vec<u8>,
}

impl OperationKind for CustomOperation {
    const TAG: OperationTag = 13;
    const NAME: &'static str = "custom";

    fn validate(&self) -> Result<()> {
        ensure!(
            !(self.required_auths.is_empty() && self.required_basic_auths.is_empty()),
            Self::invalid("at least one authority is required")
        );
        Ok(())
    }

    fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        required.active.extend(self.required_auths.iter().cloned());
        required.basic.extend(self.required_basic_auths.iter().cloned());
    }

    fn extract(op: &Operation) -> Option<&Self> {
        match op {
            Operation::Custom(o) => Some(o),
            _ => None,
        }
    }
}

/// Every operation the ledger understands. Variant order fixes the wire tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Transfer(TransferOperation),
    AccountCreate(AccountCreateOperation),
    AccountUpdate(AccountUpdateOperation),
    FeedPublish(FeedPublishOperation),
    AssetCreate(AssetCreateOperation),
    AssetIssue(AssetIssueOperation),
    AssetReserve(AssetReserveOperation),
    AssetUpdate(AssetUpdateOperation),
    ContentCreate(ContentCreateOperation),
    ContentUpdate(ContentUpdateOperation),
    ProposalCreate(ProposalCreateOperation),
    ProposalUpdate(ProposalUpdateOperation),
    ProposalDelete(ProposalDeleteOperation),
    Custom(CustomOperation),
}

impl Operation {
    pub fn tag(&self) -> OperationTag {
        match self {
            Operation::Transfer(_) => TransferOperation::TAG,
            Operation::AccountCreate(_) => AccountCreateOperation::TAG,
            Operation::AccountUpdate(_) => AccountUpdateOperation::TAG,
            Operation::FeedPublish(_) => FeedPublishOperation::TAG,
            Operation::AssetCreate(_) => AssetCreateOperation::TAG,
            Operation::AssetIssue(_) => AssetIssueOperation::TAG,
            Operation::AssetReserve(_) => AssetReserveOperation::TAG,
            Operation::AssetUpdate(_) => AssetUpdateOperation::TAG,
            Operation::ContentCreate(_) => ContentCreateOperation::TAG,
            Operation::ContentUpdate(_) => ContentUpdateOperation::TAG,
            Operation::ProposalCreate(_) => ProposalCreateOperation::TAG,
            Operation::ProposalUpdate(_) => ProposalUpdateOperation::TAG,
            Operation::ProposalDelete(_) => ProposalDeleteOperation::TAG,
            Operation::Custom(_) => CustomOperation::TAG,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Transfer(_) => TransferOperation::NAME,
            Operation::AccountCreate(_) => AccountCreateOperation::NAME,
            Operation::AccountUpdate(_) => AccountUpdateOperation::NAME,
            Operation::FeedPublish(_) => FeedPublishOperation::NAME,
            Operation::AssetCreate(_) => AssetCreateOperation::NAME,
            Operation::AssetIssue(_) => AssetIssueOperation::NAME,
            Operation::AssetReserve(_) => AssetReserveOperation::NAME,
            Operation::AssetUpdate(_) => AssetUpdateOperation::NAME,
            Operation::ContentCreate(_) => ContentCreateOperation::NAME,
            Operation::ContentUpdate(_) => ContentUpdateOperation::NAME,
            Operation::ProposalCreate(_) => ProposalCreateOperation::NAME,
            Operation::ProposalUpdate(_) => ProposalUpdateOperation::NAME,
            Operation::ProposalDelete(_) => ProposalDeleteOperation::NAME,
            Operation::Custom(_) => CustomOperation::NAME,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::Transfer(o) => o.validate(),
            Operation::AccountCreate(o) => o.validate(),
            Operation::AccountUpdate(o) => o.validate(),
            Operation::FeedPublish(o) => o.validate(),
            Operation::AssetCreate(o) => o.validate(),
            Operation::AssetIssue(o) => o.validate(),
            Operation::AssetReserve(o) => o.validate(),
            Operation::AssetUpdate(o) => o.validate(),
            Operation::ContentCreate(o) => o.validate(),
            Operation::ContentUpdate(o) => o.validate(),
            Operation::ProposalCreate(o) => o.validate(),
            Operation::ProposalUpdate(o) => o.validate(),
            Operation::ProposalDelete(o) => o.validate(),
            Operation::Custom(o) => o.validate(),
        }
    }

    pub fn get_required_authorities(&self, required: &mut RequiredAuthorities) {
        match self {
            Operation::Transfer(o) => o.get_required_authorities(required),
            Operation::AccountCreate(o) => o.get_required_authorities(required),
            Operation::AccountUpdate(o) => o.get_required_authorities(required),
            Operation::FeedPublish(o) => o.get_required_authorities(required),
            Operation::AssetCreate(o) => o.get_required_authorities(required),
            Operation::AssetIssue(o) => o.get_required_authorities(required),
            Operation::AssetReserve(o) => o.get_required_authorities(required),
            Operation::AssetUpdate(o) => o.get_required_authorities(required),
            Operation::ContentCreate(o) => o.get_required_authorities(required),
            Operation::ContentUpdate(o) => o.get_required_authorities(required),
            Operation::ProposalCreate(o) => o.get_required_authorities(required),
            Operation::ProposalUpdate(o) => o.get_required_authorities(required),
            Operation::ProposalDelete(o) => o.get_required_authorities(required),
            Operation::Custom(o) => o.get_required_authorities(required),
        }
    }
}

/// Collect the authorities required by `ops`.
pub fn operation_get_required_authorities<'a>(
    ops: impl IntoIterator<Item = &'a Operation>,
) -> RequiredAuthorities {
    let mut required = RequiredAuthorities::default();
    for op in ops {
        op.get_required_authorities(&mut required);
    }
    required
}

macro_rules! impl_from_operation {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operation {
                fn from(op: $ty) -> Self {
                    Operation::$variant(op)
                }
            }
        )*
    };
}

impl_from_operation! {
    Transfer => TransferOperation,
    AccountCreate => AccountCreateOperation,
    AccountUpdate => AccountUpdateOperation,
    FeedPublish => FeedPublishOperation,
    AssetCreate => AssetCreateOperation,
    AssetIssue => AssetIssueOperation,
    AssetReserve => AssetReserveOperation,
    AssetUpdate => AssetUpdateOperation,
    ContentCreate => ContentCreateOperation,
    ContentUpdate => ContentUpdateOperation,
    ProposalCreate => ProposalCreateOperation,
    ProposalUpdate => ProposalUpdateOperation,
    ProposalDelete => ProposalDeleteOperation,
    Custom => CustomOperation,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrivateKey;

    fn asset_create(symbol: &str, max_supply: i64) -> AssetCreateOperation {
        AssetCreateOperation {
            fee: Asset::new(0, AssetId::new(1)),
            issuer: "alice".into(),
            symbol: symbol.into(),
            precision: 0,
            common_options: AssetOptions {
                max_supply,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_wire_tag_matches_variant_index() {
        let op: Operation = asset_create("BTS", 1).into();
        assert_eq!(op.tag(), 4);
        let bytes = bincode::serialize(&op).unwrap();
        assert_eq!(&bytes[..4], &4u32.to_le_bytes());

        let custom: Operation = CustomOperation {
            required_auths: ["alice".to_string()].into(),
            required_basic_auths: BTreeSet::new(),
            id: 7,
            data: vec![1, 2, 3],
        }
        .into();
        let bytes = bincode::serialize(&custom).unwrap();
        assert_eq!(&bytes[..4], &13u32.to_le_bytes());
        assert_eq!(bincode::deserialize::<Operation>(&bytes).unwrap(), custom);
    }

    #[test]
    fn test_asset_create_validation() {
        assert!(asset_create("BTS", 1000).validate().is_ok());
        let err = asset_create("bts", 1000).validate().unwrap_err();
        assert_eq!(err.code(), 3_040_400);
        assert!(asset_create("BTS", 0).validate().is_err());
        assert!(asset_create("BTS", MAX_SHARE_SUPPLY + 1).validate().is_err());

        let mut precise = asset_create("BTS", 10);
        precise.precision = MAX_ASSET_PRECISION + 1;
        assert!(precise.validate().is_err());
    }

    #[test]
    fn test_proposal_update_rejects_add_and_remove() {
        let mut op = ProposalUpdateOperation::default();
        assert!(op.validate().is_err());
        op.active_approvals_to_add.insert("alice".into());
        assert!(op.validate().is_ok());
        op.active_approvals_to_remove.insert("alice".into());
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_key_approvals_become_other_authority() {
        let mut op = ProposalUpdateOperation::default();
        op.key_approvals_to_add
            .insert(PrivateKey::from_seed("a").public_key());
        op.key_approvals_to_remove
            .insert(PrivateKey::from_seed("b").public_key());
        op.owner_approvals_to_add.insert("bob".into());

        let required = operation_get_required_authorities([&Operation::from(op)]);
        assert_eq!(required.owner, BTreeSet::from(["bob".to_string()]));
        assert_eq!(required.other.len(), 1);
        assert_eq!(required.other[0].weight_threshold, 2);
        assert_eq!(required.other[0].key_auths.len(), 2);
    }

    #[test]
    fn test_account_update_requires_owner_for_owner_change() {
        let key = PrivateKey::from_seed("k").public_key();
        let mut op = AccountUpdateOperation {
            account: "alice".into(),
            owner: None,
            active: Some(Authority::from_key(key)),
            basic: None,
            memo_key: None,
        };
        let required = operation_get_required_authorities([&Operation::from(op.clone())]);
        assert!(required.active.contains("alice"));

        op.owner = Some(Authority::from_key(key));
        let required = operation_get_required_authorities([&Operation::from(op)]);
        assert!(required.owner.contains("alice"));
        assert!(required.active.is_empty());
    }

    #[test]
    fn test_nested_proposal_ops_validate() {
        let op = ProposalCreateOperation {
            expiration_time: 100,
            proposed_ops: vec![asset_create("bad symbol", 1).into()],
            review_period_seconds: None,
        };
        assert!(op.validate().is_err());
        let empty = ProposalCreateOperation {
            expiration_time: 100,
            proposed_ops: vec![],
            review_period_seconds: None,
        };
        assert!(empty.validate().is_err());
    }
}
