//! Ledger object kinds stored in the [`ObjectDatabase`](crate::object_store::ObjectDatabase).
//!
//! Protocol objects (space 1) are created by operations; implementation
//! objects (space 2) are bookkeeping maintained by the block pipeline.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::authority::Authority;
use crate::object_store::{Id, Object, ObjectDatabase};
use crate::parameters::{asset_flags, ChainParameters};
use crate::transaction::Transaction;
use crate::types::{AccountName, Asset, AssetId, BlockId, Price, PublicKey, TransactionId};

pub const PROTOCOL_SPACE: u8 = 1;
pub const IMPLEMENTATION_SPACE: u8 = 2;

/// Created first at genesis.
pub const CORE_ASSET: AssetId = Id::new(0);
/// The asset fee schedules are denominated in.
pub const DOLLAR_ASSET: AssetId = Id::new(1);

macro_rules! object_identity {
    ($ty:ty, $space:expr, $type_id:expr, $name:literal) => {
        const SPACE_ID: u8 = $space;
        const TYPE_ID: u8 = $type_id;
        const NAME: &'static str = $name;

        fn id(&self) -> Id<$ty> {
            self.id
        }

        fn set_id(&mut self, id: Id<$ty>) {
            self.id = id;
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountObject {
    pub id: Id<AccountObject>,
    pub name: AccountName,
    pub owner: Authority,
    pub active: Authority,
    pub basic: Authority,
    pub memo_key: Option<PublicKey>,
    pub created: u32,
}

impl Object for AccountObject {
    object_identity!(AccountObject, PROTOCOL_SPACE, 2, "account");
    type Key = AccountName;

    fn key(&self) -> Option<AccountName> {
        Some(self.name.clone())
    }
}

/// Options an issuer controls on an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOptions {
    pub max_supply: i64,
    pub issuer_permissions: u16,
    pub flags: u16,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetObject {
    pub id: AssetId,
    pub symbol: String,
    pub issuer: AccountName,
    pub precision: u8,
    pub current_supply: i64,
    pub options: AssetOptions,
}

impl AssetObject {
    pub fn amount(&self, amount: i64) -> Asset {
        Asset::new(amount, self.id)
    }

    /// The symbol this asset is nested under, if any.
    pub fn parent_symbol(&self) -> Option<&str> {
        parent_symbol(&self.symbol)
    }

    pub fn is_hashtag(&self) -> bool {
        self.options.flags & asset_flags::HASHTAG != 0
    }

    pub fn allows_subassets(&self) -> bool {
        self.options.flags & asset_flags::ALLOW_SUBASSET_CREATION != 0
    }
}

/// Prefix before the last `.`, or `None` for top-level symbols.
pub fn parent_symbol(symbol: &str) -> Option<&str> {
    symbol.rfind('.').map(|pos| &symbol[..pos])
}

impl Object for AssetObject {
    object_identity!(AssetObject, PROTOCOL_SPACE, 3, "asset");
    type Key = String;

    fn key(&self) -> Option<String> {
        Some(self.symbol.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentObject {
    pub id: Id<ContentObject>,
    pub url: String,
    pub uploader: AccountName,
    pub title: String,
    pub manage_master: Authority,
    pub manage_comp: Authority,
    pub created: u32,
}

impl Object for ContentObject {
    object_identity!(ContentObject, PROTOCOL_SPACE, 11, "content");
    type Key = String;

    fn key(&self) -> Option<String> {
        Some(self.url.clone())
    }
}

/// A stored transaction collecting approvals until it can execute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalObject {
    pub id: Id<ProposalObject>,
    pub proposed_transaction: Transaction,
    pub expiration_time: u32,
    pub review_period_time: Option<u32>,
    pub required_active_approvals: BTreeSet<AccountName>,
    pub available_active_approvals: BTreeSet<AccountName>,
    pub required_owner_approvals: BTreeSet<AccountName>,
    pub available_owner_approvals: BTreeSet<AccountName>,
    pub required_basic_approvals: BTreeSet<AccountName>,
    pub available_basic_approvals: BTreeSet<AccountName>,
    pub required_master_content_approvals: BTreeSet<String>,
    pub required_comp_content_approvals: BTreeSet<String>,
    pub available_key_approvals: BTreeSet<PublicKey>,
    pub can_veto: BTreeSet<AccountName>,
}

impl Object for ProposalObject {
    object_identity!(ProposalObject, PROTOCOL_SPACE, 10, "proposal");
    /// Expiration order, ties broken by id.
    type Key = (u32, u64);

    fn key(&self) -> Option<(u32, u64)> {
        Some((self.expiration_time, self.id.instance()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountBalanceObject {
    pub id: Id<AccountBalanceObject>,
    pub owner: AccountName,
    pub asset_id: AssetId,
    pub balance: i64,
}

impl AccountBalanceObject {
    pub fn get_balance(&self) -> Asset {
        Asset::new(self.balance, self.asset_id)
    }
}

impl Object for AccountBalanceObject {
    object_identity!(AccountBalanceObject, IMPLEMENTATION_SPACE, 5, "account_balance");
    type Key = (AccountName, AssetId);

    fn key(&self) -> Option<(AccountName, AssetId)> {
        Some((self.owner.clone(), self.asset_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFeed {
    pub price: Price,
    pub published: u32,
}

/// Dollar to core price feeds. The medians are recomputed periodically and
/// feed the asset creation fee schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedHistoryObject {
    pub id: Id<FeedHistoryObject>,
    pub feeds: BTreeMap<AccountName, PriceFeed>,
    pub current_median: Price,
    pub previous_median: Price,
}

impl FeedHistoryObject {
    /// Median of the published feeds, or `None` if nobody has published.
    pub fn median_feed(&self) -> Option<Price> {
        let mut prices: Vec<Price> = self
            .feeds
            .values()
            .map(|feed| feed.price)
            .filter(Price::is_valid)
            .collect();
        if prices.is_empty() {
            return None;
        }
        prices.sort_by(|a, b| {
            let (an, ad) = a.ratio();
            let (bn, bd) = b.ratio();
            (an * bd).cmp(&(bn * ad))
        });
        Some(prices[prices.len() / 2])
    }
}

impl Object for FeedHistoryObject {
    object_identity!(FeedHistoryObject, IMPLEMENTATION_SPACE, 8, "feed_history");
    type Key = ();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerInfo {
    pub account: AccountName,
    pub signing_key: PublicKey,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalPropertyObject {
    pub id: Id<GlobalPropertyObject>,
    pub parameters: ChainParameters,
    pub active_producers: Vec<ProducerInfo>,
}

impl Object for GlobalPropertyObject {
    object_identity!(GlobalPropertyObject, IMPLEMENTATION_SPACE, 0, "global_property");
    type Key = ();
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicGlobalPropertyObject {
    pub id: Id<DynamicGlobalPropertyObject>,
    pub head_block_number: u32,
    pub head_block_id: BlockId,
    pub time: u32,
    pub current_producer: AccountName,
    /// Slots elapsed since genesis, counting missed ones.
    pub current_aslot: u64,
    pub last_irreversible_block_num: u32,
    pub last_hardfork: u32,
}

impl Object for DynamicGlobalPropertyObject {
    object_identity!(
        DynamicGlobalPropertyObject,
        IMPLEMENTATION_SPACE,
        1,
        "dynamic_global_property"
    );
    type Key = ();
}

/// Recent block ids, one per `num & 0xffff` slot, used for TaPoS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockSummaryObject {
    pub id: Id<BlockSummaryObject>,
    pub slot: u16,
    pub block_id: BlockId,
}

impl Object for BlockSummaryObject {
    object_identity!(BlockSummaryObject, IMPLEMENTATION_SPACE, 7, "block_summary");
    type Key = u16;

    fn key(&self) -> Option<u16> {
        Some(self.slot)
    }
}

/// A transaction seen within its expiration window, kept for duplicate
/// detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionObject {
    pub id: Id<TransactionObject>,
    pub trx_id: TransactionId,
    pub expiration: u32,
}

impl Object for TransactionObject {
    object_identity!(TransactionObject, IMPLEMENTATION_SPACE, 6, "transaction");
    type Key = TransactionId;

    fn key(&self) -> Option<TransactionId> {
        Some(self.trx_id)
    }
}

/// Register every ledger index.
pub fn register_indices(db: &mut ObjectDatabase) {
    db.add_index::<AccountObject>();
    db.add_index::<AssetObject>();
    db.add_index::<ContentObject>();
    db.add_index::<ProposalObject>();
    db.add_index::<AccountBalanceObject>();
    db.add_index::<FeedHistoryObject>();
    db.add_index::<GlobalPropertyObject>();
    db.add_index::<DynamicGlobalPropertyObject>();
    db.add_index::<BlockSummaryObject>();
    db.add_index::<TransactionObject>();
}
