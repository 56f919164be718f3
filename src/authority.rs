//! Weighted-threshold authorities and signature verification.
//!
//! An [`Authority`] is satisfied when the weights of its present signers reach
//! the threshold. Signers are keys that signed directly, or accounts whose own
//! active authority is satisfied, recursively up to a bounded depth.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ChainError, Result};
use crate::types::{AccountName, PublicKey};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Authority {
    pub weight_threshold: u32,
    #[serde(default)]
    pub account_auths: BTreeMap<AccountName, u16>,
    #[serde(default)]
    pub key_auths: BTreeMap<PublicKey, u16>,
}

impl Authority {
    pub fn new(weight_threshold: u32) -> Self {
        Authority {
            weight_threshold,
            ..Default::default()
        }
    }

    /// Single key with weight 1 and threshold 1.
    pub fn from_key(key: PublicKey) -> Self {
        Authority::new(1).with_key(key, 1)
    }

    /// An authority nobody can satisfy.
    pub fn null() -> Self {
        Authority::new(1)
    }

    pub fn with_key(mut self, key: PublicKey, weight: u16) -> Self {
        self.key_auths.insert(key, weight);
        self
    }

    pub fn with_account(mut self, account: &str, weight: u16) -> Self {
        self.account_auths.insert(account.to_string(), weight);
        self
    }

    pub fn num_auths(&self) -> usize {
        self.key_auths.len() + self.account_auths.len()
    }

    /// True if the threshold exceeds the sum of all weights.
    pub fn is_impossible(&self) -> bool {
        let total: u64 = self
            .key_auths
            .values()
            .chain(self.account_auths.values())
            .map(|w| u64::from(*w))
            .sum();
        total < u64::from(self.weight_threshold)
    }
}

/// The authority classes an account carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AuthorityClass {
    Owner,
    Active,
    Basic,
}

/// Everything a set of operations needs signed, split by class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredAuthorities {
    pub active: BTreeSet<AccountName>,
    pub owner: BTreeSet<AccountName>,
    pub basic: BTreeSet<AccountName>,
    pub master_content: BTreeSet<String>,
    pub comp_content: BTreeSet<String>,
    pub other: Vec<Authority>,
}

impl RequiredAuthorities {
    /// Drop basic requirements already covered by an active or owner
    /// requirement of the same account.
    pub fn erase_subsumed_basic(&mut self) {
        let active = &self.active;
        let owner = &self.owner;
        self.basic
            .retain(|account| !active.contains(account) && !owner.contains(account));
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
            && self.owner.is_empty()
            && self.basic.is_empty()
            && self.master_content.is_empty()
            && self.comp_content.is_empty()
            && self.other.is_empty()
    }
}

/// Read access to the authorities stored on chain.
pub trait AuthorityProvider {
    fn active_authority(&self, account: &str) -> Option<&Authority>;
    fn owner_authority(&self, account: &str) -> Option<&Authority>;
    fn basic_authority(&self, account: &str) -> Option<&Authority>;
    fn master_content_authority(&self, url: &str) -> Option<&Authority>;
    fn comp_content_authority(&self, url: &str) -> Option<&Authority>;
}

/// Accounts whose approval was granted out of band (proposal approvals).
#[derive(Debug, Clone, Default)]
pub struct Approvals {
    pub active: BTreeSet<AccountName>,
    pub owner: BTreeSet<AccountName>,
}

/// Tracks which provided keys were used while walking authorities.
pub struct SignState<'a, P: AuthorityProvider + ?Sized> {
    provider: &'a P,
    provided: BTreeMap<PublicKey, bool>,
    available: BTreeSet<PublicKey>,
    approved_by: BTreeSet<AccountName>,
    max_recursion: u32,
    depth_exceeded: bool,
    missing_account: Option<AccountName>,
}

impl<'a, P: AuthorityProvider + ?Sized> SignState<'a, P> {
    pub fn new(provider: &'a P, keys: &BTreeSet<PublicKey>, max_recursion: u32) -> Self {
        SignState {
            provider,
            provided: keys.iter().map(|k| (*k, false)).collect(),
            available: BTreeSet::new(),
            approved_by: BTreeSet::new(),
            max_recursion,
            depth_exceeded: false,
            missing_account: None,
        }
    }

    /// Keys that may be pulled in on demand (for required-signature queries).
    pub fn with_available(mut self, available: &BTreeSet<PublicKey>) -> Self {
        self.available = available.clone();
        self
    }

    pub fn approve(&mut self, accounts: impl IntoIterator<Item = AccountName>) {
        self.approved_by.extend(accounts);
    }

    fn signed_by(&mut self, key: &PublicKey) -> bool {
        if let Some(used) = self.provided.get_mut(key) {
            *used = true;
            return true;
        }
        if self.available.contains(key) {
            self.provided.insert(*key, true);
            return true;
        }
        false
    }

    /// Satisfied by an approval or by the account's active authority. An
    /// unknown account simply fails the requirement; only accounts reached
    /// through another authority count as a broken reference.
    pub fn check_account(&mut self, account: &str) -> bool {
        if self.approved_by.contains(account) {
            return true;
        }
        match self.provider.active_authority(account) {
            Some(active) => self.check_authority(active, 0),
            None => {
                debug!(account, "required account does not exist");
                false
            }
        }
    }

    /// Weighted walk. Keys and accounts are visited heaviest first so that a
    /// signer is only marked used when it was needed to reach the threshold.
    pub fn check_authority(&mut self, authority: &Authority, depth: u32) -> bool {
        let threshold = u64::from(authority.weight_threshold);
        let mut total: u64 = 0;
        if total >= threshold {
            return true;
        }

        let mut keys: Vec<(&PublicKey, u16)> =
            authority.key_auths.iter().map(|(k, w)| (k, *w)).collect();
        keys.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        for (key, weight) in keys {
            if self.signed_by(key) {
                total += u64::from(weight);
                if total >= threshold {
                    return true;
                }
            }
        }

        let mut accounts: Vec<(&AccountName, u16)> =
            authority.account_auths.iter().map(|(a, w)| (a, *w)).collect();
        accounts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        for (account, weight) in accounts {
            if !self.approved_by.contains(account) {
                if depth >= self.max_recursion {
                    self.depth_exceeded = true;
                    continue;
                }
                let provider = self.provider;
                let Some(active) = provider.active_authority(account) else {
                    self.missing_account.get_or_insert_with(|| account.clone());
                    continue;
                };
                if !self.check_authority(active, depth + 1) {
                    continue;
                }
                self.approved_by.insert(account.clone());
            }
            total += u64::from(weight);
            if total >= threshold {
                return true;
            }
        }
        total >= threshold
    }

    /// Drop keys that contributed nothing. Returns true if any were dropped.
    pub fn remove_unused_signatures(&mut self) -> bool {
        let before = self.provided.len();
        self.provided.retain(|_, used| *used);
        self.provided.len() != before
    }

    pub fn used_keys(&self) -> BTreeSet<PublicKey> {
        self.provided
            .iter()
            .filter(|(_, used)| **used)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Turn a failed requirement into an error, preferring internal causes.
    fn failure(&self, missing: ChainError) -> ChainError {
        if let Some(account) = &self.missing_account {
            return ChainError::AuthorityAccountNotFound(account.clone());
        }
        if self.depth_exceeded {
            warn!(
                max_recursion = self.max_recursion,
                "authority walk hit the recursion limit"
            );
            return ChainError::AuthorityDepthExceeded(self.max_recursion);
        }
        missing
    }

    fn check_requirements(&mut self, required: &RequiredAuthorities) -> Result<()> {
        let provider = self.provider;
        for authority in &required.other {
            if !self.check_authority(authority, 0) {
                return Err(self.failure(ChainError::MissingOtherAuthority));
            }
        }
        for url in &required.master_content {
            let satisfied = provider
                .master_content_authority(url)
                .is_some_and(|a| self.check_authority(a, 0));
            if !satisfied {
                return Err(self.failure(ChainError::MissingContentAuthority(url.clone())));
            }
        }
        for url in &required.comp_content {
            let satisfied = provider
                .comp_content_authority(url)
                .is_some_and(|a| self.check_authority(a, 0));
            if !satisfied {
                return Err(self.failure(ChainError::MissingContentAuthority(url.clone())));
            }
        }
        for account in &required.basic {
            let satisfied = provider
                .basic_authority(account)
                .is_some_and(|a| self.check_authority(a, 0))
                || self.check_account(account)
                || provider
                    .owner_authority(account)
                    .is_some_and(|a| self.check_authority(a, 0));
            if !satisfied {
                return Err(self.failure(ChainError::MissingBasicAuthority(account.clone())));
            }
        }
        for account in &required.active {
            let satisfied = self.check_account(account)
                || provider
                    .owner_authority(account)
                    .is_some_and(|a| self.check_authority(a, 0));
            if !satisfied {
                return Err(self.failure(ChainError::MissingActiveAuthority(account.clone())));
            }
        }
        Ok(())
    }
}

/// Check that `keys` (plus any out-of-band `approvals`) satisfy every
/// requirement. With `allow_extra_sigs` unset, a key that satisfied nothing is
/// rejected as irrelevant.
pub fn verify_authority<P: AuthorityProvider + ?Sized>(
    required: &RequiredAuthorities,
    keys: &BTreeSet<PublicKey>,
    provider: &P,
    max_recursion: u32,
    allow_extra_sigs: bool,
    approvals: &Approvals,
) -> Result<()> {
    let mut required = required.clone();
    required.erase_subsumed_basic();

    let mut state = SignState::new(provider, keys, max_recursion);
    state.approve(approvals.active.iter().cloned());
    state.approve(approvals.owner.iter().cloned());

    state.check_requirements(&required)?;

    for account in &required.owner {
        if approvals.owner.contains(account) {
            continue;
        }
        let satisfied = provider
            .owner_authority(account)
            .is_some_and(|a| state.check_authority(a, 0));
        if !satisfied {
            return Err(state.failure(ChainError::MissingOwnerAuthority(account.clone())));
        }
    }

    if state.remove_unused_signatures() && !allow_extra_sigs {
        return Err(ChainError::IrrelevantSignature);
    }
    Ok(())
}

/// Keys from `available` that would be needed, on top of `signed`, to satisfy
/// `required`. Requirements that cannot be met are left unmet.
pub fn get_required_signatures<P: AuthorityProvider + ?Sized>(
    required: &RequiredAuthorities,
    signed: &BTreeSet<PublicKey>,
    available: &BTreeSet<PublicKey>,
    provider: &P,
    max_recursion: u32,
) -> BTreeSet<PublicKey> {
    let mut required = required.clone();
    required.erase_subsumed_basic();

    let mut state = SignState::new(provider, signed, max_recursion).with_available(available);
    for authority in &required.other {
        state.check_authority(authority, 0);
    }
    for url in &required.master_content {
        if let Some(a) = provider.master_content_authority(url) {
            state.check_authority(a, 0);
        }
    }
    for url in &required.comp_content {
        if let Some(a) = provider.comp_content_authority(url) {
            state.check_authority(a, 0);
        }
    }
    for account in &required.basic {
        let done = provider
            .basic_authority(account)
            .is_some_and(|a| state.check_authority(a, 0))
            || state.check_account(account);
        if !done {
            if let Some(a) = provider.owner_authority(account) {
                state.check_authority(a, 0);
            }
        }
    }
    for account in &required.active {
        if !state.check_account(account) {
            if let Some(a) = provider.owner_authority(account) {
                state.check_authority(a, 0);
            }
        }
    }
    for account in &required.owner {
        if let Some(a) = provider.owner_authority(account) {
            state.check_authority(a, 0);
        }
    }
    state.remove_unused_signatures();
    state
        .used_keys()
        .into_iter()
        .filter(|k| !signed.contains(k))
        .collect()
}

/// Smallest subset of the needed keys that still satisfies `required`, found
/// by dropping one key at a time.
pub fn minimize_required_signatures<P: AuthorityProvider + ?Sized>(
    required: &RequiredAuthorities,
    available: &BTreeSet<PublicKey>,
    provider: &P,
    max_recursion: u32,
) -> Result<BTreeSet<PublicKey>> {
    let candidates =
        get_required_signatures(required, &BTreeSet::new(), available, provider, max_recursion);
    let mut result = candidates.clone();
    let approvals = Approvals::default();
    for key in &candidates {
        result.remove(key);
        match verify_authority(required, &result, provider, max_recursion, true, &approvals) {
            Ok(()) => {}
            Err(e) if e.is_missing_authority() => {
                result.insert(*key);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(result)
}
