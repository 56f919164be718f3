#![allow(dead_code)]

use ledgerd::block::SignedBlock;
use ledgerd::database::Database;
use ledgerd::error::Result;
use ledgerd::objects::{CORE_ASSET, DOLLAR_ASSET};
use ledgerd::operations::{Operation, TransferOperation};
use ledgerd::parameters::{GenesisAccount, GenesisState, INIT_KEY_SEED, INIT_PRODUCER};
use ledgerd::transaction::{ProcessedTransaction, SignedTransaction, Transaction};
use ledgerd::types::{Asset, PrivateKey, PublicKey};

pub const USERS: [&str; 3] = ["alice", "bob", "carol"];
pub const STARTING_BALANCE: i64 = 1_000 * 1_000_000;

pub fn key(name: &str) -> PrivateKey {
    PrivateKey::from_seed(name)
}

pub fn public(name: &str) -> PublicKey {
    key(name).public_key()
}

/// Default genesis plus funded test users, each keyed by its own name.
pub fn genesis() -> GenesisState {
    let mut genesis = GenesisState::default();
    for name in USERS {
        let mut account = GenesisAccount::with_key(name, public(name));
        account.core_balance = STARTING_BALANCE;
        account.dollar_balance = STARTING_BALANCE;
        genesis.accounts.push(account);
    }
    genesis
}

/// A ledger driven by the single genesis producer.
pub struct Chain {
    pub db: Database,
}

impl Chain {
    pub fn new() -> Self {
        Self::with_genesis(genesis())
    }

    pub fn with_genesis(genesis: GenesisState) -> Self {
        Chain {
            db: Database::open_temporary(genesis).expect("genesis"),
        }
    }

    pub fn head_time(&self) -> u32 {
        self.db.head_block_time().expect("head time")
    }

    pub fn interval(&self) -> u32 {
        self.db.genesis().parameters.block_interval
    }

    /// Sign `ops` with the keys of `signers`, referencing the head block.
    pub fn sign(&self, ops: Vec<Operation>, signers: &[&str]) -> SignedTransaction {
        sign_on(&self.db, ops, signers)
    }

    pub fn push(&mut self, ops: Vec<Operation>, signers: &[&str]) -> Result<ProcessedTransaction> {
        let trx = self.sign(ops, signers);
        self.db.push_transaction(trx)
    }

    /// Produce the block for the next slot.
    pub fn next_block(&mut self) -> SignedBlock {
        self.block_after(1)
    }

    /// Produce a block `slots` slots after the head, missing the ones between.
    pub fn block_after(&mut self, slots: u32) -> SignedBlock {
        let when = self.head_time() + slots * self.interval();
        self.db
            .generate_block(when, INIT_PRODUCER, &key(INIT_KEY_SEED))
            .expect("generate block")
    }

    pub fn blocks(&mut self, count: u32) -> Vec<SignedBlock> {
        (0..count).map(|_| self.next_block()).collect()
    }

    pub fn core(&self, account: &str) -> i64 {
        self.db.get_balance(account, CORE_ASSET).amount
    }

    pub fn dollars(&self, account: &str) -> i64 {
        self.db.get_balance(account, DOLLAR_ASSET).amount
    }
}

pub fn sign_on(db: &Database, ops: Vec<Operation>, signers: &[&str]) -> SignedTransaction {
    let mut trx = Transaction::new(ops);
    trx.set_reference_block(&db.head_block_id().expect("head id"));
    trx.expiration = db.head_block_time().expect("head time") + 120;
    let mut signed = SignedTransaction::from(trx);
    for signer in signers {
        signed.sign(&key(signer), db.chain_id()).expect("sign");
    }
    signed
}

pub fn transfer(from: &str, to: &str, amount: i64) -> Operation {
    TransferOperation {
        from: from.into(),
        to: to.into(),
        amount: Asset::new(amount, CORE_ASSET),
        memo: None,
    }
    .into()
}
