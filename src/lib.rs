//! A block-producing ledger: accounts, user-issued assets, content
//! authorities and multi-signature proposals, kept in an undoable object
//! store with fork resolution and a sled block log.

#![forbid(unsafe_code)]

pub mod error;
pub mod types;
pub mod object_store;
pub mod objects;
pub mod parameters;
pub mod authority;
pub mod operations;
pub mod transaction;
pub mod block;
pub mod evaluator;
pub mod account_evaluator;
pub mod asset_evaluator;
pub mod content_evaluator;
pub mod feed_evaluator;
pub mod proposal_evaluator;
pub mod signals;
pub mod fork_db;
pub mod storage;
pub mod consensus;
pub mod database;
pub mod config;
pub mod runtime;

pub use block::SignedBlock;
pub use database::{Database, SkipFlags};
pub use error::{ChainError, Result};
pub use operations::Operation;
pub use transaction::{SignedTransaction, Transaction};
