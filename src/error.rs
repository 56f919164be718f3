//! Error taxonomy for the ledger.
//!
//! Every rejection carries a stable numeric code (see [`ChainError::code`]) so
//! that callers can tell, say, an insufficient fee from a duplicate symbol
//! without matching on message text.

use thiserror::Error;

use crate::types::CryptoError;

pub type Result<T> = std::result::Result<T, ChainError>;

/// Coarse grouping of errors, used for logging and for callers that only care
/// whether a failure was the submitter's fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Stateless, syntactic failure of an operation or transaction.
    Validation,
    /// Stateful precondition failure while evaluating against the ledger.
    Evaluation,
    /// Should be unreachable under honest input; logged for operators.
    Internal,
    /// Unlinkable, duplicate, expired or oversized blocks and transactions.
    ChainStructure,
    /// Storage, serialization, configuration and I/O.
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("{op} operation is invalid: {reason}")]
    OperationValidate {
        op: &'static str,
        tag: u16,
        reason: String,
    },
    #[error("{op} evaluation failed: {reason}")]
    OperationEvaluate {
        op: &'static str,
        tag: u16,
        reason: String,
    },
    #[error("asset {symbol} already exists")]
    AssetAlreadyExists { tag: u16, symbol: String },
    #[error("account {account} has insufficient balance: needs {required}, has {available}")]
    InsufficientBalance {
        tag: u16,
        account: String,
        required: i64,
        available: i64,
    },
    #[error("{kind} {key} does not exist")]
    UnknownObject {
        tag: u16,
        kind: &'static str,
        key: String,
    },
    #[error("insufficient fee: required {required}, provided {provided}")]
    InsufficientFee { required: String, provided: String },

    #[error("missing required active authority of {0}")]
    MissingActiveAuthority(String),
    #[error("missing required owner authority of {0}")]
    MissingOwnerAuthority(String),
    #[error("missing required other authority")]
    MissingOtherAuthority,
    #[error("missing required basic authority of {0}")]
    MissingBasicAuthority(String),
    #[error("missing required content authority of {0}")]
    MissingContentAuthority(String),
    #[error("irrelevant signature included")]
    IrrelevantSignature,
    #[error("duplicate signature included")]
    DuplicateSignature,
    #[error("signature does not verify for key {0}")]
    InvalidSignature(String),
    #[error("transaction is invalid: {0}")]
    InvalidTransaction(String),
    #[error("transaction expired or has an expiration out of range: {0}")]
    TransactionExpired(String),
    #[error("transaction reference block does not match: {0}")]
    TaposMismatch(String),
    #[error("duplicate transaction {0}")]
    DuplicateTransaction(String),
    #[error("transaction of {size} bytes exceeds the {limit} byte limit")]
    TransactionTooLarge { size: usize, limit: usize },

    #[error("block is invalid: {0}")]
    BlockValidate(String),
    #[error("block of {size} bytes exceeds the {limit} byte limit")]
    BlockTooLarge { size: usize, limit: usize },
    #[error("block was produced by {actual}, expected {expected}")]
    WrongProducer { expected: String, actual: String },
    #[error("block producer signature is invalid")]
    BadProducerSignature,
    #[error("block transaction merkle root does not match")]
    MerkleMismatch,
    #[error("block timestamp is invalid: {0}")]
    BlockTimestamp(String),
    #[error("block {0} does not link to any known block")]
    UnlinkableBlock(String),

    #[error("database query failed: {0}")]
    DatabaseQuery(String),
    #[error("undo database error: {0}")]
    UndoDatabase(String),
    #[error("there are no blocks to pop")]
    PopEmptyChain,
    #[error("unknown hardfork {0}")]
    UnknownHardfork(u32),
    #[error("utility error: {0}")]
    Utility(String),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("authority resolution exceeded the maximum recursion depth of {0}")]
    AuthorityDepthExceeded(u32),
    #[error("authority references unknown account {0}")]
    AuthorityAccountNotFound(String),
    #[error("object index corrupted: {0}")]
    IndexCorruption(String),
    #[error("no evaluator registered for operation tag {0}")]
    MissingEvaluator(u16),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

const OP_VALIDATE_BASE: u32 = 3_040_000;
const OP_EVALUATE_BASE: u32 = 3_050_000;

impl ChainError {
    /// Stable error code. Operation errors embed the operation tag:
    /// `3040000 + 100 * tag` for validation and `3050000 + 100 * tag` for
    /// evaluation, with specific evaluation failures numbered after that.
    pub fn code(&self) -> u32 {
        use ChainError::*;
        match self {
            OperationValidate { tag, .. } => OP_VALIDATE_BASE + 100 * u32::from(*tag),
            OperationEvaluate { tag, .. } => OP_EVALUATE_BASE + 100 * u32::from(*tag),
            AssetAlreadyExists { tag, .. } => OP_EVALUATE_BASE + 100 * u32::from(*tag) + 1,
            InsufficientBalance { tag, .. } => OP_EVALUATE_BASE + 100 * u32::from(*tag) + 2,
            UnknownObject { tag, .. } => OP_EVALUATE_BASE + 100 * u32::from(*tag) + 3,

            InvalidTransaction(_) => 3_030_000,
            MissingActiveAuthority(_) => 3_030_001,
            MissingOwnerAuthority(_) => 3_030_002,
            MissingOtherAuthority => 3_030_003,
            IrrelevantSignature => 3_030_004,
            DuplicateSignature => 3_030_005,
            InvalidSignature(_) => 3_030_006,
            InsufficientFee { .. } => 3_030_007,
            MissingBasicAuthority(_) => 3_030_008,
            MissingContentAuthority(_) => 3_030_009,
            TransactionExpired(_) => 3_030_010,
            TaposMismatch(_) => 3_030_011,
            DuplicateTransaction(_) => 3_030_012,
            TransactionTooLarge { .. } => 3_030_013,

            BlockValidate(_) => 3_020_000,
            BlockTooLarge { .. } => 3_020_001,
            WrongProducer { .. } => 3_020_002,
            BadProducerSignature => 3_020_003,
            MerkleMismatch => 3_020_004,
            BlockTimestamp(_) => 3_020_005,

            DatabaseQuery(_) => 3_010_000,
            Utility(_) => 3_060_000,
            Crypto(_) => 3_060_001,
            UndoDatabase(_) => 3_070_000,
            PopEmptyChain => 3_070_001,
            UnlinkableBlock(_) => 3_080_000,
            UnknownHardfork(_) => 3_090_000,

            AuthorityDepthExceeded(_) => 3_990_001,
            AuthorityAccountNotFound(_) => 3_990_002,
            IndexCorruption(_) => 3_990_003,
            MissingEvaluator(_) => 3_990_004,

            Storage(_) => 3_100_000,
            Serialization(_) => 3_100_001,
            Config(_) => 3_100_002,
            Io(_) => 3_100_003,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        use ChainError::*;
        match self {
            OperationValidate { .. } | InvalidTransaction(_) | Crypto(_) => {
                ErrorCategory::Validation
            }
            OperationEvaluate { .. }
            | AssetAlreadyExists { .. }
            | InsufficientBalance { .. }
            | UnknownObject { .. }
            | InsufficientFee { .. }
            | MissingActiveAuthority(_)
            | MissingOwnerAuthority(_)
            | MissingOtherAuthority
            | MissingBasicAuthority(_)
            | MissingContentAuthority(_)
            | IrrelevantSignature
            | DuplicateSignature
            | InvalidSignature(_)
            | DatabaseQuery(_)
            | Utility(_) => ErrorCategory::Evaluation,
            TransactionExpired(_)
            | TaposMismatch(_)
            | DuplicateTransaction(_)
            | TransactionTooLarge { .. }
            | BlockValidate(_)
            | BlockTooLarge { .. }
            | WrongProducer { .. }
            | BadProducerSignature
            | MerkleMismatch
            | BlockTimestamp(_)
            | UnlinkableBlock(_)
            | PopEmptyChain
            | UndoDatabase(_)
            | UnknownHardfork(_) => ErrorCategory::ChainStructure,
            AuthorityDepthExceeded(_)
            | AuthorityAccountNotFound(_)
            | IndexCorruption(_)
            | MissingEvaluator(_) => ErrorCategory::Internal,
            Storage(_) | Serialization(_) | Config(_) | Io(_) => ErrorCategory::Infrastructure,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.category() == ErrorCategory::Internal
    }

    /// True for the family of "this authority was not satisfied" errors.
    pub fn is_missing_authority(&self) -> bool {
        matches!(
            self,
            ChainError::MissingActiveAuthority(_)
                | ChainError::MissingOwnerAuthority(_)
                | ChainError::MissingOtherAuthority
                | ChainError::MissingBasicAuthority(_)
                | ChainError::MissingContentAuthority(_)
                | ChainError::AuthorityDepthExceeded(_)
        )
    }
}

/// Return early with `$err` unless `$cond` holds.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return Err($err);
        }
    };
}
