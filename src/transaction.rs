use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::authority::{self, Approvals, AuthorityProvider, RequiredAuthorities};
use crate::error::{ChainError, Result};
use crate::object_store::RawObjectId;
use crate::operations::{operation_get_required_authorities, Operation};
use crate::types::{sha256, BlockId, ChainId, Digest, PrivateKey, PublicKey, Signature, TransactionId};

/// Reserved for future protocol extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extension {
    Void,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub expiration: u32,
    pub operations: Vec<Operation>,
    pub extensions: Vec<Extension>,
}

impl Transaction {
    pub fn new(operations: Vec<Operation>) -> Self {
        Transaction {
            operations,
            ..Default::default()
        }
    }

    pub fn digest(&self) -> Result<Digest> {
        Ok(sha256(&bincode::serialize(self)?))
    }

    pub fn id(&self) -> Result<TransactionId> {
        self.digest().map(TransactionId)
    }

    /// The digest signers commit to: the transaction bound to one chain.
    pub fn sig_digest(&self, chain_id: &ChainId) -> Result<Digest> {
        let mut bytes = chain_id.0.to_vec();
        bytes.extend(bincode::serialize(self)?);
        Ok(sha256(&bytes))
    }

    /// Anchor this transaction to `reference` for TaPoS.
    pub fn set_reference_block(&mut self, reference: &BlockId) {
        self.ref_block_num = (reference.num() & 0xffff) as u16;
        self.ref_block_prefix = reference.prefix();
    }

    pub fn validate(&self) -> Result<()> {
        if self.operations.is_empty() {
            return Err(ChainError::InvalidTransaction(
                "a transaction must have at least one operation".into(),
            ));
        }
        for op in &self.operations {
            op.validate()?;
        }
        Ok(())
    }

    pub fn get_required_authorities(&self) -> RequiredAuthorities {
        operation_get_required_authorities(&self.operations)
    }
}

/// An ed25519 signature together with the key that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub signer: PublicKey,
    pub signature: Signature,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub trx: Transaction,
    pub signatures: Vec<TransactionSignature>,
}

impl From<Transaction> for SignedTransaction {
    fn from(trx: Transaction) -> Self {
        SignedTransaction {
            trx,
            signatures: Vec::new(),
        }
    }
}

impl SignedTransaction {
    pub fn sign(&mut self, key: &PrivateKey, chain_id: &ChainId) -> Result<()> {
        let digest = self.trx.sig_digest(chain_id)?;
        self.signatures.push(TransactionSignature {
            signer: key.public_key(),
            signature: key.sign(&digest),
        });
        Ok(())
    }

    pub fn id(&self) -> Result<TransactionId> {
        self.trx.id()
    }

    /// Verify every signature and return the signing keys.
    pub fn get_signature_keys(&self, chain_id: &ChainId) -> Result<BTreeSet<PublicKey>> {
        let digest = self.trx.sig_digest(chain_id)?;
        let mut keys = BTreeSet::new();
        for sig in &self.signatures {
            if !sig.signer.verify(&digest, &sig.signature) {
                return Err(ChainError::InvalidSignature(sig.signer.to_string()));
            }
            if !keys.insert(sig.signer) {
                return Err(ChainError::DuplicateSignature);
            }
        }
        Ok(keys)
    }

    pub fn verify_authority<P: AuthorityProvider + ?Sized>(
        &self,
        chain_id: &ChainId,
        provider: &P,
        max_recursion: u32,
    ) -> Result<()> {
        let keys = self.get_signature_keys(chain_id)?;
        authority::verify_authority(
            &self.trx.get_required_authorities(),
            &keys,
            provider,
            max_recursion,
            false,
            &Approvals::default(),
        )
    }

    /// Keys from `available` that still need to sign.
    pub fn get_required_signatures<P: AuthorityProvider + ?Sized>(
        &self,
        chain_id: &ChainId,
        available: &BTreeSet<PublicKey>,
        provider: &P,
        max_recursion: u32,
    ) -> Result<BTreeSet<PublicKey>> {
        let signed = self.get_signature_keys(chain_id)?;
        Ok(authority::get_required_signatures(
            &self.trx.get_required_authorities(),
            &signed,
            available,
            provider,
            max_recursion,
        ))
    }

    pub fn minimize_required_signatures<P: AuthorityProvider + ?Sized>(
        &self,
        available: &BTreeSet<PublicKey>,
        provider: &P,
        max_recursion: u32,
    ) -> Result<BTreeSet<PublicKey>> {
        authority::minimize_required_signatures(
            &self.trx.get_required_authorities(),
            available,
            provider,
            max_recursion,
        )
    }

    pub fn packed_size(&self) -> Result<usize> {
        Ok(bincode::serialized_size(self)? as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResult {
    Void,
    ObjectId(RawObjectId),
}

/// A signed transaction as included in a block, with the result of each
/// operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTransaction {
    pub signed: SignedTransaction,
    pub operation_results: Vec<OperationResult>,
}

impl ProcessedTransaction {
    /// Leaf digest used in the block merkle tree.
    pub fn merkle_digest(&self) -> Result<Digest> {
        Ok(sha256(&bincode::serialize(self)?))
    }
}
