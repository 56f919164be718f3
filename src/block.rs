use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::transaction::{Extension, ProcessedTransaction};
use crate::types::{sha256, AccountName, BlockId, Digest, PrivateKey, PublicKey, Signature};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub previous: BlockId,
    pub timestamp: u32,
    pub producer: AccountName,
    pub transaction_merkle_root: Digest,
    pub extensions: Vec<Extension>,
}

impl BlockHeader {
    pub fn digest(&self) -> Result<Digest> {
        Ok(sha256(&bincode::serialize(self)?))
    }

    pub fn block_num(&self) -> u32 {
        self.previous.num() + 1
    }

    pub fn id(&self) -> Result<BlockId> {
        Ok(BlockId::new(self.block_num(), self.digest()?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub header: BlockHeader,
    pub producer_signature: Signature,
    pub transactions: Vec<ProcessedTransaction>,
}

impl SignedBlock {
    /// Build and sign a block over `transactions`.
    pub fn new(
        previous: BlockId,
        timestamp: u32,
        producer: AccountName,
        transactions: Vec<ProcessedTransaction>,
        signing_key: &PrivateKey,
    ) -> Result<Self> {
        let header = BlockHeader {
            previous,
            timestamp,
            producer,
            transaction_merkle_root: calculate_merkle_root(&transactions)?,
            extensions: Vec::new(),
        };
        let producer_signature = signing_key.sign(&header.digest()?);
        Ok(SignedBlock {
            header,
            producer_signature,
            transactions,
        })
    }

    pub fn id(&self) -> Result<BlockId> {
        self.header.id()
    }

    pub fn block_num(&self) -> u32 {
        self.header.block_num()
    }

    pub fn previous(&self) -> BlockId {
        self.header.previous
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn sign(&mut self, signing_key: &PrivateKey) -> Result<()> {
        self.producer_signature = signing_key.sign(&self.header.digest()?);
        Ok(())
    }

    pub fn validate_signee(&self, expected: &PublicKey) -> Result<bool> {
        Ok(expected.verify(&self.header.digest()?, &self.producer_signature))
    }

    pub fn calculate_merkle_root(&self) -> Result<Digest> {
        calculate_merkle_root(&self.transactions)
    }

    pub fn packed_size(&self) -> Result<usize> {
        Ok(bincode::serialized_size(self)? as usize)
    }
}

/// Pairwise sha256 tree over the transaction digests. An odd node is carried
/// up unchanged; an empty block has the zero root.
pub fn calculate_merkle_root(transactions: &[ProcessedTransaction]) -> Result<Digest> {
    if transactions.is_empty() {
        return Ok(Digest::default());
    }
    let mut layer = transactions
        .iter()
        .map(ProcessedTransaction::merkle_digest)
        .collect::<Result<Vec<_>>>()?;
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| match pair.get(1) {
                Some(right) => {
                    let mut bytes = pair[0].to_vec();
                    bytes.extend_from_slice(right);
                    sha256(&bytes)
                }
                None => pair[0],
            })
            .collect();
    }
    Ok(layer[0])
}
