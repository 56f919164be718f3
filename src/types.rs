//! Core primitive types shared by the ledger.
//!
//! This module holds the cryptographic wrappers (keys, signatures, digests),
//! the identifier types for blocks, transactions and the chain itself, and the
//! `Asset`/`Price` amount types used by every balance-moving operation.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::objects::AssetObject;
use crate::object_store::Id;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),
}

pub type Digest = [u8; 32];

pub fn sha256(bytes: &[u8]) -> Digest {
    Sha256::digest(bytes).into()
}

/// Format a 32-byte hash as a hexadecimal string.
pub fn format_hex(bytes: &[u8; 32]) -> String {
    hex::encode(bytes)
}

fn parse_hex32(s: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidHex(format!("expected 32 bytes in {s}")))
}

/// Wrapper around an ed25519 public key.
///
/// Human-readable formats (toml, json) carry the key as hex; bincode carries
/// the raw 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(bytes)
            .map(PublicKey)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.0.verify(message, &signature.0).is_ok()
    }
}

impl From<VerifyingKey> for PublicKey {
    fn from(vk: VerifyingKey) -> Self {
        PublicKey(vk)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_hex(self.as_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PublicKey::from_bytes(&parse_hex32(s)?)
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.to_bytes().serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <[u8; 32]>::deserialize(deserializer)?;
            PublicKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

/// Signing half of a key pair. Never serialized.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Deterministic key derived from a seed phrase, `sha256(seed)`.
    pub fn from_seed(seed: &str) -> Self {
        PrivateKey(SigningKey::from_bytes(&sha256(seed.as_bytes())))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self.0.verifying_key())
    }

    pub fn sign(&self, digest: &Digest) -> Signature {
        Signature(self.0.sign(digest))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.public_key())
    }
}

/// Wrapper around an ed25519 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Signature(ed25519_dalek::Signature::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        let bytes_array: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid signature length"))?;
        Ok(Signature::from_bytes(&bytes_array))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub Digest);

impl ChainId {
    pub fn from_name(name: &str) -> Self {
        ChainId(sha256(name.as_bytes()))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_hex(&self.0))
    }
}

/// Block identifier: a header digest whose first four bytes are replaced by
/// the big-endian block number, so the number can be read back from the id.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub Digest);

impl BlockId {
    pub fn new(num: u32, digest: Digest) -> Self {
        let mut id = digest;
        id[..4].copy_from_slice(&num.to_be_bytes());
        BlockId(id)
    }

    pub fn num(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// The TaPoS prefix of this id.
    pub fn prefix(&self) -> u32 {
        u32::from_le_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_hex(&self.0))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}:{})", self.num(), &format_hex(&self.0)[8..16])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub Digest);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_hex(&self.0))
    }
}

pub type AccountName = String;

pub type AssetId = Id<AssetObject>;

/// An amount of a specific asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub amount: i64,
    pub asset_id: AssetId,
}

impl Asset {
    pub fn new(amount: i64, asset_id: AssetId) -> Self {
        Asset { amount, asset_id }
    }

    /// Convert this amount through `price`, in whichever direction matches.
    /// Returns `None` if the price does not involve this asset or the result
    /// does not fit in an `i64`.
    pub fn convert(&self, price: &Price) -> Option<Asset> {
        let (num, den, target) = if self.asset_id == price.base.asset_id {
            (price.quote.amount, price.base.amount, price.quote.asset_id)
        } else if self.asset_id == price.quote.asset_id {
            (price.base.amount, price.quote.amount, price.base.asset_id)
        } else {
            return None;
        };
        if den == 0 {
            return None;
        }
        let amount = i128::from(self.amount) * i128::from(num) / i128::from(den);
        i64::try_from(amount).ok().map(|a| Asset::new(a, target))
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of asset {}", self.amount, self.asset_id)
    }
}

/// Exchange rate: `base` buys `quote`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub base: Asset,
    pub quote: Asset,
}

impl Price {
    pub fn new(base: Asset, quote: Asset) -> Self {
        Price { base, quote }
    }

    pub fn is_null(&self) -> bool {
        self.base.amount == 0 || self.quote.amount == 0
    }

    pub fn is_valid(&self) -> bool {
        self.base.amount > 0 && self.quote.amount > 0 && self.base.asset_id != self.quote.asset_id
    }

    /// Ratio of quote per base, for ordering feeds of the same market.
    pub fn ratio(&self) -> (i128, i128) {
        (i128::from(self.quote.amount), i128::from(self.base.amount))
    }
}

/// Account names: 3 to 16 characters, lowercase letters, digits, `-` and `.`,
/// starting with a letter and ending with a letter or digit.
pub fn is_valid_account_name(name: &str) -> bool {
    let len = name.len();
    if !(crate::parameters::MIN_ACCOUNT_NAME_LENGTH..=crate::parameters::MAX_ACCOUNT_NAME_LENGTH)
        .contains(&len)
    {
        return false;
    }
    let bytes = name.as_bytes();
    if !bytes[0].is_ascii_lowercase() {
        return false;
    }
    if !bytes[len - 1].is_ascii_lowercase() && !bytes[len - 1].is_ascii_digit() {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'.')
}

/// Asset symbols: uppercase letters and digits with at most one `.`, starting
/// with a letter and ending with a letter or digit.
pub fn is_valid_symbol(symbol: &str) -> bool {
    let len = symbol.len();
    if !(crate::parameters::MIN_ASSET_SYMBOL_LENGTH..=crate::parameters::MAX_ASSET_SYMBOL_LENGTH)
        .contains(&len)
    {
        return false;
    }
    let bytes = symbol.as_bytes();
    if !bytes[0].is_ascii_uppercase() {
        return false;
    }
    let last = bytes[len - 1];
    if !last.is_ascii_uppercase() && !last.is_ascii_digit() {
        return false;
    }
    let mut dot_seen = false;
    for &b in bytes {
        if b == b'.' {
            if dot_seen {
                return false;
            }
            dot_seen = true;
        } else if !b.is_ascii_uppercase() && !b.is_ascii_digit() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id_embeds_number() {
        let digest = sha256(b"header");
        let id = BlockId::new(0x0102_0304, digest);
        assert_eq!(id.num(), 0x0102_0304);
        assert_eq!(&id.0[4..], &digest[4..]);
        assert_eq!(
            id.prefix(),
            u32::from_le_bytes([digest[4], digest[5], digest[6], digest[7]])
        );
    }

    #[test]
    fn test_signing_and_verification() {
        let key = PrivateKey::from_seed("alice");
        let digest = sha256(b"payload");
        let signature = key.sign(&digest);
        assert!(key.public_key().verify(&digest, &signature));
        assert!(!key.public_key().verify(&sha256(b"other"), &signature));
        assert!(!PrivateKey::from_seed("bob").public_key().verify(&digest, &signature));
        // seeds are deterministic
        assert_eq!(
            PrivateKey::from_seed("alice").public_key(),
            key.public_key()
        );
    }

    #[test]
    fn test_public_key_encodings() {
        let key = PrivateKey::from_seed("carol").public_key();
        let bytes = bincode::serialize(&key).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bincode::deserialize::<PublicKey>(&bytes).unwrap(), key);

        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
        assert_eq!(serde_json::from_str::<PublicKey>(&json).unwrap(), key);
    }

    #[test]
    fn test_asset_conversion() {
        let core = AssetId::new(0);
        let dollar = AssetId::new(1);
        // one dollar buys two core
        let price = Price::new(Asset::new(1, dollar), Asset::new(2, core));
        assert_eq!(
            Asset::new(50, dollar).convert(&price),
            Some(Asset::new(100, core))
        );
        assert_eq!(
            Asset::new(100, core).convert(&price),
            Some(Asset::new(50, dollar))
        );
        assert_eq!(Asset::new(1, AssetId::new(7)).convert(&price), None);
    }

    #[test]
    fn test_symbol_rules() {
        assert!(is_valid_symbol("BTS"));
        assert!(is_valid_symbol("BTS.SUB"));
        assert!(is_valid_symbol("NFT.A1"));
        assert!(!is_valid_symbol("B"));
        assert!(!is_valid_symbol("bts"));
        assert!(!is_valid_symbol("BTS."));
        assert!(!is_valid_symbol(".BTS"));
        assert!(!is_valid_symbol("A.B.C"));
        assert!(!is_valid_symbol("FOURTEENCHARSX"));
    }

    #[test]
    fn test_account_name_rules() {
        assert!(is_valid_account_name("alice"));
        assert!(is_valid_account_name("init-0"));
        assert!(!is_valid_account_name("al"));
        assert!(!is_valid_account_name("Alice"));
        assert!(!is_valid_account_name("alice-"));
    }
}
