//! Domain types for chain discovery.
//!
//! Contains the opaque wire newtypes (`Address`, `TxId`, `BlockHash`), the
//! block-context types (`BlockHeight`, `BlockIndex`), the pass-through
//! transaction record (`TxInfo`, `TxMatch`) and the HD node projection
//! shipped to the derivation worker.

use serde::{Deserialize, Serialize};

use bitcoin::bip32::{ChainCode, ChildNumber, Fingerprint, Xpub};
use bitcoin::secp256k1::PublicKey;
use bitcoin::NetworkKind;

use crate::error::DerivationError;

// ==============================================================================
// Opaque Wire Newtypes
// ==============================================================================

/// A derived address, base58 or bech32. Opaque to the engine: it is produced
/// by an address source and only ever compared and displayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A backend-assigned transaction id, unique per transaction for the
/// lifetime of a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub String);

impl From<&str> for TxId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A block hash as reported by the backend, kept opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(pub String);

impl From<&str> for BlockHash {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ==============================================================================
// Block Height
// ==============================================================================

/// A block height, wrapped for type safety.
///
/// `#[serde(transparent)]` preserves the JSON representation as a bare
/// integer, so this newtype is wire-compatible with plain `u32`.
/// `Deref<Target = u32>` minimises call-site churn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHeight(pub u32);

impl From<u32> for BlockHeight {
    fn from(h: u32) -> Self {
        Self(h)
    }
}

impl From<BlockHeight> for u32 {
    fn from(h: BlockHeight) -> Self {
        h.0
    }
}

impl std::ops::Deref for BlockHeight {
    type Target = u32;
    fn deref(&self) -> &u32 {
        &self.0
    }
}

impl std::fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Position of a block in the chain: its height plus its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndex {
    pub height: BlockHeight,
    pub hash: BlockHash,
}

// ==============================================================================
// Transaction Record
// ==============================================================================

/// A transaction plus its block context.
///
/// The backend payload is carried through untouched; the engine only reads
/// the id and the block context. Block context is last-write-wins: a later
/// notification for the same id (e.g. a confirmation) overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInfo {
    pub id: TxId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<BlockHash>,
    /// `None` for unconfirmed (mempool) transactions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<BlockHeight>,
    /// Position of the transaction within its block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u32>,
    /// Raw backend payload, pass-through.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A discovered transaction together with the addresses it touches, as
/// reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TxMatch {
    pub info: TxInfo,
    pub addresses: Vec<Address>,
}

// ==============================================================================
// HD Node Projection
// ==============================================================================

/// The minimal projection of a BIP32 extended public key needed to derive
/// child addresses, in the shape the derivation worker consumes. Immutable
/// after construction; built once per chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HDNodeProjection {
    pub depth: u8,
    pub child_num: u32,
    /// Parent key fingerprint, big-endian.
    pub fingerprint: u32,
    #[serde(with = "hex_array")]
    pub chain_code: [u8; 32],
    /// Compressed SEC1 public key.
    #[serde(with = "hex_array")]
    pub public_key: [u8; 33],
}

impl HDNodeProjection {
    /// Project an extended public key down to the worker wire shape.
    pub fn from_xpub(xpub: &Xpub) -> Self {
        Self {
            depth: xpub.depth,
            child_num: u32::from(xpub.child_number),
            fingerprint: u32::from_be_bytes(xpub.parent_fingerprint.to_bytes()),
            chain_code: xpub.chain_code.to_bytes(),
            public_key: xpub.public_key.serialize(),
        }
    }

    /// Rebuild an extended public key for in-process derivation.
    ///
    /// The network kind only affects base58 re-encoding of the xpub itself,
    /// never derivation; addresses take their version explicitly.
    pub fn to_xpub(&self) -> Result<Xpub, DerivationError> {
        Ok(Xpub {
            network: NetworkKind::Main,
            depth: self.depth,
            parent_fingerprint: Fingerprint::from(self.fingerprint.to_be_bytes()),
            child_number: ChildNumber::from(self.child_num),
            chain_code: ChainCode::from(self.chain_code),
            public_key: PublicKey::from_slice(&self.public_key)
                .map_err(|e| DerivationError::InvalidNode(e.to_string()))?,
        })
    }
}

/// Hex (de)serialization for fixed-size byte arrays.
mod hex_array {
    use bitcoin::hex::{DisplayHex, FromHex};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&bytes.to_lower_hex_string())
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let bytes = Vec::<u8>::from_hex(&raw).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| de::Error::custom(format!("expected {N} bytes, got {}", b.len())))
    }
}
