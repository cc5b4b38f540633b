//! In-process address derivation from a BIP32 public node.

use async_trait::async_trait;

use bitcoin::base58;
use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::{Secp256k1, VerifyOnly};

use crate::error::DerivationError;
use crate::types::{Address, HDNodeProjection};

use super::AddressSource;

// ==============================================================================
// NativeAddressSource
// ==============================================================================

/// Derives addresses in-process: child public key, hash160, base58check.
///
/// The address version is always explicit: the same node yields different
/// address strings per network, and this source never assumes mainnet.
/// Useful as a test source and as a fallback when no derivation worker is
/// attached.
pub struct NativeAddressSource {
    secp: Secp256k1<VerifyOnly>,
    xpub: Xpub,
    version: u32,
}

impl NativeAddressSource {
    pub fn new(xpub: Xpub, version: u32) -> Self {
        Self {
            secp: Secp256k1::verification_only(),
            xpub,
            version,
        }
    }

    /// Rebuild the node from its worker-wire projection.
    pub fn from_projection(node: &HDNodeProjection, version: u32) -> Result<Self, DerivationError> {
        Ok(Self::new(node.to_xpub()?, version))
    }

    fn address_at(&self, index: u32) -> Result<Address, DerivationError> {
        let child = ChildNumber::from_normal_idx(index)?;
        let derived = self.xpub.derive_pub(&self.secp, &[child])?;
        let pubkey_hash = hash160::Hash::hash(&derived.public_key.serialize());

        let mut payload = version_prefix(self.version);
        payload.extend_from_slice(pubkey_hash.as_byte_array());
        Ok(Address(base58::encode_check(&payload)))
    }
}

/// Minimal big-endian encoding of an address version.
///
/// Single-byte versions cover Bitcoin-family networks; two-byte versions
/// (e.g. Zcash transparent addresses) need the full prefix.
fn version_prefix(version: u32) -> Vec<u8> {
    let bytes = version.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(3);
    bytes[start..].to_vec()
}

#[async_trait]
impl AddressSource for NativeAddressSource {
    async fn derive(&self, first: u32, last: u32) -> Result<Vec<Address>, DerivationError> {
        debug_assert!(last >= first, "ranges are contiguous and non-empty");
        (first..=last).map(|index| self.address_at(index)).collect()
    }
}
