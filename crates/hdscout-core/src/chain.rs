//! Address chain: the dense index ↔ address bimap and the derivation pacer.

use std::collections::HashMap;

use tracing::debug;

use crate::error::DerivationError;
use crate::source::{AddressSource, CachingSource};
use crate::types::Address;

/// Default number of addresses derived per batch.
pub const DEFAULT_CHUNK_SIZE: u32 = 20;

// ==============================================================================
// IndexBimap
// ==============================================================================

/// Mutually inverse maps between dense address indices and addresses.
/// Indices are issued in insertion order starting at 0; only the forward
/// direction would need serialising, but the chain is rebuilt from the
/// source cache instead.
#[derive(Debug, Default)]
struct IndexBimap {
    forward: Vec<Address>,
    reverse: HashMap<Address, u32>,
}

impl IndexBimap {
    fn insert(&mut self, address: Address) -> u32 {
        let index = self.forward.len() as u32;
        self.reverse.insert(address.clone(), index);
        self.forward.push(address);
        index
    }

    fn index_of(&self, address: &Address) -> Option<u32> {
        self.reverse.get(address).copied()
    }

    fn address_of(&self, index: u32) -> Option<&Address> {
        self.forward.get(index as usize)
    }

    fn len(&self) -> u32 {
        self.forward.len() as u32
    }
}

// ==============================================================================
// Chain
// ==============================================================================

/// One HD sub-tree's linear address sequence.
///
/// Owns the source pipeline and freezes every derived address into the
/// bimap. `next_index` always equals the number of derived addresses; the
/// orchestrator never overlaps `next_chunk` calls for the same chain.
pub struct Chain {
    source: CachingSource,
    addresses: IndexBimap,
    chunk_size: u32,
}

impl Chain {
    pub fn new(source: CachingSource, chunk_size: u32) -> Self {
        assert!(chunk_size > 0, "chunk size must be at least 1");
        Self {
            source,
            addresses: IndexBimap::default(),
            chunk_size,
        }
    }

    pub fn index_of(&self, address: &Address) -> Option<u32> {
        self.addresses.index_of(address)
    }

    pub fn address_of(&self, index: u32) -> Option<&Address> {
        self.addresses.address_of(index)
    }

    /// The next index to be derived; equivalently, how many addresses the
    /// chain holds.
    pub fn next_index(&self) -> u32 {
        self.addresses.len()
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// The caching layer at the top of the source pipeline, for
    /// store/restore.
    pub fn source(&self) -> &CachingSource {
        &self.source
    }

    /// Derive the next chunk and freeze it into the maps.
    ///
    /// Returns the newly derived addresses in index order.
    pub async fn next_chunk(&mut self) -> Result<Vec<Address>, DerivationError> {
        let first = self.next_index();
        let last = first + self.chunk_size - 1;

        let addresses = self.source.derive(first, last).await?;
        for address in &addresses {
            self.addresses.insert(address.clone());
        }
        debug!(first, last, next_index = self.next_index(), "chunk installed");
        Ok(addresses)
    }
}
