//! Exact-range memoisation decorator.
//!
//! Maps `(first, last)`, serialised as a stable `"<first>-<last>"` key,
//! to the derived address list. Lookups are by exact range: two overlapping
//! but non-equal ranges miss independently, which matches the caller's
//! discipline of fixed-size chunking. The cache is the persisted half of
//! the source pipeline; restoring it lets a chain rebuild its address maps
//! without touching the worker.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, DerivationError};
use crate::types::Address;

use super::AddressSource;

/// Persisted form of a [`CachingSource`]: the plain range → addresses map.
/// The prefetch slot below the cache is never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceState {
    pub cache: HashMap<String, Vec<Address>>,
}

// ==============================================================================
// CachingSource
// ==============================================================================

/// Decorator memoising successful derivations by exact range.
///
/// Failures are not cached; entries are immutable once written.
pub struct CachingSource {
    inner: Box<dyn AddressSource>,
    entries: Mutex<HashMap<String, Vec<Address>>>,
}

impl CachingSource {
    pub fn new(inner: Box<dyn AddressSource>) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn range_key(first: u32, last: u32) -> String {
        format!("{first}-{last}")
    }

    /// Snapshot the cache for persistence.
    pub fn store(&self) -> SourceState {
        SourceState {
            cache: self.entries.lock().expect("cache mutex").clone(),
        }
    }

    /// Replace the cache with a persisted snapshot.
    ///
    /// Rejects blobs whose keys do not parse as ranges or whose entries do
    /// not hold one address per index.
    pub fn restore(&self, state: SourceState) -> Result<(), CoreError> {
        for (key, addresses) in &state.cache {
            let (first, last) = parse_range_key(key)
                .ok_or_else(|| CoreError::Serialization(format!("malformed range key `{key}`")))?;
            let expected = (last - first + 1) as usize;
            if addresses.len() != expected {
                return Err(CoreError::Serialization(format!(
                    "range `{key}` holds {} addresses, expected {expected}",
                    addresses.len()
                )));
            }
        }
        *self.entries.lock().expect("cache mutex") = state.cache;
        Ok(())
    }
}

fn parse_range_key(key: &str) -> Option<(u32, u32)> {
    let (first, last) = key.split_once('-')?;
    let first: u32 = first.parse().ok()?;
    let last: u32 = last.parse().ok()?;
    (last >= first).then_some((first, last))
}

#[async_trait]
impl AddressSource for CachingSource {
    async fn derive(&self, first: u32, last: u32) -> Result<Vec<Address>, DerivationError> {
        let key = Self::range_key(first, last);
        if let Some(hit) = self.entries.lock().expect("cache mutex").get(&key).cloned() {
            return Ok(hit);
        }

        let addresses = self.inner.derive(first, last).await?;
        self.entries
            .lock()
            .expect("cache mutex")
            .insert(key, addresses.clone());
        Ok(addresses)
    }
}
