//! Address derivation sources.
//!
//! [`AddressSource`] is the capability at the left edge of the discovery
//! pipeline: give it an inclusive index range, get back the ordered
//! addresses. [`NativeAddressSource`] derives in-process,
//! [`WorkerAddressSource`] delegates to the external derivation worker, and
//! the two decorators ([`PrefetchingSource`], [`CachingSource`]) wrap an
//! inner source while keeping its contract.

mod cache;
mod native;
mod prefetch;
mod worker;

pub use cache::{CachingSource, SourceState};
pub use native::NativeAddressSource;
pub use prefetch::PrefetchingSource;
pub use worker::WorkerAddressSource;

use async_trait::async_trait;

use crate::error::DerivationError;
use crate::types::Address;

/// Produces the ordered address sequence for an index range.
#[async_trait]
pub trait AddressSource: Send + Sync {
    /// Derive the addresses for the inclusive range `[first, last]`.
    ///
    /// Callers guarantee `last >= first`; the result holds exactly
    /// `last - first + 1` addresses in ascending index order.
    async fn derive(&self, first: u32, last: u32) -> Result<Vec<Address>, DerivationError>;
}
