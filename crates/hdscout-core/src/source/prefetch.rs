//! One-slot look-ahead decorator.
//!
//! After every successful derivation the next contiguous range of the same
//! size is derived speculatively on a spawned task, so a caller walking the
//! chain in fixed-size chunks finds its next request already in flight.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::DerivationError;
use crate::types::Address;

use super::AddressSource;

struct PrefetchSlot {
    first: u32,
    last: u32,
    task: JoinHandle<Result<Vec<Address>, DerivationError>>,
}

// ==============================================================================
// PrefetchingSource
// ==============================================================================

/// Decorator that keeps at most one speculative derivation in flight.
///
/// A request matching the live slot adopts its result; any other request
/// falls through to a fresh inner derivation and orphans the slot; the
/// orphan is aborted so its result cannot leak. Prefetch errors surface
/// only if a later caller adopts the slot.
pub struct PrefetchingSource {
    inner: Arc<dyn AddressSource>,
    slot: Mutex<Option<PrefetchSlot>>,
}

impl PrefetchingSource {
    pub fn new(inner: Arc<dyn AddressSource>) -> Self {
        Self {
            inner,
            slot: Mutex::new(None),
        }
    }

    fn install(&self, first: u32, last: u32) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.derive(first, last).await });
        debug!(first, last, "prefetch installed");
        *self.slot.lock().expect("prefetch slot mutex") = Some(PrefetchSlot { first, last, task });
    }
}

#[async_trait]
impl AddressSource for PrefetchingSource {
    async fn derive(&self, first: u32, last: u32) -> Result<Vec<Address>, DerivationError> {
        let slot = self.slot.lock().expect("prefetch slot mutex").take();

        let result = match slot {
            Some(slot) if slot.first == first && slot.last == last => {
                debug!(first, last, "prefetch adopted");
                match slot.task.await {
                    Ok(result) => result,
                    Err(join_error) => Err(DerivationError::Interrupted(join_error.to_string())),
                }
            }
            other => {
                if let Some(stale) = other {
                    // Orphaned: the speculative result must not leak anywhere.
                    debug!(
                        stale_first = stale.first,
                        stale_last = stale.last,
                        "prefetch mismatch, discarding slot"
                    );
                    stale.task.abort();
                }
                self.inner.derive(first, last).await
            }
        };

        if result.is_ok() {
            // Install the follow-up before handing the result back, so the
            // immediately-following request can adopt it.
            let size = last - first;
            if let (Some(next_first), Some(next_last)) = (
                last.checked_add(1),
                last.checked_add(1).and_then(|f| f.checked_add(size)),
            ) {
                self.install(next_first, next_last);
            }
        }
        result
    }
}

impl Drop for PrefetchingSource {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            if let Some(slot) = slot.take() {
                slot.task.abort();
            }
        }
    }
}
