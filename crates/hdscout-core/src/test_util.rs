//! Shared test helpers for `hdscout-core` unit tests.
//!
//! Consolidates fixture builders (`addr`, `tx_info`, `test_node`), the
//! scripted derivation source (`SequentialSource`) and the echo worker loop
//! so that tests across modules share a single source of truth for dummy
//! data construction.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::bip32::Xpub;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chain::Chain;
use crate::error::{DerivationError, WorkerError};
use crate::source::{AddressSource, CachingSource};
use crate::types::{Address, BlockHash, BlockHeight, HDNodeProjection, TxId, TxInfo};
use crate::worker::{WorkerReply, WorkerRequest};

// ==============================================================================
// Fixtures
// ==============================================================================

/// The synthetic address for `index`, as derived by [`SequentialSource`]
/// and the echo worker.
pub fn addr(index: u32) -> Address {
    Address(format!("addr-{index}"))
}

/// Build a `TxInfo` with the given id and optional confirmation height.
pub fn tx_info(id: &str, height: Option<u32>) -> TxInfo {
    TxInfo {
        id: TxId::from(id),
        block_hash: height.map(|h| BlockHash(format!("block-{h}"))),
        block_height: height.map(BlockHeight),
        block_index: None,
        payload: serde_json::json!({ "txid": id }),
    }
}

/// The BIP32 test-vector-1 master public key. Any valid xpub works for the
/// structural tests; this one is convenient because it is universally known.
pub fn test_xpub() -> Xpub {
    "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8"
        .parse()
        .expect("static xpub string must parse")
}

pub fn test_node() -> HDNodeProjection {
    HDNodeProjection::from_xpub(&test_xpub())
}

// ==============================================================================
// Scripted Sources
// ==============================================================================

/// Derives synthetic `addr-{index}` strings and records every requested
/// range. Ranges can be scripted to fail until cleared.
#[derive(Default)]
pub struct SequentialSource {
    calls: Mutex<HashMap<(u32, u32), usize>>,
    failing: Mutex<HashSet<(u32, u32)>>,
}

impl SequentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the exact range `(first, last)` was requested.
    pub fn calls_for(&self, range: (u32, u32)) -> usize {
        self.calls
            .lock()
            .expect("calls mutex")
            .get(&range)
            .copied()
            .unwrap_or(0)
    }

    /// Total derivation requests across all ranges.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls mutex").values().sum()
    }

    /// Make requests for `(first, last)` fail until cleared.
    pub fn fail_range(&self, first: u32, last: u32) {
        self.failing
            .lock()
            .expect("failing mutex")
            .insert((first, last));
    }

    pub fn clear_failures(&self) {
        self.failing.lock().expect("failing mutex").clear();
    }
}

#[async_trait]
impl AddressSource for SequentialSource {
    async fn derive(&self, first: u32, last: u32) -> Result<Vec<Address>, DerivationError> {
        *self
            .calls
            .lock()
            .expect("calls mutex")
            .entry((first, last))
            .or_insert(0) += 1;

        if self
            .failing
            .lock()
            .expect("failing mutex")
            .contains(&(first, last))
        {
            return Err(DerivationError::MalformedReply(format!(
                "scripted failure for [{first}, {last}]"
            )));
        }
        Ok((first..=last).map(addr).collect())
    }
}

/// Forwarding wrapper so a test can hand a source to an owning decorator
/// while keeping a handle on its call counters.
pub struct SharedSource(pub Arc<SequentialSource>);

#[async_trait]
impl AddressSource for SharedSource {
    async fn derive(&self, first: u32, last: u32) -> Result<Vec<Address>, DerivationError> {
        self.0.derive(first, last).await
    }
}

/// A chain over a caching source backed by a [`SequentialSource`], plus the
/// handle to the latter.
pub fn sequential_chain(chunk_size: u32) -> (Arc<SequentialSource>, Chain) {
    let inner = Arc::new(SequentialSource::new());
    let caching = CachingSource::new(Box::new(SharedSource(Arc::clone(&inner))));
    (inner, Chain::new(caching, chunk_size))
}

// ==============================================================================
// Echo Worker
// ==============================================================================

/// A scripted derivation worker: answers every request, in order, with the
/// synthetic addresses for its range.
pub fn echo_worker(
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    replies: mpsc::UnboundedSender<Result<WorkerReply, WorkerError>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let WorkerRequest::DeriveAddressRange {
                first_index,
                last_index,
                ..
            } = request;
            let reply = WorkerReply::AddressRange {
                addresses: (first_index..=last_index).map(addr).collect(),
            };
            if replies.send(Ok(reply)).is_err() {
                break;
            }
        }
    })
}
