//! Blockchain backend abstraction.
//!
//! Defines the [`Blockchain`] trait the discovery engine consumes and
//! provides an HTTP JSON-RPC implementation ([`HttpBackend`]) plus a test
//! mock (`mock::MockChain`). Live transaction notifications arrive on a
//! broadcast stream so several discoveries can follow the same backend.

pub mod http;
#[cfg(test)]
pub mod mock;

pub use http::HttpBackend;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::BackendError;
use crate::types::{Address, BlockHash, BlockHeight, BlockIndex, TxMatch};

/// Capacity of a backend's live notification buffer. A receiver that falls
/// further behind observes a lag error instead of silently missing matches.
pub const NOTIFICATION_BUFFER: usize = 1024;

/// The blockchain operations chain discovery needs.
///
/// Implementations handle connection management and response decoding
/// internally; the engine treats every call as a suspension point and every
/// failure as fatal to the discovery that issued it.
#[async_trait]
pub trait Blockchain: Send + Sync {
    /// Hash of the current chain tip.
    async fn lookup_best_block_hash(&self) -> Result<BlockHash, BackendError>;

    /// Resolve a block hash to its position in the chain.
    async fn lookup_block_index(&self, hash: &BlockHash) -> Result<BlockIndex, BackendError>;

    /// Every transaction in the inclusive height window
    /// `[since_height, until_height]` touching any of `addresses`.
    async fn lookup_txs(
        &self,
        addresses: &[Address],
        until_height: BlockHeight,
        since_height: BlockHeight,
    ) -> Result<Vec<TxMatch>, BackendError>;

    /// Fire-and-forget live subscription; matches for these addresses
    /// surface later on the notification stream.
    async fn subscribe(&self, addresses: &[Address]) -> Result<(), BackendError>;

    /// Open a receiver on the live transaction notification stream.
    fn notifications(&self) -> broadcast::Receiver<TxMatch>;
}
