//! The discovery orchestrator.
//!
//! Couples the chain's address pacer to the backend's history lookup: derive
//! a chunk, subscribe it, look up its transactions, fold the matches into
//! the history, and keep going until the trailing gap of unused addresses
//! reaches the gap length. After that the discovery goes live and follows
//! the backend's notification stream, re-scanning whenever a new match
//! extends the used prefix.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, trace};

use crate::backend::Blockchain;
use crate::chain::Chain;
use crate::database::TxDatabase;
use crate::error::{BackendError, CoreError};
use crate::history::{ChainHistory, HistoryState};
use crate::source::SourceState;
use crate::types::{BlockHash, BlockHeight, TxInfo, TxMatch};

/// Default number of trailing unused addresses required for discovery to
/// settle (BIP44).
pub const DEFAULT_GAP_LENGTH: u32 = 20;

// ==============================================================================
// Events and Status
// ==============================================================================

/// Where a discovery currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Idle,
    ResolvingRange,
    Scanning,
    Live,
    Failed,
}

/// Observable output of a discovery, delivered on its event channel.
#[derive(Debug)]
pub enum ChainEvent {
    /// A transaction touching this chain was discovered, or its block
    /// context was updated.
    Transaction(TxInfo),
    /// The gap limit is satisfied. Fires again whenever live updates extend
    /// the used prefix and the gap is re-satisfied.
    History(HistoryState),
    /// The discovery failed; no further events follow.
    Error(CoreError),
}

/// Persisted form of one chain's discovery state. The account-wide
/// [`TxDatabase`] blob is stored separately and must be restored together
/// with every history that references it.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChainState {
    pub history: HistoryState,
    pub source: SourceState,
}

#[derive(Debug)]
struct ScanWindow {
    since_height: BlockHeight,
    until_height: BlockHeight,
    until_block: BlockHash,
}

// ==============================================================================
// ChainDiscovery
// ==============================================================================

/// One chain's discovery engine.
///
/// Exclusively owns the [`Chain`] and [`ChainHistory`]; shares the account
/// [`TxDatabase`] and the backend by reference. All methods take `&mut
/// self`, so a discovery is serialised by ownership; callers wanting
/// cancellation drop the `run` future and may then persist via
/// [`store`](Self::store).
pub struct ChainDiscovery {
    chain: Chain,
    history: ChainHistory,
    database: Arc<Mutex<TxDatabase>>,
    backend: Arc<dyn Blockchain>,
    gap_length: u32,
    status: DiscoveryStatus,
    events: mpsc::UnboundedSender<ChainEvent>,
    /// Lower bound of every lookup window, pinned at the first resolution.
    /// Chunks derived later in the run must still be queried over the whole
    /// unscanned history, so only the upper bound moves with the tip.
    since_height: Option<BlockHeight>,
}

impl ChainDiscovery {
    /// Build a discovery and hand back the receiving end of its event
    /// channel.
    pub fn new(
        chain: Chain,
        history: ChainHistory,
        database: Arc<Mutex<TxDatabase>>,
        backend: Arc<dyn Blockchain>,
        gap_length: u32,
    ) -> (Self, mpsc::UnboundedReceiver<ChainEvent>) {
        assert!(gap_length > 0, "gap length must be at least 1");
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                chain,
                history,
                database,
                backend,
                gap_length,
                status: DiscoveryStatus::Idle,
                events,
                since_height: None,
            },
            receiver,
        )
    }

    pub fn status(&self) -> DiscoveryStatus {
        self.status
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn history(&self) -> &ChainHistory {
        &self.history
    }

    /// Trailing unused addresses: derived prefix minus used prefix.
    pub fn gap(&self) -> u32 {
        self.chain
            .next_index()
            .saturating_sub(self.history.next_index())
    }

    /// Snapshot this chain's persistable state. The shared database is
    /// stored separately by the account owner.
    pub fn store(&self) -> ChainState {
        ChainState {
            history: self.history.store(),
            source: self.chain.source().store(),
        }
    }

    /// Resolve the scan window and scan until the gap limit is satisfied,
    /// then return. Failures surface as an [`ChainEvent::Error`] and leave
    /// the discovery [`Failed`](DiscoveryStatus::Failed).
    pub async fn run_until_settled(&mut self) {
        if let Err(err) = self.scan().await {
            self.fail(err);
        }
    }

    /// Run the full discovery: scan until settled, then follow live
    /// notifications, re-scanning whenever a match narrows the gap below
    /// the limit. Returns when the backend's notification stream closes or
    /// the discovery fails.
    pub async fn run(&mut self) {
        // Subscribe before scanning so matches arriving mid-scan are
        // buffered rather than lost.
        let mut notifications = self.backend.notifications();

        if let Err(err) = self.scan().await {
            self.fail(err);
            return;
        }
        if let Err(err) = self.follow(&mut notifications).await {
            self.fail(err);
        }
    }

    /// Resolve `{since, until}` heights and the checkpoint hash.
    ///
    /// The lower bound is computed once: a restored history resumes
    /// strictly after its `until_block` (that block is already
    /// incorporated), a cold start scans from genesis. The upper bound is
    /// re-read from the chain tip on every call, so chunks derived after
    /// going live are still looked up against recent blocks.
    async fn resolve_window(&mut self) -> Result<ScanWindow, CoreError> {
        let best = self.backend.lookup_best_block_hash().await?;
        let tip = self.backend.lookup_block_index(&best).await?;
        let since_height = match self.since_height {
            Some(pinned) => pinned,
            None => {
                let since = match self.history.until_block() {
                    Some(checkpoint) => {
                        let checkpoint = self.backend.lookup_block_index(checkpoint).await?;
                        BlockHeight(*checkpoint.height + 1)
                    }
                    None => BlockHeight(0),
                };
                self.since_height = Some(since);
                since
            }
        };
        Ok(ScanWindow {
            since_height,
            until_height: tip.height,
            until_block: tip.hash,
        })
    }

    /// The scanning loop: one chunk per iteration until the gap limit is
    /// satisfied, then emit the history snapshot and go live.
    ///
    /// The next chunk is issued whenever the previous lookup completes,
    /// whether or not it matched anything; termination is the gap check
    /// alone, driven by derivation outpacing use.
    async fn scan(&mut self) -> Result<(), CoreError> {
        self.status = DiscoveryStatus::ResolvingRange;
        let window = self.resolve_window().await?;
        debug!(
            since = *window.since_height,
            until = *window.until_height,
            "scan window resolved"
        );
        self.status = DiscoveryStatus::Scanning;

        while self.gap() < self.gap_length {
            let chunk = self.chain.next_chunk().await?;
            self.backend.subscribe(&chunk).await?;
            let matches = self
                .backend
                .lookup_txs(&chunk, window.until_height, window.since_height)
                .await?;
            self.apply(&matches).await;
            trace!(
                derived = self.chain.next_index(),
                used = self.history.next_index(),
                gap = self.gap(),
                "chunk scanned"
            );
        }

        self.history.set_until_block(window.until_block);
        self.status = DiscoveryStatus::Live;
        self.emit(ChainEvent::History(self.history.store()));
        Ok(())
    }

    /// Follow live notifications. A match that keeps the gap satisfied
    /// re-emits the history; one that narrows it below the limit re-enters
    /// the scanning loop.
    async fn follow(
        &mut self,
        notifications: &mut broadcast::Receiver<TxMatch>,
    ) -> Result<(), CoreError> {
        loop {
            match notifications.recv().await {
                Ok(tx_match) => {
                    if self.apply(std::slice::from_ref(&tx_match)).await {
                        if self.gap() < self.gap_length {
                            self.scan().await?;
                        } else {
                            self.emit(ChainEvent::History(self.history.store()));
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Silently missing notifications would desynchronise the
                    // history; fail instead.
                    return Err(BackendError::NotificationLag(missed).into());
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Fold lookup results into the history and database. Returns whether
    /// any address of this chain matched.
    async fn apply(&mut self, matches: &[TxMatch]) -> bool {
        let mut any = false;
        for tx_match in matches {
            let touched: Vec<u32> = tx_match
                .addresses
                .iter()
                .filter_map(|address| self.chain.index_of(address))
                .collect();
            if touched.is_empty() {
                continue;
            }

            let db_index = self.database.lock().await.update(tx_match.info.clone());
            for address_index in touched {
                self.history.append(address_index, db_index);
            }
            any = true;
            self.emit(ChainEvent::Transaction(tx_match.info.clone()));
        }
        any
    }

    fn fail(&mut self, err: CoreError) {
        self.status = DiscoveryStatus::Failed;
        self.emit(ChainEvent::Error(err));
    }

    fn emit(&self, event: ChainEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}
