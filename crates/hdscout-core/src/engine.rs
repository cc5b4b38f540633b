//! Engine wiring.
//!
//! An [`Engine`] is the explicit bundle of shared collaborators (the
//! backend, the optional derivation worker channel, and the discovery
//! knobs) constructed once at program start. Each `discover_chain` call builds a
//! full source pipeline (worker or native base, prefetching, caching) and a
//! ready-to-run [`ChainDiscovery`], optionally restored from persisted
//! state.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::backend::Blockchain;
use crate::chain::{Chain, DEFAULT_CHUNK_SIZE};
use crate::database::TxDatabase;
use crate::discovery::{ChainDiscovery, ChainEvent, ChainState, DEFAULT_GAP_LENGTH};
use crate::error::CoreError;
use crate::history::ChainHistory;
use crate::source::{
    AddressSource, CachingSource, NativeAddressSource, PrefetchingSource, WorkerAddressSource,
};
use crate::types::HDNodeProjection;
use crate::worker::WorkerChannel;

// ==============================================================================
// Engine
// ==============================================================================

/// Shared collaborators for chain discoveries.
///
/// The worker channel, when present, is shared across chains; a discovery
/// posts serially, and callers must not run discoveries that share a
/// channel in parallel.
pub struct Engine {
    backend: Arc<dyn Blockchain>,
    channel: Option<Arc<WorkerChannel>>,
    gap_length: u32,
    chunk_size: u32,
}

impl Engine {
    pub fn new(backend: Arc<dyn Blockchain>) -> Self {
        Self {
            backend,
            channel: None,
            gap_length: DEFAULT_GAP_LENGTH,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Route derivation through an external worker instead of the native
    /// in-process fallback.
    pub fn with_worker(mut self, channel: Arc<WorkerChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_gap_length(mut self, gap_length: u32) -> Self {
        self.gap_length = gap_length;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Build a discovery for one chain.
    ///
    /// `database` is the account-wide transaction registry, shared between
    /// the account's chains. `restored` replays a previous `store`;
    /// inconsistent blobs surface as [`CoreError::Serialization`], in which
    /// case the caller may retry cold.
    pub async fn discover_chain(
        &self,
        node: &HDNodeProjection,
        version: u32,
        database: Arc<Mutex<TxDatabase>>,
        restored: Option<ChainState>,
    ) -> Result<(ChainDiscovery, mpsc::UnboundedReceiver<ChainEvent>), CoreError> {
        let base: Arc<dyn AddressSource> = match &self.channel {
            Some(channel) => Arc::new(WorkerAddressSource::new(
                Arc::clone(channel),
                node.clone(),
                version,
            )),
            None => Arc::new(NativeAddressSource::from_projection(node, version)?),
        };
        let caching = CachingSource::new(Box::new(PrefetchingSource::new(base)));

        let mut history = ChainHistory::new();
        if let Some(state) = restored {
            caching.restore(state.source)?;
            let database = database.lock().await;
            history = ChainHistory::restore(state.history, &database)?;
        }

        let chain = Chain::new(caching, self.chunk_size);
        Ok(ChainDiscovery::new(
            chain,
            history,
            database,
            Arc::clone(&self.backend),
            self.gap_length,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockChain;
    use crate::discovery::DiscoveryStatus;
    use crate::history::HistoryState;
    use crate::source::SourceState;
    use crate::test_util::{echo_worker, test_node, tx_info};

    fn backend() -> Arc<MockChain> {
        Arc::new(MockChain::builder().with_best_block("block-100", 100).build())
    }

    #[tokio::test]
    async fn native_pipeline_discovers_a_cold_chain() {
        let engine = Engine::new(backend() as Arc<dyn Blockchain>);
        let database = Arc::new(Mutex::new(TxDatabase::new()));

        let (mut discovery, _events) = engine
            .discover_chain(&test_node(), 0, database, None)
            .await
            .expect("build discovery");
        discovery.run_until_settled().await;

        assert_eq!(discovery.status(), DiscoveryStatus::Live);
        assert_eq!(discovery.chain().next_index(), 20);

        // Real base58 addresses came out of the native pipeline.
        let first = discovery.chain().address_of(0).expect("derived address");
        assert!(first.as_str().starts_with('1'));
    }

    #[tokio::test]
    async fn store_restore_round_trips_through_the_engine() {
        let backend = backend();
        let engine = Engine::new(Arc::clone(&backend) as Arc<dyn Blockchain>);
        let database = Arc::new(Mutex::new(TxDatabase::new()));

        let (mut discovery, _events) = engine
            .discover_chain(&test_node(), 0, Arc::clone(&database), None)
            .await
            .expect("build discovery");
        discovery.run_until_settled().await;

        let state = discovery.store();
        assert!(
            !state.source.cache.is_empty(),
            "the range cache must persist"
        );
        drop(discovery);

        let database_blob = database.lock().await.store();
        let restored_database = Arc::new(Mutex::new(
            TxDatabase::restore(database_blob).expect("restore database"),
        ));
        let (mut resumed, _events) = engine
            .discover_chain(&test_node(), 0, restored_database, Some(state.clone()))
            .await
            .expect("rebuild discovery");
        resumed.run_until_settled().await;

        assert_eq!(resumed.status(), DiscoveryStatus::Live);
        assert_eq!(resumed.store().source, state.source);
    }

    #[tokio::test]
    async fn inconsistent_blobs_surface_as_serialization_errors() {
        let engine = Engine::new(backend() as Arc<dyn Blockchain>);
        let database = Arc::new(Mutex::new(TxDatabase::new()));

        // A history referencing a transaction the empty database cannot hold.
        let state = ChainState {
            history: HistoryState {
                until_block: None,
                list: vec![Some(vec![0])],
            },
            source: SourceState::default(),
        };

        let result = engine
            .discover_chain(&test_node(), 0, database, Some(state))
            .await;
        assert!(matches!(result, Err(CoreError::Serialization(_))));
    }

    #[tokio::test]
    async fn worker_backed_chains_share_the_account_database() {
        let backend = Arc::new(
            MockChain::builder()
                .with_best_block("block-100", 100)
                .with_match(tx_info("shared", Some(90)), &["addr-0"])
                .build(),
        );

        let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();
        let (in_tx, in_rx) = tokio::sync::mpsc::unbounded_channel();
        let _worker = echo_worker(out_rx, in_tx);
        let channel = Arc::new(WorkerChannel::open(out_tx, in_rx));

        let engine = Engine::new(Arc::clone(&backend) as Arc<dyn Blockchain>).with_worker(channel);
        let database = Arc::new(Mutex::new(TxDatabase::new()));

        // Two chains, one database: the scripted worker derives the same
        // synthetic addresses for both, so the match lands in each history
        // but the registry holds a single entry.
        let (mut external, _ev1) = engine
            .discover_chain(&test_node(), 0, Arc::clone(&database), None)
            .await
            .expect("build external discovery");
        external.run_until_settled().await;

        let (mut change, _ev2) = engine
            .discover_chain(&test_node(), 1, Arc::clone(&database), None)
            .await
            .expect("build change discovery");
        change.run_until_settled().await;

        assert_eq!(external.history().next_index(), 1);
        assert_eq!(change.history().next_index(), 1);

        let database = database.lock().await;
        assert_eq!(database.len(), 1, "both chains reference one entry");
        let listed = external.history().transactions_at(0, &database);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "shared".into());
    }
}
