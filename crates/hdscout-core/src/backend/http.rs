//! HTTP JSON-RPC implementation of the [`Blockchain`] backend.
//!
//! Talks JSON-RPC 2.0 to an address-index node, with optional basic auth
//! and request rate limiting, and an LRU cache of block-index lookups.
//! HTTP cannot push, so `subscribe` registers addresses with a polling
//! watcher task that diffs the chain tip and broadcasts matches on the
//! notification stream.

use std::collections::HashSet;
use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::try_join_all;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use lru::LruCache;
use reqwest::header;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::BackendError;
use crate::types::{Address, BlockHash, BlockHeight, BlockIndex, TxId, TxInfo, TxMatch};

use super::{Blockchain, NOTIFICATION_BUFFER};

/// Maximum number of block-hash → block-index entries cached in memory.
const BLOCK_INDEX_CACHE_CAP: usize = 10_000;
/// Maximum number of addresses per `getAddressHistory` call.
const HISTORY_CHUNK_SIZE: usize = 50;
/// How often the watcher polls for live matches.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

// ==============================================================================
// HttpBackend
// ==============================================================================

/// JSON-RPC-over-HTTP blockchain backend.
///
/// If `requests_per_second` is set, calls are rate-limited per outbound
/// HTTP request (a windowed history lookup counts one request per chunk).
pub struct HttpBackend {
    core: Arc<RpcCore>,
    watched: Arc<RwLock<HashSet<Address>>>,
    notify_tx: broadcast::Sender<TxMatch>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl HttpBackend {
    /// Create a backend and start its live-poll watcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        url: &str,
        user: Option<&str>,
        pass: Option<&str>,
        requests_per_second: Option<u32>,
    ) -> Result<Self, BackendError> {
        Self::connect_with_poll_interval(url, user, pass, requests_per_second, DEFAULT_POLL_INTERVAL)
    }

    pub fn connect_with_poll_interval(
        url: &str,
        user: Option<&str>,
        pass: Option<&str>,
        requests_per_second: Option<u32>,
        poll_interval: Duration,
    ) -> Result<Self, BackendError> {
        let auth = match (user, pass) {
            (Some(u), Some(p)) => Some((u.to_owned(), p.to_owned())),
            _ => None,
        };

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .tcp_nodelay(true)
            .build()
            .expect("reqwest client builder uses valid static config");

        let limiter = match requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    BackendError::InvalidResponse(
                        "requests_per_second must be at least 1".to_owned(),
                    )
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        let core = Arc::new(RpcCore {
            client,
            url: url.to_owned(),
            auth,
            limiter,
            next_id: AtomicU64::new(initial_request_id()),
            block_index_cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(BLOCK_INDEX_CACHE_CAP)
                    .expect("BLOCK_INDEX_CACHE_CAP is non-zero"),
            )),
        });

        let watched: Arc<RwLock<HashSet<Address>>> = Arc::new(RwLock::new(HashSet::new()));
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let watcher = spawn_watcher(
            Arc::clone(&core),
            Arc::clone(&watched),
            notify_tx.clone(),
            poll_interval,
        );

        Ok(Self {
            core,
            watched,
            notify_tx,
            watcher: Mutex::new(Some(watcher)),
        })
    }
}

impl Drop for HttpBackend {
    fn drop(&mut self) {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(watcher) = watcher.take() {
                watcher.abort();
            }
        }
    }
}

#[async_trait]
impl Blockchain for HttpBackend {
    async fn lookup_best_block_hash(&self) -> Result<BlockHash, BackendError> {
        self.core.best_block_hash().await
    }

    async fn lookup_block_index(&self, hash: &BlockHash) -> Result<BlockIndex, BackendError> {
        self.core.block_index(hash).await
    }

    async fn lookup_txs(
        &self,
        addresses: &[Address],
        until_height: BlockHeight,
        since_height: BlockHeight,
    ) -> Result<Vec<TxMatch>, BackendError> {
        self.core
            .address_history(addresses, until_height, since_height)
            .await
    }

    async fn subscribe(&self, addresses: &[Address]) -> Result<(), BackendError> {
        if addresses.is_empty() {
            return Ok(());
        }
        self.watched
            .write()
            .await
            .extend(addresses.iter().cloned());
        self.core.subscribe_addresses(addresses).await
    }

    fn notifications(&self) -> broadcast::Receiver<TxMatch> {
        self.notify_tx.subscribe()
    }
}

// ==============================================================================
// Live Poll Watcher
// ==============================================================================

/// Poll for new blocks and broadcast history matches for watched addresses.
/// Poll failures are logged and retried on the next tick; only direct
/// backend calls made by a discovery are fatal to it.
fn spawn_watcher(
    core: Arc<RpcCore>,
    watched: Arc<RwLock<HashSet<Address>>>,
    notify_tx: broadcast::Sender<TxMatch>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_tip: Option<BlockIndex> = None;
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let addresses: Vec<Address> = watched.read().await.iter().cloned().collect();
            if addresses.is_empty() {
                continue;
            }

            match poll_once(&core, &addresses, last_tip.as_ref()).await {
                Ok((tip, matches)) => {
                    for tx_match in matches {
                        let _ = notify_tx.send(tx_match);
                    }
                    last_tip = Some(tip);
                }
                Err(err) => {
                    warn!(error = %err, "live poll failed; retrying on the next tick");
                }
            }
        }
    })
}

async fn poll_once(
    core: &RpcCore,
    addresses: &[Address],
    last_tip: Option<&BlockIndex>,
) -> Result<(BlockIndex, Vec<TxMatch>), BackendError> {
    let best = core.best_block_hash().await?;
    if let Some(prev) = last_tip {
        if prev.hash == best {
            return Ok((prev.clone(), Vec::new()));
        }
    }

    let tip = core.block_index(&best).await?;
    let matches = match last_tip {
        // First tick establishes the baseline; discovery already scanned
        // everything up to here.
        None => Vec::new(),
        Some(prev) => {
            core.address_history(addresses, tip.height, BlockHeight(*prev.height + 1))
                .await?
        }
    };
    Ok((tip, matches))
}

// ==============================================================================
// RpcCore — JSON-RPC plumbing
// ==============================================================================

struct RpcCore {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
    limiter: Option<DirectRateLimiter>,
    next_id: AtomicU64,
    /// Bounded LRU cache of block-hash → block-index lookups. Confirmed
    /// block positions are immutable, so entries never need invalidation,
    /// only eviction under memory pressure.
    block_index_cache: RwLock<LruCache<BlockHash, BlockIndex>>,
}

impl RpcCore {
    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn rpc_call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, BackendError> {
        self.wait_for_rate_limit().await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            rpc.id = id,
            rpc.method = method,
            rpc.params = params.len(),
            "rpc call"
        );
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&req);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(BackendError::Transport)?;
        let status = response.status();

        let body = response.text().await.map_err(BackendError::Transport)?;
        debug!(rpc.id = id, rpc.method = method, %status, body_len = body.len(), "rpc response");
        trace!(rpc.id = id, rpc.method = method, body = %body, "rpc response body");

        let decoded: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            BackendError::InvalidResponse(format!("decode JSON-RPC response: {e}; body={body}"))
        })?;

        if let Some(err) = decoded.error {
            return Err(parse_jsonrpc_error(err));
        }

        Ok(decoded.result.unwrap_or(serde_json::Value::Null))
    }

    async fn best_block_hash(&self) -> Result<BlockHash, BackendError> {
        let raw = self.rpc_call("getBestBlockHash", Vec::new()).await?;
        raw.as_str()
            .map(BlockHash::from)
            .ok_or_else(|| BackendError::InvalidResponse(format!("non-string best block hash: {raw}")))
    }

    async fn block_index(&self, hash: &BlockHash) -> Result<BlockIndex, BackendError> {
        // The LRU cache requires a write lock for `get` (it updates
        // recency), but the lookup is fast so the write lock is acceptable.
        if let Some(index) = self.block_index_cache.write().await.get(hash).cloned() {
            return Ok(index);
        }

        let raw = self
            .rpc_call("getBlockIndex", vec![serde_json::json!(hash)])
            .await?;
        let index: BlockIndex = serde_json::from_value(raw)
            .map_err(|e| BackendError::InvalidResponse(format!("invalid block index: {e}")))?;

        self.block_index_cache
            .write()
            .await
            .put(hash.clone(), index.clone());
        Ok(index)
    }

    async fn address_history(
        &self,
        addresses: &[Address],
        until_height: BlockHeight,
        since_height: BlockHeight,
    ) -> Result<Vec<TxMatch>, BackendError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        // Keep each request small enough for node limits while still
        // issuing the windows concurrently to avoid serial round-trips.
        let window_futures: Vec<_> = addresses
            .chunks(HISTORY_CHUNK_SIZE)
            .map(|chunk| self.history_window(chunk, until_height, since_height))
            .collect();
        let windows = try_join_all(window_futures).await?;
        Ok(windows.into_iter().flatten().collect())
    }

    async fn history_window(
        &self,
        addresses: &[Address],
        until_height: BlockHeight,
        since_height: BlockHeight,
    ) -> Result<Vec<TxMatch>, BackendError> {
        let raw = self
            .rpc_call(
                "getAddressHistory",
                vec![
                    serde_json::json!(addresses),
                    serde_json::json!(*since_height),
                    serde_json::json!(*until_height),
                ],
            )
            .await?;

        let items = raw.as_array().ok_or_else(|| {
            BackendError::InvalidResponse(format!("non-array address history: {raw}"))
        })?;
        items.iter().cloned().map(parse_history_item).collect()
    }

    async fn subscribe_addresses(&self, addresses: &[Address]) -> Result<(), BackendError> {
        self.rpc_call("subscribeAddresses", vec![serde_json::json!(addresses)])
            .await?;
        Ok(())
    }
}

fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

// ==============================================================================
// JSON-RPC Protocol Types
// ==============================================================================

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

/// Parse a JSON-RPC error value into a structured `BackendError`.
///
/// The JSON-RPC spec defines errors as `{"code": <int>, "message": <string>}`.
/// If the error value matches that shape, we produce a `ServerError`;
/// otherwise we fall back to `InvalidResponse` with the raw JSON.
fn parse_jsonrpc_error(err: serde_json::Value) -> BackendError {
    #[derive(Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
    }

    if let Ok(parsed) = serde_json::from_value::<JsonRpcError>(err.clone()) {
        BackendError::ServerError {
            code: parsed.code,
            message: parsed.message,
        }
    } else {
        BackendError::InvalidResponse(format!("non-standard JSON-RPC error: {err}"))
    }
}

// ==============================================================================
// Response Parsing
// ==============================================================================

#[derive(Deserialize)]
struct RawHistoryItem {
    tx: serde_json::Value,
    addresses: Vec<Address>,
}

/// Parse one `getAddressHistory` item into a [`TxMatch`].
///
/// Only the id and block context are lifted out; the transaction object is
/// carried through as the opaque payload.
fn parse_history_item(item: serde_json::Value) -> Result<TxMatch, BackendError> {
    let raw: RawHistoryItem = serde_json::from_value(item)
        .map_err(|e| BackendError::InvalidResponse(format!("invalid history item: {e}")))?;

    let id = raw
        .tx
        .get("txid")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| BackendError::InvalidResponse("history item missing txid".into()))?;

    let block_hash = raw
        .tx
        .get("blockHash")
        .and_then(serde_json::Value::as_str)
        .map(BlockHash::from);
    let block_height = parse_u32_opt(raw.tx.get("height")).map(BlockHeight);
    let block_index = parse_u32_opt(raw.tx.get("blockIndex"));

    Ok(TxMatch {
        info: TxInfo {
            id: TxId::from(id),
            block_hash,
            block_height,
            block_index,
            payload: raw.tx,
        },
        addresses: raw.addresses,
    })
}

fn parse_u32_opt(value: Option<&serde_json::Value>) -> Option<u32> {
    value
        .and_then(serde_json::Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}
