//! Mock [`Blockchain`] implementation for unit tests.
//!
//! Uses a builder pattern (`MockChain::builder()`) to register canned
//! transaction matches and block positions before the mock is consumed.
//! Tests push live notifications by hand via [`MockChain::notify`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::BackendError;
use crate::types::{Address, BlockHash, BlockHeight, BlockIndex, TxInfo, TxMatch};

use super::{Blockchain, NOTIFICATION_BUFFER};

/// A scripted blockchain backend. Serves canned matches filtered by address
/// and height window, and can fail `lookup_txs` on a chosen call. The tip
/// can move and matches can be registered mid-test to script live activity.
pub struct MockChain {
    matches: Mutex<Vec<TxMatch>>,
    blocks: Mutex<HashMap<BlockHash, BlockIndex>>,
    best_block: Mutex<BlockHash>,
    lookup_calls: AtomicUsize,
    fail_lookup_on_call: Option<usize>,
    subscribed: Mutex<Vec<Address>>,
    notify_tx: broadcast::Sender<TxMatch>,
}

impl MockChain {
    pub fn builder() -> MockChainBuilder {
        MockChainBuilder {
            matches: Vec::new(),
            blocks: HashMap::new(),
            best_block: BlockHash::from("block-0"),
            fail_lookup_on_call: None,
        }
    }

    /// Push a live transaction notification, as the backend would after a
    /// subscription match.
    pub fn notify(&self, tx_match: TxMatch) {
        let _ = self.notify_tx.send(tx_match);
    }

    /// Advance the chain tip, registering the new block's index as well.
    pub fn set_best_block(&self, hash: &str, height: u32) {
        self.blocks.lock().expect("blocks mutex").insert(
            BlockHash::from(hash),
            BlockIndex {
                height: BlockHeight(height),
                hash: BlockHash::from(hash),
            },
        );
        *self.best_block.lock().expect("best block mutex") = BlockHash::from(hash);
    }

    /// Register a transaction match mid-test, as a newly confirmed
    /// transaction would appear.
    pub fn add_match(&self, info: TxInfo, addresses: &[&str]) {
        self.matches.lock().expect("matches mutex").push(TxMatch {
            info,
            addresses: addresses.iter().map(|a| Address::from(*a)).collect(),
        });
    }

    /// Every address subscribed so far, in subscription order.
    pub fn subscribed(&self) -> Vec<Address> {
        self.subscribed.lock().expect("subscribed mutex").clone()
    }

    /// How many times `lookup_txs` was called.
    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::Relaxed)
    }
}

/// Builder for configuring a [`MockChain`] with canned data.
pub struct MockChainBuilder {
    matches: Vec<TxMatch>,
    blocks: HashMap<BlockHash, BlockIndex>,
    best_block: BlockHash,
    fail_lookup_on_call: Option<usize>,
}

impl MockChainBuilder {
    /// Set the chain tip, registering its block index as well.
    pub fn with_best_block(mut self, hash: &str, height: u32) -> Self {
        self.best_block = BlockHash::from(hash);
        self.with_block(hash, height)
    }

    /// Register a block position for `lookup_block_index`.
    pub fn with_block(mut self, hash: &str, height: u32) -> Self {
        self.blocks.insert(
            BlockHash::from(hash),
            BlockIndex {
                height: BlockHeight(height),
                hash: BlockHash::from(hash),
            },
        );
        self
    }

    /// Register a transaction match served by `lookup_txs`.
    pub fn with_match(mut self, info: TxInfo, addresses: &[&str]) -> Self {
        self.matches.push(TxMatch {
            info,
            addresses: addresses.iter().map(|a| Address::from(*a)).collect(),
        });
        self
    }

    /// Make the n-th `lookup_txs` call (1-based) fail.
    pub fn fail_lookup_on_call(mut self, call: usize) -> Self {
        self.fail_lookup_on_call = Some(call);
        self
    }

    pub fn build(self) -> MockChain {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        MockChain {
            matches: Mutex::new(self.matches),
            blocks: Mutex::new(self.blocks),
            best_block: Mutex::new(self.best_block),
            lookup_calls: AtomicUsize::new(0),
            fail_lookup_on_call: self.fail_lookup_on_call,
            subscribed: Mutex::new(Vec::new()),
            notify_tx,
        }
    }
}

#[async_trait]
impl Blockchain for MockChain {
    async fn lookup_best_block_hash(&self) -> Result<BlockHash, BackendError> {
        Ok(self.best_block.lock().expect("best block mutex").clone())
    }

    async fn lookup_block_index(&self, hash: &BlockHash) -> Result<BlockIndex, BackendError> {
        self.blocks
            .lock()
            .expect("blocks mutex")
            .get(hash)
            .cloned()
            .ok_or_else(|| BackendError::InvalidResponse(format!("unknown block `{hash}`")))
    }

    async fn lookup_txs(
        &self,
        addresses: &[Address],
        until_height: BlockHeight,
        since_height: BlockHeight,
    ) -> Result<Vec<TxMatch>, BackendError> {
        let call = self.lookup_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_lookup_on_call == Some(call) {
            return Err(BackendError::ServerError {
                code: -1,
                message: format!("scripted failure on call {call}"),
            });
        }

        Ok(self
            .matches
            .lock()
            .expect("matches mutex")
            .iter()
            .filter(|m| {
                let in_window = match m.info.block_height {
                    Some(height) => height >= since_height && height <= until_height,
                    None => true,
                };
                in_window && m.addresses.iter().any(|a| addresses.contains(a))
            })
            .cloned()
            .collect())
    }

    async fn subscribe(&self, addresses: &[Address]) -> Result<(), BackendError> {
        self.subscribed
            .lock()
            .expect("subscribed mutex")
            .extend_from_slice(addresses);
        Ok(())
    }

    fn notifications(&self) -> broadcast::Receiver<TxMatch> {
        self.notify_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::tx_info;

    #[tokio::test]
    async fn lookup_filters_by_address_and_window() {
        let chain = MockChain::builder()
            .with_best_block("block-100", 100)
            .with_match(tx_info("aa", Some(50)), &["addr-0"])
            .with_match(tx_info("bb", Some(150)), &["addr-0"])
            .with_match(tx_info("cc", Some(50)), &["addr-9"])
            .build();

        let matches = chain
            .lookup_txs(&[Address::from("addr-0")], BlockHeight(100), BlockHeight(0))
            .await
            .expect("lookup");

        assert_eq!(matches.len(), 1, "out-of-window and foreign matches drop");
        assert_eq!(matches[0].info.id, "aa".into());
    }

    #[tokio::test]
    async fn scripted_failure_fires_on_the_chosen_call() {
        let chain = MockChain::builder()
            .with_best_block("block-100", 100)
            .fail_lookup_on_call(2)
            .build();

        assert!(chain
            .lookup_txs(&[], BlockHeight(100), BlockHeight(0))
            .await
            .is_ok());
        assert!(chain
            .lookup_txs(&[], BlockHeight(100), BlockHeight(0))
            .await
            .is_err());
        assert_eq!(chain.lookup_calls(), 2);
    }
}
