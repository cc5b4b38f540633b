//! Per-chain transaction timeline.
//!
//! Maps each used address index to the transactions touching it, in
//! observation order, as indices into the account's [`TxDatabase`].
//! Storing indices rather than records means block-context rewrites via
//! [`TxDatabase::update`] are visible to every history listing the
//! transaction; reads dereference through a `&TxDatabase` argument, so no
//! back-reference is held.

use serde::{Deserialize, Serialize};

use crate::database::TxDatabase;
use crate::error::CoreError;
use crate::types::{BlockHash, TxInfo};

/// Persisted form of a [`ChainHistory`].
///
/// `list` is positional: the entry at position `i` belongs to address index
/// `i`, with `null` gaps for unused indices in between.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryState {
    pub until_block: Option<BlockHash>,
    pub list: Vec<Option<Vec<u32>>>,
}

impl HistoryState {
    /// Highest used address index + 1.
    pub fn next_index(&self) -> u32 {
        self.list.len() as u32
    }
}

// ==============================================================================
// ChainHistory
// ==============================================================================

/// The used prefix of a chain: which address indices have transactions, and
/// which ones. `next_index` here counts *used* addresses, as opposed to
/// [`Chain::next_index`](crate::chain::Chain::next_index) which counts
/// *derived* ones; the difference between the two is the gap.
#[derive(Debug, Default)]
pub struct ChainHistory {
    entries: Vec<Option<Vec<usize>>>,
    until_block: Option<BlockHash>,
}

impl ChainHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest used address index + 1. The trailing entry, when one exists,
    /// is always occupied.
    pub fn next_index(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Hash of the most recent block incorporated into this history.
    pub fn until_block(&self) -> Option<&BlockHash> {
        self.until_block.as_ref()
    }

    pub fn set_until_block(&mut self, hash: BlockHash) {
        self.until_block = Some(hash);
    }

    /// Record that the transaction at `db_index` touches `address_index`.
    /// Re-deliveries of an already-listed transaction are ignored.
    pub fn append(&mut self, address_index: u32, db_index: usize) {
        let slot = address_index as usize;
        if slot >= self.entries.len() {
            self.entries.resize(slot + 1, None);
        }
        let list = self.entries[slot].get_or_insert_with(Vec::new);
        if !list.contains(&db_index) {
            list.push(db_index);
        }
    }

    /// The transactions touching `address_index`, in observation order,
    /// dereferenced through the account database.
    pub fn transactions_at<'db>(
        &self,
        address_index: u32,
        database: &'db TxDatabase,
    ) -> Vec<&'db TxInfo> {
        self.entries
            .get(address_index as usize)
            .and_then(Option::as_ref)
            .map(|list| {
                list.iter()
                    .filter_map(|&index| database.info_of(index))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot for persistence.
    pub fn store(&self) -> HistoryState {
        HistoryState {
            until_block: self.until_block.clone(),
            list: self
                .entries
                .iter()
                .map(|entry| {
                    entry
                        .as_ref()
                        .map(|list| list.iter().map(|&index| index as u32).collect())
                })
                .collect(),
        }
    }

    /// Rebuild from a persisted snapshot, validating every transaction
    /// reference against the database restored alongside it.
    pub fn restore(state: HistoryState, database: &TxDatabase) -> Result<Self, CoreError> {
        let mut entries: Vec<Option<Vec<usize>>> = Vec::with_capacity(state.list.len());
        for (address_index, entry) in state.list.into_iter().enumerate() {
            let entry = match entry {
                None => None,
                Some(list) => Some(
                    list.into_iter()
                        .map(|index| {
                            let index = index as usize;
                            if index >= database.len() {
                                return Err(CoreError::Serialization(format!(
                                    "history entry for address {address_index} references \
                                     database index {index}, but the database holds {} items",
                                    database.len()
                                )));
                            }
                            Ok(index)
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                ),
            };
            entries.push(entry);
        }

        // Store never emits trailing gaps; drop any so next_index stays the
        // used prefix.
        while entries.last().is_some_and(Option::is_none) {
            entries.pop();
        }

        Ok(Self {
            entries,
            until_block: state.until_block,
        })
    }
}
