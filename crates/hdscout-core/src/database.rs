//! Account-wide transaction registry.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::types::{TxId, TxInfo};

// ==============================================================================
// TxDatabase
// ==============================================================================

/// Content-addressed transaction store, one per account.
///
/// Internal indices are dense integers, stable within a process lifetime
/// but not across [`restore`](Self::restore), which reassigns them by order
/// of appearance in the serialised list; the chain histories that refer to
/// them are persisted alongside, so both must be restored together.
#[derive(Debug, Default)]
pub struct TxDatabase {
    infos: Vec<TxInfo>,
    by_id: HashMap<TxId, usize>,
}

impl TxDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction, or overwrite it in place if the id is already
    /// known. Overwriting preserves the internal index; block context is
    /// last-write-wins.
    pub fn update(&mut self, info: TxInfo) -> usize {
        match self.by_id.get(&info.id) {
            Some(&index) => {
                self.infos[index] = info;
                index
            }
            None => {
                let index = self.infos.len();
                self.by_id.insert(info.id.clone(), index);
                self.infos.push(info);
                index
            }
        }
    }

    pub fn index_of(&self, id: &TxId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn info_of(&self, index: usize) -> Option<&TxInfo> {
        self.infos.get(index)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Snapshot for persistence: the transaction list in internal-index
    /// order.
    pub fn store(&self) -> Vec<TxInfo> {
        self.infos.clone()
    }

    /// Rebuild from a persisted snapshot, reassigning dense indices by list
    /// order.
    pub fn restore(items: Vec<TxInfo>) -> Result<Self, CoreError> {
        let mut database = Self::new();
        for info in items {
            if database.by_id.contains_key(&info.id) {
                return Err(CoreError::Serialization(format!(
                    "duplicate transaction id `{}` in database blob",
                    info.id
                )));
            }
            database.update(info);
        }
        Ok(database)
    }
}
