//! Wire protocol spoken over the worker channel.
//!
//! Requests are a tagged variant so new request kinds can be added without
//! breaking the strict-FIFO pairing; replies carry no tag because pairing
//! is positional (the n-th reply answers the n-th request).

use serde::{Deserialize, Serialize};

use crate::types::{Address, HDNodeProjection};

/// A request posted to the derivation worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    /// Derive the addresses for the inclusive index range
    /// `[first_index, last_index]` under `node`.
    #[serde(rename_all = "camelCase")]
    DeriveAddressRange {
        node: HDNodeProjection,
        /// Address version, network-dependent.
        version: u32,
        first_index: u32,
        last_index: u32,
    },
}

/// A reply received from the derivation worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerReply {
    /// Addresses in ascending index order, one per index in the requested
    /// range.
    AddressRange { addresses: Vec<Address> },
}
