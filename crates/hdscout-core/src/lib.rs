//! Core library for **hdscout** — an HD-wallet chain discovery engine.
//!
//! Given a BIP32 public node for one chain, the engine derives addresses
//! through a pipelined source stack (worker or native derivation, one-slot
//! prefetching, exact-range caching), discovers the transaction history
//! touching them through a [`backend::Blockchain`], keeps scanning until
//! the BIP44 gap limit is satisfied, then follows live notifications. The
//! whole state persists and restores for incremental resumption.
//!
//! The crate is transport-agnostic at both seams: the backend trait can be
//! backed by HTTP JSON-RPC ([`backend::HttpBackend`]), a mock, or any
//! future transport, and the derivation worker is reached through a
//! strict-FIFO message channel ([`worker::WorkerChannel`]).
//!
//! Discovery instances are single-owner: every driving method takes
//! `&mut self`, so access is serialised by ownership. Cancellation is
//! dropping the `run` future; persistence is a `store` call afterwards.

pub mod backend;
pub mod chain;
pub mod database;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod history;
pub mod source;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_util;

pub use discovery::{ChainDiscovery, ChainEvent, ChainState, DiscoveryStatus};
pub use engine::Engine;
pub use error::{BackendError, CoreError, DerivationError, WorkerError};
