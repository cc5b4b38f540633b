//! Strict-FIFO RPC channel to the derivation worker.
//!
//! The worker replies *linearly*: the n-th posted request is answered by the
//! n-th received reply. [`WorkerChannel`] maintains a queue of pending
//! futures and a pump task that resolves the oldest one per reply; that
//! pairing is the only invariant that makes the worker correct.

pub mod protocol;

pub use protocol::{WorkerReply, WorkerRequest};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::WorkerError;

/// Outbound half of a worker transport: requests written by the channel.
pub type WorkerSender = mpsc::UnboundedSender<WorkerRequest>;

/// Inbound half of a worker transport: replies, or transport errors, in
/// the order the worker produced them.
pub type WorkerReceiver = mpsc::UnboundedReceiver<Result<WorkerReply, WorkerError>>;

type Pending = Arc<Mutex<VecDeque<oneshot::Sender<Result<WorkerReply, WorkerError>>>>>;

// ==============================================================================
// WorkerChannel
// ==============================================================================

/// Single-consumer FIFO RPC channel over a long-lived worker.
///
/// Requires **exclusive** access: correctness hinges on post-order equalling
/// reply-order, so the channel must not be shared across concurrent posters
/// without external serialisation. A discovery engine posts serially by
/// construction.
///
/// Failure semantics:
/// - a transport error rejects only the *oldest* pending future; the worker
///   may still reply, in order, to the rest;
/// - a reply arriving with no pending request is a protocol violation: the
///   pump shuts down and the channel refuses further posts;
/// - when the transport ends, the backlog is rejected with
///   [`WorkerError::Closed`], since nothing can answer it any more;
/// - [`close`](Self::close) detaches the pump but does not cancel requests
///   already outstanding.
pub struct WorkerChannel {
    outbound: WorkerSender,
    pending: Pending,
    closed: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerChannel {
    /// Open a channel over a transport pair and start the reply pump.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(outbound: WorkerSender, inbound: WorkerReceiver) -> Self {
        let pending: Pending = Arc::new(Mutex::new(VecDeque::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let pump = tokio::spawn(Self::pump(
            inbound,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));
        Self {
            outbound,
            pending,
            closed,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Post a request and wait for its paired reply.
    pub async fn post(&self, request: WorkerRequest) -> Result<WorkerReply, WorkerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkerError::Closed);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending queue mutex")
            .push_back(reply_tx);

        if self.outbound.send(request).is_err() {
            // The transmit failed, so the entry just enqueued can never be
            // answered; remove it again.
            self.pending
                .lock()
                .expect("pending queue mutex")
                .pop_back();
            return Err(WorkerError::Closed);
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Closed),
        }
    }

    /// Detach the reply pump. Outstanding requests are left pending, not
    /// cancelled; new posts fail with [`WorkerError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(pump) = self.pump.lock().expect("pump handle mutex").take() {
            pump.abort();
        }
    }

    /// Whether the channel stopped accepting posts (closed explicitly, the
    /// transport ended, or the FIFO invariant was violated).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn pump(mut inbound: WorkerReceiver, pending: Pending, closed: Arc<AtomicBool>) {
        while let Some(item) = inbound.recv().await {
            match item {
                Ok(reply) => {
                    let waiter = pending.lock().expect("pending queue mutex").pop_front();
                    match waiter {
                        Some(waiter) => {
                            debug!("worker reply paired with oldest pending request");
                            let _ = waiter.send(Ok(reply));
                        }
                        None => {
                            error!("worker reply arrived with no pending request; closing channel");
                            closed.store(true, Ordering::Release);
                            return;
                        }
                    }
                }
                Err(err) => {
                    debug!(error = %err, "worker transport error; rejecting oldest pending request");
                    if let Some(waiter) = pending.lock().expect("pending queue mutex").pop_front() {
                        let _ = waiter.send(Err(err));
                    }
                }
            }
        }
        // Transport ended: the worker is gone and nothing can answer the
        // backlog, so reject it rather than leave callers hanging.
        closed.store(true, Ordering::Release);
        let mut pending = pending.lock().expect("pending queue mutex");
        while let Some(waiter) = pending.pop_front() {
            let _ = waiter.send(Err(WorkerError::Closed));
        }
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.close();
    }
}
