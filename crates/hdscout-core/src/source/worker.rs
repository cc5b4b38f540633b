//! Address derivation through the external worker.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DerivationError;
use crate::types::{Address, HDNodeProjection};
use crate::worker::{WorkerChannel, WorkerReply, WorkerRequest};

use super::AddressSource;

/// Delegates derivation to the worker over the FIFO channel.
///
/// The channel is shared by reference across chains, but each discovery
/// engine posts serially, so the FIFO pairing holds.
pub struct WorkerAddressSource {
    channel: Arc<WorkerChannel>,
    node: HDNodeProjection,
    version: u32,
}

impl WorkerAddressSource {
    pub fn new(channel: Arc<WorkerChannel>, node: HDNodeProjection, version: u32) -> Self {
        Self {
            channel,
            node,
            version,
        }
    }
}

#[async_trait]
impl AddressSource for WorkerAddressSource {
    async fn derive(&self, first: u32, last: u32) -> Result<Vec<Address>, DerivationError> {
        debug_assert!(last >= first, "ranges are contiguous and non-empty");

        let request = WorkerRequest::DeriveAddressRange {
            node: self.node.clone(),
            version: self.version,
            first_index: first,
            last_index: last,
        };
        let WorkerReply::AddressRange { addresses } = self.channel.post(request).await?;

        let expected = (last - first + 1) as usize;
        if addresses.len() != expected {
            return Err(DerivationError::MalformedReply(format!(
                "expected {expected} addresses for [{first}, {last}], worker sent {}",
                addresses.len()
            )));
        }
        Ok(addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use crate::test_util::{addr, echo_worker, test_node};
    use tokio::sync::mpsc;

    fn worker_source() -> (
        WorkerAddressSource,
        mpsc::UnboundedReceiver<WorkerRequest>,
        mpsc::UnboundedSender<Result<WorkerReply, WorkerError>>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(WorkerChannel::open(out_tx, in_rx));
        (
            WorkerAddressSource::new(channel, test_node(), 0),
            out_rx,
            in_tx,
        )
    }

    #[tokio::test]
    async fn derive_round_trips_through_the_worker() {
        let (source, out_rx, in_tx) = worker_source();
        let _worker = echo_worker(out_rx, in_tx);

        let addresses = source.derive(40, 59).await.expect("derive range");
        assert_eq!(addresses.len(), 20);
        assert_eq!(addresses[0], addr(40));
        assert_eq!(addresses[19], addr(59));
    }

    #[tokio::test]
    async fn short_reply_is_a_malformed_reply() {
        let (source, mut out_rx, in_tx) = worker_source();

        let driver = tokio::spawn(async move {
            out_rx.recv().await.expect("request transmitted");
            in_tx
                .send(Ok(WorkerReply::AddressRange {
                    addresses: vec![addr(0)],
                }))
                .expect("send short reply");
        });

        let result = source.derive(0, 19).await;
        driver.await.expect("driver task");
        assert!(matches!(result, Err(DerivationError::MalformedReply(_))));
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_worker_error() {
        let (source, mut out_rx, in_tx) = worker_source();

        let driver = tokio::spawn(async move {
            out_rx.recv().await.expect("request transmitted");
            in_tx
                .send(Err(WorkerError::Transport("worker died".into())))
                .expect("send transport error");
        });

        let result = source.derive(0, 19).await;
        driver.await.expect("driver task");
        assert!(matches!(
            result,
            Err(DerivationError::Worker(WorkerError::Transport(_)))
        ));
    }
}
