//! Background polling loop.
//!
//! One task per running receiver. Each iteration issues one receive call
//! (retried a bounded number of times on transient failure), feeds the
//! outcome to the connection tracker, and hands any batch to the dispatcher.
//!
//! The loop never ends on its own: backend failures become diagnostics and a
//! short pause. It exits once the receiver's cancellation token fires, and
//! the in-progress receive is raced against that token so a backend that
//! ignores cancellation cannot hold up stop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::receiver::completion::InFlight;
use crate::receiver::connection::{ConnectionState, ConnectionTracker};
use crate::receiver::dispatch::Dispatcher;
use crate::receiver::events::{DiagnosticKind, Notifier};
use crate::retry::retry_with_backoff;
use crate::{
    // ---
    BackendPtr,
    Batch,
    ReceiveOutcome,
    ReceiverEvent,
    RetryConfig,
};

pub(crate) struct PollingLoop {
    // ---
    pub(crate) backend: BackendPtr,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) notifier: Notifier,
    pub(crate) tracker: Arc<ConnectionTracker>,
    pub(crate) max_batch_size: usize,
    pub(crate) receive_retry: RetryConfig,
    pub(crate) failure_backoff: Duration,
    pub(crate) completion: Option<mpsc::Sender<InFlight>>,
    pub(crate) stop: CancellationToken,
}

impl PollingLoop {
    // ---
    pub(crate) async fn run(self) {
        // ---
        let receiver_id = self.notifier.receiver_id().to_string();
        crate::log_info!(receiver = receiver_id; "polling started on {}", self.backend.backend_id());

        while !self.stop.is_cancelled() {
            let attempt = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                result = self.receive() => result,
            };

            match attempt {
                Ok(ReceiveOutcome::Batch(batch)) => {
                    self.observe(true, None);
                    if !batch.is_empty() {
                        self.forward(batch).await;
                    }
                }
                Ok(ReceiveOutcome::Unsuccessful { code }) => {
                    self.failed(format!("unsuccessful response: {code}")).await;
                }
                Ok(ReceiveOutcome::NoResponse) => {
                    self.failed("no usable response".to_string()).await;
                }
                Err(_) if self.stop.is_cancelled() => break,
                Err(err) => {
                    self.failed(err.to_string()).await;
                }
            }
        }

        crate::log_info!(receiver = receiver_id; "polling stopped");
    }

    async fn receive(&self) -> crate::Result<ReceiveOutcome> {
        // ---
        retry_with_backoff(&self.receive_retry, || {
            self.backend.receive_batch(self.max_batch_size, &self.stop)
        })
        .await
    }

    /// Record an outcome and publish the edge, if there is one.
    fn observe(&self, succeeded: bool, reason: Option<&str>) {
        // ---
        match self.tracker.observe(succeeded) {
            Some(ConnectionState::Connected) => {
                crate::log_info!(receiver = self.notifier.receiver_id(); "connected");
                self.notifier.emit(ReceiverEvent::Connected);
            }
            Some(ConnectionState::Disconnected) => {
                let reason = reason.unwrap_or("receive failed").to_string();
                crate::log_warn!(receiver = self.notifier.receiver_id(); "disconnected: {reason}");
                self.notifier.emit(ReceiverEvent::Disconnected { reason });
            }
            Some(ConnectionState::Unknown) | None => {}
        }
    }

    async fn failed(&self, reason: String) {
        // ---
        self.observe(false, Some(&reason));
        self.notifier.diagnostic(
            DiagnosticKind::ReceiveFailed,
            format!("{}: {reason}", self.backend.backend_id()),
        );

        if self.failure_backoff.is_zero() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.failure_backoff) => {}
            _ = self.stop.cancelled() => {}
        }
    }

    async fn forward(&self, batch: Batch) {
        // ---
        for message in &batch {
            self.notifier
                .emit(ReceiverEvent::MessageReceived(message.clone()));
        }

        let Some(completion) = &self.completion else {
            self.dispatcher.dispatch(batch).await;
            return;
        };

        // A full queue holds polling back until the drain catches up.
        for op in self.dispatcher.submit(batch) {
            if completion.send(op).await.is_err() {
                crate::log_error!(
                    receiver = self.notifier.receiver_id();
                    "completion queue closed, operation not tracked"
                );
            }
        }
    }
}
