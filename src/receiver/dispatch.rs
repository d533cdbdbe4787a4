//! Batch dispatch.
//!
//! The dispatcher hands every message of a batch to the application handler
//! exactly once and applies the acknowledgment policy around each delivery:
//!
//! - **Sequential**: one message at a time, in batch order. The next handler
//!   call starts only after the previous one (and its acknowledgment) is done.
//! - **Concurrent**: one short-lived task per message, all spawned together.
//!
//! A message reached after the stop signal is skipped outright (no handler
//! call, no acknowledgment) so the backend redelivers it later. Handler
//! errors and panics are contained per message.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::receiver::completion::InFlight;
use crate::receiver::events::{DiagnosticKind, Notifier};
use crate::{
    // ---
    BackendPtr,
    Batch,
    Delivery,
    DispatchMode,
    HandlerPtr,
    ReceivedMessage,
    ReceiverError,
    Resolver,
    Result,
    RetryConfig,
};

pub(crate) struct Dispatcher {
    // ---
    backend: BackendPtr,
    handler: HandlerPtr,
    mode: DispatchMode,
    auto_acknowledge: bool,
    resolve_retry: RetryConfig,
    notifier: Notifier,
    stop: CancellationToken,
}

impl Dispatcher {
    // ---
    pub(crate) fn new(
        backend: BackendPtr,
        handler: HandlerPtr,
        mode: DispatchMode,
        auto_acknowledge: bool,
        resolve_retry: RetryConfig,
        notifier: Notifier,
        stop: CancellationToken,
    ) -> Self {
        // ---
        Self {
            backend,
            handler,
            mode,
            auto_acknowledge,
            resolve_retry,
            notifier,
            stop,
        }
    }

    /// Deliver a batch and return once every delivery has finished.
    pub(crate) async fn dispatch(self: &Arc<Self>, batch: Batch) {
        // ---
        match self.mode {
            DispatchMode::Sequential => {
                for message in batch {
                    if let Err(err) = self.deliver(message).await {
                        self.report_handler_failure(err);
                    }
                }
            }
            DispatchMode::Concurrent => {
                let handles: Vec<_> = batch
                    .into_iter()
                    .map(|message| self.spawn_delivery(message))
                    .collect();

                for handle in handles {
                    match handle.await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => self.report_handler_failure(err),
                        Err(err) => self.report_handler_failure(ReceiverError::Handler(format!(
                            "delivery task did not complete: {err}"
                        ))),
                    }
                }
            }
        }
    }

    /// Start delivering a batch without waiting for it.
    ///
    /// Concurrent mode yields one operation per message; sequential mode
    /// yields a single operation covering the whole batch so its order is
    /// kept.
    pub(crate) fn submit(self: &Arc<Self>, batch: Batch) -> Vec<InFlight> {
        // ---
        match self.mode {
            DispatchMode::Sequential => {
                let context = format!("batch of {} message(s)", batch.len());
                let this = Arc::clone(self);
                let handle = tokio::spawn(async move { this.deliver_in_order(batch).await });
                vec![InFlight::new(context, handle)]
            }
            DispatchMode::Concurrent => batch
                .into_iter()
                .map(|message| {
                    let context = format!("message {}", message.token());
                    InFlight::new(context, self.spawn_delivery(message))
                })
                .collect(),
        }
    }

    /// Sequential delivery that folds every handler failure into one error.
    async fn deliver_in_order(&self, batch: Batch) -> Result<()> {
        // ---
        let total = batch.len();
        let mut failures = Vec::new();

        for message in batch {
            if let Err(err) = self.deliver(message).await {
                failures.push(err.to_string());
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        Err(ReceiverError::Handler(format!(
            "{} of {total} message(s) failed: {}",
            failures.len(),
            failures.join("; ")
        )))
    }

    fn spawn_delivery(self: &Arc<Self>, message: ReceivedMessage) -> JoinHandle<Result<()>> {
        // ---
        let this = Arc::clone(self);
        tokio::spawn(async move { this.deliver(message).await })
    }

    /// Handle one message and apply the acknowledgment policy.
    ///
    /// Returns the handler's failure, if any. A skipped message is `Ok`.
    async fn deliver(&self, message: ReceivedMessage) -> Result<()> {
        // ---
        if self.stop.is_cancelled() {
            crate::log_debug!(
                receiver = self.notifier.receiver_id();
                "stopping, leaving {} for redelivery",
                message.token()
            );
            return Ok(());
        }

        let token = message.token().clone();

        let resolver = if self.auto_acknowledge {
            None
        } else {
            Some(self.resolver(token.clone()))
        };

        let outcome = AssertUnwindSafe(self.handler.handle(Delivery::new(message, resolver)))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(ReceiverError::Handler(detail))) => Err(ReceiverError::Handler(detail)),
            Ok(Err(err)) => Err(ReceiverError::Handler(err.to_string())),
            Err(panic) => Err(ReceiverError::Handler(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        // Runs whatever the handler did.
        if self.auto_acknowledge {
            self.resolver(token).acknowledge().await;
        }

        result
    }

    fn resolver(&self, token: crate::ResolutionToken) -> Resolver {
        // ---
        Resolver::new(
            Arc::clone(&self.backend),
            token,
            self.resolve_retry.clone(),
            self.notifier.clone(),
        )
    }

    fn report_handler_failure(&self, err: ReceiverError) {
        self.notifier
            .diagnostic(DiagnosticKind::HandlerFailed, err.to_string());
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    // ---
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
