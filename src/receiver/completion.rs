//! Asynchronous completion tracking.
//!
//! When handling must not hold up the polling loop, the loop spawns the
//! handling work and enqueues its task handle here without waiting. A single
//! drain task takes handles off the queue in enqueue order and awaits each
//! one, reporting failures as diagnostics. Reporting order therefore follows
//! submission order, not the order in which the work actually finished.
//!
//! Closing works by dropping every sender: the drain task keeps going until
//! the queue is empty and closed, so all accepted work is observed before the
//! receiver releases its backend.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::receiver::events::{DiagnosticKind, Notifier};
use crate::Result;

/// One handling operation that has been started but not yet observed.
pub(crate) struct InFlight {
    // ---
    context: String,
    handle: JoinHandle<Result<()>>,
}

impl InFlight {
    pub(crate) fn new(context: impl Into<String>, handle: JoinHandle<Result<()>>) -> Self {
        Self {
            context: context.into(),
            handle,
        }
    }
}

/// Bounded FIFO of in-flight operations plus the task draining it.
pub(crate) struct CompletionTracker {
    // ---
    tx: mpsc::Sender<InFlight>,
    drain: JoinHandle<()>,
}

impl CompletionTracker {
    // ---
    /// Spawn the drain task.
    pub(crate) fn start(capacity: usize, notifier: Notifier) -> Self {
        // ---
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let drain = tokio::spawn(drain(rx, notifier));
        Self { tx, drain }
    }

    /// Producer handle for the polling loop.
    pub(crate) fn sender(&self) -> mpsc::Sender<InFlight> {
        self.tx.clone()
    }

    /// Drop this tracker's sender and wait until everything queued has been
    /// observed.
    ///
    /// The drain only finishes once every other sender is gone too, so the
    /// polling loop must have exited first.
    pub(crate) async fn close(self) {
        // ---
        let CompletionTracker { tx, drain } = self;
        drop(tx);

        if let Err(err) = drain.await {
            crate::log_error!("completion drain task failed: {err}");
        }
    }
}

async fn drain(mut rx: mpsc::Receiver<InFlight>, notifier: Notifier) {
    // ---
    let receiver_id = notifier.receiver_id().to_string();
    crate::log_debug!(receiver = receiver_id; "completion drain started");

    while let Some(op) = rx.recv().await {
        match op.handle.await {
            Ok(Ok(())) => {
                crate::log_debug!(receiver = receiver_id; "{} completed", op.context);
            }
            Ok(Err(err)) => {
                notifier.diagnostic(DiagnosticKind::CompletionFailed, format!("{}: {err}", op.context));
            }
            Err(err) => {
                notifier.diagnostic(
                    DiagnosticKind::CompletionFailed,
                    format!("{}: task did not complete: {err}", op.context),
                );
            }
        }
    }

    crate::log_debug!(receiver = receiver_id; "completion drain finished");
}
