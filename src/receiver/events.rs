//! Receiver notifications.
//!
//! Everything observable about a running receiver flows through one
//! broadcast channel: received messages, connection edges and diagnostics.
//! Diagnostics are also written to the log, so an application that never
//! subscribes still sees them.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::ReceivedMessage;

/// What went wrong, for a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A polling iteration produced no batch.
    ReceiveFailed,
    /// A handler returned an error or panicked.
    HandlerFailed,
    /// Acknowledge or reject failed on every attempt.
    ResolveFailed,
    /// An awaited in-flight operation failed.
    CompletionFailed,
    /// A replay callback failed; replay carried on.
    ReplayCallbackFailed,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let name = match self {
            DiagnosticKind::ReceiveFailed => "receive failed",
            DiagnosticKind::HandlerFailed => "handler failed",
            DiagnosticKind::ResolveFailed => "resolve failed",
            DiagnosticKind::CompletionFailed => "completion failed",
            DiagnosticKind::ReplayCallbackFailed => "replay callback failed",
        };
        f.write_str(name)
    }
}

/// A recoverable failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub detail: String,
}

/// Notification published by a receiver.
#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    // ---
    /// A message arrived (live polling or replay without a callback).
    MessageReceived(ReceivedMessage),

    /// First successful receive after start or after a failure.
    Connected,

    /// First failed receive after start or after a success.
    Disconnected { reason: String },

    /// A recoverable failure.
    Diagnostic(Diagnostic),
}

/// Publishing side of the event channel, shared by all receiver tasks.
#[derive(Clone)]
pub(crate) struct Notifier {
    // ---
    receiver_id: Arc<str>,
    tx: broadcast::Sender<ReceiverEvent>,
}

impl Notifier {
    // ---
    pub(crate) fn new(receiver_id: impl Into<Arc<str>>, capacity: usize) -> Self {
        // ---
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            receiver_id: receiver_id.into(),
            tx,
        }
    }

    pub(crate) fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ReceiverEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: ReceiverEvent) {
        // An error only means nobody is subscribed.
        let _ = self.tx.send(event);
    }

    /// Log a diagnostic and publish it.
    pub(crate) fn diagnostic(&self, kind: DiagnosticKind, detail: impl Into<String>) {
        // ---
        let detail = detail.into();
        let receiver_id = &self.receiver_id;

        match kind {
            DiagnosticKind::ResolveFailed | DiagnosticKind::CompletionFailed => {
                crate::log_error!(receiver = receiver_id; "{kind}: {detail}");
            }
            _ => {
                crate::log_warn!(receiver = receiver_id; "{kind}: {detail}");
            }
        }

        self.emit(ReceiverEvent::Diagnostic(Diagnostic { kind, detail }));
    }
}
