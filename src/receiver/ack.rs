//! Acknowledgment protocol.
//!
//! A [`Resolver`] owns one message's resolution token and the backend it came
//! from. Acknowledge and reject consume the resolver, so a token cannot be
//! used twice. Both calls are retried a bounded number of times; when every
//! attempt fails the failure is reported as a diagnostic and the message is
//! left for the backend to redeliver.

use crate::receiver::events::{DiagnosticKind, Notifier};
use crate::retry::retry_with_backoff;
use crate::{BackendPtr, ResolutionToken, RetryConfig};

/// Final state of a resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Acknowledged,
    Rejected,
    /// Every attempt failed; redelivery is up to the backend.
    Unresolved,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Acknowledge,
    Reject,
}

/// Capability to resolve exactly one received message.
pub struct Resolver {
    // ---
    backend: BackendPtr,
    token: ResolutionToken,
    retry: RetryConfig,
    notifier: Notifier,
}

impl Resolver {
    // ---
    pub(crate) fn new(
        backend: BackendPtr,
        token: ResolutionToken,
        retry: RetryConfig,
        notifier: Notifier,
    ) -> Self {
        // ---
        Self {
            backend,
            token,
            retry,
            notifier,
        }
    }

    pub fn token(&self) -> &ResolutionToken {
        &self.token
    }

    /// Acknowledge the message. Never fails; see [`Resolution`].
    pub async fn acknowledge(self) -> Resolution {
        self.resolve(Action::Acknowledge).await
    }

    /// Reject the message. Never fails; see [`Resolution`].
    pub async fn reject(self) -> Resolution {
        self.resolve(Action::Reject).await
    }

    async fn resolve(self, action: Action) -> Resolution {
        // ---
        let backend = &self.backend;
        let token = &self.token;

        let result = retry_with_backoff(&self.retry, || async move {
            match action {
                Action::Acknowledge => backend.acknowledge(token).await,
                Action::Reject => backend.reject(token).await,
            }
        })
        .await;

        match (result, action) {
            (Ok(()), Action::Acknowledge) => Resolution::Acknowledged,
            (Ok(()), Action::Reject) => Resolution::Rejected,
            (Err(err), _) => {
                self.notifier.diagnostic(
                    DiagnosticKind::ResolveFailed,
                    format!(
                        "{action:?} of {token} on {} failed: {err}",
                        backend.backend_id()
                    ),
                );
                Resolution::Unresolved
            }
        }
    }
}
