// src/domain/backend.rs

//! Backend capability abstractions.
//!
//! This module defines the contract between the receiver engine and a
//! concrete message backend. It intentionally avoids any reference to a
//! specific queue service, broker or client library.
//!
//! Two shapes of backend are covered:
//!
//! - [`Backend`]: the live receive path shared by queue-style and log-style
//!   bindings (receive a batch, acknowledge, reject, close).
//! - [`LogSession`]: the extra partition and timestamp operations a
//!   log-structured broker exposes, used only by the replay engine through a
//!   separate, isolated session obtained from a [`LogConnector`].
//!
//! Backends own their sessions exclusively; the engine never shares one
//! backend instance between two receivers. Sessions are created lazily by a
//! [`BackendConnector`] the first time a receiver starts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    Batch,
    PartitionId,
    ReceivedMessage,
    ReceiverConfig,
    ResolutionToken,
    Result,
};

/// Result of one successful receive call.
///
/// A backend call can complete without a transport error and still not
/// produce anything usable; those cases count as failures for connection
/// tracking but are not retried.
#[derive(Debug, Clone)]
pub enum ReceiveOutcome {
    // ---
    /// Messages received (possibly none).
    Batch(Batch),

    /// The backend answered with a non-success status code.
    Unsuccessful { code: String },

    /// The backend answered with nothing the engine can interpret.
    NoResponse,
}

/// Routing filter passed to [`Backend::subscribe`] when a receiver starts.
///
/// Its interpretation is backend-specific: topic names for log brokers,
/// attribute names or queue URLs for queue services.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingFilter(pub Vec<Arc<str>>);

impl RoutingFilter {
    pub fn new<I, S>(routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        RoutingFilter(routes.into_iter().map(Into::into).collect())
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(AsRef::as_ref)
    }
}

/// Live receive capability.
///
/// Implementations must ensure that:
/// - `receive_batch` returns at most `max_messages` messages and is bounded
///   in time (long-poll wait, or until `cancel` fires).
/// - Every returned message carries a token valid for exactly one
///   `acknowledge` or `reject`.
/// - Transient failures are reported as [`ReceiverError::Backend`] so the
///   engine can retry them.
///
/// [`ReceiverError::Backend`]: crate::ReceiverError::Backend
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    // ---
    /// Identifier used in diagnostics.
    fn backend_id(&self) -> &str;

    /// Establish the subscription or partition assignment for live polling.
    ///
    /// Called once per start, before the polling loop runs. Queue backends
    /// usually have nothing to do here.
    async fn subscribe(&self, _filter: Option<&RoutingFilter>) -> Result<()> {
        Ok(())
    }

    /// Fetch up to `max_messages` messages.
    async fn receive_batch(
        &self,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome>;

    /// Acknowledge (delete / commit) a message.
    async fn acknowledge(&self, token: &ResolutionToken) -> Result<()>;

    /// Reject a message so the backend redelivers it.
    async fn reject(&self, token: &ResolutionToken) -> Result<()>;

    /// Release the session. Called once when the receiver stops.
    async fn close(&self) -> Result<()>;
}

/// Shared backend pointer.
pub type BackendPtr = Arc<dyn Backend>;

/// Lazily opens the backend session for a receiver.
///
/// The receiver calls this at most once, on its first start, so that building
/// a receiver never performs I/O.
#[async_trait::async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, config: &ReceiverConfig) -> Result<BackendPtr>;
}

/// An already-constructed backend doubles as its own connector.
#[async_trait::async_trait]
impl<B> BackendConnector for Arc<B>
where
    B: Backend + 'static,
{
    async fn connect(&self, _config: &ReceiverConfig) -> Result<BackendPtr> {
        // ---
        let backend: BackendPtr = self.clone();
        Ok(backend)
    }
}

/// Starting position for one partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionOffset {
    // ---
    pub partition: PartitionId,

    /// First offset whose timestamp is at or after the requested time, or
    /// `None` if the partition holds no such message.
    pub offset: Option<i64>,
}

/// Partition-level access to a log-structured topic.
///
/// A session is owned by one replay run. It must not commit offsets.
#[async_trait::async_trait]
pub trait LogSession: Send + Sync {
    // ---
    /// Partition metadata for `topic`.
    async fn partitions(&self, topic: &str) -> Result<Vec<PartitionId>>;

    /// Resolve, per partition, the earliest offset at or after `at`.
    async fn offsets_for_time(
        &self,
        topic: &str,
        partitions: &[PartitionId],
        at: DateTime<Utc>,
    ) -> Result<Vec<PartitionOffset>>;

    /// Assign the session to exactly these positions, bypassing group
    /// balancing.
    async fn assign(&self, topic: &str, positions: &[PartitionOffset]) -> Result<()>;

    /// Consume one message, waiting at most `wait`.
    ///
    /// `Ok(None)` means nothing arrived in time.
    async fn consume(
        &self,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<ReceivedMessage>>;

    async fn close(&self) -> Result<()>;
}

/// Opens isolated log sessions for replay.
#[async_trait::async_trait]
pub trait LogConnector: Send + Sync {
    /// Open a session under `consumer_group`, which is unique per replay run
    /// so it cannot interfere with the live group's committed offsets.
    async fn connect_isolated(&self, consumer_group: &str) -> Result<Arc<dyn LogSession>>;
}
