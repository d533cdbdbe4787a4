//! Public, backend-agnostic receiver configuration.
//!
//! This type intentionally contains no client-library concepts. Backend
//! connectors read the fields they understand (endpoints, consumer group,
//! offset policy) and ignore the rest.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ReceiverError, Result, RetryConfig};

/// Upper bound on `max_batch_size` (the queue-service receive limit).
pub const MAX_BATCH_SIZE: usize = 10;

/// How the messages of one batch are handed to the handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One message at a time, in batch order.
    #[default]
    Sequential,

    /// Every message of the batch in its own task, no ordering.
    Concurrent,
}

/// What a log backend does when the group has no committed offset or the
/// committed one is out of range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Earliest,
    #[default]
    Latest,
    Error,
}

/// Receiver configuration.
///
/// # Example
///
/// ```
/// use mom_receiver::{DispatchMode, ReceiverConfig};
///
/// let config = ReceiverConfig::new("orders")
///     .with_max_batch_size(10)
///     .with_dispatch_mode(DispatchMode::Concurrent)
///     .with_auto_acknowledge(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    // ---
    /// Identifier used in diagnostics.
    pub receiver_id: String,

    /// Broker endpoints or queue URLs, interpreted by the connector.
    pub endpoints: Vec<String>,

    /// Consumer group for log backends. Replay derives its isolated group
    /// from it.
    pub consumer_group: Option<String>,

    /// Topic used by replay.
    pub topic: Option<String>,

    /// Maximum messages per receive call, 1 to [`MAX_BATCH_SIZE`].
    pub max_batch_size: usize,

    /// Acknowledge every handled message once the handler returns, whatever
    /// its outcome. When `false` the handler resolves messages itself.
    pub auto_acknowledge: bool,

    pub dispatch_mode: DispatchMode,

    pub offset_reset: OffsetReset,

    /// Whether the log backend stores offsets automatically on consumption.
    pub auto_offset_store: bool,

    /// Hand batches to background tasks and track their completion instead
    /// of waiting for them inside the polling loop.
    pub async_completion: bool,

    /// Capacity of the completion queue. A full queue slows polling down.
    pub completion_capacity: usize,

    /// Long-poll wait a backend may use per receive call.
    pub receive_wait: Duration,

    /// How long replay waits for the next message before treating the topic
    /// as exhausted.
    pub replay_wait: Duration,

    /// Pause after a failed polling iteration.
    pub failure_backoff: Duration,

    /// Retry policy for the receive call.
    pub receive_retry: RetryConfig,

    /// Retry policy for acknowledge/reject.
    pub resolve_retry: RetryConfig,

    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        // ---
        Self {
            receiver_id: String::new(),
            endpoints: Vec::new(),
            consumer_group: None,
            topic: None,
            max_batch_size: MAX_BATCH_SIZE,
            auto_acknowledge: true,
            dispatch_mode: DispatchMode::Sequential,
            offset_reset: OffsetReset::Latest,
            auto_offset_store: true,
            async_completion: false,
            completion_capacity: 64,
            receive_wait: Duration::from_secs(20),
            replay_wait: Duration::from_secs(5),
            failure_backoff: Duration::from_secs(1),
            receive_retry: RetryConfig::default(),
            resolve_retry: RetryConfig::default(),
            event_capacity: 256,
        }
    }
}

impl ReceiverConfig {
    /// Defaults with the given receiver id.
    pub fn new(receiver_id: impl Into<String>) -> Self {
        // ---
        Self {
            receiver_id: receiver_id.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        // ---
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_auto_acknowledge(mut self, enabled: bool) -> Self {
        self.auto_acknowledge = enabled;
        self
    }

    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    pub fn with_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.offset_reset = reset;
        self
    }

    pub fn with_auto_offset_store(mut self, enabled: bool) -> Self {
        self.auto_offset_store = enabled;
        self
    }

    /// Enable asynchronous completion tracking with the given queue capacity.
    pub fn with_async_completion(mut self, capacity: usize) -> Self {
        self.async_completion = true;
        self.completion_capacity = capacity;
        self
    }

    pub fn with_receive_wait(mut self, wait: Duration) -> Self {
        self.receive_wait = wait;
        self
    }

    pub fn with_replay_wait(mut self, wait: Duration) -> Self {
        self.replay_wait = wait;
        self
    }

    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    pub fn with_receive_retry(mut self, retry: RetryConfig) -> Self {
        self.receive_retry = retry;
        self
    }

    pub fn with_resolve_retry(mut self, retry: RetryConfig) -> Self {
        self.resolve_retry = retry;
        self
    }

    /// Check ranges and required fields.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.receiver_id.trim().is_empty() {
            return Err(ReceiverError::MissingConfig("receiver_id".into()));
        }

        if !(1..=MAX_BATCH_SIZE).contains(&self.max_batch_size) {
            return Err(ReceiverError::InvalidConfig(format!(
                "max_batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.max_batch_size
            )));
        }

        if self.async_completion && self.completion_capacity == 0 {
            return Err(ReceiverError::InvalidConfig(
                "completion_capacity must be at least 1".into(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(ReceiverError::InvalidConfig(
                "event_capacity must be at least 1".into(),
            ));
        }

        for (name, retry) in [
            ("receive_retry", &self.receive_retry),
            ("resolve_retry", &self.resolve_retry),
        ] {
            if retry.max_attempts == 0 {
                return Err(ReceiverError::InvalidConfig(format!(
                    "{name}.max_attempts must be at least 1"
                )));
            }
        }

        if matches!(&self.consumer_group, Some(group) if group.trim().is_empty()) {
            return Err(ReceiverError::InvalidConfig(
                "consumer_group must not be blank".into(),
            ));
        }

        Ok(())
    }
}
