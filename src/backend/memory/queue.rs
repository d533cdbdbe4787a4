// src/backend/memory/queue.rs

//! In-memory queue backend.
//!
//! Queue-service semantics (receipt handles, visibility, redelivery on
//! reject) implemented with in-process data structures only.
//!
//! ## Semantics
//!
//! - A received message moves from *ready* to *in flight* and gets a fresh
//!   receipt handle; the same message received twice has two handles.
//! - `acknowledge` deletes an in-flight message; `reject` puts it back at the
//!   end of the ready queue.
//! - `receive_batch` waits up to the configured wait for a message to arrive,
//!   then returns an empty batch. Cancellation ends the wait early.
//! - A session opened through [`MemoryQueueConnector`] takes its wait from
//!   `ReceiverConfig::receive_wait` and shares the queue's contents.
//! - Every delivery carries a `receive-count` header.
//!
//! ## Non-Goals
//!
//! - Visibility timeouts (in-flight messages stay in flight until resolved)
//! - Persistence, network behavior or failure simulation

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{check_endpoints, lock_ignore_poison};
use crate::{
    // ---
    Backend,
    BackendConnector,
    BackendPtr,
    Batch,
    Headers,
    Payload,
    ReceiveOutcome,
    ReceivedMessage,
    ReceiverConfig,
    ReceiverError,
    ResolutionToken,
    Result,
    RoutingFilter,
};

const DEFAULT_RECEIVE_WAIT: Duration = Duration::from_millis(50);

struct Stored {
    // ---
    payload: Payload,
    headers: Headers,
    receive_count: u32,
}

#[derive(Default)]
struct QueueState {
    // ---
    ready: VecDeque<Stored>,
    in_flight: HashMap<ResolutionToken, Stored>,
    acknowledged: usize,
    rejected: usize,
    closed: bool,
    filter: Option<RoutingFilter>,
}

/// In-memory queue.
///
/// Constructed behind an `Arc` so tests can keep a handle for sending and
/// inspection while the receiver owns its own clone as the backend.
pub struct MemoryQueue {
    // ---
    queue_id: String,
    receive_wait: Duration,
    state: Mutex<QueueState>,
    arrived: Notify,
}

impl MemoryQueue {
    // ---
    pub fn new(queue_id: impl Into<String>) -> Arc<Self> {
        Self::with_receive_wait(queue_id, DEFAULT_RECEIVE_WAIT)
    }

    pub fn with_receive_wait(queue_id: impl Into<String>, receive_wait: Duration) -> Arc<Self> {
        // ---
        Arc::new(Self {
            queue_id: queue_id.into(),
            receive_wait,
            state: Mutex::new(QueueState::default()),
            arrived: Notify::new(),
        })
    }

    /// Connector whose sessions wait `ReceiverConfig::receive_wait` per
    /// receive call instead of this queue's own default.
    pub fn connector(self: &Arc<Self>) -> MemoryQueueConnector {
        MemoryQueueConnector {
            queue: Arc::clone(self),
        }
    }

    /// Enqueue a message.
    pub fn send(&self, payload: impl Into<Payload>, headers: Headers) {
        // ---
        lock_ignore_poison(&self.state).ready.push_back(Stored {
            payload: payload.into(),
            headers,
            receive_count: 0,
        });
        self.arrived.notify_waiters();
    }

    /// Take up to `max_messages` ready messages without waiting.
    pub fn receive_now(&self, max_messages: usize) -> ReceiveOutcome {
        ReceiveOutcome::Batch(self.take(max_messages))
    }

    pub fn pending_len(&self) -> usize {
        lock_ignore_poison(&self.state).ready.len()
    }

    pub fn in_flight_len(&self) -> usize {
        lock_ignore_poison(&self.state).in_flight.len()
    }

    pub fn acknowledged_count(&self) -> usize {
        lock_ignore_poison(&self.state).acknowledged
    }

    pub fn rejected_count(&self) -> usize {
        lock_ignore_poison(&self.state).rejected
    }

    pub fn is_closed(&self) -> bool {
        lock_ignore_poison(&self.state).closed
    }

    /// Filter passed to the last `subscribe` call.
    pub fn filter(&self) -> Option<RoutingFilter> {
        lock_ignore_poison(&self.state).filter.clone()
    }

    async fn receive_within(
        &self,
        max_messages: usize,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome> {
        // ---
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before looking, so a send in between is not missed.
            let arrived = self.arrived.notified();

            if self.is_closed() {
                return Err(ReceiverError::Backend(format!("{}: queue closed", self.queue_id)));
            }

            let batch = self.take(max_messages);
            if !batch.is_empty() {
                return Ok(ReceiveOutcome::Batch(batch));
            }

            tokio::select! {
                _ = arrived => continue,
                _ = sleep_until(deadline) => return Ok(ReceiveOutcome::Batch(Vec::new())),
                _ = cancel.cancelled() => return Ok(ReceiveOutcome::Batch(Vec::new())),
            }
        }
    }

    fn take(&self, max_messages: usize) -> Batch {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let count = max_messages.min(state.ready.len());
        let mut batch = Vec::with_capacity(count);

        for _ in 0..count {
            let Some(mut stored) = state.ready.pop_front() else {
                break;
            };
            stored.receive_count += 1;

            let token = ResolutionToken::from(format!("{}:{}", self.queue_id, Uuid::new_v4()));
            let mut headers = stored.headers.clone();
            headers.insert("receive-count", stored.receive_count.to_string());

            batch.push(ReceivedMessage::new(
                stored.payload.clone(),
                headers,
                token.clone(),
            ));
            state.in_flight.insert(token, stored);
        }

        batch
    }
}

#[async_trait::async_trait]
impl Backend for MemoryQueue {
    // ---
    fn backend_id(&self) -> &str {
        &self.queue_id
    }

    async fn subscribe(&self, filter: Option<&RoutingFilter>) -> Result<()> {
        // ---
        lock_ignore_poison(&self.state).filter = filter.cloned();
        Ok(())
    }

    async fn receive_batch(
        &self,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome> {
        self.receive_within(max_messages, self.receive_wait, cancel).await
    }

    async fn acknowledge(&self, token: &ResolutionToken) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        match state.in_flight.remove(token) {
            Some(_) => {
                state.acknowledged += 1;
                Ok(())
            }
            None => Err(ReceiverError::UnknownToken(token.to_string())),
        }
    }

    async fn reject(&self, token: &ResolutionToken) -> Result<()> {
        // ---
        {
            let mut state = lock_ignore_poison(&self.state);
            let stored = state
                .in_flight
                .remove(token)
                .ok_or_else(|| ReceiverError::UnknownToken(token.to_string()))?;
            state.rejected += 1;
            state.ready.push_back(stored);
        }
        self.arrived.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        lock_ignore_poison(&self.state).closed = true;
        self.arrived.notify_waiters();
        Ok(())
    }
}

/// Opens [`MemoryQueue`] sessions configured from a [`ReceiverConfig`].
pub struct MemoryQueueConnector {
    // ---
    queue: Arc<MemoryQueue>,
}

#[async_trait::async_trait]
impl BackendConnector for MemoryQueueConnector {
    // ---
    async fn connect(&self, config: &ReceiverConfig) -> Result<BackendPtr> {
        // ---
        check_endpoints(&config.endpoints)?;
        crate::log_debug!(
            receiver = config.receiver_id;
            "queue session on {}, receive wait {:?}",
            self.queue.queue_id,
            config.receive_wait
        );

        Ok(Arc::new(QueueSession {
            queue: Arc::clone(&self.queue),
            receive_wait: config.receive_wait,
        }))
    }
}

/// A receiver's view of a shared queue with its own long-poll wait.
struct QueueSession {
    // ---
    queue: Arc<MemoryQueue>,
    receive_wait: Duration,
}

#[async_trait::async_trait]
impl Backend for QueueSession {
    // ---
    fn backend_id(&self) -> &str {
        self.queue.backend_id()
    }

    async fn subscribe(&self, filter: Option<&RoutingFilter>) -> Result<()> {
        self.queue.subscribe(filter).await
    }

    async fn receive_batch(
        &self,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome> {
        self.queue
            .receive_within(max_messages, self.receive_wait, cancel)
            .await
    }

    async fn acknowledge(&self, token: &ResolutionToken) -> Result<()> {
        self.queue.acknowledge(token).await
    }

    async fn reject(&self, token: &ResolutionToken) -> Result<()> {
        self.queue.reject(token).await
    }

    async fn close(&self) -> Result<()> {
        self.queue.close().await
    }
}
