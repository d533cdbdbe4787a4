// src/backend/memory/consumer.rs

//! Live consumer over a [`MemoryLog`].
//!
//! The log-style counterpart of the queue backend: a consumer-group member
//! that reads every partition of the log's topic and tracks its progress as
//! committed offsets kept by the log.
//!
//! ## Semantics
//!
//! - `subscribe` positions each partition at the group's committed offset.
//!   Without one, or when it lies past the end of the partition, the
//!   configured [`OffsetReset`] decides: `earliest` starts at offset 0,
//!   `latest` at the current end, `error` fails with
//!   [`ReceiverError::OffsetOutOfRange`].
//! - `receive_batch` reads partitions round-robin, waiting up to the
//!   configured receive wait for an append.
//! - With `auto_offset_store` the offset is committed as soon as a record is
//!   received; otherwise `acknowledge` commits it. Commits never move a
//!   group's offset backwards.
//! - `reject` seeks the partition back to the rejected record, so it and
//!   every later record of that partition are delivered again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::log::MemoryLog;
use super::{check_endpoints, lock_ignore_poison};
use crate::{
    // ---
    Backend,
    BackendConnector,
    BackendPtr,
    Batch,
    OffsetReset,
    PartitionId,
    ReceiveOutcome,
    ReceiverConfig,
    ReceiverError,
    ResolutionToken,
    Result,
    RoutingFilter,
};

/// Opens live [`MemoryLog`] consumers configured from a [`ReceiverConfig`].
///
/// Requires `consumer_group`. When `topic` is set it must name the log's
/// topic.
pub struct MemoryLogConnector {
    // ---
    log: Arc<MemoryLog>,
}

impl MemoryLogConnector {
    pub(super) fn new(log: Arc<MemoryLog>) -> Self {
        Self { log }
    }
}

#[async_trait::async_trait]
impl BackendConnector for MemoryLogConnector {
    // ---
    async fn connect(&self, config: &ReceiverConfig) -> Result<BackendPtr> {
        // ---
        check_endpoints(&config.endpoints)?;

        let group = config
            .consumer_group
            .clone()
            .ok_or_else(|| ReceiverError::MissingConfig("consumer_group".into()))?;

        if let Some(topic) = config.topic.as_deref() {
            if topic != self.log.topic() {
                return Err(ReceiverError::InvalidConfig(format!(
                    "topic {topic} is not served by log {}",
                    self.log.topic()
                )));
            }
        }

        crate::log_debug!(
            receiver = config.receiver_id;
            "log consumer for group {group} on {}, reset {:?}, auto offset store {}",
            self.log.topic(),
            config.offset_reset,
            config.auto_offset_store
        );

        Ok(Arc::new(MemoryLogConsumer {
            log: Arc::clone(&self.log),
            group,
            offset_reset: config.offset_reset,
            auto_offset_store: config.auto_offset_store,
            receive_wait: config.receive_wait,
            state: Mutex::new(ConsumerState::default()),
        }))
    }
}

#[derive(Clone, Copy)]
struct Position {
    partition: PartitionId,
    next_offset: i64,
}

#[derive(Default)]
struct ConsumerState {
    // ---
    positions: Vec<Position>,
    next: usize,
    in_flight: HashMap<ResolutionToken, (PartitionId, i64)>,
    closed: bool,
}

struct MemoryLogConsumer {
    // ---
    log: Arc<MemoryLog>,
    group: String,
    offset_reset: OffsetReset,
    auto_offset_store: bool,
    receive_wait: Duration,
    state: Mutex<ConsumerState>,
}

impl MemoryLogConsumer {
    /// Where `partition` starts for this group.
    fn start_offset(&self, partition: PartitionId) -> Result<i64> {
        // ---
        let end = self.log.end_offset(partition);
        let committed = self.log.committed_offset(&self.group, partition);

        match (committed, self.offset_reset) {
            (Some(offset), _) if (0..=end).contains(&offset) => Ok(offset),
            (_, OffsetReset::Earliest) => Ok(0),
            (_, OffsetReset::Latest) => Ok(end),
            (Some(offset), OffsetReset::Error) => Err(ReceiverError::OffsetOutOfRange(format!(
                "{}: partition {partition} offset {offset} outside 0..={end}",
                self.group
            ))),
            (None, OffsetReset::Error) => Err(ReceiverError::OffsetOutOfRange(format!(
                "{}: no committed offset for partition {partition}",
                self.group
            ))),
        }
    }

    /// Store `next_offset` for the group unless it already went further.
    fn commit(&self, partition: PartitionId, next_offset: i64) {
        // ---
        let current = self.log.committed_offset(&self.group, partition);
        if current.map_or(true, |offset| offset < next_offset) {
            self.log.commit_offset(&self.group, partition, next_offset);
        }
    }

    fn take(&self, max_messages: usize) -> Batch {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let count = state.positions.len();
        let mut batch = Vec::new();
        let mut idle = 0;

        while batch.len() < max_messages && idle < count {
            let idx = state.next % count;
            state.next = (idx + 1) % count;
            let Position { partition, next_offset } = state.positions[idx];

            let Some(record) = self.log.record(partition, next_offset) else {
                idle += 1;
                continue;
            };
            idle = 0;
            state.positions[idx].next_offset += 1;

            let token = format!("{}:{}:{partition}:{next_offset}", self.group, self.log.topic());
            state
                .in_flight
                .insert(ResolutionToken::from(token.as_str()), (partition, next_offset));
            if self.auto_offset_store {
                self.commit(partition, next_offset + 1);
            }

            batch.push(record.into_message(partition, token));
        }

        batch
    }
}

#[async_trait::async_trait]
impl Backend for MemoryLogConsumer {
    // ---
    fn backend_id(&self) -> &str {
        &self.group
    }

    async fn subscribe(&self, filter: Option<&RoutingFilter>) -> Result<()> {
        // ---
        let topic = self.log.topic();
        if let Some(filter) = filter {
            if !filter.routes().any(|route| route == topic) {
                return Err(ReceiverError::InvalidConfig(format!(
                    "{}: routing filter does not name topic {topic}",
                    self.group
                )));
            }
        }

        let positions = (0..self.log.partition_count() as i32)
            .map(PartitionId)
            .map(|partition| -> Result<Position> {
                Ok(Position {
                    partition,
                    next_offset: self.start_offset(partition)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut state = lock_ignore_poison(&self.state);
        state.positions = positions;
        state.next = 0;
        state.in_flight.clear();
        Ok(())
    }

    async fn receive_batch(
        &self,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome> {
        // ---
        let deadline = Instant::now() + self.receive_wait;

        loop {
            let appended = self.log.appended().notified();

            if lock_ignore_poison(&self.state).closed {
                return Err(ReceiverError::Backend(format!("{}: consumer closed", self.group)));
            }

            let batch = self.take(max_messages);
            if !batch.is_empty() {
                return Ok(ReceiveOutcome::Batch(batch));
            }

            tokio::select! {
                _ = appended => continue,
                _ = sleep_until(deadline) => return Ok(ReceiveOutcome::Batch(Vec::new())),
                _ = cancel.cancelled() => return Ok(ReceiveOutcome::Batch(Vec::new())),
            }
        }
    }

    async fn acknowledge(&self, token: &ResolutionToken) -> Result<()> {
        // ---
        let (partition, offset) = lock_ignore_poison(&self.state)
            .in_flight
            .remove(token)
            .ok_or_else(|| ReceiverError::UnknownToken(token.to_string()))?;

        if !self.auto_offset_store {
            self.commit(partition, offset + 1);
        }
        Ok(())
    }

    async fn reject(&self, token: &ResolutionToken) -> Result<()> {
        // ---
        {
            let mut state = lock_ignore_poison(&self.state);
            let (partition, offset) = state
                .in_flight
                .remove(token)
                .ok_or_else(|| ReceiverError::UnknownToken(token.to_string()))?;

            if let Some(position) = state
                .positions
                .iter_mut()
                .find(|position| position.partition == partition)
            {
                position.next_offset = position.next_offset.min(offset);
            }
        }
        self.log.appended().notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        {
            let mut state = lock_ignore_poison(&self.state);
            state.closed = true;
            state.positions.clear();
            state.in_flight.clear();
        }
        self.log.appended().notify_waiters();
        Ok(())
    }
}
