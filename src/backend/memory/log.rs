// src/backend/memory/log.rs

//! In-memory partitioned log.
//!
//! A single topic split into partitions, each an append-only vector of
//! timestamped records. It implements [`LogConnector`] so the replay engine
//! can be exercised without a broker.
//!
//! Replay sessions read their assigned partitions round-robin, one record per
//! `consume` call, and never commit anything. Records are expected to be
//! appended in timestamp order within a partition (log-append time).
//!
//! The log also keeps committed offsets per consumer group, written by the
//! live consumers opened through [`MemoryLog::connector`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::consumer::MemoryLogConnector;
use super::lock_ignore_poison;
use crate::{
    // ---
    Headers,
    LogConnector,
    LogSession,
    PartitionId,
    PartitionOffset,
    Payload,
    ReceivedMessage,
    ReceiverError,
    Result,
};

#[derive(Clone)]
pub(super) struct LogRecord {
    // ---
    payload: Payload,
    headers: Headers,
    timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Message for the record at `partition`, resolved through `token`.
    pub(super) fn into_message(self, partition: PartitionId, token: String) -> ReceivedMessage {
        // ---
        ReceivedMessage::new(self.payload, self.headers, token.into())
            .with_partition(partition)
            .with_timestamp(self.timestamp)
    }
}

/// In-memory log topic.
pub struct MemoryLog {
    // ---
    topic: String,
    partitions: Mutex<Vec<Vec<LogRecord>>>,
    groups: Mutex<Vec<String>>,
    committed: Mutex<HashMap<(String, PartitionId), i64>>,
    appended: Notify,
}

impl MemoryLog {
    // ---
    pub fn new(topic: impl Into<String>, partition_count: usize) -> Arc<Self> {
        // ---
        Arc::new(Self {
            topic: topic.into(),
            partitions: Mutex::new(vec![Vec::new(); partition_count]),
            groups: Mutex::new(Vec::new()),
            committed: Mutex::new(HashMap::new()),
            appended: Notify::new(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Append a record and return its offset.
    pub fn append(
        &self,
        partition: PartitionId,
        payload: impl Into<Payload>,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        // ---
        let offset = {
            let mut partitions = lock_ignore_poison(&self.partitions);
            let log = usize::try_from(partition.0)
                .ok()
                .and_then(|idx| partitions.get_mut(idx))
                .ok_or_else(|| ReceiverError::Backend(format!("unknown partition {partition}")))?;

            log.push(LogRecord {
                payload: payload.into(),
                headers: Headers::new(),
                timestamp,
            });
            (log.len() - 1) as i64
        };
        self.appended.notify_waiters();
        Ok(offset)
    }

    /// Connector for live consumers that read the receiver's consumer group,
    /// offset reset policy, offset store mode and receive wait.
    pub fn connector(self: &Arc<Self>) -> MemoryLogConnector {
        MemoryLogConnector::new(Arc::clone(self))
    }

    /// Next offset `group` will read from `partition`, if it ever committed.
    pub fn committed_offset(&self, group: &str, partition: PartitionId) -> Option<i64> {
        // ---
        lock_ignore_poison(&self.committed)
            .get(&(group.to_string(), partition))
            .copied()
    }

    /// Overwrite the committed offset of `group` on `partition`.
    ///
    /// The offset is not checked against the partition, so an administrator
    /// (or a test) can leave a group pointing past the end of the log.
    pub fn commit_offset(&self, group: &str, partition: PartitionId, offset: i64) {
        // ---
        lock_ignore_poison(&self.committed).insert((group.to_string(), partition), offset);
    }

    /// Consumer groups of every replay session opened so far.
    pub fn opened_groups(&self) -> Vec<String> {
        lock_ignore_poison(&self.groups).clone()
    }

    pub(super) fn partition_count(&self) -> usize {
        lock_ignore_poison(&self.partitions).len()
    }

    /// Offset the next append to `partition` will get.
    pub(super) fn end_offset(&self, partition: PartitionId) -> i64 {
        // ---
        let partitions = lock_ignore_poison(&self.partitions);
        usize::try_from(partition.0)
            .ok()
            .and_then(|idx| partitions.get(idx))
            .map_or(0, |log| log.len() as i64)
    }

    pub(super) fn appended(&self) -> &Notify {
        &self.appended
    }

    pub(super) fn check_topic(&self, topic: &str) -> Result<()> {
        // ---
        if topic == self.topic {
            Ok(())
        } else {
            Err(ReceiverError::Backend(format!("unknown topic: {topic}")))
        }
    }

    pub(super) fn record(&self, partition: PartitionId, offset: i64) -> Option<LogRecord> {
        // ---
        let partitions = lock_ignore_poison(&self.partitions);
        let log = partitions.get(usize::try_from(partition.0).ok()?)?;
        log.get(usize::try_from(offset).ok()?).cloned()
    }
}

#[async_trait::async_trait]
impl LogConnector for Arc<MemoryLog> {
    // ---
    async fn connect_isolated(&self, consumer_group: &str) -> Result<Arc<dyn LogSession>> {
        // ---
        lock_ignore_poison(&self.groups).push(consumer_group.to_string());

        Ok(Arc::new(MemoryLogSession {
            log: Arc::clone(self),
            cursors: Mutex::new(Vec::new()),
            next: Mutex::new(0),
        }))
    }
}

struct Cursor {
    partition: PartitionId,
    next_offset: i64,
}

/// One reader over an assigned set of partitions.
struct MemoryLogSession {
    // ---
    log: Arc<MemoryLog>,
    cursors: Mutex<Vec<Cursor>>,
    next: Mutex<usize>,
}

impl MemoryLogSession {
    /// Next record round-robin across assigned partitions, if any is ready.
    fn poll(&self) -> Option<ReceivedMessage> {
        // ---
        let mut cursors = lock_ignore_poison(&self.cursors);
        let mut next = lock_ignore_poison(&self.next);
        let count = cursors.len();

        for step in 0..count {
            let idx = (*next + step) % count;
            let cursor = &mut cursors[idx];

            if let Some(record) = self.log.record(cursor.partition, cursor.next_offset) {
                let token = format!(
                    "{}:{}:{}",
                    self.log.topic, cursor.partition, cursor.next_offset
                );
                cursor.next_offset += 1;
                *next = (idx + 1) % count;

                return Some(record.into_message(cursor.partition, token));
            }
        }

        None
    }
}

#[async_trait::async_trait]
impl LogSession for MemoryLogSession {
    // ---
    async fn partitions(&self, topic: &str) -> Result<Vec<PartitionId>> {
        // ---
        self.log.check_topic(topic)?;
        let count = self.log.partition_count();
        Ok((0..count as i32).map(PartitionId).collect())
    }

    async fn offsets_for_time(
        &self,
        topic: &str,
        partitions: &[PartitionId],
        at: DateTime<Utc>,
    ) -> Result<Vec<PartitionOffset>> {
        // ---
        self.log.check_topic(topic)?;
        let logs = lock_ignore_poison(&self.log.partitions);

        partitions
            .iter()
            .map(|&partition| -> Result<PartitionOffset> {
                let log = usize::try_from(partition.0)
                    .ok()
                    .and_then(|idx| logs.get(idx))
                    .ok_or_else(|| ReceiverError::Backend(format!("unknown partition {partition}")))?;

                let offset = log
                    .iter()
                    .position(|record| record.timestamp >= at)
                    .map(|idx| idx as i64);

                Ok(PartitionOffset { partition, offset })
            })
            .collect()
    }

    async fn assign(&self, topic: &str, positions: &[PartitionOffset]) -> Result<()> {
        // ---
        self.log.check_topic(topic)?;

        let cursors = positions
            .iter()
            .filter_map(|position| {
                position.offset.map(|next_offset| Cursor {
                    partition: position.partition,
                    next_offset,
                })
            })
            .collect();

        *lock_ignore_poison(&self.cursors) = cursors;
        *lock_ignore_poison(&self.next) = 0;
        Ok(())
    }

    async fn consume(
        &self,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<ReceivedMessage>> {
        // ---
        let deadline = Instant::now() + wait;

        loop {
            let appended = self.log.appended.notified();

            if let Some(message) = self.poll() {
                return Ok(Some(message));
            }

            tokio::select! {
                _ = appended => continue,
                _ = sleep_until(deadline) => return Ok(None),
                _ = cancel.cancelled() => return Err(ReceiverError::Stopped),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        // ---
        lock_ignore_poison(&self.cursors).clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn offsets_for_time_finds_first_at_or_after() {
        // ---
        let log = MemoryLog::new("audit", 2);
        log.append(PartitionId(0), "a", at(1)).unwrap();
        log.append(PartitionId(0), "b", at(5)).unwrap();
        log.append(PartitionId(1), "c", at(2)).unwrap();

        let session = log.connect_isolated("g").await.unwrap();
        let offsets = session
            .offsets_for_time("audit", &[PartitionId(0), PartitionId(1)], at(3))
            .await
            .unwrap();

        assert_eq!(
            offsets,
            vec![
                PartitionOffset { partition: PartitionId(0), offset: Some(1) },
                PartitionOffset { partition: PartitionId(1), offset: None },
            ]
        );
    }

    #[tokio::test]
    async fn consume_round_robins_assigned_partitions() {
        // ---
        let log = MemoryLog::new("audit", 2);
        log.append(PartitionId(0), "p0-a", at(1)).unwrap();
        log.append(PartitionId(0), "p0-b", at(2)).unwrap();
        log.append(PartitionId(1), "p1-a", at(1)).unwrap();

        let session = log.connect_isolated("g").await.unwrap();
        session
            .assign(
                "audit",
                &[
                    PartitionOffset { partition: PartitionId(0), offset: Some(0) },
                    PartitionOffset { partition: PartitionId(1), offset: Some(0) },
                ],
            )
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let mut bodies = Vec::new();
        while let Some(message) = session
            .consume(Duration::from_millis(10), &cancel)
            .await
            .unwrap()
        {
            bodies.push(message.payload().as_text().unwrap_or_default().to_string());
        }

        assert_eq!(bodies, vec!["p0-a", "p1-a", "p0-b"]);
    }

    #[tokio::test]
    async fn replay_sessions_leave_committed_offsets_alone() {
        // ---
        let log = MemoryLog::new("audit", 1);
        log.append(PartitionId(0), "a", at(1)).unwrap();
        log.commit_offset("live", PartitionId(0), 1);

        let session = log.connect_isolated("live-replay-1").await.unwrap();
        session
            .assign(
                "audit",
                &[PartitionOffset { partition: PartitionId(0), offset: Some(0) }],
            )
            .await
            .unwrap();
        let consumed = session
            .consume(Duration::from_millis(10), &CancellationToken::new())
            .await
            .unwrap();

        assert!(consumed.is_some());
        assert_eq!(log.committed_offset("live", PartitionId(0)), Some(1));
        assert_eq!(log.committed_offset("live-replay-1", PartitionId(0)), None);
        assert_eq!(log.end_offset(PartitionId(0)), 1);
    }

    #[tokio::test]
    async fn unknown_topic_is_an_error() {
        // ---
        let log = MemoryLog::new("audit", 1);
        let session = log.connect_isolated("g").await.unwrap();
        assert!(session.partitions("billing").await.is_err());
        assert_eq!(log.opened_groups(), vec!["g".to_string()]);
    }
}
