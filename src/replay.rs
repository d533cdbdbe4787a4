//! Time-bounded replay over a log-structured backend.
//!
//! Replay re-reads every partition of a topic from the first message at or
//! after `start` up to `end`, through its own session under a throwaway
//! consumer group, so the live group's committed offsets are never touched.
//! Nothing is acknowledged or committed.
//!
//! Each partition finishes independently the first time it yields a message
//! newer than `end`; that message is not delivered. The run ends when every
//! assigned partition has finished, or when the backend has nothing more to
//! give within the configured wait.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::receiver::Notifier;
use crate::{
    // ---
    DiagnosticKind,
    LogConnector,
    LogSession,
    PartitionId,
    PartitionOffset,
    ReceivedMessage,
    ReceiverError,
    ReceiverEvent,
    ReplayCallback,
    Result,
};

/// Inclusive time range to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ReplayWindow {
    /// Build a window; `end` defaults to now.
    ///
    /// Fails with [`ReceiverError::InvalidReplayWindow`] when `end` is before
    /// `start`.
    pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<Self> {
        // ---
        let end = end.unwrap_or_else(Utc::now);

        if end < start {
            return Err(ReceiverError::InvalidReplayWindow(format!(
                "end {end} is before start {start}"
            )));
        }

        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Summary of one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Messages handed to the callback (or published as events).
    pub delivered: usize,

    /// Messages consumed but not delivered.
    pub skipped: usize,

    /// `true` if the run ended because the backend ran dry before every
    /// partition reached the end of the window.
    pub exhausted: bool,
}

pub(crate) struct ReplayEngine {
    // ---
    pub(crate) source: Arc<dyn LogConnector>,
    pub(crate) topic: String,
    pub(crate) consumer_group: String,
    pub(crate) wait: Duration,
    pub(crate) notifier: Notifier,
    pub(crate) cancel: CancellationToken,
}

impl ReplayEngine {
    // ---
    pub(crate) async fn run(
        self,
        window: ReplayWindow,
        callback: Option<ReplayCallback>,
    ) -> Result<ReplayReport> {
        // ---
        let replay_group = format!("{}-replay-{}", self.consumer_group, Uuid::new_v4());
        crate::log_info!(
            "{}: replaying {} from {} to {} as {replay_group}",
            self.notifier.receiver_id(),
            self.topic,
            window.start(),
            window.end()
        );

        let session = self.source.connect_isolated(&replay_group).await?;
        let result = self.scan(session.as_ref(), &window, callback.as_ref()).await;

        if let Err(err) = session.close().await {
            crate::log_warn!("{replay_group}: closing replay session failed: {err}");
        }

        match &result {
            Ok(report) => crate::log_info!(
                "{replay_group}: finished, {} delivered, {} skipped",
                report.delivered,
                report.skipped
            ),
            Err(err) => crate::log_warn!("{replay_group}: ended early: {err}"),
        }

        result
    }

    async fn scan(
        &self,
        session: &dyn LogSession,
        window: &ReplayWindow,
        callback: Option<&ReplayCallback>,
    ) -> Result<ReplayReport> {
        // ---
        let partitions = session.partitions(&self.topic).await?;
        let positions = session
            .offsets_for_time(&self.topic, &partitions, window.start())
            .await?;

        // Partitions with nothing at or after `start` are done before they begin.
        let assigned: Vec<PartitionOffset> = positions
            .into_iter()
            .filter(|position| position.offset.is_some())
            .collect();

        let mut report = ReplayReport::default();
        if assigned.is_empty() {
            return Ok(report);
        }

        session.assign(&self.topic, &assigned).await?;
        let mut open: HashSet<PartitionId> = assigned.iter().map(|p| p.partition).collect();

        while !open.is_empty() {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ReceiverError::Stopped),
                next = session.consume(self.wait, &self.cancel) => next?,
            };

            let Some(message) = next else {
                report.exhausted = true;
                break;
            };

            let Some(partition) = message.partition() else {
                crate::log_warn!(
                    "{}: replayed message {} has no partition, skipped",
                    self.notifier.receiver_id(),
                    message.token()
                );
                report.skipped += 1;
                continue;
            };

            if !open.contains(&partition) {
                report.skipped += 1;
                continue;
            }

            match message.timestamp() {
                Some(at) if at > window.end() => {
                    crate::log_debug!(
                        "{}: partition {partition} reached the end of the window",
                        self.notifier.receiver_id()
                    );
                    open.remove(&partition);
                    report.skipped += 1;
                    continue;
                }
                Some(at) if !window.contains(at) => {
                    report.skipped += 1;
                    continue;
                }
                _ => {}
            }

            self.deliver(message, callback).await;
            report.delivered += 1;
        }

        Ok(report)
    }

    async fn deliver(&self, message: ReceivedMessage, callback: Option<&ReplayCallback>) {
        // ---
        let Some(callback) = callback else {
            self.notifier.emit(ReceiverEvent::MessageReceived(message));
            return;
        };

        let token = message.token().clone();
        let outcome = AssertUnwindSafe(callback(message)).catch_unwind().await;

        let detail = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{token}: {err}"),
            Err(_) => format!("{token}: callback panicked"),
        };

        // Replay carries on past a failing callback.
        self.notifier
            .diagnostic(DiagnosticKind::ReplayCallbackFailed, detail);
    }
}
