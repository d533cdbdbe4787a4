//! The receiver engine.
//!
//! A [`Receiver`] owns one backend session, one polling task and, when
//! asynchronous completion is enabled, one completion drain task. It is built
//! by [`ReceiverBuilder`](crate::ReceiverBuilder) without any I/O; the backend
//! is connected on the first [`start`](Receiver::start).
//!
//! Stop order matters: cancel, join the polling loop, drain every in-flight
//! operation, and only then release the backend. Dropping a running receiver
//! cancels its tasks but cannot wait for them, so prefer calling
//! [`stop`](Receiver::stop).
//!
//! Replays run outside that lifecycle. Stopping (or dropping) cancels the
//! replays running at that moment; a replay started afterwards is unaffected.

mod ack;
mod completion;
mod connection;
mod dispatch;
mod events;
mod polling;

pub use ack::{Resolution, Resolver};
pub use connection::ConnectionState;
pub use events::{Diagnostic, DiagnosticKind, ReceiverEvent};

pub(crate) use events::Notifier;

use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::replay::{ReplayEngine, ReplayReport, ReplayWindow};
use crate::{
    // ---
    BackendConnector,
    BackendPtr,
    HandlerPtr,
    LogConnector,
    ReceiverConfig,
    ReceiverError,
    ReplayCallback,
    Result,
    RoutingFilter,
};

use completion::CompletionTracker;
use connection::ConnectionTracker;
use dispatch::Dispatcher;
use polling::PollingLoop;

enum Lifecycle {
    // ---
    Idle,
    Running {
        polling: JoinHandle<()>,
        completion: Option<CompletionTracker>,
    },
    Stopped,
}

/// Backend-agnostic message receiver.
pub struct Receiver {
    // ---
    config: ReceiverConfig,
    connector: Arc<dyn BackendConnector>,
    handler: HandlerPtr,
    replay_source: Option<Arc<dyn LogConnector>>,

    backend: OnceCell<BackendPtr>,
    tracker: Arc<ConnectionTracker>,
    notifier: Notifier,
    stop: CancellationToken,
    replays: std::sync::Mutex<CancellationToken>,
    lifecycle: Mutex<Lifecycle>,
}

impl Receiver {
    // ---
    pub(crate) fn new(
        config: ReceiverConfig,
        connector: Arc<dyn BackendConnector>,
        handler: HandlerPtr,
        replay_source: Option<Arc<dyn LogConnector>>,
    ) -> Self {
        // ---
        let notifier = Notifier::new(config.receiver_id.as_str(), config.event_capacity);

        Self {
            config,
            connector,
            handler,
            replay_source,
            backend: OnceCell::new(),
            tracker: Arc::new(ConnectionTracker::new()),
            notifier,
            stop: CancellationToken::new(),
            replays: std::sync::Mutex::new(CancellationToken::new()),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    pub fn receiver_id(&self) -> &str {
        &self.config.receiver_id
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Subscribe to receiver events.
    ///
    /// Subscribers only see events published after they subscribed; a slow
    /// subscriber that falls more than `event_capacity` events behind gets a
    /// `Lagged` error from the channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ReceiverEvent> {
        self.notifier.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.tracker.state()
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock().await, Lifecycle::Running { .. })
    }

    /// Connect (first time only), subscribe and start polling.
    ///
    /// Does nothing unless the receiver is idle. On failure the receiver
    /// stays idle and `start` may be called again.
    pub async fn start(&self, filter: Option<RoutingFilter>) -> Result<()> {
        // ---
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Idle) {
            crate::log_debug!(receiver = self.receiver_id(); "start ignored, not idle");
            return Ok(());
        }

        let completion = self.config.async_completion.then(|| {
            CompletionTracker::start(self.config.completion_capacity, self.notifier.clone())
        });

        let backend = match self.connect_and_subscribe(filter.as_ref()).await {
            Ok(backend) => backend,
            Err(err) => {
                crate::log_error!(receiver = self.receiver_id(); "start failed: {err}");
                if let Some(completion) = completion {
                    completion.close().await;
                }
                return Err(err);
            }
        };

        let dispatcher = Arc::new(Dispatcher::new(
            backend.clone(),
            self.handler.clone(),
            self.config.dispatch_mode,
            self.config.auto_acknowledge,
            self.config.resolve_retry.clone(),
            self.notifier.clone(),
            self.stop.clone(),
        ));

        let polling = PollingLoop {
            backend,
            dispatcher,
            notifier: self.notifier.clone(),
            tracker: self.tracker.clone(),
            max_batch_size: self.config.max_batch_size,
            receive_retry: self.config.receive_retry.clone(),
            failure_backoff: self.config.failure_backoff,
            completion: completion.as_ref().map(CompletionTracker::sender),
            stop: self.stop.clone(),
        };

        *lifecycle = Lifecycle::Running {
            polling: tokio::spawn(polling.run()),
            completion,
        };
        Ok(())
    }

    async fn connect_and_subscribe(&self, filter: Option<&RoutingFilter>) -> Result<BackendPtr> {
        // ---
        let backend = self
            .backend
            .get_or_try_init(|| async {
                crate::log_info!(receiver = self.receiver_id(); "connecting backend");
                self.connector.connect(&self.config).await
            })
            .await?
            .clone();

        backend.subscribe(filter).await?;
        Ok(backend)
    }

    /// Stop polling, drain in-flight work and release the backend.
    ///
    /// Idempotent. Stopping a receiver that never started touches no backend.
    pub async fn stop(&self) -> Result<()> {
        // ---
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop.cancel();
        self.cancel_replays();

        let (polling, completion) =
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running {
                    polling,
                    completion,
                } => (polling, completion),
                Lifecycle::Idle | Lifecycle::Stopped => return Ok(()),
            };

        crate::log_info!(receiver = self.receiver_id(); "stopping");

        if let Err(err) = polling.await {
            crate::log_error!(receiver = self.receiver_id(); "polling task failed: {err}");
        }

        // The polling loop held the last producer handle, so this drains
        // everything it submitted.
        if let Some(completion) = completion {
            completion.close().await;
        }

        if let Some(backend) = self.backend.get() {
            backend.close().await?;
        }

        crate::log_info!(receiver = self.receiver_id(); "stopped");
        Ok(())
    }

    /// Re-read the time window `[start, end]` of the configured topic.
    ///
    /// `end` defaults to now. Each message inside the window goes to
    /// `callback`, awaited in turn; without a callback it is published as
    /// [`ReceiverEvent::MessageReceived`]. Independent of start and stop:
    /// a replay works on a stopped receiver, and `stop` only cancels replays
    /// already in progress, which then return [`ReceiverError::Stopped`].
    pub async fn replay(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        callback: Option<ReplayCallback>,
    ) -> Result<ReplayReport> {
        // ---
        let window = ReplayWindow::new(start, end)?;

        let source = self.replay_source.clone().ok_or_else(|| {
            ReceiverError::Unsupported("replay needs a log backend (no replay source)".into())
        })?;
        let topic = self
            .config
            .topic
            .clone()
            .ok_or_else(|| ReceiverError::MissingConfig("topic".into()))?;
        let consumer_group = self
            .config
            .consumer_group
            .clone()
            .ok_or_else(|| ReceiverError::MissingConfig("consumer_group".into()))?;

        let engine = ReplayEngine {
            source,
            topic,
            consumer_group,
            wait: self.config.replay_wait,
            notifier: self.notifier.clone(),
            cancel: self.replay_token(),
        };

        engine.run(window, callback).await
    }

    /// Child of the token shared by the replays running right now.
    fn replay_token(&self) -> CancellationToken {
        // ---
        self.replays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// Cancel every running replay and hand later ones a fresh token.
    fn cancel_replays(&self) {
        // ---
        let mut replays = self.replays.lock().unwrap_or_else(PoisonError::into_inner);
        replays.cancel();
        *replays = CancellationToken::new();
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop.cancel();
        self.cancel_replays();
    }
}
