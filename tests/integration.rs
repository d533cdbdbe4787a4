// tests/integration.rs
//
// Receiver behavior against a scripted backend: every receive call pops the
// next step of a script, so connection edges, retries and acknowledgment
// counts are fully deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use mom_receiver::{
    // ---
    handler_fn,
    Backend,
    BackendConnector,
    BackendPtr,
    Delivery,
    DiagnosticKind,
    DispatchMode,
    Headers,
    ReceiveOutcome,
    ReceivedMessage,
    Receiver,
    ReceiverBuilder,
    ReceiverConfig,
    ReceiverError,
    ReceiverEvent,
    ResolutionToken,
    Result,
    RetryConfig,
};

enum Step {
    Fail,
    Unsuccessful(&'static str),
    NoResponse,
    Batch(usize),
}

/// Backend that plays back a script of receive outcomes, then idles until
/// cancelled.
#[derive(Default)]
struct ScriptedBackend {
    script: Mutex<VecDeque<Step>>,
    next_token: AtomicUsize,
    receive_calls: AtomicUsize,
    last_max_messages: AtomicUsize,
    acked: Mutex<Vec<String>>,
    rejected: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl ScriptedBackend {
    fn new(script: Vec<Step>) -> Arc<Self> {
        // ---
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    fn acked(&self) -> usize {
        self.acked.lock().unwrap().len()
    }

    fn rejected(&self) -> usize {
        self.rejected.lock().unwrap().len()
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn batch(&self, size: usize) -> Vec<ReceivedMessage> {
        // ---
        (0..size)
            .map(|_| {
                let n = self.next_token.fetch_add(1, Ordering::SeqCst);
                ReceivedMessage::new(format!("body-{n}"), Headers::new(), format!("tok-{n}").into())
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Backend for ScriptedBackend {
    // ---
    fn backend_id(&self) -> &str {
        "scripted"
    }

    async fn receive_batch(
        &self,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome> {
        // ---
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        self.last_max_messages.store(max_messages, Ordering::SeqCst);

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Fail) => Err(ReceiverError::Backend("connection reset".into())),
            Some(Step::Unsuccessful(code)) => Ok(ReceiveOutcome::Unsuccessful { code: code.into() }),
            Some(Step::NoResponse) => Ok(ReceiveOutcome::NoResponse),
            Some(Step::Batch(size)) => Ok(ReceiveOutcome::Batch(self.batch(size))),
            None => {
                cancel.cancelled().await;
                Ok(ReceiveOutcome::Batch(Vec::new()))
            }
        }
    }

    async fn acknowledge(&self, token: &ResolutionToken) -> Result<()> {
        self.acked.lock().unwrap().push(token.to_string());
        Ok(())
    }

    async fn reject(&self, token: &ResolutionToken) -> Result<()> {
        self.rejected.lock().unwrap().push(token.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Backend whose receive call hangs for an hour and never looks at the
/// cancellation token.
#[derive(Default)]
struct UnresponsiveBackend {
    receive_calls: AtomicUsize,
    closes: AtomicUsize,
}

#[async_trait::async_trait]
impl Backend for UnresponsiveBackend {
    // ---
    fn backend_id(&self) -> &str {
        "unresponsive"
    }

    async fn receive_batch(
        &self,
        _max_messages: usize,
        _cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome> {
        // ---
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_secs(3600)).await;
        Ok(ReceiveOutcome::Batch(Vec::new()))
    }

    async fn acknowledge(&self, _token: &ResolutionToken) -> Result<()> {
        Ok(())
    }

    async fn reject(&self, _token: &ResolutionToken) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts connect calls and can be told to fail.
struct CountingConnector {
    backend: Arc<ScriptedBackend>,
    connects: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait::async_trait]
impl BackendConnector for CountingConnector {
    async fn connect(&self, _config: &ReceiverConfig) -> Result<BackendPtr> {
        // ---
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ReceiverError::Backend("endpoint unreachable".into()));
        }
        let backend: BackendPtr = self.backend.clone();
        Ok(backend)
    }
}

fn config() -> ReceiverConfig {
    // ---
    ReceiverConfig::new("it")
        .with_receive_retry(RetryConfig::immediate(3))
        .with_resolve_retry(RetryConfig::immediate(3))
        .with_failure_backoff(Duration::ZERO)
}

fn ok_handler() -> mom_receiver::HandlerPtr {
    handler_fn(|_delivery: Delivery| async { Ok(()) })
}

fn receiver(backend: &Arc<ScriptedBackend>, config: ReceiverConfig) -> Receiver {
    // ---
    ReceiverBuilder::new(backend.clone())
        .config(config)
        .handler(ok_handler())
        .build()
        .expect("build failed")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    // ---
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn drain(events: &mut broadcast::Receiver<ReceiverEvent>) -> Vec<ReceiverEvent> {
    // ---
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn diagnostics(events: &[ReceiverEvent], kind: DiagnosticKind) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ReceiverEvent::Diagnostic(d) if d.kind == kind))
        .count()
}

#[tokio::test]
async fn connection_events_are_edge_triggered() {
    // ---
    // Arrange
    // ---
    let backend = ScriptedBackend::new(vec![
        // two exhausted iterations (3 attempts each)
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::Fail,
        // two successes
        Step::Batch(1),
        Step::Batch(1),
        // two unusable responses
        Step::Unsuccessful("503"),
        Step::NoResponse,
    ]);
    let receiver = receiver(&backend, config());
    let mut events = receiver.subscribe();

    // ---
    // Act
    // ---
    receiver.start(None).await.unwrap();
    wait_until(|| backend.receive_calls() == 11).await;
    receiver.stop().await.unwrap();

    // ---
    // Assert
    // ---
    let events = drain(&mut events);
    let edges: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            ReceiverEvent::Connected => Some("connected".to_string()),
            ReceiverEvent::Disconnected { reason } => Some(format!("disconnected: {reason}")),
            _ => None,
        })
        .collect();

    assert_eq!(edges.len(), 3, "got {edges:?}");
    assert!(edges[0].starts_with("disconnected: backend error"));
    assert_eq!(edges[1], "connected");
    assert_eq!(edges[2], "disconnected: unsuccessful response: 503");
    assert_eq!(diagnostics(&events, DiagnosticKind::ReceiveFailed), 4);
}

#[tokio::test]
async fn transient_failures_within_budget_stay_connected() {
    // ---
    let backend = ScriptedBackend::new(vec![Step::Fail, Step::Fail, Step::Batch(2)]);
    let receiver = receiver(&backend, config());
    let mut events = receiver.subscribe();

    receiver.start(None).await.unwrap();
    wait_until(|| backend.acked() == 2).await;
    receiver.stop().await.unwrap();

    let events = drain(&mut events);
    assert!(matches!(events.first(), Some(ReceiverEvent::Connected)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ReceiverEvent::Disconnected { .. })));
    assert_eq!(
        receiver.connection_state(),
        mom_receiver::ConnectionState::Connected
    );
}

#[tokio::test]
async fn auto_ack_runs_even_when_handler_fails() {
    // ---
    // Arrange
    // ---
    let backend = ScriptedBackend::new(vec![Step::Batch(4)]);
    let receiver = ReceiverBuilder::new(backend.clone())
        .config(config())
        .handler(handler_fn(|delivery: Delivery| async move {
            if delivery.message().token().as_str() == "tok-2" {
                panic!("handler bug");
            }
            Err(ReceiverError::Handler("always fails".into()))
        }))
        .build()
        .unwrap();
    let mut events = receiver.subscribe();

    // ---
    // Act
    // ---
    receiver.start(None).await.unwrap();
    wait_until(|| backend.acked() == 4).await;
    receiver.stop().await.unwrap();

    // ---
    // Assert
    // ---
    let events = drain(&mut events);
    assert_eq!(backend.acked(), 4);
    assert_eq!(diagnostics(&events, DiagnosticKind::HandlerFailed), 4);
    let received = events
        .iter()
        .filter(|e| matches!(e, ReceiverEvent::MessageReceived(_)))
        .count();
    assert_eq!(received, 4);
}

#[tokio::test]
async fn manual_mode_leaves_resolution_to_handler() {
    // ---
    let backend = ScriptedBackend::new(vec![Step::Batch(4), Step::Batch(2)]);
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();

    let receiver = ReceiverBuilder::new(backend.clone())
        .config(config().with_auto_acknowledge(false))
        .handler(handler_fn(move |delivery: Delivery| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let n: usize = delivery
                    .message()
                    .token()
                    .as_str()
                    .trim_start_matches("tok-")
                    .parse()
                    .unwrap();
                match n {
                    // The second batch is never resolved.
                    4.. => {}
                    _ if n % 2 == 0 => {
                        delivery.acknowledge().await?;
                    }
                    _ => {
                        delivery.reject().await?;
                    }
                }
                Ok(())
            }
        }))
        .build()
        .unwrap();

    receiver.start(None).await.unwrap();
    wait_until(|| handled.load(Ordering::SeqCst) == 6).await;
    receiver.stop().await.unwrap();

    assert_eq!(*backend.acked.lock().unwrap(), vec!["tok-0", "tok-2"]);
    assert_eq!(*backend.rejected.lock().unwrap(), vec!["tok-1", "tok-3"]);
}

#[tokio::test]
async fn delivery_without_resolver_cannot_be_acknowledged() {
    // ---
    let backend = ScriptedBackend::new(vec![Step::Batch(1)]);
    let outcome = Arc::new(Mutex::new(None));
    let slot = outcome.clone();

    let receiver = ReceiverBuilder::new(backend.clone())
        .config(config())
        .handler(handler_fn(move |delivery: Delivery| {
            let slot = slot.clone();
            async move {
                let result = delivery.acknowledge().await;
                *slot.lock().unwrap() = Some(matches!(result, Err(ReceiverError::Unsupported(_))));
                Ok(())
            }
        }))
        .build()
        .unwrap();

    receiver.start(None).await.unwrap();
    wait_until(|| backend.acked() == 1).await;
    receiver.stop().await.unwrap();

    assert_eq!(*outcome.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn receive_uses_configured_batch_size() {
    // ---
    let backend = ScriptedBackend::new(vec![Step::Batch(1)]);
    let receiver = receiver(&backend, config().with_max_batch_size(7));

    receiver.start(None).await.unwrap();
    wait_until(|| backend.acked() == 1).await;
    receiver.stop().await.unwrap();

    assert_eq!(backend.last_max_messages.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn stop_is_idempotent() {
    // ---
    let backend = ScriptedBackend::new(vec![]);
    let receiver = receiver(&backend, config());

    receiver.start(None).await.unwrap();
    wait_until(|| backend.receive_calls() == 1).await;

    receiver.stop().await.unwrap();
    let calls_after_first_stop = backend.receive_calls();
    receiver.stop().await.unwrap();

    assert_eq!(backend.closes(), 1);
    assert_eq!(backend.receive_calls(), calls_after_first_stop);
    assert!(!receiver.is_running().await);
}

#[tokio::test]
async fn stop_is_prompt_when_backend_ignores_cancellation() {
    // ---
    // Arrange
    // ---
    let backend = Arc::new(UnresponsiveBackend::default());
    let receiver = ReceiverBuilder::new(backend.clone())
        .config(config())
        .handler(ok_handler())
        .build()
        .unwrap();

    receiver.start(None).await.unwrap();
    wait_until(|| backend.receive_calls.load(Ordering::SeqCst) == 1).await;

    // ---
    // Act
    // ---
    let stopped = timeout(Duration::from_secs(2), receiver.stop()).await;

    // ---
    // Assert
    // ---
    assert!(matches!(stopped, Ok(Ok(()))), "stop waited on the backend");
    assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
    assert!(!receiver.is_running().await);
}

#[tokio::test]
async fn stop_interrupts_failure_backoff() {
    // ---
    // Arrange
    // ---
    let backend = ScriptedBackend::new(vec![Step::Fail, Step::Batch(1)]);
    let receiver = receiver(
        &backend,
        config()
            .with_receive_retry(RetryConfig::immediate(1))
            .with_failure_backoff(Duration::from_secs(3600)),
    );

    receiver.start(None).await.unwrap();
    wait_until(|| receiver.connection_state() == mom_receiver::ConnectionState::Disconnected)
        .await;

    // ---
    // Act
    // ---
    let stopped = timeout(Duration::from_secs(2), receiver.stop()).await;

    // ---
    // Assert
    // ---
    assert!(matches!(stopped, Ok(Ok(()))), "stop waited out the backoff");
    // The backoff was cut short, not served: no second receive happened.
    assert_eq!(backend.receive_calls(), 1);
    assert_eq!(backend.acked(), 0);
}

#[tokio::test]
async fn start_twice_runs_one_loop() {
    // ---
    let backend = ScriptedBackend::new(vec![]);
    let receiver = receiver(&backend, config());

    receiver.start(None).await.unwrap();
    receiver.start(None).await.unwrap();
    wait_until(|| backend.receive_calls() >= 1).await;
    sleep(Duration::from_millis(20)).await;

    // The script is empty, so a single loop blocks in one call.
    assert_eq!(backend.receive_calls(), 1);
    receiver.stop().await.unwrap();
}

#[tokio::test]
async fn backend_is_connected_lazily_and_once() {
    // ---
    // Arrange
    // ---
    let backend = ScriptedBackend::new(vec![]);
    let connects = Arc::new(AtomicUsize::new(0));
    let receiver = ReceiverBuilder::new(CountingConnector {
        backend: backend.clone(),
        connects: connects.clone(),
        fail: false,
    })
    .config(config())
    .handler(ok_handler())
    .build()
    .unwrap();

    // ---
    // Act / Assert
    // ---
    assert_eq!(connects.load(Ordering::SeqCst), 0);

    receiver.start(None).await.unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    receiver.stop().await.unwrap();
    receiver.start(None).await.unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert!(!receiver.is_running().await);
}

#[tokio::test]
async fn stop_before_start_touches_no_backend() {
    // ---
    let backend = ScriptedBackend::new(vec![]);
    let connects = Arc::new(AtomicUsize::new(0));
    let receiver = ReceiverBuilder::new(CountingConnector {
        backend: backend.clone(),
        connects: connects.clone(),
        fail: false,
    })
    .config(config())
    .handler(ok_handler())
    .build()
    .unwrap();

    receiver.stop().await.unwrap();
    receiver.stop().await.unwrap();

    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert_eq!(backend.closes(), 0);
    assert_eq!(backend.receive_calls(), 0);
}

#[tokio::test]
async fn failed_connect_leaves_receiver_idle() {
    // ---
    let backend = ScriptedBackend::new(vec![]);
    let connects = Arc::new(AtomicUsize::new(0));
    let receiver = ReceiverBuilder::new(CountingConnector {
        backend: backend.clone(),
        connects: connects.clone(),
        fail: true,
    })
    .config(config().with_async_completion(4))
    .handler(ok_handler())
    .build()
    .unwrap();

    let result = receiver.start(None).await;

    assert!(matches!(result, Err(ReceiverError::Backend(_))));
    assert!(!receiver.is_running().await);

    // Still idle, so a retry attempts the connection again.
    assert!(receiver.start(None).await.is_err());
    assert_eq!(connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn async_completion_reports_failures_per_message() {
    // ---
    let backend = ScriptedBackend::new(vec![Step::Batch(3)]);
    let receiver = ReceiverBuilder::new(backend.clone())
        .config(
            config()
                .with_dispatch_mode(DispatchMode::Concurrent)
                .with_async_completion(8),
        )
        .handler(handler_fn(|_delivery: Delivery| async {
            Err(ReceiverError::Handler("rejected by rules".into()))
        }))
        .build()
        .unwrap();
    let mut events = receiver.subscribe();

    receiver.start(None).await.unwrap();
    wait_until(|| backend.acked() == 3).await;
    receiver.stop().await.unwrap();

    let events = drain(&mut events);
    assert_eq!(diagnostics(&events, DiagnosticKind::CompletionFailed), 3);
}

#[test]
fn build_validates_configuration() {
    // ---
    let backend = ScriptedBackend::new(vec![]);

    let too_big = ReceiverBuilder::new(backend.clone())
        .config(config().with_max_batch_size(11))
        .handler(ok_handler())
        .build();
    assert!(matches!(too_big, Err(ReceiverError::InvalidConfig(_))));

    let no_handler = ReceiverBuilder::new(backend.clone()).config(config()).build();
    assert!(matches!(no_handler, Err(ReceiverError::MissingConfig(_))));

    let no_id = ReceiverBuilder::new(backend)
        .config(ReceiverConfig::default())
        .handler(ok_handler())
        .build();
    assert!(matches!(no_id, Err(ReceiverError::MissingConfig(_))));
}
