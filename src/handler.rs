//! Application-facing handler types.
//!
//! Handlers receive a [`Delivery`]: the message plus, in manual
//! acknowledgment mode, the [`Resolver`] that acknowledges or rejects it.
//! Closures are wrapped with [`handler_fn`] and [`replay_fn`] so the engine
//! can store them behind a single trait object.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{ReceivedMessage, ReceiverError, Resolution, Resolver, Result};

/// A message handed to the application handler.
pub struct Delivery {
    // ---
    message: ReceivedMessage,
    resolver: Option<Resolver>,
}

impl Delivery {
    // ---
    pub(crate) fn new(message: ReceivedMessage, resolver: Option<Resolver>) -> Self {
        Self { message, resolver }
    }

    pub fn message(&self) -> &ReceivedMessage {
        &self.message
    }

    pub fn into_message(self) -> ReceivedMessage {
        self.message
    }

    /// Take the resolver out of the delivery.
    ///
    /// Returns `None` when the receiver acknowledges automatically (or when
    /// the resolver was already taken).
    pub fn take_resolver(&mut self) -> Option<Resolver> {
        self.resolver.take()
    }

    /// Acknowledge the message (manual mode only).
    pub async fn acknowledge(mut self) -> Result<Resolution> {
        // ---
        match self.take_resolver() {
            Some(resolver) => Ok(resolver.acknowledge().await),
            None => Err(Self::no_resolver()),
        }
    }

    /// Reject the message so the backend redelivers it (manual mode only).
    pub async fn reject(mut self) -> Result<Resolution> {
        // ---
        match self.take_resolver() {
            Some(resolver) => Ok(resolver.reject().await),
            None => Err(Self::no_resolver()),
        }
    }

    fn no_resolver() -> ReceiverError {
        ReceiverError::Unsupported(
            "delivery has no resolver (auto-acknowledge enabled or resolver already taken)".into(),
        )
    }
}

/// Application message handler.
///
/// Errors and panics are caught per message by the dispatcher; they never
/// stop the polling loop or the rest of the batch.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<()>;
}

/// Shared handler pointer.
pub type HandlerPtr = Arc<dyn MessageHandler>;

struct FnHandler<F> {
    func: F,
}

#[async_trait::async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, delivery: Delivery) -> Result<()> {
        (self.func)(delivery).await
    }
}

/// Wrap an async closure into a [`HandlerPtr`].
///
/// ```
/// use mom_receiver::{handler_fn, Delivery};
///
/// let handler = handler_fn(|delivery: Delivery| async move {
///     let _body = delivery.message().payload().as_bytes();
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(func: F) -> HandlerPtr
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { func })
}

/// Type-erased replay callback.
///
/// Each call returns a boxed future so callbacks of different closure types
/// can be passed through the same `Receiver::replay` signature.
pub type ReplayCallback =
    Arc<dyn Fn(ReceivedMessage) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Wrap an async closure into a [`ReplayCallback`].
pub fn replay_fn<F, Fut>(func: F) -> ReplayCallback
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    // ---
    Arc::new(move |message: ReceivedMessage| {
        let fut = func(message);
        Box::pin(fut) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
    })
}
