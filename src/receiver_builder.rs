//! Receiver builder.
//!
//! Provides a fluent builder API for assembling a [`Receiver`] from a
//! backend connector, a configuration and a message handler.

use std::sync::Arc;

use crate::{
    // ---
    BackendConnector,
    HandlerPtr,
    LogConnector,
    Receiver,
    ReceiverConfig,
    ReceiverError,
    Result,
};

/// Builder for [`Receiver`] instances.
///
/// Building never performs I/O: the backend is connected when the receiver
/// first starts.
///
/// # Examples
///
/// ```no_run
/// use mom_receiver::backend::MemoryQueue;
/// use mom_receiver::{handler_fn, Delivery, ReceiverBuilder, ReceiverConfig};
///
/// # async fn example() -> mom_receiver::Result<()> {
/// let queue = MemoryQueue::new("orders");
///
/// let receiver = ReceiverBuilder::new(queue)
///     .config(ReceiverConfig::new("orders-worker").with_max_batch_size(5))
///     .handler(handler_fn(|delivery: Delivery| async move {
///         println!("got {} bytes", delivery.message().payload().len());
///         Ok(())
///     }))
///     .build()?;
///
/// receiver.start(None).await?;
/// receiver.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct ReceiverBuilder {
    // ---
    connector: Arc<dyn BackendConnector>,
    config: Option<ReceiverConfig>,
    handler: Option<HandlerPtr>,
    replay_source: Option<Arc<dyn LogConnector>>,
}

impl ReceiverBuilder {
    /// Create a builder around the connector that opens the backend session.
    ///
    /// An `Arc` of any [`Backend`](crate::Backend) is its own connector.
    pub fn new<C>(connector: C) -> Self
    where
        C: BackendConnector + 'static,
    {
        // ---
        Self {
            connector: Arc::new(connector),
            config: None,
            handler: None,
            replay_source: None,
        }
    }

    /// Set the receiver configuration.
    ///
    /// Default: `ReceiverConfig::default()`, which fails validation until a
    /// receiver id is set.
    pub fn config(mut self, config: ReceiverConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the message handler. Required.
    pub fn handler(mut self, handler: HandlerPtr) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Enable [`Receiver::replay`] by supplying a source of isolated log
    /// sessions.
    pub fn replay_source<L>(mut self, source: L) -> Self
    where
        L: LogConnector + 'static,
    {
        self.replay_source = Some(Arc::new(source));
        self
    }

    /// Validate and build the receiver (consumes self).
    pub fn build(self) -> Result<Receiver> {
        // ---
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let handler = self
            .handler
            .ok_or_else(|| ReceiverError::MissingConfig("handler".into()))?;

        Ok(Receiver::new(
            config,
            self.connector,
            handler,
            self.replay_source,
        ))
    }
}
