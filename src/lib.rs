//! Backend-agnostic message receiving over queues and log-structured brokers
//!
//! This library polls a message backend on a background task, hands each
//! received batch to an application handler, acknowledges (or leaves for
//! redelivery) according to the configured policy, and can replay a bounded
//! time window of a log topic on demand.
//!
//! Concrete backends plug in through the [`Backend`] and [`LogSession`]
//! traits. In-memory implementations of both ship in [`backend`].
//!

// Import all sub modules once...
mod domain;
mod macros;
mod receiver;

pub mod backend;

mod handler;
mod receiver_builder;
mod receiver_config;
mod replay;

mod error;
mod retry;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use receiver::{
    //
    ConnectionState,
    Diagnostic,
    DiagnosticKind,
    Receiver,
    ReceiverEvent,
    Resolution,
    Resolver,
};
pub use receiver_builder::ReceiverBuilder;
pub use receiver_config::{DispatchMode, OffsetReset, ReceiverConfig, MAX_BATCH_SIZE};
pub use replay::{ReplayReport, ReplayWindow};

pub use handler::{
    //
    handler_fn,
    replay_fn,
    Delivery,
    HandlerPtr,
    MessageHandler,
    ReplayCallback,
};

pub use error::{ReceiverError, Result};
pub use retry::RetryConfig;

// --- public re-exports
pub use domain::{
    //
    Backend,
    BackendConnector,
    BackendPtr,
    Batch,
    Headers,
    LogConnector,
    LogSession,
    PartitionId,
    PartitionOffset,
    Payload,
    ReceiveOutcome,
    ReceivedMessage,
    ResolutionToken,
    RoutingFilter,
};
