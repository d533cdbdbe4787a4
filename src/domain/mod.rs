//! Domain layer public interface.
//!
//! This module defines the message model and the backend capability traits.
//! Both are independent of any concrete queue service or broker client.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod backend;
mod message;

pub use backend::{
    //
    Backend,
    BackendConnector,
    BackendPtr,
    LogConnector,
    LogSession,
    PartitionOffset,
    ReceiveOutcome,
    RoutingFilter,
};

pub use message::{
    //
    Batch,
    Headers,
    PartitionId,
    Payload,
    ReceivedMessage,
    ResolutionToken,
};
