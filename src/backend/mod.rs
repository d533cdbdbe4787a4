//! Backend implementations.
//!
//! Network bindings (queue services, log brokers) live outside this crate and
//! implement the domain traits directly. This module only carries the
//! in-memory backends.

mod memory;

pub use memory::{MemoryLog, MemoryLogConnector, MemoryQueue, MemoryQueueConnector};
