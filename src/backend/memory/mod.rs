// src/backend/memory/mod.rs

//! In-memory backends.
//!
//! Pure in-process implementations of the backend contracts. They are the
//! reference behavior for the engine's tests and a convenient local stand-in
//! for a real queue service or log broker.
//!
//! ## Reference Semantics
//!
//! - Receive calls are bounded by a wait and end early on cancellation.
//! - A resolution token is valid for exactly one acknowledge or reject.
//! - Replay sessions are read-only: nothing is committed.
//! - Live log consumers commit offsets per consumer group, either when a
//!   record is received (`auto_offset_store`) or when it is acknowledged.
//!
//! ## Connectors
//!
//! An `Arc` of either backend is its own connector and keeps its built-in
//! defaults. [`MemoryQueue::connector`] and [`MemoryLog::connector`] instead
//! read the receiver configuration (receive wait, consumer group, offset
//! policy). Endpoints, when given, must use the `memory://` scheme.
//!
//! ## Non-Goals
//!
//! These backends do not emulate the failure modes, persistence or timing
//! of any specific service.

use std::sync::{Mutex, MutexGuard};

use crate::{ReceiverError, Result};

mod consumer;
mod log;
mod queue;

pub use consumer::MemoryLogConnector;
pub use log::MemoryLog;
pub use queue::{MemoryQueue, MemoryQueueConnector};

const ENDPOINT_SCHEME: &str = "memory://";

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Every configured endpoint must name an in-process backend.
fn check_endpoints(endpoints: &[String]) -> Result<()> {
    // ---
    match endpoints.iter().find(|e| !e.starts_with(ENDPOINT_SCHEME)) {
        Some(endpoint) => Err(ReceiverError::InvalidConfig(format!(
            "in-memory backend cannot reach {endpoint}"
        ))),
        None => Ok(()),
    }
}
