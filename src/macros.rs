// src/macros.rs

//
// Diagnostic logging macros
//
// Two call forms:
//
//   log_warn!("queue {} closed", id)                  plain message
//   log_warn!(receiver = id; "disconnected: {reason}") tagged with a receiver
//
// With the `logging` feature the receiver id becomes a structured `receiver`
// field on the tracing event, so several receivers in one process can be told
// apart by a subscriber filter. Without it, log_error prints to stderr with
// the id as a prefix and the other levels only type-check their arguments.
//

#![allow(unused_macros)]

#[cfg(feature = "logging")]
macro_rules! log_error {
    (receiver = $id:expr; $($arg:tt)+) => {
        tracing::error!(receiver = %$id, $($arg)+)
    };
    ($($arg:tt)+) => {
        tracing::error!($($arg)+)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    (receiver = $id:expr; $($arg:tt)+) => {
        eprintln!("{}: {}", $id, format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        eprintln!($($arg)+)
    };
}

#[cfg(feature = "logging")]
macro_rules! log_warn {
    (receiver = $id:expr; $($arg:tt)+) => {
        tracing::warn!(receiver = %$id, $($arg)+)
    };
    ($($arg:tt)+) => {
        tracing::warn!($($arg)+)
    };
}

#[cfg(feature = "logging")]
macro_rules! log_info {
    (receiver = $id:expr; $($arg:tt)+) => {
        tracing::info!(receiver = %$id, $($arg)+)
    };
    ($($arg:tt)+) => {
        tracing::info!($($arg)+)
    };
}

#[cfg(feature = "logging")]
macro_rules! log_debug {
    (receiver = $id:expr; $($arg:tt)+) => {
        tracing::debug!(receiver = %$id, $($arg)+)
    };
    ($($arg:tt)+) => {
        tracing::debug!($($arg)+)
    };
}

// Below error level nothing is printed without the feature; the arguments
// are still checked so both builds reject the same call sites.
#[cfg(not(feature = "logging"))]
macro_rules! log_quiet {
    (receiver = $id:expr; $($arg:tt)+) => {{
        let _ = &$id;
        let _ = format_args!($($arg)+);
    }};
    ($($arg:tt)+) => {{
        let _ = format_args!($($arg)+);
    }};
}

#[cfg(not(feature = "logging"))]
pub(crate) use log_quiet as log_warn;

#[cfg(not(feature = "logging"))]
pub(crate) use log_quiet as log_info;

#[cfg(not(feature = "logging"))]
pub(crate) use log_quiet as log_debug;

#[cfg(feature = "logging")]
pub(crate) use log_debug;
#[cfg(feature = "logging")]
pub(crate) use log_info;
#[cfg(feature = "logging")]
pub(crate) use log_warn;

pub(crate) use log_error;
