// src/domain/message.rs

//! Received message model.
//!
//! A [`ReceivedMessage`] is what a backend hands to the engine: a payload, an
//! ordered set of headers and the opaque [`ResolutionToken`] the engine passes
//! back to the backend to acknowledge or reject the message. Log-structured
//! backends also stamp the partition and broker timestamp, which the replay
//! engine needs to decide where a time window ends.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

/// Message body. Text and binary are mutually exclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    // ---
    /// UTF-8 body (queue services that only carry strings).
    Text(Arc<str>),

    /// Raw bytes.
    Binary(Bytes),
}

impl Payload {
    // ---
    /// Borrow the body as bytes regardless of its kind.
    pub fn as_bytes(&self) -> &[u8] {
        // ---
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    /// Borrow the body as text if it is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        // ---
        match self {
            Payload::Text(text) => Some(text),
            Payload::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.into())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value.into())
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Binary(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(value))
    }
}

/// Message headers in the order the backend delivered them.
///
/// Inserting an existing name replaces its value without moving it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(Vec<(Arc<str>, Arc<str>)>);

impl Headers {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<Arc<str>>, value: impl Into<Arc<str>>) {
        // ---
        let name = name.into();
        let value = value.into();

        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        // ---
        self.0
            .iter()
            .find(|(existing, _)| existing.as_ref() == name)
            .map(|(_, value)| value.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_ref(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<Arc<str>>,
    V: Into<Arc<str>>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        // ---
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Opaque handle tying a message to the backend call that resolves it.
///
/// For queue services this is the receipt handle; for log backends it is an
/// encoded partition/offset reference. The engine never looks inside.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolutionToken(Arc<str>);

impl ResolutionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResolutionToken {
    fn from(value: &str) -> Self {
        ResolutionToken(value.into())
    }
}

impl From<String> for ResolutionToken {
    fn from(value: String) -> Self {
        ResolutionToken(value.into())
    }
}

impl From<Arc<str>> for ResolutionToken {
    fn from(value: Arc<str>) -> Self {
        ResolutionToken(value)
    }
}

impl fmt::Display for ResolutionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Independently ordered subdivision of a log-structured topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub i32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as delivered by a backend.
///
/// Immutable once built; cloning is cheap (reference counted payload and
/// headers).
#[derive(Clone, Debug)]
pub struct ReceivedMessage {
    // ---
    payload: Payload,
    headers: Headers,
    token: ResolutionToken,
    partition: Option<PartitionId>,
    timestamp: Option<DateTime<Utc>>,
}

impl ReceivedMessage {
    // ---
    pub fn new(payload: impl Into<Payload>, headers: Headers, token: ResolutionToken) -> Self {
        // ---
        Self {
            payload: payload.into(),
            headers,
            token,
            partition: None,
            timestamp: None,
        }
    }

    /// Stamp the partition the message was read from (log backends).
    pub fn with_partition(mut self, partition: PartitionId) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Stamp the broker timestamp of the message (log backends).
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn token(&self) -> &ResolutionToken {
        &self.token
    }

    pub fn partition(&self) -> Option<PartitionId> {
        self.partition
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Decode a JSON payload.
    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        // ---
        Ok(serde_json::from_slice(self.payload.as_bytes())?)
    }
}

/// Messages produced by one receive call, in backend order.
pub type Batch = Vec<ReceivedMessage>;
