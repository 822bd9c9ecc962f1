//! Correlated event definitions.
//!
//! This module provides:
//! - `EventId` for engine-local event identity
//! - `GroupId` with the no-correlation-id sentinel folding
//! - `Event`, the immutable unit carrying a payload plus correlation metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Group id used for events that carry no correlation id.
pub const NO_CORRELATION_ID: &str = "no-id";

/// Literal correlation id some transports use to mean "none".
const UNSET_CORRELATION_ID: &str = "-1";

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of an event group: the correlation id shared by its members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Resolve a (possibly absent) correlation id to a group id.
    ///
    /// Absent ids and the literal `"-1"` fold into `sentinel`, so uncorrelated
    /// events still group together.
    pub fn resolve(correlation_id: Option<&str>, sentinel: &str) -> Self {
        match correlation_id {
            Some(id) if id != UNSET_CORRELATION_ID => Self(id.to_string()),
            _ => Self(sentinel.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// =============================================================================
// Event
// =============================================================================

/// An immutable event carrying a payload and its correlation metadata.
///
/// `correlation_sequence` is 1-based. An absent sequence or group size means
/// the producer did not declare one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<P> {
    #[serde(default)]
    id: EventId,

    payload: P,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,

    #[serde(
        default,
        alias = "sequence",
        deserialize_with = "unknown_if_negative",
        skip_serializing_if = "Option::is_none"
    )]
    correlation_sequence: Option<u32>,

    #[serde(
        default,
        alias = "group_size",
        deserialize_with = "unknown_if_negative",
        skip_serializing_if = "Option::is_none"
    )]
    correlation_group_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    unique_id: Option<String>,

    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
}

/// Producers encode an unknown sequence or group size as `-1`.
fn unknown_if_negative<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
    T::Error: std::fmt::Display,
{
    match Option::<i64>::deserialize(deserializer)? {
        Some(value) if value >= 0 => T::try_from(value).map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

impl<P> Event<P> {
    /// Create an uncorrelated event.
    pub fn new(payload: P) -> Self {
        Self {
            id: EventId::new(),
            payload,
            correlation_id: None,
            correlation_sequence: None,
            correlation_group_size: None,
            unique_id: None,
            created_at: Utc::now(),
        }
    }

    /// Create an output event on behalf of a drained group.
    ///
    /// The merged event keeps the group's correlation id but declares no
    /// sequence or size of its own.
    pub fn merged(group_id: &GroupId, payload: P) -> Self {
        Self::new(payload).with_correlation_id(group_id.as_str())
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the 1-based correlation sequence.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.correlation_sequence = Some(sequence);
        self
    }

    /// Set the declared group size.
    pub fn with_group_size(mut self, size: usize) -> Self {
        self.correlation_group_size = Some(size);
        self
    }

    /// Shorthand for a correlated member: id, sequence and group size.
    pub fn with_correlation(self, id: impl Into<String>, sequence: u32, group_size: usize) -> Self {
        self.with_correlation_id(id)
            .with_sequence(sequence)
            .with_group_size(group_size)
    }

    /// Set the transport-supplied unique id.
    pub fn with_unique_id(mut self, id: impl Into<String>) -> Self {
        self.unique_id = Some(id.into());
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn correlation_sequence(&self) -> Option<u32> {
        self.correlation_sequence
    }

    pub fn correlation_group_size(&self) -> Option<usize> {
        self.correlation_group_size
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Group id this event belongs to under the given sentinel.
    pub fn group_id(&self, sentinel: &str) -> GroupId {
        GroupId::resolve(self.correlation_id(), sentinel)
    }
}
