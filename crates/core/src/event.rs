//! Events and the batches they are flushed in
//!
//! An [`Event`] is created by a producer and never mutated afterwards. A
//! [`Batch`] is formed at flush time from the accumulation buffer and shared
//! by reference count between the uploader and every report subscriber.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One unit of work submitted by a producer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// Producer-assigned identifier
    pub id: u64,
    /// Opaque payload carried through to the uploader untouched
    pub payload: String,
}

impl Event {
    /// Create a new event
    pub fn new(id: u64, payload: impl Into<String>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// An ordered, immutable group of events flushed together
///
/// Cloning a batch is cheap: the events are shared, not copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    sequence: u64,
    events: Arc<[Event]>,
}

impl Batch {
    /// Create a batch from events in arrival order
    ///
    /// Returns `None` for an empty event list; a batch is never empty.
    pub fn new(sequence: u64, events: Vec<Event>) -> Option<Self> {
        if events.is_empty() {
            return None;
        }
        Some(Self {
            sequence,
            events: events.into(),
        })
    }

    /// 1-based flush number, strictly increasing in publish order
    ///
    /// Failed uploads consume a number too, so a gap seen by a subscriber
    /// means either a lost upload or a report dropped because it lagged.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of events in the batch
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Always false for a batch produced by a flush
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in arrival order
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Iterate over the events in arrival order
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Identifiers of the events in arrival order
    pub fn ids(&self) -> Vec<u64> {
        self.events.iter().map(|e| e.id).collect()
    }

    /// Copy the events out into an owned vector
    pub fn into_vec(self) -> Vec<Event> {
        self.events.to_vec()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
