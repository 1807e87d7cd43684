//! Shared append-only event log.
//!
//! The log is the single source of truth for replay and checkpointing.
//! External producers append from their own threads; the dispatcher is the
//! sole consumer and the only writer that ever truncates (on revert).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::event::Event;
use crate::status::StatusCell;

/// Cloneable handle to the session's event sequence.
///
/// Append position doubles as the event id.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a log pre-seeded with events, e.g. from a loaded session
    /// document.
    pub fn from_events(events: Vec<Event>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(events)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends one event and returns its position.
    pub fn append(&self, event: Event) -> usize {
        let mut events = self.lock();
        events.push(event);
        events.len() - 1
    }

    pub fn extend(&self, new_events: Vec<Event>) {
        self.lock().extend(new_events);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Event> {
        self.lock().get(index).cloned()
    }

    pub fn last(&self) -> Option<Event> {
        self.lock().last().cloned()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Drops every event at position `len` and beyond.
    pub fn truncate(&self, len: usize) {
        self.lock().truncate(len);
    }

    pub fn replace(&self, events: Vec<Event>) {
        *self.lock() = events;
    }

    /// Polls the log tail once per second until `pred` matches the most
    /// recent event. Returns `None` if termination is requested first.
    pub fn wait_for_tail(
        &self,
        pred: impl Fn(&Event) -> bool,
        status: &StatusCell,
    ) -> Option<Event> {
        loop {
            if status.is_stopping() {
                return None;
            }
            if let Some(last) = self.last()
                && pred(&last)
            {
                return Some(last);
            }
            thread::sleep(Duration::from_secs(1));
        }
    }
}
