//! Session status flag shared across threads.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Paused,
    Running,
    Terminating,
    Terminated,
}

impl SessionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionStatus::Running,
            2 => SessionStatus::Terminating,
            3 => SessionStatus::Terminated,
            _ => SessionStatus::Paused,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionStatus::Paused => 0,
            SessionStatus::Running => 1,
            SessionStatus::Terminating => 2,
            SessionStatus::Terminated => 3,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Paused => "paused",
            SessionStatus::Running => "running",
            SessionStatus::Terminating => "terminating",
            SessionStatus::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

/// Cloneable handle to the session status.
///
/// Transports flip this from other threads (pause/terminate); every
/// blocking wait in the runtime polls it at least once per second.
#[derive(Debug, Clone)]
pub struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    pub fn new(initial: SessionStatus) -> Self {
        Self(Arc::new(AtomicU8::new(initial.as_u8())))
    }

    pub fn get(&self) -> SessionStatus {
        SessionStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, status: SessionStatus) {
        self.0.store(status.as_u8(), Ordering::SeqCst);
    }

    /// True once termination has been requested or completed.
    pub fn is_stopping(&self) -> bool {
        matches!(
            self.get(),
            SessionStatus::Terminating | SessionStatus::Terminated
        )
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(SessionStatus::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_cell() {
        let cell = StatusCell::default();
        assert_eq!(cell.get(), SessionStatus::Paused);

        for status in [
            SessionStatus::Running,
            SessionStatus::Terminating,
            SessionStatus::Terminated,
            SessionStatus::Paused,
        ] {
            cell.set(status);
            assert_eq!(cell.get(), status);
        }
    }

    #[test]
    fn test_clones_share_state() {
        let cell = StatusCell::default();
        let other = cell.clone();
        other.set(SessionStatus::Terminating);
        assert!(cell.is_stopping());
    }
}
