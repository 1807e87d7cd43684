//! Shared data types for the devon session runtime.
//!
//! This crate holds the event model, the shared event log, checkpoint
//! records, and the session status flag. It is I/O-free so transports and
//! the core runtime can depend on it without pulling in each other.

pub mod checkpoint;
pub mod event;
pub mod log;
pub mod status;

pub use checkpoint::{ChatTurn, Checkpoint, NO_COMMIT};
pub use event::{
    CheckpointNote, Event, EventPayload, GitResolution, GitResolveAction, StopContent, StopKind,
    ToolCall,
};
pub use log::EventLog;
pub use status::{SessionStatus, StatusCell};
