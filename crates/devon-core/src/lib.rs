//! Core runtime for the devon coding-agent session loop.
//!
//! The pieces: a session orchestrator pumping an append-only event log
//! through a typed dispatcher, pluggable execution environments (an
//! interactive shell, a user prompt channel, editor RPC), and a git-backed
//! checkpoint engine that can snapshot, revert, and merge the agent's work.

pub mod agent;
pub mod config;
pub mod envs;
pub mod parser;
pub mod persist;
pub mod session;
pub mod state;
pub mod tools;
pub mod versioning;

pub use agent::{Agent, Prediction, ScriptedAgent};
pub use config::{AgentConfig, SessionConfig, VersioningKind};
pub use persist::{JsonFileStore, SessionDoc, SessionStore};
pub use session::{COMPLETION_TASK, CommandDoc, FileDiff, Session, UNSPECIFIED_TASK};
pub use state::SessionState;
pub use versioning::{AGENT_BRANCH, GitVersioning};
