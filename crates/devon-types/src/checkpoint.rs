//! Checkpoint records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel recorded as the commit hash when the checkpoint could not
/// commit, for example when the working tree was clean.
pub const NO_COMMIT: &str = "no_commit";

/// One turn of the agent's chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A restorable snapshot: repo commit, agent chat history, and session
/// state, anchored to an event-log position.
///
/// Within one session the `event_id`s of recorded checkpoints are strictly
/// increasing; reverting truncates the list back to the reverted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub commit_message: String,
    /// Commit on the agent branch, or [`NO_COMMIT`].
    pub commit_hash: String,
    /// Tip of the user branch at creation time, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_commit: Option<String>,
    pub agent_history: Vec<ChatTurn>,
    /// JSON round-trip of the session scratch state.
    pub state: Value,
    /// Event-log length captured when the checkpoint was taken.
    pub event_id: usize,
}

impl Checkpoint {
    /// Generates an opaque checkpoint id.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// True when the checkpoint recorded a real commit.
    pub fn has_commit(&self) -> bool {
        self.commit_hash != NO_COMMIT
    }
}
