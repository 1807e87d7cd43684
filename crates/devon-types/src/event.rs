//! Session event types.
//!
//! Events are the atomic unit the dispatcher consumes. On the wire every
//! event is `{type, content, producer, consumer}`; in memory the
//! type/content pair is a tagged sum, so a producer cannot append a payload
//! that does not match its tag.

use serde::{Deserialize, Serialize};

/// A single entry in the session event log.
///
/// The log position of an event doubles as its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub producer: String,
    pub consumer: String,
}

impl Event {
    pub fn new(
        payload: EventPayload,
        producer: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            payload,
            producer: producer.into(),
            consumer: consumer.into(),
        }
    }

    /// The wire name of this event's type tag.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// The closed set of event types, with per-variant payloads.
///
/// `UserRequest`/`UserResponse` carry the user-prompt channel; the
/// dispatcher ignores them, like any type it does not know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content")]
pub enum EventPayload {
    /// A task for the agent. `None` means the user has not said yet.
    Task(Option<String>),
    ModelRequest(String),
    /// Serialized `{thought, action, output}` triple from the agent.
    ModelResponse(String),
    ToolRequest(ToolCall),
    ToolResponse(String),
    /// Raw command sent to the default shell tool (fallback path).
    ShellRequest(String),
    ShellResponse(String),
    /// A handler error; the dispatcher rewrites it into a `Stop`.
    Error(String),
    Stop(StopContent),
    /// Carries the `ModelRequest` content to retry after the wait.
    RateLimit(String),
    Interrupt(String),
    GitError(String),
    GitAskUser(String),
    GitResolve(GitResolution),
    Checkpoint(CheckpointNote),
    UserRequest(String),
    UserResponse(String),
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Task(_) => "Task",
            EventPayload::ModelRequest(_) => "ModelRequest",
            EventPayload::ModelResponse(_) => "ModelResponse",
            EventPayload::ToolRequest(_) => "ToolRequest",
            EventPayload::ToolResponse(_) => "ToolResponse",
            EventPayload::ShellRequest(_) => "ShellRequest",
            EventPayload::ShellResponse(_) => "ShellResponse",
            EventPayload::Error(_) => "Error",
            EventPayload::Stop(_) => "Stop",
            EventPayload::RateLimit(_) => "RateLimit",
            EventPayload::Interrupt(_) => "Interrupt",
            EventPayload::GitError(_) => "GitError",
            EventPayload::GitAskUser(_) => "GitAskUser",
            EventPayload::GitResolve(_) => "GitResolve",
            EventPayload::Checkpoint(_) => "Checkpoint",
            EventPayload::UserRequest(_) => "UserRequest",
            EventPayload::UserResponse(_) => "UserResponse",
        }
    }
}

/// Parsed tool invocation carried by a `ToolRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub toolname: String,
    pub args: Vec<String>,
    /// The unparsed action text, kept for the shell fallback.
    pub raw_command: String,
}

/// Why the session is stopping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopContent {
    #[serde(rename = "type")]
    pub kind: StopKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Submit,
    Exit,
    Stop,
    ExitError,
    ExitApi,
    Error,
}

impl StopKind {
    /// Maps a reserved tool name to its stop kind.
    ///
    /// Reserved names short-circuit dispatch into a `Stop` event and are
    /// never routed to a tool.
    pub fn from_tool_name(name: &str) -> Option<Self> {
        match name {
            "submit" => Some(StopKind::Submit),
            "exit" => Some(StopKind::Exit),
            "stop" => Some(StopKind::Stop),
            "exit_error" => Some(StopKind::ExitError),
            "exit_api" => Some(StopKind::ExitApi),
            _ => None,
        }
    }
}

/// User's answer to a blocking git prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitResolution {
    pub action: GitResolveAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitResolveAction {
    Yes,
    No,
    /// Disable versioning for the rest of the session.
    Nogit,
    /// The user fixed the problem out of band; retry the step.
    Resolved,
}

/// Observer notification appended when a checkpoint is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointNote {
    pub checkpoint_id: String,
    pub commit_message: String,
    pub commit_hash: String,
}
