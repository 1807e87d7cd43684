//! Session configuration.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use devon_types::Checkpoint;

use crate::envs::EnvironmentRecord;
use crate::state::SessionState;

/// Metadata key under which the user's branch is recorded once the git
/// bootstrap has discovered it.
pub const USER_BRANCH_KEY: &str = "user_branch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersioningKind {
    Git,
    #[default]
    None,
}

/// Settings for the reasoning collaborator. The concrete agent lives
/// outside this crate; these fields are handed to it on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_name: String,
    pub agent_type: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_type: Option<String>,
    #[serde(default)]
    pub temperature: f32,
}

/// Durable session settings plus the checkpoint list and scratch state.
///
/// Runtime environments live on the [`Session`](crate::session::Session);
/// `environments` holds their serialized records so a persisted session can
/// be reconstructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentRecord>,
    #[serde(default = "default_environment_name")]
    pub default_environment: String,
    #[serde(default)]
    pub agent_configs: Vec<AgentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub versioning_type: VersioningKind,
    #[serde(default)]
    pub versioning_metadata: HashMap<String, String>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub state: SessionState,
    #[serde(default)]
    pub exclude_files: Vec<String>,
    #[serde(default)]
    pub ignore_files: bool,
    /// Overrides the `.devonignore` file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devon_ignore_file: Option<String>,
    #[serde(default = "default_true")]
    pub persist_to_db: bool,
}

fn default_environment_name() -> String {
    "local".to_string()
}

fn default_true() -> bool {
    true
}

impl SessionConfig {
    /// Minimal config for a session rooted at `path`.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            environments: BTreeMap::new(),
            default_environment: default_environment_name(),
            agent_configs: Vec::new(),
            task: None,
            versioning_type: VersioningKind::None,
            versioning_metadata: HashMap::new(),
            checkpoints: Vec::new(),
            state: SessionState::init(),
            exclude_files: Vec::new(),
            ignore_files: false,
            devon_ignore_file: None,
            persist_to_db: false,
        }
    }

    #[must_use]
    pub fn with_versioning(mut self, kind: VersioningKind) -> Self {
        self.versioning_type = kind;
        self
    }

    #[must_use]
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// The user's branch, once the git bootstrap has recorded it.
    pub fn user_branch(&self) -> Option<&str> {
        self.versioning_metadata
            .get(USER_BRANCH_KEY)
            .map(String::as_str)
    }

    pub fn set_user_branch(&mut self, branch: impl Into<String>) {
        self.versioning_metadata
            .insert(USER_BRANCH_KEY.to_string(), branch.into());
    }

    /// The ignore-file name to look for under `path`.
    pub fn ignore_file_name(&self) -> &str {
        self.devon_ignore_file.as_deref().unwrap_or(".devonignore")
    }
}
