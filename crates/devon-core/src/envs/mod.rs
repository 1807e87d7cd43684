//! Execution environments and tool routing.
//!
//! An environment owns a tool table and an execution channel. Tool lookup
//! is global: the first environment whose table contains the name wins; a
//! miss falls back to the default environment's default tool.

pub mod editor;
pub mod shell;
pub mod user;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use devon_types::{EventLog, StatusCell};

use crate::tools::{Tool, ToolTable};

pub use editor::{MorphAciEnvironment, VsCodeEnvironment};
pub use shell::{LocalShellEnvironment, ShellExited, ShellTimeout, TempDirShellEnvironment};
pub use user::UserEnvironment;

pub trait Environment: Send {
    fn name(&self) -> &str;

    fn setup(&mut self) -> Result<()>;

    fn teardown(&mut self) -> Result<()>;

    /// Runs `input` through the environment's channel, returning the
    /// produced text and an exit code.
    fn execute(&mut self, input: &str, timeout: Duration) -> Result<(String, i32)>;

    fn tools(&self) -> &ToolTable;

    fn tools_mut(&mut self) -> &mut ToolTable;

    fn default_tool(&self) -> Option<Arc<dyn Tool>> {
        None
    }

    /// Installs the default tool. Environments without a fallback channel
    /// ignore it.
    fn set_default_tool(&mut self, _tool: Arc<dyn Tool>) {}

    /// Serialized record for the persisted session document.
    fn record(&mut self) -> EnvironmentRecord;

    /// Wires shared session handles into the environment. The default
    /// implementation ignores them; the user environment needs both.
    fn attach(&mut self, _event_log: EventLog, _status: StatusCell) {}
}

/// Discriminated environment records, one per environment kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EnvironmentRecord {
    LocalShellEnvironment {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_dir: Option<PathBuf>,
    },
    TempDirShellEnvironment {
        path: PathBuf,
        #[serde(default)]
        seed_paths: Vec<PathBuf>,
    },
    UserEnvironment,
    VSCodeEnvironment {
        endpoint: String,
    },
    MorphACIEnvironment,
}

impl EnvironmentRecord {
    /// Reconstructs a live environment from its record. Tools are
    /// re-registered by the session, not stored in the record.
    pub fn hydrate(&self) -> Box<dyn Environment> {
        match self {
            EnvironmentRecord::LocalShellEnvironment { path, .. } => {
                Box::new(LocalShellEnvironment::new(path.clone()))
            }
            EnvironmentRecord::TempDirShellEnvironment { path, seed_paths } => Box::new(
                TempDirShellEnvironment::from_record(path.clone(), seed_paths.clone()),
            ),
            EnvironmentRecord::UserEnvironment => Box::new(UserEnvironment::new()),
            EnvironmentRecord::VSCodeEnvironment { endpoint } => {
                Box::new(VsCodeEnvironment::new(endpoint.clone()))
            }
            EnvironmentRecord::MorphACIEnvironment => Box::new(MorphAciEnvironment::new()),
        }
    }
}

/// Ordered, named set of environments. Routing scans in insertion order.
#[derive(Default)]
pub struct EnvironmentSet {
    entries: Vec<(String, Box<dyn Environment>)>,
}

impl EnvironmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an environment under `name`, replacing any previous holder of
    /// the name in place.
    pub fn insert(&mut self, name: impl Into<String>, env: Box<dyn Environment>) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = env;
        } else {
            self.entries.push((name, env));
        }
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn Environment>> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, env)| env)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    pub fn at_mut(&mut self, index: usize) -> &mut Box<dyn Environment> {
        &mut self.entries[index].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Environment)> {
        self.entries
            .iter()
            .map(|(name, env)| (name.as_str(), env.as_ref()))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Box<dyn Environment>)> {
        self.entries
            .iter_mut()
            .map(|(name, env)| (name.as_str(), env))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the first environment whose table contains `toolname`.
    pub fn route(&self, toolname: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(_, env)| env.tools().contains(toolname))
    }

    /// All registered tool names across environments.
    pub fn tool_names(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .flat_map(|(_, env)| env.tools().names())
            .collect()
    }

    pub fn records(&mut self) -> BTreeMap<String, EnvironmentRecord> {
        self.entries
            .iter_mut()
            .map(|(name, env)| (name.clone(), env.record()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_discriminators() {
        let record = EnvironmentRecord::LocalShellEnvironment {
            path: PathBuf::from("/work"),
            cwd: None,
            old_dir: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "LocalShellEnvironment");
        assert_eq!(value["path"], "/work");

        let value = serde_json::to_value(EnvironmentRecord::UserEnvironment).unwrap();
        assert_eq!(value["type"], "UserEnvironment");

        let value = serde_json::to_value(EnvironmentRecord::MorphACIEnvironment).unwrap();
        assert_eq!(value["type"], "MorphACIEnvironment");
    }

    #[test]
    fn test_record_round_trip() {
        let record = EnvironmentRecord::VSCodeEnvironment {
            endpoint: "http://localhost:4592".to_string(),
        };
        let text = serde_json::to_string(&record).unwrap();
        let parsed: EnvironmentRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_routing_prefers_first_registration() {
        use crate::tools::lifecycle::NoOpTool;
        use std::sync::Arc;

        let mut set = EnvironmentSet::new();
        let mut first = UserEnvironment::new();
        first.tools_mut().register(Arc::new(NoOpTool));
        let mut second = UserEnvironment::new();
        second.tools_mut().register(Arc::new(NoOpTool));

        set.insert("first", Box::new(first));
        set.insert("second", Box::new(second));

        assert_eq!(set.route("no_op"), Some(0));
        assert_eq!(set.route("missing"), None);
    }
}
