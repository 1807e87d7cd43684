//! The session orchestrator.
//!
//! One session is one agent run rooted at a working directory, with its
//! own event log and checkpoint list. The orchestrator owns setup and
//! teardown, the pause/start/terminate lifecycle, and the event loop that
//! pumps the log through the dispatcher.

mod bootstrap;
mod checkpoints;
mod dispatch;

pub use checkpoints::FileDiff;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use devon_types::{Event, EventLog, EventPayload, SessionStatus, StatusCell, StopKind};

use crate::agent::Agent;
use crate::config::SessionConfig;
use crate::envs::{EnvironmentSet, LocalShellEnvironment, UserEnvironment};
use crate::persist::{SessionDoc, SessionStore};
use crate::state::SessionState;
use crate::tools::files::GetCwdTool;
use crate::tools::lifecycle::NoOpTool;
use crate::tools::shell::ShellTool;
use crate::tools::user::AskUserTool;
use crate::tools::{Tool, ToolCtx};
use crate::versioning::GitVersioning;

/// Task used when the user has not said what to do.
pub const UNSPECIFIED_TASK: &str = "Task unspecified ask user to specify task";

/// Task seeded after the agent submits its work.
pub const COMPLETION_TASK: &str =
    "You have completed your task, ask user for revisions or a new one.";

/// Task seeded when a corrupted session is re-initialized.
pub const NEW_TASK_PROMPT: &str = "ask user for what to do";

/// Seeded observation when a persisted session resumes.
const RESUME_PROMPT: &str = "Your interaction with the user was paused, please resume.";

/// Sleep while the session is paused.
const PAUSE_POLL: Duration = Duration::from_secs(2);

/// Minimum spacing between persisted snapshots.
const PERSIST_DEBOUNCE: Duration = Duration::from_millis(250);

/// Documentation for one tool, as handed to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDoc {
    pub signature: String,
    pub docstring: String,
}

pub struct Session {
    pub config: SessionConfig,
    pub environments: EnvironmentSet,
    pub versioning: GitVersioning,
    pub event_log: EventLog,
    pub status: StatusCell,
    pub(crate) agent: Box<dyn Agent>,
    pub(crate) cursor: usize,
    store: Option<Box<dyn SessionStore>>,
    last_persist: Option<Instant>,
    loaded: bool,
}

impl Session {
    /// Builds a session over `event_log`. Environments are hydrated from
    /// the config records; `local` and `user` are always present, with the
    /// shell tool as the local default.
    pub fn new(config: SessionConfig, agent: Box<dyn Agent>, event_log: EventLog) -> Self {
        let status = StatusCell::new(SessionStatus::Paused);

        let mut environments = EnvironmentSet::new();
        for (name, record) in &config.environments {
            environments.insert(name.clone(), record.hydrate());
        }
        if environments.index_of("local").is_none() {
            environments.insert(
                "local",
                Box::new(LocalShellEnvironment::new(config.path.clone())),
            );
        }
        if environments.index_of("user").is_none() {
            environments.insert("user", Box::new(UserEnvironment::new()));
        }

        if let Some(local) = environments.get_mut("local") {
            local.tools_mut().register(Arc::new(GetCwdTool));
            local.tools_mut().register(Arc::new(NoOpTool));
            local.set_default_tool(Arc::new(ShellTool));
        }
        if let Some(user) = environments.get_mut("user") {
            user.tools_mut().register(Arc::new(AskUserTool));
        }
        for (_, env) in environments.iter_mut() {
            env.attach(event_log.clone(), status.clone());
        }

        let versioning = GitVersioning::new(config.path.clone(), config.versioning_type);

        Self {
            config,
            environments,
            versioning,
            event_log,
            status,
            agent,
            cursor: 0,
            store: None,
            last_persist: None,
            loaded: false,
        }
    }

    /// Reconstructs a persisted session and seeds the resume prompt.
    pub fn from_doc(doc: SessionDoc, agent: Box<dyn Agent>) -> Self {
        let event_log = EventLog::from_events(doc.event_history);
        let mut session = Self::new(doc.config, agent, event_log);
        session.cursor = session.event_log.len();
        // Editor buffers are re-read from disk, not trusted from the doc.
        session.config.state.editor.files.clear();
        session.loaded = true;
        session.event_log.append(Event::new(
            EventPayload::ModelRequest(RESUME_PROMPT.to_string()),
            "system",
            "devon",
        ));
        session
    }

    #[must_use]
    pub fn with_store(mut self, store: Box<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn agent_name(&self) -> String {
        self.agent.name().to_string()
    }

    /// Resets scratch state and replaces the log with a fresh new-task seed.
    pub fn init_state(&mut self) {
        self.config.state = SessionState::init();
        self.config.task = None;
        self.status.set(SessionStatus::Paused);
        self.cursor = 0;
        self.agent.reset();
        self.event_log.replace(Vec::new());
        self.event_log.append(Event::new(
            EventPayload::Task(Some(NEW_TASK_PROMPT.to_string())),
            "system",
            "devon",
        ));
    }

    pub fn get_last_task(&self) -> String {
        self.config
            .state
            .task
            .clone()
            .unwrap_or_else(|| UNSPECIFIED_TASK.to_string())
    }

    pub fn get_status(&self) -> SessionStatus {
        self.status.get()
    }

    pub fn pause(&self) {
        if self.status.is_stopping() {
            return;
        }
        self.status.set(SessionStatus::Paused);
    }

    pub fn start(&self) {
        self.status.set(SessionStatus::Running);
    }

    /// Requests termination and blocks until the loop observes it. Only
    /// meaningful while [`run_event_loop`](Self::run_event_loop) is running
    /// on another thread.
    pub fn terminate(&self) {
        if self.status.get() == SessionStatus::Terminated {
            return;
        }
        self.status.set(SessionStatus::Terminating);
        while self.status.get() != SessionStatus::Terminated {
            thread::sleep(Duration::from_millis(100));
        }
    }

    /// Prepares every environment and tool, then loads ignore patterns.
    pub fn setup(&mut self) -> Result<()> {
        self.config.state.task = self.config.task.clone();
        self.status.set(SessionStatus::Paused);

        for i in 0..self.environments.len() {
            let env = self.environments.at_mut(i);
            env.setup()?;
            let tools: Vec<Arc<dyn Tool>> =
                env.tools().iter().map(|e| Arc::clone(&e.tool)).collect();
            let SessionConfig {
                state,
                path,
                exclude_files,
                ..
            } = &mut self.config;
            let mut ctx = ToolCtx {
                environment: &mut **env,
                state,
                event_log: &self.event_log,
                raw_command: "",
                path,
                exclude_files,
            };
            for tool in tools {
                tool.setup(&mut ctx)?;
            }
        }

        if self.config.ignore_files {
            let ignore_path = self.config.path.join(self.config.ignore_file_name());
            if let Some(patterns) = read_ignore_patterns(&ignore_path) {
                self.config.exclude_files.extend(patterns);
            }
        }
        Ok(())
    }

    /// Tears environments down and hands the repo back to the user branch.
    /// The agent branch is deleted best-effort; on failure it is left stale.
    pub fn teardown(&mut self) -> Result<()> {
        for i in 0..self.environments.len() {
            let env = self.environments.at_mut(i);
            let tools: Vec<Arc<dyn Tool>> =
                env.tools().iter().map(|e| Arc::clone(&e.tool)).collect();
            let SessionConfig {
                state,
                path,
                exclude_files,
                ..
            } = &mut self.config;
            let mut ctx = ToolCtx {
                environment: &mut **env,
                state,
                event_log: &self.event_log,
                raw_command: "",
                path,
                exclude_files,
            };
            for tool in tools {
                if let Err(e) = tool.cleanup(&mut ctx) {
                    warn!(error = %e, "tool cleanup failed");
                }
            }
            env.teardown()?;
        }

        if self.versioning.enabled()
            && let Some(user_branch) = self.config.user_branch().map(str::to_string)
        {
            let (code, text) = self.versioning.switch_branch(&user_branch);
            if code == 0 {
                let (code, text) = self
                    .versioning
                    .delete_branch(crate::versioning::AGENT_BRANCH);
                if code != 0 {
                    warn!(%text, "agent branch left stale");
                }
            } else {
                warn!(%text, "could not switch back to the user branch");
            }
        }
        Ok(())
    }

    /// All tool names across environments.
    pub fn available_actions(&self) -> Vec<&'static str> {
        self.environments.tool_names()
    }

    /// Tool documentation in the requested format, keyed by tool name.
    pub fn generate_command_docs(&self, format: &str) -> BTreeMap<String, CommandDoc> {
        let mut docs = BTreeMap::new();
        for (_, env) in self.environments.iter() {
            for entry in env.tools().iter() {
                let tool_docs = entry.tool.docs();
                docs.insert(
                    entry.tool.name().to_string(),
                    CommandDoc {
                        signature: tool_docs.signature.clone(),
                        docstring: tool_docs.for_format(format).to_string(),
                    },
                );
            }
        }
        docs
    }

    /// Serializes the session for persistence.
    pub fn to_doc(&mut self) -> SessionDoc {
        let mut config = self.config.clone();
        config.environments = self.environments.records();
        SessionDoc {
            config,
            event_history: self.event_log.snapshot(),
        }
    }

    /// Best-effort debounced save through the configured store.
    pub(crate) fn persist(&mut self) {
        if !self.config.persist_to_db || self.store.is_none() {
            return;
        }
        if let Some(last) = self.last_persist
            && last.elapsed() < PERSIST_DEBOUNCE
        {
            return;
        }
        let doc = self.to_doc();
        let name = self.config.name.clone();
        if let Some(store) = &self.store
            && let Err(e) = store.save(&name, &doc)
        {
            warn!(error = %e, "failed to persist session");
        }
        self.last_persist = Some(Instant::now());
    }

    /// Deletes the persisted document, if any.
    pub fn delete_persisted(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.delete(&self.config.name)?;
        }
        Ok(())
    }

    /// Pumps the event log until quiescence or termination.
    ///
    /// Runs the git bootstrap first when versioning is enabled. Every
    /// event's produced events are appended before the cursor advances, so
    /// replay after a revert is deterministic.
    pub fn run_event_loop(&mut self) -> Result<()> {
        if self.versioning.enabled() {
            if self.loaded {
                self.bootstrap_load()?;
            } else {
                self.bootstrap_new()?;
            }
        }

        loop {
            if self.cursor >= self.event_log.len() {
                break;
            }
            if self.status.get() == SessionStatus::Terminating {
                break;
            }
            if self.status.get() == SessionStatus::Paused {
                thread::sleep(PAUSE_POLL);
                continue;
            }

            let Some(event) = self.event_log.get(self.cursor) else {
                break;
            };

            if let EventPayload::Stop(stop) = &event.payload {
                if stop.kind == StopKind::Submit {
                    self.config.state.task = Some(COMPLETION_TASK.to_string());
                    self.event_log.append(Event::new(
                        EventPayload::Task(Some(COMPLETION_TASK.to_string())),
                        "system",
                        "devon",
                    ));
                } else {
                    info!(kind = ?stop.kind, message = %stop.message, "session stopping");
                    break;
                }
            }

            let produced = self.step_event(&event);
            self.event_log.extend(produced);
            self.cursor += 1;
        }

        self.status.set(SessionStatus::Terminated);
        Ok(())
    }
}

/// Reads ignore patterns, skipping blanks and `#` comments. `None` when
/// the file does not exist or cannot be read.
fn read_ignore_patterns(path: &Path) -> Option<Vec<String>> {
    let text = fs::read_to_string(path).ok()?;
    Some(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(String::from)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ignore_patterns_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".devonignore");
        fs::write(&path, "# build output\ntarget/\n\n*.log\n").unwrap();

        let patterns = read_ignore_patterns(&path).unwrap();
        assert_eq!(patterns, vec!["target/", "*.log"]);
    }

    #[test]
    fn test_read_ignore_patterns_missing_file() {
        assert!(read_ignore_patterns(Path::new("/nonexistent/.devonignore")).is_none());
    }
}
