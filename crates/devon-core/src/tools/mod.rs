//! Tool system.
//!
//! Tools are capability records: setup/cleanup lifecycle, a callable, and
//! structured docstring metadata the agent reads. Each environment owns a
//! table of them; the default environment additionally owns a default tool
//! (the shell) that unknown tool names fall through to.

pub mod files;
pub mod lifecycle;
pub mod shell;
pub mod user;

use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use devon_types::EventLog;

use crate::envs::Environment;
use crate::state::SessionState;

/// Context bag handed to every tool invocation.
pub struct ToolCtx<'a> {
    /// The environment that owns the tool being invoked.
    pub environment: &'a mut dyn Environment,
    pub state: &'a mut SessionState,
    pub event_log: &'a EventLog,
    /// The unparsed action text.
    pub raw_command: &'a str,
    /// Session working directory.
    pub path: &'a Path,
    pub exclude_files: &'a [String],
}

/// Structured docstring metadata exposed to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDocs {
    pub signature: String,
    pub manpage: String,
    pub brief: String,
}

impl ToolDocs {
    pub fn for_format(&self, format: &str) -> &str {
        match format {
            "manpage" => &self.manpage,
            _ => &self.brief,
        }
    }
}

pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn setup(&self, _ctx: &mut ToolCtx<'_>) -> Result<()> {
        Ok(())
    }

    fn cleanup(&self, _ctx: &mut ToolCtx<'_>) -> Result<()> {
        Ok(())
    }

    fn docs(&self) -> ToolDocs;

    fn call(&self, ctx: &mut ToolCtx<'_>, args: &[String]) -> Result<String>;
}

/// Hook run after a successful invocation, receiving the response text.
pub type PostHook = Arc<dyn Fn(&mut ToolCtx<'_>, &str) -> Result<()> + Send + Sync>;

pub struct ToolEntry {
    pub tool: Arc<dyn Tool>,
    pub post_hooks: Vec<PostHook>,
}

/// Ordered tool table owned by an environment.
#[derive(Default)]
pub struct ToolTable {
    entries: Vec<ToolEntry>,
}

impl ToolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.tool.name() == tool.name()) {
            entry.tool = tool;
        } else {
            self.entries.push(ToolEntry {
                tool,
                post_hooks: Vec::new(),
            });
        }
    }

    /// Attaches a post-hook to a registered tool. Hooks run in
    /// registration order. Returns false when the tool is unknown.
    pub fn register_post_hook(&mut self, toolname: &str, hook: PostHook) -> bool {
        match self.entries.iter_mut().find(|e| e.tool.name() == toolname) {
            Some(entry) => {
                entry.post_hooks.push(hook);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, toolname: &str) -> Option<&ToolEntry> {
        self.entries.iter().find(|e| e.tool.name() == toolname)
    }

    pub fn contains(&self, toolname: &str) -> bool {
        self.get(toolname).is_some()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.tool.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolEntry> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ToolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolTable")
            .field("tools", &self.names())
            .finish()
    }
}

/// No environment's table knows the requested tool.
#[derive(Debug)]
pub struct ToolNotFound {
    pub toolname: String,
}

impl fmt::Display for ToolNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tool '{}' not found in any environment", self.toolname)
    }
}

impl Error for ToolNotFound {}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTool(&'static str);

    impl Tool for FakeTool {
        fn name(&self) -> &'static str {
            self.0
        }

        fn docs(&self) -> ToolDocs {
            ToolDocs {
                signature: format!("{}()", self.0),
                manpage: String::new(),
                brief: String::new(),
            }
        }

        fn call(&self, _ctx: &mut ToolCtx<'_>, _args: &[String]) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn test_register_keeps_order_and_replaces_by_name() {
        let mut table = ToolTable::new();
        table.register(Arc::new(FakeTool("alpha")));
        table.register(Arc::new(FakeTool("beta")));
        table.register(Arc::new(FakeTool("alpha")));

        assert_eq!(table.names(), vec!["alpha", "beta"]);
        assert!(table.contains("beta"));
        assert!(!table.contains("gamma"));
    }

    #[test]
    fn test_post_hook_requires_registered_tool() {
        let mut table = ToolTable::new();
        table.register(Arc::new(FakeTool("alpha")));

        let hook: PostHook = Arc::new(|_, _| Ok(()));
        assert!(table.register_post_hook("alpha", Arc::clone(&hook)));
        assert!(!table.register_post_hook("missing", hook));
        assert_eq!(table.get("alpha").unwrap().post_hooks.len(), 1);
    }

    #[test]
    fn test_tool_not_found_message() {
        let err = ToolNotFound {
            toolname: "foobar".to_string(),
        };
        assert!(err.to_string().contains("foobar"));
    }
}
