//! Agent scratch state.
//!
//! Checkpoints snapshot this state as a JSON round-trip, so everything in
//! it must serialize losslessly.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default page size for editor-style paging tools.
const PAGE_SIZE: usize = 200;

/// An open file tracked for the editor surface. Buffers are refreshed from
/// disk before every model call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBuffer {
    pub lines: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorState {
    #[serde(default)]
    pub files: BTreeMap<String, FileBuffer>,
}

/// Mutable per-session scratch shared with every tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub page_size: usize,
    #[serde(default)]
    pub editor: EditorState,
    /// Open bag for tool scratch data.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scratch: BTreeMap<String, Value>,
}

impl SessionState {
    pub fn init() -> Self {
        Self {
            page_size: PAGE_SIZE,
            ..Self::default()
        }
    }

    /// Deep snapshot for checkpointing.
    pub fn to_snapshot(&self) -> Result<Value> {
        serde_json::to_value(self).context("snapshot session state")
    }

    pub fn from_snapshot(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).context("restore session state")
    }
}
