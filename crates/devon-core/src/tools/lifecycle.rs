//! Lifecycle tools.

use anyhow::Result;

use super::{Tool, ToolCtx, ToolDocs};

/// Does nothing. Lets the agent spend a turn thinking.
pub struct NoOpTool;

impl Tool for NoOpTool {
    fn name(&self) -> &'static str {
        "no_op"
    }

    fn docs(&self) -> ToolDocs {
        ToolDocs {
            signature: "no_op".to_string(),
            manpage: "NAME\n    no_op - do nothing for one turn".to_string(),
            brief: "Do nothing for one turn.".to_string(),
        }
    }

    fn call(&self, _ctx: &mut ToolCtx<'_>, _args: &[String]) -> Result<String> {
        Ok("No operation performed.".to_string())
    }
}
