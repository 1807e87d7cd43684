//! File-system helper tools.

use anyhow::Result;

use super::{Tool, ToolCtx, ToolDocs};
use crate::tools::shell::SHELL_TIMEOUT;

/// Reports the shell's current working directory.
pub struct GetCwdTool;

impl Tool for GetCwdTool {
    fn name(&self) -> &'static str {
        "get_cwd"
    }

    fn docs(&self) -> ToolDocs {
        ToolDocs {
            signature: "get_cwd".to_string(),
            manpage: "NAME\n    get_cwd - print the current working directory of \
                      the session shell"
                .to_string(),
            brief: "Print the shell's current working directory.".to_string(),
        }
    }

    fn call(&self, ctx: &mut ToolCtx<'_>, _args: &[String]) -> Result<String> {
        let (output, _exit_code) = ctx.environment.execute("pwd", SHELL_TIMEOUT)?;
        Ok(output.trim().to_string())
    }
}
