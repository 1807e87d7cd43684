//! The default shell tool.

use std::time::Duration;

use anyhow::Result;

use super::{Tool, ToolCtx, ToolDocs};

/// Default deadline for one shell command.
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(25);

/// Runs the raw command in the owning environment's interactive shell.
///
/// This is the default tool: unknown tool names fall through to it with the
/// unparsed action text, so anything bash understands works unregistered.
pub struct ShellTool;

impl Tool for ShellTool {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn docs(&self) -> ToolDocs {
        ToolDocs {
            signature: "<command> [args ...]".to_string(),
            manpage: "NAME\n    shell - run a command in the session shell\n\n\
                      DESCRIPTION\n    Executes the command in the long-lived \
                      interactive shell. Environment variables and the working \
                      directory persist between commands. Output is the combined \
                      stdout and stderr of the command."
                .to_string(),
            brief: "Run a command in the session shell.".to_string(),
        }
    }

    fn call(&self, ctx: &mut ToolCtx<'_>, args: &[String]) -> Result<String> {
        let command = if ctx.raw_command.is_empty() {
            args.join(" ")
        } else {
            ctx.raw_command.to_string()
        };
        let (output, _exit_code) = ctx.environment.execute(&command, SHELL_TIMEOUT)?;
        Ok(output)
    }
}
