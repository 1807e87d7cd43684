//! The user prompt tool.

use std::time::Duration;

use anyhow::Result;

use super::{Tool, ToolCtx, ToolDocs};

/// How long a prompt waits before the environment gives up. Prompts are
/// answered by a human, so this is generous.
const PROMPT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Asks the user a question and blocks until they answer.
///
/// An optional second argument is a commit message: the dispatcher takes a
/// checkpoint before the question is asked.
pub struct AskUserTool;

impl Tool for AskUserTool {
    fn name(&self) -> &'static str {
        "ask_user"
    }

    fn docs(&self) -> ToolDocs {
        ToolDocs {
            signature: "ask_user \"<question>\" [\"<commit message>\"]".to_string(),
            manpage: "NAME\n    ask_user - ask the user a question and wait for \
                      their reply\n\nDESCRIPTION\n    Blocks until the user \
                      answers. When a commit message is given as the second \
                      argument, the session records a checkpoint before asking."
                .to_string(),
            brief: "Ask the user a question and wait for the reply.".to_string(),
        }
    }

    fn call(&self, ctx: &mut ToolCtx<'_>, args: &[String]) -> Result<String> {
        let question = args.first().map(String::as_str).unwrap_or_default();
        let (answer, _exit_code) = ctx.environment.execute(question, PROMPT_TIMEOUT)?;
        Ok(answer)
    }
}
