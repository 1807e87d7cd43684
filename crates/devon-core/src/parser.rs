//! Tool-command parsing.
//!
//! Converts the model's `action` text into `(toolname, args)`. The grammar
//! is shell-ish: whitespace-separated tokens with single/double quoting, so
//! commit messages and prompts survive as single arguments. Errors carry a
//! message written for the model to read and correct.

use std::error::Error;
use std::fmt;

/// The action text violated the command grammar.
#[derive(Debug)]
pub struct ParseCommandError {
    message: String,
}

impl ParseCommandError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ParseCommandError {}

/// True for tokens that can name a tool or an executable: path-ish
/// identifiers, no shell metacharacters.
fn is_valid_toolname(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
}

/// Splits the model's action text into a tool name and arguments.
pub fn parse_command(text: &str) -> Result<(String, Vec<String>), ParseCommandError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseCommandError::new(
            "Failed to parse command: the command was empty, please follow the specified format",
        ));
    }

    let tokens = shlex::split(trimmed).ok_or_else(|| {
        ParseCommandError::new(
            "Failed to parse command: unbalanced quote or trailing backslash, \
             please follow the specified format",
        )
    })?;

    let mut tokens = tokens.into_iter();
    let toolname = tokens.next().ok_or_else(|| {
        ParseCommandError::new(
            "Failed to parse command: the command was empty, please follow the specified format",
        )
    })?;

    if !is_valid_toolname(&toolname) {
        return Err(ParseCommandError::new(format!(
            "Failed to parse command: '{toolname}' is not a valid command name, \
             please follow the specified format"
        )));
    }

    Ok((toolname, tokens.collect()))
}
