//! Editor RPC environments.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tracing::warn;

use super::{Environment, EnvironmentRecord};
use crate::tools::ToolTable;

const DEFAULT_ENDPOINT: &str = "http://localhost:4592";

/// Talks to a VS Code extension over a local HTTP endpoint.
///
/// `execute` input is `<action> [json params]`; the environment posts
/// `{action, params}` and returns the response body. A non-2xx status maps
/// to exit code 1 so callers can treat it like a failed command.
pub struct VsCodeEnvironment {
    endpoint: String,
    client: reqwest::blocking::Client,
    tools: ToolTable,
}

impl VsCodeEnvironment {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::blocking::Client::new(),
            tools: ToolTable::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.client
            .get(&self.endpoint)
            .timeout(Duration::from_secs(2))
            .send()
            .is_ok_and(|response| response.status().is_success())
    }
}

impl Default for VsCodeEnvironment {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl Environment for VsCodeEnvironment {
    fn name(&self) -> &str {
        "vscode"
    }

    fn setup(&mut self) -> Result<()> {
        if !self.is_online() {
            warn!(endpoint = %self.endpoint, "editor RPC endpoint is not reachable");
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, input: &str, timeout: Duration) -> Result<(String, i32)> {
        let (action, params_text) = match input.split_once(char::is_whitespace) {
            Some((action, rest)) => (action, rest.trim()),
            None => (input, ""),
        };
        let params: Value = if params_text.is_empty() {
            json!({})
        } else {
            serde_json::from_str(params_text).context("editor RPC params are not valid JSON")?
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&json!({"action": action, "params": params}))
            .send()
            .with_context(|| format!("post to editor RPC endpoint {}", self.endpoint))?;

        let exit_code = i32::from(!response.status().is_success());
        let body = response.text().context("read editor RPC response")?;
        Ok((body, exit_code))
    }

    fn tools(&self) -> &ToolTable {
        &self.tools
    }

    fn tools_mut(&mut self) -> &mut ToolTable {
        &mut self.tools
    }

    fn record(&mut self) -> EnvironmentRecord {
        EnvironmentRecord::VSCodeEnvironment {
            endpoint: self.endpoint.clone(),
        }
    }
}

/// Placeholder for the Morph ACI surface; serializes for round-tripping
/// but has no transport wired up.
#[derive(Default)]
pub struct MorphAciEnvironment {
    tools: ToolTable,
}

impl MorphAciEnvironment {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Environment for MorphAciEnvironment {
    fn name(&self) -> &str {
        "morph"
    }

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, _input: &str, _timeout: Duration) -> Result<(String, i32)> {
        bail!("morph environment has no transport configured")
    }

    fn tools(&self) -> &ToolTable {
        &self.tools
    }

    fn tools_mut(&mut self) -> &mut ToolTable {
        &mut self.tools
    }

    fn record(&mut self) -> EnvironmentRecord {
        EnvironmentRecord::MorphACIEnvironment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_endpoint_reports_offline() {
        // Port 9 is the discard port; nothing is listening on it.
        let env = VsCodeEnvironment::new("http://127.0.0.1:9");
        assert!(!env.is_online());
    }

    #[test]
    fn test_morph_execute_is_an_error() {
        let mut env = MorphAciEnvironment::new();
        assert!(env.execute("anything", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_records() {
        let mut vscode = VsCodeEnvironment::default();
        assert_eq!(
            vscode.record(),
            EnvironmentRecord::VSCodeEnvironment {
                endpoint: DEFAULT_ENDPOINT.to_string(),
            }
        );
        let mut morph = MorphAciEnvironment::new();
        assert_eq!(morph.record(), EnvironmentRecord::MorphACIEnvironment);
    }
}
