//! Event dispatch.
//!
//! One step per event: each handler returns the events it produced, which
//! the loop appends contiguously before the cursor advances. Recoverable
//! failures become `ToolResponse`s the agent can react to; anything that
//! escapes a handler becomes an `Error` event and stops the session.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use devon_types::{Event, EventPayload, SessionStatus, StopContent, StopKind, ToolCall};

use crate::agent::{ERROR_ACTION, HALLUCINATION_ACTION};
use crate::config::SessionConfig;
use crate::parser::parse_command;
use crate::tools::shell::SHELL_TIMEOUT;
use crate::tools::{PostHook, Tool, ToolCtx, ToolNotFound};

use super::Session;

impl Session {
    /// Dispatches one event. `Stop` is handled by the loop itself; event
    /// types this dispatcher does not know are ignored.
    pub(crate) fn step_event(&mut self, event: &Event) -> Vec<Event> {
        let result = match &event.payload {
            EventPayload::Task(content) => self.handle_task(event, content.as_deref()),
            EventPayload::ModelRequest(content) => self.handle_model_request(event, content),
            EventPayload::ModelResponse(content) => self.handle_model_response(event, content),
            EventPayload::ToolRequest(call) => self.handle_tool_request(event, call),
            EventPayload::ToolResponse(content) => Ok(vec![Event::new(
                EventPayload::ModelRequest(content.clone()),
                event.producer.clone(),
                event.consumer.clone(),
            )]),
            EventPayload::RateLimit(content) => self.handle_rate_limit(event, content),
            EventPayload::Interrupt(content) => {
                self.handle_interrupt(content);
                Ok(Vec::new())
            }
            EventPayload::Error(content) => Ok(vec![Event::new(
                EventPayload::Stop(StopContent {
                    kind: StopKind::Error,
                    message: content.clone(),
                }),
                event.producer.clone(),
                "user",
            )]),
            _ => Ok(Vec::new()),
        };

        match result {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, kind = event.kind(), "event handler failed");
                vec![Event::new(
                    EventPayload::Error(e.to_string()),
                    "system",
                    "user",
                )]
            }
        }
    }

    fn handle_task(&mut self, event: &Event, content: Option<&str>) -> Result<Vec<Event>> {
        let task = content.unwrap_or(super::UNSPECIFIED_TASK);
        info!(task, "task received");
        self.config.state.task = Some(task.to_string());
        Ok(vec![Event::new(
            EventPayload::ModelRequest(String::new()),
            event.producer.clone(),
            event.consumer.clone(),
        )])
    }

    fn handle_model_request(&mut self, event: &Event, content: &str) -> Result<Vec<Event>> {
        self.persist();
        self.refresh_editor_buffers();

        let task = self.get_last_task();
        let prediction = self.agent.predict(&task, content)?;

        match prediction.action.as_str() {
            HALLUCINATION_ACTION => Ok(vec![Event::new(
                EventPayload::ModelRequest(prediction.output),
                self.agent_name(),
                event.producer.clone(),
            )]),
            ERROR_ACTION => Ok(Vec::new()),
            _ => {
                let body = json!({
                    "thought": prediction.thought,
                    "action": prediction.action,
                    "output": prediction.output,
                })
                .to_string();
                Ok(vec![Event::new(
                    EventPayload::ModelResponse(body),
                    self.agent_name(),
                    event.producer.clone(),
                )])
            }
        }
    }

    /// Re-reads every open editor buffer from disk through the default
    /// environment, so the model never sees stale file contents.
    fn refresh_editor_buffers(&mut self) {
        let files: Vec<String> = self.config.state.editor.files.keys().cloned().collect();
        if files.is_empty() {
            return;
        }
        let Some(index) = self.environments.index_of(&self.config.default_environment) else {
            return;
        };

        for file in files {
            let quoted = shlex::try_quote(&file)
                .map(|q| q.into_owned())
                .unwrap_or_else(|_| file.clone());
            let env = self.environments.at_mut(index);
            match env.execute(&format!("cat {quoted}"), SHELL_TIMEOUT) {
                Ok((text, 0)) => {
                    if let Some(buffer) = self.config.state.editor.files.get_mut(&file) {
                        buffer.lines = text;
                    }
                }
                Ok((_, code)) => warn!(%file, code, "editor buffer refresh failed"),
                Err(e) => warn!(%file, error = %e, "editor buffer refresh failed"),
            }
        }
    }

    fn handle_model_response(&mut self, event: &Event, content: &str) -> Result<Vec<Event>> {
        let value: Value =
            serde_json::from_str(content).context("model response is not valid JSON")?;
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .context("model response has no action field")?;

        match parse_command(action) {
            Ok((toolname, args)) => Ok(vec![Event::new(
                EventPayload::ToolRequest(ToolCall {
                    toolname,
                    args,
                    raw_command: action.to_string(),
                }),
                event.producer.clone(),
                event.consumer.clone(),
            )]),
            Err(parse_error) => Ok(vec![Event::new(
                EventPayload::ToolResponse(parse_error.to_string()),
                event.producer.clone(),
                event.consumer.clone(),
            )]),
        }
    }

    fn handle_tool_request(&mut self, event: &Event, call: &ToolCall) -> Result<Vec<Event>> {
        // Reserved names short-circuit into a Stop and are never routed.
        if let Some(kind) = StopKind::from_tool_name(&call.toolname) {
            return Ok(vec![Event::new(
                EventPayload::Stop(StopContent {
                    kind,
                    message: call.args.join(" "),
                }),
                event.producer.clone(),
                "user",
            )]);
        }

        // A second ask_user argument is a commit message: snapshot first.
        if call.toolname == "ask_user"
            && call.args.len() >= 2
            && let Err(e) = self.create_checkpoint(&call.args[1])
        {
            warn!(error = %e, "checkpoint before ask_user failed");
        }

        match self.invoke_tool(call) {
            Ok(response) => Ok(vec![Event::new(
                EventPayload::ToolResponse(response),
                call.toolname.clone(),
                event.producer.clone(),
            )]),
            Err(e) if e.is::<ToolNotFound>() => self.shell_fallback(event, call),
            Err(e) => Ok(vec![Event::new(
                EventPayload::ToolResponse(e.to_string()),
                self.config.default_environment.clone(),
                event.producer.clone(),
            )]),
        }
    }

    /// Routes the call through the registry and runs the tool plus its
    /// post-hooks.
    fn invoke_tool(&mut self, call: &ToolCall) -> Result<String> {
        let Some(index) = self.environments.route(&call.toolname) else {
            return Err(ToolNotFound {
                toolname: call.toolname.clone(),
            }
            .into());
        };

        let env = self.environments.at_mut(index);
        let (tool, hooks): (Arc<dyn Tool>, Vec<PostHook>) = {
            let entry = env.tools().get(&call.toolname).context("routed tool missing")?;
            (Arc::clone(&entry.tool), entry.post_hooks.clone())
        };

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
            raw_command: &call.raw_command,
            path,
            exclude_files,
        };

        let response = tool.call(&mut ctx, &call.args)?;
        for hook in hooks {
            hook(&mut ctx, &response)?;
        }
        Ok(response)
    }

    /// Unknown tool: run the raw command through the default environment's
    /// default tool, mirroring the exchange as Shell events.
    fn shell_fallback(&mut self, event: &Event, call: &ToolCall) -> Result<Vec<Event>> {
        let default_name = self.config.default_environment.clone();
        let Some(index) = self.environments.index_of(&default_name) else {
            return Err(ToolNotFound {
                toolname: call.toolname.clone(),
            }
            .into());
        };
        let Some(default_tool) = self.environments.at_mut(index).default_tool() else {
            return Err(ToolNotFound {
                toolname: call.toolname.clone(),
            }
            .into());
        };

        debug!(toolname = %call.toolname, "falling through to the shell");
        let mut events = vec![Event::new(
            EventPayload::ShellRequest(call.raw_command.clone()),
            default_name.clone(),
            event.producer.clone(),
        )];

        let env = self.environments.at_mut(index);
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
            raw_command: &call.raw_command,
            path,
            exclude_files,
        };

        match default_tool.call(&mut ctx, &call.args) {
            Ok(response) => {
                events.push(Event::new(
                    EventPayload::ShellResponse(response.clone()),
                    default_name.clone(),
                    event.producer.clone(),
                ));
                events.push(Event::new(
                    EventPayload::ToolResponse(response),
                    default_name,
                    event.producer.clone(),
                ));
            }
            Err(e) => {
                events.push(Event::new(
                    EventPayload::ToolResponse(format!(
                        "Error calling command, command failed with: {e}"
                    )),
                    default_name,
                    event.producer.clone(),
                ));
            }
        }
        Ok(events)
    }

    /// Sleeps out the rate-limit window in one-second slices, then retries
    /// the model request.
    fn handle_rate_limit(&mut self, event: &Event, content: &str) -> Result<Vec<Event>> {
        for _ in 0..60 {
            if self.status.get() == SessionStatus::Terminating {
                break;
            }
            thread::sleep(Duration::from_secs(1));
        }
        Ok(vec![Event::new(
            EventPayload::ModelRequest(content.to_string()),
            self.agent_name(),
            event.producer.clone(),
        )])
    }

    fn handle_interrupt(&mut self, content: &str) {
        let current = self.agent.interrupt().to_string();
        if current.is_empty() {
            self.agent.set_interrupt(content.to_string());
        } else {
            self.agent.set_interrupt(format!(
                "{current}You have been interrupted, pay attention to this message {content}"
            ));
        }
    }
}
