//! The reasoning collaborator interface.
//!
//! The concrete model-backed agent lives outside this crate; the session
//! only needs one model turn at a time plus access to the chat history and
//! the pending-interrupt buffer. [`ScriptedAgent`] is a deterministic
//! implementation used for replay and tests.

use std::collections::VecDeque;

use anyhow::Result;

use devon_types::ChatTurn;

/// Action value the agent returns when it caught itself hallucinating;
/// the dispatcher feeds `output` back as a corrective `ModelRequest`.
pub const HALLUCINATION_ACTION: &str = "hallucination";

/// Action value for a model-side failure the dispatcher should drop.
pub const ERROR_ACTION: &str = "error";

/// One model turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    pub thought: String,
    pub action: String,
    pub output: String,
}

impl Prediction {
    pub fn new(
        thought: impl Into<String>,
        action: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            thought: thought.into(),
            action: action.into(),
            output: output.into(),
        }
    }

    /// A turn whose only payload is the action text.
    pub fn action(action: impl Into<String>) -> Self {
        Self::new("", action, "")
    }
}

pub trait Agent: Send {
    fn name(&self) -> &str;

    /// Runs one model turn against the current task and the latest
    /// observation, returning the `{thought, action, output}` triple.
    fn predict(&mut self, task: &str, observation: &str) -> Result<Prediction>;

    /// Deep copy of the chat history, for checkpointing.
    fn history(&self) -> Vec<ChatTurn>;

    /// Replaces the chat history, e.g. on revert.
    fn restore_history(&mut self, history: Vec<ChatTurn>);

    /// Appends a synthetic turn (used to inform the agent of repo drift on
    /// session load).
    fn push_history(&mut self, turn: ChatTurn);

    /// The pending-interrupt buffer, consumed on the next model turn.
    fn interrupt(&self) -> &str;

    fn set_interrupt(&mut self, content: String);

    /// Drops history, interrupts, and any per-run scratch.
    fn reset(&mut self);
}

/// Deterministic agent that replays a fixed script of predictions.
///
/// Every observation is recorded into the chat history, so checkpoint and
/// replay behavior can be asserted without a live model. Once the script is
/// exhausted it returns [`ERROR_ACTION`], which the dispatcher drops,
/// letting the loop run to quiescence.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    name: String,
    script: VecDeque<Prediction>,
    history: Vec<ChatTurn>,
    interrupt: String,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>, script: Vec<Prediction>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            history: Vec::new(),
            interrupt: String::new(),
        }
    }

    /// Predictions not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, _task: &str, observation: &str) -> Result<Prediction> {
        let mut observation = observation.to_string();
        if !self.interrupt.is_empty() {
            observation.push_str("\n[interrupt] ");
            observation.push_str(&self.interrupt);
            self.interrupt.clear();
        }
        self.history.push(ChatTurn::new("user", observation));

        let prediction = self
            .script
            .pop_front()
            .unwrap_or_else(|| Prediction::action(ERROR_ACTION));
        self.history
            .push(ChatTurn::new("assistant", prediction.action.clone()));
        Ok(prediction)
    }

    fn history(&self) -> Vec<ChatTurn> {
        self.history.clone()
    }

    fn restore_history(&mut self, history: Vec<ChatTurn>) {
        self.history = history;
    }

    fn push_history(&mut self, turn: ChatTurn) {
        self.history.push(turn);
    }

    fn interrupt(&self) -> &str {
        &self.interrupt
    }

    fn set_interrupt(&mut self, content: String) {
        self.interrupt = content;
    }

    fn reset(&mut self) {
        self.history.clear();
        self.interrupt.clear();
    }
}
