//! The user prompt environment.

use std::time::Duration;

use anyhow::{Context, Result, bail};

use devon_types::{Event, EventLog, EventPayload, StatusCell};

use super::{Environment, EnvironmentRecord};
use crate::tools::ToolTable;

/// Relays questions to the user through the event log.
///
/// `execute` appends a `UserRequest` and then polls the log tail for a
/// `UserResponse` once per second, honoring the terminate flag. The
/// transport that displays the question is responsible for appending the
/// response.
#[derive(Default)]
pub struct UserEnvironment {
    tools: ToolTable,
    event_log: Option<EventLog>,
    status: Option<StatusCell>,
}

impl UserEnvironment {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Environment for UserEnvironment {
    fn name(&self) -> &str {
        "user"
    }

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, input: &str, _timeout: Duration) -> Result<(String, i32)> {
        let event_log = self
            .event_log
            .as_ref()
            .context("user environment is not attached to a session")?;
        let status = self
            .status
            .as_ref()
            .context("user environment is not attached to a session")?;

        event_log.append(Event::new(
            EventPayload::UserRequest(input.to_string()),
            self.name(),
            "user",
        ));

        let response = event_log.wait_for_tail(
            |event| matches!(event.payload, EventPayload::UserResponse(_)),
            status,
        );
        match response {
            Some(Event {
                payload: EventPayload::UserResponse(text),
                ..
            }) => Ok((text, 0)),
            _ => bail!("session is terminating; the user did not reply"),
        }
    }

    fn tools(&self) -> &ToolTable {
        &self.tools
    }

    fn tools_mut(&mut self) -> &mut ToolTable {
        &mut self.tools
    }

    fn record(&mut self) -> EnvironmentRecord {
        EnvironmentRecord::UserEnvironment
    }

    fn attach(&mut self, event_log: EventLog, status: StatusCell) {
        self.event_log = Some(event_log);
        self.status = Some(status);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use devon_types::SessionStatus;

    use super::*;

    #[test]
    fn test_execute_round_trips_through_the_log() {
        let log = EventLog::new();
        let status = StatusCell::new(SessionStatus::Running);
        let mut env = UserEnvironment::new();
        env.attach(log.clone(), status.clone());

        let responder = log.clone();
        let handle = thread::spawn(move || {
            // Wait for the question to land, then answer it.
            loop {
                if let Some(event) = responder.last()
                    && matches!(event.payload, EventPayload::UserRequest(_))
                {
                    break;
                }
                thread::sleep(Duration::from_millis(20));
            }
            responder.append(Event::new(
                EventPayload::UserResponse("yes please".to_string()),
                "user",
                "user_environment",
            ));
        });

        let (answer, exit_code) = env.execute("Proceed?", Duration::from_secs(30)).unwrap();
        handle.join().unwrap();

        assert_eq!(answer, "yes please");
        assert_eq!(exit_code, 0);
        assert!(matches!(
            log.get(0).unwrap().payload,
            EventPayload::UserRequest(_)
        ));
    }

    #[test]
    fn test_execute_unattached_is_an_error() {
        let mut env = UserEnvironment::new();
        assert!(env.execute("Proceed?", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_execute_aborts_when_terminating() {
        let log = EventLog::new();
        let status = StatusCell::new(SessionStatus::Terminating);
        let mut env = UserEnvironment::new();
        env.attach(log, status);
        assert!(env.execute("Proceed?", Duration::from_secs(1)).is_err());
    }
}
