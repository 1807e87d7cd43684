//! Session document persistence.
//!
//! A session serializes to `{config, event_history}`. The [`SessionStore`]
//! trait is the seam for transports that keep sessions in a database; the
//! bundled [`JsonFileStore`] writes one JSON file per session.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devon_types::Event;

use crate::config::SessionConfig;

/// The persisted session document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDoc {
    pub config: SessionConfig,
    pub event_history: Vec<Event>,
}

/// Summary row for a store listing.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub name: String,
    pub modified: Option<String>,
}

pub trait SessionStore: Send {
    fn save(&self, name: &str, doc: &SessionDoc) -> Result<()>;
    fn load(&self, name: &str) -> Result<Option<SessionDoc>>;
    fn delete(&self, name: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<SessionSummary>>;
}

/// One JSON file per session under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

fn format_timestamp(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format("%Y-%m-%d %H:%M").to_string()
}

impl SessionStore for JsonFileStore {
    fn save(&self, name: &str, doc: &SessionDoc) -> Result<()> {
        fs::create_dir_all(&self.dir).context("create session store directory")?;
        let path = self.path_for(name);
        let temp_path = path.with_extension("json.tmp");

        let json = serde_json::to_string(doc).context("serialize session document")?;
        let mut temp = fs::File::create(&temp_path).context("create temp session file")?;
        temp.write_all(json.as_bytes())
            .context("write session document")?;
        temp.sync_all().context("sync session document")?;
        fs::rename(&temp_path, &path).context("replace session file")?;
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<SessionDoc>> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).context("read session file")?;
        let doc = serde_json::from_str(&text).context("parse session document")?;
        Ok(Some(doc))
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        if path.exists() {
            fs::remove_file(&path).context("delete session file")?;
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<SessionSummary>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.dir).context("read session store directory")? {
            let entry = entry.context("read session store entry")?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem()
            {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(format_timestamp);
                sessions.push(SessionSummary {
                    name: stem.to_string_lossy().into_owned(),
                    modified,
                });
            }
        }
        sessions.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use devon_types::EventPayload;

    use crate::config::SessionConfig;

    use super::*;

    fn sample_doc() -> SessionDoc {
        SessionDoc {
            config: SessionConfig::new("demo", "/tmp/demo"),
            event_history: vec![Event::new(
                EventPayload::Task(Some("fix the bug".to_string())),
                "user",
                "devon",
            )],
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        store.save("demo", &sample_doc()).unwrap();
        let loaded = store.load("demo").unwrap().expect("saved doc");
        assert_eq!(loaded.config.name, "demo");
        assert_eq!(loaded.event_history.len(), 1);
        assert_eq!(loaded.event_history[0].kind(), "Task");
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_delete_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        store.save("one", &sample_doc()).unwrap();
        store.save("two", &sample_doc()).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);

        store.delete("one").unwrap();
        let names: Vec<String> = store.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["two"]);

        // Deleting a missing session is fine.
        store.delete("one").unwrap();
    }

    #[test]
    fn test_wire_shape_has_config_and_event_history() {
        let value = serde_json::to_value(sample_doc()).unwrap();
        assert!(value.get("config").is_some());
        assert!(value.get("event_history").is_some());
        assert_eq!(value["event_history"][0]["type"], "Task");
    }
}
