use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Everything a drafting session records in its event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SessionStarted,
    GenerationStarted,
    GenerationSucceeded,
    GenerationFailed,
    CanvasCleared,
    CanvasExported,
    SessionFinished,
}

impl SessionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::GenerationStarted => "generation_started",
            Self::GenerationSucceeded => "generation_succeeded",
            Self::GenerationFailed => "generation_failed",
            Self::CanvasCleared => "canvas_cleared",
            Self::CanvasExported => "canvas_exported",
            Self::SessionFinished => "session_finished",
        }
    }
}

/// Session log: one line per [`SessionEvent`] in `events.jsonl`.
///
/// The envelope (`type`, `session_id`, `ts`) always wins over payload keys of
/// the same name. Clones share the file lock.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    write_lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                write_lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, event: SessionEvent, payload: EventPayload) -> anyhow::Result<Value> {
        let mut record = Map::new();
        record.insert("type".to_string(), Value::String(event.as_str().to_string()));
        record.insert(
            "session_id".to_string(),
            Value::String(self.shared.session_id.clone()),
        );
        record.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            record.entry(key).or_insert(value);
        }
        self.append_line(&serde_json::to_string(&record)?)?;
        Ok(Value::Object(record))
    }

    fn append_line(&self, line: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.shared.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .shared
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("session log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    fn logged_lines(path: &Path) -> anyhow::Result<Vec<Value>> {
        fs::read_to_string(path)?
            .lines()
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn generation_event_is_one_line_with_envelope() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventWriter::new(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("section_id".to_string(), json!("s-1"));
        payload.insert("sources_added".to_string(), json!(2));
        let emitted = log.emit(SessionEvent::GenerationSucceeded, payload)?;

        let lines = logged_lines(&path)?;
        assert_eq!(lines, vec![emitted]);
        assert_eq!(lines[0]["type"], json!("generation_succeeded"));
        assert_eq!(lines[0]["session_id"], json!("session-123"));
        assert_eq!(lines[0]["sources_added"], json!(2));
        DateTime::parse_from_rfc3339(lines[0]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn payload_cannot_override_envelope_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = EventWriter::new(temp.path().join("events.jsonl"), "session-123");

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), json!("override"));
        payload.insert("session_id".to_string(), json!("other"));
        let emitted = log.emit(SessionEvent::CanvasCleared, payload)?;

        assert_eq!(emitted["type"], json!("canvas_cleared"));
        assert_eq!(emitted["session_id"], json!("session-123"));
        Ok(())
    }

    #[test]
    fn clones_append_to_the_same_log() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let log = EventWriter::new(&path, "session-123");
        let shared = log.clone();

        log.emit(SessionEvent::SessionStarted, EventPayload::new())?;
        shared.emit(SessionEvent::SessionFinished, EventPayload::new())?;

        let types: Vec<Value> = logged_lines(&path)?
            .into_iter()
            .map(|line| line["type"].clone())
            .collect();
        assert_eq!(types, vec![json!("session_started"), json!("session_finished")]);
        Ok(())
    }

    #[test]
    fn unwritable_log_path_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        fs::create_dir(&path)?;
        let log = EventWriter::new(&path, "session-123");
        assert!(log
            .emit(SessionEvent::GenerationStarted, EventPayload::new())
            .is_err());
        Ok(())
    }
}
