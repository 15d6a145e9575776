use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn session_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/session.log")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Append-only JSON-lines event log. Write failures are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    path: Option<PathBuf>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn for_state_root(state_root: &Path) -> Self {
        Self::new(session_log_path(state_root))
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, event: &str, fields: &[(&str, Value)]) {
        self.record(LogLevel::Info, event, fields);
    }

    pub fn warn(&self, event: &str, fields: &[(&str, Value)]) {
        self.record(LogLevel::Warn, event, fields);
    }

    pub fn error(&self, event: &str, fields: &[(&str, Value)]) {
        self.record(LogLevel::Error, event, fields);
    }

    pub fn record(&self, level: LogLevel, event: &str, fields: &[(&str, Value)]) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        let mut payload = Map::new();
        payload.insert(
            "timestamp".to_string(),
            Value::from(super::clock::now_secs()),
        );
        payload.insert("level".to_string(), Value::String(level.as_str().to_string()));
        payload.insert("event".to_string(), Value::String(event.to_string()));
        for (key, value) in fields {
            payload.insert((*key).to_string(), value.clone());
        }

        let Ok(line) = serde_json::to_string(&payload) else {
            return;
        };
        if let Some(parent) = path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
            return;
        };
        let _ = writeln!(file, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::EventLog;
    use serde_json::{json, Value};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn event_log_appends_one_json_object_per_line() {
        let dir = tempdir().expect("tempdir");
        let log = EventLog::for_state_root(dir.path());
        log.info("turn.sent", &[("conversation_id", json!("c-1"))]);
        log.warn("plan.contract_violation", &[("reason", json!("missing execution_step"))]);

        let raw = fs::read_to_string(dir.path().join("logs/session.log")).expect("read log");
        let lines = raw.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).expect("parse first");
        assert_eq!(first["event"], "turn.sent");
        assert_eq!(first["level"], "info");
        assert_eq!(first["conversation_id"], "c-1");
        let second: Value = serde_json::from_str(lines[1]).expect("parse second");
        assert_eq!(second["level"], "warn");
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let log = EventLog::disabled();
        log.error("ignored", &[]);
        assert!(log.path().is_none());
    }
}
