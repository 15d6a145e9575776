use super::error::SessionError;
use super::message::Message;
use crate::shared::fs_atomic::{atomic_write_file, sanitize_component};
use crate::shared::ids::ConversationId;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

fn io_error(path: &Path, source: std::io::Error) -> SessionError {
    SessionError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> SessionError {
    SessionError::Json {
        path: path.display().to_string(),
        source,
    }
}

/// Conversations as JSON lines, one message per line, under `<state_root>/conversations`.
#[derive(Debug, Clone)]
pub struct Transcript {
    root: PathBuf,
}

impl Transcript {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, conversation_id: &ConversationId) -> PathBuf {
        self.root
            .join(format!("{}.jsonl", sanitize_component(conversation_id.as_str())))
    }

    pub fn exists(&self, conversation_id: &ConversationId) -> bool {
        self.path(conversation_id).exists()
    }

    /// Missing file means a conversation with no messages. Unparsable lines are skipped.
    pub fn load(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, SessionError> {
        let path = self.path(conversation_id);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&path, err)),
        };
        let mut messages = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| io_error(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(message) = serde_json::from_str::<Message>(&line) {
                messages.push(message);
            }
        }
        messages.sort_by_key(|message| message.timestamp);
        Ok(messages)
    }

    pub fn append(
        &self,
        conversation_id: &ConversationId,
        message: &Message,
    ) -> Result<(), SessionError> {
        let path = self.path(conversation_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let line = serde_json::to_string(message).map_err(|e| json_error(&path, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .map_err(|e| io_error(&path, e))
    }

    /// Replaces the whole transcript atomically.
    pub fn write_all(
        &self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> Result<(), SessionError> {
        let path = self.path(conversation_id);
        let mut body = Vec::new();
        for message in messages {
            let line = serde_json::to_vec(message).map_err(|e| json_error(&path, e))?;
            body.extend_from_slice(&line);
            body.push(b'\n');
        }
        atomic_write_file(&path, &body).map_err(|e| io_error(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::Transcript;
    use crate::session::message::{Message, MessageKind, Role};
    use crate::shared::ids::ConversationId;
    use std::fs;

    fn message(id: &str, timestamp: i64) -> Message {
        Message {
            id: id.to_string(),
            role: Role::User,
            kind: MessageKind::Chat,
            content: format!("hello {id}"),
            timestamp,
            metadata: None,
        }
    }

    #[test]
    fn append_and_load_sorted_skipping_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transcript = Transcript::new(dir.path());
        let conv = ConversationId::parse("c-1").expect("id");

        assert!(transcript.load(&conv).expect("missing").is_empty());
        transcript.append(&conv, &message("b", 20)).expect("append");
        transcript.append(&conv, &message("a", 10)).expect("append");
        let path = transcript.path(&conv);
        let mut raw = fs::read_to_string(&path).expect("read");
        raw.push_str("not json\n");
        fs::write(&path, raw).expect("write");

        let loaded = transcript.load(&conv).expect("load");
        assert_eq!(
            loaded.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        transcript
            .write_all(&conv, &[message("z", 5)])
            .expect("rewrite");
        assert_eq!(transcript.load(&conv).expect("load").len(), 1);
    }
}
