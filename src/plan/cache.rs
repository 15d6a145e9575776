use super::types::ExecutionPlan;
use crate::lifecycle::report::ExecutionMarker;
use crate::session::message::MessageMetadata;
use crate::shared::fs_atomic::{atomic_write_file, sanitize_component};
use crate::shared::ids::{ConversationId, FlowId};
use crate::shared::logging::EventLog;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache entry at {path} belongs to conversation `{found}`, expected `{expected}`")]
    ForeignEntry {
        path: String,
        expected: String,
        found: String,
    },
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> CacheError {
    CacheError::Json {
        path: path.display().to_string(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanCacheEntry {
    pub conversation_id: ConversationId,
    pub execution_plan: ExecutionPlan,
    #[serde(default)]
    pub metadata: MessageMetadata,
    /// Milliseconds; strictly increasing per conversation.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<FlowId>,
    /// Last run of this conversation's plan; matched against the plan by fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution: Option<ExecutionMarker>,
}

/// One JSON file per conversation under the plans directory. Writes are last-write-wins.
#[derive(Debug, Clone)]
pub struct PlanCache {
    root: PathBuf,
    log: EventLog,
}

impl PlanCache {
    pub fn new(root: impl Into<PathBuf>, log: EventLog) -> Self {
        Self {
            root: root.into(),
            log,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, conversation_id: &ConversationId) -> PathBuf {
        self.root
            .join(format!("{}.json", sanitize_component(conversation_id.as_str())))
    }

    /// Strict read. A missing file is `Ok(None)`.
    pub fn read(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<PlanCacheEntry>, CacheError> {
        let path = self.entry_path(conversation_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&path, err)),
        };
        let entry: PlanCacheEntry = serde_json::from_str(&raw).map_err(|e| json_error(&path, e))?;
        if entry.conversation_id != *conversation_id {
            return Err(CacheError::ForeignEntry {
                path: path.display().to_string(),
                expected: conversation_id.to_string(),
                found: entry.conversation_id.to_string(),
            });
        }
        Ok(Some(entry))
    }

    /// Lenient read: unreadable, unparsable or foreign entries are logged and treated as absent.
    pub fn load(&self, conversation_id: &ConversationId) -> Option<PlanCacheEntry> {
        match self.read(conversation_id) {
            Ok(entry) => entry.filter(|entry| !entry.execution_plan.is_empty()),
            Err(err) => {
                self.log.warn(
                    "plan_cache.ignored",
                    &[
                        ("conversation_id", json!(conversation_id.as_str())),
                        ("error", json!(err.to_string())),
                    ],
                );
                None
            }
        }
    }

    /// Persists `entry`, bumping its timestamp past any existing one so a later write
    /// always wins even under clock skew. Returns the entry as written.
    pub fn store(&self, mut entry: PlanCacheEntry) -> Result<PlanCacheEntry, CacheError> {
        if let Some(existing) = self.load(&entry.conversation_id) {
            if entry.timestamp <= existing.timestamp {
                entry.timestamp = existing.timestamp + 1;
            }
            if entry.flow_id.is_none() {
                entry.flow_id = existing.flow_id;
            }
            if entry.last_execution.is_none() {
                entry.last_execution = existing.last_execution;
            }
        }
        let path = self.entry_path(&entry.conversation_id);
        let body = serde_json::to_vec_pretty(&entry).map_err(|e| json_error(&path, e))?;
        atomic_write_file(&path, &body).map_err(|e| io_error(&path, e))?;
        Ok(entry)
    }

    /// Records (or forgets) the flow id on an existing entry.
    pub fn set_flow_id(
        &self,
        conversation_id: &ConversationId,
        flow_id: Option<FlowId>,
        now_millis: i64,
    ) -> Result<Option<PlanCacheEntry>, CacheError> {
        self.update(conversation_id, now_millis, |entry| entry.flow_id = flow_id)
    }

    pub fn set_last_execution(
        &self,
        conversation_id: &ConversationId,
        marker: ExecutionMarker,
        now_millis: i64,
    ) -> Result<Option<PlanCacheEntry>, CacheError> {
        self.update(conversation_id, now_millis, |entry| {
            entry.last_execution = Some(marker)
        })
    }

    fn update(
        &self,
        conversation_id: &ConversationId,
        now_millis: i64,
        apply: impl FnOnce(&mut PlanCacheEntry),
    ) -> Result<Option<PlanCacheEntry>, CacheError> {
        let Some(mut entry) = self.load(conversation_id) else {
            return Ok(None);
        };
        entry.timestamp = now_millis.max(entry.timestamp + 1);
        apply(&mut entry);
        let path = self.entry_path(conversation_id);
        let body = serde_json::to_vec_pretty(&entry).map_err(|e| json_error(&path, e))?;
        atomic_write_file(&path, &body).map_err(|e| io_error(&path, e))?;
        Ok(Some(entry))
    }

    pub fn clear(&self, conversation_id: &ConversationId) -> Result<bool, CacheError> {
        let path = self.entry_path(conversation_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                self.log.info(
                    "plan_cache.cleared",
                    &[("conversation_id", json!(conversation_id.as_str()))],
                );
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&path, err)),
        }
    }
}
