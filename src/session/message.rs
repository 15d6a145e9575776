use crate::interaction::form::SmartFormSchema;
use crate::interaction::oauth::OAuthRequirement;
use crate::plan::types::ExecutionPlan;
use crate::shared::serde_ext::null_as_empty_vec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// How a message participates in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Shown to the user and sent to the planner.
    #[default]
    Chat,
    /// Sent to the planner but not rendered as a bubble.
    Continuation,
    /// Rendered to the user, never sent to the planner.
    Feedback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Ready,
    AwaitingAuthorization,
    AwaitingInput,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_plan: Option<ExecutionPlan>,
    #[serde(
        default,
        deserialize_with = "null_as_empty_vec",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub oauth_requirements: Vec<OAuthRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_form: Option<SmartFormSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TurnStatus>,
}

impl MessageMetadata {
    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.execution_plan.as_ref().filter(|plan| !plan.is_empty())
    }

    pub fn needs_authorization(&self) -> bool {
        !self.oauth_requirements.is_empty()
    }

    pub fn needs_form(&self) -> bool {
        self.smart_form.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.status == Some(TurnStatus::Error)
    }

    /// Whether this metadata says anything about plan progress.
    pub fn qualifies(&self) -> bool {
        self.plan().is_some()
            || self.needs_authorization()
            || self.needs_form()
            || self.status.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    /// System and feedback messages are view-only and never go back to the planner.
    pub fn is_planner_visible(&self) -> bool {
        self.role != Role::System && self.kind != MessageKind::Feedback
    }

    pub fn is_displayed(&self) -> bool {
        self.kind != MessageKind::Continuation
    }

    pub fn qualifying_metadata(&self) -> Option<&MessageMetadata> {
        if self.role != Role::Assistant {
            return None;
        }
        self.metadata.as_ref().filter(|meta| meta.qualifies())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A user-facing message produced by the client itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
    #[serde(default)]
    pub retryable: bool,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
            retryable: false,
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            text: text.into(),
            retryable: false,
        }
    }

    pub fn error(text: impl Into<String>, retryable: bool) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
            retryable,
        }
    }
}

pub fn latest_qualifying_metadata(messages: &[Message]) -> Option<&MessageMetadata> {
    messages
        .iter()
        .rev()
        .find_map(Message::qualifying_metadata)
}
