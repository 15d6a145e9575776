use crate::api::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("a turn is already in progress")]
    TurnInFlight,
    #[error("identical message was sent {elapsed_ms}ms ago")]
    DuplicateMessage { elapsed_ms: i64 },
    #[error("no turn is in progress")]
    NoPendingTurn,
    #[error("there is no failed turn to retry")]
    NothingToRetry,
    #[error("turn failed: {0}")]
    Api(#[from] ApiError),
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
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(err) => err.is_retryable(),
            _ => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyMessage => "Type a message first.".to_string(),
            Self::TurnInFlight => "Wait for the current reply before sending another message.".to_string(),
            Self::DuplicateMessage { .. } => "That message was just sent.".to_string(),
            Self::NoPendingTurn | Self::NothingToRetry => "There is nothing to retry.".to_string(),
            Self::Api(err) => err.user_message(),
            Self::Io { .. } | Self::Json { .. } => {
                "The local conversation history could not be read or saved.".to_string()
            }
        }
    }
}
