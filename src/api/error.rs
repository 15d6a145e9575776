#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("planner request failed: {0}")]
    Transport(String),
    #[error("planner responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("planner response could not be decoded: {0}")]
    Decode(String),
    #[error("planner request could not be encoded: {0}")]
    Encode(String),
}

impl ApiError {
    /// Network failures and server errors can be retried; client errors cannot.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::Encode(_) => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(_) => {
                "Could not reach the workflow service. Check your connection and try again."
                    .to_string()
            }
            Self::Status { status, .. } if *status >= 500 => {
                format!("The workflow service had a problem (HTTP {status}). Try again shortly.")
            }
            Self::Status { status, body } => {
                let detail = body.trim();
                if detail.is_empty() {
                    format!("The workflow service rejected the request (HTTP {status}).")
                } else {
                    format!("The workflow service rejected the request (HTTP {status}): {detail}")
                }
            }
            Self::Decode(_) | Self::Encode(_) => {
                "The workflow service returned an unexpected response.".to_string()
            }
        }
    }
}
