pub mod error;
pub mod message;
pub mod store;
pub mod transcript;

pub use error::SessionError;
pub use message::{
    latest_qualifying_metadata, Message, MessageKind, MessageMetadata, Notice, NoticeLevel, Role,
    TurnStatus,
};
pub use store::{FailedTurn, SessionStore, StoreLimits};
pub use transcript::Transcript;
