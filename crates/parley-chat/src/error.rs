use std::fmt;

use parley_types::models::{MessageId, MessageStatus, RoomId, UserId};

/// Which lookup came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Chat,
    Participant,
    Parent,
    Message,
}

impl Missing {
    pub fn code(self) -> &'static str {
        match self {
            Self::Chat => "CHAT_NOT_FOUND",
            Self::Participant => "CHAT_PARTICIPANT_NOT_FOUND",
            Self::Parent => "MESSAGE_PARENT_NOT_FOUND",
            Self::Message => "MESSAGE_NOT_FOUND",
        }
    }
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Chat => "chat",
            Self::Participant => "chat participant",
            Self::Parent => "parent message",
            Self::Message => "message",
        })
    }
}

/// Errors returned synchronously by chat operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(Missing),

    #[error("user {user_id} already participates in chat {chat_id}")]
    AlreadyParticipant { chat_id: RoomId, user_id: UserId },

    #[error("message {message_id} is {status:?}")]
    InvalidState {
        message_id: MessageId,
        status: MessageStatus,
    },

    #[error("failed to stage upload: {0}")]
    Staging(#[source] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable code for error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(missing) => missing.code(),
            Self::AlreadyParticipant { .. } => "CHAT_PARTICIPANT_ALREADY_EXISTS",
            Self::InvalidState { .. } => "MESSAGE_INVALID_STATE",
            Self::Staging(_) | Self::Database(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Durable-storage failure inside the async upload pipeline. Never returned
/// to an HTTP caller; it ends up as a FAILED message and a log line.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage rejected '{key}' with status {status}")]
    Rejected { status: u16, key: String },

    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
}
