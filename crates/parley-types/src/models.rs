use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RoomId = i64;
pub type UserId = i64;
pub type MessageId = i64;
pub type ParticipantId = i64;

/// Lifecycle of a chat message.
///
/// `Normal` and `Deleted` are terminal for a message without pending work;
/// `Failed` is re-entered into `Uploading` by a caller-driven retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Normal,
    Uploading,
    Failed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid message status transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: MessageStatus,
    pub to: MessageStatus,
}

impl MessageStatus {
    /// Status assigned when a message is first accepted.
    pub fn initial(has_files: bool) -> Self {
        if has_files { Self::Uploading } else { Self::Normal }
    }

    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        match (self, next) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (Uploading, Normal) | (Uploading, Failed) | (Failed, Uploading) => true,
            _ => false,
        }
    }

    pub fn transition(self, next: MessageStatus) -> Result<MessageStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }

    /// States a stored row must currently be in for `next` to apply.
    /// Used to build guarded `UPDATE ... WHERE status IN (...)` statements.
    pub fn predecessors(next: MessageStatus) -> &'static [MessageStatus] {
        use MessageStatus::*;
        match next {
            Normal => &[Uploading],
            Uploading => &[Failed],
            Failed => &[Uploading],
            Deleted => &[Normal, Uploading, Failed],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Uploading => "UPLOADING",
            Self::Failed => "FAILED",
            Self::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NORMAL" => Some(Self::Normal),
            "UPLOADING" => Some(Self::Uploading),
            "FAILED" => Some(Self::Failed),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    Member,
    Manager,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Member => "MEMBER",
            Self::Manager => "MANAGER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MEMBER" => Some(Self::Member),
            "MANAGER" => Some(Self::Manager),
            _ => None,
        }
    }
}

/// Keyset pagination anchor: the last `(created_at, id)` a client has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub message_id: MessageId,
}
