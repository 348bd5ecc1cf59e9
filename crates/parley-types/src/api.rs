use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    Cursor, MessageId, MessageStatus, ParticipantId, ParticipantRole, RoomId, UserId,
};

// -- JWT Claims --

/// Resolved identity handed to the chat core. Tokens are minted by the
/// account service; this crate only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
}

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

// -- Rooms --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenRoomRequest {
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfoResponse {
    pub chat_id: RoomId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub participant_count: u32,
    pub participating: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResponse {
    pub chat_part_id: ParticipantId,
    pub chat_id: RoomId,
    pub user_id: UserId,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInfo {
    pub attachment_id: i64,
    pub attachment_url: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Reply target as shown under a message. `deleted` is surfaced so the
/// client decides how to render a removed parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentMessage {
    pub message_id: MessageId,
    pub user_id: Option<UserId>,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
    pub attachments: Vec<AttachmentInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub message_id: MessageId,
    pub chat_id: RoomId,
    pub chat_part_id: Option<ParticipantId>,
    pub user_id: Option<UserId>,
    pub content: Option<String>,
    pub status: MessageStatus,
    pub attachments: Vec<AttachmentInfo>,
    pub parent: Option<ParentMessage>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<MessageResponse>,
    pub has_next: bool,
    pub next_cursor: Option<Cursor>,
}
