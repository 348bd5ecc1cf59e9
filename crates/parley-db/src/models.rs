//! Database row types. These map directly to SQLite rows.
//! Distinct from parley-types API models to keep the DB layer independent.

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

use parley_types::models::{
    MessageId, MessageStatus, ParticipantId, ParticipantRole, RoomId, UserId,
};

pub struct RoomRow {
    pub id: RoomId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

pub struct ParticipantRow {
    pub id: ParticipantId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: MessageId,
    pub room_id: RoomId,
    pub participant_id: Option<ParticipantId>,
    /// Sender's user id, joined through the participant row.
    pub user_id: Option<UserId>,
    pub parent_id: Option<MessageId>,
    pub content: Option<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

pub struct NewMessage<'a> {
    pub room_id: RoomId,
    pub participant_id: Option<ParticipantId>,
    pub parent_id: Option<MessageId>,
    pub content: Option<&'a str>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttachmentRow {
    pub id: i64,
    pub message_id: MessageId,
    pub url: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub url: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

// -- Timestamps --
//
// Stored as fixed-width RFC 3339 text with microsecond precision so that
// SQLite's text comparison orders them chronologically.

/// Current time truncated to the stored precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub fn decode_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    decode_ts(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("bad timestamp '{}'", raw).into(),
        )
    })
}

pub(crate) fn opt_ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => ts_column(row, idx).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<MessageStatus> {
    let raw: String = row.get(idx)?;
    MessageStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("bad message status '{}'", raw).into(),
        )
    })
}

pub(crate) fn role_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<ParticipantRole> {
    let raw: String = row.get(idx)?;
    ParticipantRole::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("bad participant role '{}'", raw).into(),
        )
    })
}
