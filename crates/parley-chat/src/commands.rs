use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

use parley_db::Outbox;
use parley_db::messages::{
    find_live_message, insert_message, soft_delete_message, transition_status,
};
use parley_db::models::{NewMessage, ParticipantRow, now};
use parley_db::queries::{find_active_participant, get_room, touch_room};
use parley_types::events::{ChatEvent, DeletedEvent, MessageEvent};
use parley_types::models::{MessageId, MessageStatus, RoomId, UserId};

use crate::effects::Effect;
use crate::error::{ChatError, Missing};
use crate::service::ChatService;
use crate::staging::IncomingFile;
use crate::upload::UploadJob;

pub struct SendMessage {
    pub chat_id: RoomId,
    pub user_id: UserId,
    pub parent_id: Option<MessageId>,
    pub content: Option<String>,
    pub files: Vec<IncomingFile>,
    pub client_message_id: Option<String>,
}

pub struct ResendAttachment {
    pub chat_id: RoomId,
    pub user_id: UserId,
    pub message_id: MessageId,
    pub files: Vec<IncomingFile>,
    pub client_message_id: Option<String>,
}

/// What the synchronous half of a write decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub message_id: MessageId,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl ChatService {
    /// Persist a message and, after commit, broadcast it and start uploading
    /// its files. Returns before any upload finishes.
    pub async fn send_message(&self, cmd: SendMessage) -> Result<Accepted, ChatError> {
        let SendMessage {
            chat_id,
            user_id,
            parent_id,
            content,
            files,
            client_message_id,
        } = cmd;

        let content = content.filter(|c| !c.trim().is_empty());
        let files: Vec<IncomingFile> = files.into_iter().filter(|f| !f.is_empty()).collect();
        if content.is_none() && files.is_empty() {
            return Err(ChatError::validation(
                "a message needs text content or at least one file",
            ));
        }

        let stager = self.stager.clone();
        let accepted = self
            .write(move |conn, outbox| {
                let participant = active_participant(conn, chat_id, user_id)?;
                if let Some(parent_id) = parent_id {
                    find_live_message(conn, chat_id, parent_id)?
                        .ok_or(ChatError::NotFound(Missing::Parent))?;
                }

                let status = MessageStatus::initial(!files.is_empty());
                let accepted = record_message(
                    conn,
                    outbox,
                    NewMessage {
                        room_id: chat_id,
                        participant_id: Some(participant.id),
                        parent_id,
                        content: content.as_deref(),
                        status,
                        created_at: now(),
                    },
                    Some(user_id),
                    client_message_id.clone(),
                )?;

                let staged = stager.stage_all(&files).map_err(ChatError::Staging)?;
                if !staged.is_empty() {
                    outbox.push(Effect::Upload(UploadJob {
                        chat_id,
                        message_id: accepted.message_id,
                        files: staged,
                        client_message_id,
                    }));
                }
                Ok(accepted)
            })
            .await?;

        info!(
            "user {} sent message {} to chat {} ({})",
            user_id,
            accepted.message_id,
            chat_id,
            accepted.status.as_str()
        );
        Ok(accepted)
    }

    /// Start a fresh upload attempt for a FAILED message.
    pub async fn resend_attachment(&self, cmd: ResendAttachment) -> Result<Accepted, ChatError> {
        let ResendAttachment {
            chat_id,
            user_id,
            message_id,
            files,
            client_message_id,
        } = cmd;

        let files: Vec<IncomingFile> = files.into_iter().filter(|f| !f.is_empty()).collect();
        if files.is_empty() {
            return Err(ChatError::validation("a retry needs at least one file"));
        }

        let stager = self.stager.clone();
        let accepted = self
            .write(move |conn, outbox| {
                active_participant(conn, chat_id, user_id)?;
                let message = find_live_message(conn, chat_id, message_id)?
                    .filter(|m| m.user_id == Some(user_id))
                    .ok_or(ChatError::NotFound(Missing::Message))?;

                let next = message
                    .status
                    .transition(MessageStatus::Uploading)
                    .map_err(|e| ChatError::InvalidState {
                        message_id,
                        status: e.from,
                    })?;
                if !transition_status(conn, message_id, next)? {
                    return Err(ChatError::InvalidState {
                        message_id,
                        status: message.status,
                    });
                }

                let staged = stager.stage_all(&files).map_err(ChatError::Staging)?;
                outbox.push(Effect::Upload(UploadJob {
                    chat_id,
                    message_id,
                    files: staged,
                    client_message_id,
                }));

                Ok(Accepted {
                    message_id,
                    status: MessageStatus::Uploading,
                    created_at: message.created_at,
                })
            })
            .await?;

        info!(
            "user {} retrying upload for message {} in chat {}",
            user_id, message_id, chat_id
        );
        Ok(accepted)
    }

    /// Soft-delete one of the caller's own messages.
    pub async fn delete_message(
        &self,
        chat_id: RoomId,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<(), ChatError> {
        self.write(move |conn, outbox| {
            active_participant(conn, chat_id, user_id)?;
            find_live_message(conn, chat_id, message_id)?
                .filter(|m| m.user_id == Some(user_id))
                .ok_or(ChatError::NotFound(Missing::Message))?;

            let deleted_at = now();
            if !soft_delete_message(conn, message_id, &deleted_at)? {
                return Err(ChatError::NotFound(Missing::Message));
            }
            outbox.push(Effect::Publish(ChatEvent::Deleted(DeletedEvent {
                message_id,
                chat_id,
                deleted_at,
            })));
            Ok(())
        })
        .await?;

        info!(
            "user {} deleted message {} in chat {}",
            user_id, message_id, chat_id
        );
        Ok(())
    }

    /// Post a sender-less message. Content is still mandatory.
    pub async fn post_system_message(
        &self,
        chat_id: RoomId,
        content: String,
    ) -> Result<Accepted, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::validation("a system message needs text content"));
        }

        self.write(move |conn, outbox| {
            get_room(conn, chat_id)?.ok_or(ChatError::NotFound(Missing::Chat))?;
            record_system_message(conn, outbox, chat_id, &content)
        })
        .await
    }
}

/// Resolve the caller's active membership, distinguishing a missing room
/// from a missing participant.
pub(crate) fn active_participant(
    conn: &Connection,
    chat_id: RoomId,
    user_id: UserId,
) -> Result<ParticipantRow, ChatError> {
    get_room(conn, chat_id)?.ok_or(ChatError::NotFound(Missing::Chat))?;
    find_active_participant(conn, chat_id, user_id)?
        .ok_or(ChatError::NotFound(Missing::Participant))
}

pub(crate) fn record_system_message(
    conn: &Connection,
    outbox: &mut Outbox<Effect>,
    chat_id: RoomId,
    content: &str,
) -> Result<Accepted, ChatError> {
    record_message(
        conn,
        outbox,
        NewMessage {
            room_id: chat_id,
            participant_id: None,
            parent_id: None,
            content: Some(content),
            status: MessageStatus::Normal,
            created_at: now(),
        },
        None,
        None,
    )
}

/// Insert the row, bump the room's activity and queue the MESSAGE event.
fn record_message(
    conn: &Connection,
    outbox: &mut Outbox<Effect>,
    msg: NewMessage<'_>,
    user_id: Option<UserId>,
    client_message_id: Option<String>,
) -> Result<Accepted, ChatError> {
    let message_id = insert_message(conn, &msg)?;
    touch_room(conn, msg.room_id, &msg.created_at)?;

    outbox.push(Effect::Publish(ChatEvent::Message(MessageEvent {
        message_id,
        chat_id: msg.room_id,
        chat_part_id: msg.participant_id,
        user_id,
        content: msg.content.map(str::to_string),
        status: msg.status,
        parent_id: msg.parent_id,
        created_at: msg.created_at,
        client_message_id,
    })));

    Ok(Accepted {
        message_id,
        status: msg.status,
        created_at: msg.created_at,
    })
}
