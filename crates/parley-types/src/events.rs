use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::AttachmentInfo;
use crate::models::{MessageId, MessageStatus, ParticipantId, RoomId, UserId};

/// Topic every live subscriber of a room listens on.
pub fn room_topic(chat_id: RoomId) -> String {
    format!("topic/chat/{}", chat_id)
}

/// Parse the room id back out of a `topic/chat/{id}` destination.
pub fn room_of_topic(destination: &str) -> Option<RoomId> {
    destination.strip_prefix("topic/chat/")?.parse().ok()
}

/// Envelopes pushed to room subscribers.
///
/// The `type` field is the discriminator clients switch on. `clientMessageId`
/// echoes the id the sender attached to its request so it can reconcile its
/// optimistic copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// A message was accepted and persisted.
    #[serde(rename = "MESSAGE")]
    Message(MessageEvent),

    /// An upload attempt for a message finished (successfully or not).
    #[serde(rename = "ATTACHMENT")]
    Attachment(AttachmentEvent),

    /// A message was soft-deleted.
    #[serde(rename = "DELETED")]
    Deleted(DeletedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub message_id: MessageId,
    pub chat_id: RoomId,
    pub chat_part_id: Option<ParticipantId>,
    pub user_id: Option<UserId>,
    pub content: Option<String>,
    pub status: MessageStatus,
    pub parent_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub client_message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentEvent {
    pub message_id: MessageId,
    pub chat_id: RoomId,
    pub status: MessageStatus,
    pub attachments: Vec<AttachmentInfo>,
    pub client_message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedEvent {
    pub message_id: MessageId,
    pub chat_id: RoomId,
    pub deleted_at: DateTime<Utc>,
}

impl ChatEvent {
    pub fn chat_id(&self) -> RoomId {
        match self {
            Self::Message(e) => e.chat_id,
            Self::Attachment(e) => e.chat_id,
            Self::Deleted(e) => e.chat_id,
        }
    }

    pub fn message_id(&self) -> MessageId {
        match self {
            Self::Message(e) => e.message_id,
            Self::Attachment(e) => e.message_id,
            Self::Deleted(e) => e.message_id,
        }
    }

    pub fn destination(&self) -> String {
        room_topic(self.chat_id())
    }
}

/// Commands sent FROM client TO server over the gateway WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayCommand {
    /// Start receiving topic deliveries for these rooms.
    Subscribe {
        #[serde(rename = "chatIds")]
        chat_ids: Vec<RoomId>,
    },

    /// Stop receiving topic deliveries for these rooms.
    Unsubscribe {
        #[serde(rename = "chatIds")]
        chat_ids: Vec<RoomId>,
    },
}

/// Control frames the gateway itself emits (as opposed to relayed events).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayFrame {
    Ready {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    Subscribed {
        #[serde(rename = "chatIds")]
        chat_ids: Vec<RoomId>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_envelope_shape() {
        let event = ChatEvent::Message(MessageEvent {
            message_id: 7,
            chat_id: 3,
            chat_part_id: Some(11),
            user_id: Some(42),
            content: Some("hi".into()),
            status: MessageStatus::Normal,
            parent_id: None,
            created_at: Utc::now(),
            client_message_id: Some("c-1".into()),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "MESSAGE");
        assert_eq!(json["messageId"], 7);
        assert_eq!(json["chatId"], 3);
        assert_eq!(json["status"], "NORMAL");
        assert_eq!(json["clientMessageId"], "c-1");
        assert_eq!(event.destination(), "topic/chat/3");
    }

    #[test]
    fn attachment_envelope_roundtrips() {
        let event = ChatEvent::Attachment(AttachmentEvent {
            message_id: 9,
            chat_id: 1,
            status: MessageStatus::Failed,
            attachments: vec![],
            client_message_id: None,
        });

        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains(r#""type":"ATTACHMENT""#));
        match serde_json::from_str::<ChatEvent>(&text).unwrap() {
            ChatEvent::Attachment(e) => {
                assert_eq!(e.status, MessageStatus::Failed);
                assert!(e.attachments.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn topic_parsing() {
        assert_eq!(room_of_topic(&room_topic(55)), Some(55));
        assert_eq!(room_of_topic("topic/other/55"), None);
        assert_eq!(room_of_topic("topic/chat/abc"), None);
    }

    #[test]
    fn gateway_command_parsing() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"SUBSCRIBE","chatIds":[1,2]}"#).unwrap();
        match cmd {
            GatewayCommand::Subscribe { chat_ids } => assert_eq!(chat_ids, vec![1, 2]),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
