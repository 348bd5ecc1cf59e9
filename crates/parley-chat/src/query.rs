use std::collections::HashMap;

use parley_db::messages::{attachments_for_messages, messages_by_ids, page_messages};
use parley_db::models::MessageRow;
use parley_types::api::{AttachmentInfo, MessagePage, MessageResponse, ParentMessage};
use parley_types::models::{Cursor, MessageId, RoomId, UserId};

use crate::error::{ChatError, Missing};
use crate::service::ChatService;
use crate::upload::attachment_info;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

impl ChatService {
    /// One page of a room's history, newest first.
    ///
    /// Reply parents and the attachments of both page rows and parents are
    /// resolved with one batched lookup each. Parents are returned even when
    /// soft-deleted, flagged as such.
    pub async fn get_messages(
        &self,
        chat_id: RoomId,
        user_id: UserId,
        cursor: Option<Cursor>,
        size: Option<u32>,
    ) -> Result<MessagePage, ChatError> {
        let size = size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        self.read(move |db| {
            db.get_room(chat_id)?
                .ok_or(ChatError::NotFound(Missing::Chat))?;
            db.find_active_participant(chat_id, user_id)?
                .ok_or(ChatError::NotFound(Missing::Participant))?;

            let (mut rows, parents, attachments) = db.with_conn(|conn| {
                // One extra row tells us whether another page exists.
                let rows = page_messages(conn, chat_id, cursor.as_ref(), size + 1)?;

                let mut parent_ids: Vec<MessageId> = rows.iter().filter_map(|m| m.parent_id).collect();
                parent_ids.sort_unstable();
                parent_ids.dedup();
                let parents = messages_by_ids(conn, &parent_ids)?;

                let mut ids: Vec<MessageId> = rows.iter().map(|m| m.id).collect();
                ids.extend(parent_ids.iter().copied());
                let attachments = attachments_for_messages(conn, &ids)?;

                Ok((rows, parents, attachments))
            })?;

            let has_next = rows.len() > size as usize;
            rows.truncate(size as usize);

            let mut by_message: HashMap<MessageId, Vec<AttachmentInfo>> = HashMap::new();
            for a in &attachments {
                by_message.entry(a.message_id).or_default().push(attachment_info(a));
            }
            let parents: HashMap<MessageId, MessageRow> =
                parents.into_iter().map(|p| (p.id, p)).collect();

            let next_cursor = if has_next {
                rows.last().map(|m| Cursor {
                    created_at: m.created_at,
                    message_id: m.id,
                })
            } else {
                None
            };

            let messages = rows
                .into_iter()
                .map(|m| {
                    let parent = m
                        .parent_id
                        .and_then(|id| parents.get(&id))
                        .map(|p| ParentMessage {
                            message_id: p.id,
                            user_id: p.user_id,
                            content: p.content.clone(),
                            created_at: p.created_at,
                            deleted: p.is_deleted(),
                            attachments: by_message.get(&p.id).cloned().unwrap_or_default(),
                        });
                    MessageResponse {
                        attachments: by_message.get(&m.id).cloned().unwrap_or_default(),
                        message_id: m.id,
                        chat_id: m.room_id,
                        chat_part_id: m.participant_id,
                        user_id: m.user_id,
                        content: m.content,
                        status: m.status,
                        parent,
                        created_at: m.created_at,
                    }
                })
                .collect();

            Ok(MessagePage {
                messages,
                has_next,
                next_cursor,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::commands::SendMessage;
    use crate::testing::Harness;

    fn text(chat_id: RoomId, content: &str, parent_id: Option<MessageId>) -> SendMessage {
        SendMessage {
            chat_id,
            user_id: 1,
            parent_id,
            content: Some(content.to_string()),
            files: vec![],
            client_message_id: None,
        }
    }

    #[tokio::test]
    async fn pages_walk_history_without_gaps() {
        let mut h = Harness::new();
        let room = h.room(1, &[]).await;

        let mut sent = Vec::new();
        for i in 0..7 {
            let m = h.service.send_message(text(room, &format!("m{}", i), None)).await.unwrap();
            sent.push(m.message_id);
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = h.service.get_messages(room, 1, cursor, Some(3)).await.unwrap();
            assert!(page.messages.len() <= 3);
            seen.extend(page.messages.iter().map(|m| m.message_id));
            if !page.has_next {
                assert!(page.next_cursor.is_none());
                break;
            }
            cursor = page.next_cursor;

            // A concurrent insert lands ahead of the cursor and is not replayed.
            h.service.send_message(text(room, "late", None)).await.unwrap();
        }

        sent.reverse();
        assert_eq!(seen, sent);
        assert_eq!(seen.iter().collect::<HashSet<_>>().len(), seen.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_senders_page_in_strict_order() {
        let mut h = Harness::new();
        let room = h.room(1, &[2, 3, 4]).await;

        let senders = (1..=4).map(|user_id| {
            let service = h.service.clone();
            tokio::spawn(async move {
                let mut ids = Vec::new();
                for i in 0..10 {
                    let cmd = SendMessage {
                        user_id,
                        ..text(room, &format!("u{}-{}", user_id, i), None)
                    };
                    ids.push(service.send_message(cmd).await.unwrap().message_id);
                }
                ids
            })
        });
        let sent: HashSet<MessageId> = futures_util::future::join_all(senders)
            .await
            .into_iter()
            .flat_map(|ids| ids.unwrap())
            .collect();
        assert_eq!(sent.len(), 40);

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = h.service.get_messages(room, 1, cursor, Some(7)).await.unwrap();
            seen.extend(page.messages.into_iter().map(|m| (m.created_at, m.message_id, m.user_id)));
            if !page.has_next {
                break;
            }
            cursor = page.next_cursor;
        }

        for pair in seen.windows(2) {
            assert!((pair[0].0, pair[0].1) > (pair[1].0, pair[1].1), "{:?}", pair);
        }
        let user_messages: HashSet<MessageId> = seen
            .iter()
            .filter(|(_, _, user_id)| user_id.is_some())
            .map(|(_, id, _)| *id)
            .collect();
        assert_eq!(user_messages, sent);
    }

    #[tokio::test]
    async fn deleted_parent_still_resolves() {
        let h = Harness::new();
        let room = h.service.open_room(1, "r".into()).await.unwrap().chat_id;

        let parent = h.service.send_message(text(room, "original", None)).await.unwrap();
        let reply = h
            .service
            .send_message(text(room, "reply", Some(parent.message_id)))
            .await
            .unwrap();
        h.service
            .delete_message(room, 1, parent.message_id)
            .await
            .unwrap();

        let page = h.service.get_messages(room, 1, None, None).await.unwrap();
        assert_eq!(page.messages.len(), 1);
        let shown = &page.messages[0];
        assert_eq!(shown.message_id, reply.message_id);
        let p = shown.parent.as_ref().unwrap();
        assert_eq!(p.message_id, parent.message_id);
        assert!(p.deleted);
        assert_eq!(p.content.as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn history_requires_membership() {
        let h = Harness::new();
        let room = h.service.open_room(1, "r".into()).await.unwrap().chat_id;

        let err = h.service.get_messages(room, 2, None, None).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(Missing::Participant)));

        // Out-of-range sizes are clamped rather than rejected.
        let page = h.service.get_messages(room, 1, None, Some(0)).await.unwrap();
        assert!(page.messages.is_empty());
        assert!(!page.has_next);
    }
}
