use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{error, info, warn};

use parley_db::messages::{insert_attachments, transition_status};
use parley_db::models::{AttachmentRow, NewAttachment, now};
use parley_db::{Database, Outbox};
use parley_gateway::Broker;
use parley_types::api::AttachmentInfo;
use parley_types::events::{AttachmentEvent, ChatEvent};
use parley_types::models::{MessageId, MessageStatus, RoomId};

use crate::effects::publish_event;
use crate::error::{ChatError, UploadError};
use crate::service::run_blocking;
use crate::staging::{StagedFile, storage_key};
use crate::storage::ObjectStore;

/// One upload attempt for one message.
#[derive(Debug)]
pub struct UploadJob {
    pub chat_id: RoomId,
    pub message_id: MessageId,
    pub files: Vec<StagedFile>,
    pub client_message_id: Option<String>,
}

/// Moves staged files to durable storage and settles the message state.
///
/// Each attempt runs once; a failed attempt leaves the message FAILED with no
/// attachment rows, and only a client retry starts another one.
pub struct UploadPipeline {
    db: Arc<Database>,
    store: Arc<dyn ObjectStore>,
    broker: Broker,
}

struct Stored {
    key: String,
    attachment: NewAttachment,
}

impl UploadPipeline {
    pub fn new(db: Arc<Database>, store: Arc<dyn ObjectStore>, broker: Broker) -> Self {
        Self { db, store, broker }
    }

    pub async fn run(&self, job: UploadJob) {
        let UploadJob {
            chat_id,
            message_id,
            files,
            client_message_id,
        } = job;

        info!(
            "Uploading {} file(s) for message {} in chat {}",
            files.len(),
            message_id,
            chat_id
        );

        let results = join_all(
            files
                .iter()
                .map(|file| self.upload_one(chat_id, message_id, file)),
        )
        .await;

        let mut stored = Vec::with_capacity(results.len());
        let mut failed = false;
        for (file, result) in files.iter().zip(results) {
            match result {
                Ok(s) => stored.push(s),
                Err(e) => {
                    error!(
                        "Upload failed for message {} in chat {}, file '{}': {}",
                        message_id,
                        chat_id,
                        file.original_name(),
                        e
                    );
                    failed = true;
                }
            }
        }

        // Staged copies go away on every path from here.
        drop(files);

        let settled = if failed {
            self.settle_failed(chat_id, message_id, client_message_id).await
        } else {
            self.settle_completed(chat_id, message_id, &stored, client_message_id)
                .await
        };

        match settled {
            Ok(true) if !failed => return,
            Ok(true) => {}
            Ok(false) => warn!(
                "Message {} changed state during upload; discarding this attempt",
                message_id
            ),
            Err(e) => error!(
                "Failed to record upload outcome for message {}: {}",
                message_id, e
            ),
        }

        self.discard(&stored).await;
    }

    async fn upload_one(
        &self,
        chat_id: RoomId,
        message_id: MessageId,
        file: &StagedFile,
    ) -> Result<Stored, UploadError> {
        let key = storage_key(chat_id, message_id, file.original_name());
        let url = self.store.put(&key, file).await?;
        Ok(Stored {
            key,
            attachment: NewAttachment {
                url,
                mime_type: file.content_type().to_string(),
                size_bytes: file.size(),
            },
        })
    }

    /// UPLOADING -> NORMAL with attachment rows, in one transaction.
    /// Returns false when the message was no longer UPLOADING.
    async fn settle_completed(
        &self,
        chat_id: RoomId,
        message_id: MessageId,
        stored: &[Stored],
        client_message_id: Option<String>,
    ) -> Result<bool, ChatError> {
        let db = self.db.clone();
        let attachments: Vec<NewAttachment> = stored.iter().map(|s| s.attachment.clone()).collect();

        let (settled, events) = run_blocking(move || {
            db.transaction(|conn, outbox: &mut Outbox<ChatEvent>| {
                if !transition_status(conn, message_id, MessageStatus::Normal)? {
                    return Ok(false);
                }
                let rows = insert_attachments(conn, message_id, &attachments, &now())?;
                outbox.push(ChatEvent::Attachment(AttachmentEvent {
                    message_id,
                    chat_id,
                    status: MessageStatus::Normal,
                    attachments: rows.iter().map(attachment_info).collect(),
                    client_message_id,
                }));
                Ok::<_, ChatError>(true)
            })
        })
        .await?;

        if settled {
            info!(
                "Message {} in chat {} is NORMAL with {} attachment(s)",
                message_id,
                chat_id,
                stored.len()
            );
        }
        self.publish_all(events).await;
        Ok(settled)
    }

    /// UPLOADING -> FAILED, announced with an empty attachment list.
    async fn settle_failed(
        &self,
        chat_id: RoomId,
        message_id: MessageId,
        client_message_id: Option<String>,
    ) -> Result<bool, ChatError> {
        let db = self.db.clone();
        let (settled, events) = run_blocking(move || {
            db.transaction(|conn, outbox: &mut Outbox<ChatEvent>| {
                if !transition_status(conn, message_id, MessageStatus::Failed)? {
                    return Ok(false);
                }
                outbox.push(ChatEvent::Attachment(AttachmentEvent {
                    message_id,
                    chat_id,
                    status: MessageStatus::Failed,
                    attachments: Vec::new(),
                    client_message_id,
                }));
                Ok::<_, ChatError>(true)
            })
        })
        .await?;

        if settled {
            warn!("Message {} in chat {} marked FAILED", message_id, chat_id);
        }
        self.publish_all(events).await;
        Ok(settled)
    }

    async fn publish_all(&self, events: Vec<ChatEvent>) {
        for event in &events {
            publish_event(&self.broker, event).await;
        }
    }

    /// Best-effort removal of objects from an attempt that did not stick.
    async fn discard(&self, stored: &[Stored]) {
        for s in stored {
            if let Err(e) = self.store.delete(&s.key).await {
                warn!("Failed to delete orphaned object {}: {}", s.key, e);
            }
        }
    }
}

pub(crate) fn attachment_info(row: &AttachmentRow) -> AttachmentInfo {
    AttachmentInfo {
        attachment_id: row.id,
        attachment_url: row.url.clone(),
        mime_type: row.mime_type.clone(),
        size_bytes: row.size_bytes,
    }
}
