use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use parley_chat::{IncomingFile, ResendAttachment, SendMessage};
use parley_types::api::Claims;
use parley_types::models::{Cursor, MessageId, RoomId};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::{ApiMultipart, ApiPath, ApiQuery};

#[derive(Debug, Default)]
struct MessageForm {
    parent_id: Option<MessageId>,
    message: Option<String>,
    client_message_id: Option<String>,
    files: Vec<IncomingFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub cursor_created_at: Option<DateTime<Utc>>,
    pub cursor_message_id: Option<MessageId>,
    pub size: Option<u32>,
}

impl MessageQuery {
    fn cursor(&self) -> Result<Option<Cursor>, ApiError> {
        match (self.cursor_created_at, self.cursor_message_id) {
            (Some(created_at), Some(message_id)) => Ok(Some(Cursor {
                created_at,
                message_id,
            })),
            (None, None) => Ok(None),
            _ => Err(ApiError::bad_request(
                "cursorCreatedAt and cursorMessageId must be given together",
            )),
        }
    }
}

/// POST /chat/{room_id}/send (multipart)
pub async fn send_message(
    State(state): State<AppState>,
    ApiPath(room_id): ApiPath<RoomId>,
    Extension(claims): Extension<Claims>,
    ApiMultipart(multipart): ApiMultipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_form(multipart, state.max_file_bytes).await?;

    state
        .chat
        .send_message(SendMessage {
            chat_id: room_id,
            user_id: claims.sub,
            parent_id: form.parent_id,
            content: form.message,
            files: form.files,
            client_message_id: form.client_message_id,
        })
        .await?;

    Ok(StatusCode::ACCEPTED)
}

/// POST /chat/{room_id}/message/{message_id}/retry (multipart)
pub async fn retry_attachment(
    State(state): State<AppState>,
    ApiPath((room_id, message_id)): ApiPath<(RoomId, MessageId)>,
    Extension(claims): Extension<Claims>,
    ApiMultipart(multipart): ApiMultipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_form(multipart, state.max_file_bytes).await?;

    state
        .chat
        .resend_attachment(ResendAttachment {
            chat_id: room_id,
            user_id: claims.sub,
            message_id,
            files: form.files,
            client_message_id: form.client_message_id,
        })
        .await?;

    Ok(StatusCode::ACCEPTED)
}

/// GET /chat/{room_id}/messages?cursorCreatedAt=&cursorMessageId=&size=
pub async fn get_messages(
    State(state): State<AppState>,
    ApiPath(room_id): ApiPath<RoomId>,
    ApiQuery(query): ApiQuery<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let cursor = query.cursor()?;
    let page = state
        .chat
        .get_messages(room_id, claims.sub, cursor, query.size)
        .await?;
    Ok(Json(page))
}

/// DELETE /chat/{room_id}/message/{message_id}
pub async fn delete_message(
    State(state): State<AppState>,
    ApiPath((room_id, message_id)): ApiPath<(RoomId, MessageId)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .chat
        .delete_message(room_id, claims.sub, message_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_form(mut multipart: Multipart, max_file_bytes: usize) -> Result<MessageForm, ApiError> {
    let mut form = MessageForm::default();

    while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" | "files[]" => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let content_type = field.content_type().map(str::to_string);

                let mut data = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(malformed)? {
                    if data.len() + chunk.len() > max_file_bytes {
                        return Err(ApiError::bad_request(format!(
                            "file '{}' exceeds {} bytes",
                            file_name, max_file_bytes
                        )));
                    }
                    data.extend_from_slice(&chunk);
                }

                form.files.push(IncomingFile {
                    file_name,
                    content_type,
                    data: data.freeze(),
                });
            }
            "message" => form.message = Some(field.text().await.map_err(malformed)?),
            "clientMessageId" => {
                let id = field.text().await.map_err(malformed)?;
                form.client_message_id = Some(id).filter(|s| !s.is_empty());
            }
            "parentId" => {
                let raw = field.text().await.map_err(malformed)?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    let id = raw
                        .parse()
                        .map_err(|_| ApiError::bad_request("parentId must be a number"))?;
                    form.parent_id = Some(id);
                }
            }
            other => warn!("Ignoring unexpected multipart field '{}'", other),
        }
    }

    Ok(form)
}

fn malformed(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::bad_request(format!("malformed multipart body: {}", e))
}
