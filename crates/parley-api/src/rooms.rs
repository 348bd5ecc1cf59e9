use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use parley_types::api::{Claims, OpenRoomRequest};
use parley_types::models::RoomId;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath};

pub async fn open_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<OpenRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let room = state.chat.open_room(claims.sub, req.title).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

pub async fn room_info(
    State(state): State<AppState>,
    ApiPath(room_id): ApiPath<RoomId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let info = state.chat.room_info(room_id, claims.sub).await?;
    Ok(Json(info))
}

/// The caller joins the room.
pub async fn add_participant(
    State(state): State<AppState>,
    ApiPath(room_id): ApiPath<RoomId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let participant = state.chat.add_participant(room_id, claims.sub).await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

pub async fn leave_room(
    State(state): State<AppState>,
    ApiPath(room_id): ApiPath<RoomId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.chat.leave_room(room_id, claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn my_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let rooms = state.chat.my_rooms(claims.sub).await?;
    Ok(Json(rooms))
}
