use tracing::info;

use parley_db::models::{ParticipantRow, RoomRow, now};
use parley_db::queries::{
    find_active_participant, get_room, insert_participant, insert_room, leave_participant,
};
use parley_types::api::{ParticipantResponse, RoomInfoResponse};
use parley_types::models::{ParticipantRole, RoomId, UserId};

use crate::commands::{active_participant, record_system_message};
use crate::error::{ChatError, Missing};
use crate::service::ChatService;

const MAX_TITLE_LEN: usize = 100;

impl ChatService {
    /// Create a room with `user_id` as its manager.
    pub async fn open_room(&self, user_id: UserId, title: String) -> Result<RoomInfoResponse, ChatError> {
        let title = title.trim().to_string();
        if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
            return Err(ChatError::validation(format!(
                "room title must be 1-{} characters",
                MAX_TITLE_LEN
            )));
        }

        let room = self
            .write(move |conn, _outbox| {
                let t = now();
                let room = insert_room(conn, &title, &t)?;
                insert_participant(conn, room.id, user_id, ParticipantRole::Manager, &t)?;
                Ok(room)
            })
            .await?;

        info!("user {} opened chat {}", user_id, room.id);
        Ok(room_info(room, 1, true))
    }

    /// Join the caller to a room as a member.
    pub async fn add_participant(
        &self,
        chat_id: RoomId,
        user_id: UserId,
    ) -> Result<ParticipantResponse, ChatError> {
        let participant = self
            .write(move |conn, outbox| {
                get_room(conn, chat_id)?.ok_or(ChatError::NotFound(Missing::Chat))?;
                if find_active_participant(conn, chat_id, user_id)?.is_some() {
                    return Err(ChatError::AlreadyParticipant { chat_id, user_id });
                }
                let participant =
                    insert_participant(conn, chat_id, user_id, ParticipantRole::Member, &now())?;
                record_system_message(conn, outbox, chat_id, &format!("user {} joined", user_id))?;
                Ok(participant)
            })
            .await?;

        info!("user {} joined chat {}", user_id, chat_id);
        Ok(participant_response(participant))
    }

    pub async fn leave_room(&self, chat_id: RoomId, user_id: UserId) -> Result<(), ChatError> {
        self.write(move |conn, outbox| {
            let participant = active_participant(conn, chat_id, user_id)?;
            if !leave_participant(conn, participant.id, &now())? {
                return Err(ChatError::NotFound(Missing::Participant));
            }
            record_system_message(conn, outbox, chat_id, &format!("user {} left", user_id))?;
            Ok(())
        })
        .await?;

        info!("user {} left chat {}", user_id, chat_id);
        Ok(())
    }

    pub async fn room_info(&self, chat_id: RoomId, user_id: UserId) -> Result<RoomInfoResponse, ChatError> {
        self.read(move |db| {
            let room = db
                .get_room(chat_id)?
                .ok_or(ChatError::NotFound(Missing::Chat))?;
            let count = db.count_active_participants(chat_id)?;
            let participating = db.find_active_participant(chat_id, user_id)?.is_some();
            Ok(room_info(room, count, participating))
        })
        .await
    }

    /// Rooms the caller is in, most recently active first.
    pub async fn my_rooms(&self, user_id: UserId) -> Result<Vec<RoomInfoResponse>, ChatError> {
        self.read(move |db| {
            let rooms = db.rooms_for_user(user_id)?;
            let mut out = Vec::with_capacity(rooms.len());
            for room in rooms {
                let count = db.count_active_participants(room.id)?;
                out.push(room_info(room, count, true));
            }
            Ok(out)
        })
        .await
    }
}

fn room_info(room: RoomRow, participant_count: u32, participating: bool) -> RoomInfoResponse {
    RoomInfoResponse {
        chat_id: room.id,
        title: room.title,
        created_at: room.created_at,
        last_message_at: room.last_message_at,
        participant_count,
        participating,
    }
}

fn participant_response(p: ParticipantRow) -> ParticipantResponse {
    ParticipantResponse {
        chat_part_id: p.id,
        chat_id: p.room_id,
        user_id: p.user_id,
        role: p.role,
        joined_at: p.joined_at,
    }
}
