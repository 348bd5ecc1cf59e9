use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use parley_types::models::{ParticipantId, ParticipantRole, RoomId, UserId};

use crate::Database;
use crate::models::{
    ParticipantRow, RoomRow, encode_ts, opt_ts_column, role_column, ts_column,
};

const ROOM_COLUMNS: &str = "id, title, created_at, last_message_at";
const PARTICIPANT_COLUMNS: &str = "id, room_id, user_id, role, joined_at, left_at";

impl Database {
    // -- Rooms --

    pub fn get_room(&self, id: RoomId) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| Ok(get_room(conn, id)?))
    }

    /// Rooms the user is an active participant of, most recently active first.
    pub fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| Ok(rooms_for_user(conn, user_id)?))
    }

    // -- Participants --

    pub fn find_active_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<ParticipantRow>> {
        self.with_conn(|conn| Ok(find_active_participant(conn, room_id, user_id)?))
    }

    pub fn count_active_participants(&self, room_id: RoomId) -> Result<u32> {
        self.with_conn(|conn| Ok(count_active_participants(conn, room_id)?))
    }
}

// Free functions below take a plain `&Connection` so they compose inside a
// caller's transaction.

pub fn insert_room(conn: &Connection, title: &str, now: &DateTime<Utc>) -> rusqlite::Result<RoomRow> {
    conn.execute(
        "INSERT INTO rooms (title, created_at) VALUES (?1, ?2)",
        (title, encode_ts(now)),
    )?;
    Ok(RoomRow {
        id: conn.last_insert_rowid(),
        title: title.to_string(),
        created_at: *now,
        last_message_at: None,
    })
}

pub fn get_room(conn: &Connection, id: RoomId) -> rusqlite::Result<Option<RoomRow>> {
    conn.query_row(
        &format!("SELECT {} FROM rooms WHERE id = ?1", ROOM_COLUMNS),
        [id],
        map_room,
    )
    .optional()
}

/// Denormalised "last activity" used to sort room listings.
pub fn touch_room(conn: &Connection, id: RoomId, at: &DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE rooms SET last_message_at = ?2 WHERE id = ?1",
        (id, encode_ts(at)),
    )?;
    Ok(())
}

pub fn rooms_for_user(conn: &Connection, user_id: UserId) -> rusqlite::Result<Vec<RoomRow>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.title, r.created_at, r.last_message_at
         FROM rooms r
         JOIN participants p ON p.room_id = r.id
         WHERE p.user_id = ?1 AND p.left_at IS NULL
         ORDER BY r.last_message_at IS NULL, r.last_message_at DESC, r.id DESC",
    )?;

    let rows = stmt
        .query_map([user_id], map_room)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

pub fn insert_participant(
    conn: &Connection,
    room_id: RoomId,
    user_id: UserId,
    role: ParticipantRole,
    now: &DateTime<Utc>,
) -> rusqlite::Result<ParticipantRow> {
    conn.execute(
        "INSERT INTO participants (room_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
        (room_id, user_id, role.as_str(), encode_ts(now)),
    )?;
    Ok(ParticipantRow {
        id: conn.last_insert_rowid(),
        room_id,
        user_id,
        role,
        joined_at: *now,
        left_at: None,
    })
}

pub fn find_active_participant(
    conn: &Connection,
    room_id: RoomId,
    user_id: UserId,
) -> rusqlite::Result<Option<ParticipantRow>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM participants WHERE room_id = ?1 AND user_id = ?2 AND left_at IS NULL",
            PARTICIPANT_COLUMNS
        ),
        [room_id, user_id],
        map_participant,
    )
    .optional()
}

/// Mark a participant as departed. Returns false if it had already left.
pub fn leave_participant(
    conn: &Connection,
    participant_id: ParticipantId,
    now: &DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE participants SET left_at = ?2 WHERE id = ?1 AND left_at IS NULL",
        (participant_id, encode_ts(now)),
    )?;
    Ok(changed == 1)
}

pub fn count_active_participants(conn: &Connection, room_id: RoomId) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COUNT(*) FROM participants WHERE room_id = ?1 AND left_at IS NULL",
        [room_id],
        |row| row.get(0),
    )
}

fn map_room(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: ts_column(row, 2)?,
        last_message_at: opt_ts_column(row, 3)?,
    })
}

fn map_participant(row: &Row<'_>) -> rusqlite::Result<ParticipantRow> {
    Ok(ParticipantRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        user_id: row.get(2)?,
        role: role_column(row, 3)?,
        joined_at: ts_column(row, 4)?,
        left_at: opt_ts_column(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now;

    #[test]
    fn one_active_membership_per_user() {
        let db = Database::open_in_memory().unwrap();
        let t = now();

        let (room, _) = db
            .transaction(|conn, _: &mut crate::Outbox<()>| {
                let room = insert_room(conn, "support", &t)?;
                insert_participant(conn, room.id, 7, ParticipantRole::Member, &t)?;
                Ok::<_, rusqlite::Error>(room)
            })
            .unwrap();

        // Second active row for the same (room, user) violates the partial index.
        let dup = db.transaction(|conn, _: &mut crate::Outbox<()>| {
            insert_participant(conn, room.id, 7, ParticipantRole::Member, &t)
        });
        assert!(dup.is_err());

        // After leaving, re-joining creates a fresh row.
        let first = db.find_active_participant(room.id, 7).unwrap().unwrap();
        db.transaction(|conn, _: &mut crate::Outbox<()>| {
            assert!(leave_participant(conn, first.id, &t)?);
            assert!(!leave_participant(conn, first.id, &t)?);
            insert_participant(conn, room.id, 7, ParticipantRole::Member, &t)
        })
        .unwrap();

        let second = db.find_active_participant(room.id, 7).unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(db.count_active_participants(room.id).unwrap(), 1);
    }

    #[test]
    fn rooms_sorted_by_last_activity() {
        let db = Database::open_in_memory().unwrap();
        let t0 = now();
        let t1 = t0 + chrono::Duration::seconds(5);

        db.transaction(|conn, _: &mut crate::Outbox<()>| {
            let quiet = insert_room(conn, "quiet", &t0)?;
            let busy = insert_room(conn, "busy", &t0)?;
            let idle = insert_room(conn, "never used", &t0)?;
            for room in [&quiet, &busy, &idle] {
                insert_participant(conn, room.id, 1, ParticipantRole::Member, &t0)?;
            }
            touch_room(conn, quiet.id, &t0)?;
            touch_room(conn, busy.id, &t1)?;
            Ok::<_, rusqlite::Error>(())
        })
        .unwrap();

        let titles: Vec<String> = db
            .rooms_for_user(1)
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["busy", "quiet", "never used"]);
    }

    #[test]
    fn rolled_back_transaction_drops_outbox() {
        let db = Database::open_in_memory().unwrap();
        let t = now();

        let result = db.transaction(|conn, outbox: &mut crate::Outbox<&'static str>| {
            insert_room(conn, "doomed", &t)?;
            outbox.push("notify");
            Err::<(), _>(rusqlite::Error::QueryReturnedNoRows)
        });
        assert!(result.is_err());
        assert!(db.rooms_for_user(1).unwrap().is_empty());
        assert!(db.get_room(1).unwrap().is_none());

        let ((), effects) = db
            .transaction(|_, outbox: &mut crate::Outbox<&'static str>| {
                outbox.push("notify");
                Ok::<_, rusqlite::Error>(())
            })
            .unwrap();
        assert_eq!(effects, vec!["notify"]);
    }
}
