use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row};

use parley_types::models::{Cursor, MessageId, MessageStatus, RoomId};

use crate::Database;
use crate::models::{
    AttachmentRow, MessageRow, NewAttachment, NewMessage, encode_ts, opt_ts_column,
    status_column, ts_column,
};

const MESSAGE_SELECT: &str =
    "SELECT m.id, m.room_id, m.participant_id, p.user_id, m.parent_id, m.content,
            m.status, m.created_at, m.deleted_at
     FROM messages m
     LEFT JOIN participants p ON p.id = m.participant_id";

impl Database {
    pub fn get_message(&self, id: MessageId) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| Ok(get_message(conn, id)?))
    }

    /// One page of live messages in `(created_at DESC, id DESC)` order,
    /// strictly after `cursor` when given.
    pub fn page_messages(
        &self,
        room_id: RoomId,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| Ok(page_messages(conn, room_id, cursor, limit)?))
    }

    /// Batch-fetch messages by id, deleted ones included.
    pub fn messages_by_ids(&self, ids: &[MessageId]) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| Ok(messages_by_ids(conn, ids)?))
    }

    /// Batch-fetch attachments for a set of message ids.
    pub fn attachments_for_messages(&self, ids: &[MessageId]) -> Result<Vec<AttachmentRow>> {
        self.with_conn(|conn| Ok(attachments_for_messages(conn, ids)?))
    }
}

pub fn insert_message(conn: &Connection, msg: &NewMessage<'_>) -> rusqlite::Result<MessageId> {
    conn.execute(
        "INSERT INTO messages (room_id, participant_id, parent_id, content, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            msg.room_id,
            msg.participant_id,
            msg.parent_id,
            msg.content,
            msg.status.as_str(),
            encode_ts(&msg.created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_message(conn: &Connection, id: MessageId) -> rusqlite::Result<Option<MessageRow>> {
    conn.query_row(&format!("{} WHERE m.id = ?1", MESSAGE_SELECT), [id], map_message)
        .optional()
}

/// A non-deleted message that belongs to `room_id`. Used to validate reply
/// targets and retry requests.
pub fn find_live_message(
    conn: &Connection,
    room_id: RoomId,
    id: MessageId,
) -> rusqlite::Result<Option<MessageRow>> {
    conn.query_row(
        &format!(
            "{} WHERE m.id = ?1 AND m.room_id = ?2 AND m.deleted_at IS NULL",
            MESSAGE_SELECT
        ),
        [id, room_id],
        map_message,
    )
    .optional()
}

/// Apply a status transition only if the stored state allows it.
/// Returns false when the row was missing or in an incompatible state.
pub fn transition_status(
    conn: &Connection,
    id: MessageId,
    next: MessageStatus,
) -> rusqlite::Result<bool> {
    let allowed = MessageStatus::predecessors(next);
    let placeholders: Vec<String> = (0..allowed.len()).map(|i| format!("?{}", i + 3)).collect();
    let sql = format!(
        "UPDATE messages SET status = ?2 WHERE id = ?1 AND deleted_at IS NULL AND status IN ({})",
        placeholders.join(", ")
    );

    let next_str = next.as_str();
    let allowed_strs: Vec<&'static str> = allowed.iter().map(|s| s.as_str()).collect();
    let mut params: Vec<&dyn ToSql> = vec![&id, &next_str];
    params.extend(allowed_strs.iter().map(|s| s as &dyn ToSql));

    let changed = conn.execute(&sql, params.as_slice())?;
    Ok(changed == 1)
}

/// Soft-delete: status and `deleted_at` change in one statement.
/// Returns false if the message was missing or already deleted.
pub fn soft_delete_message(
    conn: &Connection,
    id: MessageId,
    at: &DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE messages SET status = ?2, deleted_at = ?3
         WHERE id = ?1 AND deleted_at IS NULL",
        (id, MessageStatus::Deleted.as_str(), encode_ts(at)),
    )?;
    Ok(changed == 1)
}

pub fn page_messages(
    conn: &Connection,
    room_id: RoomId,
    cursor: Option<&Cursor>,
    limit: u32,
) -> rusqlite::Result<Vec<MessageRow>> {
    let rows = match cursor {
        None => {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE m.room_id = ?1 AND m.deleted_at IS NULL
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2",
                MESSAGE_SELECT
            ))?;
            stmt.query_map(rusqlite::params![room_id, limit], map_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
        Some(cursor) => {
            // Row-value comparison keeps the keyset strict under ties on created_at.
            let mut stmt = conn.prepare(&format!(
                "{} WHERE m.room_id = ?1 AND m.deleted_at IS NULL
                   AND (m.created_at < ?2 OR (m.created_at = ?2 AND m.id < ?3))
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?4",
                MESSAGE_SELECT
            ))?;
            stmt.query_map(
                rusqlite::params![
                    room_id,
                    encode_ts(&cursor.created_at),
                    cursor.message_id,
                    limit
                ],
                map_message,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        }
    };

    Ok(rows)
}

pub fn messages_by_ids(conn: &Connection, ids: &[MessageId]) -> rusqlite::Result<Vec<MessageRow>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!("{} WHERE m.id IN ({})", MESSAGE_SELECT, placeholders.join(", "));

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();

    let rows = stmt
        .query_map(params.as_slice(), map_message)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

pub fn insert_attachments(
    conn: &Connection,
    message_id: MessageId,
    attachments: &[NewAttachment],
    now: &DateTime<Utc>,
) -> rusqlite::Result<Vec<AttachmentRow>> {
    let created_at = encode_ts(now);
    let mut stmt = conn.prepare(
        "INSERT INTO attachments (message_id, url, mime_type, size_bytes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;

    let mut rows = Vec::with_capacity(attachments.len());
    for a in attachments {
        stmt.execute(rusqlite::params![
            message_id,
            &a.url,
            &a.mime_type,
            a.size_bytes as i64,
            &created_at
        ])?;
        rows.push(AttachmentRow {
            id: conn.last_insert_rowid(),
            message_id,
            url: a.url.clone(),
            mime_type: a.mime_type.clone(),
            size_bytes: a.size_bytes,
            created_at: *now,
        });
    }

    Ok(rows)
}

pub fn attachments_for_messages(
    conn: &Connection,
    ids: &[MessageId],
) -> rusqlite::Result<Vec<AttachmentRow>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT id, message_id, url, mime_type, size_bytes, created_at
         FROM attachments WHERE message_id IN ({})
         ORDER BY id",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(AttachmentRow {
                id: row.get(0)?,
                message_id: row.get(1)?,
                url: row.get(2)?,
                mime_type: row.get(3)?,
                size_bytes: row.get::<_, i64>(4)? as u64,
                created_at: ts_column(row, 5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        participant_id: row.get(2)?,
        user_id: row.get(3)?,
        parent_id: row.get(4)?,
        content: row.get(5)?,
        status: status_column(row, 6)?,
        created_at: ts_column(row, 7)?,
        deleted_at: opt_ts_column(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Outbox;
    use crate::models::now;
    use crate::queries::{insert_participant, insert_room};
    use parley_types::models::ParticipantRole;

    fn seed_room(db: &Database) -> (RoomId, i64) {
        let t = now();
        let (ids, _) = db
            .transaction(|conn, _: &mut Outbox<()>| {
                let room = insert_room(conn, "r1", &t)?;
                let part = insert_participant(conn, room.id, 1, ParticipantRole::Member, &t)?;
                Ok::<_, rusqlite::Error>((room.id, part.id))
            })
            .unwrap();
        ids
    }

    fn insert_at(db: &Database, room_id: RoomId, part: i64, at: DateTime<Utc>, text: &str) -> MessageId {
        let (id, _) = db
            .transaction(|conn, _: &mut Outbox<()>| {
                insert_message(
                    conn,
                    &NewMessage {
                        room_id,
                        participant_id: Some(part),
                        parent_id: None,
                        content: Some(text),
                        status: MessageStatus::Normal,
                        created_at: at,
                    },
                )
            })
            .unwrap();
        id
    }

    #[test]
    fn keyset_pages_have_no_duplicates_or_gaps() {
        let db = Database::open_in_memory().unwrap();
        let (room, part) = seed_room(&db);

        // Several messages share a timestamp so the id tie-breaker matters.
        let base = now();
        let mut inserted = Vec::new();
        for i in 0..11 {
            let at = base + chrono::Duration::milliseconds((i / 3) as i64);
            inserted.push(insert_at(&db, room, part, at, &format!("m{}", i)));
        }

        let mut seen = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let page = db.page_messages(room, cursor.as_ref(), 4).unwrap();
            if page.is_empty() {
                break;
            }
            // A writer landing between pages must not shift the next page.
            if seen.is_empty() {
                insert_at(&db, room, part, base + chrono::Duration::seconds(10), "late");
            }
            let last = page.last().unwrap();
            cursor = Some(Cursor { created_at: last.created_at, message_id: last.id });
            seen.extend(page.into_iter().map(|m| m.id));
        }

        let mut expected = inserted.clone();
        expected.reverse();
        assert_eq!(seen, expected);
    }

    #[test]
    fn deleted_messages_hidden_from_pages_but_resolvable() {
        let db = Database::open_in_memory().unwrap();
        let (room, part) = seed_room(&db);
        let t = now();
        let keep = insert_at(&db, room, part, t, "keep");
        let gone = insert_at(&db, room, part, t, "gone");

        db.transaction(|conn, _: &mut Outbox<()>| {
            assert!(soft_delete_message(conn, gone, &t)?);
            assert!(!soft_delete_message(conn, gone, &t)?);
            assert!(find_live_message(conn, room, gone)?.is_none());
            Ok::<_, rusqlite::Error>(())
        })
        .unwrap();

        let page = db.page_messages(room, None, 10).unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![keep]);

        let by_id = db.messages_by_ids(&[gone]).unwrap();
        assert_eq!(by_id.len(), 1);
        assert!(by_id[0].is_deleted());
        assert_eq!(by_id[0].status, MessageStatus::Deleted);
        assert_eq!(by_id[0].user_id, Some(1));
    }

    #[test]
    fn guarded_status_transitions() {
        let db = Database::open_in_memory().unwrap();
        let (room, part) = seed_room(&db);
        let t = now();

        let (id, _) = db
            .transaction(|conn, _: &mut Outbox<()>| {
                insert_message(
                    conn,
                    &NewMessage {
                        room_id: room,
                        participant_id: Some(part),
                        parent_id: None,
                        content: None,
                        status: MessageStatus::Uploading,
                        created_at: t,
                    },
                )
            })
            .unwrap();

        db.transaction(|conn, _: &mut Outbox<()>| {
            assert!(transition_status(conn, id, MessageStatus::Failed)?);
            assert!(!transition_status(conn, id, MessageStatus::Normal)?);
            assert!(transition_status(conn, id, MessageStatus::Uploading)?);
            assert!(transition_status(conn, id, MessageStatus::Normal)?);
            assert!(!transition_status(conn, id, MessageStatus::Failed)?);
            Ok::<_, rusqlite::Error>(())
        })
        .unwrap();

        assert_eq!(db.get_message(id).unwrap().unwrap().status, MessageStatus::Normal);
    }

    #[test]
    fn attachments_batch_lookup() {
        let db = Database::open_in_memory().unwrap();
        let (room, part) = seed_room(&db);
        let t = now();
        let a = insert_at(&db, room, part, t, "a");
        let b = insert_at(&db, room, part, t, "b");

        db.transaction(|conn, _: &mut Outbox<()>| {
            insert_attachments(
                conn,
                a,
                &[
                    NewAttachment { url: "/files/x".into(), mime_type: "image/png".into(), size_bytes: 3 },
                    NewAttachment { url: "/files/y".into(), mime_type: "text/plain".into(), size_bytes: 5 },
                ],
                &t,
            )
        })
        .unwrap();

        let rows = db.attachments_for_messages(&[a, b]).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.message_id == a));
        assert_eq!(rows[1].size_bytes, 5);
        assert!(db.attachments_for_messages(&[]).unwrap().is_empty());
    }
}
