use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (rooms, participants, messages, attachments)");
        conn.execute_batch(
            "
            CREATE TABLE rooms (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                title            TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                last_message_at  TEXT
            );

            CREATE TABLE participants (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id     INTEGER NOT NULL REFERENCES rooms(id),
                user_id     INTEGER NOT NULL,
                role        TEXT NOT NULL DEFAULT 'MEMBER',
                joined_at   TEXT NOT NULL,
                left_at     TEXT
            );

            -- At most one active membership per (room, user)
            CREATE UNIQUE INDEX idx_participants_active
                ON participants(room_id, user_id) WHERE left_at IS NULL;

            CREATE INDEX idx_participants_user
                ON participants(user_id, left_at);

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id         INTEGER NOT NULL REFERENCES rooms(id),
                participant_id  INTEGER REFERENCES participants(id),
                parent_id       INTEGER REFERENCES messages(id),
                content         TEXT,
                status          TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                deleted_at      TEXT
            );

            CREATE INDEX idx_messages_room_keyset
                ON messages(room_id, created_at DESC, id DESC);

            CREATE TABLE attachments (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                url         TEXT NOT NULL,
                mime_type   TEXT NOT NULL,
                size_bytes  INTEGER NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_attachments_message
                ON attachments(message_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
