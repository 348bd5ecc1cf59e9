pub mod messages;
pub mod migrations;
pub mod models;
pub mod outbox;
pub mod queries;

use anyhow::Result;
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::info;

pub use outbox::Outbox;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Run `f` inside one write transaction.
    ///
    /// Side effects queued on the [`Outbox`] are returned only once the
    /// transaction has committed. If `f` fails or the commit fails, the
    /// transaction rolls back and the queued effects are dropped unrun.
    pub fn transaction<T, E, Ev, F>(&self, f: F) -> std::result::Result<(T, Vec<Ev>), E>
    where
        F: FnOnce(&Connection, &mut Outbox<Ev>) -> std::result::Result<T, E>,
        E: From<rusqlite::Error>,
    {
        // A panic inside an earlier closure leaves the connection usable;
        // its transaction was rolled back on unwind.
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut outbox = Outbox::new();
        let value = f(&tx, &mut outbox)?;
        tx.commit()?;

        Ok((value, outbox.into_effects()))
    }
}
