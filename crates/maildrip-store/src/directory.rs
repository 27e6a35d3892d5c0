//! SQLite subscriber directory.
//!
//! Backs the identity collaborator: display names for registered
//! subscribers and the audiences for the two recurring broadcasts. Daily
//! reminders go to engaged subscribers with notifications enabled; the
//! weekly re-engagement nudge targets the not-yet-engaged ones.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};

use maildrip_core::error::{MaildripError, Result};
use maildrip_core::traits::Directory;
use maildrip_core::types::{BroadcastKind, BroadcastRecipient};

/// Directory implementation over a `subscribers` table.
pub struct SqliteDirectory {
    conn: Mutex<Connection>,
}

impl SqliteDirectory {
    /// Open or create the directory database. Sharing the store's database
    /// file is fine — the table namespaces do not overlap.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        let dir = Self {
            conn: Mutex::new(conn),
        };
        dir.migrate()?;
        Ok(dir)
    }

    /// In-memory directory for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let dir = Self {
            conn: Mutex::new(conn),
        };
        dir.migrate()?;
        Ok(dir)
    }

    fn migrate(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS subscribers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE COLLATE NOCASE,
                display_name TEXT,
                notifications_enabled INTEGER NOT NULL DEFAULT 1,
                engaged INTEGER NOT NULL DEFAULT 0
            );
         ",
            )
            .map_err(|e| MaildripError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Register a subscriber. Returns the new id.
    pub fn add_subscriber(
        &self,
        address: &str,
        display_name: Option<&str>,
        notifications_enabled: bool,
        engaged: bool,
    ) -> Result<i64> {
        // Keep the guard across the rowid read, same as the store.
        let conn = self.conn();
        conn.execute(
            "INSERT INTO subscribers (address, display_name, notifications_enabled, engaged)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                address,
                display_name,
                notifications_enabled as i32,
                engaged as i32
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Flip the engagement flag (moves a subscriber between the daily and
    /// weekly broadcast audiences).
    pub fn set_engaged(&self, subscriber_id: i64, engaged: bool) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE subscribers SET engaged = ?1 WHERE id = ?2",
                params![engaged as i32, subscriber_id],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

impl Directory for SqliteDirectory {
    fn display_name(&self, subscriber_id: i64) -> Option<String> {
        self.conn()
            .query_row(
                "SELECT display_name FROM subscribers WHERE id = ?1",
                params![subscriber_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .ok()
            .flatten()
            .flatten()
    }

    fn broadcast_eligible(&self, kind: BroadcastKind) -> Result<Vec<BroadcastRecipient>> {
        let engaged = match kind {
            BroadcastKind::Daily => 1,
            BroadcastKind::Weekly => 0,
        };
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT address, display_name FROM subscribers
                 WHERE notifications_enabled = 1 AND engaged = ?1 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![engaged], |row| {
                Ok(BroadcastRecipient {
                    address: row.get(0)?,
                    display_name: row.get(1)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> MaildripError {
    MaildripError::Store(e.to_string())
}
