//! SQLite storage for the local Linkshelf backend.
//!
//! One [`Database`] holds the `users` and `bookmarks` tables. Opening it sets
//! the connection pragmas the bookmark constraints rely on and brings the
//! schema up to [`migrations::CURRENT_SCHEMA_VERSION`].

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use super::migrations;

/// How long a write waits on a lock held by another connection to the same file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The local bookmark store. Owned by `LocalBackend` behind a mutex.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (or creates) the bookmark database file at `path`.
    ///
    /// The file is switched to WAL so a second process reading the shelf does
    /// not block the writer.
    ///
    /// # Errors
    /// Returns `rusqlite::Error` if the file cannot be opened or migrated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::prepare(conn)
    }

    /// A private bookmark database that vanishes on drop.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::prepare(Connection::open_in_memory()?)
    }

    /// Foreign keys must be on for `bookmarks.user_id` to be checked.
    fn prepare(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run_all(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
