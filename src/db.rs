use log::error;
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::path::Path;

/// Small persistent key/value store for client-side session state.
pub struct TokenStore {
    conn: Connection,
}

impl TokenStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session (key TEXT NOT NULL PRIMARY KEY, value TEXT NOT NULL) WITHOUT ROWID",
            (),
        )?;
        Ok(TokenStore { conn })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.get_impl(key) {
            Ok(x) => x,
            Err(e) => {
                error!("Error reading '{}' from session store: {:?}", key, e);
                None
            }
        }
    }

    fn get_impl(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM session WHERE key = ?1", [key], |row| row.get(0))
            .optional()
    }

    pub fn set(&self, key: &str, value: &str) -> bool {
        match self.conn.execute(
            "INSERT OR REPLACE INTO session(key, value) VALUES (?1, ?2)",
            params![key, value],
        ) {
            Ok(_) => true,
            Err(e) => {
                error!("Unable to store '{}' in session store: {:?}", key, e);
                false
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.conn.execute("DELETE FROM session WHERE key = ?1", [key]) {
            error!("Unable to remove '{}' from session store: {:?}", key, e);
        }
    }
}
