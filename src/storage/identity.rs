use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};
use std::path::Path;
use uuid::Uuid;

/// Persistent pseudonymous identity for this device (single-row table).
/// The handle is created once and never changes until the database file
/// is deleted.
pub struct IdentityStore {
    conn: Connection,
}

impl IdentityStore {
    /// Open the identity database at the default location
    pub fn open_default() -> SqlResult<Self> {
        Self::with_path("data/identity.db")
    }

    /// Open the identity database at a custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SqlResult<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS identity (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                handle TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;
        Ok(())
    }

    /// Return the stored handle, generating and persisting one on first run.
    pub fn load_or_create(&self) -> SqlResult<String> {
        let existing: Option<String> = self
            .conn
            .query_row("SELECT handle FROM identity WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(handle) = existing {
            return Ok(handle);
        }

        let handle = generate_handle();
        self.conn.execute(
            "INSERT OR IGNORE INTO identity (id, handle) VALUES (1, ?1)",
            params![handle],
        )?;
        // Another instance may have won the insert race; re-read.
        self.conn
            .query_row("SELECT handle FROM identity WHERE id = 1", [], |row| {
                row.get(0)
            })
    }
}

/// `anon#` plus a random hex suffix. Not globally unique by construction,
/// but collisions are negligible for a chat room.
pub fn generate_handle() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("anon#{}", suffix[..6].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_has_the_expected_shape() {
        let handle = generate_handle();
        assert!(handle.starts_with("anon#"));
        assert_eq!(handle.len(), "anon#".len() + 6);
        assert!(
            handle["anon#".len()..]
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase())
        );
    }

    #[test]
    fn handles_are_randomized() {
        assert_ne!(generate_handle(), generate_handle());
    }

    #[test]
    fn load_or_create_is_stable_within_a_store() {
        let store = IdentityStore::in_memory().unwrap();
        let first = store.load_or_create().unwrap();
        let second = store.load_or_create().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn handle_survives_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.db");

        let first = IdentityStore::with_path(&path)
            .unwrap()
            .load_or_create()
            .unwrap();
        let second = IdentityStore::with_path(&path)
            .unwrap()
            .load_or_create()
            .unwrap();
        assert_eq!(first, second);
    }
}
