use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode};

use super::schema::SCHEMA;
use super::session::Session;
use crate::error::Result;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        // Hook processes open their own connection while the server writes.
        conn.busy_timeout(Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying connection for autocommit queries.
    /// Must not be called while a [`Session`] from this store is alive on the
    /// same thread.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn()
    }

    /// Opens a write transaction.
    pub fn begin(&self) -> Result<Session<'_>> {
        Session::begin(self.conn())
    }
}

/// True if `err` is a UNIQUE violation whose message names `columns`
/// (for example `"repository.owner_id, repository.fork_id"`).
pub fn is_unique_violation(err: &rusqlite::Error, columns: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) => {
            e.code == ErrorCode::ConstraintViolation
                && msg.starts_with("UNIQUE constraint failed")
                && msg.contains(columns)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(temp: &TempDir) -> SqliteStore {
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        store
    }

    fn count_users(store: &SqliteStore) -> i64 {
        store
            .connection()
            .query_row("SELECT COUNT(*) FROM user", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_initialize_creates_tables() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let conn = store.connection();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "repository",
            "user",
            "mirror",
            "push_mirror",
            "repo_archiver",
            "deploy_key",
            "notice",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store.initialize().unwrap();
    }

    #[test]
    fn test_session_commit_persists() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let sess = store.begin().unwrap();
        sess.execute(
            "INSERT INTO user (name, lower_name) VALUES ('alice', 'alice')",
            [],
        )
        .unwrap();
        sess.commit().unwrap();

        assert_eq!(count_users(&store), 1);
    }

    #[test]
    fn test_session_drop_rolls_back() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        {
            let sess = store.begin().unwrap();
            sess.execute(
                "INSERT INTO user (name, lower_name) VALUES ('alice', 'alice')",
                [],
            )
            .unwrap();
        }

        assert_eq!(count_users(&store), 0);
    }

    #[test]
    fn test_session_rolls_back_on_unwind() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let sess = store.begin().unwrap();
            sess.execute(
                "INSERT INTO user (name, lower_name) VALUES ('alice', 'alice')",
                [],
            )
            .unwrap();
            panic!("boom");
        }));

        assert!(result.is_err());
        assert_eq!(count_users(&store), 0);
    }

    #[test]
    fn test_unique_violation_detection() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let conn = store.connection();

        conn.execute(
            "INSERT INTO user (name, lower_name) VALUES ('alice', 'alice')",
            [],
        )
        .unwrap();
        let err = conn
            .execute(
                "INSERT INTO user (name, lower_name) VALUES ('Alice', 'alice')",
                [],
            )
            .unwrap_err();

        assert!(is_unique_violation(&err, "user.lower_name"));
        assert!(!is_unique_violation(&err, "repository.lower_name"));
    }
}
