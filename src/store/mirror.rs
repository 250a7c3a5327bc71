use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{Error, Result};
use crate::types::{Mirror, PushMirror};

const MIRROR_COLUMNS: &str = "id, repo_id, interval, enable_prune, updated_unix, next_update_unix,
    lfs_enabled, lfs_endpoint, remote_address";

fn mirror_from_row(row: &Row<'_>) -> rusqlite::Result<Mirror> {
    Ok(Mirror {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        interval_secs: row.get(2)?,
        enable_prune: row.get(3)?,
        updated_unix: row.get(4)?,
        next_update_unix: row.get(5)?,
        lfs_enabled: row.get(6)?,
        lfs_endpoint: row.get(7)?,
        remote_address: row.get(8)?,
    })
}

pub fn insert_mirror(conn: &Connection, mirror: &mut Mirror) -> Result<()> {
    conn.execute(
        "INSERT INTO mirror (repo_id, interval, enable_prune, updated_unix, next_update_unix,
            lfs_enabled, lfs_endpoint, remote_address)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            mirror.repo_id,
            mirror.interval_secs,
            mirror.enable_prune,
            mirror.updated_unix,
            mirror.next_update_unix,
            mirror.lfs_enabled,
            mirror.lfs_endpoint,
            mirror.remote_address,
        ],
    )?;
    mirror.id = conn.last_insert_rowid();
    Ok(())
}

pub fn get_mirror_by_repo_id(conn: &Connection, repo_id: i64) -> Result<Option<Mirror>> {
    conn.query_row(
        &format!("SELECT {MIRROR_COLUMNS} FROM mirror WHERE repo_id = ?1"),
        params![repo_id],
        mirror_from_row,
    )
    .optional()
    .map_err(Error::from)
}

/// Persists the schedule fields after a sync attempt.
pub fn update_mirror_schedule(conn: &Connection, mirror: &Mirror) -> Result<()> {
    let rows = conn.execute(
        "UPDATE mirror SET updated_unix = ?1, next_update_unix = ?2, interval = ?3 WHERE id = ?4",
        params![
            mirror.updated_unix,
            mirror.next_update_unix,
            mirror.interval_secs,
            mirror.id
        ],
    )?;
    if rows == 0 {
        return Err(Error::MirrorNotExist(mirror.repo_id));
    }
    Ok(())
}

/// Mirrors with `next_update_unix <= now AND next_update_unix != 0`.
/// A `limit` of 0 means no limit.
pub fn list_due_mirrors(conn: &Connection, now: i64, limit: u32) -> Result<Vec<Mirror>> {
    let limit = if limit == 0 { -1 } else { i64::from(limit) };
    let mut stmt = conn.prepare(&format!(
        "SELECT {MIRROR_COLUMNS} FROM mirror
         WHERE next_update_unix <= ?1 AND next_update_unix != 0
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![now, limit], mirror_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

// Push mirrors

const PUSH_MIRROR_COLUMNS: &str =
    "id, repo_id, remote_name, remote_address, interval, last_update, last_error";

fn push_mirror_from_row(row: &Row<'_>) -> rusqlite::Result<PushMirror> {
    Ok(PushMirror {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        remote_name: row.get(2)?,
        remote_address: row.get(3)?,
        interval_secs: row.get(4)?,
        last_update_unix: row.get(5)?,
        last_error: row.get(6)?,
    })
}

pub fn insert_push_mirror(conn: &Connection, mirror: &mut PushMirror) -> Result<()> {
    conn.execute(
        "INSERT INTO push_mirror (repo_id, remote_name, remote_address, interval, last_update, last_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            mirror.repo_id,
            mirror.remote_name,
            mirror.remote_address,
            mirror.interval_secs,
            mirror.last_update_unix,
            mirror.last_error,
        ],
    )?;
    mirror.id = conn.last_insert_rowid();
    Ok(())
}

pub fn list_push_mirrors(conn: &Connection, repo_id: i64) -> Result<Vec<PushMirror>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PUSH_MIRROR_COLUMNS} FROM push_mirror WHERE repo_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![repo_id], push_mirror_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Push mirrors with `interval > 0 AND last_update + interval <= now`.
pub fn list_due_push_mirrors(conn: &Connection, now: i64, limit: u32) -> Result<Vec<PushMirror>> {
    let limit = if limit == 0 { -1 } else { i64::from(limit) };
    let mut stmt = conn.prepare(&format!(
        "SELECT {PUSH_MIRROR_COLUMNS} FROM push_mirror
         WHERE interval > 0 AND last_update + interval <= ?1
         ORDER BY last_update
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![now, limit], push_mirror_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn update_push_mirror_result(conn: &Connection, mirror: &PushMirror) -> Result<()> {
    conn.execute(
        "UPDATE push_mirror SET last_update = ?1, last_error = ?2 WHERE id = ?3",
        params![mirror.last_update_unix, mirror.last_error, mirror.id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    fn open_store(temp: &TempDir) -> SqliteStore {
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        store
    }

    fn mirror(repo_id: i64, next_update_unix: i64) -> Mirror {
        Mirror {
            repo_id,
            interval_secs: 3600,
            enable_prune: true,
            next_update_unix,
            ..Mirror::default()
        }
    }

    #[test]
    fn test_due_mirrors_skip_disabled_and_future() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let conn = store.connection();

        insert_mirror(&conn, &mut mirror(1, 100)).unwrap();
        insert_mirror(&conn, &mut mirror(2, 0)).unwrap();
        insert_mirror(&conn, &mut mirror(3, 500)).unwrap();

        let due: Vec<i64> = list_due_mirrors(&conn, 200, 0)
            .unwrap()
            .into_iter()
            .map(|m| m.repo_id)
            .collect();
        assert_eq!(due, vec![1]);

        assert_eq!(list_due_mirrors(&conn, 500, 1).unwrap().len(), 1);
        assert_eq!(list_due_mirrors(&conn, 500, 0).unwrap().len(), 2);
    }

    #[test]
    fn test_due_push_mirrors() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let conn = store.connection();

        let mut pm = PushMirror {
            repo_id: 1,
            remote_name: "remote_mirror_a".to_string(),
            remote_address: "/tmp/a.git".to_string(),
            interval_secs: 60,
            last_update_unix: 1000,
            ..PushMirror::default()
        };
        insert_push_mirror(&conn, &mut pm).unwrap();

        assert!(list_due_push_mirrors(&conn, 1059, 0).unwrap().is_empty());
        assert_eq!(list_due_push_mirrors(&conn, 1060, 0).unwrap().len(), 1);

        pm.last_update_unix = 1060;
        update_push_mirror_result(&conn, &pm).unwrap();
        assert!(list_due_push_mirrors(&conn, 1060, 0).unwrap().is_empty());
    }
}
