use rusqlite::{Connection, Row, params};

use crate::error::{Error, Result};
use crate::types::LfsMetaObject;

fn lfs_from_row(row: &Row<'_>) -> rusqlite::Result<LfsMetaObject> {
    Ok(LfsMetaObject {
        id: row.get(0)?,
        oid: row.get(1)?,
        size: row.get(2)?,
        repo_id: row.get(3)?,
        created_unix: row.get(4)?,
    })
}

pub fn insert_lfs_meta_object(
    conn: &Connection,
    repo_id: i64,
    oid: &str,
    size: i64,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO lfs_meta_object (oid, size, repository_id, created_unix)
         VALUES (?1, ?2, ?3, ?4)",
        params![oid, size, repo_id, now],
    )?;
    Ok(())
}

pub fn list_lfs_meta_objects(conn: &Connection, repo_id: i64) -> Result<Vec<LfsMetaObject>> {
    let mut stmt = conn.prepare(
        "SELECT id, oid, size, repository_id, created_unix FROM lfs_meta_object
         WHERE repository_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![repo_id], lfs_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Number of repositories referencing `oid`.
pub fn count_lfs_references(conn: &Connection, oid: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM lfs_meta_object WHERE oid = ?1",
        params![oid],
        |row| row.get(0),
    )
    .map_err(Error::from)
}

/// Copies every LFS pointer of `from_repo` to `to_repo`. The blobs are shared.
pub fn copy_lfs_meta_objects(
    conn: &Connection,
    from_repo: i64,
    to_repo: i64,
    now: i64,
) -> Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO lfs_meta_object (oid, size, repository_id, created_unix)
         SELECT oid, size, ?2, ?3 FROM lfs_meta_object WHERE repository_id = ?1",
        params![from_repo, to_repo, now],
    )
    .map_err(Error::from)
}

pub fn delete_lfs_meta_objects(conn: &Connection, repo_id: i64) -> Result<usize> {
    conn.execute(
        "DELETE FROM lfs_meta_object WHERE repository_id = ?1",
        params![repo_id],
    )
    .map_err(Error::from)
}
