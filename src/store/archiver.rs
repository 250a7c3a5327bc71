use rusqlite::{Connection, OptionalExtension, Row, params};

use super::sqlite::is_unique_violation;
use crate::error::{Error, Result};
use crate::types::{ArchiveType, ArchiverStatus, RepoArchiver};

const ARCHIVER_COLUMNS: &str = "id, repo_id, type, status, commit_id, created_unix";

fn archiver_from_row(row: &Row<'_>) -> rusqlite::Result<RepoArchiver> {
    let raw_type: i64 = row.get(2)?;
    let archive_type = ArchiveType::try_from(raw_type).map_err(|v| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Integer,
            format!("unknown archive type {v}").into(),
        )
    })?;
    Ok(RepoArchiver {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        archive_type,
        status: ArchiverStatus::from(row.get::<_, i64>(3)?),
        commit_id: row.get(4)?,
        created_unix: row.get(5)?,
    })
}

pub fn get_repo_archiver(
    conn: &Connection,
    repo_id: i64,
    archive_type: ArchiveType,
    commit_id: &str,
) -> Result<Option<RepoArchiver>> {
    conn.query_row(
        &format!(
            "SELECT {ARCHIVER_COLUMNS} FROM repo_archiver
             WHERE repo_id = ?1 AND type = ?2 AND commit_id = ?3"
        ),
        params![repo_id, i64::from(archive_type), commit_id],
        archiver_from_row,
    )
    .optional()
    .map_err(Error::from)
}

/// Inserts a `Generating` row. Returns `None` if another writer already
/// holds the key, which makes the unique constraint the generation fence.
pub fn try_insert_repo_archiver(
    conn: &Connection,
    repo_id: i64,
    archive_type: ArchiveType,
    commit_id: &str,
    now: i64,
) -> Result<Option<RepoArchiver>> {
    let result = conn.execute(
        "INSERT INTO repo_archiver (repo_id, type, status, commit_id, created_unix)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            repo_id,
            i64::from(archive_type),
            i64::from(ArchiverStatus::Generating),
            commit_id,
            now
        ],
    );
    match result {
        Ok(_) => Ok(Some(RepoArchiver {
            id: conn.last_insert_rowid(),
            repo_id,
            archive_type,
            status: ArchiverStatus::Generating,
            commit_id: commit_id.to_string(),
            created_unix: now,
        })),
        Err(e) if is_unique_violation(&e, "repo_archiver.") => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Fails with [`Error::RepoArchiverNotExist`] when the row is gone.
pub fn update_repo_archiver_status(
    conn: &Connection,
    archiver: &RepoArchiver,
    status: ArchiverStatus,
) -> Result<()> {
    let rows = conn.execute(
        "UPDATE repo_archiver SET status = ?1 WHERE id = ?2",
        params![i64::from(status), archiver.id],
    )?;
    if rows == 0 {
        return Err(Error::RepoArchiverNotExist {
            repo_id: archiver.repo_id,
            commit_id: archiver.commit_id.clone(),
        });
    }
    Ok(())
}

pub fn delete_repo_archiver(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute("DELETE FROM repo_archiver WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

pub fn delete_repo_archivers_by_repo(conn: &Connection, repo_id: i64) -> Result<usize> {
    conn.execute("DELETE FROM repo_archiver WHERE repo_id = ?1", params![repo_id])
        .map_err(Error::from)
}

/// Oldest `Ready` archivers created before `cutoff`, at most `limit`.
/// Rows still generating belong to a running build and are never listed.
pub fn list_archivers_created_before(
    conn: &Connection,
    cutoff: i64,
    limit: u32,
) -> Result<Vec<RepoArchiver>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ARCHIVER_COLUMNS} FROM repo_archiver
         WHERE created_unix < ?1 AND status = ?2 ORDER BY created_unix, id LIMIT ?3"
    ))?;
    let rows = stmt.query_map(
        params![cutoff, i64::from(ArchiverStatus::Ready), limit],
        archiver_from_row,
    )?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn list_repo_archivers(conn: &Connection, repo_id: i64) -> Result<Vec<RepoArchiver>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ARCHIVER_COLUMNS} FROM repo_archiver WHERE repo_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![repo_id], archiver_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_insert_is_fenced_per_key() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        let conn = store.connection();

        let first = try_insert_repo_archiver(&conn, 1, ArchiveType::Zip, COMMIT, 10).unwrap();
        assert!(first.is_some());

        let second = try_insert_repo_archiver(&conn, 1, ArchiveType::Zip, COMMIT, 11).unwrap();
        assert!(second.is_none());

        // A different type is a different key.
        let other = try_insert_repo_archiver(&conn, 1, ArchiveType::TarGz, COMMIT, 12).unwrap();
        assert!(other.is_some());

        let first = first.unwrap();
        update_repo_archiver_status(&conn, &first, ArchiverStatus::Ready).unwrap();
        let fetched = get_repo_archiver(&conn, 1, ArchiveType::Zip, COMMIT)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status, ArchiverStatus::Ready);
    }

    #[test]
    fn test_update_status_of_deleted_row_fails() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        let conn = store.connection();

        let row = try_insert_repo_archiver(&conn, 1, ArchiveType::Zip, COMMIT, 10)
            .unwrap()
            .unwrap();
        assert!(delete_repo_archiver(&conn, row.id).unwrap());

        let err = update_repo_archiver_status(&conn, &row, ArchiverStatus::Ready).unwrap_err();
        assert!(matches!(err, Error::RepoArchiverNotExist { repo_id: 1, .. }));
    }

    #[test]
    fn test_list_created_before_is_oldest_first() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        let conn = store.connection();

        for (commit, created) in [("b", 20), ("a", 10), ("c", 30)] {
            let row = try_insert_repo_archiver(&conn, 1, ArchiveType::Zip, commit, created)
                .unwrap()
                .unwrap();
            update_repo_archiver_status(&conn, &row, ArchiverStatus::Ready).unwrap();
        }
        // Still generating, so never listed however old.
        try_insert_repo_archiver(&conn, 1, ArchiveType::Zip, "d", 5).unwrap();

        let old: Vec<String> = list_archivers_created_before(&conn, 30, 100)
            .unwrap()
            .into_iter()
            .map(|a| a.commit_id)
            .collect();
        assert_eq!(old, vec!["a", "b"]);
    }
}
