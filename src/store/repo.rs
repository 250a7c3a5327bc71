use rusqlite::{Connection, OptionalExtension, Row, params};

use super::sqlite::is_unique_violation;
use crate::error::{Error, Result};
use crate::types::{RepoUnit, Repository, RepositoryStatus, UnitConfig, UnitType};

const REPO_COLUMNS: &str = "id, owner_id, owner_name, lower_name, name, description, default_branch,
    original_url, is_private, COALESCE(is_archived, 0), is_mirror, is_empty, is_template, is_fork,
    fork_id, template_id, status, avatar, num_watches, num_stars, num_forks, num_issues,
    num_closed_issues, num_pulls, num_closed_pulls, num_milestones, num_closed_milestones, size,
    created_unix, updated_unix";

fn repo_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        owner_name: row.get(2)?,
        lower_name: row.get(3)?,
        name: row.get(4)?,
        description: row.get(5)?,
        default_branch: row.get(6)?,
        original_url: row.get(7)?,
        is_private: row.get(8)?,
        is_archived: row.get(9)?,
        is_mirror: row.get(10)?,
        is_empty: row.get(11)?,
        is_template: row.get(12)?,
        is_fork: row.get(13)?,
        fork_id: row.get(14)?,
        template_id: row.get(15)?,
        status: RepositoryStatus::from(row.get::<_, i64>(16)?),
        avatar: row.get(17)?,
        num_watches: row.get(18)?,
        num_stars: row.get(19)?,
        num_forks: row.get(20)?,
        num_issues: row.get(21)?,
        num_closed_issues: row.get(22)?,
        num_pulls: row.get(23)?,
        num_closed_pulls: row.get(24)?,
        num_milestones: row.get(25)?,
        num_closed_milestones: row.get(26)?,
        size: row.get(27)?,
        created_unix: row.get(28)?,
        updated_unix: row.get(29)?,
    })
}

pub fn get_repository_by_id(conn: &Connection, id: i64) -> Result<Option<Repository>> {
    conn.query_row(
        &format!("SELECT {REPO_COLUMNS} FROM repository WHERE id = ?1"),
        params![id],
        repo_from_row,
    )
    .optional()
    .map_err(Error::from)
}

/// Like [`get_repository_by_id`] but a missing row is an error.
pub fn must_get_repository(conn: &Connection, id: i64) -> Result<Repository> {
    get_repository_by_id(conn, id)?.ok_or(Error::RepoNotExist { id })
}

pub fn get_repository_by_name(
    conn: &Connection,
    owner_id: i64,
    name: &str,
) -> Result<Option<Repository>> {
    conn.query_row(
        &format!("SELECT {REPO_COLUMNS} FROM repository WHERE owner_id = ?1 AND lower_name = ?2"),
        params![owner_id, name.to_lowercase()],
        repo_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn is_repository_exist(conn: &Connection, owner_id: i64, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM repository WHERE owner_id = ?1 AND lower_name = ?2",
        params![owner_id, name.to_lowercase()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Inserts `repo` and assigns its id. Unique violations map to conflict
/// errors so a racing duplicate never leaves partial state.
pub fn insert_repository(conn: &Connection, repo: &mut Repository) -> Result<()> {
    repo.lower_name = repo.name.to_lowercase();
    let result = conn.execute(
        "INSERT INTO repository (owner_id, owner_name, lower_name, name, description,
            default_branch, original_url, is_private, is_archived, is_mirror, is_empty,
            is_template, is_fork, fork_id, template_id, status, avatar, size,
            created_unix, updated_unix)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20)",
        params![
            repo.owner_id,
            repo.owner_name,
            repo.lower_name,
            repo.name,
            repo.description,
            repo.default_branch,
            repo.original_url,
            repo.is_private,
            repo.is_archived,
            repo.is_mirror,
            repo.is_empty,
            repo.is_template,
            repo.is_fork,
            repo.fork_id,
            repo.template_id,
            i64::from(repo.status),
            repo.avatar,
            repo.size,
            repo.created_unix,
            repo.updated_unix,
        ],
    );

    match result {
        Ok(_) => {
            repo.id = conn.last_insert_rowid();
            Ok(())
        }
        Err(e) if is_unique_violation(&e, "repository.lower_name") => {
            Err(Error::RepoAlreadyExist {
                owner: repo.owner_name.clone(),
                name: repo.name.clone(),
            })
        }
        Err(e) if is_unique_violation(&e, "repository.fork_id") => Err(Error::ForkAlreadyExist {
            owner: repo.owner_name.clone(),
            base_id: repo.fork_id,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Pages through all repositories in id order.
pub fn list_repositories_after(
    conn: &Connection,
    after_id: i64,
    limit: u32,
) -> Result<Vec<Repository>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REPO_COLUMNS} FROM repository WHERE id > ?1 ORDER BY id LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![after_id, limit], repo_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn list_repositories_by_owner(conn: &Connection, owner_id: i64) -> Result<Vec<Repository>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REPO_COLUMNS} FROM repository WHERE owner_id = ?1 ORDER BY lower_name"
    ))?;
    let rows = stmt.query_map(params![owner_id], repo_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn get_forks(conn: &Connection, base_id: i64) -> Result<Vec<Repository>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REPO_COLUMNS} FROM repository WHERE fork_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![base_id], repo_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Returns the fork of `base_id` owned by `owner_id`, if any.
pub fn get_user_fork(conn: &Connection, owner_id: i64, base_id: i64) -> Result<Option<Repository>> {
    conn.query_row(
        &format!("SELECT {REPO_COLUMNS} FROM repository WHERE owner_id = ?1 AND fork_id = ?2"),
        params![owner_id, base_id],
        repo_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn count_repositories(conn: &Connection, owner_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM repository WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )
    .map_err(Error::from)
}

pub fn increment_fork_num(conn: &Connection, repo_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE repository SET num_forks = num_forks + 1 WHERE id = ?1",
        params![repo_id],
    )?;
    Ok(())
}

pub fn decrement_fork_num(conn: &Connection, repo_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE repository SET num_forks = num_forks - 1 WHERE id = ?1",
        params![repo_id],
    )?;
    Ok(())
}

pub fn set_repository_name(conn: &Connection, repo_id: i64, name: &str, now: i64) -> Result<()> {
    let rows = conn.execute(
        "UPDATE repository SET name = ?1, lower_name = ?2, updated_unix = ?3 WHERE id = ?4",
        params![name, name.to_lowercase(), now, repo_id],
    );
    match rows {
        Ok(0) => Err(Error::RepoNotExist { id: repo_id }),
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e, "repository.lower_name") => {
            Err(Error::RepoAlreadyExist {
                owner: String::new(),
                name: name.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

pub fn set_owner_name(conn: &Connection, owner_id: i64, owner_name: &str) -> Result<usize> {
    conn.execute(
        "UPDATE repository SET owner_name = ?1 WHERE owner_id = ?2",
        params![owner_name, owner_id],
    )
    .map_err(Error::from)
}

pub fn set_repository_status(
    conn: &Connection,
    repo_id: i64,
    status: RepositoryStatus,
) -> Result<()> {
    conn.execute(
        "UPDATE repository SET status = ?1 WHERE id = ?2",
        params![i64::from(status), repo_id],
    )?;
    Ok(())
}

pub fn set_archived(conn: &Connection, repo_id: i64, archived: bool) -> Result<()> {
    conn.execute(
        "UPDATE repository SET is_archived = ?1 WHERE id = ?2",
        params![archived, repo_id],
    )?;
    Ok(())
}

pub fn set_is_mirror(conn: &Connection, repo_id: i64, is_mirror: bool) -> Result<()> {
    conn.execute(
        "UPDATE repository SET is_mirror = ?1 WHERE id = ?2",
        params![is_mirror, repo_id],
    )?;
    Ok(())
}

pub fn set_default_branch(conn: &Connection, repo_id: i64, branch: &str) -> Result<()> {
    conn.execute(
        "UPDATE repository SET default_branch = ?1 WHERE id = ?2",
        params![branch, repo_id],
    )?;
    Ok(())
}

/// Records a completed push or fetch: the repository is no longer empty.
pub fn mark_pushed(conn: &Connection, repo_id: i64, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE repository SET is_empty = 0, updated_unix = ?1 WHERE id = ?2",
        params![now, repo_id],
    )?;
    Ok(())
}

pub fn set_size(conn: &Connection, repo_id: i64, size: i64) -> Result<()> {
    conn.execute(
        "UPDATE repository SET size = ?1 WHERE id = ?2",
        params![size, repo_id],
    )?;
    Ok(())
}

/// Records that `old_name` of `owner_id` now points at `repo_id`, and drops
/// any redirect occupying `new_name`.
pub fn new_repo_redirect(
    conn: &Connection,
    owner_id: i64,
    repo_id: i64,
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    let old_lower = old_name.to_lowercase();
    let new_lower = new_name.to_lowercase();
    if old_lower == new_lower {
        return Ok(());
    }

    delete_repo_redirect(conn, owner_id, &new_lower)?;
    conn.execute(
        "INSERT INTO repo_redirect (owner_id, lower_name, redirect_repo_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(owner_id, lower_name) DO UPDATE SET redirect_repo_id = excluded.redirect_repo_id",
        params![owner_id, old_lower, repo_id],
    )?;
    Ok(())
}

pub fn delete_repo_redirect(conn: &Connection, owner_id: i64, name: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM repo_redirect WHERE owner_id = ?1 AND lower_name = ?2",
        params![owner_id, name.to_lowercase()],
    )?;
    Ok(())
}

pub fn lookup_repo_redirect(conn: &Connection, owner_id: i64, name: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT redirect_repo_id FROM repo_redirect WHERE owner_id = ?1 AND lower_name = ?2",
        params![owner_id, name.to_lowercase()],
        |row| row.get(0),
    )
    .optional()
    .map_err(Error::from)
}

pub fn insert_repo_unit(
    conn: &Connection,
    repo_id: i64,
    unit_type: UnitType,
    config: &UnitConfig,
    now: i64,
) -> Result<()> {
    let raw = config
        .to_json()
        .map_err(|e| Error::Config(format!("unit config: {e}")))?;
    conn.execute(
        "INSERT INTO repo_unit (repo_id, type, config, created_unix) VALUES (?1, ?2, ?3, ?4)",
        params![repo_id, i64::from(unit_type), raw, now],
    )?;
    Ok(())
}

pub fn get_repo_units(conn: &Connection, repo_id: i64) -> Result<Vec<RepoUnit>> {
    let mut stmt = conn.prepare(
        "SELECT id, repo_id, type, config, created_unix FROM repo_unit WHERE repo_id = ?1 ORDER BY type",
    )?;
    let rows = stmt.query_map(params![repo_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut units = Vec::new();
    for row in rows {
        let (id, repo_id, raw_type, raw_config, created_unix) = row?;
        let Ok(unit_type) = UnitType::try_from(raw_type) else {
            tracing::warn!(repo_id, unit_type = raw_type, "skipping unknown unit type");
            continue;
        };
        let config = UnitConfig::from_json(unit_type, &raw_config)
            .map_err(|e| Error::Config(format!("unit config for repo {repo_id}: {e}")))?;
        units.push(RepoUnit {
            id,
            repo_id,
            unit_type,
            config,
            created_unix,
        });
    }
    Ok(units)
}

pub fn has_unit(conn: &Connection, repo_id: i64, unit_type: UnitType) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM repo_unit WHERE repo_id = ?1 AND type = ?2",
        params![repo_id, i64::from(unit_type)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
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

    fn repo(owner_id: i64, name: &str) -> Repository {
        Repository {
            owner_id,
            owner_name: "alice".to_string(),
            name: name.to_string(),
            ..Repository::default()
        }
    }

    #[test]
    fn test_insert_sets_id_and_lower_name() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let conn = store.connection();

        let mut r = repo(1, "Demo");
        insert_repository(&conn, &mut r).unwrap();

        let fetched = get_repository_by_name(&conn, 1, "DEMO").unwrap().unwrap();
        assert_eq!(fetched.id, r.id);
        assert_eq!(fetched.lower_name, "demo");
        assert_eq!(fetched.name, "Demo");
    }

    #[test]
    fn test_duplicate_name_is_conflict() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let conn = store.connection();

        insert_repository(&conn, &mut repo(1, "demo")).unwrap();
        let err = insert_repository(&conn, &mut repo(1, "DEMO")).unwrap_err();
        assert!(matches!(err, Error::RepoAlreadyExist { .. }));
    }

    #[test]
    fn test_second_fork_of_same_base_is_conflict() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let conn = store.connection();

        let mut base = repo(1, "base");
        insert_repository(&conn, &mut base).unwrap();

        let mut first = repo(2, "fork-a");
        first.fork_id = base.id;
        first.is_fork = true;
        insert_repository(&conn, &mut first).unwrap();

        let mut second = repo(2, "fork-b");
        second.fork_id = base.id;
        second.is_fork = true;
        let err = insert_repository(&conn, &mut second).unwrap_err();
        assert!(matches!(err, Error::ForkAlreadyExist { base_id, .. } if base_id == base.id));

        // Non-forks never collide on fork_id = 0.
        insert_repository(&conn, &mut repo(2, "plain-a")).unwrap();
        insert_repository(&conn, &mut repo(2, "plain-b")).unwrap();
    }

    #[test]
    fn test_redirects_follow_renames() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let conn = store.connection();

        new_repo_redirect(&conn, 1, 10, "old", "new").unwrap();
        assert_eq!(lookup_repo_redirect(&conn, 1, "OLD").unwrap(), Some(10));

        // Renaming back drops the redirect for the reclaimed name.
        new_repo_redirect(&conn, 1, 10, "new", "old").unwrap();
        assert_eq!(lookup_repo_redirect(&conn, 1, "old").unwrap(), None);
        assert_eq!(lookup_repo_redirect(&conn, 1, "new").unwrap(), Some(10));
    }

    #[test]
    fn test_null_archived_reads_as_false() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let conn = store.connection();

        let mut r = repo(1, "demo");
        insert_repository(&conn, &mut r).unwrap();
        conn.execute("UPDATE repository SET is_archived = NULL", [])
            .unwrap();

        let fetched = must_get_repository(&conn, r.id).unwrap();
        assert!(!fetched.is_archived);
    }
}
