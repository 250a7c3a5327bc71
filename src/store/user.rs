use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::sqlite::is_unique_violation;
use crate::error::{Error, Result};
use crate::types::{AccessMode, Repository, Team, User, UserType};

const USER_COLUMNS: &str = "id, name, lower_name, type, is_admin, is_active, num_repos, num_stars,
    max_repo_creation, last_repo_visibility, created_unix";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        lower_name: row.get(2)?,
        user_type: UserType::from(row.get::<_, i64>(3)?),
        is_admin: row.get(4)?,
        is_active: row.get(5)?,
        num_repos: row.get(6)?,
        num_stars: row.get(7)?,
        max_repo_creation: row.get(8)?,
        last_repo_visibility: row.get(9)?,
        created_unix: row.get(10)?,
    })
}

pub fn get_user_by_id(conn: &Connection, id: i64) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM user WHERE id = ?1"),
        params![id],
        user_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn must_get_user(conn: &Connection, id: i64) -> Result<User> {
    get_user_by_id(conn, id)?.ok_or_else(|| Error::UserNotExist(format!("id: {id}")))
}

pub fn get_user_by_name(conn: &Connection, name: &str) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM user WHERE lower_name = ?1"),
        params![name.to_lowercase()],
        user_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn must_get_user_by_name(conn: &Connection, name: &str) -> Result<User> {
    get_user_by_name(conn, name)?.ok_or_else(|| Error::UserNotExist(format!("name: {name}")))
}

pub fn is_user_exist(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user WHERE lower_name = ?1",
        params![name.to_lowercase()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn insert_user(conn: &Connection, user: &mut User) -> Result<()> {
    user.lower_name = user.name.to_lowercase();
    let result = conn.execute(
        "INSERT INTO user (name, lower_name, type, is_admin, is_active, max_repo_creation,
            last_repo_visibility, created_unix)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user.name,
            user.lower_name,
            i64::from(user.user_type),
            user.is_admin,
            user.is_active,
            user.max_repo_creation,
            user.last_repo_visibility,
            user.created_unix,
        ],
    );
    match result {
        Ok(_) => {
            user.id = conn.last_insert_rowid();
            Ok(())
        }
        Err(e) if is_unique_violation(&e, "user.lower_name") => {
            Err(Error::UserAlreadyExist(user.name.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn set_user_name(conn: &Connection, user_id: i64, name: &str) -> Result<()> {
    let result = conn.execute(
        "UPDATE user SET name = ?1, lower_name = ?2 WHERE id = ?3",
        params![name, name.to_lowercase(), user_id],
    );
    match result {
        Ok(0) => Err(Error::UserNotExist(format!("id: {user_id}"))),
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e, "user.lower_name") => {
            Err(Error::UserAlreadyExist(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn set_last_repo_visibility(conn: &Connection, user_id: i64, private: bool) -> Result<()> {
    conn.execute(
        "UPDATE user SET last_repo_visibility = ?1 WHERE id = ?2",
        params![private, user_id],
    )?;
    Ok(())
}

pub fn increment_num_repos(conn: &Connection, user_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE user SET num_repos = num_repos + 1 WHERE id = ?1",
        params![user_id],
    )?;
    Ok(())
}

pub fn decrement_num_repos(conn: &Connection, user_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE user SET num_repos = num_repos - 1 WHERE id = ?1",
        params![user_id],
    )?;
    Ok(())
}

pub fn list_inactive_users(conn: &Connection, created_before: Option<i64>) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM user
         WHERE is_active = 0 AND type = 0 AND (?1 IS NULL OR created_unix < ?1)
         ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![created_before], user_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Records that `old_name` now resolves to `user_id` and frees `new_name`.
pub fn new_user_redirect(
    conn: &Connection,
    user_id: i64,
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM user_redirect WHERE lower_name = ?1",
        params![new_name.to_lowercase()],
    )?;
    conn.execute(
        "INSERT INTO user_redirect (lower_name, redirect_user_id) VALUES (?1, ?2)
         ON CONFLICT(lower_name) DO UPDATE SET redirect_user_id = excluded.redirect_user_id",
        params![old_name.to_lowercase(), user_id],
    )?;
    Ok(())
}

pub fn lookup_user_redirect(conn: &Connection, name: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT redirect_user_id FROM user_redirect WHERE lower_name = ?1",
        params![name.to_lowercase()],
        |row| row.get(0),
    )
    .optional()
    .map_err(Error::from)
}

pub fn count_org_memberships(conn: &Connection, user_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM org_user WHERE uid = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .map_err(Error::from)
}

pub fn add_org_member(conn: &Connection, org_id: i64, user_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO org_user (uid, org_id) VALUES (?1, ?2)",
        params![user_id, org_id],
    )?;
    Ok(())
}

/// Deletes a user and the rows that only make sense with it. Watch and star
/// rows are removed with their repository counters.
pub fn delete_user_rows(conn: &Connection, user_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE repository SET num_watches = num_watches - 1
         WHERE id IN (SELECT repo_id FROM watch WHERE user_id = ?1 AND mode <> 2)",
        params![user_id],
    )?;
    conn.execute(
        "UPDATE repository SET num_stars = num_stars - 1
         WHERE id IN (SELECT repo_id FROM star WHERE uid = ?1)",
        params![user_id],
    )?;

    for (table, column) in [
        ("watch", "user_id"),
        ("star", "uid"),
        ("access", "user_id"),
        ("collaboration", "user_id"),
        ("team_user", "uid"),
        ("org_user", "uid"),
        ("issue_user", "uid"),
        ("notification", "user_id"),
        ("public_key", "owner_id"),
        ("user_redirect", "redirect_user_id"),
    ] {
        conn.execute(
            &format!("DELETE FROM {table} WHERE {column} = ?1"),
            params![user_id],
        )?;
    }

    let removed = conn.execute("DELETE FROM user WHERE id = ?1", params![user_id])?;
    if removed == 0 {
        return Err(Error::UserNotExist(format!("id: {user_id}")));
    }
    Ok(())
}

// Teams

fn team_from_row(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        authorize: AccessMode::from(row.get::<_, i64>(3)?),
        includes_all_repositories: row.get(4)?,
        num_repos: row.get(5)?,
    })
}

pub fn insert_team(conn: &Connection, team: &mut Team) -> Result<()> {
    conn.execute(
        "INSERT INTO team (org_id, name, lower_name, authorize, includes_all_repositories)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            team.org_id,
            team.name,
            team.name.to_lowercase(),
            i64::from(team.authorize),
            team.includes_all_repositories,
        ],
    )?;
    team.id = conn.last_insert_rowid();
    Ok(())
}

pub fn get_teams(conn: &Connection, org_id: i64) -> Result<Vec<Team>> {
    let mut stmt = conn.prepare(
        "SELECT id, org_id, name, authorize, includes_all_repositories, num_repos
         FROM team WHERE org_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![org_id], team_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn add_team_member(conn: &Connection, team: &Team, user_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO team_user (org_id, team_id, uid) VALUES (?1, ?2, ?3)",
        params![team.org_id, team.id, user_id],
    )?;
    add_org_member(conn, team.org_id, user_id)
}

pub fn team_has_repository(conn: &Connection, team_id: i64, repo_id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM team_repo WHERE team_id = ?1 AND repo_id = ?2",
        params![team_id, repo_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Adds `repo` to `team` and refreshes access for the repository.
pub fn team_add_repository(conn: &Connection, team: &Team, repo: &Repository) -> Result<()> {
    conn.execute(
        "INSERT INTO team_repo (org_id, team_id, repo_id) VALUES (?1, ?2, ?3)",
        params![team.org_id, team.id, repo.id],
    )?;
    conn.execute(
        "UPDATE team SET num_repos = num_repos + 1 WHERE id = ?1",
        params![team.id],
    )?;
    recalculate_accesses(conn, repo)
}

/// Removes a repository from a team's bookkeeping. Access rows are left to
/// the caller, which deletes or recalculates them.
pub fn team_remove_repository(conn: &Connection, team_id: i64, repo_id: i64) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM team_repo WHERE team_id = ?1 AND repo_id = ?2",
        params![team_id, repo_id],
    )?;
    if removed > 0 {
        conn.execute(
            "UPDATE team SET num_repos = num_repos - 1 WHERE id = ?1",
            params![team_id],
        )?;
    }
    Ok(())
}

// Access

pub fn add_collaborator(
    conn: &Connection,
    repo: &Repository,
    user_id: i64,
    mode: AccessMode,
) -> Result<()> {
    conn.execute(
        "INSERT INTO collaboration (repo_id, user_id, mode) VALUES (?1, ?2, ?3)
         ON CONFLICT(repo_id, user_id) DO UPDATE SET mode = excluded.mode",
        params![repo.id, user_id, i64::from(mode)],
    )?;
    recalculate_accesses(conn, repo)
}

pub fn access_mode(conn: &Connection, user_id: i64, repo: &Repository) -> Result<AccessMode> {
    if repo.owner_id == user_id {
        return Ok(AccessMode::Owner);
    }
    let mode: Option<i64> = conn
        .query_row(
            "SELECT mode FROM access WHERE user_id = ?1 AND repo_id = ?2",
            params![user_id, repo.id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(mode.map(AccessMode::from).unwrap_or_default())
}

pub fn is_user_repo_admin(conn: &Connection, repo: &Repository, user: &User) -> Result<bool> {
    Ok(access_mode(conn, user.id, repo)?.has(AccessMode::Admin))
}

/// Rebuilds the `access` rows of a repository from collaborations and, for
/// organization repositories, team membership.
pub fn recalculate_accesses(conn: &Connection, repo: &Repository) -> Result<()> {
    let mut modes: HashMap<i64, AccessMode> = HashMap::new();

    {
        let mut stmt =
            conn.prepare("SELECT user_id, mode FROM collaboration WHERE repo_id = ?1")?;
        let rows = stmt.query_map(params![repo.id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (user_id, mode) = row?;
            let entry = modes.entry(user_id).or_default();
            *entry = (*entry).max(AccessMode::from(mode));
        }
    }

    {
        let mut stmt = conn.prepare(
            "SELECT tu.uid, t.authorize FROM team_repo tr
             JOIN team t ON t.id = tr.team_id
             JOIN team_user tu ON tu.team_id = t.id
             WHERE tr.repo_id = ?1",
        )?;
        let rows = stmt.query_map(params![repo.id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (user_id, mode) = row?;
            let entry = modes.entry(user_id).or_default();
            *entry = (*entry).max(AccessMode::from(mode));
        }
    }

    modes.remove(&repo.owner_id);

    conn.execute("DELETE FROM access WHERE repo_id = ?1", params![repo.id])?;
    let mut insert =
        conn.prepare("INSERT INTO access (user_id, repo_id, mode) VALUES (?1, ?2, ?3)")?;
    for (user_id, mode) in modes {
        if mode.has(AccessMode::Read) {
            insert.execute(params![user_id, repo.id, i64::from(mode)])?;
        }
    }
    Ok(())
}
