use rusqlite::{Connection, params};

use crate::error::Result;

/// Watch modes stored in `watch.mode`.
pub const WATCH_MODE_NORMAL: i64 = 1;
pub const WATCH_MODE_DONT: i64 = 2;
pub const WATCH_MODE_AUTO: i64 = 3;

pub fn is_staring(conn: &Connection, user_id: i64, repo_id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM star WHERE uid = ?1 AND repo_id = ?2",
        params![user_id, repo_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn insert_star(conn: &Connection, user_id: i64, repo_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO star (uid, repo_id) VALUES (?1, ?2)",
        params![user_id, repo_id],
    )?;
    conn.execute(
        "UPDATE repository SET num_stars = num_stars + 1 WHERE id = ?1",
        params![repo_id],
    )?;
    conn.execute(
        "UPDATE user SET num_stars = num_stars + 1 WHERE id = ?1",
        params![user_id],
    )?;
    Ok(())
}

pub fn delete_star(conn: &Connection, user_id: i64, repo_id: i64) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM star WHERE uid = ?1 AND repo_id = ?2",
        params![user_id, repo_id],
    )?;
    if removed == 0 {
        return Ok(());
    }
    conn.execute(
        "UPDATE repository SET num_stars = num_stars - 1 WHERE id = ?1",
        params![repo_id],
    )?;
    conn.execute(
        "UPDATE user SET num_stars = num_stars - 1 WHERE id = ?1",
        params![user_id],
    )?;
    Ok(())
}

/// Current watch mode, `None` if no row exists.
pub fn watch_mode(conn: &Connection, user_id: i64, repo_id: i64) -> Result<Option<i64>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT mode FROM watch WHERE user_id = ?1 AND repo_id = ?2",
        params![user_id, repo_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

fn is_watching_mode(mode: Option<i64>) -> bool {
    matches!(mode, Some(WATCH_MODE_NORMAL) | Some(WATCH_MODE_AUTO))
}

/// Sets the watch mode and keeps `repository.num_watches` in step.
/// `None` removes the row.
pub fn set_watch_mode(
    conn: &Connection,
    user_id: i64,
    repo_id: i64,
    mode: Option<i64>,
) -> Result<()> {
    let current = watch_mode(conn, user_id, repo_id)?;
    if current == mode {
        return Ok(());
    }

    match mode {
        Some(mode) => {
            conn.execute(
                "INSERT INTO watch (user_id, repo_id, mode) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, repo_id) DO UPDATE SET mode = excluded.mode",
                params![user_id, repo_id, mode],
            )?;
        }
        None => {
            conn.execute(
                "DELETE FROM watch WHERE user_id = ?1 AND repo_id = ?2",
                params![user_id, repo_id],
            )?;
        }
    }

    let delta = match (is_watching_mode(current), is_watching_mode(mode)) {
        (false, true) => 1,
        (true, false) => -1,
        _ => 0,
    };
    if delta != 0 {
        conn.execute(
            "UPDATE repository SET num_watches = num_watches + ?1 WHERE id = ?2",
            params![delta, repo_id],
        )?;
    }
    Ok(())
}
