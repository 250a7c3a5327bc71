//! Rows owned by a repository, removed together with it.

use rusqlite::{Connection, params};

use crate::error::{Error, Result};

/// Tables holding rows that belong to a single repository, with the column
/// naming it.
pub const REPO_DEPENDENT_TABLES: &[(&str, &str)] = &[
    ("access", "repo_id"),
    ("action", "repo_id"),
    ("collaboration", "repo_id"),
    ("comment", "ref_repo_id"),
    ("commit_status", "repo_id"),
    ("deleted_branch", "repo_id"),
    ("hook_task", "repo_id"),
    ("lfs_lock", "repo_id"),
    ("language_stat", "repo_id"),
    ("milestone", "repo_id"),
    ("mirror", "repo_id"),
    ("notification", "repo_id"),
    ("protected_branch", "repo_id"),
    ("protected_tag", "repo_id"),
    ("pull_request", "base_repo_id"),
    ("push_mirror", "repo_id"),
    ("release", "repo_id"),
    ("repo_indexer_status", "repo_id"),
    ("repo_redirect", "redirect_repo_id"),
    ("repo_unit", "repo_id"),
    ("star", "repo_id"),
    ("task", "repo_id"),
    ("watch", "repo_id"),
    ("webhook", "repo_id"),
];

/// Tables cleaned by dedicated steps of the cascade.
const REPO_OWNED_TABLES: &[(&str, &str)] = &[
    ("label", "repo_id"),
    ("issue", "repo_id"),
    ("issue_index", "group_id"),
    ("project", "repo_id"),
    ("repo_topic", "repo_id"),
    ("lfs_meta_object", "repository_id"),
    ("repo_archiver", "repo_id"),
    ("deploy_key", "repo_id"),
    ("team_repo", "repo_id"),
    ("attachment", "repo_id"),
    ("repository", "id"),
];

fn query_strings(conn: &Connection, sql: &str, repo_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![repo_id], |row| row.get(0))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn delete_repository_row(conn: &Connection, repo_id: i64) -> Result<bool> {
    let rows = conn.execute("DELETE FROM repository WHERE id = ?1", params![repo_id])?;
    Ok(rows == 1)
}

pub fn delete_dependent_rows(conn: &Connection, repo_id: i64) -> Result<usize> {
    let mut deleted = 0;
    for (table, column) in REPO_DEPENDENT_TABLES {
        deleted += conn.execute(
            &format!("DELETE FROM \"{table}\" WHERE {column} = ?1"),
            params![repo_id],
        )?;
    }
    Ok(deleted)
}

/// Every user who starred the repository loses one from `num_stars`.
pub fn decrement_stargazer_counts(conn: &Connection, repo_id: i64) -> Result<usize> {
    conn.execute(
        "UPDATE user SET num_stars = num_stars - 1
         WHERE id IN (SELECT uid FROM star WHERE repo_id = ?1)",
        params![repo_id],
    )
    .map_err(Error::from)
}

pub fn release_attachment_uuids(conn: &Connection, repo_id: i64) -> Result<Vec<String>> {
    query_strings(
        conn,
        "SELECT a.uuid FROM attachment a JOIN \"release\" r ON r.id = a.release_id
         WHERE r.repo_id = ?1",
        repo_id,
    )
}

/// Attachments uploaded to the repository but never linked to an issue or
/// release.
pub fn unlinked_attachment_uuids(conn: &Connection, repo_id: i64) -> Result<Vec<String>> {
    query_strings(
        conn,
        "SELECT uuid FROM attachment WHERE repo_id = ?1 AND issue_id = 0 AND release_id = 0",
        repo_id,
    )
}

pub fn delete_attachments_by_repo(conn: &Connection, repo_id: i64) -> Result<usize> {
    conn.execute("DELETE FROM attachment WHERE repo_id = ?1", params![repo_id])
        .map_err(Error::from)
}

pub fn delete_labels(conn: &Connection, repo_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM issue_label WHERE label_id IN (SELECT id FROM label WHERE repo_id = ?1)",
        params![repo_id],
    )?;
    conn.execute("DELETE FROM label WHERE repo_id = ?1", params![repo_id])?;
    Ok(())
}

/// Deletes the issues of a repository and everything hanging off them.
/// Returns the uuids of their attachments, whose blobs the caller removes.
pub fn delete_issues(conn: &Connection, repo_id: i64) -> Result<Vec<String>> {
    const ISSUE_IDS: &str = "SELECT id FROM issue WHERE repo_id = ?1";

    for (table, column) in [
        ("comment", "issue_id"),
        ("issue_label", "issue_id"),
        ("reaction", "issue_id"),
        ("issue_user", "issue_id"),
        ("project_issue", "issue_id"),
        ("pull_request", "issue_id"),
        ("notification", "issue_id"),
    ] {
        conn.execute(
            &format!("DELETE FROM {table} WHERE {column} IN ({ISSUE_IDS})"),
            params![repo_id],
        )?;
    }

    let uuids = query_strings(
        conn,
        &format!("SELECT uuid FROM attachment WHERE issue_id IN ({ISSUE_IDS})"),
        repo_id,
    )?;
    conn.execute(
        &format!("DELETE FROM attachment WHERE issue_id IN ({ISSUE_IDS})"),
        params![repo_id],
    )?;
    conn.execute("DELETE FROM issue WHERE repo_id = ?1", params![repo_id])?;
    Ok(uuids)
}

pub fn delete_issue_index(conn: &Connection, repo_id: i64) -> Result<()> {
    conn.execute("DELETE FROM issue_index WHERE group_id = ?1", params![repo_id])?;
    Ok(())
}

pub fn delete_projects(conn: &Connection, repo_id: i64) -> Result<()> {
    const PROJECT_IDS: &str = "SELECT id FROM project WHERE repo_id = ?1";
    conn.execute(
        &format!("DELETE FROM project_board WHERE project_id IN ({PROJECT_IDS})"),
        params![repo_id],
    )?;
    conn.execute(
        &format!("DELETE FROM project_issue WHERE project_id IN ({PROJECT_IDS})"),
        params![repo_id],
    )?;
    conn.execute("DELETE FROM project WHERE repo_id = ?1", params![repo_id])?;
    Ok(())
}

pub fn delete_topics(conn: &Connection, repo_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE topic SET repo_count = repo_count - 1
         WHERE id IN (SELECT topic_id FROM repo_topic WHERE repo_id = ?1)",
        params![repo_id],
    )?;
    conn.execute("DELETE FROM repo_topic WHERE repo_id = ?1", params![repo_id])?;
    Ok(())
}

/// Turns forks of `repo_id` into standalone repositories.
pub fn detach_forks(conn: &Connection, repo_id: i64) -> Result<usize> {
    conn.execute(
        "UPDATE repository SET fork_id = 0, is_fork = 0 WHERE fork_id = ?1",
        params![repo_id],
    )
    .map_err(Error::from)
}

/// Copies the default webhooks (`repo_id = 0 AND owner_id = 0`) to a new
/// repository.
pub fn copy_default_webhooks(conn: &Connection, repo_id: i64) -> Result<usize> {
    conn.execute(
        "INSERT INTO webhook (repo_id, owner_id, is_system_webhook, url, content_type, events, is_active)
         SELECT ?1, 0, 0, url, content_type, events, is_active FROM webhook
         WHERE repo_id = 0 AND owner_id = 0 AND is_system_webhook = 0",
        params![repo_id],
    )
    .map_err(Error::from)
}

/// Tables still holding rows for `repo_id`, with their counts. Empty after a
/// complete delete.
pub fn remaining_references(conn: &Connection, repo_id: i64) -> Result<Vec<(&'static str, i64)>> {
    let mut remaining = Vec::new();
    for (table, column) in REPO_DEPENDENT_TABLES.iter().chain(REPO_OWNED_TABLES) {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{table}\" WHERE {column} = ?1"),
            params![repo_id],
            |row| row.get(0),
        )?;
        if count > 0 {
            remaining.push((*table, count));
        }
    }
    Ok(remaining)
}
