use rusqlite::{Connection, OptionalExtension, Row, params};

use super::sqlite::is_unique_violation;
use crate::error::{Error, Result};
use crate::types::{AccessMode, DeployKey, KeyType, PublicKey};

const PUBLIC_KEY_COLUMNS: &str = "id, owner_id, name, fingerprint, content, mode, type, created_unix";

fn public_key_from_row(row: &Row<'_>) -> rusqlite::Result<PublicKey> {
    Ok(PublicKey {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        fingerprint: row.get(3)?,
        content: row.get(4)?,
        mode: AccessMode::from(row.get::<_, i64>(5)?),
        key_type: KeyType::from(row.get::<_, i64>(6)?),
        created_unix: row.get(7)?,
    })
}

pub fn get_public_key_by_fingerprint(
    conn: &Connection,
    fingerprint: &str,
) -> Result<Option<PublicKey>> {
    conn.query_row(
        &format!("SELECT {PUBLIC_KEY_COLUMNS} FROM public_key WHERE fingerprint = ?1"),
        params![fingerprint],
        public_key_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn insert_public_key(conn: &Connection, key: &mut PublicKey) -> Result<()> {
    let result = conn.execute(
        "INSERT INTO public_key (owner_id, name, fingerprint, content, mode, type, created_unix)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            key.owner_id,
            key.name,
            key.fingerprint,
            key.content,
            i64::from(key.mode),
            i64::from(key.key_type),
            key.created_unix,
        ],
    );
    match result {
        Ok(_) => {
            key.id = conn.last_insert_rowid();
            Ok(())
        }
        Err(e) if is_unique_violation(&e, "public_key.fingerprint") => {
            Err(Error::KeyAlreadyExist(key.fingerprint.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn delete_public_key(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute("DELETE FROM public_key WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

const DEPLOY_KEY_COLUMNS: &str = "id, key_id, repo_id, name, fingerprint, mode, created_unix";

fn deploy_key_from_row(row: &Row<'_>) -> rusqlite::Result<DeployKey> {
    Ok(DeployKey {
        id: row.get(0)?,
        key_id: row.get(1)?,
        repo_id: row.get(2)?,
        name: row.get(3)?,
        fingerprint: row.get(4)?,
        mode: AccessMode::from(row.get::<_, i64>(5)?),
        created_unix: row.get(6)?,
    })
}

/// Inserts a deploy key. Both uniqueness rules are enforced by constraints
/// so concurrent adds cannot slip past the pre-checks.
pub fn insert_deploy_key(conn: &Connection, key: &mut DeployKey) -> Result<()> {
    let result = conn.execute(
        "INSERT INTO deploy_key (key_id, repo_id, name, fingerprint, mode, created_unix)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            key.key_id,
            key.repo_id,
            key.name,
            key.fingerprint,
            i64::from(key.mode),
            key.created_unix,
        ],
    );
    match result {
        Ok(_) => {
            key.id = conn.last_insert_rowid();
            Ok(())
        }
        Err(e) if is_unique_violation(&e, "deploy_key.key_id") => {
            Err(Error::DeployKeyAlreadyExist {
                key_id: key.key_id,
                repo_id: key.repo_id,
            })
        }
        Err(e) if is_unique_violation(&e, "deploy_key.name") => {
            Err(Error::DeployKeyNameAlreadyUsed {
                repo_id: key.repo_id,
                name: key.name.clone(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_deploy_key_by_id(conn: &Connection, id: i64) -> Result<Option<DeployKey>> {
    conn.query_row(
        &format!("SELECT {DEPLOY_KEY_COLUMNS} FROM deploy_key WHERE id = ?1"),
        params![id],
        deploy_key_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn has_deploy_key(conn: &Connection, key_id: i64, repo_id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM deploy_key WHERE key_id = ?1 AND repo_id = ?2",
        params![key_id, repo_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn is_deploy_key_name_used(conn: &Connection, repo_id: i64, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM deploy_key WHERE repo_id = ?1 AND name = ?2",
        params![repo_id, name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn count_deploy_keys_for_key(conn: &Connection, key_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM deploy_key WHERE key_id = ?1",
        params![key_id],
        |row| row.get(0),
    )
    .map_err(Error::from)
}

pub fn list_deploy_keys(conn: &Connection, repo_id: i64) -> Result<Vec<DeployKey>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DEPLOY_KEY_COLUMNS} FROM deploy_key WHERE repo_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![repo_id], deploy_key_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn delete_deploy_key_row(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute("DELETE FROM deploy_key WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}
