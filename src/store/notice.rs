use rusqlite::{Connection, params};

use crate::error::{Error, Result};
use crate::types::{Notice, NoticeType};

pub fn create_notice(
    conn: &Connection,
    notice_type: NoticeType,
    description: &str,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO notice (type, description, created_unix) VALUES (?1, ?2, ?3)",
        params![i64::from(notice_type), description, now],
    )?;
    Ok(())
}

pub fn list_notices(conn: &Connection, limit: u32) -> Result<Vec<Notice>> {
    let mut stmt = conn.prepare(
        "SELECT id, type, description, created_unix FROM notice ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(Notice {
            id: row.get(0)?,
            notice_type: NoticeType::from(row.get::<_, i64>(1)?),
            description: row.get(2)?,
            created_unix: row.get(3)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn count_notices(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM notice", [], |row| row.get(0))
        .map_err(Error::from)
}
