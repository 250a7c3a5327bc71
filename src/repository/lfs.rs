use tracing::debug;

use crate::error::{Result, ResultExt};
use crate::state::AppState;
use crate::store::lfs::insert_lfs_meta_object;
use crate::store::repo::must_get_repository;
use crate::store::timestamp_now;

/// Stores an LFS object and records that `repo_id` references it. The blob
/// is written (and verified) before the pointer row exists.
pub fn store_lfs_object(state: &AppState, repo_id: i64, oid: &str, data: &[u8]) -> Result<()> {
    let size = i64::try_from(data.len()).unwrap_or(i64::MAX);

    {
        let conn = state.store.connection();
        must_get_repository(&conn, repo_id)?;
    }
    state
        .blobs
        .put_lfs(oid, data, size)
        .context(|| format!("store lfs object {oid}"))?;

    let conn = state.store.connection();
    insert_lfs_meta_object(&conn, repo_id, oid, size, timestamp_now())?;
    debug!(repo_id, oid, size, "Stored LFS object");
    Ok(())
}
