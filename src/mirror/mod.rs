//! Pull and push mirrors.
//!
//! A pull mirror is a repository kept in sync with `remote_address` by
//! periodic fetches. Its schedule lives in the `mirror` row: a sweep picks
//! up every mirror whose `next_update_unix` has passed, fetches, and pushes
//! the next update `interval_secs` into the future. An interval of zero
//! turns scheduled syncs off; manual syncs still work.

mod scheduler;

pub use scheduler::{Clock, MirrorScheduler, SweepReport, SystemClock};

use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};
use crate::state::AppState;
use crate::store::mirror::{get_mirror_by_repo_id, update_mirror_schedule};
use crate::store::timestamp_now;
use crate::types::Mirror;

impl Mirror {
    /// Sets `next_update_unix` to `now + interval`, or to zero when the
    /// mirror has no interval.
    pub fn schedule_next_update(&mut self, now: i64) {
        self.next_update_unix = if self.interval_secs > 0 {
            now + self.interval_secs
        } else {
            0
        };
    }
}

/// Changes how often a pull mirror syncs. Zero disables scheduled syncs;
/// any other value must be at least the configured minimum.
pub fn set_mirror_interval(state: &AppState, repo_id: i64, interval: Duration) -> Result<Mirror> {
    let min = state.settings.mirror.min_interval();
    if !interval.is_zero() && interval < min {
        return Err(Error::InvalidMirrorInterval(format!(
            "{}s is below the minimum of {}s",
            interval.as_secs(),
            min.as_secs()
        )));
    }

    let session = state.store.begin()?;
    let mut mirror =
        get_mirror_by_repo_id(&session, repo_id)?.ok_or(Error::MirrorNotExist(repo_id))?;
    mirror.interval_secs = i64::try_from(interval.as_secs()).unwrap_or(i64::MAX);
    mirror.schedule_next_update(timestamp_now());
    update_mirror_schedule(&session, &mirror)?;
    session.commit()?;

    info!(repo_id, interval_secs = mirror.interval_secs, "Changed mirror interval");
    Ok(mirror)
}
