use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::archiver::delete_old_repository_archives;
use crate::consistency::check_repo_stats;
use crate::error::Result;
use crate::mirror::MirrorScheduler;
use crate::state::AppState;
use crate::users::delete_inactive_users;

use super::load_state;

/// Runs the mirror scheduler and the cron jobs until Ctrl-C.
pub async fn run_serve(config: &Path) -> anyhow::Result<()> {
    let state = Arc::new(load_state(config)?);
    let cancel = CancellationToken::new();
    let scheduler = MirrorScheduler::new(Arc::clone(&state));

    info!(config = %state.settings.custom_conf.display(), "Starting background services");

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        cancel.cancel();
    };

    tokio::join!(
        scheduler.serve(cancel.clone()),
        run_cron(Arc::clone(&state), cancel.clone()),
        shutdown,
    );
    Ok(())
}

/// A ticker for `secs`, or none when the job is disabled.
fn every(secs: u64) -> Option<Interval> {
    if secs == 0 {
        return None;
    }
    let mut interval = time::interval(Duration::from_secs(secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_cron(state: Arc<AppState>, cancel: CancellationToken) {
    let cron = state.settings.cron.clone();
    let mut stats = every(cron.check_repo_stats_interval_secs);
    let mut archives = every(cron.archive_cleanup_interval_secs);
    let mut inactive = every(cron.delete_inactive_users_interval_secs);

    let archive_age = Duration::from_secs(cron.archive_cleanup_older_than_secs);
    let inactive_age = match cron.inactive_users_older_than_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tick(&mut stats) => {
                run_job("check_repo_stats", &state, &cancel, check_repo_stats).await;
            }
            () = tick(&mut archives) => {
                run_job("archive_cleanup", &state, &cancel, move |state, cancel| {
                    delete_old_repository_archives(state, archive_age, cancel)
                })
                .await;
            }
            () = tick(&mut inactive) => {
                run_job("delete_inactive_users", &state, &cancel, move |state, cancel| {
                    delete_inactive_users(state, inactive_age, cancel)
                })
                .await;
            }
        }
    }
}

async fn run_job<F>(name: &'static str, state: &Arc<AppState>, cancel: &CancellationToken, job: F)
where
    F: FnOnce(&AppState, &CancellationToken) -> Result<usize> + Send + 'static,
{
    let state = Arc::clone(state);
    let cancel = cancel.clone();
    let started = Instant::now();

    match tokio::task::spawn_blocking(move || job(&state, &cancel)).await {
        Ok(Ok(count)) => info!(
            job = name,
            count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cron job finished"
        ),
        Ok(Err(e)) if e.is_cancelled() => info!(job = name, "Cron job cancelled"),
        Ok(Err(e)) => warn!(job = name, error = %e, "Cron job failed"),
        Err(e) => error!(job = name, error = %e, "Cron job panicked"),
    }
}
