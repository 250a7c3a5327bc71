use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, ResultExt};
use crate::git::{FetchOutcome, GitLayer};
use crate::notify::RepoEvent;
use crate::state::AppState;
use crate::store::mirror::{
    get_mirror_by_repo_id, list_due_mirrors, list_due_push_mirrors, update_mirror_schedule,
    update_push_mirror_result,
};
use crate::store::repo::{mark_pushed, must_get_repository, set_size};
use crate::store::timestamp_now;
use crate::types::{Mirror, NoticeType, PushMirror};

/// Source of "now" for the scheduler, in unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        timestamp_now()
    }
}

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub synced: usize,
    pub failed: usize,
    /// Due mirrors left alone because a sync was already running.
    pub skipped: usize,
    pub pushed: usize,
    pub push_failed: usize,
    /// Due push mirrors left alone because a push was already running.
    pub push_skipped: usize,
}

/// Runs due pull and push mirror syncs. A repository is fetched by at most
/// one task at a time, and each push mirror is pushed by at most one; the
/// in-flight sets are shared between overlapping sweeps and
/// [`MirrorScheduler::sync_now`].
pub struct MirrorScheduler {
    state: Arc<AppState>,
    clock: Arc<dyn Clock>,
    /// Repository ids with a fetch running.
    in_flight: Mutex<HashSet<i64>>,
    /// Push mirror ids with a push running.
    pushing: Mutex<HashSet<i64>>,
}

/// Removes the id from its in-flight set when dropped.
struct Claim<'a> {
    set: &'a Mutex<HashSet<i64>>,
    id: i64,
}

impl<'a> Claim<'a> {
    fn take(set: &'a Mutex<HashSet<i64>>, id: i64) -> Option<Self> {
        let inserted = set.lock().unwrap_or_else(PoisonError::into_inner).insert(id);
        inserted.then_some(Claim { set, id })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl MirrorScheduler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self::with_clock(state, Arc::new(SystemClock))
    }

    pub fn with_clock(state: Arc<AppState>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state,
            clock,
            in_flight: Mutex::new(HashSet::new()),
            pushing: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, repo_id: i64) -> Option<Claim<'_>> {
        Claim::take(&self.in_flight, repo_id)
    }

    fn claim_push(&self, push_id: i64) -> Option<Claim<'_>> {
        Claim::take(&self.pushing, push_id)
    }

    /// Sweeps until `cancel` fires, once per poll interval.
    pub async fn serve(&self, cancel: CancellationToken) {
        let settings = &self.state.settings.mirror;
        if !settings.enabled {
            info!("Mirror scheduler disabled");
            return;
        }

        let mut ticker = time::interval(settings.poll_interval());
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        info!(poll_secs = settings.poll_interval_secs, "Mirror scheduler started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_once(&cancel).await {
                        Ok(report) if report == SweepReport::default() => {}
                        Ok(report) => debug!(?report, "Mirror sweep finished"),
                        Err(e) if e.is_cancelled() => break,
                        Err(e) => warn!(error = %e, "Mirror sweep failed"),
                    }
                }
            }
        }
        info!("Mirror scheduler stopped");
    }

    /// One sweep: every due pull mirror, then every due push mirror. A
    /// failing repository is counted and the sweep moves on.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<SweepReport> {
        let settings = &self.state.settings.mirror;
        let mut report = SweepReport::default();
        let now = self.clock.now();

        let due = {
            let conn = self.state.store.connection();
            list_due_mirrors(&conn, now, settings.pull_limit)?
        };
        for mirror in due {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(format!(
                    "before syncing mirror of repository {}",
                    mirror.repo_id
                )));
            }
            let Some(_claim) = self.claim(mirror.repo_id) else {
                report.skipped += 1;
                continue;
            };
            let repo_id = mirror.repo_id;
            match self.sync_mirror(mirror).await {
                Ok(_) => report.synced += 1,
                Err(e) => {
                    warn!(repo_id, error = %e, "Mirror sync failed");
                    report.failed += 1;
                }
            }
        }

        let due = {
            let conn = self.state.store.connection();
            list_due_push_mirrors(&conn, now, settings.push_limit)?
        };
        for push in due {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(format!(
                    "before pushing mirror {} of repository {}",
                    push.remote_name, push.repo_id
                )));
            }
            let Some(_claim) = self.claim_push(push.id) else {
                report.push_skipped += 1;
                continue;
            };
            match self.sync_push_mirror(push).await {
                Ok(()) => report.pushed += 1,
                Err(_) => report.push_failed += 1,
            }
        }

        Ok(report)
    }

    /// Syncs one pull mirror right away, regardless of its schedule.
    /// Returns `None` when a sync of the repository is already running.
    pub async fn sync_now(&self, repo_id: i64) -> Result<Option<FetchOutcome>> {
        let mirror = {
            let conn = self.state.store.connection();
            get_mirror_by_repo_id(&conn, repo_id)?.ok_or(Error::MirrorNotExist(repo_id))?
        };
        let Some(_claim) = self.claim(repo_id) else {
            debug!(repo_id, "Mirror sync already running");
            return Ok(None);
        };
        self.sync_mirror(mirror).await.map(Some)
    }

    async fn sync_mirror(&self, mut mirror: Mirror) -> Result<FetchOutcome> {
        let repo = {
            let conn = self.state.store.connection();
            must_get_repository(&conn, mirror.repo_id)?
        };
        let path = self.state.settings.repo_path(&repo.owner_name, &repo.name);
        let prune = mirror.enable_prune;

        let fetched = run_git(&self.state.git, path, move |git, path| {
            let outcome = git.fetch(path, prune)?;
            let size = git.repo_size(path)?;
            Ok((outcome, size))
        })
        .await;
        let (outcome, size) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                self.state.notice(
                    NoticeType::Task,
                    &format!("sync mirror {}: {e}", repo.full_name()),
                );
                return Err(e);
            }
        };

        let now = self.clock.now();
        mirror.updated_unix = now;
        mirror.schedule_next_update(now);

        let session = self.state.store.begin()?;
        update_mirror_schedule(&session, &mirror)?;
        if !outcome.is_noop() {
            mark_pushed(&session, repo.id, now)?;
        }
        set_size(&session, repo.id, size)?;
        session
            .commit()
            .context(|| format!("record mirror sync of {}", repo.full_name()))?;

        info!(
            repo = %repo.full_name(),
            changed_refs = outcome.changes.len(),
            next_update = mirror.next_update_unix,
            "Synced mirror"
        );
        if !outcome.is_noop() {
            self.state.notifier.notify(&RepoEvent::MirrorSynced {
                repo_id: repo.id,
                full_name: repo.full_name(),
                changes: outcome.changes.clone(),
            });
        }
        Ok(outcome)
    }

    async fn sync_push_mirror(&self, mut push: PushMirror) -> Result<()> {
        let repo = {
            let conn = self.state.store.connection();
            must_get_repository(&conn, push.repo_id)?
        };
        let path = self.state.settings.repo_path(&repo.owner_name, &repo.name);
        let remote = push.remote_address.clone();

        let pushed =
            run_git(&self.state.git, path, move |git, path| git.push_mirror(path, &remote)).await;

        push.last_update_unix = self.clock.now();
        push.last_error = match &pushed {
            Ok(()) => String::new(),
            Err(e) => e.to_string(),
        };
        {
            let conn = self.state.store.connection();
            update_push_mirror_result(&conn, &push)?;
        }

        match pushed {
            Ok(()) => {
                info!(repo = %repo.full_name(), remote = %push.remote_name, "Pushed mirror");
                Ok(())
            }
            Err(e) => {
                warn!(
                    repo = %repo.full_name(),
                    remote = %push.remote_name,
                    error = %e,
                    "Push mirror failed"
                );
                Err(e)
            }
        }
    }
}

/// Runs a git call on the blocking pool.
async fn run_git<T, F>(git: &Arc<dyn GitLayer>, path: PathBuf, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn GitLayer, &std::path::Path) -> Result<T> + Send + 'static,
{
    let git = Arc::clone(git);
    tokio::task::spawn_blocking(move || f(git.as_ref(), &path))
        .await
        .map_err(|e| Error::GitCommand(format!("git task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    use git2::{Repository as GitRepository, Signature};

    use super::*;
    use crate::git::InitialCommit;
    use crate::repository::{MigrateOptions, migrate_repository};
    use crate::state::test_support::{TestEnv, test_env, user};
    use crate::store::mirror::{insert_push_mirror, list_push_mirrors};
    use crate::types::Repository;

    #[derive(Default)]
    struct ManualClock(AtomicI64);

    impl ManualClock {
        fn set(&self, now: i64) {
            self.0.store(now, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn upstream(env: &TestEnv) -> PathBuf {
        let path = env.temp.path().join("upstream/source.git");
        env.state
            .git
            .init_bare(&path, "main", Some(&InitialCommit::readme("source", "")))
            .unwrap();
        path
    }

    fn add_commit(path: &std::path::Path, file: &str) {
        let repo = GitRepository::open_bare(path).unwrap();
        let sig = Signature::now("tester", "tester@example.com").unwrap();
        let parent = repo.find_reference("refs/heads/main").unwrap().peel_to_commit().unwrap();
        let blob = repo.blob(file.as_bytes()).unwrap();
        let mut builder = repo.treebuilder(Some(&parent.tree().unwrap())).unwrap();
        builder.insert(file, blob, 0o100_644).unwrap();
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        repo.commit(Some("refs/heads/main"), &sig, &sig, file, &tree, &[&parent])
            .unwrap();
    }

    fn mirror_of(env: &TestEnv, source: &std::path::Path, interval: u64) -> Repository {
        let alice = user(&env.state, "alice");
        migrate_repository(
            &env.state,
            &alice,
            &alice,
            MigrateOptions {
                clone_addr: source.to_string_lossy().into_owned(),
                name: "mirror".to_string(),
                mirror: true,
                mirror_interval: Some(Duration::from_secs(interval)),
                ..MigrateOptions::default()
            },
        )
        .unwrap()
    }

    fn set_next_update(env: &TestEnv, repo_id: i64, next: i64) {
        let conn = env.state.store.connection();
        let mut mirror = get_mirror_by_repo_id(&conn, repo_id).unwrap().unwrap();
        mirror.next_update_unix = next;
        update_mirror_schedule(&conn, &mirror).unwrap();
    }

    fn next_update(env: &TestEnv, repo_id: i64) -> i64 {
        let conn = env.state.store.connection();
        get_mirror_by_repo_id(&conn, repo_id).unwrap().unwrap().next_update_unix
    }

    #[tokio::test]
    async fn test_hourly_mirror_syncs_once_per_interval() {
        let env = test_env();
        let source = upstream(&env);
        let repo = mirror_of(&env, &source, 3600);
        let start = 1_700_000_000;
        set_next_update(&env, repo.id, start);

        let clock = Arc::new(ManualClock::default());
        let scheduler = MirrorScheduler::with_clock(env.state.clone(), clock.clone());
        let cancel = CancellationToken::new();

        clock.set(start - 1);
        assert_eq!(scheduler.run_once(&cancel).await.unwrap().synced, 0);

        clock.set(start);
        assert_eq!(scheduler.run_once(&cancel).await.unwrap().synced, 1);
        assert_eq!(next_update(&env, repo.id), start + 3600);

        clock.set(start + 1);
        assert_eq!(scheduler.run_once(&cancel).await.unwrap().synced, 0);
        clock.set(start + 3599);
        assert_eq!(scheduler.run_once(&cancel).await.unwrap().synced, 0);

        clock.set(start + 3600);
        assert_eq!(scheduler.run_once(&cancel).await.unwrap().synced, 1);
        assert_eq!(next_update(&env, repo.id), start + 7200);
    }

    #[tokio::test]
    async fn test_sync_fetches_new_commits_and_notifies() {
        let env = test_env();
        let source = upstream(&env);
        let repo = mirror_of(&env, &source, 3600);
        add_commit(&source, "CHANGELOG");

        let scheduler = MirrorScheduler::new(env.state.clone());
        let outcome = scheduler.sync_now(repo.id).await.unwrap().unwrap();
        assert!(!outcome.is_noop());

        let mirror_path = env.state.settings.repo_path("alice", "mirror");
        let upstream_head = env.state.git.resolve_commit(&source, "main").unwrap();
        assert_eq!(env.state.git.resolve_commit(&mirror_path, "main").unwrap(), upstream_head);

        let synced = env
            .events
            .events()
            .into_iter()
            .filter(|e| matches!(e, RepoEvent::MirrorSynced { .. }))
            .count();
        assert_eq!(synced, 1);

        let outcome = scheduler.sync_now(repo.id).await.unwrap().unwrap();
        assert!(outcome.is_noop());
    }

    #[tokio::test]
    async fn test_sync_now_skips_in_flight_repository() {
        let env = test_env();
        let source = upstream(&env);
        let repo = mirror_of(&env, &source, 3600);
        let scheduler = MirrorScheduler::new(env.state.clone());

        let claim = scheduler.claim(repo.id).unwrap();
        assert!(scheduler.sync_now(repo.id).await.unwrap().is_none());
        drop(claim);
        assert!(scheduler.sync_now(repo.id).await.unwrap().is_some());

        let err = scheduler.sync_now(repo.id + 100).await.unwrap_err();
        assert!(matches!(err, Error::MirrorNotExist(_)));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_schedule_and_records_notice() {
        let env = test_env();
        let source = upstream(&env);
        let repo = mirror_of(&env, &source, 3600);
        set_next_update(&env, repo.id, 100);
        std::fs::remove_dir_all(&source).unwrap();

        let clock = Arc::new(ManualClock::default());
        clock.set(200);
        let scheduler = MirrorScheduler::with_clock(env.state.clone(), clock);
        let report = scheduler.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(next_update(&env, repo.id), 100);

        let conn = env.state.store.connection();
        assert_eq!(crate::store::notice::count_notices(&conn).unwrap(), 1);
    }

    fn push_mirror_to(env: &TestEnv, repo: &Repository, target: &std::path::Path) -> PushMirror {
        env.state.git.init_bare(target, "main", None).unwrap();
        let conn = env.state.store.connection();
        let mut push = PushMirror {
            repo_id: repo.id,
            remote_name: "backup".to_string(),
            remote_address: target.to_string_lossy().into_owned(),
            interval_secs: 600,
            ..PushMirror::default()
        };
        insert_push_mirror(&conn, &mut push).unwrap();
        push
    }

    #[tokio::test]
    async fn test_push_mirror_records_result() {
        let env = test_env();
        let source = upstream(&env);
        let repo = mirror_of(&env, &source, 3600);
        let target = env.temp.path().join("backup.git");
        push_mirror_to(&env, &repo, &target);

        let clock = Arc::new(ManualClock::default());
        clock.set(10_000);
        let scheduler = MirrorScheduler::with_clock(env.state.clone(), clock);
        let report = scheduler.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(
            env.state.git.resolve_commit(&target, "main").unwrap(),
            env.state.git.resolve_commit(&source, "main").unwrap()
        );

        let conn = env.state.store.connection();
        let push = &list_push_mirrors(&conn, repo.id).unwrap()[0];
        assert_eq!(push.last_update_unix, 10_000);
        assert!(push.last_error.is_empty());
    }

    #[tokio::test]
    async fn test_push_mirror_in_flight_is_skipped() {
        let env = test_env();
        let source = upstream(&env);
        let repo = mirror_of(&env, &source, 3600);
        let target = env.temp.path().join("backup.git");
        let push = push_mirror_to(&env, &repo, &target);

        let clock = Arc::new(ManualClock::default());
        clock.set(10_000);
        let scheduler = MirrorScheduler::with_clock(env.state.clone(), clock);
        let cancel = CancellationToken::new();

        let claim = scheduler.claim_push(push.id).unwrap();
        let report = scheduler.run_once(&cancel).await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.push_skipped, 1);
        {
            let conn = env.state.store.connection();
            assert_eq!(list_push_mirrors(&conn, repo.id).unwrap()[0].last_update_unix, 0);
        }

        drop(claim);
        assert_eq!(scheduler.run_once(&cancel).await.unwrap().pushed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_sweep_stops_before_next_mirror() {
        let env = test_env();
        let source = upstream(&env);
        let repo = mirror_of(&env, &source, 3600);
        set_next_update(&env, repo.id, 1);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let scheduler = MirrorScheduler::new(env.state.clone());
        let err = scheduler.run_once(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(next_update(&env, repo.id), 1);
    }
}
