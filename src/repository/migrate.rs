use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use super::create::{check_create_repository, insert_catalog_rows};
use super::delete::delete_repository;
use crate::error::{Result, ResultExt};
use crate::hooks::create_delegate_hooks;
use crate::notify::RepoEvent;
use crate::state::AppState;
use crate::store::mirror::insert_mirror;
use crate::store::repo::{
    mark_pushed, must_get_repository, set_default_branch, set_is_mirror, set_repository_status,
    set_size,
};
use crate::store::timestamp_now;
use crate::types::{Mirror, NoticeType, Repository, RepositoryStatus, User};

#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    pub clone_addr: String,
    pub name: String,
    pub description: String,
    pub is_private: bool,
    /// Keep the repository as a pull mirror of `clone_addr`.
    pub mirror: bool,
    /// Sync interval for mirrors. `None` uses the configured default,
    /// zero disables scheduled syncs, anything else is raised to the
    /// configured minimum.
    pub mirror_interval: Option<Duration>,
}

impl MigrateOptions {
    fn interval_secs(&self, state: &AppState) -> i64 {
        let mirror = &state.settings.mirror;
        let interval = self.mirror_interval.unwrap_or_else(|| mirror.default_interval());
        if interval.is_zero() {
            return 0;
        }
        let secs = interval.max(mirror.min_interval()).as_secs();
        i64::try_from(secs).unwrap_or(i64::MAX)
    }
}

/// Imports a remote repository.
///
/// The row is committed as `BeingMigrated` first so the name is reserved
/// while the clone runs outside any transaction. On success the row turns
/// `Ready` (and gains its mirror schedule); a failed clone deletes the
/// repository again.
pub fn migrate_repository(
    state: &AppState,
    doer: &User,
    owner: &User,
    opts: MigrateOptions,
) -> Result<Repository> {
    let settings = &state.settings;
    let now = timestamp_now();
    let mut repo = Repository {
        owner_id: owner.id,
        owner_name: owner.name.clone(),
        name: opts.name.clone(),
        description: opts.description.clone(),
        default_branch: settings.repository.default_branch.clone(),
        original_url: opts.clone_addr.clone(),
        is_private: opts.is_private,
        is_empty: true,
        status: RepositoryStatus::BeingMigrated,
        created_unix: now,
        updated_unix: now,
        ..Repository::default()
    };

    let session = state.store.begin()?;
    check_create_repository(&session, settings, doer, owner, &repo.name, false)?;
    insert_catalog_rows(&session, settings, doer, owner, &mut repo)
        .context(|| format!("insert repository {}", repo.full_name()))?;
    session.commit()?;

    info!(
        repo = %repo.full_name(),
        from = %opts.clone_addr,
        mirror = opts.mirror,
        "Migrating repository"
    );

    let repo_path = settings.repo_path(&owner.name, &repo.name);
    match clone_and_finish(state, &repo, &repo_path, &opts) {
        Ok(repo) => {
            info!(repo = %repo.full_name(), repo_id = repo.id, "Migrated repository");
            state.notifier.notify(&RepoEvent::Migrated {
                doer_id: doer.id,
                repo_id: repo.id,
                full_name: repo.full_name(),
            });
            Ok(repo)
        }
        Err(e) => {
            warn!(repo = %repo.full_name(), error = %e, "Migration failed, removing repository");
            match fs::remove_dir_all(&repo_path) {
                Ok(()) => {}
                Err(rm) if rm.kind() == ErrorKind::NotFound => {}
                Err(rm) => warn!(
                    path = %repo_path.display(),
                    error = %rm,
                    "Failed to remove partial clone"
                ),
            }
            if let Err(del) = delete_repository(state, doer, owner.id, repo.id) {
                state.notice(
                    NoticeType::Task,
                    &format!("migrate {}: delete after failed clone: {del}", repo.full_name()),
                );
            }
            Err(e).context(|| format!("migrate {} into {}", opts.clone_addr, repo.full_name()))
        }
    }
}

fn clone_and_finish(
    state: &AppState,
    repo: &Repository,
    repo_path: &Path,
    opts: &MigrateOptions,
) -> Result<Repository> {
    if let Some(parent) = repo_path.parent() {
        fs::create_dir_all(parent)?;
    }
    state.git.clone_bare(&opts.clone_addr, repo_path, opts.mirror)?;
    create_delegate_hooks(&state.settings, repo_path)?;

    let is_empty = state.git.is_empty(repo_path)?;
    let size = state.git.repo_size(repo_path)?;
    let head = state.git.head_branch(repo_path)?;
    let now = timestamp_now();

    let session = state.store.begin()?;
    set_repository_status(&session, repo.id, RepositoryStatus::Ready)?;
    if let Some(head) = head {
        set_default_branch(&session, repo.id, &head)?;
    }
    if !is_empty {
        mark_pushed(&session, repo.id, now)?;
    }
    set_size(&session, repo.id, size)?;

    if opts.mirror {
        let interval_secs = opts.interval_secs(state);
        set_is_mirror(&session, repo.id, true)?;
        let mut mirror = Mirror {
            repo_id: repo.id,
            interval_secs,
            enable_prune: true,
            updated_unix: now,
            next_update_unix: if interval_secs > 0 { now + interval_secs } else { 0 },
            remote_address: opts.clone_addr.clone(),
            ..Mirror::default()
        };
        insert_mirror(&session, &mut mirror)?;
    }

    let repo = must_get_repository(&session, repo.id)?;
    session.commit()?;
    Ok(repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::InitialCommit;
    use crate::state::test_support::{TestEnv, test_env, user};
    use crate::store::mirror::get_mirror_by_repo_id;
    use crate::store::repo::get_repository_by_name;
    use crate::store::user::get_user_by_id;

    fn source(env: &TestEnv) -> String {
        let path = env.temp.path().join("upstream/source.git");
        env.state
            .git
            .init_bare(&path, "develop", Some(&InitialCommit::readme("source", "")))
            .unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_migrate_mirror_sets_schedule() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let before = timestamp_now();

        let repo = migrate_repository(
            &env.state,
            &alice,
            &alice,
            MigrateOptions {
                clone_addr: source(&env),
                name: "upstream".to_string(),
                mirror: true,
                mirror_interval: Some(Duration::from_secs(60)),
                ..MigrateOptions::default()
            },
        )
        .unwrap();

        assert_eq!(repo.status, RepositoryStatus::Ready);
        assert!(repo.is_mirror);
        assert!(!repo.is_empty);
        assert_eq!(repo.default_branch, "develop");

        let conn = env.state.store.connection();
        let mirror = get_mirror_by_repo_id(&conn, repo.id).unwrap().unwrap();
        let min = env.state.settings.mirror.min_interval_secs as i64;
        assert_eq!(mirror.interval_secs, min);
        assert!(mirror.next_update_unix >= before + min);
        assert!(mirror.next_update_unix <= timestamp_now() + min);
        drop(conn);

        assert!(matches!(
            env.events.events().last(),
            Some(RepoEvent::Migrated { repo_id, .. }) if *repo_id == repo.id
        ));
    }

    #[test]
    fn test_migrate_zero_interval_disables_schedule() {
        let env = test_env();
        let alice = user(&env.state, "alice");

        let repo = migrate_repository(
            &env.state,
            &alice,
            &alice,
            MigrateOptions {
                clone_addr: source(&env),
                name: "frozen".to_string(),
                mirror: true,
                mirror_interval: Some(Duration::ZERO),
                ..MigrateOptions::default()
            },
        )
        .unwrap();

        let conn = env.state.store.connection();
        let mirror = get_mirror_by_repo_id(&conn, repo.id).unwrap().unwrap();
        assert_eq!(mirror.interval_secs, 0);
        assert_eq!(mirror.next_update_unix, 0);
    }

    #[test]
    fn test_migrate_plain_clone_has_no_mirror() {
        let env = test_env();
        let alice = user(&env.state, "alice");

        let repo = migrate_repository(
            &env.state,
            &alice,
            &alice,
            MigrateOptions {
                clone_addr: source(&env),
                name: "copy".to_string(),
                ..MigrateOptions::default()
            },
        )
        .unwrap();

        assert!(!repo.is_mirror);
        let conn = env.state.store.connection();
        assert!(get_mirror_by_repo_id(&conn, repo.id).unwrap().is_none());
    }

    #[test]
    fn test_failed_clone_removes_repository() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let missing = env.temp.path().join("nowhere.git");

        let err = migrate_repository(
            &env.state,
            &alice,
            &alice,
            MigrateOptions {
                clone_addr: missing.to_string_lossy().into_owned(),
                name: "broken".to_string(),
                mirror: true,
                ..MigrateOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::Error::Context { .. }));

        assert!(!env.state.settings.repo_path("alice", "broken").exists());
        let conn = env.state.store.connection();
        assert!(get_repository_by_name(&conn, alice.id, "broken").unwrap().is_none());
        assert_eq!(get_user_by_id(&conn, alice.id).unwrap().unwrap().num_repos, 0);
    }
}
