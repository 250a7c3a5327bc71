use std::fs;

use tracing::{info, warn};

use super::create::{check_create_repository, insert_catalog_rows};
use crate::error::{Error, Result, ResultExt};
use crate::hooks::create_delegate_hooks;
use crate::notify::RepoEvent;
use crate::state::AppState;
use crate::store::lfs::copy_lfs_meta_objects;
use crate::store::repo::{get_user_fork, increment_fork_num, must_get_repository, set_size};
use crate::store::timestamp_now;
use crate::types::{Repository, User};

#[derive(Debug, Clone)]
pub struct ForkRepoOptions {
    pub base: Repository,
    pub name: String,
    pub description: String,
}

/// Forks `opts.base` into `owner`. An owner holds at most one fork of a
/// given base; the partial unique index on `(owner_id, fork_id)` backs the
/// pre-check against concurrent forks.
pub fn fork_repository(
    state: &AppState,
    doer: &User,
    owner: &User,
    opts: ForkRepoOptions,
) -> Result<Repository> {
    let settings = &state.settings;
    let base = opts.base;
    if base.is_being_migrated() {
        return Err(Error::RepoNotReady(base.id));
    }

    let now = timestamp_now();
    let mut repo = Repository {
        owner_id: owner.id,
        owner_name: owner.name.clone(),
        name: opts.name,
        description: opts.description,
        default_branch: base.default_branch.clone(),
        is_private: base.is_private,
        is_empty: base.is_empty,
        is_fork: true,
        fork_id: base.id,
        created_unix: now,
        updated_unix: now,
        ..Repository::default()
    };

    let session = state.store.begin()?;
    if get_user_fork(&session, owner.id, base.id)?.is_some() {
        return Err(Error::ForkAlreadyExist {
            owner: owner.name.clone(),
            base_id: base.id,
        });
    }
    check_create_repository(&session, settings, doer, owner, &repo.name, false)?;
    insert_catalog_rows(&session, settings, doer, owner, &mut repo)
        .context(|| format!("insert fork {}", repo.full_name()))?;
    increment_fork_num(&session, base.id)?;
    copy_lfs_meta_objects(&session, base.id, repo.id, now)?;

    let base_path = settings.repo_path(&base.owner_name, &base.name);
    let repo_path = settings.repo_path(&owner.name, &repo.name);
    let cloned = state
        .git
        .clone_bare(&base_path.to_string_lossy(), &repo_path, false)
        .and_then(|()| create_delegate_hooks(settings, &repo_path));
    if let Err(e) = cloned {
        if let Err(rm) = fs::remove_dir_all(&repo_path) {
            warn!(path = %repo_path.display(), error = %rm, "Failed to remove partial fork");
        }
        return Err(e).context(|| format!("clone {} into {}", base.full_name(), repo.full_name()));
    }

    let size = state.git.repo_size(&repo_path).unwrap_or_default();
    set_size(&session, repo.id, size)?;
    let repo = must_get_repository(&session, repo.id)?;
    session
        .commit()
        .context(|| format!("commit fork {}", repo.full_name()))?;

    info!(
        base = %base.full_name(),
        fork = %repo.full_name(),
        doer = %doer.name,
        "Forked repository"
    );
    state.notifier.notify(&RepoEvent::Forked {
        doer_id: doer.id,
        base_id: base.id,
        fork_id: repo.id,
        full_name: repo.full_name(),
    });
    Ok(repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{CreateRepoOptions, create_repository};
    use crate::state::test_support::{TestEnv, test_env, user};
    use crate::store::lfs::{insert_lfs_meta_object, list_lfs_meta_objects};
    use crate::store::repo::get_repository_by_id;

    fn create_base(env: &TestEnv, owner: &User) -> Repository {
        create_repository(
            &env.state,
            owner,
            owner,
            CreateRepoOptions {
                name: "demo".to_string(),
                auto_init: true,
                is_private: true,
                ..CreateRepoOptions::default()
            },
            false,
        )
        .unwrap()
    }

    fn fork_opts(base: &Repository, name: &str) -> ForkRepoOptions {
        ForkRepoOptions {
            base: base.clone(),
            name: name.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_fork_links_and_counts() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let bob = user(&env.state, "bob");
        let base = create_base(&env, &alice);
        {
            let conn = env.state.store.connection();
            insert_lfs_meta_object(&conn, base.id, &"a".repeat(64), 3, 0).unwrap();
        }

        let fork = fork_repository(&env.state, &bob, &bob, fork_opts(&base, "demo")).unwrap();

        assert!(fork.is_fork);
        assert_eq!(fork.fork_id, base.id);
        assert!(fork.is_private);
        assert!(!fork.is_empty);
        assert!(env.state.settings.repo_path("bob", "demo").join("hooks/update").exists());

        let conn = env.state.store.connection();
        let base = get_repository_by_id(&conn, base.id).unwrap().unwrap();
        assert_eq!(base.num_forks, 1);
        assert_eq!(list_lfs_meta_objects(&conn, fork.id).unwrap().len(), 1);
        drop(conn);

        let head = env
            .state
            .git
            .resolve_commit(&env.state.settings.repo_path("bob", "demo"), "main")
            .unwrap();
        let base_head = env
            .state
            .git
            .resolve_commit(&env.state.settings.repo_path("alice", "demo"), "main")
            .unwrap();
        assert_eq!(head, base_head);
    }

    #[test]
    fn test_second_fork_is_rejected() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let bob = user(&env.state, "bob");
        let base = create_base(&env, &alice);

        fork_repository(&env.state, &bob, &bob, fork_opts(&base, "demo")).unwrap();
        let err = fork_repository(&env.state, &bob, &bob, fork_opts(&base, "demo-2")).unwrap_err();
        assert!(matches!(err, Error::ForkAlreadyExist { base_id, .. } if base_id == base.id));

        assert!(!env.state.settings.repo_path("bob", "demo-2").exists());
        let conn = env.state.store.connection();
        let base = get_repository_by_id(&conn, base.id).unwrap().unwrap();
        assert_eq!(base.num_forks, 1);
    }

    #[test]
    fn test_fork_of_own_repository_needs_new_name() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let base = create_base(&env, &alice);

        let err =
            fork_repository(&env.state, &alice, &alice, fork_opts(&base, "demo")).unwrap_err();
        assert!(matches!(err, Error::RepoAlreadyExist { .. }));

        let fork =
            fork_repository(&env.state, &alice, &alice, fork_opts(&base, "demo-fork")).unwrap();
        assert_eq!(fork.fork_id, base.id);
    }
}
