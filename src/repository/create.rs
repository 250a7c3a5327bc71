use std::fs;
use std::path::Path;

use rusqlite::Connection;
use tracing::{info, warn};

use super::name::is_usable_repo_name;
use crate::config::Settings;
use crate::error::{Error, Result, ResultExt};
use crate::git::InitialCommit;
use crate::hooks::create_delegate_hooks;
use crate::notify::RepoEvent;
use crate::state::AppState;
use crate::store::cascade::copy_default_webhooks;
use crate::store::repo::{
    delete_repo_redirect, insert_repo_unit, insert_repository, is_repository_exist, mark_pushed,
    must_get_repository, set_size,
};
use crate::store::social::{WATCH_MODE_NORMAL, set_watch_mode};
use crate::store::timestamp_now;
use crate::store::user::{
    add_collaborator, get_teams, increment_num_repos, is_user_repo_admin, recalculate_accesses,
    set_last_repo_visibility, team_add_repository,
};
use crate::types::{AccessMode, NoticeType, Repository, RepositoryStatus, User};

#[derive(Debug, Clone, Default)]
pub struct CreateRepoOptions {
    pub name: String,
    pub description: String,
    pub original_url: String,
    /// Falls back to `repository.default_branch`.
    pub default_branch: Option<String>,
    pub is_private: bool,
    pub is_mirror: bool,
    pub is_template: bool,
    /// Write an initial commit with a README.
    pub auto_init: bool,
    pub status: RepositoryStatus,
}

/// Rejects a new repository before anything is written: quota, name rules,
/// an existing catalog row, and leftover files unless `overwrite_or_adopt`.
pub fn check_create_repository(
    conn: &Connection,
    settings: &Settings,
    doer: &User,
    owner: &User,
    name: &str,
    overwrite_or_adopt: bool,
) -> Result<()> {
    let global_limit = settings.repository.max_creation_limit;
    if !doer.is_admin && !owner.can_create_repo(global_limit) {
        return Err(Error::ReachLimitOfRepo(owner.max_creation_limit(global_limit)));
    }

    is_usable_repo_name(name)?;

    if is_repository_exist(conn, owner.id, name)? {
        return Err(Error::RepoAlreadyExist {
            owner: owner.name.clone(),
            name: name.to_string(),
        });
    }

    if !overwrite_or_adopt && settings.repo_path(&owner.name, name).exists() {
        return Err(Error::RepoFilesAlreadyExist {
            owner: owner.name.clone(),
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Writes the catalog side of a new repository: the row itself, units,
/// owner counters, access and watches. Shared by create, fork and migrate.
pub(crate) fn insert_catalog_rows(
    conn: &Connection,
    settings: &Settings,
    doer: &User,
    owner: &User,
    repo: &mut Repository,
) -> Result<()> {
    let now = timestamp_now();

    insert_repository(conn, repo)?;
    delete_repo_redirect(conn, owner.id, &repo.lower_name)?;

    for unit_type in &settings.repository.default_units {
        let config = unit_type.default_config(&settings.service);
        insert_repo_unit(conn, repo.id, *unit_type, &config, now)?;
    }

    set_last_repo_visibility(conn, owner.id, repo.is_private)?;
    increment_num_repos(conn, owner.id)?;

    if owner.is_organization() {
        for team in get_teams(conn, owner.id)? {
            if team.includes_all_repositories {
                team_add_repository(conn, &team, repo)
                    .context(|| format!("add repository to team {}", team.name))?;
            }
        }
        if !is_user_repo_admin(conn, repo, doer)? {
            add_collaborator(conn, repo, doer.id, AccessMode::Admin)?;
        }
    } else {
        recalculate_accesses(conn, repo)?;
    }

    if settings.service.auto_watch_new_repos {
        set_watch_mode(conn, doer.id, repo.id, Some(WATCH_MODE_NORMAL))?;
    }

    copy_default_webhooks(conn, repo.id)?;
    Ok(())
}

/// Creates a repository owned by `owner` on behalf of `doer`.
///
/// The git directory is initialized inside the transaction, after the rows
/// are written, so a git failure rolls the catalog back and a catalog
/// failure never leaves a directory without a row. With
/// `overwrite_or_adopt` an existing directory is adopted as is.
pub fn create_repository(
    state: &AppState,
    doer: &User,
    owner: &User,
    opts: CreateRepoOptions,
    overwrite_or_adopt: bool,
) -> Result<Repository> {
    let settings = &state.settings;
    let now = timestamp_now();
    let default_branch = opts
        .default_branch
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| settings.repository.default_branch.clone());

    let mut repo = Repository {
        owner_id: owner.id,
        owner_name: owner.name.clone(),
        name: opts.name,
        description: opts.description,
        default_branch,
        original_url: opts.original_url,
        is_private: opts.is_private,
        is_mirror: opts.is_mirror,
        is_template: opts.is_template,
        is_empty: true,
        status: opts.status,
        created_unix: now,
        updated_unix: now,
        ..Repository::default()
    };
    let repo_path = settings.repo_path(&owner.name, &repo.name);
    let adopting = overwrite_or_adopt && repo_path.exists();

    let session = state.store.begin()?;
    check_create_repository(&session, settings, doer, owner, &repo.name, overwrite_or_adopt)?;
    insert_catalog_rows(&session, settings, doer, owner, &mut repo)
        .context(|| format!("insert repository {}", repo.full_name()))?;

    let initial = opts
        .auto_init
        .then(|| InitialCommit::readme(&repo.name, &repo.description));
    let initialized =
        init_repository_files(state, &repo, &repo_path, initial.as_ref(), adopting);
    let is_empty = match initialized {
        Ok(is_empty) => is_empty,
        Err(e) => {
            if !adopting {
                remove_partial_dir(&repo_path);
            }
            return Err(e).context(|| format!("initialize repository {}", repo.full_name()));
        }
    };

    if !is_empty {
        mark_pushed(&session, repo.id, now)?;
        let size = state.git.repo_size(&repo_path).unwrap_or_default();
        set_size(&session, repo.id, size)?;
    }
    let repo = must_get_repository(&session, repo.id)?;

    if let Err(e) = session.commit() {
        if !adopting {
            if let Err(rm) = fs::remove_dir_all(&repo_path) {
                state.notice(
                    NoticeType::Repository,
                    &format!(
                        "create {}: commit failed, directory {} left behind: {rm}",
                        repo.full_name(),
                        repo_path.display()
                    ),
                );
            }
        }
        return Err(e).context(|| format!("commit repository {}", repo.full_name()));
    }

    info!(
        repo = %repo.full_name(),
        repo_id = repo.id,
        doer = %doer.name,
        "Created repository"
    );
    state.notifier.notify(&RepoEvent::Created {
        doer_id: doer.id,
        repo_id: repo.id,
        full_name: repo.full_name(),
    });
    Ok(repo)
}

/// Initializes (or adopts) the bare repository and installs hooks. Returns
/// whether the repository has no commits.
fn init_repository_files(
    state: &AppState,
    repo: &Repository,
    repo_path: &Path,
    initial: Option<&InitialCommit>,
    adopting: bool,
) -> Result<bool> {
    if !adopting {
        if let Some(parent) = repo_path.parent() {
            fs::create_dir_all(parent)?;
        }
        state
            .git
            .init_bare(repo_path, &repo.default_branch, initial)?;
    }
    create_delegate_hooks(&state.settings, repo_path)?;
    state.git.is_empty(repo_path)
}

fn remove_partial_dir(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial repository"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{admin, org, test_env, user};
    use crate::store::repo::{get_repo_units, get_repository_by_name};
    use crate::store::social::watch_mode;
    use crate::store::user::{access_mode, get_user_by_id, insert_team};
    use crate::types::{Team, UnitType};

    fn opts(name: &str) -> CreateRepoOptions {
        CreateRepoOptions {
            name: name.to_string(),
            auto_init: true,
            ..CreateRepoOptions::default()
        }
    }

    #[test]
    fn test_create_auto_init_provisions_repository() {
        let env = test_env();
        let alice = user(&env.state, "alice");

        let repo = create_repository(&env.state, &alice, &alice, opts("demo"), false).unwrap();

        assert_eq!(repo.status, RepositoryStatus::Ready);
        assert_eq!(repo.lower_name, "demo");
        assert_eq!(repo.default_branch, "main");
        assert!(!repo.is_empty);
        assert_eq!(repo.num_watches, 1);

        let path = env.state.settings.repo_path("alice", "demo");
        assert!(path.join("HEAD").exists());
        assert!(path.join("hooks/pre-receive.d/anvil").exists());

        let conn = env.state.store.connection();
        let units = get_repo_units(&conn, repo.id).unwrap();
        let types: Vec<UnitType> = units.iter().map(|u| u.unit_type).collect();
        assert_eq!(types.len(), 5);
        for expected in UnitType::DEFAULT_REPO_UNITS {
            assert!(types.contains(&expected));
        }

        let alice = get_user_by_id(&conn, alice.id).unwrap().unwrap();
        assert_eq!(alice.num_repos, 1);
        assert_eq!(watch_mode(&conn, alice.id, repo.id).unwrap(), Some(WATCH_MODE_NORMAL));
        drop(conn);

        assert_eq!(
            env.events.events(),
            vec![RepoEvent::Created {
                doer_id: alice.id,
                repo_id: repo.id,
                full_name: "alice/demo".to_string(),
            }]
        );
    }

    #[test]
    fn test_create_without_auto_init_is_empty() {
        let env = test_env();
        let alice = user(&env.state, "alice");

        let repo = create_repository(
            &env.state,
            &alice,
            &alice,
            CreateRepoOptions {
                name: "Empty".to_string(),
                default_branch: Some("trunk".to_string()),
                ..CreateRepoOptions::default()
            },
            false,
        )
        .unwrap();

        assert!(repo.is_empty);
        assert_eq!(repo.name, "Empty");
        assert_eq!(repo.default_branch, "trunk");
        assert!(env.state.settings.repo_path("alice", "empty").exists());
    }

    #[test]
    fn test_create_rejects_duplicates_and_leftover_files() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        create_repository(&env.state, &alice, &alice, opts("demo"), false).unwrap();

        let err = create_repository(&env.state, &alice, &alice, opts("DEMO"), false).unwrap_err();
        assert!(matches!(err, Error::RepoAlreadyExist { .. }));

        fs::create_dir_all(env.state.settings.repo_path("alice", "stale")).unwrap();
        let err = create_repository(&env.state, &alice, &alice, opts("stale"), false).unwrap_err();
        assert!(matches!(err, Error::RepoFilesAlreadyExist { .. }));

        let conn = env.state.store.connection();
        assert!(get_repository_by_name(&conn, alice.id, "stale").unwrap().is_none());
        let alice = get_user_by_id(&conn, alice.id).unwrap().unwrap();
        assert_eq!(alice.num_repos, 1);
    }

    #[test]
    fn test_create_adopts_existing_directory() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let path = env.state.settings.repo_path("alice", "adopted");
        env.state
            .git
            .init_bare(&path, "main", Some(&InitialCommit::readme("adopted", "")))
            .unwrap();

        let repo = create_repository(
            &env.state,
            &alice,
            &alice,
            CreateRepoOptions {
                name: "adopted".to_string(),
                ..CreateRepoOptions::default()
            },
            true,
        )
        .unwrap();

        assert!(!repo.is_empty);
        assert!(path.join("hooks/post-receive").exists());
    }

    #[test]
    fn test_create_rejects_invalid_names() {
        let env = test_env();
        let alice = user(&env.state, "alice");

        for (name, check) in [
            ("..", "reserved"),
            ("site.git", "pattern"),
            ("bad name", "chars"),
        ] {
            let err = create_repository(&env.state, &alice, &alice, opts(name), false).unwrap_err();
            let ok = match check {
                "reserved" => matches!(err, Error::NameReserved(_)),
                "pattern" => matches!(err, Error::NamePatternNotAllowed(_)),
                _ => matches!(err, Error::NameCharsNotAllowed(_)),
            };
            assert!(ok, "{name}: unexpected error {err:?}");
        }
        assert!(env.events.events().is_empty());
    }

    #[test]
    fn test_create_respects_quota() {
        let env = test_env();
        let mut bob = user(&env.state, "bob");
        bob.max_repo_creation = 0;

        let err = create_repository(&env.state, &bob, &bob, opts("demo"), false).unwrap_err();
        assert!(matches!(err, Error::ReachLimitOfRepo(0)));

        let root = admin(&env.state, "root");
        create_repository(&env.state, &root, &bob, opts("demo"), false).unwrap();
    }

    #[test]
    fn test_create_in_organization_grants_teams_and_doer() {
        let env = test_env();
        let alice = user(&env.state, "alice");
        let carol = user(&env.state, "carol");
        let acme = org(&env.state, "acme");
        {
            let conn = env.state.store.connection();
            let mut team = Team {
                id: 0,
                org_id: acme.id,
                name: "Readers".to_string(),
                authorize: AccessMode::Read,
                includes_all_repositories: true,
                num_repos: 0,
            };
            insert_team(&conn, &mut team).unwrap();
            crate::store::user::add_team_member(&conn, &team, carol.id).unwrap();
        }

        let repo = create_repository(&env.state, &alice, &acme, opts("tools"), false).unwrap();

        let conn = env.state.store.connection();
        assert_eq!(access_mode(&conn, alice.id, &repo).unwrap(), AccessMode::Admin);
        assert_eq!(access_mode(&conn, carol.id, &repo).unwrap(), AccessMode::Read);
        assert_eq!(get_teams(&conn, acme.id).unwrap()[0].num_repos, 1);
    }
}
