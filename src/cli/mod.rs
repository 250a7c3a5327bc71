mod admin;
mod commands;
mod hook;
mod repo;
mod serve;
mod user;

pub use admin::{
    run_archive_cleanup, run_check_hooks, run_check_stats, run_create_org, run_create_user,
    run_doctor, run_init, run_purge_inactive, run_sync_hooks,
};
pub use commands::{AdminCommands, RepoCommands, UserCommands};
pub use hook::run_hook_command;
pub use repo::{
    CreateArgs, MigrateArgs, run_repo_archive, run_repo_create, run_repo_delete, run_repo_fork,
    run_repo_migrate, run_repo_mirror_sync, run_repo_rename,
};
pub use serve::run_serve;
pub use user::run_user_rename;

use std::path::Path;

use crate::config::Settings;
use crate::error::Error;
use crate::state::AppState;
use crate::store::repo::get_repository_by_name;
use crate::store::user::must_get_user_by_name;
use crate::types::{Repository, User};

/// Loads settings from `config` and opens the catalog, checking it exists.
pub fn load_state(config: &Path) -> anyhow::Result<AppState> {
    let settings = Settings::load(config)?;
    if !settings.db_path().exists() {
        anyhow::bail!(
            "Catalog not found at {}. Run 'anvil admin init' first.",
            settings.db_path().display()
        );
    }
    AppState::open(settings).map_err(Into::into)
}

pub(crate) fn find_user(state: &AppState, name: &str) -> anyhow::Result<User> {
    let conn = state.store.connection();
    Ok(must_get_user_by_name(&conn, name)?)
}

/// Resolves `owner/name`.
pub(crate) fn find_repo(state: &AppState, full_name: &str) -> anyhow::Result<Repository> {
    let Some((owner, name)) = full_name.split_once('/') else {
        anyhow::bail!("expected <owner>/<name>, got '{full_name}'");
    };
    let owner = find_user(state, owner)?;
    let conn = state.store.connection();
    let repo = get_repository_by_name(&conn, owner.id, name)?.ok_or_else(|| {
        Error::RepoNameNotExist {
            owner: owner.name.clone(),
            name: name.to_string(),
        }
    })?;
    Ok(repo)
}

/// The `--doer` user, or `fallback` when none was given.
pub(crate) fn find_doer(
    state: &AppState,
    doer: Option<&str>,
    fallback: &User,
) -> anyhow::Result<User> {
    match doer {
        Some(name) => find_user(state, name),
        None => Ok(fallback.clone()),
    }
}
