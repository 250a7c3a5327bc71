//! Accounts that own repositories: individuals and organizations.

use std::fs;
use std::io::ErrorKind;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result, ResultExt};
use crate::repository::{is_usable_user_name, move_with_rollback};
use crate::state::AppState;
use crate::store::repo::{count_repositories, set_owner_name};
use crate::store::timestamp_now;
use crate::store::user::{
    add_team_member, count_org_memberships, delete_user_rows, insert_team, insert_user,
    is_user_exist, list_inactive_users, must_get_user, new_user_redirect, set_user_name,
};
use crate::types::{AccessMode, NoticeType, Team, User, UserType};

pub const OWNER_TEAM: &str = "Owners";

fn new_account(name: &str, user_type: UserType, is_admin: bool, is_active: bool) -> User {
    User {
        name: name.to_string(),
        user_type,
        is_admin,
        is_active,
        max_repo_creation: -1,
        created_unix: timestamp_now(),
        ..User::default()
    }
}

pub fn create_user(state: &AppState, name: &str, is_admin: bool, is_active: bool) -> Result<User> {
    is_usable_user_name(name)?;
    let mut user = new_account(name, UserType::Individual, is_admin, is_active);
    {
        let conn = state.store.connection();
        insert_user(&conn, &mut user)?;
    }
    info!(user = %user.name, id = user.id, is_admin, "Created user");
    Ok(user)
}

/// Creates an organization with an `Owners` team that covers every
/// repository, and makes `owner` its first member.
pub fn create_org(state: &AppState, owner: &User, name: &str) -> Result<User> {
    is_usable_user_name(name)?;
    let mut org = new_account(name, UserType::Organization, false, true);

    let session = state.store.begin()?;
    insert_user(&session, &mut org)?;
    let mut team = Team {
        id: 0,
        org_id: org.id,
        name: OWNER_TEAM.to_string(),
        authorize: AccessMode::Owner,
        includes_all_repositories: true,
        num_repos: 0,
    };
    insert_team(&session, &mut team)?;
    add_team_member(&session, &team, owner.id)?;
    session.commit()?;

    info!(org = %org.name, id = org.id, owner = %owner.name, "Created organization");
    Ok(org)
}

/// Renames a user or organization.
///
/// Catalog rows change first (the account, `owner_name` on every owned
/// repository, a redirect from the old name); the owner directory then
/// moves and the transaction commits. A failed commit moves the directory
/// back.
pub fn change_user_name(state: &AppState, user: &User, new_name: &str) -> Result<User> {
    is_usable_user_name(new_name)?;
    let settings = &state.settings;

    let session = state.store.begin()?;
    let current = must_get_user(&session, user.id)?;
    let old_name = current.name.clone();
    let case_only = old_name.to_lowercase() == new_name.to_lowercase();

    if !case_only && is_user_exist(&session, new_name)? {
        return Err(Error::UserAlreadyExist(new_name.to_string()));
    }

    set_user_name(&session, current.id, new_name)
        .context(|| format!("rename user {old_name} to {new_name}"))?;
    let repos = set_owner_name(&session, current.id, new_name)?;
    if !case_only {
        new_user_redirect(&session, current.id, &old_name, new_name)?;
    }

    let moves = [(settings.user_path(&old_name), settings.user_path(new_name))];
    move_with_rollback(&moves, || session.commit())?;

    info!(from = %old_name, to = %new_name, repositories = repos, "Renamed user");
    let conn = state.store.connection();
    must_get_user(&conn, current.id)
}

/// Deletes an account that owns no repositories and belongs to no
/// organization. Its home directory is removed after the commit.
pub fn delete_user(state: &AppState, user: &User) -> Result<()> {
    let session = state.store.begin()?;
    let repos = count_repositories(&session, user.id)?;
    if repos > 0 {
        return Err(Error::UserOwnRepos {
            user_id: user.id,
            count: repos,
        });
    }
    let orgs = count_org_memberships(&session, user.id)?;
    if orgs > 0 {
        return Err(Error::UserHasOrgs {
            user_id: user.id,
            count: orgs,
        });
    }
    delete_user_rows(&session, user.id)?;
    session.commit()?;

    let home = state.settings.user_path(&user.name);
    match fs::remove_dir_all(&home) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => state.notice(
            NoticeType::Repository,
            &format!("delete user directory {}: {e}", home.display()),
        ),
    }

    info!(user = %user.name, id = user.id, "Deleted user");
    Ok(())
}

/// Deletes inactive individual accounts created before `older_than` ago
/// (all of them when `None`). Accounts that still own repositories or
/// belong to organizations are skipped.
pub fn delete_inactive_users(
    state: &AppState,
    older_than: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<usize> {
    let cutoff = older_than
        .map(|age| timestamp_now() - i64::try_from(age.as_secs()).unwrap_or(i64::MAX));
    let candidates = {
        let conn = state.store.connection();
        list_inactive_users(&conn, cutoff)?
    };

    let mut deleted = 0;
    for user in candidates {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!(
                "before deleting inactive user {}",
                user.name
            )));
        }
        match delete_user(state, &user) {
            Ok(()) => deleted += 1,
            Err(Error::UserOwnRepos { .. } | Error::UserHasOrgs { .. }) => {
                debug!(user = %user.name, "Skipping inactive user that still owns data");
            }
            Err(e) => return Err(e).context(|| format!("delete inactive user {}", user.name)),
        }
    }

    info!(deleted, "Deleted inactive users");
    Ok(deleted)
}
