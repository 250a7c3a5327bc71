use std::fs;
use std::path::PathBuf;

use tracing::{error, info};

use super::name::is_usable_repo_name;
use crate::error::{Error, Result, ResultExt};
use crate::notify::RepoEvent;
use crate::state::AppState;
use crate::store::Session;
use crate::store::repo::{
    is_repository_exist, must_get_repository, new_repo_redirect, set_repository_name,
};
use crate::store::timestamp_now;
use crate::types::{Repository, User};

/// Moves each `(from, to)` directory, then runs `commit`. When `commit`
/// fails every completed move is reversed. Sources that do not exist are
/// skipped, so optional directories (wikis, owners without repositories)
/// can be listed unconditionally.
///
/// If reversing fails too, the filesystem and the catalog disagree and
/// [`Error::RenameRollback`] is returned.
pub fn move_with_rollback<F>(moves: &[(PathBuf, PathBuf)], commit: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let mut done: Vec<(PathBuf, PathBuf)> = Vec::new();

    for (from, to) in moves {
        if !from.exists() || from == to {
            continue;
        }
        let moved = match to.parent() {
            Some(parent) => fs::create_dir_all(parent).and_then(|()| fs::rename(from, to)),
            None => fs::rename(from, to),
        };
        if let Err(e) = moved {
            let err = Error::from(e);
            return Err(reverse_or_escalate(&done, err));
        }
        done.push((from.clone(), to.clone()));
    }

    commit().map_err(|e| reverse_or_escalate(&done, e))
}

fn reverse_or_escalate(done: &[(PathBuf, PathBuf)], cause: Error) -> Error {
    let Err(rollback) = reverse_moves(done) else {
        return cause;
    };

    let (from, to) = done
        .first()
        .map(|(from, to)| (from.display().to_string(), to.display().to_string()))
        .unwrap_or_default();
    error!(
        critical = true,
        from = %from,
        to = %to,
        commit_error = %cause,
        rollback_error = %rollback,
        "Failed to reverse directory rename, manual repair required"
    );
    Error::RenameRollback {
        from,
        to,
        commit_error: cause.to_string(),
        rollback_error: rollback.to_string(),
    }
}

/// Idempotent: a move whose source is back in place is skipped.
fn reverse_moves(done: &[(PathBuf, PathBuf)]) -> std::io::Result<()> {
    for (from, to) in done.iter().rev() {
        if from.exists() && !to.exists() {
            continue;
        }
        fs::rename(to, from)?;
    }
    Ok(())
}

/// Renames a repository. The directory (and wiki) move first; the catalog
/// commit follows, and a failed commit moves them back.
pub fn change_repository_name(
    state: &AppState,
    doer: &User,
    repo: &Repository,
    new_name: &str,
) -> Result<Repository> {
    rename_with(state, doer, repo, new_name, |session: Session<'_>| session.commit())
}

fn rename_with<F>(
    state: &AppState,
    doer: &User,
    repo: &Repository,
    new_name: &str,
    commit: F,
) -> Result<Repository>
where
    F: FnOnce(Session<'_>) -> Result<()>,
{
    is_usable_repo_name(new_name)?;
    let settings = &state.settings;

    let session = state.store.begin()?;
    let current = must_get_repository(&session, repo.id)?;
    let old_name = current.name.clone();
    let case_only = old_name.to_lowercase() == new_name.to_lowercase();

    if !case_only {
        if is_repository_exist(&session, current.owner_id, new_name)? {
            return Err(Error::RepoAlreadyExist {
                owner: current.owner_name.clone(),
                name: new_name.to_string(),
            });
        }
        if settings.repo_path(&current.owner_name, new_name).exists() {
            return Err(Error::RepoFilesAlreadyExist {
                owner: current.owner_name.clone(),
                name: new_name.to_string(),
            });
        }
    }

    set_repository_name(&session, current.id, new_name, timestamp_now())
        .context(|| format!("rename {} to {new_name}", current.full_name()))?;
    new_repo_redirect(&session, current.owner_id, current.id, &old_name, new_name)?;

    let owner = &current.owner_name;
    let moves = [
        (
            settings.repo_path(owner, &old_name),
            settings.repo_path(owner, new_name),
        ),
        (
            settings.wiki_path(owner, &old_name),
            settings.wiki_path(owner, new_name),
        ),
    ];
    move_with_rollback(&moves, || commit(session))?;

    let renamed = {
        let conn = state.store.connection();
        must_get_repository(&conn, current.id)?
    };
    info!(
        from = %current.full_name(),
        to = %renamed.full_name(),
        doer = %doer.name,
        "Renamed repository"
    );
    state.notifier.notify(&RepoEvent::Renamed {
        doer_id: doer.id,
        repo_id: renamed.id,
        old_name,
        new_name: renamed.name.clone(),
    });
    Ok(renamed)
}
