//! Logic behind `anvil hook <event>`, run by git inside a repository
//! directory while a push is received.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::state::AppState;
use crate::store::repo::{get_repository_by_name, mark_pushed, set_size};
use crate::store::timestamp_now;
use crate::store::user::get_user_by_name;
use crate::types::{Repository, RepositoryStatus};

use super::HookEvent;

const ZERO_OID: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old_oid: String,
    pub new_oid: String,
    pub refname: String,
}

impl RefUpdate {
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.new_oid == ZERO_OID
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Allow,
    Deny(String),
}

/// Parses `<old> <new> <ref>` lines as git writes them to pre- and
/// post-receive.
pub fn parse_ref_updates(input: &str) -> Result<Vec<RefUpdate>> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next(), fields.next()) {
                (Some(old), Some(new), Some(refname), None) => Ok(RefUpdate {
                    old_oid: old.to_string(),
                    new_oid: new.to_string(),
                    refname: refname.to_string(),
                }),
                _ => Err(Error::InvalidHookInput(line.to_string())),
            }
        })
        .collect()
}

/// The repository a hook runs for, and whether it is the wiki.
#[derive(Debug, Clone)]
pub struct HookTarget {
    pub repo: Repository,
    pub is_wiki: bool,
    pub path: PathBuf,
}

/// Maps a git directory under the repository root back to its catalog row.
pub fn resolve_target(state: &AppState, git_dir: &Path) -> Result<HookTarget> {
    let root = state
        .settings
        .repository
        .root
        .canonicalize()
        .unwrap_or_else(|_| state.settings.repository.root.clone());
    let git_dir = git_dir.canonicalize()?;

    let relative = git_dir.strip_prefix(&root).map_err(|_| {
        Error::InvalidHookInput(format!(
            "{} is outside the repository root",
            git_dir.display()
        ))
    })?;
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    let [owner, dir_name] = parts.as_slice() else {
        return Err(Error::InvalidHookInput(format!(
            "{} is not a repository directory",
            git_dir.display()
        )));
    };

    let (name, is_wiki) = if let Some(name) = dir_name.strip_suffix(".wiki.git") {
        (name, true)
    } else if let Some(name) = dir_name.strip_suffix(".git") {
        (name, false)
    } else {
        return Err(Error::InvalidHookInput(format!("{dir_name} is not a git directory")));
    };

    let conn = state.store.connection();
    let user = get_user_by_name(&conn, owner)?
        .ok_or_else(|| Error::UserNotExist(format!("name: {owner}")))?;
    let repo = get_repository_by_name(&conn, user.id, name)?.ok_or_else(|| Error::RepoNameNotExist {
        owner: (*owner).to_string(),
        name: name.to_string(),
    })?;
    Ok(HookTarget {
        repo,
        is_wiki,
        path: git_dir,
    })
}

/// Refuses pushes to repositories that must not change.
#[must_use]
pub fn pre_receive(target: &HookTarget, updates: &[RefUpdate]) -> HookOutcome {
    let repo = &target.repo;
    if updates.is_empty() {
        return HookOutcome::Allow;
    }
    if repo.status != RepositoryStatus::Ready {
        return HookOutcome::Deny(format!("repository {} is not ready", repo.full_name()));
    }
    if repo.is_archived {
        return HookOutcome::Deny(format!("repository {} is archived", repo.full_name()));
    }
    if repo.is_mirror && !target.is_wiki {
        return HookOutcome::Deny(format!("repository {} is a mirror", repo.full_name()));
    }
    HookOutcome::Allow
}

/// Refuses ref names git itself would consider malformed.
#[must_use]
pub fn update(refname: &str) -> HookOutcome {
    if !refname.starts_with("refs/") || !git2::Reference::is_valid_name(refname) {
        return HookOutcome::Deny(format!("invalid ref name: {refname}"));
    }
    HookOutcome::Allow
}

/// Records the push: the repository is non-empty and its size refreshed.
pub fn post_receive(state: &AppState, target: &HookTarget, updates: &[RefUpdate]) -> Result<()> {
    if target.is_wiki || updates.iter().all(RefUpdate::is_delete) {
        return Ok(());
    }
    let size = state.git.repo_size(&target.path)?;
    let conn = state.store.connection();
    mark_pushed(&conn, target.repo.id, timestamp_now())?;
    set_size(&conn, target.repo.id, size)?;
    debug!(repo = %target.repo.full_name(), size, "Recorded push");
    Ok(())
}

/// Runs one hook event. `args` are the positional arguments git passed,
/// `input` the hook's stdin.
pub fn run_hook(
    state: &AppState,
    event: HookEvent,
    git_dir: &Path,
    args: &[String],
    input: &str,
) -> Result<HookOutcome> {
    match event {
        HookEvent::PreReceive => {
            let updates = parse_ref_updates(input)?;
            let target = resolve_target(state, git_dir)?;
            Ok(pre_receive(&target, &updates))
        }
        HookEvent::Update => {
            let Some(refname) = args.first() else {
                return Err(Error::InvalidHookInput("update hook needs <ref> <old> <new>".into()));
            };
            Ok(update(refname))
        }
        HookEvent::PostReceive => {
            let updates = parse_ref_updates(input)?;
            let target = resolve_target(state, git_dir)?;
            post_receive(state, &target, &updates)?;
            Ok(HookOutcome::Allow)
        }
        // Stdin is left unread; no refs are delegated to proc-receive.
        HookEvent::ProcReceive => Ok(HookOutcome::Deny(
            "proc-receive refs are not accepted by this server".to_string(),
        )),
    }
}
