use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::info;

use super::deploy_key::delete_deploy_key_in;
use crate::error::{Error, Result, ResultExt};
use crate::notify::RepoEvent;
use crate::state::AppState;
use crate::storage::BlobNamespace;
use crate::store::archiver::{delete_repo_archivers_by_repo, list_repo_archivers};
use crate::store::cascade::{
    decrement_stargazer_counts, delete_attachments_by_repo, delete_dependent_rows,
    delete_issue_index, delete_issues, delete_labels, delete_projects, delete_repository_row,
    delete_topics, detach_forks, release_attachment_uuids, unlinked_attachment_uuids,
};
use crate::store::keys::list_deploy_keys;
use crate::store::lfs::{count_lfs_references, delete_lfs_meta_objects, list_lfs_meta_objects};
use crate::store::repo::{decrement_fork_num, get_repository_by_id};
use crate::store::user::{decrement_num_repos, get_teams, must_get_user, team_remove_repository};
use crate::types::{NoticeType, User, attachment_relative_path};

/// Blob keys collected inside the transaction, removed after commit.
#[derive(Default)]
struct Leftovers {
    archives: Vec<String>,
    lfs: Vec<String>,
    attachments: Vec<String>,
    avatar: Option<String>,
}

/// Deletes a repository and every row that belongs to it in one
/// transaction, then removes its files.
///
/// File removal happens after the commit and is best-effort: failures are
/// recorded as admin notices and never returned. Callers must ensure no
/// concurrent writer touches the repository.
pub fn delete_repository(state: &AppState, doer: &User, owner_id: i64, repo_id: i64) -> Result<()> {
    let session = state.store.begin()?;

    let owner = must_get_user(&session, owner_id)?;
    let teams = if owner.is_organization() {
        get_teams(&session, owner.id)?
    } else {
        Vec::new()
    };
    let repo = get_repository_by_id(&session, repo_id)?
        .filter(|r| r.owner_id == owner.id)
        .ok_or(Error::RepoNotExist { id: repo_id })?;
    let full_name = repo.full_name();

    for key in list_deploy_keys(&session, repo.id)? {
        delete_deploy_key_in(&session, doer, key.id)
            .context(|| format!("delete deploy key {} of {full_name}", key.name))?;
    }

    if !delete_repository_row(&session, repo.id)? {
        return Err(Error::RepoNotExist { id: repo.id });
    }

    for team in &teams {
        team_remove_repository(&session, team.id, repo.id)?;
    }

    let mut leftovers = Leftovers::default();
    leftovers.attachments = release_attachment_uuids(&session, repo.id)?;

    decrement_stargazer_counts(&session, repo.id)?;
    delete_dependent_rows(&session, repo.id).context(|| format!("delete rows of {full_name}"))?;
    delete_labels(&session, repo.id)?;
    leftovers
        .attachments
        .extend(
            delete_issues(&session, repo.id)
                .context(|| format!("delete issues of {full_name}"))?,
        );
    delete_issue_index(&session, repo.id)?;

    if repo.is_fork {
        decrement_fork_num(&session, repo.fork_id)?;
    }
    decrement_num_repos(&session, owner.id)?;

    delete_topics(&session, repo.id)?;
    delete_projects(&session, repo.id)?;

    for object in list_lfs_meta_objects(&session, repo.id)? {
        // Forks share blobs; keep them while another repository points here.
        if count_lfs_references(&session, &object.oid)? <= 1 {
            leftovers.lfs.push(object.relative_path());
        }
    }
    delete_lfs_meta_objects(&session, repo.id)?;

    leftovers.archives = list_repo_archivers(&session, repo.id)?
        .iter()
        .map(|a| a.relative_path())
        .collect();
    delete_repo_archivers_by_repo(&session, repo.id)?;

    if repo.num_forks > 0 {
        detach_forks(&session, repo.id)?;
    }

    leftovers
        .attachments
        .extend(unlinked_attachment_uuids(&session, repo.id)?);
    delete_attachments_by_repo(&session, repo.id)?;

    if !repo.avatar.is_empty() {
        leftovers.avatar = Some(repo.avatar.clone());
    }

    session
        .commit()
        .context(|| format!("commit delete of {full_name}"))?;

    info!(repo = %full_name, repo_id = repo.id, doer = %doer.name, "Deleted repository");

    let settings = &state.settings;
    remove_dir_best_effort(state, &settings.repo_path(&owner.name, &repo.name), &full_name);
    remove_dir_best_effort(state, &settings.wiki_path(&owner.name, &repo.name), &full_name);
    remove_blobs_best_effort(state, &leftovers, &full_name);

    state.notifier.notify(&RepoEvent::Deleted {
        doer_id: doer.id,
        repo_id: repo.id,
        full_name,
    });
    Ok(())
}

fn remove_dir_best_effort(state: &AppState, path: &Path, full_name: &str) {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => state.notice(
            NoticeType::Repository,
            &format!("delete {full_name}: remove {}: {e}", path.display()),
        ),
    }
}

fn remove_blobs_best_effort(state: &AppState, leftovers: &Leftovers, full_name: &str) {
    let archives = leftovers
        .archives
        .iter()
        .map(|key| (BlobNamespace::RepoArchives, key.clone()));
    let lfs = leftovers
        .lfs
        .iter()
        .map(|key| (BlobNamespace::Lfs, key.clone()));
    let attachments = leftovers
        .attachments
        .iter()
        .map(|uuid| (BlobNamespace::Attachments, attachment_relative_path(uuid)));
    let avatar = leftovers
        .avatar
        .iter()
        .map(|key| (BlobNamespace::RepoAvatars, key.clone()));

    for (ns, key) in archives.chain(lfs).chain(attachments).chain(avatar) {
        if let Err(e) = state.blobs.delete(ns, &key) {
            state.notice(
                NoticeType::Repository,
                &format!("delete {full_name}: remove {ns:?} blob {key}: {e}"),
            );
        }
    }
}
