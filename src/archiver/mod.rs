//! Downloadable snapshots of a commit.
//!
//! Each `(repo, type, commit)` has at most one `repo_archiver` row. The
//! first request inserts it as `Generating` and builds the archive on a
//! background task; the unique constraint on the key makes that insert the
//! fence, so concurrent requests see `Pending` instead of starting a second
//! build. A failed build removes its row so a later request can retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result, ResultExt};
use crate::state::AppState;
use crate::storage::BlobNamespace;
use crate::store::archiver::{
    delete_repo_archiver, get_repo_archiver, list_archivers_created_before,
    try_insert_repo_archiver, update_repo_archiver_status,
};
use crate::store::timestamp_now;
use crate::types::{ArchiveType, ArchiverStatus, NoticeType, RepoArchiver, Repository};

const CLEANUP_BATCH: u32 = 100;

#[derive(Debug)]
pub enum ArchiveRequest {
    /// The archive exists and can be served from blob storage.
    Ready(RepoArchiver),
    /// Another request is building it.
    Pending(RepoArchiver),
    /// This request won the key; the task resolves once the archive is ready.
    Started(RepoArchiver, JoinHandle<Result<RepoArchiver>>),
}

/// Looks up or starts an archive of `refname` in `repo`.
pub async fn request_archive(
    state: &Arc<AppState>,
    repo: &Repository,
    refname: &str,
    archive_type: ArchiveType,
) -> Result<ArchiveRequest> {
    let repo_path = state.settings.repo_path(&repo.owner_name, &repo.name);
    let git = Arc::clone(&state.git);
    let target = refname.to_string();
    let commit_id = tokio::task::spawn_blocking(move || git.resolve_commit(&repo_path, &target))
        .await
        .map_err(|e| Error::GitCommand(format!("git task failed: {e}")))?
        .context(|| format!("resolve {refname} in {}", repo.full_name()))?;

    let (inserted, existing) = {
        let conn = state.store.connection();
        match get_repo_archiver(&conn, repo.id, archive_type, &commit_id)? {
            Some(row) => (None, Some(row)),
            None => {
                let now = timestamp_now();
                match try_insert_repo_archiver(&conn, repo.id, archive_type, &commit_id, now)? {
                    Some(row) => (Some(row), None),
                    None => (None, get_repo_archiver(&conn, repo.id, archive_type, &commit_id)?),
                }
            }
        }
    };

    if let Some(row) = existing {
        return Ok(match row.status {
            ArchiverStatus::Ready => ArchiveRequest::Ready(row),
            ArchiverStatus::Generating => ArchiveRequest::Pending(row),
        });
    }
    // The competing row vanished between insert and re-read: its build failed.
    let Some(row) = inserted else {
        return Err(Error::RepoArchiverNotExist {
            repo_id: repo.id,
            commit_id,
        });
    };

    info!(
        repo = %repo.full_name(),
        commit = %row.commit_id,
        kind = row.archive_type.ext(),
        "Generating archive"
    );
    let task = tokio::spawn(generate(
        Arc::clone(state),
        repo.owner_name.clone(),
        repo.name.clone(),
        row.clone(),
    ));
    Ok(ArchiveRequest::Started(row, task))
}

async fn generate(
    state: Arc<AppState>,
    owner: String,
    name: String,
    archiver: RepoArchiver,
) -> Result<RepoArchiver> {
    let key = archiver.relative_path();
    let blocking_state = Arc::clone(&state);
    let blocking_key = key.clone();
    let commit_id = archiver.commit_id.clone();
    let archive_type = archiver.archive_type;

    let built = tokio::task::spawn_blocking(move || -> Result<u64> {
        let path = blocking_state.settings.repo_path(&owner, &name);
        let bytes = blocking_state.git.archive(&path, &commit_id, archive_type)?;
        let size = blocking_state
            .blobs
            .save(BlobNamespace::RepoArchives, &blocking_key, &mut bytes.as_slice())?;
        Ok(size)
    })
    .await
    .map_err(|e| Error::GitCommand(format!("archive task failed: {e}")))
    .and_then(|built| built);

    let size = match built {
        Ok(size) => size,
        Err(e) => {
            warn!(
                archiver_id = archiver.id,
                commit = %archiver.commit_id,
                error = %e,
                "Archive generation failed"
            );
            let conn = state.store.connection();
            if let Err(del) = delete_repo_archiver(&conn, archiver.id) {
                warn!(
                    archiver_id = archiver.id,
                    error = %del,
                    "Failed to remove failed archive row"
                );
            }
            return Err(e).context(|| format!("generate archive {key}"));
        }
    };

    // The row may have been removed meanwhile, by repository deletion for
    // one. Nothing would reference the blob then.
    let updated = {
        let conn = state.store.connection();
        update_repo_archiver_status(&conn, &archiver, ArchiverStatus::Ready)
    };
    if let Err(e) = updated {
        warn!(
            archiver_id = archiver.id,
            key = %key,
            error = %e,
            "Archive row gone, discarding blob"
        );
        if let Err(del) = state.blobs.delete(BlobNamespace::RepoArchives, &key) {
            state.notice(NoticeType::Repository, &format!("delete archive {key}: {del}"));
        }
        return Err(e).context(|| format!("finish archive {key}"));
    }
    info!(archiver_id = archiver.id, key = %key, bytes = size, "Archive ready");
    Ok(RepoArchiver {
        status: ArchiverStatus::Ready,
        ..archiver
    })
}

/// Deletes archives created more than `older_than` ago, in batches. Blob
/// removal is best-effort and recorded as a notice when it fails.
pub fn delete_old_repository_archives(
    state: &AppState,
    older_than: Duration,
    cancel: &CancellationToken,
) -> Result<usize> {
    let cutoff = timestamp_now() - i64::try_from(older_than.as_secs()).unwrap_or(i64::MAX);
    let mut deleted = 0;

    loop {
        let batch = {
            let conn = state.store.connection();
            list_archivers_created_before(&conn, cutoff, CLEANUP_BATCH)?
        };
        if batch.is_empty() {
            break;
        }

        for archiver in batch {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(format!(
                    "before deleting archive {} of repository {}",
                    archiver.commit_id, archiver.repo_id
                )));
            }
            {
                let conn = state.store.connection();
                delete_repo_archiver(&conn, archiver.id)?;
            }
            if let Err(e) = state
                .blobs
                .delete(BlobNamespace::RepoArchives, &archiver.relative_path())
            {
                state.notice(
                    NoticeType::Repository,
                    &format!("delete archive {}: {e}", archiver.relative_path()),
                );
            }
            deleted += 1;
        }
    }

    info!(deleted, older_than_secs = older_than.as_secs(), "Deleted old repository archives");
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{CreateRepoOptions, create_repository};
    use crate::state::test_support::{TestEnv, test_env, user};
    use crate::store::archiver::list_repo_archivers;

    fn repo(env: &TestEnv) -> Repository {
        let alice = user(&env.state, "alice");
        create_repository(
            &env.state,
            &alice,
            &alice,
            CreateRepoOptions {
                name: "demo".to_string(),
                auto_init: true,
                ..CreateRepoOptions::default()
            },
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_first_request_generates_then_serves_ready() {
        let env = test_env();
        let repo = repo(&env);

        let request = request_archive(&env.state, &repo, "main", ArchiveType::TarGz)
            .await
            .unwrap();
        let ArchiveRequest::Started(row, task) = request else {
            panic!("expected a new build");
        };
        assert_eq!(row.status, ArchiverStatus::Generating);
        let ready = task.await.unwrap().unwrap();
        assert_eq!(ready.status, ArchiverStatus::Ready);
        assert!(
            env.state
                .blobs
                .exists(BlobNamespace::RepoArchives, &ready.relative_path())
                .unwrap()
        );

        let again = request_archive(&env.state, &repo, "main", ArchiveType::TarGz)
            .await
            .unwrap();
        assert!(matches!(again, ArchiveRequest::Ready(r) if r.id == ready.id));
    }

    #[tokio::test]
    async fn test_concurrent_request_sees_pending() {
        let env = test_env();
        let repo = repo(&env);
        let path = env.state.settings.repo_path("alice", "demo");
        let commit = env.state.git.resolve_commit(&path, "main").unwrap();
        {
            let conn = env.state.store.connection();
            try_insert_repo_archiver(&conn, repo.id, ArchiveType::Zip, &commit, timestamp_now())
                .unwrap()
                .unwrap();
            assert!(
                try_insert_repo_archiver(&conn, repo.id, ArchiveType::Zip, &commit, timestamp_now())
                    .unwrap()
                    .is_none()
            );
        }

        let request = request_archive(&env.state, &repo, "main", ArchiveType::Zip)
            .await
            .unwrap();
        assert!(matches!(request, ArchiveRequest::Pending(_)));
    }

    #[tokio::test]
    async fn test_failed_generation_removes_row() {
        let env = test_env();
        let repo = repo(&env);
        let bogus = "0".repeat(40);
        let row = {
            let conn = env.state.store.connection();
            try_insert_repo_archiver(&conn, repo.id, ArchiveType::Zip, &bogus, timestamp_now())
                .unwrap()
                .unwrap()
        };

        let err = generate(env.state.clone(), "alice".to_string(), "demo".to_string(), row)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Context { .. }));

        let conn = env.state.store.connection();
        assert!(list_repo_archivers(&conn, repo.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ref_is_an_error() {
        let env = test_env();
        let repo = repo(&env);
        assert!(
            request_archive(&env.state, &repo, "no-such-branch", ArchiveType::Zip)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_delete_old_archives_respects_age_and_cancel() {
        let env = test_env();
        let repo = repo(&env);
        let request = request_archive(&env.state, &repo, "main", ArchiveType::Zip)
            .await
            .unwrap();
        let ArchiveRequest::Started(_, task) = request else {
            panic!("expected a new build");
        };
        let ready = task.await.unwrap().unwrap();
        let building = {
            let conn = env.state.store.connection();
            for i in 0..3 {
                let old = try_insert_repo_archiver(
                    &conn,
                    repo.id,
                    ArchiveType::TarGz,
                    &format!("{i:040}"),
                    100,
                )
                .unwrap()
                .unwrap();
                update_repo_archiver_status(&conn, &old, ArchiverStatus::Ready).unwrap();
            }
            try_insert_repo_archiver(&conn, repo.id, ArchiveType::TarGz, &"f".repeat(40), 100)
                .unwrap()
                .unwrap()
        };

        let cancel = CancellationToken::new();
        cancel.cancel();
        let hour = Duration::from_secs(3600);
        let err = delete_old_repository_archives(&env.state, hour, &cancel).unwrap_err();
        assert!(err.is_cancelled());

        let deleted =
            delete_old_repository_archives(&env.state, hour, &CancellationToken::new()).unwrap();
        assert_eq!(deleted, 3);

        let conn = env.state.store.connection();
        let left: Vec<i64> = list_repo_archivers(&conn, repo.id)
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(left, vec![ready.id, building.id]);
    }

    #[tokio::test]
    async fn test_generation_for_removed_row_discards_blob() {
        let env = test_env();
        let repo = repo(&env);
        let path = env.state.settings.repo_path("alice", "demo");
        let commit = env.state.git.resolve_commit(&path, "main").unwrap();
        let row = {
            let conn = env.state.store.connection();
            let now = timestamp_now();
            let row = try_insert_repo_archiver(&conn, repo.id, ArchiveType::Zip, &commit, now)
                .unwrap()
                .unwrap();
            delete_repo_archiver(&conn, row.id).unwrap();
            row
        };
        let key = row.relative_path();

        let err = generate(env.state.clone(), "alice".to_string(), "demo".to_string(), row)
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::RepoArchiverNotExist { .. }));

        assert!(
            !env.state
                .blobs
                .exists(BlobNamespace::RepoArchives, &key)
                .unwrap()
        );
        let conn = env.state.store.connection();
        assert!(list_repo_archivers(&conn, repo.id).unwrap().is_empty());
    }
}
