use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::archiver::{ArchiveRequest, request_archive};
use crate::mirror::MirrorScheduler;
use crate::repository::{
    CreateRepoOptions, ForkRepoOptions, MigrateOptions, change_repository_name, create_repository,
    delete_repository, fork_repository, migrate_repository,
};
use crate::storage::BlobNamespace;
use crate::types::ArchiveType;

use super::{find_doer, find_repo, find_user, load_state};

pub struct CreateArgs {
    pub owner: String,
    pub name: String,
    pub doer: Option<String>,
    pub description: String,
    pub default_branch: Option<String>,
    pub private: bool,
    pub auto_init: bool,
    pub adopt: bool,
}

pub fn run_repo_create(config: &Path, args: CreateArgs) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let owner = find_user(&state, &args.owner)?;
    let doer = find_doer(&state, args.doer.as_deref(), &owner)?;

    let repo = create_repository(
        &state,
        &doer,
        &owner,
        CreateRepoOptions {
            name: args.name,
            description: args.description,
            default_branch: args.default_branch,
            is_private: args.private,
            auto_init: args.auto_init,
            ..CreateRepoOptions::default()
        },
        args.adopt,
    )?;

    println!("Created repository {}", repo.full_name());
    println!("  {}", state.settings.repo_path(&repo.owner_name, &repo.name).display());
    Ok(())
}

pub fn run_repo_fork(
    config: &Path,
    base: &str,
    owner: &str,
    name: Option<String>,
    doer: Option<String>,
) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let base = find_repo(&state, base)?;
    let owner = find_user(&state, owner)?;
    let doer = find_doer(&state, doer.as_deref(), &owner)?;

    let fork = fork_repository(
        &state,
        &doer,
        &owner,
        ForkRepoOptions {
            name: name.unwrap_or_else(|| base.name.clone()),
            description: base.description.clone(),
            base,
        },
    )?;
    println!("Forked into {}", fork.full_name());
    Ok(())
}

pub fn run_repo_rename(
    config: &Path,
    repo: &str,
    new_name: &str,
    doer: Option<String>,
) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let repo = find_repo(&state, repo)?;
    let owner = find_user(&state, &repo.owner_name)?;
    let doer = find_doer(&state, doer.as_deref(), &owner)?;

    let renamed = change_repository_name(&state, &doer, &repo, new_name)?;
    println!("Renamed {} to {}", repo.full_name(), renamed.full_name());
    Ok(())
}

pub fn run_repo_delete(config: &Path, repo: &str, doer: Option<String>) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let repo = find_repo(&state, repo)?;
    let owner = find_user(&state, &repo.owner_name)?;
    let doer = find_doer(&state, doer.as_deref(), &owner)?;

    delete_repository(&state, &doer, owner.id, repo.id)?;
    println!("Deleted repository {}", repo.full_name());
    Ok(())
}

pub struct MigrateArgs {
    pub clone_addr: String,
    pub owner: String,
    pub name: String,
    pub doer: Option<String>,
    pub private: bool,
    pub mirror: bool,
    pub interval: Option<u64>,
}

pub fn run_repo_migrate(config: &Path, args: MigrateArgs) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let owner = find_user(&state, &args.owner)?;
    let doer = find_doer(&state, args.doer.as_deref(), &owner)?;

    let repo = migrate_repository(
        &state,
        &doer,
        &owner,
        MigrateOptions {
            clone_addr: args.clone_addr,
            name: args.name,
            is_private: args.private,
            mirror: args.mirror,
            mirror_interval: args.interval.map(Duration::from_secs),
            ..MigrateOptions::default()
        },
    )?;

    if repo.is_mirror {
        println!("Mirrored {} into {}", repo.original_url, repo.full_name());
    } else {
        println!("Migrated {} into {}", repo.original_url, repo.full_name());
    }
    Ok(())
}

pub async fn run_repo_mirror_sync(config: &Path, repo: &str) -> anyhow::Result<()> {
    let state = Arc::new(load_state(config)?);
    let repo = find_repo(&state, repo)?;

    let scheduler = MirrorScheduler::new(Arc::clone(&state));
    match scheduler.sync_now(repo.id).await? {
        Some(outcome) if outcome.is_noop() => println!("{} is up to date", repo.full_name()),
        Some(outcome) => {
            println!("Synced {}:", repo.full_name());
            for change in &outcome.changes {
                let new = change.new_oid.as_deref().unwrap_or("(deleted)");
                println!("  {} -> {new}", change.name);
            }
        }
        None => println!("A sync of {} is already running", repo.full_name()),
    }
    Ok(())
}

pub async fn run_repo_archive(
    config: &Path,
    repo: &str,
    reference: &str,
    format: &str,
) -> anyhow::Result<()> {
    let Some(archive_type) = ArchiveType::parse(format) else {
        anyhow::bail!("unknown archive format '{format}', expected zip or tar.gz");
    };
    let state = Arc::new(load_state(config)?);
    let repo = find_repo(&state, repo)?;

    let archiver = match request_archive(&state, &repo, reference, archive_type).await? {
        ArchiveRequest::Ready(archiver) => archiver,
        ArchiveRequest::Started(_, task) => task.await??,
        ArchiveRequest::Pending(_) => {
            println!("Archive of {reference} is being generated by another request");
            return Ok(());
        }
    };

    let path = state
        .blobs
        .path(BlobNamespace::RepoArchives, &archiver.relative_path())?;
    println!("{}", path.display());
    Ok(())
}
