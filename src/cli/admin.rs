use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::archiver::delete_old_repository_archives;
use crate::config::Settings;
use crate::consistency::{self, check_repo_stats, recount_user_stars};
use crate::hooks::{check_delegate_hooks, sync_repository_hooks};
use crate::state::AppState;
use crate::store::repo::list_repositories_after;
use crate::users::{create_org, create_user, delete_inactive_users};

use super::{find_user, load_state};

pub fn run_init(config: &Path, data_dir: PathBuf, admin: Option<String>) -> anyhow::Result<()> {
    if config.exists() {
        anyhow::bail!("Already initialized. Configuration exists at: {}", config.display());
    }
    if let Some(parent) = config.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(&data_dir)?;
    fs::write(config, Settings::with_data_dir(&data_dir).to_toml()?)?;

    let settings = Settings::load(config)?;
    fs::create_dir_all(&settings.repository.root)?;
    fs::create_dir_all(&settings.storage.path)?;
    let state = AppState::open(settings)?;

    println!();
    println!("Wrote configuration to {}", config.display());
    println!("Catalog created at {}", state.settings.db_path().display());

    if let Some(name) = admin {
        create_user(&state, &name, true, true)?;
        println!("Created administrator \"{name}\"");
    }
    println!();

    Ok(())
}

pub fn run_create_user(config: &Path, username: String, admin: bool) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let user = create_user(&state, &username, admin, true)?;
    println!("Created user \"{}\" (id {})", user.name, user.id);
    Ok(())
}

pub fn run_create_org(config: &Path, name: String, owner: String) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let owner = find_user(&state, &owner)?;
    let org = create_org(&state, &owner, &name)?;
    println!("Created organization \"{}\" owned by \"{}\"", org.name, owner.name);
    Ok(())
}

pub fn run_check_stats(config: &Path) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let cancel = CancellationToken::new();
    let corrected = check_repo_stats(&state, &cancel)?;
    let stars = recount_user_stars(&state, &cancel)?;
    println!("Corrected {corrected} repository counters and {stars} user star counts");
    Ok(())
}

#[derive(Serialize)]
struct FindingOutput {
    check: &'static str,
    count: i64,
    fixed: bool,
}

pub fn run_doctor(config: &Path, fix: bool, json: bool) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let cancel = CancellationToken::new();
    let findings: Vec<FindingOutput> = consistency::run_doctor(&state, fix, &cancel)?
        .into_iter()
        .map(|f| FindingOutput {
            check: f.name,
            count: f.count,
            fixed: f.fixed,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&findings)?);
        return Ok(());
    }

    println!();
    for finding in &findings {
        let status = match (finding.count, finding.fixed) {
            (0, _) => "ok".to_string(),
            (n, true) => format!("{n} fixed"),
            (n, false) => format!("{n} found"),
        };
        println!("  {:<45} {status}", finding.check);
    }
    println!();
    Ok(())
}

pub fn run_sync_hooks(config: &Path) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let synced = sync_repository_hooks(&state.store, &state.settings, &CancellationToken::new())?;
    println!("Rewrote hooks of {synced} repositories");
    Ok(())
}

#[derive(Serialize)]
struct HookProblemOutput {
    repository: String,
    problems: Vec<String>,
}

pub fn run_check_hooks(config: &Path, json: bool) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let settings = &state.settings;
    let page_size = settings.database.iterate_buffer_size.max(1);

    let mut report = Vec::new();
    let mut after_id = 0;
    loop {
        let page = {
            let conn = state.store.connection();
            list_repositories_after(&conn, after_id, page_size)?
        };
        let Some(last) = page.last() else {
            break;
        };
        after_id = last.id;

        for repo in &page {
            let path = settings.repo_path(&repo.owner_name, &repo.name);
            let problems = check_delegate_hooks(settings, &path)?;
            if !problems.is_empty() {
                report.push(HookProblemOutput {
                    repository: repo.full_name(),
                    problems,
                });
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_empty() {
        println!("All repository hooks are up to date.");
    } else {
        for entry in &report {
            println!("{}:", entry.repository);
            for problem in &entry.problems {
                println!("  {problem}");
            }
        }
    }

    if !report.is_empty() {
        anyhow::bail!(
            "{} repositories have hook problems; run 'anvil admin sync-hooks'",
            report.len()
        );
    }
    Ok(())
}

pub fn run_archive_cleanup(config: &Path, older_than: Option<u64>) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let age = older_than.unwrap_or(state.settings.cron.archive_cleanup_older_than_secs);
    let cancel = CancellationToken::new();
    let deleted = delete_old_repository_archives(&state, Duration::from_secs(age), &cancel)?;
    println!("Deleted {deleted} archives");
    Ok(())
}

pub fn run_purge_inactive(config: &Path, older_than: Option<u64>) -> anyhow::Result<()> {
    let state = load_state(config)?;
    let deleted = delete_inactive_users(
        &state,
        older_than.map(Duration::from_secs),
        &CancellationToken::new(),
    )?;
    println!("Deleted {deleted} inactive users");
    Ok(())
}
