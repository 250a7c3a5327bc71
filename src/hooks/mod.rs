//! Server-side git hooks.
//!
//! Every repository gets, per event, a fan-out script at `hooks/<event>`
//! that runs each executable in `hooks/<event>.d/`, and a delegate at
//! `hooks/<event>.d/anvil` that calls back into this binary.

pub mod receive;

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{Error, Result, ResultExt};
use crate::store::SqliteStore;
use crate::store::repo::list_repositories_after;

const DELEGATE_NAME: &str = "anvil";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    PreReceive,
    Update,
    PostReceive,
    ProcReceive,
}

impl HookEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreReceive => "pre-receive",
            Self::Update => "update",
            Self::PostReceive => "post-receive",
            Self::ProcReceive => "proc-receive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pre-receive" => Some(Self::PreReceive),
            "update" => Some(Self::Update),
            "post-receive" => Some(Self::PostReceive),
            "proc-receive" => Some(Self::ProcReceive),
            _ => None,
        }
    }

    /// Whether git writes `<old> <new> <ref>` lines on stdin and closes it.
    /// proc-receive keeps stdin open for its pkt-line exchange, so reading
    /// it to the end would never return.
    #[must_use]
    pub fn reads_ref_lines(self) -> bool {
        matches!(self, Self::PreReceive | Self::PostReceive)
    }

    /// Events installed for the given settings.
    #[must_use]
    pub fn installed(settings: &Settings) -> Vec<HookEvent> {
        let mut events = vec![Self::PreReceive, Self::Update, Self::PostReceive];
        if settings.git.support_proc_receive {
            events.push(Self::ProcReceive);
        }
        events
    }
}

/// Quotes `s` for a POSIX shell unless it is made only of safe characters.
#[must_use]
pub fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Script at `hooks/<event>`.
///
/// proc-receive speaks a bidirectional protocol with git, so it cannot be
/// fanned out and calls the binary directly.
#[must_use]
pub fn main_hook_template(settings: &Settings, event: HookEvent) -> String {
    let shell = &settings.repository.script_type;
    match event {
        HookEvent::PreReceive | HookEvent::PostReceive => format!(
            r#"#!/usr/bin/env {shell}
data=$(cat)
exitcodes=""
hookname=$(basename $0)
GIT_DIR=${{GIT_DIR:-$(dirname $0)/..}}

for hook in ${{GIT_DIR}}/hooks/${{hookname}}.d/*; do
test -x "${{hook}}" && test -f "${{hook}}" || continue
echo "${{data}}" | "${{hook}}"
exitcodes="${{exitcodes}} $?"
done

for i in ${{exitcodes}}; do
[ ${{i}} -eq 0 ] || exit ${{i}}
done
"#
        ),
        HookEvent::Update => format!(
            r#"#!/usr/bin/env {shell}
exitcodes=""
hookname=$(basename $0)
GIT_DIR=${{GIT_DIR:-$(dirname $0)/..}}

for hook in ${{GIT_DIR}}/hooks/${{hookname}}.d/*; do
test -x "${{hook}}" && test -f "${{hook}}" || continue
"${{hook}}" $1 $2 $3
exitcodes="${{exitcodes}} $?"
done

for i in ${{exitcodes}}; do
[ ${{i}} -eq 0 ] || exit ${{i}}
done
"#
        ),
        HookEvent::ProcReceive => binary_invocation(settings, event),
    }
}

/// Script at `hooks/<event>.d/anvil`, `None` for events without one.
#[must_use]
pub fn delegate_hook_template(settings: &Settings, event: HookEvent) -> Option<String> {
    match event {
        HookEvent::ProcReceive => None,
        _ => Some(binary_invocation(settings, event)),
    }
}

fn binary_invocation(settings: &Settings, event: HookEvent) -> String {
    let args = if event == HookEvent::Update {
        " $1 $2 $3"
    } else {
        ""
    };
    format!(
        "#!/usr/bin/env {}\n{} hook --config={} {}{}\n",
        settings.repository.script_type,
        shell_escape(&settings.app_path.to_string_lossy()),
        shell_escape(&settings.custom_conf.to_string_lossy()),
        event.as_str(),
        args
    )
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn write_executable(path: &Path, content: &str) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    remove_if_exists(path)?;
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o777))
}

#[cfg(not(unix))]
fn write_executable(path: &Path, content: &str) -> std::io::Result<()> {
    remove_if_exists(path)?;
    fs::write(path, content)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o100 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Writes all hook scripts for the repository at `repo_path`, replacing
/// whatever was there.
pub fn create_delegate_hooks(settings: &Settings, repo_path: &Path) -> Result<()> {
    let hook_dir = repo_path.join("hooks");

    for event in HookEvent::installed(settings) {
        let name = event.as_str();
        let main_path = hook_dir.join(name);
        let delegate_dir = hook_dir.join(format!("{name}.d"));

        fs::create_dir_all(&delegate_dir)
            .context(|| format!("create hooks dir '{}'", delegate_dir.display()))?;
        write_executable(&main_path, &main_hook_template(settings, event))
            .context(|| format!("write hook file '{}'", main_path.display()))?;

        if let Some(delegate) = delegate_hook_template(settings, event) {
            let delegate_path = delegate_dir.join(DELEGATE_NAME);
            write_executable(&delegate_path, &delegate)
                .context(|| format!("write hook file '{}'", delegate_path.display()))?;
        }
    }

    debug!(path = %repo_path.display(), "Wrote delegate hooks");
    Ok(())
}

fn check_file(path: &Path, expected: &str, results: &mut Vec<String>) -> Result<()> {
    let contents = fs::read_to_string(path)?;
    if contents != expected {
        results.push(format!("hook file {} is out of date", path.display()));
    }
    if !is_executable(path) {
        results.push(format!("hook file {} is not executable", path.display()));
    }
    Ok(())
}

/// Lists every missing, stale or non-executable hook file. Nothing is
/// repaired.
pub fn check_delegate_hooks(settings: &Settings, repo_path: &Path) -> Result<Vec<String>> {
    let hook_dir = repo_path.join("hooks");
    let mut results = Vec::new();

    for event in HookEvent::installed(settings) {
        let name = event.as_str();
        let main_path = hook_dir.join(name);
        let delegate_dir = hook_dir.join(format!("{name}.d"));
        let delegate_path = delegate_dir.join(DELEGATE_NAME);
        let delegate = delegate_hook_template(settings, event);

        let mut missing = false;
        if !main_path.exists() {
            results.push(format!("hook file {} does not exist", main_path.display()));
            missing = true;
        }
        if delegate.is_some() && !delegate_dir.is_dir() {
            results.push(format!("hooks directory {} does not exist", delegate_dir.display()));
            missing = true;
        }
        if delegate.is_some() && !delegate_path.exists() {
            results.push(format!("hook file {} does not exist", delegate_path.display()));
            missing = true;
        }
        if missing {
            continue;
        }

        check_file(&main_path, &main_hook_template(settings, event), &mut results)?;
        if let Some(delegate) = delegate {
            check_file(&delegate_path, &delegate, &mut results)?;
        }
    }

    Ok(results)
}

/// Rewrites the hooks of every repository, and of its wiki when one exists
/// on disk. Returns the number of repositories processed.
pub fn sync_repository_hooks(
    store: &SqliteStore,
    settings: &Settings,
    cancel: &CancellationToken,
) -> Result<usize> {
    let page_size = settings.database.iterate_buffer_size.max(1);
    let mut after_id = 0;
    let mut synced = 0;

    loop {
        let page = {
            let conn = store.connection();
            list_repositories_after(&conn, after_id, page_size)?
        };
        let Some(last) = page.last() else {
            break;
        };
        after_id = last.id;

        for repo in &page {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(format!(
                    "before sync repository hooks for {}",
                    repo.full_name()
                )));
            }

            let repo_path = settings.repo_path(&repo.owner_name, &repo.name);
            create_delegate_hooks(settings, &repo_path)
                .context(|| format!("sync hooks for {}", repo.full_name()))?;

            let wiki_path = settings.wiki_path(&repo.owner_name, &repo.name);
            if wiki_path.is_dir() {
                create_delegate_hooks(settings, &wiki_path)
                    .context(|| format!("sync wiki hooks for {}", repo.full_name()))?;
            }
            synced += 1;
        }
    }

    info!(repositories = synced, "Synced repository hooks");
    Ok(synced)
}
