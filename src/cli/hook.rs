use std::io::Read;
use std::path::{Path, PathBuf};

use crate::hooks::HookEvent;
use crate::hooks::receive::{HookOutcome, run_hook};

use super::load_state;

/// Entry point of the delegate scripts installed in every repository. Git
/// runs hooks inside the repository directory with `GIT_DIR` set. Returns
/// the process exit code.
pub fn run_hook_command(config: &Path, event: &str, args: &[String]) -> anyhow::Result<i32> {
    let Some(event) = HookEvent::parse(event) else {
        anyhow::bail!("unknown hook event '{event}'");
    };

    let mut input = String::new();
    if event.reads_ref_lines() {
        std::io::stdin().read_to_string(&mut input)?;
    }

    let git_dir = match std::env::var_os("GIT_DIR") {
        Some(dir) => std::env::current_dir()?.join(PathBuf::from(dir)),
        None => std::env::current_dir()?,
    };

    let state = load_state(config)?;
    match run_hook(&state, event, &git_dir, args, &input)? {
        HookOutcome::Allow => Ok(0),
        HookOutcome::Deny(reason) => {
            eprintln!("{reason}");
            Ok(1)
        }
    }
}
