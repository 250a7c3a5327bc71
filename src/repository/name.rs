use glob::Pattern;

use crate::error::{Error, Result};

const RESERVED_REPO_NAMES: &[&str] = &[".", ".."];
const RESERVED_REPO_PATTERNS: &[&str] = &["*.git", "*.wiki", "*.rss", "*.atom"];

const RESERVED_USER_NAMES: &[&str] = &[
    ".",
    "..",
    ".well-known",
    "admin",
    "api",
    "assets",
    "attachments",
    "avatars",
    "captcha",
    "commits",
    "debug",
    "error",
    "explore",
    "favicon.ico",
    "ghost",
    "help",
    "install",
    "issues",
    "less",
    "login",
    "manifest.json",
    "metrics",
    "milestones",
    "new",
    "notifications",
    "org",
    "plugins",
    "pulls",
    "raw",
    "repo",
    "robots.txt",
    "search",
    "serviceworker.js",
    "stars",
    "template",
    "user",
];
const RESERVED_USER_PATTERNS: &[&str] = &["*.keys", "*.gpg", "*.rss", "*.atom"];

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn check_usable(names: &[&str], patterns: &[&str], name: &str) -> Result<()> {
    if !name.chars().all(is_name_char) {
        return Err(Error::NameCharsNotAllowed(name.to_string()));
    }

    let lower = name.trim().to_lowercase();
    if lower.is_empty() {
        return Err(Error::NameEmpty);
    }

    if names.contains(&lower.as_str()) {
        return Err(Error::NameReserved(lower));
    }

    for raw in patterns {
        let pattern = Pattern::new(raw)
            .map_err(|e| Error::Config(format!("name pattern {raw}: {e}")))?;
        if pattern.matches(&lower) {
            return Err(Error::NamePatternNotAllowed((*raw).to_string()));
        }
    }
    Ok(())
}

/// Validates a repository name: `[A-Za-z0-9_.-]+`, not `.` or `..`, and not
/// ending in a suffix the web routes reserve.
pub fn is_usable_repo_name(name: &str) -> Result<()> {
    check_usable(RESERVED_REPO_NAMES, RESERVED_REPO_PATTERNS, name)
}

pub fn is_usable_user_name(name: &str) -> Result<()> {
    check_usable(RESERVED_USER_NAMES, RESERVED_USER_PATTERNS, name)
}
