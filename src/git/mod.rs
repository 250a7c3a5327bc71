//! Git plumbing used by the lifecycle core.
//!
//! The core never reads packfiles or diffs itself; it calls into a
//! [`GitLayer`] and reconciles the results into the catalog.

mod local;

use std::path::Path;

use crate::error::Result;
use crate::types::ArchiveType;

pub use local::LocalGit;

/// Content of the first commit written by `AutoInit`.
#[derive(Debug, Clone)]
pub struct InitialCommit {
    pub readme_name: String,
    pub readme_content: String,
    pub author_name: String,
    pub author_email: String,
}

impl InitialCommit {
    /// README titled with the repository name, followed by its description.
    #[must_use]
    pub fn readme(repo_name: &str, description: &str) -> Self {
        let mut content = format!("# {repo_name}\n");
        if !description.is_empty() {
            content.push('\n');
            content.push_str(description);
            content.push('\n');
        }
        Self {
            readme_name: "README.md".to_string(),
            readme_content: content,
            author_name: "Anvil".to_string(),
            author_email: "anvil@localhost".to_string(),
        }
    }
}

/// A ref that moved during a fetch. `None` on either side means the ref
/// was created or pruned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefChange {
    pub name: String,
    pub old_oid: Option<String>,
    pub new_oid: Option<String>,
    /// Commits reachable from the new tip but not the old one.
    pub ahead: usize,
    /// Commits reachable from the old tip but not the new one (force push).
    pub behind: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub changes: Vec<RefChange>,
}

impl FetchOutcome {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Git operations invoked by the lifecycle manager, mirror scheduler and
/// archiver. Implementations are blocking; async callers go through
/// `spawn_blocking`.
pub trait GitLayer: Send + Sync {
    /// Creates a bare repository whose HEAD points at `default_branch`,
    /// optionally with one initial commit on it.
    fn init_bare(
        &self,
        path: &Path,
        default_branch: &str,
        initial: Option<&InitialCommit>,
    ) -> Result<()>;

    /// Bare clone of `source`. With `mirror` the origin remote keeps a
    /// `+refs/*:refs/*` refspec so later fetches replicate every ref.
    fn clone_bare(&self, source: &str, path: &Path, mirror: bool) -> Result<()>;

    /// Fetches the origin remote and reports which refs changed.
    fn fetch(&self, path: &Path, prune: bool) -> Result<FetchOutcome>;

    /// Pushes every ref to `remote`, deleting refs the remote has extra.
    fn push_mirror(&self, path: &Path, remote: &str) -> Result<()>;

    /// Builds an archive of `commit_id` and returns its bytes.
    fn archive(&self, path: &Path, commit_id: &str, archive_type: ArchiveType) -> Result<Vec<u8>>;

    /// Resolves a branch, tag or sha to a full commit id.
    fn resolve_commit(&self, path: &Path, refname: &str) -> Result<String>;

    fn is_empty(&self, path: &Path) -> Result<bool>;

    /// Branch HEAD points at, `None` when HEAD is detached or unborn
    /// outside `refs/heads/`.
    fn head_branch(&self, path: &Path) -> Result<Option<String>>;

    /// Size on disk in bytes.
    fn repo_size(&self, path: &Path) -> Result<i64>;
}
