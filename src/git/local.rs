use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use flate2::Compression;
use flate2::write::GzEncoder;
use git2::{Direction, FetchOptions, FetchPrune, Oid, Repository, RepositoryInitOptions, Signature};
use tracing::debug;

use super::{FetchOutcome, GitLayer, InitialCommit, RefChange};
use crate::error::{Error, Result};
use crate::types::ArchiveType;

const MIRROR_REFSPEC: &str = "+refs/*:refs/*";
const BRANCH_AND_TAG_REFSPECS: [&str; 2] =
    ["+refs/heads/*:refs/heads/*", "+refs/tags/*:refs/tags/*"];

/// [`GitLayer`] over repositories on the local filesystem, using libgit2
/// for object work and the `git` executable for push and archive.
#[derive(Debug, Default, Clone)]
pub struct LocalGit;

impl LocalGit {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn init_options(default_branch: &str) -> RepositoryInitOptions {
    let mut opts = RepositoryInitOptions::new();
    opts.bare(true).mkpath(true).initial_head(default_branch);
    opts
}

fn write_initial_commit(repo: &Repository, branch: &str, initial: &InitialCommit) -> Result<Oid> {
    let blob = repo.blob(initial.readme_content.as_bytes())?;
    let mut builder = repo.treebuilder(None)?;
    builder.insert(&initial.readme_name, blob, 0o100_644)?;
    let tree = repo.find_tree(builder.write()?)?;
    let sig = Signature::now(&initial.author_name, &initial.author_email)?;
    let oid = repo.commit(
        Some(&format!("refs/heads/{branch}")),
        &sig,
        &sig,
        "Initial commit",
        &tree,
        &[],
    )?;
    Ok(oid)
}

/// Direct refs by name. Symbolic refs such as HEAD are left out.
fn snapshot_refs(repo: &Repository) -> Result<BTreeMap<String, Oid>> {
    let mut refs = BTreeMap::new();
    for reference in repo.references()? {
        let reference = reference?;
        if let (Some(name), Some(target)) = (reference.name(), reference.target()) {
            refs.insert(name.to_string(), target);
        }
    }
    Ok(refs)
}

fn ahead_behind(repo: &Repository, new: Oid, old: Oid) -> (usize, usize) {
    let peel = |oid: Oid| {
        repo.find_object(oid, None)
            .and_then(|obj| obj.peel_to_commit())
            .map(|commit| commit.id())
    };
    match (peel(new), peel(old)) {
        (Ok(new), Ok(old)) => repo.graph_ahead_behind(new, old).unwrap_or((0, 0)),
        _ => (0, 0),
    }
}

fn diff_refs(
    repo: &Repository,
    before: &BTreeMap<String, Oid>,
    after: &BTreeMap<String, Oid>,
) -> Vec<RefChange> {
    let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    names
        .into_iter()
        .filter_map(|name| {
            let old = before.get(name).copied();
            let new = after.get(name).copied();
            if old == new {
                return None;
            }
            let (ahead, behind) = match (new, old) {
                (Some(new), Some(old)) => ahead_behind(repo, new, old),
                _ => (0, 0),
            };
            Some(RefChange {
                name: name.clone(),
                old_oid: old.map(|o| o.to_string()),
                new_oid: new.map(|o| o.to_string()),
                ahead,
                behind,
            })
        })
        .collect()
}

/// Points HEAD at the remote's default branch, falling back to the first
/// local branch when the remote does not advertise one.
fn adopt_remote_head(repo: &Repository, remote_head: Option<String>) -> Result<()> {
    if let Some(head) = remote_head {
        if repo.find_reference(&head).is_ok() {
            repo.set_head(&head)?;
            return Ok(());
        }
    }
    if repo.head().is_ok() {
        return Ok(());
    }
    let first = repo
        .references_glob("refs/heads/*")?
        .filter_map(|r| r.ok())
        .find_map(|r| r.name().map(ToString::to_string));
    if let Some(branch) = first {
        repo.set_head(&branch)?;
    }
    Ok(())
}

fn run_git(git_dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = Command::new("git")
        .arg("--git-dir")
        .arg(git_dir)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::GitCommand(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}

fn dir_size(path: &Path) -> Result<i64> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_file() {
        return Ok(metadata.len() as i64);
    }
    if !metadata.is_dir() {
        return Ok(0);
    }
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        total += dir_size(&entry?.path())?;
    }
    Ok(total)
}

impl GitLayer for LocalGit {
    fn init_bare(
        &self,
        path: &Path,
        default_branch: &str,
        initial: Option<&InitialCommit>,
    ) -> Result<()> {
        let repo = Repository::init_opts(path, &init_options(default_branch))?;
        if let Some(initial) = initial {
            let oid = write_initial_commit(&repo, default_branch, initial)?;
            debug!(path = %path.display(), commit = %oid, "Wrote initial commit");
        }
        Ok(())
    }

    fn clone_bare(&self, source: &str, path: &Path, mirror: bool) -> Result<()> {
        let repo = Repository::init_opts(path, &init_options("main"))?;

        let mut remote = if mirror {
            repo.config()?.set_bool("remote.origin.mirror", true)?;
            repo.remote_with_fetch("origin", source, MIRROR_REFSPEC)?
        } else {
            repo.remote_anonymous(source)?
        };

        remote.connect(Direction::Fetch)?;
        let remote_head = remote
            .default_branch()
            .ok()
            .and_then(|buf| buf.as_str().map(ToString::to_string));
        remote.disconnect()?;

        if mirror {
            remote.fetch(&[] as &[&str], None, None)?;
        } else {
            remote.fetch(&BRANCH_AND_TAG_REFSPECS, None, None)?;
        }
        adopt_remote_head(&repo, remote_head)
    }

    fn fetch(&self, path: &Path, prune: bool) -> Result<FetchOutcome> {
        let repo = Repository::open_bare(path)?;
        let before = snapshot_refs(&repo)?;

        let mut remote = repo.find_remote("origin")?;
        let mut opts = FetchOptions::new();
        opts.prune(if prune { FetchPrune::On } else { FetchPrune::Off });
        remote.fetch(&[] as &[&str], Some(&mut opts), None)?;

        let after = snapshot_refs(&repo)?;
        Ok(FetchOutcome {
            changes: diff_refs(&repo, &before, &after),
        })
    }

    fn push_mirror(&self, path: &Path, remote: &str) -> Result<()> {
        run_git(path, &["push", "--mirror", "--quiet", remote])?;
        Ok(())
    }

    fn archive(&self, path: &Path, commit_id: &str, archive_type: ArchiveType) -> Result<Vec<u8>> {
        let format = match archive_type {
            ArchiveType::Zip => "--format=zip",
            ArchiveType::TarGz => "--format=tar",
        };
        let raw = run_git(path, &["archive", format, commit_id])?;

        match archive_type {
            ArchiveType::Zip => Ok(raw),
            ArchiveType::TarGz => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&raw)?;
                Ok(encoder.finish()?)
            }
        }
    }

    fn resolve_commit(&self, path: &Path, refname: &str) -> Result<String> {
        let repo = Repository::open_bare(path)?;
        let commit = repo.revparse_single(refname)?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    fn is_empty(&self, path: &Path) -> Result<bool> {
        let repo = Repository::open_bare(path)?;
        Ok(repo.is_empty()?)
    }

    fn head_branch(&self, path: &Path) -> Result<Option<String>> {
        let repo = Repository::open_bare(path)?;
        let head = repo.find_reference("HEAD")?;
        Ok(head
            .symbolic_target()
            .and_then(|target| target.strip_prefix("refs/heads/"))
            .map(ToString::to_string))
    }

    fn repo_size(&self, path: &Path) -> Result<i64> {
        dir_size(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn add_commit(path: &Path, branch: &str, file: &str, content: &str) -> Oid {
        let repo = Repository::open_bare(path).unwrap();
        let refname = format!("refs/heads/{branch}");
        let parent = repo
            .find_reference(&refname)
            .ok()
            .and_then(|r| r.target())
            .map(|oid| repo.find_commit(oid).unwrap());

        let blob = repo.blob(content.as_bytes()).unwrap();
        let base_tree = parent.as_ref().map(|p| p.tree().unwrap());
        let mut builder = repo.treebuilder(base_tree.as_ref()).unwrap();
        builder.insert(file, blob, 0o100_644).unwrap();
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        repo.commit(Some(&refname), &sig, &sig, "change", &tree, &parents)
            .unwrap()
    }

    fn source_repo(temp: &TempDir) -> std::path::PathBuf {
        let path = temp.path().join("source.git");
        LocalGit::new()
            .init_bare(&path, "main", Some(&InitialCommit::readme("source", "")))
            .unwrap();
        path
    }

    #[test]
    fn test_init_bare_sets_head_and_initial_commit() {
        let temp = TempDir::new().unwrap();
        let git = LocalGit::new();
        let path = temp.path().join("alice/demo.git");

        git.init_bare(&path, "trunk", Some(&InitialCommit::readme("demo", "A demo")))
            .unwrap();

        let repo = Repository::open_bare(&path).unwrap();
        assert_eq!(repo.head().unwrap().name(), Some("refs/heads/trunk"));
        assert!(!git.is_empty(&path).unwrap());

        let commit = repo.head().unwrap().peel_to_commit().unwrap();
        let entry = commit.tree().unwrap().get_name("README.md").unwrap().id();
        let blob = repo.find_blob(entry).unwrap();
        assert_eq!(blob.content(), b"# demo\n\nA demo\n");
    }

    #[test]
    fn test_init_bare_without_commit_is_empty() {
        let temp = TempDir::new().unwrap();
        let git = LocalGit::new();
        let path = temp.path().join("empty.git");

        git.init_bare(&path, "main", None).unwrap();
        assert!(git.is_empty(&path).unwrap());
        assert_eq!(git.head_branch(&path).unwrap().as_deref(), Some("main"));
        assert!(git.repo_size(&path).unwrap() > 0);
    }

    #[test]
    fn test_fetch_reports_changed_refs() {
        let temp = TempDir::new().unwrap();
        let git = LocalGit::new();
        let source = source_repo(&temp);
        let mirror = temp.path().join("mirror.git");

        git.clone_bare(source.to_str().unwrap(), &mirror, true)
            .unwrap();
        assert_eq!(
            git.resolve_commit(&mirror, "main").unwrap(),
            git.resolve_commit(&source, "main").unwrap()
        );

        let outcome = git.fetch(&mirror, true).unwrap();
        assert!(outcome.is_noop());

        add_commit(&source, "main", "a.txt", "a");
        let new_tip = add_commit(&source, "main", "b.txt", "b");
        add_commit(&source, "feature", "c.txt", "c");

        let outcome = git.fetch(&mirror, true).unwrap();
        assert_eq!(outcome.changes.len(), 2);

        let feature = &outcome.changes[0];
        assert_eq!(feature.name, "refs/heads/feature");
        assert!(feature.old_oid.is_none());

        let main = &outcome.changes[1];
        assert_eq!(main.name, "refs/heads/main");
        assert_eq!((main.ahead, main.behind), (2, 0));
        assert_eq!(main.new_oid, Some(new_tip.to_string()));
    }

    #[test]
    fn test_fetch_prunes_deleted_refs() {
        let temp = TempDir::new().unwrap();
        let git = LocalGit::new();
        let source = source_repo(&temp);
        add_commit(&source, "topic", "t.txt", "t");

        let mirror = temp.path().join("mirror.git");
        git.clone_bare(source.to_str().unwrap(), &mirror, true)
            .unwrap();

        Repository::open_bare(&source)
            .unwrap()
            .find_reference("refs/heads/topic")
            .unwrap()
            .delete()
            .unwrap();

        let outcome = git.fetch(&mirror, true).unwrap();
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].name, "refs/heads/topic");
        assert!(outcome.changes[0].new_oid.is_none());
    }

    #[test]
    fn test_fork_clone_has_no_origin() {
        let temp = TempDir::new().unwrap();
        let git = LocalGit::new();
        let source = source_repo(&temp);
        let fork = temp.path().join("fork.git");

        git.clone_bare(source.to_str().unwrap(), &fork, false)
            .unwrap();

        let repo = Repository::open_bare(&fork).unwrap();
        assert!(repo.find_remote("origin").is_err());
        assert_eq!(repo.head().unwrap().name(), Some("refs/heads/main"));
    }

    #[test]
    fn test_archive_formats() {
        let temp = TempDir::new().unwrap();
        let git = LocalGit::new();
        let source = source_repo(&temp);
        let commit = git.resolve_commit(&source, "main").unwrap();

        let zip = git.archive(&source, &commit, ArchiveType::Zip).unwrap();
        assert_eq!(&zip[..2], b"PK");

        let tgz = git.archive(&source, &commit, ArchiveType::TarGz).unwrap();
        assert_eq!(&tgz[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_push_mirror_replicates_refs() {
        let temp = TempDir::new().unwrap();
        let git = LocalGit::new();
        let source = source_repo(&temp);
        add_commit(&source, "release", "r.txt", "r");

        let target = temp.path().join("target.git");
        git.init_bare(&target, "main", None).unwrap();
        git.push_mirror(&source, target.to_str().unwrap()).unwrap();

        assert_eq!(
            git.resolve_commit(&target, "release").unwrap(),
            git.resolve_commit(&source, "release").unwrap()
        );
    }
}
