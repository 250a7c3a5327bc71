use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::UnitType;

/// Server settings, loaded from a TOML file.
///
/// Relative paths inside the file are resolved against the directory that
/// contains it, so hook processes running inside a repository directory see
/// the same layout as the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub repository: RepositorySettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub mirror: MirrorSettings,
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub cron: CronSettings,
    #[serde(default)]
    pub git: GitSettings,
    /// File the settings were loaded from. Written into hook scripts.
    #[serde(skip)]
    pub custom_conf: PathBuf,
    /// Executable invoked by hook scripts.
    #[serde(skip)]
    pub app_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Root directory of all bare repositories.
    #[serde(default = "default_repo_root")]
    pub root: PathBuf,
    /// Interpreter named in the shebang of generated hooks.
    #[serde(default = "default_script_type")]
    pub script_type: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Global repository quota per owner, -1 for unlimited.
    #[serde(default = "default_max_creation_limit")]
    pub max_creation_limit: i64,
    /// Units provisioned for every new repository.
    #[serde(default = "default_units")]
    pub default_units: Vec<UnitType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Rows fetched per page when iterating whole tables.
    #[serde(default = "default_iterate_buffer_size")]
    pub iterate_buffer_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root of blob storage (LFS objects, archives, attachments, avatars).
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_mirror_interval_secs")]
    pub default_interval_secs: u64,
    #[serde(default = "default_mirror_min_interval_secs")]
    pub min_interval_secs: u64,
    /// Period of the scheduler sweep. Must exceed the expected fetch time,
    /// otherwise sweeps overlap.
    #[serde(default = "default_mirror_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum number of pull mirrors synced per sweep, 0 for no limit.
    #[serde(default = "default_mirror_limit")]
    pub pull_limit: u32,
    /// Maximum number of push mirrors synced per sweep, 0 for no limit.
    #[serde(default = "default_mirror_limit")]
    pub push_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_true")]
    pub auto_watch_new_repos: bool,
    #[serde(default = "default_true")]
    pub default_enable_timetracking: bool,
    #[serde(default = "default_true")]
    pub default_allow_only_contributors_to_track_time: bool,
    #[serde(default = "default_true")]
    pub default_enable_dependencies: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSettings {
    /// 0 disables the periodic stats check.
    #[serde(default = "default_daily_secs")]
    pub check_repo_stats_interval_secs: u64,
    #[serde(default = "default_daily_secs")]
    pub archive_cleanup_interval_secs: u64,
    #[serde(default = "default_daily_secs")]
    pub archive_cleanup_older_than_secs: u64,
    /// 0 disables the inactive user purge.
    #[serde(default)]
    pub delete_inactive_users_interval_secs: u64,
    #[serde(default)]
    pub inactive_users_older_than_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    /// Install the proc-receive hook (git >= 2.29).
    #[serde(default)]
    pub support_proc_receive: bool,
}

fn default_repo_root() -> PathBuf {
    PathBuf::from("./data/repositories")
}

fn default_script_type() -> String {
    "sh".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_max_creation_limit() -> i64 {
    -1
}

fn default_units() -> Vec<UnitType> {
    UnitType::DEFAULT_REPO_UNITS.to_vec()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/anvil.db")
}

fn default_iterate_buffer_size() -> u32 {
    50
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/storage")
}

fn default_true() -> bool {
    true
}

fn default_mirror_interval_secs() -> u64 {
    8 * 60 * 60
}

fn default_mirror_min_interval_secs() -> u64 {
    10 * 60
}

fn default_mirror_poll_interval_secs() -> u64 {
    10 * 60
}

fn default_mirror_limit() -> u32 {
    50
}

fn default_daily_secs() -> u64 {
    24 * 60 * 60
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            root: default_repo_root(),
            script_type: default_script_type(),
            default_branch: default_branch(),
            max_creation_limit: default_max_creation_limit(),
            default_units: default_units(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            iterate_buffer_size: default_iterate_buffer_size(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_interval_secs: default_mirror_interval_secs(),
            min_interval_secs: default_mirror_min_interval_secs(),
            poll_interval_secs: default_mirror_poll_interval_secs(),
            pull_limit: default_mirror_limit(),
            push_limit: default_mirror_limit(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            auto_watch_new_repos: true,
            default_enable_timetracking: true,
            default_allow_only_contributors_to_track_time: true,
            default_enable_dependencies: true,
        }
    }
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            check_repo_stats_interval_secs: default_daily_secs(),
            archive_cleanup_interval_secs: default_daily_secs(),
            archive_cleanup_older_than_secs: default_daily_secs(),
            delete_inactive_users_interval_secs: 0,
            inactive_users_older_than_secs: 0,
        }
    }
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            support_proc_receive: false,
        }
    }
}

impl MirrorSettings {
    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Settings {
    /// Loads settings from `path`. A missing file yields the defaults, so
    /// `admin init` can run before any configuration exists.
    pub fn load(path: &Path) -> Result<Self> {
        let conf_path = absolute(path)?;

        let mut settings = if conf_path.exists() {
            let raw = std::fs::read_to_string(&conf_path)?;
            toml::from_str::<Settings>(&raw)
                .map_err(|e| Error::Config(format!("{}: {e}", conf_path.display())))?
        } else {
            Settings::default()
        };

        let base = conf_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        settings.resolve_paths(&base);
        settings.custom_conf = conf_path;
        settings.app_path = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("anvil"));
        Ok(settings)
    }

    /// Settings rooted at `data_dir`, used by tests and `admin init`.
    #[must_use]
    pub fn with_data_dir(data_dir: &Path) -> Self {
        let mut settings = Settings::default();
        settings.repository.root = data_dir.join("repositories");
        settings.database.path = data_dir.join("anvil.db");
        settings.storage.path = data_dir.join("storage");
        settings.custom_conf = data_dir.join("anvil.toml");
        settings.app_path = PathBuf::from("anvil");
        settings
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.repository.root,
            &mut self.database.path,
            &mut self.storage.path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.database.path
    }

    /// Directory holding all repositories of an owner.
    #[must_use]
    pub fn user_path(&self, owner: &str) -> PathBuf {
        self.repository.root.join(owner.to_lowercase())
    }

    #[must_use]
    pub fn repo_path(&self, owner: &str, name: &str) -> PathBuf {
        self.user_path(owner)
            .join(format!("{}.git", name.to_lowercase()))
    }

    #[must_use]
    pub fn wiki_path(&self, owner: &str, name: &str) -> PathBuf {
        self.user_path(owner)
            .join(format!("{}.wiki.git", name.to_lowercase()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_repo_and_wiki_paths_are_lowercased() {
        let settings = Settings::with_data_dir(Path::new("/srv/anvil"));

        assert_eq!(
            settings.repo_path("Alice", "Demo"),
            Path::new("/srv/anvil/repositories/alice/demo.git")
        );
        assert_eq!(
            settings.wiki_path("Alice", "Demo"),
            Path::new("/srv/anvil/repositories/alice/demo.wiki.git")
        );
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load(&temp.path().join("anvil.toml")).unwrap();

        assert_eq!(settings.repository.default_branch, "main");
        assert_eq!(settings.mirror.default_interval_secs, 8 * 60 * 60);
        assert_eq!(settings.repository.root, temp.path().join("./data/repositories"));
        assert_eq!(settings.repository.default_units.len(), 5);
    }

    #[test]
    fn test_load_resolves_relative_paths_against_config_dir() {
        let temp = TempDir::new().unwrap();
        let conf = temp.path().join("anvil.toml");
        std::fs::write(
            &conf,
            r#"
[repository]
root = "repos"
script_type = "bash"

[mirror]
min_interval_secs = 60

[git]
support_proc_receive = true
"#,
        )
        .unwrap();

        let settings = Settings::load(&conf).unwrap();
        assert_eq!(settings.repository.root, temp.path().join("repos"));
        assert_eq!(settings.repository.script_type, "bash");
        assert_eq!(settings.mirror.min_interval_secs, 60);
        assert_eq!(settings.mirror.pull_limit, 50);
        assert!(settings.git.support_proc_receive);
        assert_eq!(settings.custom_conf, conf);
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let temp = TempDir::new().unwrap();
        let conf = temp.path().join("anvil.toml");
        std::fs::write(&conf, "[repository\nroot = 1").unwrap();

        assert!(matches!(Settings::load(&conf), Err(Error::Config(_))));
    }
}
