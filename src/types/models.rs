use serde::{Deserialize, Serialize};

use super::AccessMode;

/// Lifecycle status of a repository row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStatus {
    #[default]
    Ready,
    BeingMigrated,
    PendingTransfer,
}

impl From<i64> for RepositoryStatus {
    fn from(v: i64) -> Self {
        match v {
            1 => Self::BeingMigrated,
            2 => Self::PendingTransfer,
            _ => Self::Ready,
        }
    }
}

impl From<RepositoryStatus> for i64 {
    fn from(s: RepositoryStatus) -> Self {
        s as i64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub owner_id: i64,
    pub owner_name: String,
    pub lower_name: String,
    pub name: String,
    pub description: String,
    pub default_branch: String,
    pub original_url: String,
    pub is_private: bool,
    pub is_archived: bool,
    pub is_mirror: bool,
    pub is_empty: bool,
    pub is_template: bool,
    pub is_fork: bool,
    pub fork_id: i64,
    pub template_id: i64,
    pub status: RepositoryStatus,
    pub avatar: String,
    pub num_watches: i64,
    pub num_stars: i64,
    pub num_forks: i64,
    pub num_issues: i64,
    pub num_closed_issues: i64,
    pub num_pulls: i64,
    pub num_closed_pulls: i64,
    pub num_milestones: i64,
    pub num_closed_milestones: i64,
    pub size: i64,
    pub created_unix: i64,
    pub updated_unix: i64,
}

impl Repository {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner_name, self.name)
    }

    #[must_use]
    pub fn is_being_migrated(&self) -> bool {
        self.status == RepositoryStatus::BeingMigrated
    }
}

/// Distinguishes individual accounts from organizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[default]
    Individual,
    Organization,
}

impl From<i64> for UserType {
    fn from(v: i64) -> Self {
        if v == 1 {
            Self::Organization
        } else {
            Self::Individual
        }
    }
}

impl From<UserType> for i64 {
    fn from(t: UserType) -> Self {
        t as i64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub lower_name: String,
    pub user_type: UserType,
    pub is_admin: bool,
    pub is_active: bool,
    pub num_repos: i64,
    pub num_stars: i64,
    /// Per-user repository quota, -1 defers to the global limit.
    pub max_repo_creation: i64,
    pub last_repo_visibility: bool,
    pub created_unix: i64,
}

impl User {
    #[must_use]
    pub fn is_organization(&self) -> bool {
        self.user_type == UserType::Organization
    }

    /// Effective quota given the global `max_creation_limit`.
    #[must_use]
    pub fn max_creation_limit(&self, global_limit: i64) -> i64 {
        if self.max_repo_creation <= -1 {
            global_limit
        } else {
            self.max_repo_creation
        }
    }

    #[must_use]
    pub fn can_create_repo(&self, global_limit: i64) -> bool {
        if self.is_admin {
            return true;
        }
        let limit = self.max_creation_limit(global_limit);
        limit <= -1 || self.num_repos < limit
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub org_id: i64,
    pub name: String,
    pub authorize: AccessMode,
    pub includes_all_repositories: bool,
    pub num_repos: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mirror {
    pub id: i64,
    pub repo_id: i64,
    /// Seconds between syncs, 0 disables scheduled syncing.
    pub interval_secs: i64,
    pub enable_prune: bool,
    pub updated_unix: i64,
    /// Next due time, 0 disables scheduled syncing.
    pub next_update_unix: i64,
    pub lfs_enabled: bool,
    pub lfs_endpoint: String,
    pub remote_address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushMirror {
    pub id: i64,
    pub repo_id: i64,
    pub remote_name: String,
    pub remote_address: String,
    pub interval_secs: i64,
    pub last_update_unix: i64,
    pub last_error: String,
}

impl PushMirror {
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.interval_secs > 0 && self.last_update_unix + self.interval_secs <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveType {
    Zip,
    TarGz,
}

impl ArchiveType {
    /// File extension, also the `--format` value passed to `git archive`.
    #[must_use]
    pub fn ext(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "zip" => Some(Self::Zip),
            "tar.gz" | "targz" | "tgz" => Some(Self::TarGz),
            _ => None,
        }
    }
}

impl From<ArchiveType> for i64 {
    fn from(t: ArchiveType) -> Self {
        match t {
            ArchiveType::Zip => 1,
            ArchiveType::TarGz => 2,
        }
    }
}

impl TryFrom<i64> for ArchiveType {
    type Error = i64;

    fn try_from(v: i64) -> std::result::Result<Self, i64> {
        match v {
            1 => Ok(Self::Zip),
            2 => Ok(Self::TarGz),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiverStatus {
    Generating,
    Ready,
}

impl From<i64> for ArchiverStatus {
    fn from(v: i64) -> Self {
        if v == 1 { Self::Ready } else { Self::Generating }
    }
}

impl From<ArchiverStatus> for i64 {
    fn from(s: ArchiverStatus) -> Self {
        s as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoArchiver {
    pub id: i64,
    pub repo_id: i64,
    pub archive_type: ArchiveType,
    pub status: ArchiverStatus,
    pub commit_id: String,
    pub created_unix: i64,
}

impl RepoArchiver {
    /// Blob key: `{repo_id}/{commit[0:2]}/{commit}.{ext}`.
    #[must_use]
    pub fn relative_path(&self) -> String {
        let prefix = self.commit_id.get(..2).unwrap_or(&self.commit_id);
        format!(
            "{}/{}/{}.{}",
            self.repo_id,
            prefix,
            self.commit_id,
            self.archive_type.ext()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    User,
    Deploy,
}

impl From<i64> for KeyType {
    fn from(v: i64) -> Self {
        if v == 2 { Self::Deploy } else { Self::User }
    }
}

impl From<KeyType> for i64 {
    fn from(t: KeyType) -> Self {
        match t {
            KeyType::User => 1,
            KeyType::Deploy => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKey {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub fingerprint: String,
    #[serde(skip)]
    pub content: String,
    pub mode: AccessMode,
    pub key_type: KeyType,
    pub created_unix: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployKey {
    pub id: i64,
    pub key_id: i64,
    pub repo_id: i64,
    pub name: String,
    pub fingerprint: String,
    pub mode: AccessMode,
    pub created_unix: i64,
}

impl DeployKey {
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.mode == AccessMode::Read
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LfsMetaObject {
    pub id: i64,
    pub oid: String,
    pub size: i64,
    pub repo_id: i64,
    pub created_unix: i64,
}

impl LfsMetaObject {
    /// Blob key: `{oid[0:2]}/{oid[2:4]}/{oid[4:]}`.
    #[must_use]
    pub fn relative_path(&self) -> String {
        lfs_relative_path(&self.oid)
    }
}

#[must_use]
pub fn lfs_relative_path(oid: &str) -> String {
    if oid.len() < 5 || !oid.is_ascii() {
        return oid.to_string();
    }
    format!("{}/{}/{}", &oid[0..2], &oid[2..4], &oid[4..])
}

/// Attachment blob key: `{uuid[0]}/{uuid[1]}/{uuid}`.
#[must_use]
pub fn attachment_relative_path(uuid: &str) -> String {
    if uuid.len() < 2 || !uuid.is_ascii() {
        return uuid.to_string();
    }
    format!("{}/{}/{}", &uuid[0..1], &uuid[1..2], uuid)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeType {
    Repository,
    Task,
}

impl From<i64> for NoticeType {
    fn from(v: i64) -> Self {
        if v == 2 { Self::Task } else { Self::Repository }
    }
}

impl From<NoticeType> for i64 {
    fn from(t: NoticeType) -> Self {
        match t {
            NoticeType::Repository => 1,
            NoticeType::Task => 2,
        }
    }
}

/// Admin notice, written when best-effort work fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub id: i64,
    pub notice_type: NoticeType,
    pub description: String,
    pub created_unix: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archiver_relative_path() {
        let archiver = RepoArchiver {
            id: 1,
            repo_id: 7,
            archive_type: ArchiveType::TarGz,
            status: ArchiverStatus::Generating,
            commit_id: "ab12cd".to_string(),
            created_unix: 0,
        };
        assert_eq!(archiver.relative_path(), "7/ab/ab12cd.tar.gz");
    }

    #[test]
    fn test_lfs_relative_path() {
        let oid = "4d7a214614ab2935c943f9e0ff69d22eadbb8f32b1258daaa5e2ca24d17e2393";
        assert_eq!(
            lfs_relative_path(oid),
            "4d/7a/214614ab2935c943f9e0ff69d22eadbb8f32b1258daaa5e2ca24d17e2393"
        );
    }

    #[test]
    fn test_can_create_repo_quota() {
        let mut user = User {
            num_repos: 3,
            ..User::default()
        };
        user.max_repo_creation = -1;
        assert!(user.can_create_repo(-1));
        assert!(!user.can_create_repo(3));

        user.max_repo_creation = 4;
        assert!(user.can_create_repo(3));

        user.is_admin = true;
        user.max_repo_creation = 0;
        assert!(user.can_create_repo(0));
    }

    #[test]
    fn test_push_mirror_due() {
        let pm = PushMirror {
            interval_secs: 60,
            last_update_unix: 1000,
            ..PushMirror::default()
        };
        assert!(!pm.is_due(1059));
        assert!(pm.is_due(1060));

        let disabled = PushMirror {
            interval_secs: 0,
            ..PushMirror::default()
        };
        assert!(!disabled.is_due(i64::MAX));
    }
}
