use serde::{Deserialize, Serialize};

use crate::config::ServiceSettings;

/// A feature area that can be enabled per repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Code,
    Issues,
    PullRequests,
    Releases,
    Wiki,
    ExternalWiki,
    ExternalTracker,
    Projects,
}

impl UnitType {
    /// Units provisioned for a new repository when nothing else is configured.
    pub const DEFAULT_REPO_UNITS: [UnitType; 5] = [
        UnitType::Code,
        UnitType::Issues,
        UnitType::PullRequests,
        UnitType::Releases,
        UnitType::Wiki,
    ];

    /// Type-specific default config for a freshly provisioned unit.
    #[must_use]
    pub fn default_config(self, service: &ServiceSettings) -> UnitConfig {
        match self {
            UnitType::Issues => UnitConfig::Issues(IssuesConfig {
                enable_timetracker: service.default_enable_timetracking,
                allow_only_contributors_to_track_time: service
                    .default_allow_only_contributors_to_track_time,
                enable_dependencies: service.default_enable_dependencies,
            }),
            UnitType::PullRequests => UnitConfig::PullRequests(PullRequestsConfig::default()),
            _ => UnitConfig::Empty,
        }
    }
}

impl From<UnitType> for i64 {
    fn from(t: UnitType) -> Self {
        match t {
            UnitType::Code => 1,
            UnitType::Issues => 2,
            UnitType::PullRequests => 3,
            UnitType::Releases => 4,
            UnitType::Wiki => 5,
            UnitType::ExternalWiki => 6,
            UnitType::ExternalTracker => 7,
            UnitType::Projects => 8,
        }
    }
}

impl TryFrom<i64> for UnitType {
    type Error = i64;

    fn try_from(v: i64) -> std::result::Result<Self, i64> {
        Ok(match v {
            1 => UnitType::Code,
            2 => UnitType::Issues,
            3 => UnitType::PullRequests,
            4 => UnitType::Releases,
            5 => UnitType::Wiki,
            6 => UnitType::ExternalWiki,
            7 => UnitType::ExternalTracker,
            8 => UnitType::Projects,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuesConfig {
    pub enable_timetracker: bool,
    pub allow_only_contributors_to_track_time: bool,
    pub enable_dependencies: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStyle {
    #[default]
    Merge,
    Rebase,
    RebaseMerge,
    Squash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestsConfig {
    pub ignore_whitespace_conflicts: bool,
    pub allow_merge: bool,
    pub allow_rebase: bool,
    pub allow_rebase_merge: bool,
    pub allow_squash: bool,
    pub default_merge_style: MergeStyle,
}

impl Default for PullRequestsConfig {
    fn default() -> Self {
        Self {
            ignore_whitespace_conflicts: false,
            allow_merge: true,
            allow_rebase: true,
            allow_rebase_merge: true,
            allow_squash: true,
            default_merge_style: MergeStyle::Merge,
        }
    }
}

/// Per-unit configuration, stored as a JSON blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitConfig {
    Empty,
    Issues(IssuesConfig),
    PullRequests(PullRequestsConfig),
}

impl UnitConfig {
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            UnitConfig::Empty => Ok("{}".to_string()),
            UnitConfig::Issues(c) => serde_json::to_string(c),
            UnitConfig::PullRequests(c) => serde_json::to_string(c),
        }
    }

    pub fn from_json(unit_type: UnitType, raw: &str) -> serde_json::Result<Self> {
        match unit_type {
            UnitType::Issues => serde_json::from_str(raw).map(UnitConfig::Issues),
            UnitType::PullRequests => serde_json::from_str(raw).map(UnitConfig::PullRequests),
            _ => Ok(UnitConfig::Empty),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepoUnit {
    pub id: i64,
    pub repo_id: i64,
    pub unit_type: UnitType,
    pub config: UnitConfig,
    pub created_unix: i64,
}
