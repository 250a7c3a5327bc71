mod access;
mod models;
mod unit;

pub use access::AccessMode;
pub use models::*;
pub use unit::{IssuesConfig, MergeStyle, PullRequestsConfig, RepoUnit, UnitConfig, UnitType};
