//! Repository lifecycle: create, fork, migrate, rename and delete.
//!
//! Every operation opens one [`Session`](crate::store::Session) for its
//! catalog changes and orders filesystem work around it so a failure on
//! either side leaves the other consistent. Notifications go out only after
//! the commit.

mod create;
mod delete;
pub mod deploy_key;
mod fork;
mod lfs;
mod migrate;
pub mod name;
mod rename;
mod social;

pub use create::{CreateRepoOptions, check_create_repository, create_repository};
pub use delete::delete_repository;
pub use deploy_key::{add_deploy_key, delete_deploy_key, list_deploy_keys};
pub use fork::{ForkRepoOptions, fork_repository};
pub use lfs::store_lfs_object;
pub use migrate::{MigrateOptions, migrate_repository};
pub use name::{is_usable_repo_name, is_usable_user_name};
pub use rename::{change_repository_name, move_with_rollback};
pub use social::{star_repo, watch_repo};
