//! # Anvil
//!
//! The repository lifecycle core of a self-hosted git forge: creating,
//! forking, migrating, mirroring, renaming and deleting repositories while
//! keeping the catalog, the bare repositories on disk and blob storage
//! consistent with each other.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! anvil = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::path::Path;
//! use anvil::config::Settings;
//! use anvil::repository::{CreateRepoOptions, create_repository};
//! use anvil::state::AppState;
//!
//! let state = AppState::open(Settings::load(Path::new("anvil.toml"))?)?;
//! let repo = create_repository(&state, &doer, &owner, CreateRepoOptions {
//!     name: "demo".into(),
//!     auto_init: true,
//!     ..CreateRepoOptions::default()
//! }, false)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes CLI module. Disable with `default-features = false`.

pub mod archiver;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod consistency;
pub mod error;
pub mod git;
pub mod hooks;
pub mod mirror;
pub mod notify;
pub mod repository;
pub mod state;
pub mod storage;
pub mod store;
pub mod types;
pub mod users;
