use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Write a configuration file and create the catalog
    Init {
        /// Data directory for the catalog, repositories and blobs
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Also create a site administrator with this name
        #[arg(long)]
        admin: Option<String>,
    },

    /// Create a user account
    CreateUser {
        /// Username for the new user
        #[arg(long)]
        username: String,

        /// Make the user a site administrator
        #[arg(long)]
        admin: bool,
    },

    /// Create an organization owned by an existing user
    CreateOrg {
        /// Organization name
        #[arg(long)]
        name: String,

        /// User that joins the Owners team
        #[arg(long)]
        owner: String,
    },

    /// Recount denormalized repository, user and issue counters
    CheckStats,

    /// Look for orphaned rows and broken flags
    Doctor {
        /// Delete orphans and repair flags instead of only reporting them
        #[arg(long)]
        fix: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rewrite the git hooks of every repository
    SyncHooks,

    /// Report repositories whose hooks are missing or outdated
    CheckHooks {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete repository archives older than the given age
    ArchiveCleanup {
        /// Age in seconds; defaults to the configured cleanup age
        #[arg(long)]
        older_than: Option<u64>,
    },

    /// Delete inactive accounts that own nothing
    PurgeInactive {
        /// Only accounts created at least this many seconds ago
        #[arg(long)]
        older_than: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum RepoCommands {
    /// Create a repository
    Create {
        /// Owner of the new repository (user or organization)
        #[arg(long)]
        owner: String,

        /// Repository name
        #[arg(long)]
        name: String,

        /// User performing the action; defaults to the owner
        #[arg(long)]
        doer: Option<String>,

        #[arg(long, default_value = "")]
        description: String,

        /// Initial branch; defaults to the configured default branch
        #[arg(long)]
        default_branch: Option<String>,

        #[arg(long)]
        private: bool,

        /// Create an initial commit with a README
        #[arg(long)]
        auto_init: bool,

        /// Adopt an existing directory on disk instead of failing
        #[arg(long)]
        adopt: bool,
    },

    /// Fork a repository
    Fork {
        /// Repository to fork, as owner/name
        repo: String,

        /// Owner of the fork
        #[arg(long)]
        owner: String,

        /// Name of the fork; defaults to the base name
        #[arg(long)]
        name: Option<String>,

        /// User performing the action; defaults to the owner
        #[arg(long)]
        doer: Option<String>,
    },

    /// Rename a repository
    Rename {
        /// Repository to rename, as owner/name
        repo: String,

        /// New name
        new_name: String,

        /// User performing the action; defaults to the owner
        #[arg(long)]
        doer: Option<String>,
    },

    /// Delete a repository and everything it owns
    Delete {
        /// Repository to delete, as owner/name
        repo: String,

        /// User performing the action; defaults to the owner
        #[arg(long)]
        doer: Option<String>,
    },

    /// Import a remote repository, optionally as a pull mirror
    Migrate {
        /// URL or path to clone from
        clone_addr: String,

        #[arg(long)]
        owner: String,

        #[arg(long)]
        name: String,

        /// User performing the action; defaults to the owner
        #[arg(long)]
        doer: Option<String>,

        #[arg(long)]
        private: bool,

        /// Keep the repository in sync with the remote
        #[arg(long)]
        mirror: bool,

        /// Mirror sync interval in seconds, 0 disables scheduled syncs
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Sync a pull mirror now
    MirrorSync {
        /// Mirror repository, as owner/name
        repo: String,
    },

    /// Build a downloadable archive of a ref
    Archive {
        /// Repository, as owner/name
        repo: String,

        /// Branch, tag or commit
        #[arg(long, default_value = "HEAD")]
        reference: String,

        /// zip or tar.gz
        #[arg(long, default_value = "zip")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Rename a user or organization
    Rename {
        /// Current name
        name: String,

        /// New name
        new_name: String,
    },
}
