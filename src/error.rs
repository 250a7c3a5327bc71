use thiserror::Error;

use crate::storage::BlobError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("git command failed: {0}")]
    GitCommand(String),

    #[error("blob storage error: {0}")]
    Blob(#[from] BlobError),

    #[error("invalid configuration: {0}")]
    Config(String),

    // Validation: rejected before any mutation.
    #[error("name is empty")]
    NameEmpty,

    #[error("name '{0}' is reserved")]
    NameReserved(String),

    #[error("name pattern '{0}' is not allowed")]
    NamePatternNotAllowed(String),

    #[error("name '{0}' contains characters that are not allowed")]
    NameCharsNotAllowed(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid mirror interval: {0}")]
    InvalidMirrorInterval(String),

    #[error("invalid hook input: {0}")]
    InvalidHookInput(String),

    // Conflicts: detected by pre-check or unique constraint, no partial state.
    #[error("repository already exists [uname: {owner}, name: {name}]")]
    RepoAlreadyExist { owner: String, name: String },

    #[error("repository files already exist [uname: {owner}, name: {name}]")]
    RepoFilesAlreadyExist { owner: String, name: String },

    #[error("repository is already forked by user [uname: {owner}, repo id: {base_id}]")]
    ForkAlreadyExist { owner: String, base_id: i64 },

    #[error("public key already exists [key id: {key_id}, repo id: {repo_id}]")]
    DeployKeyAlreadyExist { key_id: i64, repo_id: i64 },

    #[error("deploy key name already in use [repo id: {repo_id}, name: {name}]")]
    DeployKeyNameAlreadyUsed { repo_id: i64, name: String },

    #[error("public key already exists [fingerprint: {0}]")]
    KeyAlreadyExist(String),

    #[error("user already exists [name: {0}]")]
    UserAlreadyExist(String),

    #[error("user has reached maximum limit of repositories [limit: {0}]")]
    ReachLimitOfRepo(i64),

    #[error("user still owns {count} repositories [uid: {user_id}]")]
    UserOwnRepos { user_id: i64, count: i64 },

    #[error("user is still a member of {count} organizations [uid: {user_id}]")]
    UserHasOrgs { user_id: i64, count: i64 },

    // Lookups.
    #[error("repository does not exist [id: {id}]")]
    RepoNotExist { id: i64 },

    #[error("repository does not exist [owner: {owner}, name: {name}]")]
    RepoNameNotExist { owner: String, name: String },

    #[error("user does not exist [{0}]")]
    UserNotExist(String),

    #[error("mirror does not exist [repo id: {0}]")]
    MirrorNotExist(i64),

    #[error("deploy key does not exist [id: {0}]")]
    DeployKeyNotExist(i64),

    #[error("repository archiver does not exist [repo id: {repo_id}, commit: {commit_id}]")]
    RepoArchiverNotExist { repo_id: i64, commit_id: String },

    #[error("user does not have access to key [uid: {user_id}, key id: {key_id}]")]
    KeyAccessDenied { user_id: i64, key_id: i64 },

    #[error("repository is not ready [id: {0}]")]
    RepoNotReady(i64),

    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The filesystem was moved but neither the catalog commit nor the
    /// reverse move succeeded. Needs manual repair.
    #[error(
        "failed to roll back rename from {from} to {to}: commit error: {commit_error}, rollback error: {rollback_error}"
    )]
    RenameRollback {
        from: String,
        to: String,
        commit_error: String,
        rollback_error: String,
    },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn cancelled(what: impl Into<String>) -> Self {
        Error::Cancelled(what.into())
    }

    /// Strips any `Context` layers.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root(),
            Error::RepoNotExist { .. }
                | Error::RepoNameNotExist { .. }
                | Error::UserNotExist(_)
                | Error::MirrorNotExist(_)
                | Error::DeployKeyNotExist(_)
                | Error::RepoArchiverNotExist { .. }
        )
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.root(),
            Error::RepoAlreadyExist { .. }
                | Error::RepoFilesAlreadyExist { .. }
                | Error::ForkAlreadyExist { .. }
                | Error::DeployKeyAlreadyExist { .. }
                | Error::DeployKeyNameAlreadyUsed { .. }
                | Error::KeyAlreadyExist(_)
                | Error::UserAlreadyExist(_)
        )
    }
}

/// Attaches operation context (which repository, which step) to lower level errors.
pub trait ResultExt<T> {
    fn context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Context {
            context: f().into(),
            source: Box::new(e.into()),
        })
    }
}
