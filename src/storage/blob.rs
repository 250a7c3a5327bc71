use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::types::lfs_relative_path;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found")]
    NotFound,
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("invalid OID format")]
    InvalidOid,
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl BlobError {
    fn from_io(e: io::Error) -> Self {
        if e.kind() == ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e)
        }
    }
}

/// Top-level areas of blob storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobNamespace {
    Lfs,
    RepoArchives,
    Attachments,
    RepoAvatars,
}

impl BlobNamespace {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Lfs => "lfs",
            Self::RepoArchives => "repo-archive",
            Self::Attachments => "attachments",
            Self::RepoAvatars => "repo-avatars",
        }
    }
}

/// Key-addressed blob store on the local filesystem. Keys are computed by
/// callers; the store only checks that a key stays inside its namespace.
pub struct BlobStorage {
    base_path: PathBuf,
}

impl BlobStorage {
    pub fn new(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
        }
    }

    pub fn path(&self, ns: BlobNamespace, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.base_path.join(ns.dir_name()).join(key))
    }

    fn temp_path(&self, ns: BlobNamespace) -> PathBuf {
        self.base_path
            .join(ns.dir_name())
            .join("tmp")
            .join(Uuid::new_v4().to_string())
    }

    pub fn exists(&self, ns: BlobNamespace, key: &str) -> Result<bool, BlobError> {
        Ok(self.path(ns, key)?.exists())
    }

    pub fn open(&self, ns: BlobNamespace, key: &str) -> Result<(File, u64), BlobError> {
        let path = self.path(ns, key)?;
        let file = File::open(&path).map_err(BlobError::from_io)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    /// Writes `reader` under `key` through a temp file and rename, so readers
    /// never observe a partial blob.
    pub fn save(
        &self,
        ns: BlobNamespace,
        key: &str,
        reader: &mut dyn Read,
    ) -> Result<u64, BlobError> {
        let final_path = self.path(ns, key)?;

        let temp_path = self.temp_path(ns);
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let written = {
            let mut temp_file = File::create(&temp_path)?;
            let written = io::copy(reader, &mut temp_file)?;
            temp_file.flush()?;
            temp_file.sync_all()?;
            written
        };

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Err(e) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        Ok(written)
    }

    /// Stores an LFS object after checking its size and SHA-256.
    pub fn put_lfs(&self, oid: &str, data: &[u8], expected_size: i64) -> Result<(), BlobError> {
        validate_oid(oid)?;

        if data.len() as i64 != expected_size {
            return Err(BlobError::HashMismatch {
                expected: format!("size {expected_size}"),
                actual: format!("size {}", data.len()),
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(data);
        let actual_hash = hex::encode(hasher.finalize());

        if actual_hash != oid {
            return Err(BlobError::HashMismatch {
                expected: oid.to_string(),
                actual: actual_hash,
            });
        }

        let mut reader = data;
        self.save(BlobNamespace::Lfs, &lfs_relative_path(oid), &mut reader)?;
        Ok(())
    }

    /// Returns false if the blob was already absent.
    pub fn delete(&self, ns: BlobNamespace, key: &str) -> Result<bool, BlobError> {
        let path = self.path(ns, key)?;

        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobError::Io(e)),
        }
    }
}

fn validate_key(key: &str) -> Result<(), BlobError> {
    if key.is_empty() {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    let path = Path::new(key);
    if !path
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn validate_oid(oid: &str) -> Result<(), BlobError> {
    if oid.len() != 64 {
        return Err(BlobError::InvalidOid);
    }

    if !oid
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_uppercase())
    {
        return Err(BlobError::InvalidOid);
    }

    Ok(())
}

#[must_use]
pub fn is_valid_oid(oid: &str) -> bool {
    validate_oid(oid).is_ok()
}
