use std::sync::Arc;

use tracing::warn;

use crate::config::Settings;
use crate::error::Result;
use crate::git::{GitLayer, LocalGit};
use crate::notify::{LogNotifier, Notifier};
use crate::storage::BlobStorage;
use crate::store::notice::create_notice;
use crate::store::{SqliteStore, timestamp_now};
use crate::types::NoticeType;

/// Everything a lifecycle operation needs, shared by the CLI, the hook
/// entrypoint and the background loops.
pub struct AppState {
    pub settings: Settings,
    pub store: SqliteStore,
    pub blobs: BlobStorage,
    pub git: Arc<dyn GitLayer>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    /// Opens the catalog, applies the schema and wires the local git layer.
    pub fn open(settings: Settings) -> Result<Self> {
        Self::with_parts(settings, Arc::new(LocalGit::new()), Arc::new(LogNotifier))
    }

    pub fn with_parts(
        settings: Settings,
        git: Arc<dyn GitLayer>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let store = SqliteStore::new(settings.db_path())?;
        store.initialize()?;
        let blobs = BlobStorage::new(&settings.storage.path);
        Ok(Self {
            settings,
            store,
            blobs,
            git,
            notifier,
        })
    }

    /// Logs a best-effort failure and records it as an admin notice. Must
    /// not be called while a session is open on this thread.
    pub fn notice(&self, notice_type: NoticeType, description: &str) {
        warn!(notice = %description, "Recording admin notice");
        let conn = self.store.connection();
        if let Err(e) = create_notice(&conn, notice_type, description, timestamp_now()) {
            warn!(error = %e, "Failed to record admin notice");
        }
    }
}
