//! Fire-and-forget notifications about repository lifecycle events.
//!
//! Delivery (mail, webhooks, feeds) lives outside the core. Lifecycle
//! operations call [`Notifier::notify`] after their transaction commits and
//! never look at the outcome.

use std::sync::Mutex;

use tracing::info;

use crate::git::RefChange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoEvent {
    Created {
        doer_id: i64,
        repo_id: i64,
        full_name: String,
    },
    Forked {
        doer_id: i64,
        base_id: i64,
        fork_id: i64,
        full_name: String,
    },
    Migrated {
        doer_id: i64,
        repo_id: i64,
        full_name: String,
    },
    Deleted {
        doer_id: i64,
        repo_id: i64,
        full_name: String,
    },
    Renamed {
        doer_id: i64,
        repo_id: i64,
        old_name: String,
        new_name: String,
    },
    MirrorSynced {
        repo_id: i64,
        full_name: String,
        changes: Vec<RefChange>,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &RepoEvent);
}

/// Writes every event to the log. The default when nothing else is wired.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &RepoEvent) {
        match event {
            RepoEvent::Created { repo_id, full_name, .. } => {
                info!(repo_id, repo = %full_name, "Repository created");
            }
            RepoEvent::Forked {
                base_id,
                fork_id,
                full_name,
                ..
            } => {
                info!(base_id, fork_id, repo = %full_name, "Repository forked");
            }
            RepoEvent::Migrated { repo_id, full_name, .. } => {
                info!(repo_id, repo = %full_name, "Repository migrated");
            }
            RepoEvent::Deleted { repo_id, full_name, .. } => {
                info!(repo_id, repo = %full_name, "Repository deleted");
            }
            RepoEvent::Renamed {
                repo_id,
                old_name,
                new_name,
                ..
            } => {
                info!(repo_id, old = %old_name, new = %new_name, "Repository renamed");
            }
            RepoEvent::MirrorSynced {
                repo_id,
                full_name,
                changes,
            } => {
                info!(repo_id, repo = %full_name, changed_refs = changes.len(), "Mirror synced");
            }
        }
    }
}

/// Keeps events in memory, for callers that want to inspect them.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<RepoEvent>>,
}

impl MemoryNotifier {
    #[must_use]
    pub fn events(&self) -> Vec<RepoEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, event: &RepoEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
