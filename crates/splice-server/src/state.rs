//! Shared state handed to every handler.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use splice_core::staging::Staging;

use crate::config::ServerSection;

#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub config: ServerSection,
    staging: Staging,
    /// Files with a merge in flight. Two merges of the same file would
    /// interleave writes into one output, so the slot is exclusive.
    merging: Mutex<HashSet<String>>,
}

impl AppState {
    pub fn new(config: ServerSection) -> Self {
        let configured = PathBuf::from(&config.staging_dir);
        let root = configured.canonicalize().unwrap_or(configured);
        Self {
            inner: Arc::new(AppStateInner {
                staging: Staging::new(root),
                merging: Mutex::new(HashSet::new()),
                config,
            }),
        }
    }

    pub fn staging(&self) -> &Staging {
        &self.inner.staging
    }

    /// Claim the merge slot for `file_name`. Returns `None` while an
    /// earlier merge of the same file is still running.
    pub fn begin_merge(&self, file_name: &str) -> Option<MergeGuard> {
        let mut merging = lock_unpoisoned(&self.inner.merging, "merging");
        if !merging.insert(file_name.to_string()) {
            return None;
        }
        Some(MergeGuard {
            state: self.clone(),
            file_name: file_name.to_string(),
        })
    }
}

/// Frees the per-file merge slot on drop, including on error paths.
pub struct MergeGuard {
    state: AppState,
    file_name: String,
}

impl Drop for MergeGuard {
    fn drop(&mut self) {
        let mut merging = lock_unpoisoned(&self.state.inner.merging, "merging");
        merging.remove(&self.file_name);
    }
}

/// The merging set stays usable even if a holder panicked mid-update.
fn lock_unpoisoned<'a, T>(lock: &'a Mutex<T>, lock_name: &'static str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(lock = lock_name, "lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
