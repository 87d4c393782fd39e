//! Append-only log of pull request ids created during a run.
//!
//! Iterations append and read concurrently. Readers may observe any prefix
//! of the log; stale reads are expected and harmless since nothing is ever
//! removed.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Which part of the registry a bounded read covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    /// The `window` most recently appended ids
    Recent,
    /// The first `window` ids ever appended
    Oldest,
    /// Every id, window ignored
    All,
}

/// Shared pull request registry
#[derive(Debug, Default)]
pub struct PullRequestRegistry {
    ids: RwLock<Vec<String>>,
}

impl PullRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly created id
    pub fn append(&self, id: String) {
        self.write().push(id);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of up to `window` ids from the selected end of the log.
    ///
    /// A registry shorter than `window` yields everything it holds.
    pub fn snapshot(&self, window: usize, selection: Selection) -> Vec<String> {
        let ids = self.read();
        let (start, end) = bounds(ids.len(), window, selection);
        ids[start..end].to_vec()
    }

    /// Pick one id uniformly from the selected window
    pub fn pick<R: Rng + ?Sized>(
        &self,
        window: usize,
        selection: Selection,
        rng: &mut R,
    ) -> Option<String> {
        let ids = self.read();
        let (start, end) = bounds(ids.len(), window, selection);
        if start == end {
            return None;
        }
        let idx = rng.gen_range(start..end);
        ids.get(idx).cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<String>> {
        match self.ids.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<String>> {
        match self.ids.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn bounds(len: usize, window: usize, selection: Selection) -> (usize, usize) {
    match selection {
        Selection::Recent => (len.saturating_sub(window), len),
        Selection::Oldest => (0, len.min(window)),
        Selection::All => (0, len),
    }
}
