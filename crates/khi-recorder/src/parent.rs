//! Parent-deletion tracking
//!
//! A merge-join of two monotone sequences: the child's log stream and the
//! parent's revision stream. The watcher snapshots the parent's deletion
//! episodes up front and is advanced by the child's timestamps, so no
//! back-reference to the parent timeline survives construction.

use chrono::{DateTime, Utc};
use khi_history::ResourceRevision;

/// Cursor over a parent timeline's deletion episodes
///
/// An episode starts at the first revision whose state is deleted after a
/// non-deleted revision (or at the start). Each episode is yielded exactly
/// once.
#[derive(Debug)]
pub struct ParentDeletionWatcher {
    episodes: Vec<DateTime<Utc>>,
    cursor: usize,
}

impl ParentDeletionWatcher {
    /// Watcher over `revisions`, which must be sorted by change time
    #[must_use]
    pub fn new(revisions: &[ResourceRevision]) -> Self {
        let mut episodes = Vec::new();
        let mut in_deleted = false;
        for revision in revisions {
            if revision.state.is_deleted() {
                if !in_deleted {
                    episodes.push(revision.change_time);
                    in_deleted = true;
                }
            } else {
                in_deleted = false;
            }
        }
        Self {
            episodes,
            cursor: 0,
        }
    }

    /// Episodes that started at or before `t`, each yielded once
    pub fn advance_to(&mut self, t: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let start = self.cursor;
        while self.cursor < self.episodes.len() && self.episodes[self.cursor] <= t {
            self.cursor += 1;
        }
        self.episodes[start..self.cursor].to_vec()
    }

    /// Episodes not yet yielded; used after the last log of a group
    pub fn drain_remaining(&mut self) -> Vec<DateTime<Utc>> {
        let start = self.cursor;
        self.cursor = self.episodes.len();
        self.episodes[start..].to_vec()
    }

    /// Total episodes observed on the parent
    #[must_use]
    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }
}
