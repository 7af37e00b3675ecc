//! Per-resource timeline of revisions and events

use crate::path::ResourcePath;
use crate::revision::ResourceRevision;
use chrono::{DateTime, Utc};
use khi_log::LogId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Point-in-time occurrence on a timeline, referencing an ingested log
///
/// The timestamp is captured from the referenced log at staging time so the
/// timeline can sort without a log-store lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub log_id: LogId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TimelineInner {
    revisions: Vec<ResourceRevision>,
    events: Vec<ResourceEvent>,
    revisions_dirty: bool,
    events_dirty: bool,
}

/// Builder for one resource's timeline
///
/// Writers append under the timeline lock; any read that depends on order
/// sorts first. Sorting is stable, so same-timestamp entries keep insertion
/// order.
#[derive(Debug)]
pub struct TimelineBuilder {
    path: ResourcePath,
    inner: Mutex<TimelineInner>,
}

impl TimelineBuilder {
    /// Empty timeline for `path`
    #[must_use]
    pub fn new(path: ResourcePath) -> Self {
        Self {
            path,
            inner: Mutex::new(TimelineInner::default()),
        }
    }

    /// Identity of this timeline
    #[inline]
    #[must_use]
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Append a revision, marking the order dirty when it lands out of order
    pub fn add_revision(&self, revision: ResourceRevision) {
        let mut inner = self.inner.lock();
        if let Some(last) = inner.revisions.last() {
            if last.change_time > revision.change_time {
                inner.revisions_dirty = true;
            }
        }
        inner.revisions.push(revision);
    }

    /// Append an event, marking the order dirty when it lands out of order
    pub fn add_event(&self, event: ResourceEvent) {
        let mut inner = self.inner.lock();
        if let Some(last) = inner.events.last() {
            if last.timestamp > event.timestamp {
                inner.events_dirty = true;
            }
        }
        inner.events.push(event);
    }

    /// Restore sorted order if any append landed out of order
    pub fn sort(&self) {
        let mut inner = self.inner.lock();
        if inner.revisions_dirty {
            inner.revisions.sort_by_key(|r| r.change_time);
            inner.revisions_dirty = false;
        }
        if inner.events_dirty {
            inner.events.sort_by_key(|e| e.timestamp);
            inner.events_dirty = false;
        }
    }

    /// Snapshot of all revisions, sorted
    #[must_use]
    pub fn revisions(&self) -> Vec<ResourceRevision> {
        self.sort();
        self.inner.lock().revisions.clone()
    }

    /// Snapshot of all events, sorted
    #[must_use]
    pub fn events(&self) -> Vec<ResourceEvent> {
        self.sort();
        self.inner.lock().events.clone()
    }

    /// Number of revisions recorded so far
    #[must_use]
    pub fn revision_count(&self) -> usize {
        self.inner.lock().revisions.len()
    }

    /// Timestamp of the earliest revision or event, if any
    #[must_use]
    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.sort();
        let inner = self.inner.lock();
        let rev = inner.revisions.first().map(|r| r.change_time);
        let ev = inner.events.first().map(|e| e.timestamp);
        match (rev, ev) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Latest revision with `change_time <= t`
    ///
    /// O(log n) over the sorted array; `None` when every revision is later.
    #[must_use]
    pub fn revision_before(&self, t: DateTime<Utc>) -> Option<ResourceRevision> {
        self.sort();
        let inner = self.inner.lock();
        let idx = inner.revisions.partition_point(|r| r.change_time <= t);
        idx.checked_sub(1).map(|i| inner.revisions[i].clone())
    }

    /// Earliest revision with `change_time >= t`
    ///
    /// O(log n) over the sorted array; `None` when every revision is earlier.
    #[must_use]
    pub fn revision_after(&self, t: DateTime<Utc>) -> Option<ResourceRevision> {
        self.sort();
        let inner = self.inner.lock();
        let idx = inner.revisions.partition_point(|r| r.change_time < t);
        inner.revisions.get(idx).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::{RevisionState, RevisionVerb};
    use chrono::TimeZone;
    use khi_chunk::BinaryReference;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rev(secs: i64) -> ResourceRevision {
        ResourceRevision {
            verb: RevisionVerb::Update,
            state: RevisionState::Existing,
            requestor: String::new(),
            change_time: ts(secs),
            body: BinaryReference::new(0, 0, 0),
            partial: false,
            inferred: false,
        }
    }

    fn timeline() -> TimelineBuilder {
        TimelineBuilder::new(ResourcePath::from("core/v1#pod#default#a"))
    }

    #[test]
    fn out_of_order_appends_get_sorted() {
        let tl = timeline();
        tl.add_revision(rev(30));
        tl.add_revision(rev(10));
        tl.add_revision(rev(20));
        let times: Vec<_> = tl.revisions().iter().map(|r| r.change_time).collect();
        assert_eq!(times, vec![ts(10), ts(20), ts(30)]);
    }

    #[test]
    fn stable_on_equal_timestamps() {
        let tl = timeline();
        let mut a = rev(10);
        a.requestor = "first".to_string();
        let mut b = rev(10);
        b.requestor = "second".to_string();
        tl.add_revision(rev(20));
        tl.add_revision(a);
        tl.add_revision(b);
        let revs = tl.revisions();
        assert_eq!(revs[0].requestor, "first");
        assert_eq!(revs[1].requestor, "second");
    }

    #[test]
    fn revision_before_and_after() {
        let tl = timeline();
        for s in [10, 20, 30] {
            tl.add_revision(rev(s));
        }
        assert_eq!(tl.revision_before(ts(25)).unwrap().change_time, ts(20));
        assert_eq!(tl.revision_before(ts(20)).unwrap().change_time, ts(20));
        assert!(tl.revision_before(ts(5)).is_none());

        assert_eq!(tl.revision_after(ts(25)).unwrap().change_time, ts(30));
        assert_eq!(tl.revision_after(ts(30)).unwrap().change_time, ts(30));
        assert!(tl.revision_after(ts(31)).is_none());
    }

    #[test]
    fn events_sorted_by_referenced_log_timestamp() {
        let tl = timeline();
        tl.add_event(ResourceEvent {
            log_id: LogId(1),
            timestamp: ts(20),
        });
        tl.add_event(ResourceEvent {
            log_id: LogId(0),
            timestamp: ts(10),
        });
        let events = tl.events();
        assert_eq!(events[0].log_id, LogId(0));
        assert_eq!(events[1].log_id, LogId(1));
    }

    #[test]
    fn first_timestamp_spans_revisions_and_events() {
        let tl = timeline();
        tl.add_revision(rev(50));
        tl.add_event(ResourceEvent {
            log_id: LogId(0),
            timestamp: ts(40),
        });
        assert_eq!(tl.first_timestamp(), Some(ts(40)));
        assert!(timeline().first_timestamp().is_none());
    }
}
