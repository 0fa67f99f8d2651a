//! Deduplicated delay queue of record references.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use flipper_core::RecordRef;

/// Each record appears at most once. Scheduling a record that is already
/// queued keeps whichever deadline is earlier.
#[derive(Debug, Default)]
pub struct WorkQueue {
    by_deadline: BTreeSet<(Instant, RecordRef)>,
    deadlines: HashMap<RecordRef, Instant>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reference` for `at`. Returns false if it was already queued
    /// for an earlier (or the same) time.
    pub fn schedule(&mut self, reference: RecordRef, at: Instant) -> bool {
        if let Some(&existing) = self.deadlines.get(&reference) {
            if existing <= at {
                return false;
            }
            self.by_deadline.remove(&(existing, reference.clone()));
        }
        self.by_deadline.insert((at, reference.clone()));
        self.deadlines.insert(reference, at);
        true
    }

    pub fn schedule_after(&mut self, reference: RecordRef, delay: Duration) -> bool {
        self.schedule(reference, Instant::now() + delay)
    }

    /// Drop `reference` from the queue. Returns true if it was queued.
    pub fn forget(&mut self, reference: &RecordRef) -> bool {
        match self.deadlines.remove(reference) {
            Some(at) => self.by_deadline.remove(&(at, reference.clone())),
            None => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.first().map(|(at, _)| *at)
    }

    /// Remove and return the earliest entry whose deadline is not after `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<RecordRef> {
        let (at, _) = self.by_deadline.first()?;
        if *at > now {
            return None;
        }
        let (_, reference) = self.by_deadline.pop_first()?;
        self.deadlines.remove(&reference);
        Some(reference)
    }

    pub fn deadline(&self, reference: &RecordRef) -> Option<Instant> {
        self.deadlines.get(reference).copied()
    }

    pub fn contains(&self, reference: &RecordRef) -> bool {
        self.deadlines.contains_key(reference)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(name: &str) -> RecordRef {
        RecordRef::new("default", name)
    }

    #[test]
    fn earliest_deadline_wins() {
        let now = Instant::now();
        let mut q = WorkQueue::new();
        assert!(q.schedule(r("a"), now + Duration::from_secs(60)));
        assert!(q.schedule(r("a"), now + Duration::from_secs(5)));
        assert!(!q.schedule(r("a"), now + Duration::from_secs(30)));

        assert_eq!(q.len(), 1);
        assert_eq!(q.deadline(&r("a")), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn pops_in_deadline_order_once_due() {
        let now = Instant::now();
        let mut q = WorkQueue::new();
        q.schedule(r("late"), now + Duration::from_secs(10));
        q.schedule(r("early"), now + Duration::from_secs(1));

        assert_eq!(q.pop_due(now), None);
        assert_eq!(q.next_deadline(), Some(now + Duration::from_secs(1)));

        let later = now + Duration::from_secs(10);
        assert_eq!(q.pop_due(later), Some(r("early")));
        assert_eq!(q.pop_due(later), Some(r("late")));
        assert_eq!(q.pop_due(later), None);
        assert!(q.is_empty());
    }

    #[test]
    fn forget_removes_entry() {
        let now = Instant::now();
        let mut q = WorkQueue::new();
        q.schedule(r("a"), now);
        assert!(q.forget(&r("a")));
        assert!(!q.forget(&r("a")));
        assert!(!q.contains(&r("a")));
        assert_eq!(q.next_deadline(), None);
    }
}
