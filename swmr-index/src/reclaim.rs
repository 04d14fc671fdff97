use std::collections::VecDeque;

/// A pending release of a shadow-file range, tagged with the tick at which
/// it was superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimRecord {
    pub shadow_offset: u64,
    pub length: u32,
    pub tick_at_deferral: u64,
}

/// FIFO of superseded shadow-file ranges awaiting release, inserted at the
/// head and released from the tail once `max_lag` ticks have elapsed.
///
/// Modeled with a `VecDeque` rather than an intrusive linked list: the access
/// pattern here is push-front/pop-back only, which a deque expresses
/// directly.
#[derive(Debug, Default)]
pub struct ReclaimQueue {
    records: VecDeque<ReclaimRecord>,
}

impl ReclaimQueue {
    pub fn new() -> Self {
        ReclaimQueue { records: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Defer release of a shadow-file range, inserted at the head.
    pub fn defer(&mut self, shadow_offset: u64, length: u32, tick_at_deferral: u64) {
        tracing::trace!(shadow_offset, length, tick_at_deferral, "deferring shadow reclamation");
        self.records.push_front(ReclaimRecord { shadow_offset, length, tick_at_deferral });
    }

    /// Walk from the tail, releasing every record whose deferral tick plus
    /// `max_lag` has elapsed at `current_tick`, stopping at the first record
    /// not yet due. If `current_tick <= max_lag` nothing can possibly be due
    /// and the walk is skipped entirely.
    pub fn release_due(&mut self, current_tick: u64, max_lag: u64) -> Vec<ReclaimRecord> {
        let mut released = Vec::new();
        if current_tick <= max_lag {
            return released;
        }

        while let Some(back) = self.records.back() {
            if back.tick_at_deferral + max_lag < current_tick {
                let record = self.records.pop_back().expect("checked by back() above");
                tracing::trace!(
                    shadow_offset = record.shadow_offset,
                    current_tick,
                    "releasing deferred shadow range"
                );
                released.push(record);
            } else {
                break;
            }
        }

        released
    }

    /// Unconditionally release every record regardless of `max_lag`, for use
    /// during close where pending reclamation must not outlive the file.
    pub fn drain(&mut self) -> Vec<ReclaimRecord> {
        self.records.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_due_before_max_lag_elapsed() {
        let mut queue = ReclaimQueue::new();
        queue.defer(4096, 4096, 2);
        assert!(queue.release_due(2, 3).is_empty());
        assert!(queue.release_due(3, 3).is_empty());
        assert!(queue.release_due(5, 3).is_empty());
    }

    #[test]
    fn releases_once_strictly_past_deadline() {
        let mut queue = ReclaimQueue::new();
        queue.defer(4096, 4096, 2);
        let released = queue.release_due(6, 3);
        assert_eq!(released, vec![ReclaimRecord { shadow_offset: 4096, length: 4096, tick_at_deferral: 2 }]);
        assert!(queue.is_empty());
    }

    #[test]
    fn walk_stops_at_first_not_due_from_tail() {
        let mut queue = ReclaimQueue::new();
        queue.defer(0, 1, 1); // oldest, pushed first, ends up at the tail
        queue.defer(100, 1, 8); // recent, not due yet at tick 10 with max_lag 3

        let released = queue.release_due(10, 3);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].shadow_offset, 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_releases_everything_regardless_of_age() {
        let mut queue = ReclaimQueue::new();
        queue.defer(0, 1, 9);
        queue.defer(100, 1, 9);
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn skips_walk_entirely_when_tick_below_max_lag() {
        let mut queue = ReclaimQueue::new();
        queue.defer(0, 1, 0);
        assert!(queue.release_due(1, 3).is_empty());
        assert_eq!(queue.len(), 1);
    }
}
