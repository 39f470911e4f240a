use std::{
    collections::{BTreeMap, HashMap},
    time::Instant,
};

/// Handle returned by [`TimerQueue::schedule`]; cancelling a fired or
/// already-cancelled handle is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Deadline queue polled from the frame loop. Entries fire in deadline
/// order; equal deadlines fire in scheduling order.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    entries: BTreeMap<(Instant, u64), T>,
    deadlines: HashMap<u64, Instant>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn schedule(&mut self, at: Instant, payload: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert((at, id), payload);
        self.deadlines.insert(id, at);
        TimerId(id)
    }

    pub fn cancel(&mut self, timer: TimerId) -> Option<T> {
        let at = self.deadlines.remove(&timer.0)?;
        self.entries.remove(&(at, timer.0))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(at, _)| *at)
    }

    /// Removes and returns the earliest entry whose deadline is `<= now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(Instant, T)> {
        let (&(at, id), _) = self.entries.iter().next()?;
        if at > now {
            return None;
        }
        self.deadlines.remove(&id);
        self.entries.remove(&(at, id)).map(|payload| (at, payload))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::TimerQueue;

    #[test]
    fn fires_in_deadline_then_schedule_order() {
        let base = Instant::now();
        let mut queue = TimerQueue::default();
        queue.schedule(base + Duration::from_millis(30), "late");
        queue.schedule(base + Duration::from_millis(10), "first");
        queue.schedule(base + Duration::from_millis(10), "second");

        assert!(queue.pop_due(base).is_none());
        let now = base + Duration::from_millis(40);
        let fired: Vec<_> = std::iter::from_fn(|| queue.pop_due(now))
            .map(|(_, name)| name)
            .collect();
        assert_eq!(fired, vec!["first", "second", "late"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let base = Instant::now();
        let mut queue = TimerQueue::default();
        let id = queue.schedule(base, 7);
        assert_eq!(queue.cancel(id), Some(7));
        assert_eq!(queue.cancel(id), None);
        assert!(queue.pop_due(base + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn clear_drops_every_pending_entry() {
        let base = Instant::now();
        let mut queue = TimerQueue::default();
        let id = queue.schedule(base, ());
        queue.schedule(base + Duration::from_secs(1), ());
        queue.clear();
        assert_eq!(queue.len(), 0);
        assert!(queue.next_deadline().is_none());
        assert_eq!(queue.cancel(id), None);
    }
}
