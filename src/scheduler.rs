use std::{
    collections::VecDeque,
    ops::RangeInclusive,
    time::{Duration, Instant},
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use crate::{
    bubbles::{BubbleLifecycle, BubbleLook, InstanceId, VisibleBubble},
    events::BlessingRecord,
    placement::{pick_bubble_position, Viewport},
    pool::BlessingPool,
    timers::{TimerId, TimerQueue},
};

pub const MAX_VISIBLE_BUBBLES: usize = 10;
pub const RECENT_CAPACITY: usize = 10;

const REVEAL_DELAY_MS: RangeInclusive<u64> = 250..=350;
const RESURFACE_DELAY_MS: RangeInclusive<u64> = 1400..=2200;
const UNIQUE_PICK_ATTEMPTS: usize = 20;
const HUE_RANGE: RangeInclusive<f32> = 15.0..=320.0;
const TILT_RANGE: RangeInclusive<f32> = -6.0..=6.0;

/// Ids recently drawn by the resurfacing loop, oldest first.
#[derive(Debug)]
pub struct RecentQueue {
    ids: VecDeque<String>,
    capacity: usize,
}

impl RecentQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, id: String) {
        self.ids.push_back(id);
        while self.ids.len() > self.capacity {
            self.ids.pop_front();
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|known| known == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    fn clear(&mut self) {
        self.ids.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageTimer {
    RevealNext,
    Resurface,
}

/// Owns the pool, the live bubble set and every spawn timer for one page
/// session. All three spawn paths go through [`SpawnScheduler::spawn`],
/// which is the only place the visible-count gate is checked.
#[derive(Debug)]
pub struct SpawnScheduler<R = StdRng> {
    pool: BlessingPool,
    bubbles: BubbleLifecycle,
    recent: RecentQueue,
    rng: R,
    viewport: Viewport,
    timers: TimerQueue<StageTimer>,
    reveal_queue: VecDeque<BlessingRecord>,
    reveal_timer: Option<TimerId>,
    resurface_timer: Option<TimerId>,
    resurface_started: bool,
    torn_down: bool,
}

impl SpawnScheduler<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng> SpawnScheduler<R> {
    pub fn new(rng: R) -> Self {
        Self {
            pool: BlessingPool::default(),
            bubbles: BubbleLifecycle::default(),
            recent: RecentQueue::with_capacity(RECENT_CAPACITY),
            rng,
            viewport: Viewport::default(),
            timers: TimerQueue::default(),
            reveal_queue: VecDeque::new(),
            reveal_timer: None,
            resurface_timer: None,
            resurface_started: false,
            torn_down: false,
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Handles the bulk load: pool first, then the staggered reveal, then
    /// the resurfacing loop (started at most once).
    pub fn ingest_initial(&mut self, records: Vec<BlessingRecord>, now: Instant) {
        if self.torn_down {
            return;
        }
        let added = self.pool.ingest_batch(records.iter().cloned());
        debug!(received = records.len(), added, "ingested initial blessings");
        self.begin_reveal(records, now);
        self.start_resurfacing(now);
    }

    /// Live inserts join the pool and always get an immediate spawn attempt.
    pub fn ingest_live(&mut self, record: BlessingRecord, now: Instant) -> Option<InstanceId> {
        if self.torn_down {
            return None;
        }
        self.pool.ingest_batch(std::iter::once(record.clone()));
        self.spawn(&record, true, now)
    }

    /// Reveals `records` (newest-first, as queried) oldest-first. A record
    /// refused by the gate is skipped, not retried.
    pub fn begin_reveal(&mut self, records: Vec<BlessingRecord>, now: Instant) {
        if let Some(timer) = self.reveal_timer.take() {
            self.timers.cancel(timer);
        }
        self.reveal_queue = records.into_iter().rev().collect();
        self.reveal_step(now);
    }

    pub fn start_resurfacing(&mut self, now: Instant) -> bool {
        if self.resurface_started || self.torn_down {
            return false;
        }
        self.resurface_started = true;
        self.schedule_resurface(now);
        true
    }

    /// Gate check plus instantiation. `None` means the gate refused, which
    /// is a normal outcome.
    pub fn spawn(&mut self, record: &BlessingRecord, fresh: bool, now: Instant) -> Option<InstanceId> {
        if self.torn_down {
            return None;
        }
        if !self.gate_open() {
            debug!(blessing = %record.id, fresh, "bubble gate closed; spawn skipped");
            return None;
        }
        let position = pick_bubble_position(self.viewport, &mut self.rng);
        let look = BubbleLook {
            position,
            hue: self.rng.gen_range(HUE_RANGE).round() as u16,
            tilt: self.rng.gen_range(TILT_RANGE).round() as i8,
            fresh,
        };
        Some(self.bubbles.spawn(record, look, now))
    }

    /// Runs every timer due at `now` in deadline order. Expiries win ties so
    /// a slot freed at the same instant is visible to the spawn timer.
    pub fn tick(&mut self, now: Instant) {
        loop {
            let expiry = self.bubbles.next_deadline().filter(|at| *at <= now);
            let stage = self.timers.next_deadline().filter(|at| *at <= now);
            match (expiry, stage) {
                (None, None) => break,
                (Some(expiry_at), Some(stage_at)) if stage_at < expiry_at => self.fire_stage_timer(now),
                (Some(_), _) => {
                    self.bubbles.expire_next_due(now);
                }
                (None, Some(_)) => self.fire_stage_timer(now),
            }
        }
    }

    pub fn expire(&mut self, instance_id: InstanceId) -> bool {
        self.bubbles.expire(instance_id)
    }

    /// Cancels every timer and clears every collection. Nothing spawns
    /// afterwards.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.timers.clear();
        self.reveal_timer = None;
        self.resurface_timer = None;
        self.reveal_queue.clear();
        self.bubbles.teardown();
        self.recent.clear();
        self.pool.clear();
    }

    pub fn gate_open(&self) -> bool {
        self.bubbles.len() < MAX_VISIBLE_BUBBLES
    }

    pub fn visible(&self) -> &[VisibleBubble] {
        self.bubbles.visible()
    }

    pub fn pool(&self) -> &BlessingPool {
        &self.pool
    }

    pub fn recent(&self) -> &RecentQueue {
        &self.recent
    }

    pub fn reveal_pending(&self) -> usize {
        self.reveal_queue.len()
    }

    pub fn is_resurfacing(&self) -> bool {
        self.resurface_timer.is_some()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len() + self.bubbles.pending_timers()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.timers.next_deadline(), self.bubbles.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn fire_stage_timer(&mut self, now: Instant) {
        let Some((at, timer)) = self.timers.pop_due(now) else {
            return;
        };
        match timer {
            StageTimer::RevealNext => {
                self.reveal_timer = None;
                self.reveal_step(at);
            }
            StageTimer::Resurface => {
                self.resurface_timer = None;
                self.resurface_cycle(at);
            }
        }
    }

    fn reveal_step(&mut self, now: Instant) {
        let Some(record) = self.reveal_queue.pop_front() else {
            return;
        };
        self.spawn(&record, false, now);
        if !self.reveal_queue.is_empty() {
            let delay = Duration::from_millis(self.rng.gen_range(REVEAL_DELAY_MS));
            self.reveal_timer = Some(self.timers.schedule(now + delay, StageTimer::RevealNext));
        }
    }

    fn resurface_cycle(&mut self, now: Instant) {
        if !self.pool.is_empty() && self.gate_open() {
            if let Some(candidate) = self.pick_candidate() {
                if self.spawn(&candidate, false, now).is_some() {
                    self.recent.push(candidate.id);
                }
            }
        }
        self.schedule_resurface(now);
    }

    fn schedule_resurface(&mut self, now: Instant) {
        if self.torn_down {
            return;
        }
        let delay = Duration::from_millis(self.rng.gen_range(RESURFACE_DELAY_MS));
        self.resurface_timer = Some(self.timers.schedule(now + delay, StageTimer::Resurface));
    }

    fn pick_candidate(&mut self) -> Option<BlessingRecord> {
        let Self {
            pool, recent, rng, ..
        } = self;
        for _ in 0..UNIQUE_PICK_ATTEMPTS {
            let record = pool.pick_uniform(&mut *rng)?;
            if !recent.contains(&record.id) {
                return Some(record.clone());
            }
        }
        pool.pick_uniform(&mut *rng).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    use super::{RecentQueue, SpawnScheduler, MAX_VISIBLE_BUBBLES, RECENT_CAPACITY};
    use crate::{bubbles::BUBBLE_LIFETIME, placement::Viewport, pool::tests::record};

    fn scheduler(seed: u64) -> SpawnScheduler<StdRng> {
        let mut scheduler = SpawnScheduler::new(StdRng::seed_from_u64(seed));
        scheduler.set_viewport(Viewport::new(1280.0, 720.0));
        scheduler
    }

    #[test]
    fn recent_queue_evicts_oldest_first() {
        let mut recent = RecentQueue::with_capacity(RECENT_CAPACITY);
        for index in 0..12 {
            recent.push(format!("id-{index}"));
        }
        assert_eq!(recent.len(), RECENT_CAPACITY);
        assert!(!recent.contains("id-0"));
        assert!(!recent.contains("id-1"));
        assert_eq!(recent.iter().next(), Some("id-2"));
        assert!(recent.contains("id-11"));
    }

    #[test]
    fn initial_reveal_runs_oldest_first_with_staggered_gaps() {
        let start = Instant::now();
        let mut scheduler = scheduler(1);
        scheduler.begin_reveal(vec![record("A"), record("B"), record("C")], start);
        assert_eq!(scheduler.visible().len(), 1);

        scheduler.tick(start + Duration::from_secs(2));
        let visible = scheduler.visible();
        let order: Vec<_> = visible.iter().map(|b| b.blessing_id.as_str()).collect();
        assert_eq!(order, vec!["C", "B", "A"]);
        for pair in visible.windows(2) {
            let gap = pair[1].born_at - pair[0].born_at;
            assert!(
                gap >= Duration::from_millis(250) && gap <= Duration::from_millis(350),
                "gap {gap:?}"
            );
        }
        assert_eq!(scheduler.reveal_pending(), 0);
        assert!(visible.iter().all(|b| !b.fresh));
    }

    #[test]
    fn reveal_skips_records_refused_by_gate() {
        let start = Instant::now();
        let mut scheduler = scheduler(2);
        for index in 0..MAX_VISIBLE_BUBBLES {
            assert!(scheduler.ingest_live(record(&format!("live-{index}")), start).is_some());
        }
        scheduler.begin_reveal(vec![record("A"), record("B")], start);
        scheduler.tick(start + Duration::from_secs(1));
        assert_eq!(scheduler.reveal_pending(), 0);
        assert_eq!(scheduler.visible().len(), MAX_VISIBLE_BUBBLES);
        assert!(scheduler
            .visible()
            .iter()
            .all(|b| b.blessing_id.starts_with("live-")));
    }

    #[test]
    fn live_arrivals_beyond_ceiling_are_refused() {
        let start = Instant::now();
        let mut scheduler = scheduler(3);
        let spawned = (0..15)
            .filter_map(|index| scheduler.ingest_live(record(&format!("r{index}")), start))
            .count();
        assert_eq!(spawned, MAX_VISIBLE_BUBBLES);
        assert_eq!(scheduler.pool().len(), 15);
        assert!(scheduler.visible().iter().all(|b| b.fresh));
    }

    #[test]
    fn bulk_and_live_copies_share_one_pool_entry() {
        let start = Instant::now();
        let mut scheduler = scheduler(4);
        scheduler.ingest_initial(vec![record("A"), record("B")], start);
        scheduler.ingest_live(record("A"), start);
        assert_eq!(scheduler.pool().len(), 2);
    }

    #[test]
    fn resurfacing_starts_once_and_spawns_from_pool() {
        let start = Instant::now();
        let mut scheduler = scheduler(5);
        scheduler.ingest_initial(vec![record("A")], start);
        assert!(!scheduler.start_resurfacing(start));
        assert!(scheduler.is_resurfacing());

        scheduler.tick(start + Duration::from_millis(1399));
        assert_eq!(scheduler.visible().len(), 1);
        assert!(scheduler.recent().is_empty());

        scheduler.tick(start + Duration::from_millis(2200));
        assert_eq!(scheduler.visible().len(), 2);
        assert_eq!(scheduler.recent().iter().collect::<Vec<_>>(), vec!["A"]);
        assert!(scheduler.is_resurfacing());
    }

    #[test]
    fn resurfacing_keeps_rescheduling_with_empty_pool() {
        let start = Instant::now();
        let mut scheduler = scheduler(6);
        assert!(scheduler.start_resurfacing(start));
        scheduler.tick(start + Duration::from_secs(30));
        assert!(scheduler.visible().is_empty());
        assert!(scheduler.is_resurfacing());
        assert_eq!(scheduler.pending_timers(), 1);
    }

    #[test]
    fn resurfacing_skips_a_full_gate_without_touching_recent() {
        let start = Instant::now();
        let mut scheduler = scheduler(12);
        for index in 0..MAX_VISIBLE_BUBBLES {
            scheduler.ingest_live(record(&format!("live-{index}")), start);
        }
        assert!(scheduler.start_resurfacing(start));

        scheduler.tick(start + Duration::from_millis(2200));
        assert_eq!(scheduler.visible().len(), MAX_VISIBLE_BUBBLES);
        assert!(scheduler.recent().is_empty());
        assert!(scheduler.is_resurfacing());
        assert!(!scheduler.pool().is_empty());
    }

    #[test]
    fn resurfacing_prefers_ids_not_recently_drawn() {
        let start = Instant::now();
        let mut scheduler = scheduler(7);
        scheduler.ingest_initial(vec![record("B"), record("A")], start);
        scheduler.recent.push("A".to_owned());
        let candidate = scheduler.pick_candidate().expect("pool is not empty");
        assert_eq!(candidate.id, "B");
    }

    #[test]
    fn resurfacing_falls_back_when_everything_is_recent() {
        let mut scheduler = scheduler(8);
        scheduler.pool.ingest_batch(vec![record("only")]);
        scheduler.recent.push("only".to_owned());
        let candidate = scheduler.pick_candidate().expect("fallback pick");
        assert_eq!(candidate.id, "only");
    }

    #[test]
    fn expiry_frees_slots_for_later_spawns() {
        let start = Instant::now();
        let mut scheduler = scheduler(9);
        for index in 0..MAX_VISIBLE_BUBBLES {
            scheduler.ingest_live(record(&format!("r{index}")), start);
        }
        assert!(!scheduler.gate_open());
        scheduler.tick(start + BUBBLE_LIFETIME);
        assert!(scheduler.visible().is_empty());
        assert!(scheduler.ingest_live(record("late"), start + BUBBLE_LIFETIME).is_some());
    }

    #[test]
    fn teardown_cancels_everything_and_stops_spawning() {
        let start = Instant::now();
        let mut scheduler = scheduler(10);
        scheduler.ingest_initial(vec![record("A"), record("B"), record("C")], start);
        scheduler.teardown();
        assert_eq!(scheduler.pending_timers(), 0);
        assert!(scheduler.visible().is_empty());

        scheduler.tick(start + Duration::from_secs(60));
        assert!(scheduler.visible().is_empty());
        assert!(scheduler.ingest_live(record("D"), start).is_none());
        assert!(!scheduler.start_resurfacing(start));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Live(u8),
        Batch(Vec<u8>),
        Advance(u16),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<u8>().prop_map(Op::Live),
            prop::collection::vec(any::<u8>(), 0..20).prop_map(Op::Batch),
            (1u16..5000).prop_map(Op::Advance),
        ]
    }

    proptest! {
        #[test]
        fn visible_count_and_recent_queue_stay_bounded(
            seed in any::<u64>(),
            ops in prop::collection::vec(op_strategy(), 1..120),
        ) {
            let start = Instant::now();
            let mut now = start;
            let mut scheduler = scheduler(seed);
            for op in ops {
                match op {
                    Op::Live(id) => {
                        scheduler.ingest_live(record(&id.to_string()), now);
                    }
                    Op::Batch(ids) => {
                        let records = ids.iter().map(|id| record(&id.to_string())).collect();
                        scheduler.ingest_initial(records, now);
                    }
                    Op::Advance(ms) => {
                        let target = now + Duration::from_millis(u64::from(ms));
                        while now < target {
                            now = (now + Duration::from_millis(50)).min(target);
                            scheduler.tick(now);
                            prop_assert!(scheduler.visible().len() <= MAX_VISIBLE_BUBBLES);
                        }
                    }
                }
                prop_assert!(scheduler.visible().len() <= MAX_VISIBLE_BUBBLES);
                prop_assert!(scheduler.recent().len() <= RECENT_CAPACITY);
            }
        }
    }
}
