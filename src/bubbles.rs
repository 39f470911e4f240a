use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::{
    events::BlessingRecord,
    placement::BubblePosition,
    timers::{TimerId, TimerQueue},
};

pub const BUBBLE_LIFETIME: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bubble-{}", self.0)
    }
}

/// Visual attributes sampled once per spawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BubbleLook {
    pub position: BubblePosition,
    pub hue: u16,
    pub tilt: i8,
    pub fresh: bool,
}

#[derive(Debug, Clone)]
pub struct VisibleBubble {
    pub instance_id: InstanceId,
    pub blessing_id: String,
    pub name: Option<String>,
    pub text: String,
    pub position: BubblePosition,
    pub hue: u16,
    pub tilt: i8,
    pub fresh: bool,
    pub born_at: Instant,
    pub expires_at: Instant,
    expiry: TimerId,
}

/// The live bubble set plus one expiry timer per instance.
#[derive(Debug, Default)]
pub struct BubbleLifecycle {
    bubbles: Vec<VisibleBubble>,
    expiries: TimerQueue<InstanceId>,
    next_instance: u64,
}

impl BubbleLifecycle {
    pub fn spawn(&mut self, record: &BlessingRecord, look: BubbleLook, now: Instant) -> InstanceId {
        let instance_id = InstanceId(self.next_instance);
        self.next_instance += 1;
        let expires_at = now + BUBBLE_LIFETIME;
        let expiry = self.expiries.schedule(expires_at, instance_id);
        self.bubbles.push(VisibleBubble {
            instance_id,
            blessing_id: record.id.clone(),
            name: record.name.clone(),
            text: record.text.clone(),
            position: look.position,
            hue: look.hue,
            tilt: look.tilt,
            fresh: look.fresh,
            born_at: now,
            expires_at,
            expiry,
        });
        instance_id
    }

    /// Removes the instance and disarms its timer. Returns false if it was
    /// already gone.
    pub fn expire(&mut self, instance_id: InstanceId) -> bool {
        let Some(index) = self
            .bubbles
            .iter()
            .position(|bubble| bubble.instance_id == instance_id)
        else {
            return false;
        };
        let bubble = self.bubbles.remove(index);
        self.expiries.cancel(bubble.expiry);
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.expiries.next_deadline()
    }

    /// Fires the earliest expiry that is due at `now`, if any.
    pub(crate) fn expire_next_due(&mut self, now: Instant) -> Option<InstanceId> {
        let (_, instance_id) = self.expiries.pop_due(now)?;
        self.bubbles.retain(|bubble| bubble.instance_id != instance_id);
        Some(instance_id)
    }

    pub fn expire_due(&mut self, now: Instant) -> Vec<InstanceId> {
        std::iter::from_fn(|| self.expire_next_due(now)).collect()
    }

    pub fn teardown(&mut self) {
        self.expiries.clear();
        self.bubbles.clear();
    }

    pub fn visible(&self) -> &[VisibleBubble] {
        &self.bubbles
    }

    pub fn len(&self) -> usize {
        self.bubbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }

    pub fn pending_timers(&self) -> usize {
        self.expiries.len()
    }
}
