use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

pub const BURST_DURATION: Duration = Duration::from_secs(2);
const TICK_INTERVAL_MS: i64 = 1000;
const OVERLAY_HOLD_MS: i64 = 1500;
const ARRIVED_LABEL_DELAY_MS: i64 = 1000;

/// Styling bucket derived from remaining time. Ordered by urgency; the
/// tracked phase never moves back down until the countdown is re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CountdownPhase {
    Normal,
    Within60s,
    Within30s,
    Within10s,
    Arrived,
}

impl CountdownPhase {
    pub fn from_remaining_ms(remaining_ms: i64) -> Self {
        if remaining_ms <= 0 {
            return Self::Arrived;
        }
        match remaining_ms / 1000 {
            secs if secs < 10 => Self::Within10s,
            secs if secs < 30 => Self::Within30s,
            secs if secs < 60 => Self::Within60s,
            _ => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownSignal {
    /// Fired once per arming, on the tick that first reaches zero.
    Celebrate { burst: Duration },
    OverlayHidden,
    ArrivedLabelShown,
}

#[derive(Debug, Clone)]
pub struct Countdown {
    target: DateTime<Utc>,
    remaining_ms: i64,
    phase: CountdownPhase,
    next_tick_at: DateTime<Utc>,
    celebrated: bool,
    overlay_visible: bool,
    overlay_hide_at: Option<DateTime<Utc>>,
    arrived_label: bool,
    arrived_label_at: Option<DateTime<Utc>>,
    pending: Vec<CountdownSignal>,
}

impl Countdown {
    pub fn new(target: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let mut countdown = Self {
            target,
            remaining_ms: 0,
            phase: CountdownPhase::Normal,
            next_tick_at: now,
            celebrated: false,
            overlay_visible: false,
            overlay_hide_at: None,
            arrived_label: false,
            arrived_label_at: None,
            pending: Vec::new(),
        };
        // Startup signals are handed out by the first poll.
        countdown.pending = countdown.arm(target, now);
        countdown
    }

    /// Sets a new target and clears both one-shot flags. Returns the signals
    /// of the immediate recompute (a past target celebrates right away).
    pub fn arm(&mut self, target: DateTime<Utc>, now: DateTime<Utc>) -> Vec<CountdownSignal> {
        self.target = target;
        self.phase = CountdownPhase::Normal;
        self.celebrated = false;
        self.overlay_visible = false;
        self.overlay_hide_at = None;
        self.arrived_label = false;
        self.arrived_label_at = None;
        self.pending.clear();
        self.next_tick_at = now + TimeDelta::milliseconds(TICK_INTERVAL_MS);
        let mut signals = Vec::new();
        self.recompute(now, &mut signals);
        signals
    }

    /// Advances the one-second tick and the one-shot delays up to `now`.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Vec<CountdownSignal> {
        let mut signals = std::mem::take(&mut self.pending);
        if now >= self.next_tick_at {
            self.recompute(now, &mut signals);
            while self.next_tick_at <= now {
                self.next_tick_at += TimeDelta::milliseconds(TICK_INTERVAL_MS);
            }
        }
        if self.overlay_hide_at.is_some_and(|at| at <= now) {
            self.overlay_hide_at = None;
            self.overlay_visible = false;
            signals.push(CountdownSignal::OverlayHidden);
        }
        if self.arrived_label_at.is_some_and(|at| at <= now) {
            self.arrived_label_at = None;
            self.arrived_label = true;
            signals.push(CountdownSignal::ArrivedLabelShown);
        }
        signals
    }

    fn recompute(&mut self, now: DateTime<Utc>, signals: &mut Vec<CountdownSignal>) {
        self.remaining_ms = if self.phase == CountdownPhase::Arrived {
            0
        } else {
            (self.target - now).num_milliseconds().max(0)
        };
        self.phase = self
            .phase
            .max(CountdownPhase::from_remaining_ms(self.remaining_ms));
        if self.remaining_ms > 0 {
            return;
        }
        if !self.celebrated {
            self.celebrated = true;
            self.overlay_visible = true;
            self.overlay_hide_at = Some(now + TimeDelta::milliseconds(OVERLAY_HOLD_MS));
            info!(deadline = %self.target, "countdown reached zero; celebrating");
            signals.push(CountdownSignal::Celebrate {
                burst: BURST_DURATION,
            });
        }
        if !self.arrived_label && self.arrived_label_at.is_none() {
            self.arrived_label_at = Some(now + TimeDelta::milliseconds(ARRIVED_LABEL_DELAY_MS));
        }
    }

    pub fn remaining_ms(&self) -> i64 {
        self.remaining_ms
    }

    pub fn phase(&self) -> CountdownPhase {
        self.phase
    }

    pub fn is_zero(&self) -> bool {
        self.remaining_ms == 0
    }

    pub fn celebrated(&self) -> bool {
        self.celebrated
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible
    }

    pub fn show_arrived_label(&self) -> bool {
        self.arrived_label
    }
}

/// `HH:MM:SS`; hours are not wrapped at 24.
pub fn format_remaining(remaining_ms: i64) -> String {
    let total_seconds = remaining_ms.max(0) / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
