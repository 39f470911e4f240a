use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::{rngs::OsRng, Rng, RngCore};
use tracing::warn;
use uuid::Builder;

/// Per-session presence key. Uses the OS random source; without one the key
/// falls back to a time-based guest id.
pub fn session_presence_key() -> String {
    let mut bytes = [0u8; 16];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => Builder::from_random_bytes(bytes).into_uuid().to_string(),
        Err(err) => {
            warn!(?err, "secure random source unavailable; using guest presence key");
            guest_presence_key()
        }
    }
}

fn guest_presence_key() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_millis())
        .unwrap_or(0);
    let salt: u64 = rand::thread_rng().gen();
    format!("guest-{millis}-{salt:x}")
}

/// Connected clients per presence key, fed by `presence_state` snapshots
/// and `presence_diff` deltas.
#[derive(Debug, Default, Clone)]
pub struct PresenceRoster {
    members: HashMap<String, usize>,
}

impl PresenceRoster {
    pub fn apply_state(&mut self, state: HashMap<String, usize>) {
        self.members = state;
        self.members.retain(|_, metas| *metas > 0);
    }

    pub fn apply_diff(&mut self, joins: HashMap<String, usize>, leaves: HashMap<String, usize>) {
        for (key, metas) in joins {
            *self.members.entry(key).or_default() += metas;
        }
        for (key, metas) in leaves {
            if let Some(current) = self.members.get_mut(&key) {
                *current = current.saturating_sub(metas);
            }
        }
        self.members.retain(|_, metas| *metas > 0);
    }

    pub fn count(&self) -> usize {
        self.members.values().sum()
    }
}
