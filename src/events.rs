use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_NAME_CHARS: usize = 12;
pub const MAX_TEXT_CHARS: usize = 30;

/// A stored blessing row. Rows are created by the remote store and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlessingRecord {
    pub id: String,
    #[serde(rename = "room_id")]
    pub room: String,
    #[serde(default, deserialize_with = "deserialize_optional_name")]
    pub name: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewBlessing {
    #[serde(rename = "room_id")]
    pub room: String,
    pub name: Option<String>,
    pub text: String,
}

/// Everything the background workers hand to the UI thread.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    InitialBatch(Vec<BlessingRecord>),
    InitialLoadFailed(String),
    Inserted(BlessingRecord),
    PresenceCount(usize),
    SubmitFinished(Result<(), String>),
    RealtimeStatus { status: String, connected: bool },
}

/// Trims a display name; blank names count as absent.
pub fn normalize_name(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn deserialize_optional_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_name(raw.as_deref()))
}
