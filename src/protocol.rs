use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::events::BlessingRecord;

pub const BLESSINGS_TABLE: &str = "blessings";

/// Phoenix channel envelope used by Supabase Realtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Inserted(BlessingRecord),
    PresenceState(HashMap<String, usize>),
    PresenceDiff {
        joins: HashMap<String, usize>,
        leaves: HashMap<String, usize>,
    },
    JoinReply { ok: bool, reference: Option<String> },
    ChannelClosed { reason: String },
    Ignored,
}

pub fn topic_for(channel: &str) -> String {
    format!("realtime:{channel}")
}

pub fn parse_realtime_frame(text: &str) -> Result<(String, RealtimeEvent)> {
    let frame = serde_json::from_str::<PhoenixFrame>(text)
        .context("payload did not match a realtime frame")?;
    let event = match frame.event.as_str() {
        "postgres_changes" => parse_postgres_change(&frame.payload)?,
        "presence_state" => RealtimeEvent::PresenceState(count_metas(&frame.payload)),
        "presence_diff" => RealtimeEvent::PresenceDiff {
            joins: count_metas(frame.payload.get("joins").unwrap_or(&Value::Null)),
            leaves: count_metas(frame.payload.get("leaves").unwrap_or(&Value::Null)),
        },
        "phx_reply" => RealtimeEvent::JoinReply {
            ok: frame.payload.get("status").and_then(Value::as_str) == Some("ok"),
            reference: frame.reference.clone(),
        },
        "phx_error" | "phx_close" => RealtimeEvent::ChannelClosed {
            reason: frame
                .payload
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or(frame.event.as_str())
                .to_owned(),
        },
        _ => RealtimeEvent::Ignored,
    };
    Ok((frame.topic, event))
}

fn parse_postgres_change(payload: &Value) -> Result<RealtimeEvent> {
    let data = payload
        .get("data")
        .ok_or_else(|| anyhow!("postgres_changes frame without data"))?;
    let kind = data.get("type").and_then(Value::as_str).unwrap_or_default();
    let table = data.get("table").and_then(Value::as_str).unwrap_or_default();
    if kind != "INSERT" || table != BLESSINGS_TABLE {
        return Ok(RealtimeEvent::Ignored);
    }
    let record = data
        .get("record")
        .cloned()
        .ok_or_else(|| anyhow!("insert change without record"))?;
    let record = serde_json::from_value::<BlessingRecord>(record)
        .context("insert change record is not a blessing row")?;
    Ok(RealtimeEvent::Inserted(record))
}

fn count_metas(value: &Value) -> HashMap<String, usize> {
    let Some(entries) = value.as_object() else {
        return HashMap::new();
    };
    entries
        .iter()
        .map(|(key, entry)| {
            let metas = entry
                .get("metas")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            (key.clone(), metas)
        })
        .collect()
}

pub fn postgres_join_frame(topic: &str, room: &str, access_token: &str, reference: u64) -> String {
    frame(
        topic,
        "phx_join",
        json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": BLESSINGS_TABLE,
                    "filter": format!("room_id=eq.{room}"),
                }],
                "private": false,
            },
            "access_token": access_token,
        }),
        reference,
    )
}

pub fn presence_join_frame(topic: &str, key: &str, access_token: &str, reference: u64) -> String {
    frame(
        topic,
        "phx_join",
        json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": key },
                "postgres_changes": [],
                "private": false,
            },
            "access_token": access_token,
        }),
        reference,
    )
}

pub fn track_frame(topic: &str, online_at: &str, reference: u64) -> String {
    frame(
        topic,
        "presence",
        json!({
            "type": "presence",
            "event": "track",
            "payload": { "online_at": online_at },
        }),
        reference,
    )
}

pub fn heartbeat_frame(reference: u64) -> String {
    frame("phoenix", "heartbeat", json!({}), reference)
}

pub fn leave_frame(topic: &str, reference: u64) -> String {
    frame(topic, "phx_leave", json!({}), reference)
}

fn frame(topic: &str, event: &str, payload: Value, reference: u64) -> String {
    json!({
        "topic": topic,
        "event": event,
        "payload": payload,
        "ref": reference.to_string(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{
        parse_realtime_frame, postgres_join_frame, topic_for, track_frame, RealtimeEvent,
    };

    #[test]
    fn parses_insert_change() {
        let payload = r#"{
            "topic":"realtime:blessings-global",
            "event":"postgres_changes",
            "payload":{
                "data":{
                    "schema":"public",
                    "table":"blessings",
                    "type":"INSERT",
                    "commit_timestamp":"2025-12-31T14:59:30Z",
                    "record":{
                        "id":"3f1c",
                        "room_id":"global",
                        "name":"Mina",
                        "text":"Stay healthy!",
                        "created_at":"2025-12-31T14:59:30.5+00:00"
                    }
                },
                "ids":[12]
            },
            "ref":null
        }"#;
        let (topic, event) = parse_realtime_frame(payload).expect("expected insert parse");
        assert_eq!(topic, "realtime:blessings-global");
        match event {
            RealtimeEvent::Inserted(record) => {
                assert_eq!(record.id, "3f1c");
                assert_eq!(record.name.as_deref(), Some("Mina"));
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn ignores_changes_for_other_tables() {
        let payload = r#"{"topic":"t","event":"postgres_changes","payload":{"data":{"type":"INSERT","table":"other","record":{}}}}"#;
        let (_, event) = parse_realtime_frame(payload).expect("expected parse");
        assert_eq!(event, RealtimeEvent::Ignored);
    }

    #[test]
    fn counts_presence_metas() {
        let payload = r#"{
            "topic":"realtime:presence-happy-newyear-2026",
            "event":"presence_diff",
            "payload":{
                "joins":{"a":{"metas":[{"phx_ref":"1"},{"phx_ref":"2"}]}},
                "leaves":{"b":{"metas":[{"phx_ref":"3"}]}}
            }
        }"#;
        let (_, event) = parse_realtime_frame(payload).expect("expected diff parse");
        match event {
            RealtimeEvent::PresenceDiff { joins, leaves } => {
                assert_eq!(joins.get("a"), Some(&2));
                assert_eq!(leaves.get("b"), Some(&1));
            }
            other => panic!("expected presence diff, got {other:?}"),
        }
    }

    #[test]
    fn reads_join_reply_status() {
        let payload = r#"{"topic":"realtime:x","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#;
        let (_, event) = parse_realtime_frame(payload).expect("expected reply parse");
        assert_eq!(
            event,
            RealtimeEvent::JoinReply {
                ok: true,
                reference: Some("1".to_owned())
            }
        );
    }

    #[test]
    fn rejects_non_frame_payload() {
        assert!(parse_realtime_frame(r#"{"hello":"world"}"#).is_err());
    }

    #[test]
    fn join_frame_filters_by_room() {
        let topic = topic_for("blessings-global");
        let raw = postgres_join_frame(&topic, "global", "anon", 1);
        let value: Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["topic"], "realtime:blessings-global");
        assert_eq!(
            value["payload"]["config"]["postgres_changes"][0]["filter"],
            "room_id=eq.global"
        );
    }

    #[test]
    fn track_frame_wraps_presence_payload() {
        let raw = track_frame("realtime:p", "2025-12-31T15:00:00Z", 4);
        let value: Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(value["payload"]["event"], "track");
        assert_eq!(value["payload"]["payload"]["online_at"], "2025-12-31T15:00:00Z");
        assert_eq!(value["ref"], "4");
    }
}
