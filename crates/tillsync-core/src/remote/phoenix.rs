//! Supabase Realtime over the Phoenix channel protocol.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use super::RemoteRow;
use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{RealtimeEvent, RealtimeEventType, RecordStamp};
use crate::util::parse_iso8601;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
struct PhoenixMessage {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: RealtimeEventType,
    table: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
    #[serde(default)]
    commit_timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OldRecord {
    id: Value,
    #[serde(default)]
    updated_at: Option<String>,
}

/// Connect, join the user's channel and forward row changes until cancelled.
pub(super) async fn open_channel(
    config: &RemoteConfig,
    user_id: &str,
    tables: &[String],
    cancel: CancellationToken,
) -> SyncResult<mpsc::Receiver<RealtimeEvent>> {
    let (socket, _) = timeout(config.request_timeout, connect_async(config.realtime_url()))
        .await
        .map_err(|_| SyncError::TimedOut(config.request_timeout))?
        .map_err(|error| SyncError::Network(format!("realtime connect failed: {error}")))?;
    let (mut write, mut read) = socket.split();

    let topic = format!("realtime:tillsync-{user_id}");
    let join = join_message(&topic, user_id, tables, config.access_token.as_deref());
    write
        .send(Message::Text(join.to_string()))
        .await
        .map_err(|error| SyncError::Network(format!("realtime join failed: {error}")))?;
    tracing::info!("Subscribed to realtime changes for {} tables", tables.len());

    let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut next_ref = 1_u64;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let leave = json!({"topic": topic, "event": "phx_leave", "payload": {}, "ref": null});
                    write.send(Message::Text(leave.to_string())).await.ok();
                    write.close().await.ok();
                    break;
                }
                _ = heartbeat.tick() => {
                    next_ref += 1;
                    let beat = json!({
                        "topic": "phoenix",
                        "event": "heartbeat",
                        "payload": {},
                        "ref": next_ref.to_string(),
                    });
                    if let Err(error) = write.send(Message::Text(beat.to_string())).await {
                        tracing::warn!("Realtime heartbeat failed: {error}");
                        break;
                    }
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_change(&text) {
                            if sender.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!("Realtime connection closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::warn!("Realtime connection error: {error}");
                        break;
                    }
                },
            }
        }
    });

    Ok(receiver)
}

fn join_message(topic: &str, user_id: &str, tables: &[String], access_token: Option<&str>) -> Value {
    let changes = tables
        .iter()
        .map(|table| {
            json!({
                "event": "*",
                "schema": "public",
                "table": table,
                "filter": format!("user_id=eq.{user_id}"),
            })
        })
        .collect::<Vec<_>>();

    let mut payload = json!({
        "config": {
            "broadcast": {"self": false},
            "presence": {"key": ""},
            "postgres_changes": changes,
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }

    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": payload,
        "ref": "1",
        "join_ref": "1",
    })
}

/// Decode a `postgres_changes` frame; anything else yields `None`.
fn parse_change(text: &str) -> Option<RealtimeEvent> {
    let message: PhoenixMessage = serde_json::from_str(text).ok()?;
    match message.event.as_str() {
        "postgres_changes" => {}
        "phx_reply" | "system" => {
            if message.payload.get("status").and_then(Value::as_str) == Some("error") {
                tracing::warn!("Realtime channel error: {}", message.payload);
            }
            return None;
        }
        _ => return None,
    }

    let change: ChangePayload = match serde_json::from_value(message.payload) {
        Ok(change) => change,
        Err(error) => {
            tracing::warn!("Skipping malformed realtime change: {error}");
            return None;
        }
    };
    let data = change.data;

    let new = data
        .record
        .filter(|record| record.as_object().is_some_and(|fields| !fields.is_empty()))
        .and_then(|record| {
            serde_json::from_value::<RemoteRow>(record)
                .map_err(|error| tracing::warn!("Skipping undecodable realtime row: {error}"))
                .ok()
        })
        .and_then(|row| row.into_record().ok());

    let commit_time = data.commit_timestamp.as_deref().and_then(parse_iso8601);
    let old = data
        .old_record
        .and_then(|record| serde_json::from_value::<OldRecord>(record).ok())
        .and_then(|old| {
            let id = match old.id {
                Value::String(id) => id,
                Value::Number(id) => id.to_string(),
                _ => return None,
            };
            let updated_at: Option<DateTime<Utc>> = old
                .updated_at
                .as_deref()
                .and_then(parse_iso8601)
                .or(commit_time);
            Some(RecordStamp { id, updated_at })
        });

    let event = RealtimeEvent {
        event_type: data.kind,
        table: data.table,
        new,
        old,
    };
    event.record_id().is_some().then_some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_message_filters_each_table_by_user() {
        let tables = vec!["orders".to_string(), "inventory_items".to_string()];
        let join = join_message("realtime:tillsync-u1", "u1", &tables, Some("jwt"));

        assert_eq!(join["event"], "phx_join");
        assert_eq!(join["payload"]["access_token"], "jwt");
        let changes = join["payload"]["config"]["postgres_changes"]
            .as_array()
            .unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1]["table"], "inventory_items");
        assert_eq!(changes[1]["filter"], "user_id=eq.u1");
    }

    #[test]
    fn parse_change_decodes_updates() {
        let frame = json!({
            "topic": "realtime:tillsync-u1",
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "ids": [1],
                "data": {
                    "type": "UPDATE",
                    "schema": "public",
                    "table": "orders",
                    "commit_timestamp": "2024-01-01T12:00:01Z",
                    "record": {
                        "id": "1001",
                        "user_id": "u1",
                        "data": {"status": "Dispatched"},
                        "updated_at": "2024-01-01T12:00:00+00:00"
                    },
                    "old_record": {"id": "1001"}
                }
            }
        });

        let event = parse_change(&frame.to_string()).unwrap();
        assert_eq!(event.event_type, RealtimeEventType::Update);
        assert_eq!(event.table, "orders");
        let record = event.new.unwrap();
        assert_eq!(record.payload, json!({"status": "Dispatched"}));
        assert_eq!(record.updated_at, parse_iso8601("2024-01-01T12:00:00Z").unwrap());
    }

    #[test]
    fn parse_change_stamps_deletes_with_commit_time() {
        let frame = json!({
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "DELETE",
                    "table": "orders",
                    "commit_timestamp": "2024-01-01T13:00:00Z",
                    "record": {},
                    "old_record": {"id": "1001"}
                }
            }
        });

        let event = parse_change(&frame.to_string()).unwrap();
        assert_eq!(event.event_type, RealtimeEventType::Delete);
        assert!(event.new.is_none());
        assert_eq!(
            event.old,
            Some(RecordStamp {
                id: "1001".into(),
                updated_at: parse_iso8601("2024-01-01T13:00:00Z"),
            })
        );
    }

    #[test]
    fn parse_change_prefers_old_row_timestamp() {
        let frame = json!({
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "DELETE",
                    "table": "orders",
                    "commit_timestamp": "2024-01-01T13:00:00Z",
                    "old_record": {"id": "1001", "updated_at": "2024-01-01T12:30:00+00:00"}
                }
            }
        });

        let event = parse_change(&frame.to_string()).unwrap();
        assert_eq!(
            event.old.unwrap().updated_at,
            parse_iso8601("2024-01-01T12:30:00Z")
        );
    }

    #[test]
    fn parse_change_ignores_control_frames() {
        let reply = json!({
            "topic": "phoenix",
            "event": "phx_reply",
            "payload": {"status": "ok", "response": {}},
            "ref": "2"
        });
        assert!(parse_change(&reply.to_string()).is_none());
        assert!(parse_change("not json").is_none());
    }
}
