use std::time::Duration;

use futures::{SinkExt, StreamExt, future::BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::dao::{
    backend::{ChangeEvent, ChangeFeed, ChangeKind, ChangeSubscription, Row},
    storage::{StorageError, StorageResult},
};

use super::{client::SupabaseClient, error::SupabaseError};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 64;
const JOIN_REF: &str = "1";

/// Phoenix channel envelope.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, rename = "ref")]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Option<Row>,
    #[serde(default)]
    old_record: Option<Row>,
}

/// Meaning of one inbound frame for a channel on `table`.
#[derive(Debug, PartialEq)]
enum Inbound {
    Joined,
    JoinRejected(String),
    Change(ChangeEvent),
    Closed,
    Ignore,
}

fn topic_for(table: &str) -> String {
    format!("realtime:public:{table}")
}

fn join_frame(table: &str, access_token: &str) -> Frame {
    Frame {
        topic: topic_for(table),
        event: "phx_join".into(),
        payload: json!({
            "config": {
                "postgres_changes": [{ "event": "*", "schema": "public", "table": table }]
            },
            "access_token": access_token,
        }),
        reference: Some(JOIN_REF.into()),
    }
}

fn heartbeat_frame(counter: u64) -> Frame {
    Frame {
        topic: "phoenix".into(),
        event: "heartbeat".into(),
        payload: json!({}),
        reference: Some(counter.to_string()),
    }
}

fn parse_kind(kind: &str) -> Option<ChangeKind> {
    match kind.to_ascii_uppercase().as_str() {
        "INSERT" => Some(ChangeKind::Insert),
        "UPDATE" => Some(ChangeKind::Update),
        "DELETE" => Some(ChangeKind::Delete),
        _ => None,
    }
}

fn parse_frame(text: &str, table: &str) -> Inbound {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(error = %err, "ignoring unreadable realtime frame");
            return Inbound::Ignore;
        }
    };
    if frame.topic != topic_for(table) {
        return Inbound::Ignore;
    }

    match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(JOIN_REF) => {
            match frame.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Inbound::Joined,
                _ => Inbound::JoinRejected(
                    frame
                        .payload
                        .pointer("/response/reason")
                        .and_then(Value::as_str)
                        .unwrap_or("channel join refused")
                        .to_string(),
                ),
            }
        }
        "postgres_changes" => {
            let Some(data) = frame.payload.get("data").cloned() else {
                return Inbound::Ignore;
            };
            let Ok(data) = serde_json::from_value::<ChangeData>(data) else {
                return Inbound::Ignore;
            };
            let Some(kind) = parse_kind(&data.kind) else {
                return Inbound::Ignore;
            };
            Inbound::Change(ChangeEvent {
                table: table.to_string(),
                kind,
                record: data.record.filter(|row| !row.is_empty()),
                old_record: data.old_record.filter(|row| !row.is_empty()),
            })
        }
        "phx_close" | "phx_error" => Inbound::Closed,
        _ => Inbound::Ignore,
    }
}

fn encode(frame: &Frame) -> Result<Message, SupabaseError> {
    serde_json::to_string(frame)
        .map(Message::text)
        .map_err(|source| SupabaseError::EncodeFrame { source })
}

impl ChangeFeed for SupabaseClient {
    fn subscribe(&self, table: &'static str) -> BoxFuture<'static, StorageResult<ChangeSubscription>> {
        let client = self.clone();
        Box::pin(async move {
            let url = client.config.realtime_url();
            let heartbeat = client.config.heartbeat;
            let token = client.bearer().await;

            let (socket, _) = connect_async(url)
                .await
                .map_err(|source| SupabaseError::Realtime { source })?;
            let (mut sink, mut stream) = socket.split();

            sink.send(encode(&join_frame(table, &token))?)
                .await
                .map_err(|source| SupabaseError::Realtime { source })?;

            let joined = tokio::time::timeout(JOIN_TIMEOUT, async {
                while let Some(message) = stream.next().await {
                    match message {
                        Ok(Message::Text(text)) => match parse_frame(text.as_str(), table) {
                            Inbound::Joined => return Ok(()),
                            Inbound::JoinRejected(reason) => return Err(StorageError::rejected(reason)),
                            Inbound::Closed => break,
                            _ => {}
                        },
                        Ok(_) => {}
                        Err(source) => return Err(SupabaseError::Realtime { source }.into()),
                    }
                }
                Err(StorageError::rejected(format!("{table}: channel closed before join")))
            })
            .await;
            match joined {
                Ok(result) => result?,
                Err(_) => {
                    return Err(StorageError::rejected(format!(
                        "{table}: channel join timed out"
                    )));
                }
            }
            info!(table, "realtime channel joined");

            let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
            let worker = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(heartbeat);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                let mut counter: u64 = 1;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            counter += 1;
                            let sent = match encode(&heartbeat_frame(counter)) {
                                Ok(message) => sink.send(message).await.is_ok(),
                                Err(err) => {
                                    warn!(error = %err, "failed to encode heartbeat");
                                    false
                                }
                            };
                            if !sent {
                                break;
                            }
                        }
                        message = stream.next() => match message {
                            Some(Ok(Message::Text(text))) => match parse_frame(text.as_str(), table) {
                                Inbound::Change(event) => {
                                    if events_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                                Inbound::Closed => break,
                                _ => {}
                            },
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = sink.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(table, error = %err, "realtime channel error");
                                break;
                            }
                        },
                    }
                }
                let _ = sink.close().await;
                info!(table, "realtime channel closed");
            });

            Ok(ChangeSubscription::new(
                ReceiverStream::new(events_rx),
                Some(worker),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_insert_change() {
        let text = json!({
            "topic": "realtime:public:games",
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "INSERT",
                    "table": "games",
                    "record": { "id": 4, "name": "Monkey Island" },
                    "old_record": {}
                }
            },
            "ref": null
        })
        .to_string();

        let Inbound::Change(event) = parse_frame(&text, "games") else {
            panic!("expected a change");
        };
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record.unwrap()["name"], "Monkey Island");
        assert!(event.old_record.is_none());
    }

    #[test]
    fn parses_delete_with_old_key() {
        let text = json!({
            "topic": "realtime:public:games",
            "event": "postgres_changes",
            "payload": { "data": { "type": "DELETE", "old_record": { "id": 9 } } }
        })
        .to_string();

        let Inbound::Change(event) = parse_frame(&text, "games") else {
            panic!("expected a change");
        };
        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.record.is_none());
        assert_eq!(event.old_record.unwrap()["id"], 9);
    }

    #[test]
    fn classifies_join_replies_and_noise() {
        let ok = json!({
            "topic": "realtime:public:games", "event": "phx_reply",
            "payload": { "status": "ok", "response": {} }, "ref": "1"
        });
        assert_eq!(parse_frame(&ok.to_string(), "games"), Inbound::Joined);

        let refused = json!({
            "topic": "realtime:public:games", "event": "phx_reply",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } }, "ref": "1"
        });
        assert_eq!(
            parse_frame(&refused.to_string(), "games"),
            Inbound::JoinRejected("unauthorized".into())
        );

        let heartbeat_ack = json!({
            "topic": "phoenix", "event": "phx_reply", "payload": { "status": "ok" }, "ref": "2"
        });
        assert_eq!(parse_frame(&heartbeat_ack.to_string(), "games"), Inbound::Ignore);
        assert_eq!(parse_frame("not json", "games"), Inbound::Ignore);
    }

    #[test]
    fn join_frame_targets_public_schema() {
        let frame = join_frame("games", "token");
        assert_eq!(frame.topic, "realtime:public:games");
        assert_eq!(frame.payload["config"]["postgres_changes"][0]["table"], "games");
        assert_eq!(frame.payload["access_token"], "token");
    }
}
