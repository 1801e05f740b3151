use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::common::types::{Collection, Row};
use crate::config::BackendConfig;

use super::backend::{FeedMessage, FeedStatus};

const JOIN_REF: &str = "1";
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Một frame phoenix trên socket realtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PhoenixFrame {
    topic: String,
    event: String,
    payload: serde_json::Value,
    #[serde(rename = "ref")]
    reference: Option<String>,
}

/// What a received frame means for the subscription loop.
#[derive(Debug, PartialEq)]
enum FrameAction {
    Ignore,
    Joined,
    Insert(Row),
    End(FeedStatus),
}

/// Owns one websocket subscription for one collection. Reports status
/// transitions and inserted rows over `feed_tx`; returns when the socket
/// dies, the join fails, or the task is aborted by the engine.
pub async fn run_feed(
    config: BackendConfig,
    collection: Collection,
    room_id: String,
    generation: u64,
    feed_tx: mpsc::Sender<FeedMessage>,
) {
    let status = |status: FeedStatus| FeedMessage::Status {
        collection,
        generation,
        status,
    };

    let _ = feed_tx.send(status(FeedStatus::Subscribing)).await;

    let url = websocket_url(&config);
    let socket = match tokio::time::timeout(JOIN_TIMEOUT, connect_async(url.as_str())).await {
        Ok(Ok((socket, _response))) => socket,
        Ok(Err(err)) => {
            log::warn!("Feed connect failed for {}: {err}", collection.table());
            let _ = feed_tx.send(status(FeedStatus::Error)).await;
            return;
        }
        Err(_) => {
            log::warn!("Feed connect timed out for {}", collection.table());
            let _ = feed_tx.send(status(FeedStatus::TimedOut)).await;
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();

    let join = PhoenixFrame {
        topic: channel_topic(collection, &room_id),
        event: "phx_join".to_string(),
        payload: json!({}),
        reference: Some(JOIN_REF.to_string()),
    };
    if send_frame(&mut sink, &join).await.is_err() {
        let _ = feed_tx.send(status(FeedStatus::Error)).await;
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut heartbeat_ref: u64 = 1;
    let mut joined = false;
    let join_deadline = tokio::time::sleep(JOIN_TIMEOUT);
    tokio::pin!(join_deadline);

    loop {
        tokio::select! {
            _ = &mut join_deadline, if !joined => {
                log::warn!("Feed join timed out for {}", collection.table());
                let _ = feed_tx.send(status(FeedStatus::TimedOut)).await;
                return;
            }
            _ = heartbeat.tick() => {
                heartbeat_ref += 1;
                let frame = PhoenixFrame {
                    topic: "phoenix".to_string(),
                    event: "heartbeat".to_string(),
                    payload: json!({}),
                    reference: Some(heartbeat_ref.to_string()),
                };
                if send_frame(&mut sink, &frame).await.is_err() {
                    let _ = feed_tx.send(status(FeedStatus::Error)).await;
                    return;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    let frame = match serde_json::from_str::<PhoenixFrame>(&text) {
                        Ok(frame) => frame,
                        Err(err) => {
                            log::debug!("Ignoring unparsable feed frame: {err}");
                            continue;
                        }
                    };
                    match interpret_frame(collection, frame) {
                        FrameAction::Ignore => {}
                        FrameAction::Joined => {
                            joined = true;
                            let _ = feed_tx.send(status(FeedStatus::Live)).await;
                        }
                        FrameAction::Insert(row) => {
                            let _ = feed_tx
                                .send(FeedMessage::Insert { collection, generation, row })
                                .await;
                        }
                        FrameAction::End(end_status) => {
                            let _ = feed_tx.send(status(end_status)).await;
                            return;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    let _ = feed_tx.send(status(FeedStatus::Closed)).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    log::warn!("Feed socket error for {}: {err}", collection.table());
                    let _ = feed_tx.send(status(FeedStatus::Error)).await;
                    return;
                }
            }
        }
    }
}

fn interpret_frame(collection: Collection, frame: PhoenixFrame) -> FrameAction {
    match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(JOIN_REF) => {
            if frame.payload.get("status").and_then(|s| s.as_str()) == Some("ok") {
                FrameAction::Joined
            } else {
                log::warn!(
                    "Feed join rejected for {}: {}",
                    collection.table(),
                    frame.payload
                );
                FrameAction::End(FeedStatus::Error)
            }
        }
        // Heartbeat acks and other replies.
        "phx_reply" => FrameAction::Ignore,
        "INSERT" => match frame.payload.get("record") {
            Some(record) => match Row::decode(collection, record.clone()) {
                Ok(row) => FrameAction::Insert(row),
                Err(err) => {
                    log::warn!("Dropping malformed {} row: {err}", collection.table());
                    FrameAction::Ignore
                }
            },
            None => FrameAction::Ignore,
        },
        "phx_error" => FrameAction::End(FeedStatus::Error),
        "phx_close" => FrameAction::End(FeedStatus::Closed),
        _ => FrameAction::Ignore,
    }
}

fn channel_topic(collection: Collection, room_id: &str) -> String {
    format!(
        "realtime:public:{}:room_id=eq.{room_id}",
        collection.table()
    )
}

fn websocket_url(config: &BackendConfig) -> String {
    let base = if let Some(rest) = config.url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = config.url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        config.url.clone()
    };
    format!(
        "{base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        urlencoding::encode(&config.anon_key)
    )
}

async fn send_frame<S>(sink: &mut S, frame: &PhoenixFrame) -> Result<(), ()>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(err) => {
            log::error!("Failed to serialize phoenix frame: {err}");
            return Err(());
        }
    };
    sink.send(WsMessage::Text(json.into())).await.map_err(|err| {
        log::warn!("Feed socket write failed: {err}");
    })
}
