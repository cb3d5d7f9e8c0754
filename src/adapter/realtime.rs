//! Change feed over the service's realtime websocket.
//!
//! PROTOCOL
//! ========
//! Phoenix-channel JSON frames (`vsn=1.0.0`): `{topic, event, payload, ref}`.
//! The client joins `realtime:{schema}:{table}` asking for `INSERT` and
//! `DELETE` postgres changes, sends a heartbeat on topic `phoenix` at a fixed
//! interval, and sends `phx_leave` when the subscription is disposed.
//!
//! Each change is forwarded only while the subscription handle is live.
//! Events already queued on the consumer's channel when the handle is
//! disposed can still be received; the session drops them through its own
//! liveness check.
//!
//! ERROR HANDLING
//! ==============
//! Failures after the join is sent (rejected join, socket error, server
//! close) end the feed and are logged. There is no reconnect; a new session
//! must subscribe again.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::{ChangeEvent, ChangeSender, RemoteError, Subscription};
use crate::config::{ChatConfig, ConfigError};

pub const PROTOCOL_VSN: &str = "1.0.0";
pub const HEARTBEAT_TOPIC: &str = "phoenix";
const JOIN_REF: &str = "1";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// WIRE FORMAT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhxMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
}

impl PhxMessage {
    fn new(topic: &str, event: &str, payload: Value, msg_ref: &str) -> Self {
        Self { topic: topic.to_owned(), event: event.to_owned(), payload, msg_ref: Some(msg_ref.to_owned()) }
    }
}

/// Channel topic for one table.
#[must_use]
pub fn topic(schema: &str, table: &str) -> String {
    format!("realtime:{schema}:{table}")
}

/// Websocket endpoint derived from the service URL.
///
/// # Errors
///
/// Returns an error if `base_url` is not http(s).
pub fn realtime_url(base_url: &str, api_key: &str) -> Result<String, ConfigError> {
    let base_url = base_url.trim_end_matches('/');
    let (scheme, rest) = if let Some(rest) = base_url.strip_prefix("http://") {
        ("ws", rest)
    } else if let Some(rest) = base_url.strip_prefix("https://") {
        ("wss", rest)
    } else {
        return Err(ConfigError::InvalidUrl(base_url.to_owned()));
    };

    let mut url = Url::parse(&format!("{scheme}://{rest}/realtime/v1/websocket"))
        .map_err(|_| ConfigError::InvalidUrl(base_url.to_owned()))?;
    url.query_pairs_mut().append_pair("apikey", api_key).append_pair("vsn", PROTOCOL_VSN);
    Ok(url.into())
}

#[must_use]
pub fn join_message(topic: &str, schema: &str, table: &str, api_key: &str) -> PhxMessage {
    let payload = json!({
        "config": {
            "broadcast": { "ack": false, "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "INSERT", "schema": schema, "table": table },
                { "event": "DELETE", "schema": schema, "table": table }
            ],
            "private": false
        },
        "access_token": api_key
    });
    PhxMessage::new(topic, "phx_join", payload, JOIN_REF)
}

#[must_use]
pub fn heartbeat_message(msg_ref: &str) -> PhxMessage {
    PhxMessage::new(HEARTBEAT_TOPIC, "heartbeat", json!({}), msg_ref)
}

#[must_use]
pub fn leave_message(topic: &str, msg_ref: &str) -> PhxMessage {
    PhxMessage::new(topic, "phx_leave", json!({}), msg_ref)
}

/// Decode a row change. Accepts the `postgres_changes` envelope and the
/// older per-event (`INSERT`/`DELETE`) shape.
#[must_use]
pub fn parse_change(msg: &PhxMessage) -> Option<ChangeEvent> {
    let change = match msg.event.as_str() {
        "postgres_changes" => msg.payload.get("data")?,
        "INSERT" | "DELETE" => &msg.payload,
        _ => return None,
    };
    let kind = change
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(msg.event.as_str());

    match kind {
        "INSERT" => {
            let record = change.get("record")?;
            serde_json::from_value(record.clone()).ok().map(ChangeEvent::Insert)
        }
        "DELETE" => Some(ChangeEvent::Delete),
        _ => None,
    }
}

/// Outcome of our join, if `msg` is the reply to it.
#[must_use]
pub fn join_reply(msg: &PhxMessage, topic: &str) -> Option<Result<(), String>> {
    if msg.event != "phx_reply" || msg.topic != topic || msg.msg_ref.as_deref() != Some(JOIN_REF) {
        return None;
    }
    match msg.payload.get("status").and_then(Value::as_str) {
        Some("ok") => Some(Ok(())),
        _ => {
            let reason = msg
                .payload
                .pointer("/response/reason")
                .and_then(Value::as_str)
                .map_or_else(|| msg.payload.to_string(), ToOwned::to_owned);
            Some(Err(reason))
        }
    }
}

fn text_frame(msg: &PhxMessage) -> Result<Message, RemoteError> {
    let encoded = serde_json::to_string(msg).map_err(|e| RemoteError::Unavailable(e.to_string()))?;
    Ok(Message::Text(encoded.into()))
}

// =============================================================================
// CHANNEL
// =============================================================================

#[derive(Debug, Clone)]
pub struct RealtimeChannel {
    socket_url: String,
    topic: String,
    schema: String,
    table: String,
    api_key: String,
    heartbeat: Duration,
    connect_timeout: Duration,
}

impl RealtimeChannel {
    /// # Errors
    ///
    /// Returns an error if the service URL is not http(s).
    pub fn new(config: &ChatConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            socket_url: realtime_url(&config.url, &config.api_key)?,
            topic: topic(&config.schema, &config.table),
            schema: config.schema.clone(),
            table: config.table.clone(),
            api_key: config.api_key.clone(),
            heartbeat: Duration::from_secs(config.heartbeat_secs.max(1)),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }

    /// Connect, send the join, and spawn the feed task.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened in time or the join
    /// cannot be written.
    pub async fn subscribe(&self, events: ChangeSender) -> Result<Subscription, RemoteError> {
        let (mut stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(self.socket_url.as_str()))
            .await
            .map_err(|_| RemoteError::Unavailable("realtime connect timed out".to_owned()))?
            .map_err(|error| RemoteError::Socket(Box::new(error)))?;

        let join = join_message(&self.topic, &self.schema, &self.table, &self.api_key);
        stream
            .send(text_frame(&join)?)
            .await
            .map_err(|error| RemoteError::Socket(Box::new(error)))?;
        info!(topic = %self.topic, "realtime join sent");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(run_channel(stream, events, shutdown_rx, self.topic.clone(), self.heartbeat));
        Ok(Subscription::new(shutdown_tx))
    }
}

async fn run_channel(
    stream: Socket,
    events: ChangeSender,
    mut shutdown: oneshot::Receiver<()>,
    topic: String,
    heartbeat: Duration,
) {
    let (mut write, mut read) = stream.split();
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut next_ref: u64 = 1;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                next_ref += 1;
                if let Ok(leave) = text_frame(&leave_message(&topic, &next_ref.to_string())) {
                    let _ = write.send(leave).await;
                }
                let _ = write.close().await;
                info!(%topic, "realtime subscription released");
                break;
            }
            _ = ticker.tick() => {
                next_ref += 1;
                let Ok(beat) = text_frame(&heartbeat_message(&next_ref.to_string())) else {
                    continue;
                };
                if let Err(error) = write.send(beat).await {
                    warn!(%error, %topic, "realtime heartbeat failed");
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !handle_text(text.as_str(), &topic, &events, &mut shutdown) {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(%topic, "realtime socket closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(%error, %topic, "realtime socket error");
                    break;
                }
            }
        }
    }
}

/// Returns `false` once the feed should stop.
fn handle_text(text: &str, topic: &str, events: &ChangeSender, shutdown: &mut oneshot::Receiver<()>) -> bool {
    let msg = match serde_json::from_str::<PhxMessage>(text) {
        Ok(msg) => msg,
        Err(error) => {
            debug!(%error, "ignoring undecodable realtime frame");
            return true;
        }
    };

    if let Some(reply) = join_reply(&msg, topic) {
        match reply {
            Ok(()) => info!(%topic, "realtime channel joined"),
            Err(reason) => warn!(%topic, %reason, "realtime join rejected"),
        }
        return true;
    }

    if msg.topic != topic {
        return true;
    }

    if matches!(msg.event.as_str(), "phx_error" | "phx_close") {
        warn!(%topic, event = %msg.event, "realtime channel closed by server");
        return false;
    }

    match parse_change(&msg) {
        Some(event) => forward(event, events, shutdown),
        None => true,
    }
}

/// Hand `event` to the consumer unless the subscription was released.
fn forward(event: ChangeEvent, events: &ChangeSender, shutdown: &mut oneshot::Receiver<()>) -> bool {
    if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
        debug!("subscription released; dropping change");
        return false;
    }
    events.send(event).is_ok()
}

#[cfg(test)]
#[path = "realtime_test.rs"]
mod tests;
