use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;

use super::*;
use crate::types::MessageId;

fn phx(topic: &str, event: &str, payload: Value) -> PhxMessage {
    PhxMessage { topic: topic.to_owned(), event: event.to_owned(), payload, msg_ref: None }
}

// =============================================================================
// realtime_url / topic
// =============================================================================

#[test]
fn realtime_url_maps_https_to_wss() {
    let url = realtime_url("https://demo.supabase.co", "anon").unwrap();
    assert_eq!(url, "wss://demo.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0");
}

#[test]
fn realtime_url_maps_http_to_ws() {
    let url = realtime_url("http://127.0.0.1:54321/", "anon").unwrap();
    assert_eq!(url, "ws://127.0.0.1:54321/realtime/v1/websocket?apikey=anon&vsn=1.0.0");
}

#[test]
fn realtime_url_encodes_api_key() {
    let url = realtime_url("https://demo.supabase.co", "a+b&c=d e").unwrap();
    assert_eq!(url, "wss://demo.supabase.co/realtime/v1/websocket?apikey=a%2Bb%26c%3Dd+e&vsn=1.0.0");
    let parsed = Url::parse(&url).unwrap();
    let key = parsed.query_pairs().find(|(k, _)| k == "apikey").map(|(_, v)| v.into_owned());
    assert_eq!(key.as_deref(), Some("a+b&c=d e"));
}

#[test]
fn realtime_url_rejects_other_schemes() {
    assert!(matches!(realtime_url("ftp://demo", "anon"), Err(ConfigError::InvalidUrl(_))));
}

#[test]
fn topic_names_schema_and_table() {
    assert_eq!(topic("public", "messages"), "realtime:public:messages");
}

// =============================================================================
// outbound frames
// =============================================================================

#[test]
fn join_message_requests_insert_and_delete_changes() {
    let msg = join_message("realtime:public:messages", "public", "messages", "anon");
    assert_eq!(msg.event, "phx_join");
    assert_eq!(msg.msg_ref.as_deref(), Some("1"));

    let changes = msg.payload.pointer("/config/postgres_changes").unwrap().as_array().unwrap();
    let events: Vec<&str> = changes.iter().filter_map(|c| c.get("event")?.as_str()).collect();
    assert_eq!(events, vec!["INSERT", "DELETE"]);
    assert_eq!(changes[0].get("table").and_then(Value::as_str), Some("messages"));
    assert_eq!(msg.payload.get("access_token").and_then(Value::as_str), Some("anon"));
}

#[test]
fn heartbeat_uses_phoenix_topic() {
    let msg = heartbeat_message("7");
    assert_eq!(msg.topic, HEARTBEAT_TOPIC);
    assert_eq!(msg.event, "heartbeat");
    assert_eq!(msg.msg_ref.as_deref(), Some("7"));
}

#[test]
fn ref_field_serializes_as_ref() {
    let json = serde_json::to_value(leave_message("t", "3")).unwrap();
    assert_eq!(json.get("ref").and_then(Value::as_str), Some("3"));
    assert_eq!(json.get("event").and_then(Value::as_str), Some("phx_leave"));
}

// =============================================================================
// parse_change
// =============================================================================

#[test]
fn parse_change_reads_postgres_changes_insert() {
    let msg = phx(
        "realtime:public:messages",
        "postgres_changes",
        json!({"data": {"type": "INSERT", "record": {"id": 1, "user": "alice", "text": "hi", "created_at": "t"}}}),
    );
    let Some(ChangeEvent::Insert(row)) = parse_change(&msg) else {
        panic!("expected insert");
    };
    assert_eq!(row.id, MessageId::Int(1));
    assert_eq!(row.user.as_deref(), Some("alice"));
}

#[test]
fn parse_change_reads_postgres_changes_delete() {
    let msg = phx(
        "realtime:public:messages",
        "postgres_changes",
        json!({"data": {"type": "DELETE", "old_record": {"id": 1}}}),
    );
    assert_eq!(parse_change(&msg), Some(ChangeEvent::Delete));
}

#[test]
fn parse_change_reads_legacy_event_shape() {
    let insert = phx("realtime:public:messages", "INSERT", json!({"type": "INSERT", "record": {"id": "a"}}));
    let delete = phx("realtime:public:messages", "DELETE", json!({"type": "DELETE"}));
    assert!(matches!(parse_change(&insert), Some(ChangeEvent::Insert(_))));
    assert_eq!(parse_change(&delete), Some(ChangeEvent::Delete));
}

#[test]
fn parse_change_ignores_other_events_and_bad_records() {
    assert!(parse_change(&phx("realtime:public:messages", "presence_state", json!({}))).is_none());
    let update = phx("t", "postgres_changes", json!({"data": {"type": "UPDATE", "record": {"id": 1}}}));
    assert!(parse_change(&update).is_none());
    let no_id = phx("t", "postgres_changes", json!({"data": {"type": "INSERT", "record": {"text": "x"}}}));
    assert!(parse_change(&no_id).is_none());
}

// =============================================================================
// join_reply
// =============================================================================

#[test]
fn join_reply_ok_and_error() {
    let mut ok = phx("realtime:public:messages", "phx_reply", json!({"status": "ok", "response": {}}));
    ok.msg_ref = Some("1".into());
    assert_eq!(join_reply(&ok, "realtime:public:messages"), Some(Ok(())));

    let mut err = phx(
        "realtime:public:messages",
        "phx_reply",
        json!({"status": "error", "response": {"reason": "unmatched topic"}}),
    );
    err.msg_ref = Some("1".into());
    assert_eq!(join_reply(&err, "realtime:public:messages"), Some(Err("unmatched topic".into())));
}

#[test]
fn join_reply_ignores_heartbeat_replies() {
    let mut beat = phx(HEARTBEAT_TOPIC, "phx_reply", json!({"status": "ok"}));
    beat.msg_ref = Some("2".into());
    assert!(join_reply(&beat, "realtime:public:messages").is_none());
}

// =============================================================================
// handle_text
// =============================================================================

const TOPIC: &str = "realtime:public:messages";

fn insert_frame(id: i64) -> String {
    json!({
        "topic": TOPIC,
        "event": "postgres_changes",
        "payload": {"data": {"type": "INSERT", "record": {"id": id, "user": "bob", "text": "yo"}}},
        "ref": null
    })
    .to_string()
}

#[test]
fn handle_text_forwards_changes_while_subscribed() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_keep, mut shutdown) = oneshot::channel::<()>();

    assert!(handle_text(&insert_frame(1), TOPIC, &tx, &mut shutdown));
    let Ok(ChangeEvent::Insert(row)) = rx.try_recv() else {
        panic!("expected insert");
    };
    assert_eq!(row.id, MessageId::Int(1));
}

#[test]
fn handle_text_drops_changes_after_release() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (release, mut shutdown) = oneshot::channel::<()>();
    Subscription::new(release).dispose();

    assert!(!handle_text(&insert_frame(1), TOPIC, &tx, &mut shutdown));
    assert!(rx.try_recv().is_err());
}

#[test]
fn handle_text_ignores_frames_for_other_topics() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_keep, mut shutdown) = oneshot::channel::<()>();
    let other = insert_frame(1).replace(TOPIC, "realtime:public:other");

    assert!(handle_text(&other, TOPIC, &tx, &mut shutdown));
    assert!(handle_text("not json", TOPIC, &tx, &mut shutdown));
    assert!(rx.try_recv().is_err());
}

// =============================================================================
// subscribe against a local websocket server
// =============================================================================

async fn next_phx(ws: &mut WebSocketStream<TcpStream>) -> PhxMessage {
    loop {
        match ws.next().await.expect("socket ended").expect("socket error") {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("phx frame"),
            Message::Close(_) => panic!("socket closed early"),
            _ => {}
        }
    }
}

async fn send_phx(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn subscribe_forwards_changes_and_leaves_on_dispose() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let join = next_phx(&mut ws).await;

        let topic = "realtime:public:messages";
        send_phx(&mut ws, json!({"topic": topic, "event": "phx_reply", "payload": {"status": "ok"}, "ref": "1"})).await;
        send_phx(
            &mut ws,
            json!({"topic": topic, "event": "postgres_changes", "ref": null,
                   "payload": {"data": {"type": "INSERT", "record": {"id": 9, "user": "bob", "text": "yo"}}}}),
        )
        .await;
        send_phx(
            &mut ws,
            json!({"topic": topic, "event": "postgres_changes", "ref": null,
                   "payload": {"data": {"type": "DELETE", "old_record": {"id": 9}}}}),
        )
        .await;

        let leave = next_phx(&mut ws).await;
        (join, leave)
    });

    let config = ChatConfig::new(&format!("http://{addr}"), "anon").unwrap();
    let channel = RealtimeChannel::new(&config).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = channel.subscribe(tx).await.unwrap();

    let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    let ChangeEvent::Insert(row) = first else {
        panic!("expected insert first");
    };
    assert_eq!(row.id, MessageId::Int(9));
    let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(second, ChangeEvent::Delete);

    sub.dispose();
    let (join, leave) = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
    assert_eq!(join.event, "phx_join");
    assert_eq!(join.topic, "realtime:public:messages");
    assert_eq!(leave.event, "phx_leave");
    assert_eq!(leave.topic, "realtime:public:messages");
}

#[tokio::test]
async fn subscribe_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ChatConfig::new(&format!("http://{addr}"), "anon").unwrap();
    let channel = RealtimeChannel::new(&config).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(channel.subscribe(tx).await.is_err());
}
