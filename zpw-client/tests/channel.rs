use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};
use zpw_client::{
    ChannelConfig, ChannelFault, Client, Config, ConnectionState, DispatchMode, Endpoints, Event,
    EventHandler, EventSink, FixedDelay, FrameIssue, OverflowPolicy, TransportKind,
};
use zpw_crypto::SecretKey;
use zpw_proto::FrameHeader;
use zpw_proto::frame::encode_frame;

// ─── Scripted push server ─────────────────────────────────────────────────────

enum Step {
    Send(Vec<u8>),
    Pause(u64),
    Close,
}

struct PushServer {
    url:      String,
    accepted: Arc<Mutex<Vec<Instant>>>,
    received: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Accept connections on a local port, playing one script per connection.
/// Connections beyond the scripts (or past a script's end) stay open silently.
async fn push_server(scripts: Vec<Vec<Step>>) -> PushServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    let accepted = Arc::new(Mutex::new(Vec::new()));
    let (tx, received) = mpsc::unbounded_channel();

    let log = accepted.clone();
    tokio::spawn(async move {
        let mut scripts = scripts.into_iter();
        while let Ok((tcp, _)) = listener.accept().await {
            log.lock().unwrap().push(Instant::now());
            let script = scripts.next().unwrap_or_default();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else { return };
                let (mut sink, mut stream) = ws.split();
                tokio::spawn(async move {
                    while let Some(Ok(msg)) = stream.next().await {
                        if let WsMessage::Binary(bytes) = msg {
                            let _ = tx.send(bytes);
                        }
                    }
                });
                for step in script {
                    match step {
                        Step::Send(bytes) => { let _ = sink.send(WsMessage::Binary(bytes)).await; }
                        Step::Pause(ms)   => tokio::time::sleep(Duration::from_millis(ms)).await,
                        Step::Close       => { let _ = sink.close().await; return; }
                    }
                }
                std::future::pending::<()>().await;
            });
        }
    });
    PushServer { url, accepted, received }
}

// ─── Frames ───────────────────────────────────────────────────────────────────

fn session_key() -> String {
    SecretKey::from_bytes(vec![0x11u8; 32]).unwrap().to_base64()
}

fn push_key() -> String {
    SecretKey::from_bytes(vec![0x22u8; 16]).unwrap().to_base64()
}

fn hello() -> Step {
    Step::Send(encode_frame(FrameHeader::new(1, 1, 1), &json!({ "key": push_key(), "error_code": 0 })))
}

fn plain(command: u16, payload: Value) -> Step {
    let body = json!({ "data": payload.to_string(), "encrypt": 0 });
    Step::Send(encode_frame(FrameHeader::new(1, command, 0), &body))
}

fn sealed(command: u16, payload: Value) -> Step {
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(payload.to_string().as_bytes()).unwrap();
    let compressed = gz.finish().unwrap();
    let key = SecretKey::from_base64(&push_key()).unwrap();
    let data = zpw_proto::codec::seal_push_payload(&compressed, &key, &[7u8; 16], &[9u8; 16]).unwrap();
    let body = json!({ "data": data, "encrypt": 2 });
    Step::Send(encode_frame(FrameHeader::new(1, command, 0), &body))
}

fn direct(msg_id: &str, text: &str) -> Step {
    plain(501, json!({ "data": { "msgs": [
        { "msgId": msg_id, "uidFrom": "42", "idTo": "0", "content": text, "msgType": "webchat" }
    ] } }))
}

fn raw(command: u16, body: Value) -> Step {
    Step::Send(encode_frame(FrameHeader::new(1, command, 0), &body))
}

fn takeover() -> Step {
    Step::Send(encode_frame(FrameHeader::new(1, 3000, 0), &json!({})))
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn logged_in(endpoints: Endpoints, push: &[&str]) -> Client {
    let client = Client::new(Config { endpoints, ..Config::default() }).unwrap();
    client.session().update(|s| {
        s.cookies.insert("zpw_sek".into(), "abc".into());
        s.secret_key = Some(session_key());
        s.user_id = Some("1000".into());
        s.imei = "device-1".into();
        s.push_endpoints = push.iter().map(|p| p.to_string()).collect();
    });
    client
}

fn fast() -> ChannelConfig {
    ChannelConfig {
        reconnect_policy:       Arc::new(FixedDelay::new(Duration::from_millis(200))),
        resolve_group_messages: false,
        ..ChannelConfig::default()
    }
}

async fn next_event(stream: &mut zpw_client::EventStream) -> Event {
    timeout(Duration::from_secs(5), stream.next()).await.expect("timed out").expect("stream ended")
}

/// Forwards events and records every reported frame issue.
struct Recorder {
    events:     mpsc::UnboundedSender<Event>,
    issues:     Mutex<Vec<String>>,
    listenings: Mutex<u32>,
}

impl Recorder {
    fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events, issues: Mutex::new(Vec::new()), listenings: Mutex::new(0) }, rx)
    }
}

impl EventHandler for Recorder {
    async fn on_event(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn on_listening(&self) {
        *self.listenings.lock().unwrap() += 1;
    }

    fn on_error(&self, issue: FrameIssue<'_>) {
        if let FrameIssue::Malformed(reason) = issue {
            self.issues.lock().unwrap().push(reason.to_owned());
        }
    }
}

fn text_of(event: &Event) -> Option<&str> {
    match event {
        Event::DirectMessage(m) | Event::GroupMessage(m) => m.text(),
        _ => None,
    }
}

// ─── WebSocket ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_then_direct_message() {
    let server = push_server(vec![vec![direct("m0", "too early"), hello(), direct("m1", "xin chào")]]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let (channel, mut events) = client.stream_events(fast()).unwrap();

    let event = next_event(&mut events).await;
    let Event::DirectMessage(msg) = &event else { panic!("unexpected {event:?}") };
    assert_eq!(msg.msg_id, "m1");
    assert_eq!(msg.text(), Some("xin chào"));
    assert_eq!(msg.author_id, "42");
    assert_eq!(msg.thread_id, "42");
    assert_eq!(channel.state(), ConnectionState::Ready);

    channel.stop();
    assert_eq!(channel.join().await, Some(Ok(())));
    assert_eq!(channel.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn encrypted_frames_are_decoded() {
    let payload = json!({ "data": { "reacts": [
        { "msgId": "r1", "uidFrom": "42", "idTo": "0", "content": "{\"rIcon\":\"/-heart\",\"rType\":5}" }
    ] } });
    let server = push_server(vec![vec![hello(), sealed(612, payload)]]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let (channel, mut events) = client.stream_events(fast()).unwrap();

    match next_event(&mut events).await {
        Event::Reaction(r) => assert_eq!(r.icon(), Some("/-heart")),
        other => panic!("unexpected {other:?}"),
    }
    channel.stop();
}

#[tokio::test]
async fn group_control_events() {
    let control = json!({ "data": { "controls": [{ "content": {
        "act_type": "group",
        "act": "join",
        "data": "{\"groupId\":\"g9\",\"updateMembers\":[{\"id\":\"7\"}]}",
    } }] } });
    let server = push_server(vec![vec![hello(), plain(601, control)]]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let (channel, mut events) = client.stream_events(fast()).unwrap();

    match next_event(&mut events).await {
        Event::GroupEvent(e) => {
            assert_eq!(e.kind, zpw_client::GroupEventKind::Join);
            assert_eq!(e.thread_id, "g9");
        }
        other => panic!("unexpected {other:?}"),
    }
    channel.stop();
}

#[tokio::test]
async fn stop_on_idle_channel_is_noop() {
    let client = logged_in(Endpoints::default(), &["ws://127.0.0.1:9/"]);
    let (sink, _events) = EventSink::new();
    let channel = client.push_channel(sink, fast());
    channel.stop();
    channel.stop();
    assert_eq!(channel.state(), ConnectionState::Closed);
    assert_eq!(channel.join().await, None);
}

#[tokio::test]
async fn requires_login() {
    let client = Client::new(Config::default()).unwrap();
    let (sink, _events) = EventSink::new();
    let channel = client.push_channel(sink, fast());
    assert_eq!(channel.connect(), Err(ChannelFault::NotLoggedIn));
    assert_eq!(channel.listen().await, Err(ChannelFault::NotLoggedIn));
    assert_eq!(channel.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn takeover_is_terminal() {
    let server = push_server(vec![vec![hello(), takeover(), direct("m9", "after takeover")]]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let (sink, mut events) = EventSink::new();
    let channel = client.push_channel(sink, fast());

    let result = timeout(Duration::from_secs(5), channel.listen()).await.unwrap();
    assert_eq!(result, Err(ChannelFault::SessionTakeover));
    assert_eq!(channel.state(), ConnectionState::Faulted);
    assert!(!client.is_logged_in());

    assert_eq!(next_event(&mut events).await, Event::SessionTakeover);
    assert!(timeout(Duration::from_millis(200), events.next()).await.is_err());
    // Only one connection was ever made.
    assert_eq!(server.accepted.lock().unwrap().len(), 1);

    channel.stop();
    assert_eq!(channel.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn reconnects_after_close_without_replay() {
    let server = push_server(vec![
        vec![hello(), direct("a", "A"), Step::Pause(50), Step::Close],
        vec![hello(), direct("b", "B")],
    ]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let (channel, mut events) = client.stream_events(fast()).unwrap();

    assert_eq!(text_of(&next_event(&mut events).await), Some("A"));
    assert_eq!(text_of(&next_event(&mut events).await), Some("B"));
    assert!(timeout(Duration::from_millis(200), events.next()).await.is_err());

    let accepted = server.accepted.lock().unwrap().clone();
    assert_eq!(accepted.len(), 2);
    assert!(accepted[1] - accepted[0] >= Duration::from_millis(200));
    channel.stop();
}

#[tokio::test]
async fn bounded_stream_delivers_everything_in_order() {
    let server = push_server(vec![vec![
        hello(),
        direct("b1", "one"),
        direct("b2", "two"),
        direct("b3", "three"),
    ]]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let (channel, mut events) = client.stream_events_bounded(fast(), 1).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    for want in ["one", "two", "three"] {
        assert_eq!(text_of(&next_event(&mut events).await), Some(want));
    }
    channel.stop();
    assert_eq!(channel.join().await, Some(Ok(())));
}

#[tokio::test]
async fn malformed_frames_are_skipped() {
    let server = push_server(vec![vec![
        hello(),
        raw(501, json!({ "data": "bm90IGEgcmVhbCBwYXlsb2Fk", "encrypt": 2 })),
        Step::Send(FrameHeader::new(1, 501, 0).to_bytes().to_vec()),
        raw(501, json!({ "data": "{}", "encrypt": 7 })),
        direct("ok", "still here"),
    ]]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let (recorder, mut events) = Recorder::new();
    let channel = client.push_channel(recorder, fast());
    channel.connect().unwrap();

    let event = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
    assert_eq!(text_of(&event), Some("still here"));
    assert_eq!(channel.state(), ConnectionState::Ready);
    // The bad mode-2 body and the unknown mode are reported; the empty frame is not.
    assert_eq!(channel.handler().issues.lock().unwrap().len(), 2);
    assert_eq!(server.accepted.lock().unwrap().len(), 1);
    channel.stop();
}

#[tokio::test]
async fn handshake_key_does_not_survive_reconnect() {
    let server = push_server(vec![
        vec![hello(), direct("a", "A"), Step::Close],
        vec![direct("stale", "before hello"), hello(), direct("b", "B")],
    ]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let (channel, mut events) = client.stream_events(fast()).unwrap();

    assert_eq!(text_of(&next_event(&mut events).await), Some("A"));
    assert_eq!(text_of(&next_event(&mut events).await), Some("B"));
    assert!(timeout(Duration::from_millis(200), events.next()).await.is_err());
    channel.stop();
}

#[tokio::test]
async fn connect_while_stopping_is_refused_then_allowed() {
    let server = push_server(vec![vec![hello()], vec![hello()]]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let (channel, _events) = client.stream_events(fast()).unwrap();
    let mut state = channel.subscribe_state();
    timeout(Duration::from_secs(5), state.wait_for(|s| *s == ConnectionState::Ready)).await.unwrap().unwrap();

    channel.stop();
    assert_eq!(channel.state(), ConnectionState::Closing);
    assert_eq!(channel.connect(), Err(ChannelFault::Stopping));

    assert_eq!(channel.join().await, Some(Ok(())));
    assert_eq!(channel.state(), ConnectionState::Closed);
    channel.connect().unwrap();
    timeout(Duration::from_secs(5), state.wait_for(|s| *s == ConnectionState::Ready)).await.unwrap().unwrap();
    assert_eq!(server.accepted.lock().unwrap().len(), 2);
    channel.stop();
    assert_eq!(channel.join().await, Some(Ok(())));
}

#[tokio::test]
async fn listen_waits_for_previous_loop() {
    let server = push_server(vec![vec![hello()], vec![hello()]]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let (channel, _events) = client.stream_events(fast()).unwrap();
    let mut state = channel.subscribe_state();
    timeout(Duration::from_secs(5), state.wait_for(|s| *s == ConnectionState::Ready)).await.unwrap().unwrap();

    channel.stop();
    let again = channel.clone();
    let listener = tokio::spawn(async move { again.listen().await });
    timeout(Duration::from_secs(5), async {
        while server.accepted.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }).await.unwrap();
    timeout(Duration::from_secs(5), state.wait_for(|s| *s == ConnectionState::Ready)).await.unwrap().unwrap();

    channel.stop();
    assert_eq!(timeout(Duration::from_secs(5), listener).await.unwrap().unwrap(), Ok(()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_from_another_thread_is_never_lost() {
    let server = push_server(Vec::new()).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);

    for _ in 0..50 {
        let (sink, _events) = EventSink::new();
        let channel = client.push_channel(sink, fast());
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let stopper = {
            let (channel, barrier) = (channel.clone(), barrier.clone());
            std::thread::spawn(move || {
                barrier.wait();
                channel.stop();
            })
        };
        barrier.wait();
        channel.connect().unwrap();
        stopper.join().unwrap();

        // A stop that landed after connect must end the loop on its own.
        if channel.state() != ConnectionState::Closing {
            channel.stop();
        }
        let joined = timeout(Duration::from_secs(2), channel.join()).await;
        assert_eq!(joined.expect("loop ignored stop()"), Some(Ok(())));
        assert_eq!(channel.state(), ConnectionState::Closed);
    }
}

#[tokio::test]
async fn reconnects_exhausted() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let client = logged_in(Endpoints::default(), &[&format!("ws://127.0.0.1:{port}/")]);
    let (sink, _events) = EventSink::new();
    let config = ChannelConfig {
        reconnect_policy: Arc::new(FixedDelay::new(Duration::from_millis(10)).max_attempts(2)),
        ..fast()
    };
    let channel = client.push_channel(sink, config);

    let result = timeout(Duration::from_secs(5), channel.listen()).await.unwrap();
    match result {
        Err(ChannelFault::ReconnectsExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(channel.state(), ConnectionState::Faulted);
    // The session survives a transport failure.
    assert!(client.is_logged_in());
}

#[tokio::test]
async fn keepalive_after_handshake() {
    let mut server = push_server(vec![vec![hello()]]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let config = ChannelConfig { ping_interval: Duration::from_millis(100), ..fast() };
    let (channel, _events) = client.stream_events(config).unwrap();

    let frame = timeout(Duration::from_secs(5), server.received.recv()).await.unwrap().unwrap();
    assert_eq!(&frame[..4], &[1, 2, 0, 1]);
    let body: Value = serde_json::from_slice(&frame[4..]).unwrap();
    assert!(body["eventId"].is_i64());
    channel.stop();
}

#[tokio::test]
async fn no_keepalive_before_handshake() {
    let mut server = push_server(vec![vec![]]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let config = ChannelConfig { ping_interval: Duration::from_millis(50), ..fast() };
    let (channel, _events) = client.stream_events(config).unwrap();

    assert!(timeout(Duration::from_millis(300), server.received.recv()).await.is_err());
    assert_eq!(channel.state(), ConnectionState::AwaitingKey);
    channel.stop();
}

#[tokio::test]
async fn pooled_dispatch_single_worker_keeps_order() {
    let mut script = vec![hello()];
    script.extend((0..20).map(|i| direct(&format!("m{i}"), &i.to_string())));
    let server = push_server(vec![script]).await;
    let client = logged_in(Endpoints::default(), &[&server.url]);
    let config = ChannelConfig {
        dispatch: DispatchMode::Pooled { workers: 1, queue_capacity: 4, overflow: OverflowPolicy::Block },
        ..fast()
    };
    let (channel, mut events) = client.stream_events(config).unwrap();

    for i in 0..20 {
        assert_eq!(text_of(&next_event(&mut events).await), Some(i.to_string().as_str()));
    }
    channel.stop();
}

// ─── Group-message resolution ─────────────────────────────────────────────────

#[tokio::test]
async fn group_messages_resolved_from_recent() {
    let http = MockServer::start().await;
    let stored = json!({ "groupMsgs": [
        { "msgId": "g1", "uidFrom": "42", "idTo": "g100", "content": { "href": "https://f.example/full.jpg" }, "msgType": "chat.photo" }
    ] });
    Mock::given(path("/api/cm/getrecentv2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_code": 0,
            "data": zpw_proto::encode(&stored, &session_key()).unwrap(),
        })))
        .expect(1)
        .mount(&http)
        .await;

    let frame = plain(521, json!({ "data": { "groupMsgs": [
        { "msgId": "g1", "uidFrom": "42", "idTo": "g100", "content": "", "msgType": "chat.photo" }
    ] } }));
    let server = push_server(vec![vec![hello(), frame]]).await;
    let endpoints = Endpoints {
        recent_group_messages: format!("{}/api/cm/getrecentv2", http.uri()),
        ..Endpoints::default()
    };
    let client = logged_in(endpoints, &[&server.url]);
    let config = ChannelConfig { resolve_group_messages: true, ..fast() };
    let (channel, mut events) = client.stream_events(config).unwrap();

    match next_event(&mut events).await {
        Event::GroupMessage(m) => {
            assert_eq!(m.thread_id, "g100");
            assert_eq!(m.content["href"], "https://f.example/full.jpg");
        }
        other => panic!("unexpected {other:?}"),
    }
    channel.stop();
}

#[tokio::test]
async fn group_message_kept_when_lookup_fails() {
    let http = MockServer::start().await;
    Mock::given(path("/api/cm/getrecentv2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error_code": 500, "error_message": "busy" })))
        .mount(&http)
        .await;

    let frame = plain(521, json!({ "data": { "groupMsgs": [
        { "msgId": "g2", "uidFrom": "42", "idTo": "g100", "content": "hello group" }
    ] } }));
    let server = push_server(vec![vec![hello(), frame]]).await;
    let endpoints = Endpoints {
        recent_group_messages: format!("{}/api/cm/getrecentv2", http.uri()),
        ..Endpoints::default()
    };
    let client = logged_in(endpoints, &[&server.url]);
    let config = ChannelConfig { resolve_group_messages: true, ..fast() };
    let (channel, mut events) = client.stream_events(config).unwrap();

    assert_eq!(text_of(&next_event(&mut events).await), Some("hello group"));
    channel.stop();
}

// ─── Polling ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn polling_dedupes_and_skips_stale() {
    let http = MockServer::start().await;
    let now = chrono::Utc::now().timestamp_millis();
    let data = json!({
        "msgs": [
            { "msgId": "p1", "uidFrom": "42", "idTo": "0", "content": "fresh", "ts": (now + 60_000).to_string() },
            { "msgId": "p0", "uidFrom": "42", "idTo": "0", "content": "stale", "ts": (now - 600_000).to_string() },
        ],
        "groupMsgs": [],
    });
    Mock::given(path("/api/preloadconvers/get-last-msgs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_code": 0,
            "data": zpw_proto::encode(&data, &session_key()).unwrap(),
        })))
        .mount(&http)
        .await;

    let endpoints = Endpoints {
        last_messages: format!("{}/api/preloadconvers/get-last-msgs", http.uri()),
        ..Endpoints::default()
    };
    let client = logged_in(endpoints, &[]);
    let config = ChannelConfig { poll_interval: Duration::from_millis(50), ..fast() };
    let (channel, mut events) = client.stream_events(config).unwrap();

    assert_eq!(text_of(&next_event(&mut events).await), Some("fresh"));
    assert!(timeout(Duration::from_millis(300), events.next()).await.is_err());
    assert!(http.received_requests().await.unwrap().len() >= 2);
    channel.stop();
    assert_eq!(channel.join().await, Some(Ok(())));
}

#[tokio::test]
async fn polling_failures_exhaust_reconnects() {
    let http = MockServer::start().await;
    Mock::given(path("/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error_code": 500, "error_message": "busy" })))
        .mount(&http)
        .await;
    let endpoints = Endpoints { last_messages: format!("{}/poll", http.uri()), ..Endpoints::default() };
    let client = logged_in(endpoints, &[]);
    let config = ChannelConfig {
        poll_interval:    Duration::from_millis(10),
        reconnect_policy: Arc::new(FixedDelay::new(Duration::from_millis(10)).max_attempts(2)),
        ..fast()
    };
    let (recorder, _events) = Recorder::new();
    let channel = client.push_channel(recorder, config);

    let result = timeout(Duration::from_secs(5), channel.listen()).await.unwrap();
    match result {
        Err(ChannelFault::ReconnectsExhausted { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("500"), "{last_error}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(channel.state(), ConnectionState::Faulted);
    assert_eq!(*channel.handler().listenings.lock().unwrap(), 0);
    assert_eq!(http.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn explicit_polling_transport_ignores_endpoints() {
    let http = MockServer::start().await;
    Mock::given(path("/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error_code": 0, "data": null })))
        .mount(&http)
        .await;
    let endpoints = Endpoints { last_messages: format!("{}/poll", http.uri()), ..Endpoints::default() };
    let client = logged_in(endpoints, &["ws://127.0.0.1:9/"]);
    let config = ChannelConfig {
        transport:     TransportKind::Polling,
        poll_interval: Duration::from_millis(20),
        ..fast()
    };
    let (channel, _events) = client.stream_events(config).unwrap();

    let mut state = channel.subscribe_state();
    timeout(Duration::from_secs(5), state.wait_for(|s| *s == ConnectionState::Ready)).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    // Empty results count as "nothing new", not as a lost connection.
    assert_eq!(channel.state(), ConnectionState::Ready);
    channel.stop();
}
