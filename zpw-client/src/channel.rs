//! The push channel: a long-lived WebSocket (or polling fallback) that
//! delivers incoming events.
//!
//! Each physical connection walks `Connecting → AwaitingKey → Ready`. The
//! server's first frame (`1/1/1`) carries a per-connection key that decrypts
//! every later frame; it is dropped with the connection, as is the keepalive
//! timer. The session key is never used here except for the RPC calls that
//! resolve group messages and drive polling.

use std::collections::HashSet;
use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use zpw_proto::{Command, PushFrame, decode_push_frame, keepalive_frame};

use crate::Config;
use crate::dispatch::{DispatchMode, Dispatcher, EventHandler, FrameIssue};
use crate::errors::{ChannelFault, Error, LinkError};
use crate::event::{self, Event, Message, ThreadType, id_of};
use crate::reconnect::{FixedDelay, ReconnectContext, ReconnectPolicy};
use crate::rpc::RpcCaller;
use crate::session::SessionStore;

/// `globalMsgId` sent when asking for the latest group messages.
const RECENT_GROUP_CURSOR: i64 = 10_000_000_000_000_000;
/// Messages fetched per recent-group call.
const RECENT_GROUP_COUNT: u32 = 50;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Which transport carries push events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// WebSocket when the session has push endpoints, polling otherwise.
    #[default]
    Auto,
    WebSocket,
    /// Call get-latest-messages on a fixed interval.
    Polling,
}

/// Configuration for a [`PushChannel`].
#[derive(Clone)]
pub struct ChannelConfig {
    pub transport:              TransportKind,
    pub dispatch:               DispatchMode,
    /// Keepalive period once the handshake completes (default: 3 minutes).
    pub ping_interval:          Duration,
    /// Longest silence tolerated before the connection is considered lost.
    pub read_timeout:           Duration,
    pub reconnect_policy:       Arc<dyn ReconnectPolicy>,
    pub poll_interval:          Duration,
    /// The seen-message set is cleared once it grows past this.
    pub seen_capacity:          usize,
    /// Polled messages older than this are skipped.
    pub poll_window:            Duration,
    /// Replace group-message frame entries with the copy from the
    /// recent-group endpoint, which carries full attachment data.
    pub resolve_group_messages: bool,
    /// Deliver frames with unknown commands as [`Event::Unclassified`].
    pub deliver_unclassified:   bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            transport:              TransportKind::Auto,
            dispatch:               DispatchMode::Inline,
            ping_interval:          Duration::from_secs(3 * 60),
            read_timeout:           Duration::from_secs(4 * 60),
            reconnect_policy:       Arc::new(FixedDelay::default()),
            poll_interval:          Duration::from_secs(1),
            seen_capacity:          10_000_000,
            poll_window:            Duration::from_secs(10),
            resolve_group_messages: true,
            deliver_unclassified:   false,
        }
    }
}

// ─── ConnectionState ──────────────────────────────────────────────────────────

/// Lifecycle of the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    /// Socket open, waiting for the handshake frame.
    AwaitingKey,
    Ready,
    /// `stop()` was called; the loop is winding down.
    Closing,
    /// Stopped on a terminal condition. `stop()` or a new `connect()` leaves it.
    Faulted,
}

// ─── PushChannel ──────────────────────────────────────────────────────────────

struct ChannelInner<H: EventHandler> {
    session:  Arc<SessionStore>,
    config:   Arc<Config>,
    rpc:      RpcCaller,
    settings: ChannelConfig,
    handler:  Arc<H>,
    state:    watch::Sender<ConnectionState>,
    cancel:   Mutex<CancellationToken>,
    task:     Mutex<Option<JoinHandle<Result<(), ChannelFault>>>>,
}

/// Handle to a push channel. Cheap to clone; all clones control the same loop.
pub struct PushChannel<H: EventHandler> {
    inner: Arc<ChannelInner<H>>,
}

impl<H: EventHandler> Clone for PushChannel<H> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

/// How one connection ended.
enum End {
    Lost(LinkError),
    Takeover,
}

impl From<LinkError> for End {
    fn from(e: LinkError) -> Self { Self::Lost(e) }
}

/// State scoped to one physical connection.
struct Link {
    key:  Option<String>,
    ping: Option<Interval>,
}

impl<H: EventHandler> PushChannel<H> {
    pub(crate) fn new(
        session:  Arc<SessionStore>,
        config:   Arc<Config>,
        rpc:      RpcCaller,
        settings: ChannelConfig,
        handler:  H,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            inner: Arc::new(ChannelInner {
                session,
                config,
                rpc,
                settings,
                handler: Arc::new(handler),
                state,
                cancel: Mutex::new(CancellationToken::new()),
                task:   Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn handler(&self) -> &H {
        &self.inner.handler
    }

    /// Start the listen loop on a new task and return immediately.
    ///
    /// Does nothing if the loop is already running. Fails with
    /// [`ChannelFault::Stopping`] while a stopped loop is still winding down;
    /// await [`join`](Self::join) first.
    pub fn connect(&self) -> Result<(), ChannelFault> {
        let Some(cancel) = self.begin()? else { return Ok(()) };
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(cancel).await });
        *self.inner.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Run the listen loop on the current task until [`stop`](Self::stop) is
    /// called (`Ok`) or a terminal condition occurs (`Err`).
    ///
    /// If a stopped loop is still winding down, waits for it to finish first.
    pub async fn listen(&self) -> Result<(), ChannelFault> {
        loop {
            match self.begin() {
                Ok(Some(cancel)) => return self.run(cancel).await,
                Ok(None) => return Ok(()),
                Err(ChannelFault::Stopping) => {
                    let mut state = self.subscribe_state();
                    let _ = state.wait_for(|s| *s != ConnectionState::Closing).await;
                }
                Err(fault) => return Err(fault),
            }
        }
    }

    /// Wait for a loop started by [`connect`](Self::connect) to finish.
    pub async fn join(&self) -> Option<Result<(), ChannelFault>> {
        let handle = self.inner.task.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        handle.await.ok()
    }

    /// Ask the loop to exit. Safe to call from any task; a no-op when closed.
    pub fn stop(&self) {
        let cancel = self.inner.cancel.lock().unwrap_or_else(|e| e.into_inner());
        let mut was = ConnectionState::Closed;
        self.inner.state.send_if_modified(|s| {
            was = *s;
            match *s {
                ConnectionState::Closed  => false,
                ConnectionState::Faulted => { *s = ConnectionState::Closed; true }
                _                        => { *s = ConnectionState::Closing; true }
            }
        });
        if was == ConnectionState::Closed {
            tracing::trace!("[zpw-channel] stop() on a closed channel");
            return;
        }
        cancel.cancel();
    }

    // ── Loop ──────────────────────────────────────────────────────────────

    /// Move to `Connecting` and install a fresh cancellation token, unless
    /// a loop is already running.
    ///
    /// The state change and the token swap happen under the same lock as
    /// [`stop`](Self::stop), so a concurrent `stop()` cancels either the old
    /// loop (and this call sees `Closing`) or the new one.
    fn begin(&self) -> Result<Option<CancellationToken>, ChannelFault> {
        if !self.inner.session.is_logged_in() {
            return Err(ChannelFault::NotLoggedIn);
        }
        let mut cancel = self.inner.cancel.lock().unwrap_or_else(|e| e.into_inner());
        let mut was = ConnectionState::Closed;
        let started = self.inner.state.send_if_modified(|s| {
            was = *s;
            match *s {
                ConnectionState::Closed | ConnectionState::Faulted => {
                    *s = ConnectionState::Connecting;
                    true
                }
                _ => false,
            }
        });
        if !started {
            if was == ConnectionState::Closing {
                return Err(ChannelFault::Stopping);
            }
            tracing::debug!("[zpw-channel] already running");
            return Ok(None);
        }
        *cancel = CancellationToken::new();
        Ok(Some(cancel.clone()))
    }

    /// Once `Closing`, only `Closed` may follow.
    fn set_state(&self, next: ConnectionState) {
        self.inner.state.send_if_modified(|s| {
            if *s == next || (*s == ConnectionState::Closing && next != ConnectionState::Closed) {
                return false;
            }
            *s = next;
            true
        });
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), ChannelFault> {
        let inner = &self.inner;
        let dispatcher = Dispatcher::new(inner.settings.dispatch, inner.handler.clone(), cancel.child_token());
        let mut seen = SeenSet::new(inner.settings.seen_capacity);
        let mut fail_count = 0u32;
        let mut slept = Duration::ZERO;

        let outcome = loop {
            self.set_state(ConnectionState::Connecting);
            let mut reached_ready = false;
            let end = match self.transport() {
                TransportKind::Polling => {
                    self.run_polling(&cancel, &dispatcher, &mut seen, &mut reached_ready).await
                }
                _ => self.run_socket(&cancel, &dispatcher, &mut reached_ready).await,
            };
            let error = match end {
                Ok(()) => break Ok(()),
                Err(End::Takeover) => break Err(ChannelFault::SessionTakeover),
                Err(End::Lost(_)) if cancel.is_cancelled() => break Ok(()),
                Err(End::Lost(e)) => e,
            };

            tracing::warn!("[zpw-channel] connection lost: {error}");
            inner.handler.on_error(FrameIssue::Link(&error));
            if reached_ready {
                fail_count = 0;
                slept = Duration::ZERO;
            }
            fail_count += 1;
            let ctx = ReconnectContext {
                fail_count:   NonZeroU32::new(fail_count).unwrap_or(NonZeroU32::MIN),
                slept_so_far: slept,
                error,
            };
            match inner.settings.reconnect_policy.should_reconnect(&ctx) {
                ControlFlow::Continue(delay) => {
                    slept += delay;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => break Ok(()),
                    }
                }
                ControlFlow::Break(()) => {
                    break Err(ChannelFault::ReconnectsExhausted {
                        attempts:   fail_count,
                        last_error: ctx.error.to_string(),
                    });
                }
            }
        };

        dispatcher.shutdown();
        match &outcome {
            Ok(()) => {
                self.set_state(ConnectionState::Closed);
                tracing::info!("[zpw-channel] stopped");
            }
            Err(fault) => {
                tracing::error!("[zpw-channel] {fault}");
                if *fault == ChannelFault::SessionTakeover {
                    inner.session.invalidate();
                }
                inner.state.send_replace(ConnectionState::Faulted);
                if *fault == ChannelFault::SessionTakeover {
                    inner.handler.on_event(Event::SessionTakeover).await;
                }
                inner.handler.on_fault(fault);
            }
        }
        outcome
    }

    fn transport(&self) -> TransportKind {
        match self.inner.settings.transport {
            TransportKind::Auto if self.inner.session.push_endpoints().is_empty() => TransportKind::Polling,
            TransportKind::Auto => TransportKind::WebSocket,
            other => other,
        }
    }

    // ── WebSocket ─────────────────────────────────────────────────────────

    fn ws_request(&self, endpoint: &str) -> Result<tungstenite::handshake::client::Request, LinkError> {
        let config = &self.inner.config;
        let mut url = reqwest::Url::parse(endpoint).map_err(|_| LinkError::NoEndpoint)?;
        url.query_pairs_mut()
            .append_pair("zpw_ver", &config.api_version.to_string())
            .append_pair("zpw_type", &config.api_type.to_string())
            .append_pair("t", &now_ms().to_string());

        let mut request = url.as_str().into_client_request()?;
        let header = |v: &str| {
            HeaderValue::from_str(v).map_err(|e| LinkError::from(tungstenite::Error::HttpFormat(e.into())))
        };
        let headers = request.headers_mut();
        headers.insert("Origin", header(&config.endpoints.origin)?);
        headers.insert("User-Agent", header(&config.user_agent)?);
        headers.insert("Cookie", header(&self.inner.session.cookie_header())?);
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
        headers.insert("Pragma", HeaderValue::from_static("no-cache"));
        Ok(request)
    }

    async fn run_socket(
        &self,
        cancel:        &CancellationToken,
        dispatcher:    &Dispatcher<H>,
        reached_ready: &mut bool,
    ) -> Result<(), End> {
        let endpoint = self
            .inner
            .session
            .push_endpoints()
            .into_iter()
            .next()
            .ok_or(LinkError::NoEndpoint)?;
        let request = self.ws_request(&endpoint)?;

        tracing::info!("[zpw-channel] connecting to {endpoint}");
        let (ws, _) = tokio::select! {
            r = tokio_tungstenite::connect_async(request) => r.map_err(LinkError::from)?,
            _ = cancel.cancelled() => return Ok(()),
        };
        self.set_state(ConnectionState::AwaitingKey);

        let (mut sink, mut stream) = ws.split();
        let mut link = Link { key: None, ping: None };
        let read_timeout = self.inner.settings.read_timeout;

        let result = loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = next_tick(&mut link.ping) => {
                    if let Err(e) = sink.send(WsMessage::Binary(keepalive_frame(now_ms()))).await {
                        break Err(End::Lost(e.into()));
                    }
                    tracing::trace!("[zpw-channel] keepalive sent");
                    continue;
                }
                read = tokio::time::timeout(read_timeout, stream.next()) => read,
            };
            match read {
                Err(_)                   => break Err(End::Lost(LinkError::Timeout)),
                Ok(None)                 => break Err(End::Lost(LinkError::Closed)),
                Ok(Some(Err(e)))         => break Err(End::Lost(e.into())),
                Ok(Some(Ok(WsMessage::Close(_)))) => break Err(End::Lost(LinkError::Closed)),
                Ok(Some(Ok(WsMessage::Binary(bytes)))) => {
                    if let Err(end) = self.on_frame(&bytes, &mut link, dispatcher, reached_ready).await {
                        break Err(end);
                    }
                }
                Ok(Some(Ok(_))) => {}
            }
        };

        // The handshake key and keepalive belong to this connection only.
        drop(link);
        let _ = sink.close().await;
        result
    }

    async fn on_frame(
        &self,
        bytes:         &[u8],
        link:          &mut Link,
        dispatcher:    &Dispatcher<H>,
        reached_ready: &mut bool,
    ) -> Result<(), End> {
        let frame = match PushFrame::decode(bytes) {
            Ok(f) => f,
            Err(e) => {
                self.malformed(&e.to_string());
                return Ok(());
            }
        };
        if frame.is_empty() {
            tracing::trace!("[zpw-channel] empty frame {}", frame.header);
            return Ok(());
        }
        if frame.is_keepalive_echo() {
            tracing::trace!("[zpw-channel] keepalive echo");
            return Ok(());
        }

        let command = Command::classify(frame.header);
        if command == Command::Handshake {
            if let Some(key) = frame.handshake_key() {
                let period = self.inner.settings.ping_interval;
                let mut ping = tokio::time::interval_at(Instant::now() + period, period);
                ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
                link.key = Some(key.to_owned());
                link.ping = Some(ping);
                *reached_ready = true;
                self.set_state(ConnectionState::Ready);
                tracing::info!("[zpw-channel] handshake complete, listening");
                self.inner.handler.on_listening();
            }
            return Ok(());
        }

        let Some(key) = link.key.as_deref() else {
            tracing::warn!("[zpw-channel] frame {} before handshake, dropped", frame.header);
            return Ok(());
        };

        match command {
            Command::Takeover => {
                tracing::warn!("[zpw-channel] another connection is opened, closing this one");
                return Err(End::Takeover);
            }
            Command::Keepalive | Command::Delivered | Command::Seen | Command::Typing => {
                tracing::trace!("[zpw-channel] ignoring {command:?} frame {}", frame.header);
                return Ok(());
            }
            Command::Other => {
                if self.inner.settings.deliver_unclassified {
                    dispatcher.dispatch(Event::Unclassified { header: frame.header, body: frame.body }).await;
                } else {
                    tracing::debug!("[zpw-channel] unclassified frame {}, dropped", frame.header);
                }
                return Ok(());
            }
            _ => {}
        }

        let envelope = match frame.envelope() {
            Ok(env) => env,
            Err(e) => {
                self.malformed(&e.to_string());
                return Ok(());
            }
        };
        let payload = match decode_push_frame(&envelope, key) {
            Ok(Some(v)) => v,
            Ok(None) => {
                tracing::debug!("[zpw-channel] empty payload in {}", frame.header);
                return Ok(());
            }
            Err(e) => {
                self.malformed(&format!("{}: {e}", frame.header));
                return Ok(());
            }
        };
        self.deliver(command, payload, dispatcher).await;
        Ok(())
    }

    fn malformed(&self, reason: &str) {
        tracing::warn!("[zpw-channel] dropped malformed frame: {reason}");
        self.inner.handler.on_error(FrameIssue::Malformed(reason));
    }

    async fn deliver(&self, command: Command, mut payload: Value, dispatcher: &Dispatcher<H>) {
        if command == Command::GroupMessages && self.inner.settings.resolve_group_messages {
            self.resolve_group_messages(&mut payload).await;
        }
        let own = self.inner.session.user_id();
        for event in event::route(command, &payload, own.as_deref()) {
            dispatcher.dispatch(event).await;
        }
    }

    // ── Group-message resolution ──────────────────────────────────────────

    /// Swap each frame entry for the server's stored copy of the same
    /// message, keeping the frame entry when the lookup fails.
    async fn resolve_group_messages(&self, payload: &mut Value) {
        let Some(list) = payload.pointer_mut("/data/groupMsgs").and_then(Value::as_array_mut) else {
            return;
        };
        for entry in list.iter_mut() {
            let (Some(group), Some(msg_id)) = (id_of(entry, "idTo"), id_of(entry, "msgId")) else {
                continue;
            };
            match self.recent_group_messages(&group).await {
                Ok(recent) => {
                    let found = event::entries(&recent, "groupMsgs")
                        .iter()
                        .find(|m| id_of(m, "msgId").as_deref() == Some(msg_id.as_str()));
                    if let Some(found) = found {
                        *entry = found.clone();
                    }
                }
                Err(e) => {
                    tracing::debug!("[zpw-channel] recent messages for {group} unavailable ({e}), using frame data");
                }
            }
        }
    }

    async fn recent_group_messages(&self, group_id: &str) -> Result<Value, Error> {
        self.inner
            .rpc
            .get(&self.inner.config.endpoints.recent_group_messages)
            .params(json!({
                "groupId":     group_id,
                "globalMsgId": RECENT_GROUP_CURSOR,
                "count":       RECENT_GROUP_COUNT,
                "msgIds":      [],
                "imei":        self.inner.session.imei(),
                "src":         1,
            }))
            .query("nretry", 0)
            .send()
            .await
    }

    // ── Polling ───────────────────────────────────────────────────────────

    async fn run_polling(
        &self,
        cancel:        &CancellationToken,
        dispatcher:    &Dispatcher<H>,
        seen:          &mut SeenSet,
        reached_ready: &mut bool,
    ) -> Result<(), End> {
        let settings = &self.inner.settings;
        let mut ticker = tokio::time::interval(settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => return Ok(()),
            }
            let result = tokio::select! {
                r = self.last_messages() => r,
                _ = cancel.cancelled() => return Ok(()),
            };
            let data = match result {
                Ok(data) => Some(data),
                Err(Error::Remote(e)) if e.is_empty_result() => None,
                Err(e) => return Err(End::Lost(LinkError::Rpc(e))),
            };
            // Ready only once the server has answered a poll.
            if !*reached_ready {
                *reached_ready = true;
                self.set_state(ConnectionState::Ready);
                tracing::info!("[zpw-channel] polling every {:?}", settings.poll_interval);
                self.inner.handler.on_listening();
            }
            let Some(data) = data else { continue };

            let cutoff = now_ms() - settings.poll_window.as_millis() as i64;
            let own = self.inner.session.user_id();
            for (key, kind) in [("msgs", ThreadType::User), ("groupMsgs", ThreadType::Group)] {
                for entry in event::entries(&data, key) {
                    let Some(msg) = Message::from_entry(entry, kind, own.as_deref()) else { continue };
                    if msg.timestamp().is_some_and(|ts| ts < cutoff) || !seen.insert(&msg.msg_id) {
                        continue;
                    }
                    let event = match kind {
                        ThreadType::User  => Event::DirectMessage(msg),
                        ThreadType::Group => Event::GroupMessage(msg),
                    };
                    dispatcher.dispatch(event).await;
                }
            }
        }
    }

    async fn last_messages(&self) -> Result<Value, Error> {
        self.inner
            .rpc
            .get(&self.inner.config.endpoints.last_messages)
            .params(json!({
                "threadIdLocalMsgId": "{}",
                "imei":               self.inner.session.imei(),
            }))
            .send()
            .await
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

async fn next_tick(ping: &mut Option<Interval>) {
    match ping {
        Some(i) => { i.tick().await; }
        None    => std::future::pending().await,
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Message ids already delivered by the polling transport.
struct SeenSet {
    ids:      HashSet<String>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self { ids: HashSet::new(), capacity: capacity.max(1) }
    }

    /// `false` if `id` was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.ids.len() >= self.capacity {
            self.ids.clear();
        }
        self.ids.insert(id.to_owned())
    }
}
