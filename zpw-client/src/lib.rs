//! # zpw-client
//!
//! Async client for the Zalo Web protocol.
//!
//! ## Features
//! - Cookie login with secret-key retrieval, and session restore
//! - Encrypted RPC primitive with double-wrapped result unwrapping
//! - Push channel over WebSocket with in-band key handshake, keepalive and
//!   reconnect, falling back to polling when no push endpoint is known
//! - Typed events: direct and group messages, group control events, reactions,
//!   session takeover
//! - Inline or bounded worker-pool dispatch
//! - Pluggable session persistence

#![deny(unsafe_code)]

mod errors;
pub mod channel;
pub mod dispatch;
pub mod event;
pub mod reconnect;
pub mod rpc;
pub mod session;
pub mod session_backend;

pub use channel::{ChannelConfig, ConnectionState, PushChannel, TransportKind};
pub use dispatch::{DispatchMode, EventHandler, EventSink, EventStream, FrameIssue, OverflowPolicy};
pub use errors::{ChannelFault, EMPTY_RESULT_CODE, Error, LinkError, LoginError, RemoteError};
pub use event::{Event, Fields, GroupEvent, GroupEventKind, Message, Reaction, ThreadType};
pub use reconnect::{FixedDelay, NoReconnect, ReconnectContext, ReconnectPolicy};
pub use rpc::{FilePart, Method, RpcCaller, RpcRequest};
pub use session::{Cookies, Session, SessionStore};
pub use session_backend::{InMemoryBackend, JsonFileBackend, SessionBackend};

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

// ─── Endpoints ────────────────────────────────────────────────────────────────

/// Server URLs used outside of endpoint-specific RPC calls.
#[derive(Clone, Debug)]
pub struct Endpoints {
    /// `getLoginInfo`: exchanges cookies for the secret key and push endpoints.
    pub login:                 String,
    /// `getrecentv2`: latest messages of one group.
    pub recent_group_messages: String,
    /// `get-last-msgs`: drives the polling transport.
    pub last_messages:         String,
    pub origin:                String,
    pub referer:               String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login:                 "https://wpa.chat.zalo.me/api/login/getLoginInfo".into(),
            recent_group_messages: "https://tt-group-cm.chat.zalo.me/api/cm/getrecentv2".into(),
            last_messages:         "https://tt-convers-wpa.chat.zalo.me/api/preloadconvers/get-last-msgs".into(),
            origin:                "https://chat.zalo.me".into(),
            referer:               "https://chat.zalo.me/".into(),
        }
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for [`Client::new`].
#[derive(Clone)]
pub struct Config {
    pub user_agent:      String,
    /// `zpw_ver` sent with every request.
    pub api_version:     u32,
    /// `zpw_type` sent with every request.
    pub api_type:        u32,
    pub endpoints:       Endpoints,
    pub request_timeout: Duration,
    /// Session persistence backend (default: in-memory).
    pub session_backend: Arc<dyn SessionBackend>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/124.0.0.0 Safari/537.36"
                .into(),
            api_version:     zpw_proto::API_VERSION,
            api_type:        zpw_proto::API_TYPE,
            endpoints:       Endpoints::default(),
            request_timeout: Duration::from_secs(30),
            session_backend: Arc::new(InMemoryBackend::new()),
        }
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

struct ClientInner {
    config:  Arc<Config>,
    session: Arc<SessionStore>,
    rpc:     RpcCaller,
}

/// The main client. Clones share one session and one HTTP pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: Config) -> Result<Self, Error> {
        let config  = Arc::new(config);
        let session = Arc::new(SessionStore::default());
        let rpc     = RpcCaller::new(session.clone(), config.clone())?;
        Ok(Self { inner: Arc::new(ClientInner { config, session, rpc }) })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Shared session store.
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.inner.session
    }

    // ── Login ──────────────────────────────────────────────────────────────

    /// Log in with browser cookies.
    ///
    /// If cookies and a secret key are both already present (for example after
    /// [`restore_session`](Self::restore_session)), no request is made.
    pub async fn login(&self, imei: &str, cookies: Option<Cookies>) -> Result<Session, LoginError> {
        let store = &self.inner.session;
        store.update(|s| {
            s.imei = imei.to_owned();
            if let Some(c) = cookies {
                s.cookies = c;
            }
        });

        if store.is_logged_in() {
            tracing::info!("[zpw] reusing existing session");
            return Ok(store.update(|s| { s.logged_in = true; s.clone() }));
        }
        if store.cookies().is_empty() {
            return Err(LoginError::UnsupportedMethod);
        }

        let config = &self.inner.config;
        let query = [
            ("zpw_ver",       config.api_version.to_string()),
            ("type",          config.api_type.to_string()),
            ("imei",          imei.to_owned()),
            ("computer_name", "Web".to_owned()),
            ("ts",            channel::now_ms().to_string()),
            ("nretry",        "0".to_owned()),
        ];
        tracing::info!("[zpw] logging in …");
        let body: Value = self
            .inner
            .rpc
            .http()
            .get(&config.endpoints.login)
            .query(&query)
            .header(reqwest::header::COOKIE, store.cookie_header())
            .send()
            .await?
            .json()
            .await?;

        let code = body.get("error_code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            return Err(LoginError::Remote(RemoteError::from_body(&body, code)));
        }
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let field = |names: &[&str]| {
            names.iter().find_map(|n| match data.get(*n) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
        };

        let key = field(&["zpw_enk", "secret_key"]).ok_or(LoginError::MissingSecretKey)?;
        let user_id = field(&["send2me_id", "uid"]);
        let phone = field(&["phone_number"]);
        let endpoints: Vec<String> = data
            .get("zpw_ws")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default();

        let session = store.update(|s| {
            s.secret_key     = Some(key);
            s.user_id        = user_id;
            s.phone_number   = phone;
            s.push_endpoints = endpoints;
            s.logged_in      = true;
            s.clone()
        });
        tracing::info!("[zpw] logged in as {}", session.user_id.as_deref().unwrap_or("?"));
        Ok(session)
    }

    /// Invalidate the session locally and delete the persisted copy.
    pub fn logout(&self) -> Result<(), Error> {
        self.inner.session.invalidate();
        self.inner.config.session_backend.delete()?;
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.session.is_logged_in()
    }

    // ── Session accessors ──────────────────────────────────────────────────

    pub fn cookies(&self) -> Cookies {
        self.inner.session.cookies()
    }

    pub fn set_cookies(&self, cookies: Cookies) {
        self.inner.session.set_cookies(cookies)
    }

    pub fn secret_key(&self) -> Option<String> {
        self.inner.session.secret_key()
    }

    /// Not validated; a malformed key shows up as a decode error on first use.
    pub fn set_secret_key(&self, key: impl Into<String>) {
        self.inner.session.set_secret_key(key)
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.session.user_id()
    }

    /// Persist the session through the configured backend.
    pub fn save_session(&self) -> Result<(), Error> {
        let backend = &self.inner.config.session_backend;
        backend.save(&self.inner.session.snapshot())?;
        tracing::debug!("[zpw] session saved ({})", backend.name());
        Ok(())
    }

    /// Load a persisted session. Returns `false` if the backend had none.
    pub fn restore_session(&self) -> Result<bool, Error> {
        let backend = &self.inner.config.session_backend;
        match backend.load()? {
            Some(s) => {
                tracing::info!("[zpw] session restored ({})", backend.name());
                self.inner.session.replace(s);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ── RPC ────────────────────────────────────────────────────────────────

    pub fn rpc(&self) -> &RpcCaller {
        &self.inner.rpc
    }

    /// One encrypted call. See [`rpc::unwrap_response`] for result handling.
    pub async fn call(&self, url: &str, params: Value, method: Method) -> Result<Value, Error> {
        self.inner.rpc.call(url, params, method).await
    }

    /// Start building a call with extra query fields or file parts.
    pub fn request(&self, method: Method, url: impl Into<String>) -> RpcRequest<'_> {
        self.inner.rpc.request(method, url)
    }

    // ── Push channel ───────────────────────────────────────────────────────

    /// Build a push channel delivering to `handler`. Call
    /// [`PushChannel::connect`] or [`PushChannel::listen`] to start it.
    pub fn push_channel<H: EventHandler>(&self, handler: H, config: ChannelConfig) -> PushChannel<H> {
        PushChannel::new(
            self.inner.session.clone(),
            self.inner.config.clone(),
            self.inner.rpc.clone(),
            config,
            handler,
        )
    }

    /// Start a push channel in the background and return it with a stream of
    /// its events.
    ///
    /// The stream is unbounded: events queue in memory until read. Use
    /// [`stream_events_bounded`](Self::stream_events_bounded) to cap it.
    pub fn stream_events(&self, config: ChannelConfig) -> Result<(PushChannel<EventSink>, EventStream), ChannelFault> {
        self.start_stream(EventSink::new(), config)
    }

    /// Like [`stream_events`](Self::stream_events), holding at most
    /// `capacity` unread events. A full stream makes the channel wait.
    pub fn stream_events_bounded(
        &self,
        config:   ChannelConfig,
        capacity: usize,
    ) -> Result<(PushChannel<EventSink>, EventStream), ChannelFault> {
        self.start_stream(EventSink::bounded(capacity), config)
    }

    fn start_stream(
        &self,
        (sink, stream): (EventSink, EventStream),
        config: ChannelConfig,
    ) -> Result<(PushChannel<EventSink>, EventStream), ChannelFault> {
        let channel = self.push_channel(sink, config);
        channel.connect()?;
        Ok((channel, stream))
    }
}
