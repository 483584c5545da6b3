//! Encrypted RPC over HTTPS.
//!
//! Every call encrypts its `params` with the session key, sends them next to
//! the plaintext `zpw_ver` / `zpw_type` fields and decrypts the `data` field
//! of the response. The key is read once per call; a key rotated while the
//! call is in flight makes the response fail to decode rather than retry.

use std::path::Path;
use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::multipart;
use serde_json::Value;
use zpw_proto::EncodeError;

use crate::Config;
use crate::errors::{Error, RemoteError};
use crate::session::SessionStore;

/// HTTP verb of an RPC call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A file attached to a multipart upload.
#[derive(Clone, Debug)]
pub struct FilePart {
    pub field:     String,
    pub file_name: String,
    pub bytes:     Vec<u8>,
}

impl FilePart {
    pub fn new(field: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { field: field.into(), file_name: file_name.into(), bytes }
    }

    /// Read a file from disk, naming the part after the file.
    pub async fn from_path(field: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidArgument(format!("no file name in {}", path.display())))?
            .to_owned();
        Ok(Self { field: field.into(), file_name, bytes })
    }

    fn into_part(self) -> Result<multipart::Part, Error> {
        let mime = mime_guess::from_path(&self.file_name).first_or_octet_stream();
        multipart::Part::bytes(self.bytes)
            .file_name(self.file_name)
            .mime_str(mime.as_ref())
            .map_err(Error::Http)
    }
}

// ─── RpcCaller ────────────────────────────────────────────────────────────────

/// Sends encrypted calls on behalf of a session. Cheap to clone.
#[derive(Clone)]
pub struct RpcCaller {
    http:    reqwest::Client,
    session: Arc<SessionStore>,
    config:  Arc<Config>,
}

/// Headers a browser on the web client would send.
pub(crate) fn default_headers(config: &Config) -> Result<HeaderMap, Error> {
    let value = |s: &str| {
        HeaderValue::from_str(s).map_err(|_| Error::InvalidArgument(format!("bad header value {s:?}")))
    };
    let mut h = HeaderMap::new();
    h.insert(header::USER_AGENT, value(&config.user_agent)?);
    h.insert(header::ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    h.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("vi-VN,vi;q=0.9,en-US;q=0.6,en;q=0.5"));
    h.insert(header::ORIGIN, value(&config.endpoints.origin)?);
    h.insert(header::REFERER, value(&config.endpoints.referer)?);
    h.insert("sec-fetch-site", HeaderValue::from_static("same-site"));
    h.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
    h.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
    Ok(h)
}

impl RpcCaller {
    pub(crate) fn new(session: Arc<SessionStore>, config: Arc<Config>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .default_headers(default_headers(&config)?)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, session, config })
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Start building a call.
    pub fn request(&self, method: Method, url: impl Into<String>) -> RpcRequest<'_> {
        RpcRequest {
            caller: self,
            method,
            url:    url.into(),
            params: None,
            query:  Vec::new(),
            files:  Vec::new(),
        }
    }

    pub fn get(&self, url: impl Into<String>) -> RpcRequest<'_> {
        self.request(Method::Get, url)
    }

    pub fn post(&self, url: impl Into<String>) -> RpcRequest<'_> {
        self.request(Method::Post, url)
    }

    /// One-shot call with encrypted `params`.
    pub async fn call(&self, url: &str, params: Value, method: Method) -> Result<Value, Error> {
        self.request(method, url).params(params).send().await
    }
}

// ─── RpcRequest ───────────────────────────────────────────────────────────────

/// Builder for a single call. Created by [`RpcCaller::request`].
#[must_use = "call .send() to perform the request"]
pub struct RpcRequest<'a> {
    caller: &'a RpcCaller,
    method: Method,
    url:    String,
    params: Option<Value>,
    query:  Vec<(String, String)>,
    files:  Vec<FilePart>,
}

impl RpcRequest<'_> {
    /// Params to encrypt. Requests without params still require a session
    /// key and fail with [`EncodeError::MissingKey`] when there is none.
    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params); self
    }

    /// Extra plaintext query field.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string())); self
    }

    /// Attach a file; the request is sent as multipart and `params` move to
    /// the query string.
    pub fn file(mut self, part: FilePart) -> Self {
        self.files.push(part); self
    }

    pub async fn send(self) -> Result<Value, Error> {
        let RpcRequest { caller, method, url, params, mut query, files } = self;
        // No key means logged out or taken over: nothing leaves the process.
        let key = caller.session.secret_key().ok_or(EncodeError::MissingKey)?;

        query.insert(0, ("zpw_ver".into(), caller.config.api_version.to_string()));
        query.insert(1, ("zpw_type".into(), caller.config.api_type.to_string()));
        let encrypted = params
            .map(|p| zpw_proto::encode(&p, &key))
            .transpose()?;

        let mut builder = match method {
            Method::Get  => caller.http.get(&url),
            Method::Post => caller.http.post(&url),
        };
        let cookies = caller.session.cookie_header();
        if !cookies.is_empty() {
            builder = builder.header(header::COOKIE, cookies);
        }

        builder = match (method, encrypted) {
            (Method::Get, Some(p)) => {
                query.push(("params".into(), p));
                builder.query(&query)
            }
            (Method::Post, Some(p)) if files.is_empty() => {
                builder.query(&query).form(&[("params", p)])
            }
            (Method::Post, Some(p)) => {
                query.push(("params".into(), p));
                builder.query(&query).multipart(build_form(files)?)
            }
            (Method::Post, None) if !files.is_empty() => {
                builder.query(&query).multipart(build_form(files)?)
            }
            (_, None) => builder.query(&query),
        };

        tracing::debug!("[zpw] {method:?} {url}");
        let body: Value = builder.send().await?.json().await?;
        unwrap_response(&body, &key)
    }
}

fn build_form(files: Vec<FilePart>) -> Result<multipart::Form, Error> {
    let mut form = multipart::Form::new();
    for f in files {
        let field = f.field.clone();
        form = form.part(field, f.into_part()?);
    }
    Ok(form)
}

// ─── Response unwrapping ──────────────────────────────────────────────────────

fn error_code(v: &Value) -> Option<i64> {
    match v.get("error_code")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Turn a raw response body into the call result.
///
/// * `error_code != 0` at the top level is a [`RemoteError`].
/// * A string `data` is decrypted with `key`; structured `data` is taken as is.
/// * If the decrypted value carries its own `error_code`, that is checked too
///   and its `data` becomes the result.
/// * A string result that looks like JSON is parsed.
/// * An empty result becomes [`RemoteError::empty_result`].
pub fn unwrap_response(body: &Value, key: &str) -> Result<Value, Error> {
    if let Some(code) = error_code(body).filter(|&c| c != 0) {
        return Err(RemoteError::from_body(body, code).into());
    }

    let mut result = match body.get("data") {
        Some(Value::String(s)) if !s.is_empty() => zpw_proto::decode(s, key)?,
        Some(Value::String(_)) | Some(Value::Null) | None => Value::Null,
        Some(other) => other.clone(),
    };

    if let Some(code) = error_code(&result) {
        if code != 0 {
            return Err(RemoteError::from_body(&result, code).into());
        }
        result = result.get("data").cloned().unwrap_or(Value::Null);
    }

    if let Value::String(s) = &result {
        if let Ok(parsed) = zpw_proto::codec::json_or_string(s.clone()) {
            result = parsed;
        }
    }

    match &result {
        Value::Null => Err(RemoteError::empty_result().into()),
        Value::String(s) if s.is_empty() => Err(RemoteError::empty_result().into()),
        _ => Ok(result),
    }
}
