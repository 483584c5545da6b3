//! Payload codec.
//!
//! Two envelopes exist on the wire:
//!
//! * **REST**: the request `params` and the response `data` are base64 text of
//!   AES-CBC (zero IV, PKCS#7) over compact JSON, keyed with the session key.
//! * **Push**: each frame body is `{"data": ..., "encrypt": 0|1|2}`; mode 0 is
//!   plain JSON text, mode 1 is base64 gzip, mode 2 is AES-GCM keyed with the
//!   per-connection handshake key and then inflated.
//!
//! Nothing outside this module touches plaintext payload bytes.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value;
use zpw_crypto::{CryptoError, SecretKey, cbc, gcm};

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Failure to build an encrypted REST envelope.
#[derive(Debug)]
pub enum EncodeError {
    /// No key is available.
    MissingKey,
    /// The key is not base64 of a 16/24/32-byte AES key.
    InvalidKey,
    /// The params could not be serialized.
    Serialize(serde_json::Error),
    /// The cipher rejected the input.
    Crypto(CryptoError),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey   => write!(f, "no secret key available"),
            Self::InvalidKey   => write!(f, "secret key is malformed"),
            Self::Serialize(e) => write!(f, "cannot serialize params: {e}"),
            Self::Crypto(e)    => write!(f, "encrypt failed: {e}"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Failure at any step of decoding an envelope.
#[derive(Debug)]
pub enum DecodeError {
    /// No key is available.
    MissingKey,
    /// The key is not base64 of a 16/24/32-byte AES key.
    InvalidKey,
    /// Percent-encoding is malformed.
    UrlDecode,
    /// The text is not valid base64.
    Base64(base64::DecodeError),
    /// Ciphertext is shorter than the layout requires.
    InvalidBuffer(usize),
    /// Decryption, tag verification or inflation failed.
    Crypto(CryptoError),
    /// Plaintext is not UTF-8.
    Utf8(std::string::FromUtf8Error),
    /// Plaintext looked like JSON but did not parse.
    Json(serde_json::Error),
    /// The envelope names an encryption mode this client does not know.
    UnknownMode(i64),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey       => write!(f, "no secret key available"),
            Self::InvalidKey       => write!(f, "secret key is malformed"),
            Self::UrlDecode        => write!(f, "malformed percent-encoding"),
            Self::Base64(e)        => write!(f, "invalid base64: {e}"),
            Self::InvalidBuffer(n) => write!(f, "ciphertext too short: {n} bytes"),
            Self::Crypto(e)        => write!(f, "decrypt failed: {e}"),
            Self::Utf8(e)          => write!(f, "plaintext is not UTF-8: {e}"),
            Self::Json(e)          => write!(f, "plaintext is not valid JSON: {e}"),
            Self::UnknownMode(m)   => write!(f, "unknown encrypt mode {m}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<CryptoError> for DecodeError {
    fn from(e: CryptoError) -> Self { Self::Crypto(e) }
}
impl From<base64::DecodeError> for DecodeError {
    fn from(e: base64::DecodeError) -> Self { Self::Base64(e) }
}
impl From<std::string::FromUtf8Error> for DecodeError {
    fn from(e: std::string::FromUtf8Error) -> Self { Self::Utf8(e) }
}
impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self { Self::Json(e) }
}

// ─── REST envelope ────────────────────────────────────────────────────────────

fn parse_key<E>(key: &str, missing: E, invalid: E) -> Result<SecretKey, E> {
    if key.trim().is_empty() {
        return Err(missing);
    }
    SecretKey::from_base64(key).map_err(|_| invalid)
}

/// Encrypt `params` into the base64 text carried as the `params` query field.
pub fn encode(params: &Value, key: &str) -> Result<String, EncodeError> {
    let key = parse_key(key, EncodeError::MissingKey, EncodeError::InvalidKey)?;
    let plain = serde_json::to_vec(params).map_err(EncodeError::Serialize)?;
    let sealed = cbc::seal(&plain, &key).map_err(EncodeError::Crypto)?;
    Ok(STANDARD.encode(sealed))
}

/// Decrypt a REST `data` field.
///
/// The result is parsed as JSON when the plaintext looks like an object or
/// array; anything else is returned as [`Value::String`].
pub fn decode(text: &str, key: &str) -> Result<Value, DecodeError> {
    let key = parse_key(key, DecodeError::MissingKey, DecodeError::InvalidKey)?;
    let text = urlencoding::decode(text.trim()).map_err(|_| DecodeError::UrlDecode)?;
    let raw = STANDARD.decode(text.as_bytes())?;
    let plain = String::from_utf8(cbc::open(&raw, &key)?)?;
    json_or_string(plain)
}

/// Parse `text` as JSON if it looks like JSON, otherwise keep it as a string.
pub fn json_or_string(text: String) -> Result<Value, DecodeError> {
    let t = text.trim_start();
    if t.starts_with('{') || t.starts_with('[') {
        Ok(serde_json::from_str(t)?)
    } else {
        Ok(Value::String(text))
    }
}

// ─── Push envelope ────────────────────────────────────────────────────────────

/// How the `data` field of a push envelope is wrapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptMode {
    /// Plain JSON text.
    Plain,
    /// base64 of gzip.
    Gzip,
    /// URL-encoded base64 of `iv | aad | AES-GCM ciphertext | tag`, compressed inside.
    Encrypted,
}

impl TryFrom<i64> for EncryptMode {
    type Error = DecodeError;
    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Gzip),
            2 => Ok(Self::Encrypted),
            m => Err(DecodeError::UnknownMode(m)),
        }
    }
}

impl From<EncryptMode> for i64 {
    fn from(m: EncryptMode) -> Self {
        match m {
            EncryptMode::Plain     => 0,
            EncryptMode::Gzip      => 1,
            EncryptMode::Encrypted => 2,
        }
    }
}

/// The `{data, encrypt}` body of a payload-carrying push frame.
#[derive(Clone, Debug, PartialEq)]
pub struct PushEnvelope {
    /// Raw `data` field; usually a string.
    pub data:    Value,
    /// Raw `encrypt` field.
    pub encrypt: i64,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    data:    Value,
    #[serde(default)]
    encrypt: i64,
}

impl PushEnvelope {
    /// Build an envelope.
    pub fn new(data: impl Into<Value>, mode: EncryptMode) -> Self {
        Self { data: data.into(), encrypt: mode.into() }
    }

    /// Read an envelope out of a frame body.
    pub fn deserialize_from(body: &Value) -> Result<Self, serde_json::Error> {
        let raw = RawEnvelope::deserialize(body)?;
        Ok(Self { data: raw.data, encrypt: raw.encrypt })
    }

    /// The envelope as a JSON body.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "data": self.data, "encrypt": self.encrypt })
    }

    fn is_empty(&self) -> bool {
        match &self.data {
            Value::Null      => true,
            Value::String(s) => s.is_empty(),
            _                => false,
        }
    }
}

/// Decode a push envelope with the connection's handshake key.
///
/// Returns `Ok(None)` when either the data or the key is empty.
pub fn decode_push_frame(envelope: &PushEnvelope, key: &str) -> Result<Option<Value>, DecodeError> {
    if envelope.is_empty() || key.is_empty() {
        return Ok(None);
    }
    let mode = EncryptMode::try_from(envelope.encrypt)?;
    log::trace!("[zpw-proto] decoding push envelope ({mode:?})");

    let text = match &envelope.data {
        Value::String(s) => s.as_str(),
        // Already structured; only plain mode can legitimately carry this.
        other if mode == EncryptMode::Plain => return Ok(Some(other.clone())),
        _ => return Err(DecodeError::InvalidBuffer(0)),
    };

    let plain = match mode {
        EncryptMode::Plain => text.to_owned(),
        EncryptMode::Gzip => {
            let raw = STANDARD.decode(text.trim())?;
            String::from_utf8(zpw_crypto::inflate(&raw)?)?
        }
        EncryptMode::Encrypted => {
            let key = SecretKey::from_base64(key).map_err(|_| DecodeError::InvalidKey)?;
            let text = urlencoding::decode(text.trim()).map_err(|_| DecodeError::UrlDecode)?;
            let raw = STANDARD.decode(text.as_bytes())?;
            String::from_utf8(open_push_payload(&raw, &key)?)?
        }
    };
    Ok(Some(serde_json::from_str(&plain)?))
}

const IV_LEN: usize = gcm::NONCE_LEN;
const AAD_LEN: usize = 16;

fn open_push_payload(raw: &[u8], key: &SecretKey) -> Result<Vec<u8>, DecodeError> {
    if raw.len() < IV_LEN + AAD_LEN + gcm::TAG_LEN {
        return Err(DecodeError::InvalidBuffer(raw.len()));
    }
    let (iv, rest) = raw.split_at(IV_LEN);
    let (aad, sealed) = rest.split_at(AAD_LEN);
    let mut nonce = [0u8; IV_LEN];
    nonce.copy_from_slice(iv);
    let compressed = gcm::open(key, &nonce, aad, sealed)?;
    Ok(zpw_crypto::inflate(&compressed)?)
}

/// Build a mode-2 payload string. The inverse of what [`decode_push_frame`]
/// does for [`EncryptMode::Encrypted`]; servers and tests use it.
pub fn seal_push_payload(
    compressed: &[u8],
    key:        &SecretKey,
    iv:         &[u8; IV_LEN],
    aad:        &[u8; AAD_LEN],
) -> Result<String, CryptoError> {
    let sealed = gcm::seal(key, iv, aad, compressed)?;
    let mut raw = Vec::with_capacity(IV_LEN + AAD_LEN + sealed.len());
    raw.extend_from_slice(iv);
    raw.extend_from_slice(aad);
    raw.extend_from_slice(&sealed);
    Ok(urlencoding::encode(&STANDARD.encode(raw)).into_owned())
}
