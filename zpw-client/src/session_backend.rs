//! Where a [`Session`] lives between process runs.
//!
//! A saved session holds the browser cookies and the secret key, which is
//! enough to skip the login request on the next start. Built in:
//! * [`JsonFileBackend`]: a JSON file on disk, replaced atomically.
//! * [`InMemoryBackend`]: kept for the life of the process only (default).

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::session::Session;

// ─── Trait ────────────────────────────────────────────────────────────────────

/// Storage for one session. Implementations must tolerate concurrent calls.
pub trait SessionBackend: Send + Sync {
    fn save(&self, session: &Session) -> io::Result<()>;

    /// `Ok(None)` when nothing was saved yet.
    fn load(&self) -> io::Result<Option<Session>>;

    /// Called on logout. Deleting a missing session is not an error.
    fn delete(&self) -> io::Result<()>;

    /// Shown in log lines.
    fn name(&self) -> &str;
}

// ─── JsonFileBackend ──────────────────────────────────────────────────────────

/// Stores the session as pretty-printed JSON.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionBackend for JsonFileBackend {
    fn save(&self, session: &Session) -> io::Result<()> {
        let text = session.to_json().map_err(io::Error::other)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn load(&self) -> io::Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        Session::from_json(&text)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn delete(&self) -> io::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn name(&self) -> &str { "json-file" }
}

// ─── InMemoryBackend ─────────────────────────────────────────────────────────

/// Holds the last saved session in memory.
#[derive(Default)]
pub struct InMemoryBackend {
    data: Mutex<Option<Session>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionBackend for InMemoryBackend {
    fn save(&self, session: &Session) -> io::Result<()> {
        *self.data.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        Ok(())
    }

    fn load(&self) -> io::Result<Option<Session>> {
        Ok(self.data.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn delete(&self) -> io::Result<()> {
        *self.data.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    fn name(&self) -> &str { "in-memory" }
}
