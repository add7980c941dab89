//! Server-side session records and the stores that hold them.
//!
//! A [`Session`] wraps the long-lived OAuth refresh token for one browser.
//! The browser only ever sees the opaque session identifier (in a cookie);
//! the refresh token never leaves the server.
//!
//! # Stores
//!
//! Handlers talk to storage exclusively through the [`SessionStore`] trait,
//! which offers atomic `get`/`put`/`delete`/`compare_and_swap` so that two
//! concurrent refreshes of the same session cannot both win a rotation.
//!
//! - [`MemorySessionStore`] keeps sessions in a `RwLock<HashMap>`.
//! - [`FileSessionStore`] keeps them in a single JSON file, serializing every
//!   read-modify-write behind one mutex and replacing the file atomically.
//!
//! # Session Identifiers
//!
//! Identifiers are random v4 UUIDs (122 bits of entropy). They are bearer
//! credentials and are never written to logs.
//!
//! # Example
//!
//! ```rust
//! use versecut_server::provider::Provider;
//! use versecut_server::session::{generate_session_id, MemorySessionStore, Session, SessionStore};
//!
//! let store = MemorySessionStore::new();
//! let id = generate_session_id();
//! let session = Session::new(Provider::Google, "refresh-token".to_string(), None, false, 1_000);
//!
//! store.put(&id, session.clone()).unwrap();
//! assert_eq!(store.get(&id).unwrap(), Some(session));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::provider::Provider;

/// Server-side lifetime of a session that was not "remembered" (1 day).
pub const MIN_SESSION_AGE: i64 = 86_400;

/// Upper bound on the lifetime of a remembered session (30 days).
pub const MAX_SESSION_AGE: i64 = 30 * 86_400;

/// Errors that can occur in a session store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("session store I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backing file does not contain a valid session map.
    #[error("session store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// A previous holder of the store lock panicked.
    #[error("session store lock poisoned")]
    Poisoned,
}

/// Computes the server-side expiry of a session.
///
/// Sessions that are not remembered live for [`MIN_SESSION_AGE`]. Remembered
/// sessions live for [`MAX_SESSION_AGE`], cut short by the refresh token's
/// own expiry when the provider reports one.
pub fn compute_session_expiry(now: i64, remember_me: bool, token_expires_at: Option<i64>) -> i64 {
    if !remember_me {
        return now + MIN_SESSION_AGE;
    }
    match token_expires_at {
        Some(token_expiry) => (now + MAX_SESSION_AGE).min(token_expiry),
        None => now + MAX_SESSION_AGE,
    }
}

/// Generates a fresh, unguessable session identifier.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// One authenticated browser's server-side record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Identity provider that issued the refresh token.
    pub provider: Provider,

    /// Provider refresh token; the only way to mint new access tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Creation time (seconds since epoch).
    pub created_at: i64,

    /// Last modification time (seconds since epoch).
    pub updated_at: i64,

    /// Time of the last refresh that did not rotate the token.
    #[serde(default)]
    pub last_used_at: Option<i64>,

    /// Refreshes served with the current refresh token.
    #[serde(default)]
    pub used_count: u64,

    /// Refresh-token expiry, if the provider reported one.
    #[serde(default)]
    pub token_expires_at: Option<i64>,

    /// Whether the browser asked to stay signed in.
    #[serde(default)]
    pub remember_me: bool,

    /// Server-side expiry of this session.
    pub session_expires_at: i64,
}

impl Session {
    /// Creates a session for a freshly exchanged refresh token.
    pub fn new(
        provider: Provider,
        refresh_token: String,
        token_expires_at: Option<i64>,
        remember_me: bool,
        now: i64,
    ) -> Self {
        Self {
            provider,
            refresh_token: Some(refresh_token),
            created_at: now,
            updated_at: now,
            last_used_at: None,
            used_count: 0,
            token_expires_at,
            remember_me,
            session_expires_at: compute_session_expiry(now, remember_me, token_expires_at),
        }
    }

    /// Returns the session after the provider rotated the refresh token.
    ///
    /// Usage statistics restart from zero. A `None` expiry keeps the
    /// previously known one.
    #[must_use]
    pub fn rotated(&self, refresh_token: String, token_expires_at: Option<i64>, now: i64) -> Self {
        let token_expires_at = token_expires_at.or(self.token_expires_at);
        Self {
            refresh_token: Some(refresh_token),
            updated_at: now,
            last_used_at: None,
            used_count: 0,
            token_expires_at,
            session_expires_at: compute_session_expiry(now, self.remember_me, token_expires_at),
            ..self.clone()
        }
    }

    /// Returns the session after a refresh that kept the same refresh token.
    #[must_use]
    pub fn touched(&self, now: i64) -> Self {
        Self {
            updated_at: now,
            last_used_at: Some(now),
            used_count: self.used_count + 1,
            session_expires_at: compute_session_expiry(
                now,
                self.remember_me,
                self.token_expires_at,
            ),
            ..self.clone()
        }
    }

    /// The refresh token, if present and non-empty.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Why this session can no longer be served, if it can't.
    pub fn invalid_reason(&self, now: i64) -> Option<&'static str> {
        if self.refresh_token().is_none() {
            return Some("missing refresh token");
        }
        if self.token_expires_at.is_some_and(|t| t < now) {
            return Some("refresh token expired");
        }
        if self.session_expires_at < now {
            return Some("session expired");
        }
        None
    }

    /// Returns true if the session may still be used at `now`.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.invalid_reason(now).is_none()
    }

    /// Seconds until the session expires, never negative.
    pub fn remaining_secs(&self, now: i64) -> i64 {
        (self.session_expires_at - now).max(0)
    }
}

/// Atomic key/value storage for sessions.
///
/// Every method is a single atomic step with respect to other calls on the
/// same store.
pub trait SessionStore: Send + Sync {
    /// Looks up a session.
    fn get(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Inserts or overwrites a session.
    fn put(&self, id: &str, session: Session) -> Result<(), StoreError>;

    /// Removes a session, returning it if it existed.
    fn delete(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Replaces the session only if the stored value still equals `expected`.
    ///
    /// Returns `true` if the swap happened.
    fn compare_and_swap(
        &self,
        id: &str,
        expected: &Session,
        new: Session,
    ) -> Result<bool, StoreError>;

    /// Removes every session that is no longer valid at `now`.
    ///
    /// Returns the number of sessions removed.
    fn purge_expired(&self, now: i64) -> Result<usize, StoreError>;

    /// Number of stored sessions (including not-yet-purged invalid ones).
    fn len(&self) -> Result<usize, StoreError>;

    /// Returns true if the store holds no sessions.
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// Thread-safe in-memory session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.sessions.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("MemorySessionStore")
            .field("session_count", &len)
            .finish()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| StoreError::Poisoned)?;
        Ok(sessions.get(id).cloned())
    }

    fn put(&self, id: &str, session: Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::Poisoned)?;
        sessions.insert(id.to_string(), session);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::Poisoned)?;
        Ok(sessions.remove(id))
    }

    fn compare_and_swap(
        &self,
        id: &str,
        expected: &Session,
        new: Session,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::Poisoned)?;
        match sessions.get_mut(id) {
            Some(current) if current == expected => {
                *current = new;
                Ok(true)
            }
            _ => {
                trace!("Session compare-and-swap lost");
                Ok(false)
            }
        }
    }

    fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::Poisoned)?;
        let initial_len = sessions.len();
        sessions.retain(|_, session| session.is_valid_at(now));
        let removed = initial_len - sessions.len();
        if removed > 0 {
            debug!(
                removed_count = removed,
                remaining_count = sessions.len(),
                "Purged invalid sessions"
            );
        }
        Ok(removed)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self
            .sessions
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .len())
    }
}

type SessionMap = BTreeMap<String, Session>;

/// Session store persisted as one JSON object in a file.
///
/// All operations hold a single mutex across their read-modify-write, and
/// writes replace the file via rename, so readers never see a partial file.
/// The store is safe for one process; it does not coordinate with other
/// processes writing the same file.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    /// Creates a store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(path = %path.display(), "Using file-backed session store");
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<SessionMap, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(SessionMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(SessionMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, sessions: &SessionMap) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(sessions)?;
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        trace!(session_count = sessions.len(), "Session file written");
        Ok(())
    }

    /// Runs `f` on the loaded map under the store lock, persisting the map
    /// afterwards if `f` reports a change.
    fn with_sessions<T>(
        &self,
        f: impl FnOnce(&mut SessionMap) -> (T, bool),
    ) -> Result<T, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut sessions = self.load()?;
        let (result, changed) = f(&mut sessions);
        if changed {
            self.save(&sessions)?;
        }
        Ok(result)
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.with_sessions(|sessions| (sessions.get(id).cloned(), false))
    }

    fn put(&self, id: &str, session: Session) -> Result<(), StoreError> {
        self.with_sessions(|sessions| {
            sessions.insert(id.to_string(), session);
            ((), true)
        })
    }

    fn delete(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.with_sessions(|sessions| {
            let removed = sessions.remove(id);
            let changed = removed.is_some();
            (removed, changed)
        })
    }

    fn compare_and_swap(
        &self,
        id: &str,
        expected: &Session,
        new: Session,
    ) -> Result<bool, StoreError> {
        self.with_sessions(|sessions| match sessions.get_mut(id) {
            Some(current) if current == expected => {
                *current = new;
                (true, true)
            }
            _ => (false, false),
        })
    }

    fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        let removed = self.with_sessions(|sessions| {
            let initial_len = sessions.len();
            sessions.retain(|_, session| session.is_valid_at(now));
            let removed = initial_len - sessions.len();
            (removed, removed > 0)
        })?;
        if removed > 0 {
            debug!(removed_count = removed, "Purged invalid sessions from file");
        }
        Ok(removed)
    }

    fn len(&self) -> Result<usize, StoreError> {
        self.with_sessions(|sessions| (sessions.len(), false))
    }
}
