use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

use super::level::AuthLevel;

/// Length of a session id: hex-encoded SHA-256.
pub const SESSION_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub login: String,
    pub level: AuthLevel,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool { self.expires_at > now }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("entropy source unavailable: {0}")]
    Entropy(String),
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes { let _ = write!(&mut out, "{:02x}", b); }
    out
}

fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Hash of login, wall clock and 16 random bytes, then folded once more over its own hex digest.
fn mint_id(login: &str, now: DateTime<Utc>) -> Result<String, SessionError> {
    let mut salt = [0u8; 16];
    getrandom::getrandom(&mut salt).map_err(|e| SessionError::Entropy(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(login.as_bytes());
    hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(salt);
    let inner = to_hex(&hasher.clone().finalize());
    hasher.update(inner.as_bytes());
    Ok(to_hex(&hasher.finalize()))
}

/// Called with the id of every session that leaves the store, whatever the reason.
pub type EndedHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Owns every live session. All reads and writes, including the periodic sweep, go through
/// the same lock, so nobody observes a half-updated session.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ended_hooks: RwLock<Vec<EndedHook>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .field("ended_hooks", &self.ended_hooks.read().len())
            .finish()
    }
}

impl SessionStore {
    pub fn new() -> Self { Self::default() }

    /// Register `hook` to run after a session is destroyed, evicted or swept.
    /// Hooks run outside the session lock.
    pub fn on_session_end<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.ended_hooks.write().push(Arc::new(hook));
    }

    fn notify_ended(&self, ids: &[String]) {
        if ids.is_empty() { return; }
        let hooks = self.ended_hooks.read().clone();
        for id in ids {
            for hook in &hooks { hook(id); }
        }
    }

    pub fn create(&self, login: &str, level: AuthLevel, ttl: Duration) -> Result<Session, SessionError> {
        self.create_at(login, level, ttl, Utc::now())
    }

    pub(crate) fn create_at(&self, login: &str, level: AuthLevel, ttl: Duration, now: DateTime<Utc>) -> Result<Session, SessionError> {
        let mut w = self.sessions.write();
        let mut id = mint_id(login, now)?;
        while w.contains_key(&id) {
            id = mint_id(login, now)?;
        }
        let session = Session { id: id.clone(), login: login.to_string(), level, expires_at: expiry_from(now, ttl) };
        w.insert(id, session.clone());
        debug!(target: "session", login = login, level = %level, "session created");
        Ok(session)
    }

    pub fn lookup(&self, id: &str) -> Option<Session> { self.lookup_at(id, Utc::now()) }

    /// Found-but-expired counts as missing and is evicted on the spot.
    pub(crate) fn lookup_at(&self, id: &str, now: DateTime<Utc>) -> Option<Session> {
        {
            let r = self.sessions.read();
            match r.get(id) {
                Some(s) if s.is_live_at(now) => return Some(s.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut w = self.sessions.write();
        // Re-check under the write lock: a concurrent touch may have revived it.
        match w.get(id) {
            Some(s) if s.is_live_at(now) => return Some(s.clone()),
            Some(_) => {
                w.remove(id);
            }
            None => return None,
        }
        drop(w);
        self.notify_ended(&[id.to_string()]);
        None
    }

    /// Slide the expiry of a live session to `now + ttl`. An expired session is evicted
    /// instead; an absent one is left alone.
    pub fn touch(&self, id: &str, ttl: Duration) -> Option<Session> { self.touch_at(id, ttl, Utc::now()) }

    pub(crate) fn touch_at(&self, id: &str, ttl: Duration, now: DateTime<Utc>) -> Option<Session> {
        let mut w = self.sessions.write();
        if !w.get(id)?.is_live_at(now) {
            w.remove(id);
            drop(w);
            self.notify_ended(&[id.to_string()]);
            return None;
        }
        let s = w.get_mut(id)?;
        s.expires_at = expiry_from(now, ttl);
        Some(s.clone())
    }

    pub fn destroy(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            debug!(target: "session", "session destroyed");
            self.notify_ended(&[id.to_string()]);
        }
        removed
    }

    /// Remove expired sessions. Returns number removed.
    pub fn sweep(&self) -> usize { self.sweep_at(Utc::now()) }

    pub(crate) fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = {
            let mut w = self.sessions.write();
            let expired: Vec<String> = w.iter().filter(|(_, s)| !s.is_live_at(now)).map(|(id, _)| id.clone()).collect();
            for id in &expired { w.remove(id); }
            expired
        };
        self.notify_ended(&expired);
        expired.len()
    }

    pub fn len(&self) -> usize { self.sessions.read().len() }
    pub fn is_empty(&self) -> bool { self.sessions.read().is_empty() }

    /// Spawn the periodic sweep on the current tokio runtime. The task ends when the handle
    /// is stopped or dropped, or when the store itself is dropped.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let weak: Weak<SessionStore> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(store) = weak.upgrade() else { break; };
                let removed = store.sweep();
                if removed > 0 { debug!(target: "session", removed = removed, "session_sweep"); }
            }
        });
        SweeperHandle { handle: Some(handle) }
    }
}

/// Lifecycle handle for the background sweep task.
#[derive(Debug)]
pub struct SweeperHandle {
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn stop(&mut self) {
        if let Some(h) = self.handle.take() { h.abort(); }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) { self.stop(); }
}
