use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::level::AuthLevel;
use super::session::Session;

/// What a handler asked the transport to do with the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// A new session was minted (login); issue its cookie.
    Issued(Session),
    /// The caller's session was destroyed (logout); expire the cookie.
    Ended,
}

/// Caller context passed explicitly to every handler.
///
/// Clones share the same session-change slot, so a pending handler that logs the caller in
/// after suspension is still observed by the dispatcher when it builds the reply.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: Value,
    pub method: String,
    pub session_id: Option<String>,
    pub level: AuthLevel,
    change: Arc<Mutex<Option<SessionChange>>>,
}

impl CallContext {
    pub fn new(request_id: Value, method: impl Into<String>, session_id: Option<String>, level: AuthLevel) -> Self {
        Self { request_id, method: method.into(), session_id, level, change: Arc::new(Mutex::new(None)) }
    }

    /// Context for an unauthenticated caller; mostly useful in tests and for direct invocation.
    pub fn anonymous(method: impl Into<String>) -> Self {
        Self::new(Value::Null, method, None, AuthLevel::None)
    }

    pub fn is_authenticated(&self) -> bool { self.session_id.is_some() }

    pub fn issue_session(&self, session: Session) {
        *self.change.lock() = Some(SessionChange::Issued(session));
    }

    pub fn end_session(&self) {
        *self.change.lock() = Some(SessionChange::Ended);
    }

    pub fn session_change(&self) -> Option<SessionChange> { self.change.lock().clone() }
}
