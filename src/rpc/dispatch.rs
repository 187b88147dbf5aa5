//! One request, one round trip: parse, resolve, authorize, invoke, respond.
//!
//! The dispatcher never touches HTTP types. It receives the raw body and `Cookie` header and
//! answers with a [`DispatchReply`] the transport writes out verbatim.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt; // for catch_unwind on async blocks
use serde_json::Value;
use tracing::{debug, error, warn};

use super::envelope::{RequestEnvelope, ResponseEnvelope, RpcError};
use super::registry::{CallOutcome, Handler, MethodRegistry, SYSTEM_LIST_METHODS};
use crate::error::{GatewayError, CODE_CALL_FAILED};
use crate::identity::cookie::{clear_session_cookie, parse_cookie, set_session_cookie, SESSION_COOKIE};
use crate::identity::{AuthGate, AuthLevel, CallContext, Grant, SessionChange};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RPC_PATH: &str = "/json";

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Upper bound on the wait for a pending result.
    pub call_timeout: Duration,
    /// `Path` attribute of the session cookie.
    pub cookie_path: String,
    /// Answer unknown methods with "Not authenticated" to callers below `Normal`.
    pub hide_unknown_methods: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self { call_timeout: DEFAULT_CALL_TIMEOUT, cookie_path: DEFAULT_RPC_PATH.to_string(), hide_unknown_methods: false }
    }
}

/// What the transport should send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReply {
    pub status: u16,
    /// `None` means an empty body (protocol errors, panics).
    pub body: Option<Vec<u8>>,
    pub set_cookie: Option<String>,
}

impl DispatchReply {
    fn status_only(status: u16) -> Self { Self { status, body: None, set_cookie: None } }
}

pub struct RpcDispatcher {
    registry: Arc<MethodRegistry>,
    gate: Arc<AuthGate>,
    options: DispatchOptions,
}

impl RpcDispatcher {
    pub fn new(registry: Arc<MethodRegistry>, gate: Arc<AuthGate>, options: DispatchOptions) -> Self {
        Self { registry, gate, options }
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> { &self.registry }
    pub fn gate(&self) -> &Arc<AuthGate> { &self.gate }
    pub fn options(&self) -> &DispatchOptions { &self.options }

    /// Handle one request body. A panic anywhere below turns into HTTP 500 with no body.
    pub async fn handle(&self, body: &[u8], cookie_header: Option<&str>) -> DispatchReply {
        match AssertUnwindSafe(self.dispatch(body, cookie_header)).catch_unwind().await {
            Ok(reply) => reply,
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() { *s }
                          else if let Some(s) = panic_payload.downcast_ref::<String>() { s.as_str() }
                          else { "panic" };
                error!(target: "panic", "rpc handler panic: {}", msg);
                DispatchReply::status_only(500)
            }
        }
    }

    async fn dispatch(&self, body: &[u8], cookie_header: Option<&str>) -> DispatchReply {
        let req = match RequestEnvelope::parse(body) {
            Ok(r) => r,
            Err(e) => {
                warn!(target: "rpc", "{}", e);
                return DispatchReply::status_only(e.http_status());
            }
        };
        let cookie = cookie_header.and_then(|h| parse_cookie(h, SESSION_COOKIE));
        let RequestEnvelope { method, params, id } = req;

        let (result, grant, ctx) = match self.authorize(&method, cookie.as_deref()) {
            Err((e, grant)) => (Err(e), grant, None),
            Ok((grant, entry)) => {
                let ctx = CallContext::new(id.clone(), method.clone(), grant.session_id().map(str::to_string), grant.level);
                let result = match entry {
                    Some(handler) => self.invoke(&method, handler, ctx.clone(), params).await,
                    None => Ok(Value::from(self.registry.list_names())),
                };
                (result, Some(grant), Some(ctx))
            }
        };

        let envelope = match result {
            Ok(v) => ResponseEnvelope::success(id, v),
            Err(e) => {
                let err = RpcError::from_gateway(&e)
                    .unwrap_or_else(|| RpcError { code: CODE_CALL_FAILED, message: "Call failed".to_string() });
                ResponseEnvelope::failure(id, err)
            }
        };
        let body = match envelope.to_vec() {
            Ok(b) => b,
            Err(e) => {
                error!(target: "rpc", method = %method, "response serialization failed: {}", e);
                return DispatchReply::status_only(500);
            }
        };
        DispatchReply {
            status: 200,
            body: Some(body),
            set_cookie: self.cookie_for(ctx.as_ref(), grant.as_ref()),
        }
    }

    /// Resolve then authorize. `Ok((grant, None))` is the built-in introspection method.
    /// A refusal still carries the caller's refreshed session so its cookie can be re-sent.
    fn authorize(
        &self,
        method: &str,
        cookie: Option<&str>,
    ) -> Result<(Grant, Option<Handler>), (GatewayError, Option<Grant>)> {
        if method == SYSTEM_LIST_METHODS {
            return Ok((self.gate.resolve_cookie(cookie), None));
        }
        let Some(entry) = self.registry.resolve(method) else {
            debug!(target: "rpc", method = %method, "unknown method");
            if self.options.hide_unknown_methods && !self.gate.peek_cookie(cookie).allows(AuthLevel::Normal) {
                return Err((GatewayError::NotAuthenticated, None));
            }
            return Err((GatewayError::UnknownMethod, None));
        };
        let grant = self.gate.resolve_cookie(cookie);
        if !grant.level.allows(entry.required_level) {
            debug!(target: "rpc", method = %method, required = %entry.required_level, "not authorized");
            return Err((GatewayError::NotAuthenticated, Some(grant)));
        }
        Ok((grant, Some(entry.handler)))
    }

    async fn invoke(
        &self,
        method: &str,
        handler: Handler,
        ctx: CallContext,
        params: Vec<Value>,
    ) -> Result<Value, GatewayError> {
        let outcome = handler.call(ctx, params).map_err(|e| {
            error!(target: "rpc", method = %method, "call failed: {:#}", e);
            GatewayError::call(method, format!("{:#}", e))
        })?;
        match outcome {
            CallOutcome::Ready(v) => Ok(v),
            CallOutcome::Pending(fut) => match tokio::time::timeout(self.options.call_timeout, fut).await {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => {
                    error!(target: "rpc", method = %method, "deferred call failed: {:#}", e);
                    Err(GatewayError::call(method, format!("{:#}", e)))
                }
                Err(_) => {
                    error!(target: "rpc", method = %method, timeout_ms = self.options.call_timeout.as_millis() as u64, "deferred call timed out");
                    Err(GatewayError::call(method, "timed out"))
                }
            },
        }
    }

    /// Login and logout win over the plain refresh of a participating session.
    fn cookie_for(&self, ctx: Option<&CallContext>, grant: Option<&Grant>) -> Option<String> {
        let path = &self.options.cookie_path;
        match ctx.and_then(|c| c.session_change()) {
            Some(SessionChange::Issued(s)) => Some(set_session_cookie(&s.id, s.expires_at, path)),
            Some(SessionChange::Ended) => Some(clear_session_cookie(path)),
            None => grant
                .and_then(|g| g.session.as_ref())
                .map(|s| set_session_cookie(&s.id, s.expires_at, path)),
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod dispatch_tests;
