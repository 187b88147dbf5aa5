use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use super::cookie::decode_session_cookie;
use super::credentials::{CredentialError, CredentialVerifier};
use super::level::AuthLevel;
use super::request_context::CallContext;
use super::session::{Session, SessionError, SessionStore};
use crate::rpc::registry::{str_param, Export, Handler, RpcObject};

pub const DEFAULT_LOGIN: &str = "admin";

#[derive(Debug, Error)]
pub enum AuthError {
    /// Effective level below the required one. Deliberately says nothing more.
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Outcome of a successful authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub level: AuthLevel,
    /// The caller's live session after its expiry was slid forward, if one was presented.
    pub session: Option<Session>,
}

impl Grant {
    pub fn session_id(&self) -> Option<&str> { self.session.as_ref().map(|s| s.id.as_str()) }
}

pub struct AuthGate {
    sessions: Arc<SessionStore>,
    verifier: Arc<CredentialVerifier>,
    ttl: Duration,
    login: String,
    level: AuthLevel,
}

impl AuthGate {
    pub fn new(sessions: Arc<SessionStore>, verifier: Arc<CredentialVerifier>, ttl: Duration) -> Self {
        Self { sessions, verifier, ttl, login: DEFAULT_LOGIN.to_string(), level: AuthLevel::Admin }
    }

    /// Login name and level given to sessions minted by a successful `authenticate`.
    pub fn with_identity(mut self, login: impl Into<String>, level: AuthLevel) -> Self {
        self.login = login.into();
        self.level = level;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> { &self.sessions }
    pub fn ttl(&self) -> Duration { self.ttl }

    /// Verify the secret; on success mint a session. `Ok(None)` on a wrong secret.
    pub fn authenticate(&self, candidate: &str) -> Result<Option<Session>, AuthError> {
        if !self.verifier.verify(candidate) {
            warn!(target: "auth", "login rejected");
            return Ok(None);
        }
        let session = self.sessions.create(&self.login, self.level, self.ttl)?;
        info!(target: "auth", login = %session.login, level = %session.level, "login accepted");
        Ok(Some(session))
    }

    /// The caller's effective level. A presented live session has its expiry extended and
    /// rides along in the grant; an absent or expired one leaves the caller at `None`.
    pub fn resolve(&self, session_id: Option<&str>) -> Grant {
        let session = session_id.and_then(|id| self.sessions.touch(id, self.ttl));
        let level = session.as_ref().map(|s| s.level).unwrap_or(AuthLevel::None);
        Grant { level, session }
    }

    /// Same as `resolve`, starting from the checksummed cookie value. A tampered value counts as absent.
    pub fn resolve_cookie(&self, cookie_value: Option<&str>) -> Grant {
        let id = cookie_value.and_then(decode_session_cookie);
        self.resolve(id.as_deref())
    }

    /// Level behind a cookie without sliding its expiry.
    pub fn peek_cookie(&self, cookie_value: Option<&str>) -> AuthLevel {
        cookie_value
            .and_then(decode_session_cookie)
            .and_then(|id| self.sessions.lookup(&id))
            .map(|s| s.level)
            .unwrap_or(AuthLevel::None)
    }

    /// `resolve`, then compare with `required`. The session is refreshed even when refused.
    pub fn check(&self, session_id: Option<&str>, required: AuthLevel) -> Result<Grant, AuthError> {
        let grant = self.resolve(session_id);
        if !grant.level.allows(required) {
            return Err(AuthError::NotAuthenticated);
        }
        Ok(grant)
    }

    /// Same as `check`, starting from the checksummed cookie value.
    pub fn check_cookie(&self, cookie_value: Option<&str>, required: AuthLevel) -> Result<Grant, AuthError> {
        let id = cookie_value.and_then(decode_session_cookie);
        self.check(id.as_deref(), required)
    }

    pub fn logout(&self, session_id: &str) -> bool { self.sessions.destroy(session_id) }

    /// `Ok(false)` when `old` does not verify; the credential is then left untouched.
    pub fn change_password(&self, old: &str, new: &str) -> Result<bool, AuthError> {
        if !self.verifier.verify(old) {
            warn!(target: "auth", "password change rejected");
            return Ok(false);
        }
        self.verifier.rotate(new)?;
        info!(target: "auth", "password changed");
        Ok(true)
    }
}

async fn login_call(gate: Arc<AuthGate>, ctx: CallContext, params: Vec<Value>) -> anyhow::Result<Value> {
    let candidate = str_param(&params, 0)?.to_string();
    let g = gate.clone();
    let Some(session) = tokio::task::spawn_blocking(move || g.authenticate(&candidate)).await?? else {
        return Ok(json!(false));
    };
    if let Some(old) = ctx.session_id.as_deref() { gate.logout(old); }
    ctx.issue_session(session);
    Ok(json!(true))
}

async fn change_password_call(gate: Arc<AuthGate>, params: Vec<Value>) -> anyhow::Result<Value> {
    let old = str_param(&params, 0)?.to_string();
    let new = str_param(&params, 1)?.to_string();
    let changed = tokio::task::spawn_blocking(move || gate.change_password(&old, &new)).await??;
    Ok(Value::Bool(changed))
}

/// Exported as the `auth` object. Argon2 work runs on the blocking pool, so `login` and
/// `change_password` always answer through a pending result.
impl RpcObject for AuthGate {
    fn exports(self: Arc<Self>) -> Vec<Export> {
        let login = {
            let gate = self.clone();
            Handler::pending(move |ctx, params| login_call(gate.clone(), ctx, params))
        };
        let delete_session = {
            let gate = self.clone();
            Handler::sync(move |ctx, _params| {
                if let Some(id) = ctx.session_id.as_deref() { gate.logout(id); }
                ctx.end_session();
                Ok(json!(true))
            })
        };
        let change_password = {
            let gate = self.clone();
            Handler::pending(move |_ctx, params| change_password_call(gate.clone(), params))
        };
        vec![
            Export::new("login", login).level(AuthLevel::None),
            Export::new("check_session", Handler::sync(|ctx, _| Ok(json!(ctx.is_authenticated())))).level(AuthLevel::None),
            Export::new("delete_session", delete_session).level(AuthLevel::Normal),
            Export::new("change_password", change_password).level(AuthLevel::Admin),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use crate::identity::cookie::encode_session_cookie;
    use crate::identity::credentials::cheap_params;
    use crate::identity::request_context::SessionChange;
    use crate::rpc::registry::{CallOutcome, MethodRegistry};

    const HOUR: Duration = Duration::from_secs(3600);

    fn gate(secret: &str) -> Arc<AuthGate> {
        let verifier = CredentialVerifier::with_params(cheap_params());
        verifier.rotate(secret).unwrap();
        Arc::new(AuthGate::new(Arc::new(SessionStore::new()), Arc::new(verifier), HOUR))
    }

    async fn run(outcome: CallOutcome) -> Value {
        match outcome {
            CallOutcome::Ready(v) => v,
            CallOutcome::Pending(fut) => fut.await.unwrap(),
        }
    }

    #[test]
    fn authenticate_mints_admin_session() {
        let g = gate("pw");
        let s = g.authenticate("pw").unwrap().expect("session");
        assert_eq!(s.login, "admin");
        assert_eq!(s.level, AuthLevel::Admin);
        assert_eq!(g.sessions().len(), 1);
        assert!(g.authenticate("nope").unwrap().is_none());
        assert_eq!(g.sessions().len(), 1);
    }

    #[test]
    fn check_compares_levels() {
        let g = gate("pw");
        let grant = g.check(None, AuthLevel::None).unwrap();
        assert_eq!(grant.level, AuthLevel::None);
        assert!(grant.session.is_none());
        assert!(matches!(g.check(None, AuthLevel::ReadOnly), Err(AuthError::NotAuthenticated)));
        assert!(matches!(g.check(Some("unknown"), AuthLevel::Normal), Err(AuthError::NotAuthenticated)));

        let s = g.authenticate("pw").unwrap().unwrap();
        let grant = g.check(Some(&s.id), AuthLevel::Admin).unwrap();
        assert_eq!(grant.level, AuthLevel::Admin);
        assert_eq!(grant.session_id(), Some(s.id.as_str()));
        assert!(grant.session.unwrap().expires_at >= s.expires_at);
    }

    #[test]
    fn read_only_session_is_refused_admin_methods() {
        let g = Arc::new(
            AuthGate::new(Arc::new(SessionStore::new()), Arc::new(CredentialVerifier::with_params(cheap_params())), HOUR)
                .with_identity("viewer", AuthLevel::ReadOnly),
        );
        let s = g.sessions().create("viewer", AuthLevel::ReadOnly, HOUR).unwrap();
        assert!(g.check(Some(&s.id), AuthLevel::ReadOnly).is_ok());
        assert!(matches!(g.check(Some(&s.id), AuthLevel::Admin), Err(AuthError::NotAuthenticated)));
    }

    #[test]
    fn check_cookie_rejects_tampered_values() {
        let g = gate("pw");
        let s = g.authenticate("pw").unwrap().unwrap();
        let good = encode_session_cookie(&s.id);
        assert_eq!(g.check_cookie(Some(&good), AuthLevel::Admin).unwrap().level, AuthLevel::Admin);
        let bad = format!("{}0", good);
        assert!(g.check_cookie(Some(&bad), AuthLevel::Normal).is_err());
        assert_eq!(g.check_cookie(Some(&bad), AuthLevel::None).unwrap().level, AuthLevel::None);
        assert_eq!(g.check_cookie(Some(&s.id), AuthLevel::None).unwrap().session, None);
    }

    #[test]
    fn refused_caller_still_has_session_refreshed() {
        let g = gate("pw");
        let t0 = Utc::now() - TimeDelta::seconds(30);
        let s = g.sessions().create_at("viewer", AuthLevel::ReadOnly, Duration::from_secs(60), t0).unwrap();
        let grant = g.resolve_cookie(Some(&encode_session_cookie(&s.id)));
        assert_eq!(grant.level, AuthLevel::ReadOnly);
        assert!(!grant.level.allows(AuthLevel::Admin));
        let refreshed = grant.session.expect("live session");
        assert!(refreshed.expires_at > s.expires_at);
        assert_eq!(g.sessions().lookup(&s.id).unwrap().expires_at, refreshed.expires_at);
    }

    #[test]
    fn expired_session_resolves_like_absent_and_is_evicted() {
        let g = gate("pw");
        let t0 = Utc::now() - TimeDelta::seconds(120);
        let s = g.sessions().create_at("admin", AuthLevel::Admin, Duration::from_secs(60), t0).unwrap();
        let cookie = encode_session_cookie(&s.id);
        assert_eq!(g.peek_cookie(Some(&cookie)), AuthLevel::None);
        let s = g.sessions().create_at("admin", AuthLevel::Admin, Duration::from_secs(60), t0).unwrap();
        let cookie = encode_session_cookie(&s.id);
        let grant = g.resolve_cookie(Some(&cookie));
        assert_eq!(grant, g.resolve_cookie(None));
        assert!(matches!(g.check_cookie(Some(&cookie), AuthLevel::ReadOnly), Err(AuthError::NotAuthenticated)));
        assert!(g.sessions().is_empty());
    }

    #[test]
    fn peek_does_not_slide_expiry() {
        let g = gate("pw");
        let t0 = Utc::now() - TimeDelta::seconds(30);
        let s = g.sessions().create_at("admin", AuthLevel::Normal, Duration::from_secs(60), t0).unwrap();
        assert_eq!(g.peek_cookie(Some(&encode_session_cookie(&s.id))), AuthLevel::Normal);
        assert_eq!(g.peek_cookie(Some(&s.id)), AuthLevel::None);
        assert_eq!(g.sessions().lookup(&s.id).unwrap().expires_at, s.expires_at);
    }

    #[test]
    fn logout_then_check_fails() {
        let g = gate("pw");
        let s = g.authenticate("pw").unwrap().unwrap();
        assert!(g.logout(&s.id));
        assert!(!g.logout(&s.id));
        assert!(g.check(Some(&s.id), AuthLevel::Normal).is_err());
    }

    #[test]
    fn change_password_requires_old_secret() {
        let g = gate("old");
        assert!(!g.change_password("wrong", "new").unwrap());
        assert!(g.authenticate("old").unwrap().is_some());
        assert!(g.change_password("old", "new").unwrap());
        assert!(g.authenticate("old").unwrap().is_none());
        assert!(g.authenticate("new").unwrap().is_some());
    }

    #[tokio::test]
    async fn auth_object_login_issues_session() {
        let g = gate("pw");
        let reg = MethodRegistry::default();
        assert_eq!(reg.register_object(g.clone(), Some("auth")).unwrap(), 4);
        assert_eq!(reg.resolve("auth.login").unwrap().required_level, AuthLevel::None);
        assert_eq!(reg.resolve("auth.check_session").unwrap().required_level, AuthLevel::None);
        assert_eq!(reg.resolve("auth.delete_session").unwrap().required_level, AuthLevel::Normal);
        assert_eq!(reg.resolve("auth.change_password").unwrap().required_level, AuthLevel::Admin);

        let login = reg.resolve("auth.login").unwrap();
        let ctx = CallContext::anonymous("auth.login");
        assert_eq!(run(login.handler.call(ctx.clone(), vec![json!("bad")]).unwrap()).await, json!(false));
        assert!(ctx.session_change().is_none());

        assert_eq!(run(login.handler.call(ctx.clone(), vec![json!("pw")]).unwrap()).await, json!(true));
        match ctx.session_change() {
            Some(SessionChange::Issued(s)) => assert!(g.sessions().lookup(&s.id).is_some()),
            other => panic!("expected issued session, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn auth_object_login_without_password_fails_the_call() {
        let g = gate("pw");
        let login = g.exports().into_iter().find(|e| e.method == "login").unwrap();
        match login.handler.call(CallContext::anonymous("auth.login"), vec![]).unwrap() {
            CallOutcome::Pending(fut) => assert!(fut.await.is_err()),
            other => panic!("expected pending, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn auth_object_delete_session_ends_it() {
        let g = gate("pw");
        let s = g.authenticate("pw").unwrap().unwrap();
        let delete = g.clone().exports().into_iter().find(|e| e.method == "delete_session").unwrap();
        let ctx = CallContext::new(json!(1), "auth.delete_session", Some(s.id.clone()), AuthLevel::Admin);
        assert_eq!(run(delete.handler.call(ctx.clone(), vec![]).unwrap()).await, json!(true));
        assert_eq!(ctx.session_change(), Some(SessionChange::Ended));
        assert!(g.sessions().lookup(&s.id).is_none());
    }
}
