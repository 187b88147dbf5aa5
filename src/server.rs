//!
//! jsongate HTTP server
//! --------------------
//! Axum transport shim around the RPC dispatcher.
//!
//! Responsibilities:
//! - Wiring: session store, credential verifier, auth gate, method registry, event manager.
//! - Background sweep of expired sessions for as long as the gateway lives.
//! - One route at the configured RPC path: POST only, body and `Cookie` in, envelope and
//!   `Set-Cookie` out. Every other method gets a bare 405.
//! - gzip content negotiation, and a `GET /` liveness probe.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::events::EventManager;
use crate::identity::{AuthGate, CredentialVerifier, SessionStore, SweeperHandle};
use crate::rpc::{DispatchOptions, MethodRegistry, RegistryError, RpcDispatcher, RpcObject};

pub const CONTENT_TYPE_RPC: &str = "application/x-json";

/// Shared server state injected into the RPC handler.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<RpcDispatcher>,
}

/// Every long-lived piece of a running gateway. Dropping it stops the session sweeper.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<MethodRegistry>,
    gate: Arc<AuthGate>,
    events: Arc<EventManager>,
    dispatcher: Arc<RpcDispatcher>,
    sweeper: SweeperHandle,
}

impl Gateway {
    /// Build from config, seeding the credential from `config.password`.
    /// Must run inside a tokio runtime: the sweeper is spawned here.
    pub fn build(config: GatewayConfig) -> anyhow::Result<Self> {
        let verifier = match config.password.as_deref() {
            Some(pw) => CredentialVerifier::seeded(pw)?,
            None => {
                warn!(target: "startup", "no gateway password configured; every login will be rejected");
                CredentialVerifier::unseeded()
            }
        };
        Self::with_verifier(config, verifier)
    }

    /// Build with a caller-supplied verifier; `config.password` is ignored.
    pub fn with_verifier(config: GatewayConfig, verifier: CredentialVerifier) -> anyhow::Result<Self> {
        config.validate()?;
        let sessions = Arc::new(SessionStore::new());
        let gate = Arc::new(AuthGate::new(sessions.clone(), Arc::new(verifier), config.session_ttl));
        let registry = Arc::new(MethodRegistry::default());
        registry.register_object(gate.clone(), Some("auth"))?;
        let events = Arc::new(EventManager::new());
        registry.register_object(events.clone(), Some("events"))?;
        let listeners = Arc::downgrade(&events);
        sessions.on_session_end(move |id| {
            if let Some(events) = listeners.upgrade() { events.forget(id); }
        });

        let options = DispatchOptions {
            call_timeout: config.call_timeout,
            cookie_path: config.rpc_path.clone(),
            hide_unknown_methods: config.hide_unknown_methods,
        };
        let dispatcher = Arc::new(RpcDispatcher::new(registry.clone(), gate.clone(), options));
        let sweeper = sessions.start_sweeper(config.sweep_interval);
        info!(
            target: "startup",
            rpc_path = %config.rpc_path,
            session_ttl_s = config.session_ttl.as_secs(),
            sweep_interval_s = config.sweep_interval.as_secs(),
            "gateway ready with {} methods",
            registry.len()
        );
        Ok(Self { config, registry, gate, events, dispatcher, sweeper })
    }

    pub fn config(&self) -> &GatewayConfig { &self.config }
    pub fn registry(&self) -> &Arc<MethodRegistry> { &self.registry }
    pub fn gate(&self) -> &Arc<AuthGate> { &self.gate }
    pub fn events(&self) -> &Arc<EventManager> { &self.events }
    pub fn dispatcher(&self) -> &Arc<RpcDispatcher> { &self.dispatcher }

    /// Expose another object's operations. Same rules as [`MethodRegistry::register_object`].
    pub fn register_object<T: RpcObject>(&self, obj: Arc<T>, name: Option<&str>) -> Result<usize, RegistryError> {
        self.registry.register_object(obj, name)
    }

    pub fn stop_sweeper(&mut self) { self.sweeper.stop(); }

    pub fn router(&self) -> Router { router(self.dispatcher.clone(), &self.config.rpc_path) }
}

pub fn router(dispatcher: Arc<RpcDispatcher>, rpc_path: &str) -> Router {
    Router::new()
        .route("/", get(|| async { "jsongate ok" }))
        .route(rpc_path, any(rpc_handler))
        .layer(CompressionLayer::new())
        .with_state(AppState { dispatcher })
}

/// All `Cookie` headers joined, since clients may split them.
fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let parts: Vec<&str> = headers.get_all(header::COOKIE).iter().filter_map(|v| v.to_str().ok()).collect();
    if parts.is_empty() { None } else { Some(parts.join("; ")) }
}

async fn rpc_handler(State(state): State<AppState>, method: Method, headers: HeaderMap, body: Bytes) -> Response {
    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let cookie = cookie_header(&headers);
    let reply = state.dispatcher.handle(&body, cookie.as_deref()).await;
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut resp = match reply.body {
        Some(b) => (status, [(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_RPC))], b).into_response(),
        None => status.into_response(),
    };
    if let Some(c) = reply.set_cookie {
        match HeaderValue::from_str(&c) {
            Ok(v) => { resp.headers_mut().insert(header::SET_COOKIE, v); }
            Err(e) => warn!(target: "session", "unencodable Set-Cookie dropped: {}", e),
        }
    }
    resp
}

/// Serve `gateway` on an already bound listener until the server stops.
pub async fn serve(gateway: &Gateway, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    axum::serve(listener, gateway.router()).await?;
    Ok(())
}

pub async fn run_with_config(config: GatewayConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let gateway = Gateway::build(config)?;
    info!(target: "startup", "Starting server on {}{}", addr, gateway.config().rpc_path);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(&gateway, listener).await
}
