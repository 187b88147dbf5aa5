//! Unified gateway error model and mapping helpers.
//! Every failure the gateway can report is one of these variants; the helpers map each
//! to its caller-visible JSON-RPC code and to the HTTP status the transport should use.

use thiserror::Error;

use crate::identity::AuthError;
use crate::rpc::RegistryError;

/// Caller-visible error code: the caller's privilege level is too low.
pub const CODE_NOT_AUTHENTICATED: i32 = 1;
/// Caller-visible error code: no method is registered under the requested name.
pub const CODE_UNKNOWN_METHOD: i32 = 2;
/// Caller-visible error code: the handler failed (synchronously, asynchronously or by timeout).
pub const CODE_CALL_FAILED: i32 = 3;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Body is not JSON, or is missing `method`/`params`/`id`. Never reaches an envelope.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Unknown method")]
    UnknownMethod,

    /// Handler failure. The detail is for the server log only.
    #[error("call to `{method}` failed: {detail}")]
    Call { method: String, detail: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn protocol<S: Into<String>>(msg: S) -> Self { GatewayError::Protocol(msg.into()) }
    pub fn call<M: Into<String>, D: ToString>(method: M, detail: D) -> Self {
        GatewayError::Call { method: method.into(), detail: detail.to_string() }
    }

    /// JSON-RPC envelope code, for the variants that travel inside an envelope.
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            GatewayError::NotAuthenticated => Some(CODE_NOT_AUTHENTICATED),
            GatewayError::UnknownMethod => Some(CODE_UNKNOWN_METHOD),
            GatewayError::Call { .. } => Some(CODE_CALL_FAILED),
            GatewayError::Protocol(_) | GatewayError::Registry(_) | GatewayError::Config(_) => None,
        }
    }

    /// Message placed in the envelope. Deliberately generic for call failures.
    pub fn message(&self) -> String {
        match self {
            GatewayError::Call { .. } => "Call failed".to_string(),
            other => other.to_string(),
        }
    }

    /// Map to HTTP status code. Envelope errors ride on 200.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Protocol(_) => 400,
            GatewayError::NotAuthenticated | GatewayError::UnknownMethod | GatewayError::Call { .. } => 200,
            GatewayError::Registry(_) | GatewayError::Config(_) => 500,
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotAuthenticated => GatewayError::NotAuthenticated,
            other => GatewayError::call("auth", other),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
