//! Caller identity: privilege levels, sessions, the session cookie, the gateway credential,
//! and the gate that ties them together for each call.
//! Keep the public surface thin and split implementation across sub-modules.

mod level;
mod session;
pub mod cookie;
mod credentials;
mod request_context;
mod gate;

pub use level::AuthLevel;
pub use session::{Session, SessionError, SessionStore, SweeperHandle, SESSION_ID_LEN};
pub use credentials::{CredentialError, CredentialVerifier};
pub use request_context::{CallContext, SessionChange};
pub use gate::{AuthError, AuthGate, Grant, DEFAULT_LOGIN};

#[cfg(test)]
pub(crate) use credentials::cheap_params;
