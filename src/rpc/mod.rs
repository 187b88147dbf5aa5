//! JSON-RPC over a single HTTP POST: envelopes, the method registry, and the dispatcher.

pub mod envelope;
pub mod registry;
pub mod dispatch;

pub use envelope::{RequestEnvelope, ResponseEnvelope, RpcError};
pub use registry::{CallOutcome, Export, Handler, MethodEntry, MethodRegistry, RegistryError, RpcObject, SYSTEM_LIST_METHODS};
pub use dispatch::{DispatchOptions, DispatchReply, RpcDispatcher};
