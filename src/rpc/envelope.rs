//! Wire envelopes.
//!
//! Request: `{"method": "<object>.<method>", "params": [...], "id": <any>}`, all three mandatory.
//! Response: `{"id": <echoed>, "result": <any>, "error": {"code", "message"} | null}`. Both
//! `result` and `error` are always present; exactly one carries information.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub method: String,
    pub params: Vec<Value>,
    pub id: Value,
}

impl RequestEnvelope {
    /// Strict parse. Any violation is a protocol error; the caller never gets an envelope back.
    pub fn parse(body: &[u8]) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::protocol(format!("invalid JSON: {}", e)))?;
        let Value::Object(mut obj) = value else {
            return Err(GatewayError::protocol("request is not a JSON object"));
        };
        let method = match take(&mut obj, "method")? {
            Value::String(s) => s,
            _ => return Err(GatewayError::protocol("`method` must be a string")),
        };
        let params = match take(&mut obj, "params")? {
            Value::Array(a) => a,
            _ => return Err(GatewayError::protocol("`params` must be an array")),
        };
        let id = take(&mut obj, "id")?;
        Ok(Self { method, params, id })
    }
}

fn take(obj: &mut Map<String, Value>, key: &str) -> Result<Value, GatewayError> {
    obj.remove(key).ok_or_else(|| GatewayError::protocol(format!("missing `{}`", key)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    /// Envelope error for `err`, or `None` when it never travels in an envelope.
    pub fn from_gateway(err: &GatewayError) -> Option<Self> {
        err.rpc_code().map(|code| Self { code, message: err.message() })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: Value,
    pub result: Value,
    pub error: Option<RpcError>,
}

impl ResponseEnvelope {
    pub fn success(id: Value, result: Value) -> Self { Self { id, result, error: None } }

    pub fn failure(id: Value, error: RpcError) -> Self { Self { id, result: Value::Null, error: Some(error) } }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> { serde_json::to_vec(self) }
}
