//! Method registry: dotted method name -> handler + required privilege level.
//!
//! Capability providers implement [`RpcObject`] and declare their exported operations with
//! [`Export`]; the registry keys each one as `"<object>.<method>"`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::identity::{AuthLevel, CallContext};

/// Introspection method, always present and callable at [`AuthLevel::None`].
pub const SYSTEM_LIST_METHODS: &str = "system.listMethods";
const RESERVED_PREFIX: &str = "system";

pub type CallFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'static>>;

/// Result of invoking a handler: either done, or still running.
pub enum CallOutcome {
    Ready(Value),
    Pending(CallFuture),
}

impl CallOutcome {
    pub fn ready<T: Serialize>(value: T) -> anyhow::Result<Self> {
        Ok(CallOutcome::Ready(serde_json::to_value(value)?))
    }

    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        CallOutcome::Pending(Box::pin(fut))
    }
}

impl fmt::Debug for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOutcome::Ready(v) => f.debug_tuple("Ready").field(v).finish(),
            CallOutcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

type HandlerFn = dyn Fn(CallContext, Vec<Value>) -> anyhow::Result<CallOutcome> + Send + Sync;

/// Shared, cheaply clonable callable. Identity is pointer identity.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(CallContext, Vec<Value>) -> anyhow::Result<CallOutcome> + Send + Sync + 'static,
    {
        Handler(Arc::new(f))
    }

    /// Handler that always completes immediately.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&CallContext, Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Handler::new(move |ctx, params| f(&ctx, params).map(CallOutcome::Ready))
    }

    /// Handler whose result is always resolved later.
    pub fn pending<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Handler::new(move |ctx, params| Ok(CallOutcome::pending(f(ctx, params))))
    }

    pub fn call(&self, ctx: CallContext, params: Vec<Value>) -> anyhow::Result<CallOutcome> {
        (self.0)(ctx, params)
    }

    pub fn ptr_eq(&self, other: &Handler) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0))
    }
}

/// One exported operation: method name, optional required level, handler.
#[derive(Debug, Clone)]
pub struct Export {
    pub method: String,
    pub level: Option<AuthLevel>,
    pub handler: Handler,
}

impl Export {
    pub fn new(method: impl Into<String>, handler: Handler) -> Self {
        Self { method: method.into(), level: None, handler }
    }

    pub fn level(mut self, level: AuthLevel) -> Self {
        self.level = Some(level);
        self
    }
}

/// An object exposing RPC operations. The registry calls `exports` once at registration.
pub trait RpcObject: Send + Sync + 'static {
    fn exports(self: Arc<Self>) -> Vec<Export>;
}

#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub name: String,
    pub required_level: AuthLevel,
    pub handler: Handler,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("method `{0}` is already registered")]
    Duplicate(String),
    #[error("`{0}` is in the reserved system namespace")]
    Reserved(String),
    #[error("invalid method name `{0}`")]
    InvalidName(String),
}

/// Last path segment of the type name, generics stripped, lower-cased.
pub fn default_object_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_ascii_lowercase()
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty() && !s.starts_with('_') && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub struct MethodRegistry {
    default_level: AuthLevel,
    methods: RwLock<HashMap<String, MethodEntry>>,
}

impl Default for MethodRegistry {
    fn default() -> Self { Self::new(AuthLevel::DEFAULT) }
}

impl MethodRegistry {
    /// `default_level` applies to exports that do not declare a level.
    pub fn new(default_level: AuthLevel) -> Self {
        Self { default_level, methods: RwLock::new(HashMap::new()) }
    }

    pub fn default_level(&self) -> AuthLevel { self.default_level }

    fn entry_for(&self, object: &str, export: Export) -> Result<MethodEntry, RegistryError> {
        let name = format!("{}.{}", object, export.method);
        if object.eq_ignore_ascii_case(RESERVED_PREFIX) { return Err(RegistryError::Reserved(name)); }
        if !valid_segment(object) || !valid_segment(&export.method) { return Err(RegistryError::InvalidName(name)); }
        Ok(MethodEntry { name, required_level: export.level.unwrap_or(self.default_level), handler: export.handler })
    }

    /// Register every export of `obj` under `name`, or under its lower-cased type name.
    /// All-or-nothing: a clash on any method leaves the registry unchanged.
    pub fn register_object<T: RpcObject>(&self, obj: Arc<T>, name: Option<&str>) -> Result<usize, RegistryError> {
        let object = match name {
            Some(n) => n.to_ascii_lowercase(),
            None => default_object_name::<T>(),
        };
        let entries = obj
            .exports()
            .into_iter()
            .map(|e| self.entry_for(&object, e))
            .collect::<Result<Vec<_>, _>>()?;

        let mut w = self.methods.write();
        let mut seen = std::collections::HashSet::new();
        for e in &entries {
            if w.contains_key(&e.name) || !seen.insert(e.name.as_str()) {
                return Err(RegistryError::Duplicate(e.name.clone()));
            }
        }
        let count = entries.len();
        for e in entries {
            debug!(target: "rpc", method = %e.name, level = %e.required_level, "registering method");
            w.insert(e.name.clone(), e);
        }
        Ok(count)
    }

    /// Register a single method under `object`.
    pub fn register(&self, object: &str, export: Export) -> Result<(), RegistryError> {
        let entry = self.entry_for(&object.to_ascii_lowercase(), export)?;
        let mut w = self.methods.write();
        if w.contains_key(&entry.name) { return Err(RegistryError::Duplicate(entry.name)); }
        debug!(target: "rpc", method = %entry.name, level = %entry.required_level, "registering method");
        w.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Remove every method of `object`. Returns number removed.
    pub fn unregister_object(&self, object: &str) -> usize {
        let prefix = format!("{}.", object.to_ascii_lowercase());
        let mut w = self.methods.write();
        let before = w.len();
        w.retain(|k, _| !k.starts_with(&prefix));
        before - w.len()
    }

    pub fn resolve(&self, name: &str) -> Option<MethodEntry> { self.methods.read().get(name).cloned() }

    /// Every callable name, sorted, including the reserved introspection method.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.push(SYSTEM_LIST_METHODS.to_string());
        names.sort();
        names
    }

    pub fn len(&self) -> usize { self.methods.read().len() }
    pub fn is_empty(&self) -> bool { self.methods.read().is_empty() }
}

/// Positional string parameter, with a call-failure error when missing or mistyped.
pub fn str_param(params: &[Value], idx: usize) -> anyhow::Result<&str> {
    params
        .get(idx)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("parameter {} must be a string", idx))
}
