//! Per-listener event queues for browser clients that poll.
//!
//! A listener subscribes to named events; `fire_event` appends `(event, args)` to the queue of
//! every subscriber; `get_events` drains a listener's queue. Over RPC the listener id is the
//! caller's session id.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::identity::{AuthLevel, CallContext};
use crate::rpc::registry::{str_param, Export, Handler, RpcObject};

/// One queued occurrence; serializes as `[event, args]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent(pub String, pub Vec<Value>);

#[derive(Default)]
struct Inner {
    listeners: HashMap<String, Vec<String>>,
    queues: HashMap<String, Vec<QueuedEvent>>,
}

#[derive(Default)]
pub struct EventManager {
    inner: Mutex<Inner>,
}

impl EventManager {
    pub fn new() -> Self { Self::default() }

    /// Subscribe `listener_id` to `event`. Subscribing twice is a no-op.
    pub fn add_listener(&self, listener_id: &str, event: &str) {
        let mut g = self.inner.lock();
        let subs = g.listeners.entry(event.to_string()).or_default();
        if !subs.iter().any(|l| l == listener_id) {
            subs.push(listener_id.to_string());
            debug!(target: "events", event = event, "listener added");
        }
    }

    /// Returns whether the listener was subscribed. The event is forgotten with its last listener.
    pub fn remove_listener(&self, listener_id: &str, event: &str) -> bool {
        let mut g = self.inner.lock();
        let Some(subs) = g.listeners.get_mut(event) else { return false; };
        let before = subs.len();
        subs.retain(|l| l != listener_id);
        let removed = subs.len() != before;
        if subs.is_empty() { g.listeners.remove(event); }
        removed
    }

    /// Queue the event for every subscriber. Returns the number of listeners reached.
    pub fn fire_event(&self, event: &str, args: Vec<Value>) -> usize {
        let mut g = self.inner.lock();
        let Some(subs) = g.listeners.get(event).cloned() else { return 0; };
        for l in &subs {
            g.queues.entry(l.clone()).or_default().push(QueuedEvent(event.to_string(), args.clone()));
        }
        subs.len()
    }

    /// Drop every subscription and the queue of a listener that is gone for good.
    pub fn forget(&self, listener_id: &str) -> bool {
        let mut g = self.inner.lock();
        let mut found = g.queues.remove(listener_id).is_some();
        g.listeners.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|l| l != listener_id);
            found |= subs.len() != before;
            !subs.is_empty()
        });
        if found { debug!(target: "events", "listener forgotten"); }
        found
    }

    /// Take everything queued for the listener; `None` when nothing is pending.
    pub fn get_events(&self, listener_id: &str) -> Option<Vec<QueuedEvent>> {
        self.inner.lock().queues.remove(listener_id)
    }
}

fn listener_id(ctx: &CallContext) -> anyhow::Result<&str> {
    ctx.session_id.as_deref().ok_or_else(|| anyhow!("event calls need a session"))
}

impl RpcObject for EventManager {
    fn exports(self: Arc<Self>) -> Vec<Export> {
        let add = {
            let this = self.clone();
            Handler::sync(move |ctx, params| {
                this.add_listener(listener_id(ctx)?, str_param(&params, 0)?);
                Ok(Value::Null)
            })
        };
        let remove = {
            let this = self.clone();
            Handler::sync(move |ctx, params| Ok(json!(this.remove_listener(listener_id(ctx)?, str_param(&params, 0)?))))
        };
        let get = {
            let this = self.clone();
            Handler::sync(move |ctx, _| Ok(serde_json::to_value(this.get_events(listener_id(ctx)?))?))
        };
        vec![
            Export::new("add_listener", add).level(AuthLevel::Normal),
            Export::new("remove_listener", remove).level(AuthLevel::Normal),
            Export::new("get_events", get).level(AuthLevel::Normal),
        ]
    }
}
