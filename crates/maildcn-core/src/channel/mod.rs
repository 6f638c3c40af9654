//! Push channel abstraction
//!
//! The aggregator never constructs a connection itself: it is handed a
//! [`PushChannel`] and only subscribes, unsubscribes and emits through it.

pub mod packet;
pub mod socketio;

use maildcn_common::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

pub use socketio::SocketIoChannel;

/// Callback invoked for each delivery on a topic
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Token returned by [`PushChannel::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Closed on request or after exhausting reconnect attempts
    Closed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Reconnecting { attempt } => write!(f, "reconnecting (#{})", attempt),
            ConnectionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Server-initiated message delivery
pub trait PushChannel: Send + Sync {
    /// Register a handler for a topic
    fn subscribe(&self, topic: &str, handler: EventHandler) -> SubscriptionId;

    /// Remove a handler; unknown ids are ignored
    fn unsubscribe(&self, id: SubscriptionId);

    /// Send a named event to the server
    fn emit(&self, topic: &str, payload: Option<Value>) -> Result<()>;

    /// Current connection state
    fn status(&self) -> ConnectionStatus;

    /// Connection state updates
    fn status_watch(&self) -> watch::Receiver<ConnectionStatus>;
}

/// Topic to handler table shared by channel implementations
type HandlerTable = HashMap<String, Vec<(SubscriptionId, EventHandler)>>;

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<HandlerTable>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, topic: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        let mut table = self.lock();
        table
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        debug!("Subscribed {} to '{}'", id, topic);
        id
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut table = self.lock();
        let mut removed = false;
        table.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(sub, _)| *sub != id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        if removed {
            debug!("Unsubscribed {}", id);
        }
        removed
    }

    /// Invoke every handler of `topic` in registration order. Returns the
    /// number of handlers called.
    pub fn dispatch(&self, topic: &str, payload: &Value) -> usize {
        // Handlers run outside the lock so they may (un)subscribe.
        let handlers: Vec<EventHandler> = {
            let table = self.lock();
            match table.get(topic) {
                Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
                None => return 0,
            }
        };
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandlerTable> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Handler registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// In-process channel. Deliveries are dispatched synchronously by
/// [`LocalChannel::publish`]; emitted events are recorded for inspection.
pub struct LocalChannel {
    registry: HandlerRegistry,
    emitted: Mutex<Vec<(String, Option<Value>)>>,
    status: watch::Sender<ConnectionStatus>,
}

impl LocalChannel {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connected);
        Self {
            registry: HandlerRegistry::new(),
            emitted: Mutex::new(Vec::new()),
            status,
        }
    }

    /// Deliver a payload to every subscriber of `topic`
    pub fn publish(&self, topic: &str, payload: Value) -> usize {
        self.registry.dispatch(topic, &payload)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.count(topic)
    }

    /// Events emitted towards the "server" so far
    pub fn emitted(&self) -> Vec<(String, Option<Value>)> {
        self.emitted
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PushChannel for LocalChannel {
    fn subscribe(&self, topic: &str, handler: EventHandler) -> SubscriptionId {
        self.registry.add(topic, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.remove(id);
    }

    fn emit(&self, topic: &str, payload: Option<Value>) -> Result<()> {
        let mut emitted = self
            .emitted
            .lock()
            .map_err(|_| maildcn_common::Error::Internal("emit log poisoned".to_string()))?;
        emitted.push((topic.to_string(), payload));
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}
