use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::error;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type HandlerFn = dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync;

/// A subscription callback. Identity is by allocation: clones of one
/// `Handler` are the same handler for registration and removal.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wraps a callback that cannot fail.
    pub fn infallible<F>(f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self::new(move |data| {
            f(data);
            Ok(())
        })
    }

    pub fn same_as(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn call(&self, data: &Value) -> Result<(), HandlerError> {
        (self.0)(data)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

struct Registration {
    handler: Handler,
    once: bool,
}

/// In-process publish/subscribe keyed by event name.
///
/// Handlers run synchronously on the emitting task, in registration order,
/// against a snapshot taken before the first one runs. A handler that fails
/// or panics is logged and does not stop the rest.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<HashMap<String, Vec<Registration>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Registration>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, event: String, handler: &Handler, once: bool) {
        let mut registry = self.lock();
        let entries = registry.entry(event).or_default();
        if entries.iter().any(|r| r.handler.same_as(handler)) {
            return;
        }
        entries.push(Registration {
            handler: handler.clone(),
            once,
        });
    }

    /// Registers `handler` for every emission of `event`. Registering the same
    /// handler twice for one event is a no-op.
    pub fn on(&self, event: impl Into<String>, handler: &Handler) {
        self.register(event.into(), handler, false);
    }

    /// Registers `handler` for the next emission of `event` only.
    pub fn once(&self, event: impl Into<String>, handler: &Handler) {
        self.register(event.into(), handler, true);
    }

    /// Removes `handler` from `event`. Returns whether it was registered.
    pub fn off(&self, event: &str, handler: &Handler) -> bool {
        let mut registry = self.lock();
        let Some(entries) = registry.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|r| !r.handler.same_as(handler));
        let removed = entries.len() != before;
        if entries.is_empty() {
            registry.remove(event);
        }
        removed
    }

    /// Invokes the handlers registered for `event` and returns how many ran.
    pub fn emit(&self, event: &str, data: &Value) -> usize {
        let snapshot: Vec<Handler> = {
            let mut registry = self.lock();
            let Some(entries) = registry.get_mut(event) else {
                return 0;
            };
            let snapshot = entries.iter().map(|r| r.handler.clone()).collect();
            entries.retain(|r| !r.once);
            if entries.is_empty() {
                registry.remove(event);
            }
            snapshot
        };

        for handler in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.call(data))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(event, "event handler failed: {err}"),
                Err(_) => error!(event, "event handler panicked"),
            }
        }
        snapshot.len()
    }

    /// Drops every registration for every event.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    /// Forwards each emission of `event` into a channel. The registration is
    /// removed when the returned [`Subscription`] is dropped.
    pub fn subscribe(&self, event: impl Into<String>) -> Subscription {
        let event = event.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Handler::infallible(move |data| {
            let _ = tx.send(data.clone());
        });
        self.on(event.clone(), &handler);
        Subscription {
            bus: self.clone(),
            event,
            handler,
            rx,
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        let mut events: Vec<(&String, usize)> =
            registry.iter().map(|(k, v)| (k, v.len())).collect();
        events.sort();
        f.debug_struct("EventBus").field("events", &events).finish()
    }
}

/// Channel-backed registration created by [`EventBus::subscribe`].
pub struct Subscription {
    bus: EventBus,
    event: String,
    handler: Handler,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Waits for the next payload. After [`EventBus::clear`] nothing new
    /// arrives, so callers should pair this with their own stop signal.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.off(&self.event, &self.handler);
    }
}
