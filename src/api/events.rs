//! Connection events
//!
//! A running node reports what happens on its listener through callbacks.
//! Handlers run on the connection task that produced the event, so they
//! should return quickly.

use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;

/// Events delivered to application handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The listener is bound and accepting
    Listening {
        /// Bound address
        address: SocketAddr,
        /// Fingerprint of the certificate the node presents
        fingerprint: String,
    },

    /// A peer completed the TLS handshake
    PeerConnected {
        /// Remote address
        peer: SocketAddr,
        /// Fingerprint of the client certificate, if one was presented
        fingerprint: Option<String>,
    },

    /// The advertisement frame was written to a peer
    AdvertisementSent {
        /// Remote address
        peer: SocketAddr,
        /// Number of endpoints advertised
        endpoints: usize,
    },

    /// A PeerSession was answered
    SessionCompleted {
        /// Remote address
        peer: SocketAddr,
        /// Request payload length
        request_len: usize,
        /// Response payload length
        response_len: usize,
    },

    /// Serving one connection failed; other connections are unaffected
    ConnectionFailed {
        /// Remote address
        peer: SocketAddr,
        /// What went wrong
        reason: String,
    },

    /// The node has stopped and every connection task has finished
    NodeStopped,
}

/// Handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Type alias for event handler callbacks
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync + 'static>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(SubscriptionHandle, EventCallback)>,
}

/// Shared list of event handlers
///
/// Clones share the same list, so a handler registered through any clone
/// sees events dispatched through every other.
#[derive(Clone, Default)]
pub struct EventHandlers {
    registry: Arc<RwLock<Registry>>,
}

impl EventHandlers {
    /// Create an empty handler list
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for all future events
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        let handle = SubscriptionHandle(registry.next_id);
        registry.next_id += 1;
        registry.handlers.push((handle, Arc::new(callback)));
        handle
    }

    /// Remove a handler; unknown handles are ignored
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.registry.write().handlers.retain(|(h, _)| *h != handle);
    }

    /// Deliver `event` to every handler in registration order
    ///
    /// The lock is released before any handler runs, so handlers may
    /// subscribe or unsubscribe. A panicking handler is logged and skipped.
    pub fn dispatch(&self, event: Event) {
        let handlers: Vec<_> = self
            .registry
            .read()
            .handlers
            .iter()
            .map(|(handle, callback)| (*handle, Arc::clone(callback)))
            .collect();

        for (handle, callback) in handlers {
            let event = event.clone();
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(event)))
            {
                let message = panic
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("unknown panic");
                tracing::error!(handle = ?handle, panic = message, "event handler panicked");
            }
        }
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.registry.read().handlers.len()
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handlers_receive_events_in_order() {
        let handlers = EventHandlers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        handlers.subscribe(move |event| seen_clone.lock().push(event));

        handlers.dispatch(Event::AdvertisementSent {
            peer: "127.0.0.1:1000".parse().unwrap(),
            endpoints: 1,
        });
        handlers.dispatch(Event::NodeStopped);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], Event::NodeStopped);
    }

    #[test]
    fn test_unsubscribe_and_count() {
        let handlers = EventHandlers::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        let handle = handlers.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        let _other = handlers.subscribe(|_| {});
        assert_eq!(handlers.handler_count(), 2);

        handlers.unsubscribe(handle);
        handlers.dispatch(Event::NodeStopped);

        assert_eq!(handlers.handler_count(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clones_share_handlers() {
        let handlers = EventHandlers::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        handlers.clone().subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        handlers.dispatch(Event::NodeStopped);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_isolation() {
        let handlers = EventHandlers::new();
        let count = Arc::new(AtomicUsize::new(0));

        handlers.subscribe(|_| panic!("Handler panic"));

        let count_clone = Arc::clone(&count);
        handlers.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        handlers.dispatch(Event::NodeStopped);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_subscribe_during_dispatch() {
        let handlers = EventHandlers::new();
        let inner = handlers.clone();

        handlers.subscribe(move |_| {
            inner.subscribe(|_| {});
        });

        handlers.dispatch(Event::NodeStopped);
        assert_eq!(handlers.handler_count(), 2);
    }
}
