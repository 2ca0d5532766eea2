//! Daemon event bus
//!
//! Five topics with synchronous fan-out. Handlers run in subscription order
//! under a read lock, so they must be fast and must never block; anything
//! slow is handed off to a task. A spawned daemon copies the subscriber
//! lists of its parent config's bus and publishes on its own copy from then
//! on.

use std::sync::Arc;

use parking_lot::RwLock;
use tincmesh_common::conf::{HostConfig, MainConfig};

use crate::parser::{SubnetAdded, SubnetRemoved};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// One event topic
pub struct Topic<T> {
    handlers: RwLock<Vec<Handler<T>>>,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Topic<T> {
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) {
        self.handlers.write().push(Arc::new(handler));
    }

    pub fn emit(&self, payload: &T) {
        let handlers = self.handlers.read();
        for handler in handlers.iter() {
            handler(payload);
        }
    }

    fn snapshot(&self) -> Topic<T> {
        Topic {
            handlers: RwLock::new(self.handlers.read().clone()),
        }
    }
}

/// Payload of the `configured` and `stopped` topics
#[derive(Debug, Clone)]
pub struct Configuration {
    /// In-mesh IP (subnet without mask)
    pub ip: String,
    pub interface: String,
    pub self_host: HostConfig,
    pub main: MainConfig,
}

/// All daemon topics
#[derive(Default)]
pub struct EventBus {
    pub subnet_added: Topic<SubnetAdded>,
    pub subnet_removed: Topic<SubnetRemoved>,
    pub ready: Topic<()>,
    pub configured: Topic<Configuration>,
    pub stopped: Topic<Configuration>,
}

impl EventBus {
    /// Copy every subscriber list into a fresh bus. Later subscriptions on
    /// either bus do not affect the other.
    pub fn snapshot(&self) -> EventBus {
        EventBus {
            subnet_added: self.subnet_added.snapshot(),
            subnet_removed: self.subnet_removed.snapshot(),
            ready: self.ready.snapshot(),
            configured: self.configured.snapshot(),
            stopped: self.stopped.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let topic: Topic<()> = Topic::default();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            topic.subscribe(move |_| seen.lock().push(i));
        }
        topic.emit(&());
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            bus.ready.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        let copy = bus.snapshot();
        // a subscriber added after the snapshot only fires on the original
        bus.ready.subscribe(|_| {});

        copy.ready.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
