//! Event subscription registry.
//!
//! Maps event categories to ordered listener lists. The map is copy-on-write:
//! every mutation builds a new `Arc`, and dispatch iterates the snapshot it
//! took before the first callback ran. A listener added or removed from inside
//! a callback therefore takes effect from the next event on. No lock is held
//! while callbacks execute.

use crate::events::{Event, EventType};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Callback invoked for every event of a subscribed category.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Callback invoked when the connection changes state.
pub type StatusCallback = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;

type ListenerMap = HashMap<EventType, Vec<(ListenerId, EventCallback)>>;
type StatusListeners = Vec<(ListenerId, StatusCallback)>;

/// Handle returned when registering a listener, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Connection state changes reported to status listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Authentication completed.
    Authenticated,
    /// The connection is gone. Terminal.
    Closed {
        /// Why the connection closed, `None` for an orderly local close.
        reason: Option<String>,
    },
}

/// Category to listener mapping.
#[derive(Default)]
pub struct Registry {
    listeners: Mutex<Arc<ListenerMap>>,
    status_listeners: Mutex<Arc<StatusListeners>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a listener for one category. Listeners of a category are
    /// called in registration order.
    pub fn add_listener<F>(&self, category: EventType, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        let mut guard = self.listeners.lock();
        let mut next = ListenerMap::clone(&guard);
        next.entry(category)
            .or_default()
            .push((id, Arc::new(callback)));
        *guard = Arc::new(next);
        id
    }

    /// Remove a listener. Returns `false` when the id is not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut guard = self.listeners.lock();
        let mut next = ListenerMap::clone(&guard);
        let mut removed = false;

        next.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
            !entries.is_empty()
        });

        if removed {
            *guard = Arc::new(next);
        }
        removed
    }

    /// Register a connection status listener.
    pub fn add_status_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        let mut guard = self.status_listeners.lock();
        let mut next = StatusListeners::clone(&guard);
        next.push((id, Arc::new(callback)));
        *guard = Arc::new(next);
        id
    }

    /// Remove a status listener. Returns `false` when the id is not registered.
    pub fn remove_status_listener(&self, id: ListenerId) -> bool {
        let mut guard = self.status_listeners.lock();
        if !guard.iter().any(|(entry_id, _)| *entry_id == id) {
            return false;
        }
        let next: StatusListeners = guard
            .iter()
            .filter(|(entry_id, _)| *entry_id != id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    /// The current listener map.
    pub fn snapshot(&self) -> Arc<ListenerMap> {
        Arc::clone(&self.listeners.lock())
    }

    /// Categories with at least one listener, in a stable order.
    pub fn subscribed_categories(&self) -> Vec<EventType> {
        let mut categories: Vec<EventType> = self.snapshot().keys().copied().collect();
        categories.sort_by_key(|category| category.as_str());
        categories
    }

    /// Deliver an event to every listener of its category. Returns how many
    /// listeners were called. A panicking listener is logged and skipped.
    pub fn dispatch(&self, event: &Event) -> usize {
        let Some(category) = event.event_type() else {
            return 0;
        };

        let snapshot = self.snapshot();
        let Some(entries) = snapshot.get(&category) else {
            return 0;
        };

        for (id, callback) in entries {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!("Event listener {} panicked while handling {}", id, category);
            }
        }
        entries.len()
    }

    /// Notify every status listener.
    pub fn notify_status(&self, status: &ConnectionStatus) {
        let snapshot = Arc::clone(&self.status_listeners.lock());
        for (id, callback) in snapshot.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
                warn!("Status listener {} panicked", id);
            }
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("categories", &self.subscribed_categories())
            .field("status_listeners", &self.status_listeners.lock().len())
            .finish()
    }
}
