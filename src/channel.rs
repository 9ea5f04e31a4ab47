//! Event channels between host, module and component.
//!
//! - [`HostEventBus`] is held by the host and can dispatch. The module only
//!   ever sees its [`HostEventTarget`], which can subscribe and unsubscribe
//!   but not dispatch: communication is one-way.
//! - [`ComponentEventBus`] belongs to one component instance and exposes all
//!   three operations, since both sides publish on it (`refresh` requests
//!   from the host, outcomes and output events from the component).
//!
//! Listeners run synchronously in registration order. Every channel also
//! broadcasts on a `tokio` channel for async consumers and keeps a short
//! history of recent events.

use crate::events::{
    ComponentEvent, ComponentEventKind, HostEvent, HostEventKind, SettingsChangeEvent,
    VersionMismatchEvent,
};
use crate::types::ListenerId;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Callback registered on a channel.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Event receiver (broadcast channel).
pub type EventReceiver<E> = broadcast::Receiver<E>;

const DEFAULT_CAPACITY: usize = 64;
const MAX_RECENT: usize = 100;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Registration<E, K> {
    id: ListenerId,
    kind: Option<K>,
    listener: Listener<E>,
}

struct Channel<E, K> {
    listeners: Mutex<Vec<Registration<E, K>>>,
    sender: broadcast::Sender<E>,
    recent: Mutex<VecDeque<E>>,
    max_recent: usize,
}

impl<E: Clone, K: PartialEq> Channel<E, K> {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: Mutex::new(Vec::new()),
            sender,
            recent: Mutex::new(VecDeque::new()),
            max_recent: MAX_RECENT,
        }
    }

    fn add(&self, kind: Option<K>, listener: Listener<E>) -> ListenerId {
        let id = ListenerId::new();
        lock(&self.listeners).push(Registration { id, kind, listener });
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    /// Returns how many listeners were invoked.
    fn publish(&self, event: E, kind: &K) -> usize {
        {
            let mut recent = lock(&self.recent);
            recent.push_back(event.clone());
            if recent.len() > self.max_recent {
                recent.pop_front();
            }
        }

        // Snapshot so listeners may (un)register while being called.
        let matching: Vec<Listener<E>> = lock(&self.listeners)
            .iter()
            .filter(|r| r.kind.as_ref().map_or(true, |k| k == kind))
            .map(|r| Arc::clone(&r.listener))
            .collect();
        for listener in &matching {
            listener(&event);
        }

        // Broadcast (ignore errors if no subscribers)
        let _ = self.sender.send(event);
        matching.len()
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    fn recent(&self, limit: usize) -> Vec<E> {
        lock(&self.recent).iter().rev().take(limit).cloned().collect()
    }

    fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

// ═══════════════════════════════════════════════════════════════════
// MODULE CHANNEL
// ═══════════════════════════════════════════════════════════════════

/// Host side of a module's event channel.
#[derive(Clone)]
pub struct HostEventBus {
    inner: Arc<Channel<HostEvent, HostEventKind>>,
}

impl HostEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Channel::new(capacity)),
        }
    }

    /// The view handed to the module.
    pub fn target(&self) -> HostEventTarget {
        HostEventTarget {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Deliver an event to the module's listeners.
    pub fn dispatch(&self, event: HostEvent) -> usize {
        let kind = event.kind();
        self.inner.publish(event, &kind)
    }

    pub fn subscribe(&self) -> EventReceiver<HostEvent> {
        self.inner.subscribe()
    }

    /// Most recent events first.
    pub fn recent(&self, limit: usize) -> Vec<HostEvent> {
        self.inner.recent(limit)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listener_count()
    }
}

impl Default for HostEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for HostEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Module side of the event channel: listen only.
#[derive(Clone)]
pub struct HostEventTarget {
    inner: Arc<Channel<HostEvent, HostEventKind>>,
}

impl HostEventTarget {
    pub fn add_listener<F>(&self, kind: HostEventKind, listener: F) -> ListenerId
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        self.inner.add(Some(kind), Arc::new(listener))
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove(id)
    }

    pub fn on_settings_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SettingsChangeEvent) + Send + Sync + 'static,
    {
        self.add_listener(HostEventKind::SettingsChange, move |event| {
            if let HostEvent::SettingsChange(e) = event {
                listener(e);
            }
        })
    }

    pub fn on_version_mismatch<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&VersionMismatchEvent) + Send + Sync + 'static,
    {
        self.add_listener(HostEventKind::VersionMismatch, move |event| {
            if let HostEvent::VersionMismatch(e) = event {
                listener(e);
            }
        })
    }

    pub fn subscribe(&self) -> EventReceiver<HostEvent> {
        self.inner.subscribe()
    }
}

impl std::fmt::Debug for HostEventTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEventTarget")
            .field("listeners", &self.inner.listener_count())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════
// COMPONENT CHANNEL
// ═══════════════════════════════════════════════════════════════════

/// Event channel of a single component instance.
#[derive(Clone)]
pub struct ComponentEventBus {
    inner: Arc<Channel<ComponentEvent, ComponentEventKind>>,
}

impl ComponentEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Channel::new(capacity)),
        }
    }

    /// Listen to every event on this component.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ComponentEvent) + Send + Sync + 'static,
    {
        self.inner.add(None, Arc::new(listener))
    }

    /// Listen to one kind of event.
    pub fn add_listener_for<F>(&self, kind: ComponentEventKind, listener: F) -> ListenerId
    where
        F: Fn(&ComponentEvent) + Send + Sync + 'static,
    {
        self.inner.add(Some(kind), Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove(id)
    }

    pub fn publish(&self, event: ComponentEvent) -> usize {
        let kind = event.kind();
        self.inner.publish(event, &kind)
    }

    pub fn subscribe(&self) -> EventReceiver<ComponentEvent> {
        self.inner.subscribe()
    }

    /// Most recent events first.
    pub fn recent(&self, limit: usize) -> Vec<ComponentEvent> {
        self.inner.recent(limit)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listener_count()
    }
}

impl Default for ComponentEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for ComponentEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentEventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
