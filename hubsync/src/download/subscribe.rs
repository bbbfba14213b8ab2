//! Publish/subscribe for registry changes.
//!
//! Listeners are plain closures. The registry calls every current listener
//! synchronously, in subscription order, once per change and before the next
//! change is applied. Listeners are expected to be quick: typically they mark
//! a view dirty or forward the event to an async consumer.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::key::DownloadKey;

/// A change applied to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// The record for this key was created or replaced.
    Upserted(DownloadKey),
    /// The record for this key was removed.
    Removed(DownloadKey),
}

impl RegistryEvent {
    pub fn key(&self) -> &DownloadKey {
        match self {
            RegistryEvent::Upserted(key) | RegistryEvent::Removed(key) => key,
        }
    }
}

/// Shared listener type.
pub(crate) type Listener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerList {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Ordered listener list.
#[derive(Default)]
pub(crate) struct Subscribers {
    inner: Mutex<ListenerList>,
}

impl Subscribers {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add(self: &Arc<Self>, listener: Listener) -> Subscription {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, listener));

        Subscription {
            id,
            subscribers: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) {
        self.inner.lock().listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    /// Call every listener with the event.
    ///
    /// The list is copied before calling out, so a listener may subscribe or
    /// unsubscribe without deadlocking. Changes take effect from the next
    /// event.
    pub(crate) fn notify(&self, event: &RegistryEvent) {
        let listeners: Vec<Listener> = self
            .inner
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Handle returned by `subscribe`.
///
/// The listener stays registered for as long as the handle lives; dropping
/// it (or calling [`Subscription::unsubscribe`]) removes the listener.
#[must_use = "the listener is removed as soon as the subscription is dropped"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    /// Remove the listener.
    pub fn unsubscribe(self) {}

    /// Keep the listener registered for the lifetime of the store.
    pub fn detach(mut self) {
        self.subscribers = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Registry events delivered to an async consumer.
///
/// Created by `DownloadStore::events`. Events are buffered without bound, in
/// the order they were published.
pub struct RegistryEvents {
    receiver: mpsc::UnboundedReceiver<RegistryEvent>,
    _subscription: Subscription,
}

impl RegistryEvents {
    pub(crate) fn new(subscribers: &Arc<Subscribers>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = subscribers.add(Arc::new(move |event: &RegistryEvent| {
            let _ = sender.send(event.clone());
        }));

        Self {
            receiver,
            _subscription: subscription,
        }
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<RegistryEvent> {
        self.receiver.recv().await
    }

    /// Take the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<RegistryEvent> {
        self.receiver.try_recv().ok()
    }
}
