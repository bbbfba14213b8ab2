//! Download registry and its read-only store handle.
//!
//! # Ownership
//!
//! ```text
//! Registry (owned by the coordinator loop, not Clone)
//!    ├── records ──────────► Arc<RwLock<HashMap>> ◄──── DownloadStore (Clone, read-only)
//!    ├── channels (one ProgressChannel per live download)
//!    └── subscribers ──────► Arc<Subscribers> ◄──────── DownloadStore::subscribe
//! ```
//!
//! Only the holder of the `Registry` can write, and there is exactly one
//! holder. Readers get records by value, so a snapshot stays consistent no
//! matter what happens to the registry afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::key::DownloadKey;
use super::record::DownloadRecord;
use super::subscribe::{RegistryEvent, RegistryEvents, Subscribers, Subscription};
use crate::channel::ProgressChannel;

type RecordMap = HashMap<DownloadKey, DownloadRecord>;

/// Key → record map with change notification.
pub(crate) struct Registry {
    records: Arc<RwLock<RecordMap>>,
    channels: HashMap<DownloadKey, ProgressChannel>,
    subscribers: Arc<Subscribers>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            channels: HashMap::new(),
            subscribers: Subscribers::new(),
        }
    }

    /// Read-only handle for consumers.
    pub(crate) fn store(&self) -> DownloadStore {
        DownloadStore {
            records: Arc::clone(&self.records),
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    pub(crate) fn get(&self, key: &DownloadKey) -> Option<DownloadRecord> {
        self.records.read().get(key).cloned()
    }

    /// The open channel of a live download.
    pub(crate) fn channel(&self, key: &DownloadKey) -> Option<&ProgressChannel> {
        self.channels.get(key)
    }

    /// Replace the record for its key and notify listeners.
    ///
    /// If the new status does not hold a channel, the key's channel (if any)
    /// is closed and dropped here.
    pub(crate) fn upsert(&mut self, record: DownloadRecord) {
        let key = record.key.clone();
        let holds_channel = record.status.holds_channel();
        self.records.write().insert(key.clone(), record);

        if !holds_channel {
            self.close_channel(&key);
        }
        self.subscribers.notify(&RegistryEvent::Upserted(key));
    }

    /// Replace the record and hand it its freshly opened channel.
    pub(crate) fn upsert_with_channel(&mut self, record: DownloadRecord, channel: ProgressChannel) {
        if record.status.holds_channel() {
            if let Some(previous) = self.channels.insert(record.key.clone(), channel) {
                previous.close();
            }
        } else {
            channel.close();
        }
        self.upsert(record);
    }

    /// Delete the record (closing its channel) and notify listeners.
    pub(crate) fn remove(&mut self, key: &DownloadKey) -> Option<DownloadRecord> {
        self.close_channel(key);
        let removed = self.records.write().remove(key);
        if removed.is_some() {
            self.subscribers.notify(&RegistryEvent::Removed(key.clone()));
        }
        removed
    }

    /// Close every open channel. Records are left untouched.
    pub(crate) fn close_all_channels(&mut self) {
        for (key, channel) in self.channels.drain() {
            debug!(key = %key, "Closing channel");
            channel.close();
        }
    }

    fn close_channel(&mut self, key: &DownloadKey) {
        if let Some(channel) = self.channels.remove(key) {
            debug!(key = %key, generation = channel.generation(), "Closing channel");
            channel.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn open_channels(&self) -> usize {
        self.channels.len()
    }
}

/// Read-only view of the download registry.
///
/// Cheap to clone; every UI consumer holds its own copy.
#[derive(Clone)]
pub struct DownloadStore {
    records: Arc<RwLock<RecordMap>>,
    subscribers: Arc<Subscribers>,
}

impl DownloadStore {
    /// Current record for a key.
    pub fn get_snapshot(&self, key: &DownloadKey) -> Option<DownloadRecord> {
        self.records.read().get(key).cloned()
    }

    /// All records, sorted by key.
    pub fn snapshot(&self) -> Vec<DownloadRecord> {
        let mut records: Vec<DownloadRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Keys whose download has not reached a terminal status.
    pub fn active_keys(&self) -> Vec<DownloadKey> {
        let mut keys: Vec<DownloadKey> = self
            .records
            .read()
            .values()
            .filter(|record| record.status.is_active())
            .map(|record| record.key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Register a listener called after every registry change.
    ///
    /// The listener runs on the coordinator loop; it may read the store but
    /// should not block.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.subscribers.add(Arc::new(listener))
    }

    /// Receive registry changes asynchronously.
    pub fn events(&self) -> RegistryEvents {
        RegistryEvents::new(&self.subscribers)
    }

    /// Wait until the record for `key` satisfies `predicate`.
    ///
    /// Returns the matching record. Resolves immediately if the current
    /// record already matches. Never resolves if no matching change happens,
    /// so callers usually wrap it in a timeout.
    pub async fn wait_for<P>(&self, key: &DownloadKey, predicate: P) -> DownloadRecord
    where
        P: Fn(&DownloadRecord) -> bool,
    {
        // Subscribe first so a change between the check and the wait is not lost.
        let mut events = self.events();

        if let Some(record) = self.get_snapshot(key).filter(|r| predicate(r)) {
            return record;
        }

        while let Some(event) = events.recv().await {
            if event.key() != key {
                continue;
            }
            if let Some(record) = self.get_snapshot(key).filter(|r| predicate(r)) {
                return record;
            }
        }

        // The listener list outlives every store handle, so the event stream
        // only ends if the subscription was torn down from elsewhere.
        std::future::pending().await
    }

    /// Number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for DownloadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStore")
            .field("records", &self.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::key::SourceParams;
    use crate::download::record::DownloadStatus;
    use parking_lot::Mutex;

    fn record(name: &str) -> DownloadRecord {
        let source = SourceParams::new(name, "checkpoints");
        DownloadRecord::queued(DownloadKey::for_source(&source), source, 1, None)
    }

    fn key(name: &str) -> DownloadKey {
        DownloadKey::new(name).unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let mut registry = Registry::new();
        let store = registry.store();

        registry.upsert(record("a"));

        assert_eq!(registry.get(&key("a")).unwrap().status, DownloadStatus::Queued);
        assert_eq!(store.get_snapshot(&key("a")).unwrap().key, key("a"));
        assert!(store.get_snapshot(&key("b")).is_none());
    }

    #[test]
    fn test_upsert_replaces_wholesale() {
        let mut registry = Registry::new();
        registry.upsert(record("a"));

        let mut next = record("a").starting();
        next.message = Some("resolving".to_string());
        registry.upsert(next.clone());

        assert_eq!(registry.get(&key("a")), Some(next));
        assert_eq!(registry.store().len(), 1);
    }

    #[test]
    fn test_every_change_notifies_once() {
        let mut registry = Registry::new();
        let store = registry.store();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _subscription = store.subscribe(move |event| sink.lock().push(event.clone()));

        registry.upsert(record("a"));
        registry.upsert(record("a").starting());
        registry.remove(&key("a"));
        registry.remove(&key("a"));

        assert_eq!(
            *seen.lock(),
            vec![
                RegistryEvent::Upserted(key("a")),
                RegistryEvent::Upserted(key("a")),
                RegistryEvent::Removed(key("a")),
            ]
        );
    }

    #[test]
    fn test_listener_sees_applied_change() {
        let mut registry = Registry::new();
        let store = registry.store();
        let observed = Arc::new(Mutex::new(Vec::new()));

        let reader = store.clone();
        let sink = Arc::clone(&observed);
        let _subscription = store.subscribe(move |event| {
            let status = reader.get_snapshot(event.key()).map(|r| r.status);
            sink.lock().push(status);
        });

        registry.upsert(record("a"));
        registry.upsert(record("a").cancelled());
        registry.remove(&key("a"));

        assert_eq!(
            *observed.lock(),
            vec![
                Some(DownloadStatus::Queued),
                Some(DownloadStatus::Cancelled),
                None
            ]
        );
    }

    #[test]
    fn test_snapshot_sorted_and_active_keys() {
        let mut registry = Registry::new();
        registry.upsert(record("b"));
        registry.upsert(record("a").cancelled());
        registry.upsert(record("c").starting());

        let store = registry.store();
        let keys: Vec<_> = store.snapshot().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![key("a"), key("b"), key("c")]);
        assert_eq!(store.active_keys(), vec![key("b"), key("c")]);
    }

    #[test]
    fn test_terminal_upsert_closes_channel() {
        let mut registry = Registry::new();
        let (channel, control) = ProgressChannel::new(key("a"), 1);

        registry.upsert_with_channel(record("a").starting(), channel);
        assert_eq!(registry.open_channels(), 1);
        assert!(registry.channel(&key("a")).is_some());

        registry.upsert(record("a").cancelled());
        assert_eq!(registry.open_channels(), 0);
        assert!(control.is_shutdown());
    }

    #[test]
    fn test_channel_for_non_holding_status_is_closed() {
        let mut registry = Registry::new();
        let (channel, control) = ProgressChannel::new(key("a"), 1);

        registry.upsert_with_channel(record("a").errored("late"), channel);

        assert_eq!(registry.open_channels(), 0);
        assert!(control.is_shutdown());
    }

    #[test]
    fn test_remove_closes_channel() {
        let mut registry = Registry::new();
        let (channel, control) = ProgressChannel::new(key("a"), 1);

        registry.upsert_with_channel(record("a").starting(), channel);
        let removed = registry.remove(&key("a"));

        assert!(removed.is_some());
        assert!(control.is_shutdown());
        assert!(registry.store().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_resolves_on_change() {
        let mut registry = Registry::new();
        let store = registry.store();
        registry.upsert(record("a"));

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .wait_for(&key("a"), |r| r.status == DownloadStatus::Starting)
                    .await
            })
        };
        tokio::task::yield_now().await;

        registry.upsert(record("a").starting());

        let record = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait_for timed out")
            .unwrap();
        assert_eq!(record.status, DownloadStatus::Starting);
    }

    #[tokio::test]
    async fn test_wait_for_returns_current_match() {
        let mut registry = Registry::new();
        registry.upsert(record("a"));
        let record = registry
            .store()
            .wait_for(&key("a"), |r| r.status == DownloadStatus::Queued)
            .await;
        assert_eq!(record.key, key("a"));
    }
}
