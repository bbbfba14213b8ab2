//! Download coordinator.
//!
//! # Architecture
//!
//! - `DownloadCoordinator` - cheap, cloneable handle; every operation is a
//!   command sent to the loop
//! - `CoordinatorLoop` - self-driving tokio task that owns the [`Registry`]
//!   and every open channel
//!
//! Channels report back through the same mailbox as the handles, so commands
//! and frames are applied one at a time in arrival order. The loop holds only
//! weak references to its own mailbox: once every handle is dropped it closes
//! all channels and exits.
//!
//! # Example
//!
//! ```ignore
//! let coordinator = DownloadCoordinator::builder(connector)
//!     .config(CoordinatorConfig::default().with_auto_purge_after(Some(Duration::from_secs(30))))
//!     .spawn();
//!
//! coordinator.start_download(key.clone(), source)?;
//! let record = coordinator.store().wait_for(&key, |r| r.is_terminal()).await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::error::DownloadError;
use super::frame::ProgressFrame;
use super::key::{DownloadKey, SourceParams};
use super::record::{DownloadRecord, DownloadStatus};
use super::registry::{DownloadStore, Registry};
use super::size::{size_hint, ArtifactSizeResolver, NoSizeHints};
use super::subscribe::{RegistryEvent, RegistryEvents, Subscription};
use super::transition::apply_frame;
use crate::channel::{self, ChannelEvent, Connector, EventSink, ProgressChannel};

/// Default time allowed for opening a channel.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure message when the server hangs up without a terminal frame.
const CLOSED_EARLY_MESSAGE: &str = "connection closed before the download finished";

/// Coordinator tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Time allowed for a channel to open before the download is failed.
    pub connect_timeout: Duration,
    /// Remove terminal records after this delay. `None` keeps them until
    /// dismissed or restarted.
    pub auto_purge_after: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auto_purge_after: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_auto_purge_after(mut self, delay: Option<Duration>) -> Self {
        self.auto_purge_after = delay;
        self
    }
}

enum Command {
    Start { key: DownloadKey, source: SourceParams },
    Cancel { key: DownloadKey },
    Dismiss { key: DownloadKey },
    Purge { key: DownloadKey, generation: u64 },
    Channel(ChannelEvent),
    Sync(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Builder for [`DownloadCoordinator`].
pub struct CoordinatorBuilder {
    connector: Arc<dyn Connector>,
    size_resolver: Arc<dyn ArtifactSizeResolver>,
    config: CoordinatorConfig,
}

impl CoordinatorBuilder {
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Source of `total_bytes` hints for new downloads.
    pub fn size_resolver(mut self, resolver: Arc<dyn ArtifactSizeResolver>) -> Self {
        self.size_resolver = resolver;
        self
    }

    /// Spawn the coordinator loop on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(self) -> DownloadCoordinator {
        self.spawn_on(&Handle::current())
    }

    /// Spawn the coordinator loop on the given runtime.
    pub fn spawn_on(self, runtime: &Handle) -> DownloadCoordinator {
        let (sender, receiver) = mpsc::unbounded_channel();
        let registry = Registry::new();
        let store = registry.store();

        let coordinator_loop = CoordinatorLoop {
            registry,
            connector: self.connector,
            size_resolver: self.size_resolver,
            config: self.config,
            mailbox: sender.downgrade(),
            next_generation: 0,
        };
        runtime.spawn(coordinator_loop.run(receiver));

        DownloadCoordinator {
            commands: sender,
            store,
        }
    }
}

/// Handle to a running download coordinator.
///
/// Lightweight and cheap to clone. Operations return as soon as the command
/// is queued; their effect is visible through the store once the loop has
/// applied it (see [`DownloadCoordinator::sync`]).
#[derive(Clone)]
pub struct DownloadCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    store: DownloadStore,
}

impl DownloadCoordinator {
    pub fn builder(connector: Arc<dyn Connector>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            connector,
            size_resolver: Arc::new(NoSizeHints),
            config: CoordinatorConfig::default(),
        }
    }

    /// Start downloading `source` under `key`.
    ///
    /// A no-op while a download for `key` is active. A terminal record for
    /// the key is replaced by a fresh one.
    pub fn start_download(&self, key: DownloadKey, source: SourceParams) -> Result<(), DownloadError> {
        source.validate()?;
        self.send(Command::Start { key, source })
    }

    /// Cancel the active download for `key`, if any.
    pub fn cancel_download(&self, key: &DownloadKey) -> Result<(), DownloadError> {
        self.send(Command::Cancel { key: key.clone() })
    }

    /// Remove a terminal record. Active downloads are left alone.
    pub fn dismiss(&self, key: &DownloadKey) -> Result<(), DownloadError> {
        self.send(Command::Dismiss { key: key.clone() })
    }

    /// Resolves once every command sent before it has been applied.
    pub async fn sync(&self) -> Result<(), DownloadError> {
        let (done, applied) = oneshot::channel();
        self.send(Command::Sync(done))?;
        applied.await.map_err(|_| DownloadError::CoordinatorClosed)
    }

    /// Cancel every active download and stop the loop.
    ///
    /// Every handle fails with [`DownloadError::CoordinatorClosed`]
    /// afterwards. The store stays readable.
    pub async fn shutdown(&self) -> Result<(), DownloadError> {
        let (done, stopped) = oneshot::channel();
        self.send(Command::Shutdown(done))?;
        stopped.await.map_err(|_| DownloadError::CoordinatorClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Read-only view of the registry.
    pub fn store(&self) -> &DownloadStore {
        &self.store
    }

    pub fn get_snapshot(&self, key: &DownloadKey) -> Option<DownloadRecord> {
        self.store.get_snapshot(key)
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    pub fn events(&self) -> RegistryEvents {
        self.store.events()
    }

    fn send(&self, command: Command) -> Result<(), DownloadError> {
        self.commands
            .send(command)
            .map_err(|_| DownloadError::CoordinatorClosed)
    }
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("closed", &self.is_closed())
            .field("store", &self.store)
            .finish()
    }
}

/// The task that owns the registry.
struct CoordinatorLoop {
    registry: Registry,
    connector: Arc<dyn Connector>,
    size_resolver: Arc<dyn ArtifactSizeResolver>,
    config: CoordinatorConfig,
    mailbox: mpsc::WeakUnboundedSender<Command>,
    next_generation: u64,
}

impl CoordinatorLoop {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(
            connect_timeout_ms = self.config.connect_timeout.as_millis() as u64,
            auto_purge = ?self.config.auto_purge_after,
            "Download coordinator started"
        );

        while let Some(command) = commands.recv().await {
            match command {
                Command::Start { key, source } => self.start(key, source),
                Command::Cancel { key } => self.cancel(&key),
                Command::Dismiss { key } => self.dismiss(&key),
                Command::Purge { key, generation } => self.purge(&key, generation),
                Command::Channel(event) => self.on_channel_event(event),
                Command::Sync(done) => {
                    let _ = done.send(());
                }
                Command::Shutdown(done) => {
                    commands.close();
                    self.stop();
                    let _ = done.send(());
                    return;
                }
            }
        }

        // Every handle is gone.
        self.stop();
    }

    fn start(&mut self, key: DownloadKey, source: SourceParams) {
        if let Some(existing) = self.registry.get(&key) {
            if existing.status.is_active() {
                debug!(key = %key, status = existing.status.label(), "Download already active, ignoring start");
                return;
            }
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let hint = size_hint(self.size_resolver.as_ref(), &source);

        info!(
            key = %key,
            generation,
            repo_id = %source.repo_id,
            kind = %source.kind,
            size_hint = ?hint,
            "Download queued"
        );
        self.upsert(DownloadRecord::queued(key.clone(), source.clone(), generation, hint));

        channel::open(
            Arc::clone(&self.connector),
            key,
            generation,
            source,
            self.config.connect_timeout,
            self.event_sink(),
        );
    }

    fn cancel(&mut self, key: &DownloadKey) {
        let record = match self.registry.get(key) {
            Some(record) if record.status.is_active() => record,
            _ => {
                debug!(key = %key, "No active download to cancel");
                return;
            }
        };

        if let Some(channel) = self.registry.channel(key) {
            if let Err(e) = channel.send_cancel() {
                debug!(key = %key, error = %e, "Could not send cancel request");
            }
        }

        info!(key = %key, generation = record.generation, "Download cancelled");
        // Replacing the record closes the channel after the cancel request
        // has been flushed.
        self.upsert(record.cancelled());
    }

    fn dismiss(&mut self, key: &DownloadKey) {
        match self.registry.get(key) {
            Some(record) if record.is_terminal() => {
                debug!(key = %key, "Dismissing download");
                self.registry.remove(key);
            }
            Some(_) => debug!(key = %key, "Download still active, not dismissing"),
            None => {}
        }
    }

    fn purge(&mut self, key: &DownloadKey, generation: u64) {
        match self.registry.get(key) {
            Some(record) if record.is_terminal() && record.generation == generation => {
                debug!(key = %key, generation, "Purging finished download");
                self.registry.remove(key);
            }
            _ => {}
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened { channel } => self.on_opened(channel),
            ChannelEvent::OpenFailed {
                key,
                generation,
                error,
            } => self.fail(&key, generation, error.to_string()),
            ChannelEvent::Frame {
                key,
                generation,
                frame,
            } => self.on_frame(&key, generation, &frame),
            ChannelEvent::Failed {
                key,
                generation,
                error,
            } => self.fail(&key, generation, error.to_string()),
            ChannelEvent::Closed { key, generation } => {
                self.fail(&key, generation, CLOSED_EARLY_MESSAGE.to_string())
            }
        }
    }

    fn on_opened(&mut self, channel: ProgressChannel) {
        let key = channel.key().clone();
        let generation = channel.generation();

        match self.registry.get(&key) {
            Some(record) if record.generation == generation && record.status == DownloadStatus::Queued => {
                info!(key = %key, generation, "Progress channel open");
                self.registry.upsert_with_channel(record.starting(), channel);
            }
            Some(record) if record.generation == generation && record.status == DownloadStatus::Cancelled => {
                // Cancelled while connecting; the server already got the
                // start request.
                debug!(key = %key, generation, "Channel opened after cancel");
                let _ = channel.send_cancel();
                channel.close();
            }
            _ => {
                debug!(key = %key, generation, "Closing channel of a superseded download");
                channel.close();
            }
        }
    }

    fn on_frame(&mut self, key: &DownloadKey, generation: u64, frame: &ProgressFrame) {
        let Some(record) = self.current(key, generation) else {
            debug!(key = %key, generation, status = ?frame.status, "Discarding late frame");
            return;
        };

        match apply_frame(&record, frame) {
            Ok(Some(next)) => {
                if next.status != record.status {
                    info!(
                        key = %key,
                        from = record.status.label(),
                        to = next.status.label(),
                        message = next.message.as_deref().unwrap_or(""),
                        "Download status changed"
                    );
                } else {
                    debug!(
                        key = %key,
                        downloaded_bytes = next.downloaded_bytes,
                        total_bytes = ?next.total_bytes,
                        "Download progress"
                    );
                }
                self.upsert(next);
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Rejected progress frame"),
        }
    }

    fn fail(&mut self, key: &DownloadKey, generation: u64, reason: String) {
        let Some(record) = self.current(key, generation) else {
            debug!(key = %key, generation, reason = %reason, "Ignoring failure of inactive download");
            return;
        };

        warn!(key = %key, generation, reason = %reason, "Download failed");
        self.upsert(record.errored(reason));
    }

    /// The record a channel event for `generation` may still change.
    fn current(&self, key: &DownloadKey, generation: u64) -> Option<DownloadRecord> {
        self.registry
            .get(key)
            .filter(|record| record.generation == generation && record.status.is_active())
    }

    fn upsert(&mut self, record: DownloadRecord) {
        let purge = record
            .is_terminal()
            .then(|| (record.key.clone(), record.generation));
        self.registry.upsert(record);

        if let (Some(delay), Some((key, generation))) = (self.config.auto_purge_after, purge) {
            self.schedule_purge(key, generation, delay);
        }
    }

    fn schedule_purge(&self, key: DownloadKey, generation: u64, delay: Duration) {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sender) = mailbox.upgrade() {
                let _ = sender.send(Command::Purge { key, generation });
            }
        });
    }

    fn event_sink(&self) -> EventSink {
        let mailbox = self.mailbox.clone();
        Arc::new(move |event| {
            if let Some(sender) = mailbox.upgrade() {
                let _ = sender.send(Command::Channel(event));
            }
        })
    }

    fn stop(&mut self) {
        let active = self.registry.store().active_keys();
        if !active.is_empty() {
            info!(count = active.len(), "Cancelling active downloads on shutdown");
        }
        for key in active {
            self.cancel(&key);
        }
        self.registry.close_all_channels();
        info!("Download coordinator stopped");
    }
}
