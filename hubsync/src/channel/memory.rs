//! In-process connector.
//!
//! Every `connect` creates a [`MemoryServer`] for the key: the test (or demo)
//! side of the connection. The server pushes frames to the client, breaks the
//! connection on demand and records what the client sent, starting with the
//! start request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use super::control::start_request;
use super::{BoxFuture, ChannelError, Connector, Transport};
use crate::download::{DownloadKey, ProgressFrame, SourceParams};

const MEMORY_ENDPOINT: &str = "memory://";

enum Inbound {
    Text(String),
    Fail(String),
    Disconnect,
}

#[derive(Default)]
struct ConnectorState {
    servers: HashMap<DownloadKey, Vec<MemoryServer>>,
    connect_count: usize,
    fail_next: Option<String>,
    connect_delay: Option<Duration>,
}

/// Connector whose connections live entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
    connected: Arc<Notify>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every subsequent connect by `delay`.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.state.lock().connect_delay = delay;
    }

    /// Make the next connect attempt fail with `reason`.
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        self.state.lock().fail_next = Some(reason.into());
    }

    /// Number of connect attempts so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_count
    }

    /// Most recent connection for a key.
    pub fn server(&self, key: &DownloadKey) -> Option<MemoryServer> {
        self.state
            .lock()
            .servers
            .get(key)
            .and_then(|servers| servers.last().cloned())
    }

    /// Every connection made for a key, oldest first.
    pub fn servers(&self, key: &DownloadKey) -> Vec<MemoryServer> {
        self.state
            .lock()
            .servers
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Wait until the key has been connected at least once.
    pub async fn wait_for_connection(&self, key: &DownloadKey) -> MemoryServer {
        self.wait_for_connections(key, 1).await
    }

    /// Wait for the `count`-th connection of a key and return it.
    pub async fn wait_for_connections(&self, key: &DownloadKey, count: usize) -> MemoryServer {
        loop {
            let notified = self.connected.notified();
            let existing = self
                .state
                .lock()
                .servers
                .get(key)
                .and_then(|servers| servers.get(count.saturating_sub(1)).cloned());
            if let Some(server) = existing {
                return server;
            }
            notified.await;
        }
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(
        &'a self,
        key: &'a DownloadKey,
        source: &'a SourceParams,
    ) -> BoxFuture<'a, Result<Box<dyn Transport>, ChannelError>> {
        Box::pin(async move {
            let delay = {
                let mut state = self.state.lock();
                state.connect_count += 1;
                state.connect_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let fail_next = self.state.lock().fail_next.take();
            if let Some(reason) = fail_next {
                return Err(ChannelError::OpenFailed {
                    endpoint: MEMORY_ENDPOINT.to_string(),
                    reason,
                });
            }

            let (sender, receiver) = mpsc::unbounded_channel();
            let server = MemoryServer {
                key: key.clone(),
                source: source.clone(),
                inbound: sender,
                received: Arc::new(Mutex::new(vec![start_request(key, source)])),
                closed: CancellationToken::new(),
            };
            let transport = MemoryTransport {
                inbound: receiver,
                received: Arc::clone(&server.received),
                closed: server.closed.clone(),
            };

            self.state
                .lock()
                .servers
                .entry(key.clone())
                .or_default()
                .push(server);
            self.connected.notify_waiters();

            Ok(Box::new(transport) as Box<dyn Transport>)
        })
    }
}

/// Server side of one in-memory connection.
#[derive(Clone)]
pub struct MemoryServer {
    key: DownloadKey,
    source: SourceParams,
    inbound: mpsc::UnboundedSender<Inbound>,
    received: Arc<Mutex<Vec<String>>>,
    closed: CancellationToken,
}

impl MemoryServer {
    pub fn key(&self) -> &DownloadKey {
        &self.key
    }

    /// What the client asked for.
    pub fn source(&self) -> &SourceParams {
        &self.source
    }

    pub fn send_frame(&self, frame: &ProgressFrame) {
        self.send_text(&frame.to_json());
    }

    /// Push raw text, well-formed or not.
    pub fn send_text(&self, text: &str) {
        let _ = self.inbound.send(Inbound::Text(text.to_string()));
    }

    /// Break the connection with a transport error.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Fail(reason.into()));
    }

    /// Close the connection from the server side.
    pub fn disconnect(&self) {
        let _ = self.inbound.send(Inbound::Disconnect);
    }

    /// Frames the client sent, in order. The first is the start request.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    /// Whether the client closed its end.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the client closes its end.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl std::fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryServer")
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    received: Arc<Mutex<Vec<String>>>,
    closed: CancellationToken,
}

impl Transport for MemoryTransport {
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, ChannelError>>> {
        Box::pin(async move {
            match self.inbound.recv().await {
                Some(Inbound::Text(text)) => Some(Ok(text)),
                Some(Inbound::Fail(reason)) => Some(Err(ChannelError::Transport(reason))),
                Some(Inbound::Disconnect) | None => None,
            }
        })
    }

    fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(ChannelError::Closed);
            }
            self.received.lock().push(text);
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed.cancel();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::FrameStatus;

    fn key() -> DownloadKey {
        DownloadKey::new("org/model").unwrap()
    }

    fn source() -> SourceParams {
        SourceParams::new("org/model", "checkpoints")
    }

    #[tokio::test]
    async fn test_connect_records_start_request() {
        let connector = MemoryConnector::new();
        let _transport = connector.connect(&key(), &source()).await.unwrap();

        let server = connector.server(&key()).unwrap();
        assert_eq!(server.received(), vec![start_request(&key(), &source())]);
        assert_eq!(server.source(), &source());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_connect_applies_once() {
        let connector = MemoryConnector::new();
        connector.fail_next_connect("refused");

        assert!(connector.connect(&key(), &source()).await.is_err());
        assert!(connector.connect(&key(), &source()).await.is_ok());
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(connector.servers(&key()).len(), 1);
    }

    #[tokio::test]
    async fn test_transport_round_trip() {
        let connector = MemoryConnector::new();
        let mut transport = connector.connect(&key(), &source()).await.unwrap();
        let server = connector.wait_for_connection(&key()).await;

        server.send_frame(&ProgressFrame::new(FrameStatus::Start));
        server.fail("reset");
        server.disconnect();

        assert_eq!(
            transport.recv().await,
            Some(Ok(r#"{"status":"start"}"#.to_string()))
        );
        assert_eq!(
            transport.recv().await,
            Some(Err(ChannelError::Transport("reset".to_string())))
        );
        assert_eq!(transport.recv().await, None);

        transport.send("hello".to_string()).await.unwrap();
        transport.close().await;
        assert!(server.is_closed());
        assert_eq!(server.received().last().map(String::as_str), Some("hello"));
        assert_eq!(transport.send("late".to_string()).await, Err(ChannelError::Closed));
    }

    #[tokio::test]
    async fn test_wait_for_later_connection() {
        let connector = MemoryConnector::new();
        let waiter = {
            let connector = connector.clone();
            tokio::spawn(async move { connector.wait_for_connections(&key(), 2).await })
        };

        let _first = connector.connect(&key(), &source()).await.unwrap();
        let _second = connector.connect(&key(), &source()).await.unwrap();

        let server = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("second connection not observed")
            .unwrap();
        assert!(!server.is_closed());
        assert_eq!(connector.servers(&key()).len(), 2);
    }
}
