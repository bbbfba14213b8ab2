//! Per-download progress channels.
//!
//! A channel adapter owns exactly one transport connection for one download
//! key. It turns inbound text frames into typed [`ProgressFrame`]s and passes
//! them on as [`ChannelEvent`]s; malformed frames are logged and dropped
//! without closing the connection.
//!
//! # Architecture
//!
//! ```text
//! Connector (trait) ──connect──► Transport (trait)
//!     ├── WebSocketConnector          ├── WebSocketTransport
//!     └── MemoryConnector             └── MemoryTransport
//!
//! open() ─► spawned task: connect ─► Opened(ProgressChannel) ─► pump loop
//!                                                                 │
//!        ProgressChannel::send ──► outbound queue ────────────────┤
//!        ProgressChannel::close ─► shutdown token ────────────────┤
//!                                  Frame / Failed / Closed ◄──────┘
//! ```
//!
//! The `ProgressChannel` handle is what the registry owns. Closing it (or
//! dropping it) stops the pump, which then closes the transport.

mod control;
mod memory;
mod websocket;

pub use control::{cancel_request, start_request};
pub use memory::{MemoryConnector, MemoryServer};
pub use websocket::WebSocketConnector;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::download::{DownloadKey, ProgressFrame, SourceParams};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors raised by channel transports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The connection could not be established.
    #[error("failed to open channel to {endpoint}: {reason}")]
    OpenFailed { endpoint: String, reason: String },

    /// The connection was not established within the configured timeout.
    #[error("timed out after {0:?} opening channel")]
    OpenTimeout(Duration),

    /// The connection broke after it was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// The channel has already been closed.
    #[error("channel is closed")]
    Closed,
}

/// One established connection.
///
/// Implementations must make `recv` cancel-safe: the pump drops a pending
/// `recv` future whenever it has something to send.
pub trait Transport: Send {
    /// Next inbound text frame. `None` when the remote side closed.
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, ChannelError>>>;

    /// Send a text frame.
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), ChannelError>>;

    /// Close the connection. Must tolerate being called on a broken
    /// connection.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Opens transports for downloads.
pub trait Connector: Send + Sync {
    /// Open a connection for `key` and ask the server to fetch `source`.
    fn connect<'a>(
        &'a self,
        key: &'a DownloadKey,
        source: &'a SourceParams,
    ) -> BoxFuture<'a, Result<Box<dyn Transport>, ChannelError>>;
}

/// What a channel reports back to the coordinator.
#[derive(Debug)]
pub(crate) enum ChannelEvent {
    /// The connection is up; the handle belongs to the registry from now on.
    Opened { channel: ProgressChannel },
    /// The connection could not be established.
    OpenFailed {
        key: DownloadKey,
        generation: u64,
        error: ChannelError,
    },
    /// A well-formed frame arrived.
    Frame {
        key: DownloadKey,
        generation: u64,
        frame: ProgressFrame,
    },
    /// The transport broke.
    Failed {
        key: DownloadKey,
        generation: u64,
        error: ChannelError,
    },
    /// The remote side closed the connection.
    Closed { key: DownloadKey, generation: u64 },
}

/// Where a channel delivers its events.
pub(crate) type EventSink = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Handle to an open channel.
///
/// `close` is idempotent; dropping the handle closes the channel too.
#[derive(Debug)]
pub struct ProgressChannel {
    key: DownloadKey,
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

/// The pump's side of a [`ProgressChannel`].
#[derive(Debug)]
pub(crate) struct ChannelControl {
    outbound: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
}

impl ChannelControl {
    #[cfg(test)]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl ProgressChannel {
    pub(crate) fn new(key: DownloadKey, generation: u64) -> (Self, ChannelControl) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let channel = Self {
            key,
            generation,
            outbound: sender,
            shutdown: shutdown.clone(),
        };
        let control = ChannelControl {
            outbound: receiver,
            shutdown,
        };
        (channel, control)
    }

    pub fn key(&self) -> &DownloadKey {
        &self.key
    }

    /// The `start_download` generation this channel was opened for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a text frame for the server.
    pub fn send(&self, text: String) -> Result<(), ChannelError> {
        if self.shutdown.is_cancelled() {
            return Err(ChannelError::Closed);
        }
        self.outbound.send(text).map_err(|_| ChannelError::Closed)
    }

    /// Ask the server to stop the transfer. Best effort.
    pub fn send_cancel(&self) -> Result<(), ChannelError> {
        self.send(cancel_request(&self.key))
    }

    /// Close the channel. Frames already queued by `send` are flushed first.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            debug!(key = %self.key, generation = self.generation, "Channel close requested");
            self.shutdown.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Open a channel for one download in the background.
///
/// Reports `Opened` (handing over the [`ProgressChannel`]) or `OpenFailed`,
/// then keeps forwarding frames until the channel is closed or the transport
/// ends. Everything for one channel is reported from one task, so the
/// coordinator sees `Opened` before any of that channel's frames.
pub(crate) fn open(
    connector: Arc<dyn Connector>,
    key: DownloadKey,
    generation: u64,
    source: SourceParams,
    connect_timeout: Duration,
    events: EventSink,
) {
    tokio::spawn(async move {
        let connecting = connector.connect(&key, &source);
        let transport = match tokio::time::timeout(connect_timeout, connecting).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(error)) => {
                events(ChannelEvent::OpenFailed {
                    key,
                    generation,
                    error,
                });
                return;
            }
            Err(_) => {
                events(ChannelEvent::OpenFailed {
                    key,
                    generation,
                    error: ChannelError::OpenTimeout(connect_timeout),
                });
                return;
            }
        };

        let (channel, control) = ProgressChannel::new(key.clone(), generation);
        events(ChannelEvent::Opened { channel });

        pump(transport, key, generation, control, events).await;
    });
}

/// Move frames between the transport and the coordinator until shutdown.
async fn pump(
    mut transport: Box<dyn Transport>,
    key: DownloadKey,
    generation: u64,
    mut control: ChannelControl,
    events: EventSink,
) {
    loop {
        tokio::select! {
            biased;

            // Outbound first so a cancel frame queued just before close()
            // still goes out.
            Some(text) = control.outbound.recv() => {
                if let Err(e) = transport.send(text).await {
                    warn!(key = %key, error = %e, "Failed to send frame on channel");
                }
            }

            _ = control.shutdown.cancelled() => {
                debug!(key = %key, generation, "Channel shut down");
                break;
            }

            inbound = transport.recv() => match inbound {
                Some(Ok(text)) => match ProgressFrame::parse(&text) {
                    Ok(frame) => events(ChannelEvent::Frame {
                        key: key.clone(),
                        generation,
                        frame,
                    }),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Discarding malformed progress frame");
                    }
                },
                Some(Err(error)) => {
                    events(ChannelEvent::Failed {
                        key: key.clone(),
                        generation,
                        error,
                    });
                    break;
                }
                None => {
                    events(ChannelEvent::Closed {
                        key: key.clone(),
                        generation,
                    });
                    break;
                }
            },
        }
    }

    transport.close().await;
}
