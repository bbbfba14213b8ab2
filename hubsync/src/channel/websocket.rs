//! WebSocket transport.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::control::start_request;
use super::{BoxFuture, ChannelError, Connector, Transport};
use crate::download::{DownloadKey, SourceParams};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one WebSocket connection per download.
///
/// The start request is sent as the first frame, so once `connect` returns
/// the server already knows what to fetch.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
}

impl WebSocketConnector {
    /// Create a connector for a `ws://` or `wss://` endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn open_failed(&self, reason: impl ToString) -> ChannelError {
        ChannelError::OpenFailed {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Connector for WebSocketConnector {
    fn connect<'a>(
        &'a self,
        key: &'a DownloadKey,
        source: &'a SourceParams,
    ) -> BoxFuture<'a, Result<Box<dyn Transport>, ChannelError>> {
        Box::pin(async move {
            let (mut socket, _response) = connect_async(self.endpoint.as_str())
                .await
                .map_err(|e| self.open_failed(e))?;

            socket
                .send(Message::Text(start_request(key, source)))
                .await
                .map_err(|e| self.open_failed(e))?;

            info!(key = %key, endpoint = %self.endpoint, "Progress channel connected");
            Ok::<Box<dyn Transport>, ChannelError>(Box::new(WebSocketTransport { socket }))
        })
    }
}

struct WebSocketTransport {
    socket: Socket,
}

impl Transport for WebSocketTransport {
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, ChannelError>>> {
        Box::pin(async move {
            loop {
                let message = match self.socket.next().await {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => return Some(Err(ChannelError::Transport(e.to_string()))),
                    None => return None,
                };

                match message {
                    Message::Text(text) => return Some(Ok(text)),
                    Message::Binary(data) => match String::from_utf8(data) {
                        Ok(text) => return Some(Ok(text)),
                        Err(e) => {
                            warn!(error = %e, "Discarding binary frame that is not UTF-8");
                            continue;
                        }
                    },
                    Message::Close(frame) => {
                        debug!(?frame, "Server closed progress channel");
                        return None;
                    }
                    // tungstenite answers pings itself
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                }
            }
        })
    }

    fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            self.socket
                .send(Message::Text(text))
                .await
                .map_err(|e| ChannelError::Transport(e.to_string()))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.socket.close(None).await {
                debug!(error = %e, "Error closing progress channel");
            }
        })
    }
}
