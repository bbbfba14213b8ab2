//! hubsync - download tracking for model repositories
//!
//! This library tracks downloads of remote artifacts (model repositories)
//! that are performed by a server and reported back over one push channel per
//! artifact. It provides:
//!
//! - `download` - the registry, coordinator, state machine and subscription
//!   layer that turn channel frames into per-key download records
//! - `channel` - the per-key channel adapter and its transports (WebSocket,
//!   in-memory)
//! - `config` - the INI configuration file
//! - `logging` - tracing subscriber setup
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hubsync::channel::WebSocketConnector;
//! use hubsync::download::{DownloadCoordinator, DownloadKey, SourceParams};
//!
//! let connector = Arc::new(WebSocketConnector::new("ws://127.0.0.1:8188/ws/downloads"));
//! let coordinator = DownloadCoordinator::builder(connector).spawn();
//!
//! let _subscription = coordinator.store().subscribe(|event| {
//!     println!("changed: {}", event.key());
//! });
//!
//! let source = SourceParams::new("org/model", "checkpoints");
//! coordinator.start_download(DownloadKey::for_source(&source), source)?;
//! ```

pub mod channel;
pub mod config;
pub mod download;
pub mod logging;
