//! Download tracking.
//!
//! # Architecture
//!
//! ```text
//! DownloadCoordinator ──commands──► coordinator loop ──owns──► Registry
//!        (Clone)                         ▲                       │
//!                                        │ frames                │ notify
//!                               ProgressChannel pumps            ▼
//!                                                         Subscription listeners
//!                                                                │
//!                                              DownloadStore ◄───┘ (read-only)
//! ```
//!
//! - `key` / `frame` / `record` - value types: keys, wire frames, records
//! - `transition` - the progress state machine, a pure function
//! - `registry` / `subscribe` - the record map and change notification
//! - `coordinator` - the public operation surface and its loop
//! - `projection` - record to display view
//! - `size` - optional size hints for new records

mod coordinator;
mod error;
mod frame;
mod key;
pub mod projection;
mod record;
mod registry;
mod size;
mod subscribe;
mod transition;

pub use coordinator::{CoordinatorBuilder, CoordinatorConfig, DownloadCoordinator, DEFAULT_CONNECT_TIMEOUT};
pub use error::DownloadError;
pub use frame::{FrameError, FrameStatus, ProgressFrame};
pub use key::{DownloadKey, SourceParams};
pub use record::{DownloadRecord, DownloadStatus};
pub use registry::DownloadStore;
pub use size::{ArtifactSizeResolver, NoSizeHints};
pub use subscribe::{RegistryEvent, RegistryEvents, Subscription};
pub use transition::apply_frame;
