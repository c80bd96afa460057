//! KJ Player Core - Embedded Media Player Bridge
//!
//! This crate provides the host-facing side of an embedded video player:
//! - Pooling of heavyweight player instances across views
//! - Track discovery across mapped and currently-playing views
//! - Audio/subtitle selection with settle-and-verify
//! - Per-view playback sessions speaking a method/event wire protocol
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        KJ Player Core                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   host ──MethodCall──▶ ┌─────────────┐ ──BridgeEvent──▶ host     │
//! │                        │  Playback   │                          │
//! │                        │   Session   │                          │
//! │                        └──────┬──────┘                          │
//! │                               │                                 │
//! │  ┌──────────────┐  ┌──────────┴───┐  ┌──────────────┐           │
//! │  │    Track     │  │    Player    │  │    Track     │           │
//! │  │   Catalog    │  │     Pool     │  │   Selector   │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         └─────────────────┼─────────────────┘                   │
//! │                    ┌──────┴──────┐                              │
//! │                    │ MediaEngine │                              │
//! │                    └─────────────┘                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod engine;
pub mod pool;
pub mod tracks;
pub mod selector;
pub mod bridge;
pub mod session;
pub mod surface;
pub mod volume;
pub mod thumbnail;

pub use error::{EngineError, Error, ErrorKind, Result};
pub use types::*;
pub use config::{BridgeConfig, SessionParams};
pub use engine::{EngineEvent, EngineFactory, EngineState, MediaEngine};
pub use pool::{PlayerLease, PlayerPool, PoolStats};
pub use tracks::CatalogBuilder;
pub use selector::{TrackSelector, VerifyOutcome};
pub use bridge::{
    BridgeEvent, Command, EventEnvelope, HostChannel, JsonLinesChannel, MethodCall, Reply,
};
pub use session::{Lifecycle, PlaybackSession, SessionServices};
pub use surface::{HeadlessSurface, PlayerSurface};
pub use volume::{FixedSystemVolume, SystemVolume};
pub use thumbnail::{PatternThumbnails, ThumbnailExtractor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the player library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "KJ Player Core initialized");
}
