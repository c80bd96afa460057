//! Bridge configuration
//!
//! All delays are empirically chosen windows, not engine-provided signals.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables shared by the pool and every playback session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum number of idle player instances kept for reuse
    pub pool_capacity: usize,
    /// Position tick cadence (ms)
    pub position_interval_ms: u64,
    /// Settle window before an audio selection is verified (ms)
    pub selection_settle_ms: u64,
    /// Forced source refreshes allowed per selection request
    pub max_forced_refreshes: u32,
    /// Delay before a manual track refresh reads the engine (ms)
    pub track_refresh_delay_ms: u64,
    /// Delay before the single retry of an empty manual refresh (ms)
    pub track_refresh_retry_ms: u64,
    /// Tick pause after a low-memory signal (ms)
    pub low_memory_cooldown_ms: u64,
    /// Tick pause after a critical memory signal (ms)
    pub critical_memory_cooldown_ms: u64,
    /// Default controller auto-hide timeout (ms)
    pub controller_timeout_ms: u32,
    /// Autoplay when construction parameters do not say
    pub default_autoplay: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 3,
            position_interval_ms: 500,
            selection_settle_ms: 1000,
            max_forced_refreshes: 1,
            track_refresh_delay_ms: 1000,
            track_refresh_retry_ms: 2000,
            low_memory_cooldown_ms: 1000,
            critical_memory_cooldown_ms: 2000,
            controller_timeout_ms: 3000,
            default_autoplay: true,
        }
    }
}

impl BridgeConfig {
    /// Parse a (possibly partial) JSON document over the defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.position_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "position_interval_ms must be greater than zero".into(),
            ));
        }
        if self.selection_settle_ms == 0 {
            return Err(Error::InvalidConfig(
                "selection_settle_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms)
    }

    pub fn selection_settle(&self) -> Duration {
        Duration::from_millis(self.selection_settle_ms)
    }

    pub fn track_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.track_refresh_delay_ms)
    }

    pub fn track_refresh_retry(&self) -> Duration {
        Duration::from_millis(self.track_refresh_retry_ms)
    }
}

/// Construction-time parameters sent by the host when a view is created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    #[serde(rename = "videoPath")]
    pub source: Option<String>,
    #[serde(rename = "autoPlay")]
    pub autoplay: Option<bool>,
    #[serde(rename = "startPosition")]
    pub start_position_ms: Option<u64>,
}

impl SessionParams {
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    pub fn autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = Some(autoplay);
        self
    }

    pub fn start_at(mut self, position_ms: u64) -> Self {
        self.start_position_ms = Some(position_ms);
        self
    }
}
