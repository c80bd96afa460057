//! Media engine capability
//!
//! The decode/render engine is opaque. This module defines the surface the
//! bridge drives: playlist and transport control, state queries, the two
//! track-metadata views, and an event channel the engine feeds.

#[cfg(feature = "simulated")]
pub mod simulated;

#[cfg(feature = "simulated")]
pub use simulated::{
    MediaLibrary, SimulatedEngine, SimulatedEngineFactory, SimulatedEngineHandle, SimulatedMedia,
};

use crate::{EngineError, MediaSource, TrackKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc;

/// Sending half of an engine's event channel
pub type EngineListener = mpsc::UnboundedSender<EngineEvent>;

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineState {
    Idle,
    Buffering,
    Ready,
    Ended,
    Released,
}

impl EngineState {
    /// Wire name used in playback-state events
    pub fn wire_name(&self) -> &'static str {
        match self {
            EngineState::Idle => "IDLE",
            EngineState::Buffering => "BUFFERING",
            EngineState::Ready => "READY",
            EngineState::Ended => "ENDED",
            EngineState::Released => "RELEASED",
        }
    }
}

/// Discrete notifications emitted by an engine instance, in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    IsPlayingChanged(bool),
    IsLoadingChanged(bool),
    PlaybackStateChanged(EngineState),
    PlayerError(EngineError),
    PositionDiscontinuity { old_position_ms: u64, new_position_ms: u64 },
    VideoSizeChanged { width: u32, height: u32, pixel_ratio: f32 },
    RenderedFirstFrame,
    TracksChanged,
}

// =============================================================================
// Track Metadata
// =============================================================================

/// Format of one track variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackFormat {
    pub label: Option<String>,
    pub language: Option<String>,
    pub sample_mime_type: Option<String>,
    pub codecs: Option<String>,
    pub bitrate: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f32>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
}

impl TrackFormat {
    pub fn video(mime: &str, width: u32, height: u32, frame_rate: f32) -> Self {
        Self {
            sample_mime_type: Some(mime.to_string()),
            width: Some(width),
            height: Some(height),
            frame_rate: Some(frame_rate),
            ..Default::default()
        }
    }

    pub fn audio(mime: &str, language: &str, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_mime_type: Some(mime.to_string()),
            language: Some(language.to_string()),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Default::default()
        }
    }

    pub fn text(mime: &str, language: &str) -> Self {
        Self {
            sample_mime_type: Some(mime.to_string()),
            language: Some(language.to_string()),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_codecs(mut self, codecs: impl Into<String>) -> Self {
        self.codecs = Some(codecs.into());
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn kind(&self) -> Option<TrackKind> {
        self.sample_mime_type.as_deref().and_then(TrackKind::from_mime)
    }
}

/// Mutually exclusive variants of the same content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackGroup {
    pub formats: Vec<TrackFormat>,
}

impl TrackGroup {
    pub fn new(formats: Vec<TrackFormat>) -> Self {
        Self { formats }
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

/// Renderer pipeline stage kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RendererType {
    Video,
    Audio,
    Text,
    Metadata,
}

impl RendererType {
    pub fn track_kind(&self) -> Option<TrackKind> {
        match self {
            RendererType::Video => Some(TrackKind::Video),
            RendererType::Audio => Some(TrackKind::Audio),
            RendererType::Text => Some(TrackKind::Subtitle),
            RendererType::Metadata => None,
        }
    }
}

/// Engine's claimed ability to decode a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FormatSupport {
    #[default]
    Handled,
    ExceedsCapabilities,
    UnsupportedSubtype,
    Unsupported,
}

/// One renderer's view of the mapped track groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRenderer {
    pub renderer_type: RendererType,
    pub groups: Vec<TrackGroup>,
    /// Per group, per track support; missing entries count as handled
    #[serde(default)]
    pub support: Vec<Vec<FormatSupport>>,
}

impl MappedRenderer {
    pub fn new(renderer_type: RendererType, groups: Vec<TrackGroup>) -> Self {
        Self {
            renderer_type,
            groups,
            support: Vec::new(),
        }
    }

    pub fn track_support(&self, group: usize, track: usize) -> FormatSupport {
        self.support
            .get(group)
            .and_then(|g| g.get(track))
            .copied()
            .unwrap_or_default()
    }

    pub fn group_lengths(&self) -> Vec<usize> {
        self.groups.iter().map(TrackGroup::len).collect()
    }
}

/// Primary, renderer-oriented track view including tracks the engine has not surfaced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappedTrackInfo {
    pub renderers: Vec<MappedRenderer>,
}

impl MappedTrackInfo {
    pub fn renderer_count(&self) -> usize {
        self.renderers.len()
    }

    /// Index of the first renderer handling `kind`
    pub fn renderer_for(&self, kind: TrackKind) -> Option<usize> {
        self.renderers
            .iter()
            .position(|r| r.renderer_type.track_kind() == Some(kind))
    }
}

/// Secondary view: one currently active track group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentTrackGroup {
    pub group: TrackGroup,
    pub supported: Vec<bool>,
    pub selected: Vec<bool>,
}

impl CurrentTrackGroup {
    pub fn is_track_supported(&self, track: usize) -> bool {
        self.supported.get(track).copied().unwrap_or(false)
    }

    pub fn is_track_selected(&self, track: usize) -> bool {
        self.selected.get(track).copied().unwrap_or(false)
    }

    /// Kind inferred from the first format's MIME type
    pub fn kind(&self) -> Option<TrackKind> {
        self.group.formats.first().and_then(TrackFormat::kind)
    }
}

/// Explicit instruction forcing one track of one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionOverride {
    pub group: usize,
    pub track: usize,
}

/// Track selection parameters, keyed by renderer index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSelectionParameters {
    pub disabled_renderers: BTreeSet<usize>,
    pub overrides: BTreeMap<usize, SelectionOverride>,
}

impl TrackSelectionParameters {
    pub fn set_renderer_disabled(&mut self, renderer: usize, disabled: bool) -> &mut Self {
        if disabled {
            self.disabled_renderers.insert(renderer);
        } else {
            self.disabled_renderers.remove(&renderer);
        }
        self
    }

    pub fn set_override(&mut self, renderer: usize, selection: SelectionOverride) -> &mut Self {
        self.overrides.insert(renderer, selection);
        self
    }

    pub fn is_renderer_disabled(&self, renderer: usize) -> bool {
        self.disabled_renderers.contains(&renderer)
    }

    pub fn override_for(&self, renderer: usize) -> Option<SelectionOverride> {
        self.overrides.get(&renderer).copied()
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// An opaque decode/render engine instance
///
/// Calls never block on media work; progress is reported through the
/// listener channel.
pub trait MediaEngine: Send {
    /// Attach (or with `None`, detach) the event listener, replacing any previous one
    fn set_listener(&mut self, listener: Option<EngineListener>);

    // Playlist
    fn set_media_sources(&mut self, sources: Vec<MediaSource>) -> Result<(), EngineError>;
    fn add_media_sources(&mut self, sources: Vec<MediaSource>);
    fn remove_media_source(&mut self, index: usize);
    fn clear_media_sources(&mut self);
    fn media_sources(&self) -> Vec<MediaSource>;
    fn current_source(&self) -> Option<MediaSource>;
    fn current_item_index(&self) -> usize;
    fn item_count(&self) -> usize;

    // Transport
    fn prepare(&mut self);
    fn stop(&mut self);
    /// Free engine resources; the instance is unusable afterwards
    fn release(&mut self);
    fn set_play_when_ready(&mut self, play_when_ready: bool);
    fn play_when_ready(&self) -> bool;
    fn seek_to(&mut self, position_ms: u64);
    fn seek_to_item(&mut self, index: usize, position_ms: u64);
    fn seek_to_next(&mut self);
    fn seek_to_previous(&mut self);
    fn set_playback_speed(&mut self, speed: f32);
    fn set_volume(&mut self, volume: f32);

    fn play(&mut self) {
        self.set_play_when_ready(true);
    }

    fn pause(&mut self) {
        self.set_play_when_ready(false);
    }

    // State
    fn playback_state(&self) -> EngineState;
    fn is_playing(&self) -> bool;
    fn position_ms(&self) -> u64;
    fn duration_ms(&self) -> Option<u64>;
    fn buffered_position_ms(&self) -> u64;
    fn buffered_percentage(&self) -> u8;

    // Tracks
    fn mapped_track_info(&self) -> Option<MappedTrackInfo>;
    fn current_tracks(&self) -> Vec<CurrentTrackGroup>;
    /// Format of the audio currently being rendered, if any
    fn audio_format(&self) -> Option<TrackFormat>;
    fn selection_parameters(&self) -> TrackSelectionParameters;
    fn set_selection_parameters(&mut self, parameters: TrackSelectionParameters);

    /// True once [`MediaEngine::release`] has been called
    fn is_released(&self) -> bool {
        self.playback_state() == EngineState::Released
    }
}

/// Constructs engine instances; construction is the expensive step pooling avoids
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn MediaEngine>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renderer_lookup() {
        let info = MappedTrackInfo {
            renderers: vec![
                MappedRenderer::new(RendererType::Video, vec![]),
                MappedRenderer::new(RendererType::Audio, vec![]),
                MappedRenderer::new(RendererType::Text, vec![]),
            ],
        };
        assert_eq!(info.renderer_for(TrackKind::Audio), Some(1));
        assert_eq!(info.renderer_for(TrackKind::Subtitle), Some(2));
    }

    #[test]
    fn test_missing_support_counts_as_handled() {
        let renderer = MappedRenderer::new(
            RendererType::Audio,
            vec![TrackGroup::new(vec![TrackFormat::default()])],
        );
        assert_eq!(renderer.track_support(0, 0), FormatSupport::Handled);
    }

    #[test]
    fn test_selection_parameters() {
        let mut params = TrackSelectionParameters::default();
        params
            .set_renderer_disabled(2, true)
            .set_override(1, SelectionOverride { group: 0, track: 1 });
        assert!(params.is_renderer_disabled(2));
        assert_eq!(params.override_for(1), Some(SelectionOverride { group: 0, track: 1 }));

        params.set_renderer_disabled(2, false);
        assert!(!params.is_renderer_disabled(2));
    }
}
