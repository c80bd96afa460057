//! Core types for KJ Player

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier a player instance is pooled under, usually the canonical media path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKey(String);

impl SourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Unique key for sessions constructed without a source
    pub fn synthetic() -> Self {
        Self(format!("session-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A loadable media item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    pub uri: String,
    pub title: Option<String>,
}

impl MediaSource {
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Pool key for this source
    pub fn key(&self) -> SourceKey {
        SourceKey::new(self.uri.clone())
    }
}

// =============================================================================
// Track Types
// =============================================================================

/// Selectable media component kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

impl TrackKind {
    pub const ALL: [TrackKind; 3] = [TrackKind::Video, TrackKind::Audio, TrackKind::Subtitle];

    /// Classify a track group by the sample MIME type of its first format
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("video/") {
            Some(TrackKind::Video)
        } else if mime.starts_with("audio/") {
            Some(TrackKind::Audio)
        } else if mime.starts_with("text/")
            || mime.contains("subtitle")
            || mime.contains("vtt")
            || mime.contains("ttml")
        {
            Some(TrackKind::Subtitle)
        } else {
            None
        }
    }

    /// Name used for tracks that carry no label
    pub fn fallback_label(&self) -> &'static str {
        match self {
            TrackKind::Video => "Video Track",
            TrackKind::Audio => "Audio Track",
            TrackKind::Subtitle => "Subtitle Track",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Subtitle => write!(f, "subtitle"),
        }
    }
}

/// Position of a track inside the engine's mapping
///
/// Only valid until the next tracks-changed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackAddress {
    /// Renderer index; absent for tracks discovered from the active-groups view
    #[serde(rename = "rendererIndex", skip_serializing_if = "Option::is_none", default)]
    pub renderer: Option<usize>,
    #[serde(rename = "groupIndex")]
    pub group: usize,
    #[serde(rename = "index")]
    pub track: usize,
}

/// Format metrics relevant to the track kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormatMetrics {
    Video {
        width: u32,
        height: u32,
        #[serde(rename = "frameRate")]
        frame_rate: f32,
    },
    Audio {
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        #[serde(rename = "channelCount")]
        channel_count: u16,
    },
    Text {},
}

/// One selectable media component in a [`TrackCatalog`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDescriptor {
    pub kind: TrackKind,
    #[serde(flatten)]
    pub address: Option<TrackAddress>,
    pub name: String,
    pub language: String,
    pub codec: String,
    pub mime_type: String,
    pub bitrate: u32,
    #[serde(flatten)]
    pub metrics: FormatMetrics,
    #[serde(rename = "isSupported")]
    pub supported: bool,
    #[serde(rename = "isSelected")]
    pub selected: bool,
    /// Placeholder with no engine address; cannot be selected
    #[serde(default)]
    pub synthetic: bool,
}

/// Reconciled result of one track discovery pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackCatalog {
    #[serde(rename = "videoTracks")]
    pub video: Vec<TrackDescriptor>,
    #[serde(rename = "audioTracks")]
    pub audio: Vec<TrackDescriptor>,
    #[serde(rename = "subtitleTracks")]
    pub subtitle: Vec<TrackDescriptor>,
    #[serde(rename = "currentAudioTrackIndex")]
    pub selected_audio: Option<usize>,
}

impl TrackCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks(&self, kind: TrackKind) -> &[TrackDescriptor] {
        match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
            TrackKind::Subtitle => &self.subtitle,
        }
    }

    pub fn tracks_mut(&mut self, kind: TrackKind) -> &mut Vec<TrackDescriptor> {
        match kind {
            TrackKind::Video => &mut self.video,
            TrackKind::Audio => &mut self.audio,
            TrackKind::Subtitle => &mut self.subtitle,
        }
    }

    /// True when no kind has any track
    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty() && self.subtitle.is_empty()
    }

    /// Force the audio selection marker onto `index`
    ///
    /// Out-of-range indices leave the catalog untouched.
    pub fn mark_selected_audio(&mut self, index: usize) {
        if index >= self.audio.len() {
            return;
        }
        for (i, track) in self.audio.iter_mut().enumerate() {
            track.selected = i == index;
        }
        self.selected_audio = Some(index);
    }
}

// =============================================================================
// Session Types
// =============================================================================

/// Playback session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Created, no source requested yet
    Constructed,
    /// Source set, waiting for the engine
    Loading,
    Buffering,
    /// Prepared but not yet playing
    Ready,
    Playing,
    Paused,
    Ended,
    Disposed,
}

impl SessionState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        if *self == target {
            return false;
        }
        matches!(
            (self, target),
            // Any live state may be disposed or reloaded
            (Constructed | Loading | Buffering | Ready | Playing | Paused | Ended, Disposed) |
            (Buffering | Ready | Playing | Paused | Ended, Loading) |
            (Constructed, Loading) |
            // From Loading
            (Loading, Buffering) | (Loading, Ready) | (Loading, Playing) | (Loading, Ended) |
            // From Buffering
            (Buffering, Ready) | (Buffering, Playing) | (Buffering, Paused) | (Buffering, Ended) |
            // From Ready
            (Ready, Buffering) | (Ready, Playing) | (Ready, Paused) | (Ready, Ended) |
            // From Playing
            (Playing, Paused) | (Playing, Buffering) | (Playing, Ended) |
            // From Paused
            (Paused, Playing) | (Paused, Buffering) | (Paused, Ended) |
            // From Ended
            (Ended, Buffering) | (Ended, Ready) | (Ended, Playing) | (Ended, Paused)
        )
    }

    pub fn is_disposed(&self) -> bool {
        *self == SessionState::Disposed
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Constructed => write!(f, "constructed"),
            SessionState::Loading => write!(f, "loading"),
            SessionState::Buffering => write!(f, "buffering"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Playing => write!(f, "playing"),
            SessionState::Paused => write!(f, "paused"),
            SessionState::Ended => write!(f, "ended"),
            SessionState::Disposed => write!(f, "disposed"),
        }
    }
}

/// Playback state saved on pause/stop for a warm resume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeState {
    pub position_ms: u64,
    pub media_item_index: usize,
    pub play_when_ready: bool,
}

/// How video output is scaled into the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResizeMode {
    #[default]
    Fit,
    Stretch,
    ZoomToFill,
}

impl ResizeMode {
    /// Parse the host's mode name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "fit" => Some(ResizeMode::Fit),
            "stretch" => Some(ResizeMode::Stretch),
            "zoomToFill" => Some(ResizeMode::ZoomToFill),
            _ => None,
        }
    }
}

/// OS memory pressure signal levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemoryPressure {
    RunningLow,
    RunningCritical,
    LowMemory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_kind_from_mime() {
        assert_eq!(TrackKind::from_mime("video/avc"), Some(TrackKind::Video));
        assert_eq!(TrackKind::from_mime("audio/mp4a-latm"), Some(TrackKind::Audio));
        assert_eq!(TrackKind::from_mime("text/vtt"), Some(TrackKind::Subtitle));
        assert_eq!(TrackKind::from_mime("application/ttml+xml"), Some(TrackKind::Subtitle));
        assert_eq!(TrackKind::from_mime("application/x-subrip-subtitle"), Some(TrackKind::Subtitle));
        assert_eq!(TrackKind::from_mime("application/id3"), None);
    }

    #[test]
    fn test_session_state_transitions() {
        use SessionState::*;
        assert!(Constructed.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Buffering));
        assert!(Buffering.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Playing));
        assert!(Playing.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Playing));
        assert!(Playing.can_transition_to(Ended));
        assert!(Ended.can_transition_to(Disposed));

        assert!(!Constructed.can_transition_to(Playing));
        assert!(!Disposed.can_transition_to(Loading));
        assert!(!Disposed.can_transition_to(Disposed));
    }

    #[test]
    fn test_resize_mode_names() {
        assert_eq!(ResizeMode::from_name("fit"), Some(ResizeMode::Fit));
        assert_eq!(ResizeMode::from_name("stretch"), Some(ResizeMode::Stretch));
        assert_eq!(ResizeMode::from_name("zoomToFill"), Some(ResizeMode::ZoomToFill));
        assert_eq!(ResizeMode::from_name("cover"), None);
    }

    #[test]
    fn test_mark_selected_audio() {
        let track = |name: &str| TrackDescriptor {
            kind: TrackKind::Audio,
            address: Some(TrackAddress { renderer: Some(1), group: 0, track: 0 }),
            name: name.to_string(),
            language: "en".to_string(),
            codec: "mp4a.40.2".to_string(),
            mime_type: "audio/mp4a-latm".to_string(),
            bitrate: 0,
            metrics: FormatMetrics::Audio { sample_rate: 48_000, channel_count: 2 },
            supported: true,
            selected: false,
            synthetic: false,
        };
        let mut catalog = TrackCatalog {
            audio: vec![track("a"), track("b")],
            ..Default::default()
        };

        catalog.mark_selected_audio(1);
        assert!(!catalog.audio[0].selected);
        assert!(catalog.audio[1].selected);
        assert_eq!(catalog.selected_audio, Some(1));

        catalog.mark_selected_audio(5);
        assert_eq!(catalog.selected_audio, Some(1));
    }

    #[test]
    fn test_catalog_wire_shape() {
        let catalog = TrackCatalog::new();
        let json = serde_json::to_value(&catalog).unwrap();
        assert!(json.get("videoTracks").is_some());
        assert!(json.get("audioTracks").is_some());
        assert!(json.get("subtitleTracks").is_some());
        assert!(json.get("currentAudioTrackIndex").unwrap().is_null());
    }
}
