//! Event bridge
//!
//! Inbound method calls are parsed into typed [`Command`]s; outbound
//! notifications are typed [`BridgeEvent`]s wrapped in a sequenced
//! [`EventEnvelope`] and handed to a [`HostChannel`].

use crate::engine::EngineState;
use crate::{EngineError, Error, ErrorKind, MediaSource, ResizeMode, Result, SessionId, TrackCatalog};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Error code carried by load failures
pub const LOAD_ERROR_CODE: i32 = -1;

// =============================================================================
// Inbound
// =============================================================================

/// A raw call from the host: method name plus an argument map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    pub fn bare(method: impl Into<String>) -> Self {
        Self::new(method, Value::Null)
    }

    fn raw(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name).filter(|v| !v.is_null())
    }

    fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.raw(name)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| {
                    Error::invalid_args(&self.method, format!("{name}: {e}"))
                })
            })
            .transpose()
    }

    fn required<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.arg(name)?
            .ok_or_else(|| Error::invalid_args(&self.method, format!("{name} cannot be null")))
    }

    /// Any JSON number, truncated toward zero and floored at zero
    fn millis(&self, name: &str) -> Result<Option<u64>> {
        match self.raw(name) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .or_else(|| v.as_f64().map(|f| f.max(0.0) as u64))
                .map(Some)
                .ok_or_else(|| Error::invalid_args(&self.method, format!("{name} must be a number"))),
        }
    }

    fn ratio(&self, name: &str, default: f32) -> Result<f32> {
        Ok(self.arg::<f64>(name)?.map_or(default, |v| v as f32))
    }
}

/// Every command a session accepts
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    SeekTo { position_ms: u64 },
    SetPlaybackSpeed { speed: f32 },
    SetVolume { volume: f32 },
    SetResizeMode { mode: ResizeMode },
    GetCurrentPosition,
    GetDuration,
    IsPlaying,
    ShowControls,
    HideControls,
    SetControllerTimeout { timeout_ms: u32 },
    SetVideoTitle { title: String },
    EnterFullscreen,
    GetTracks,
    GetTracksFromPlayer,
    RefreshTracks,
    /// Global index; anything that addresses no track is ignored
    SetAudioTrack { index: i64 },
    GetSelectedAudioTrackIndex,
    SetSubtitleTrack { index: i64 },
    DisableSubtitle,
    AddMediaItems { items: Vec<MediaSource> },
    RemoveMediaItem { index: usize },
    SeekToNext,
    SeekToPrevious,
    SeekToMediaItem { index: usize },
    ClearPlaylist,
    GetThumbnail { position_ms: u64 },
    Preload { source: String },
    ReleasePlayer { source: String },
    GetSystemVolume,
    SetSystemVolume { volume: f32 },
    DebugAudioTracks,
    DebugCurrentAudioTrack,
    Dispose,
}

impl Command {
    /// Parse a method call, applying argument defaults
    pub fn parse(call: &MethodCall) -> Result<Self> {
        let command = match call.method.as_str() {
            "play" => Command::Play,
            "pause" => Command::Pause,
            "seekTo" => Command::SeekTo {
                position_ms: call.millis("position")?.unwrap_or(0),
            },
            "setPlaybackSpeed" => Command::SetPlaybackSpeed {
                speed: call.ratio("speed", 1.0)?,
            },
            "setVolume" => Command::SetVolume {
                volume: call.ratio("volume", 1.0)?,
            },
            "setResizeMode" => {
                let name = call.arg::<String>("mode")?;
                let mode = name.as_deref().and_then(ResizeMode::from_name).unwrap_or_else(|| {
                    warn!(mode = ?name, "Unknown resize mode, using fit");
                    ResizeMode::Fit
                });
                Command::SetResizeMode { mode }
            }
            "getCurrentPosition" => Command::GetCurrentPosition,
            "getDuration" => Command::GetDuration,
            "isPlaying" => Command::IsPlaying,
            "showControls" => Command::ShowControls,
            "hideControls" => Command::HideControls,
            "setControllerTimeout" => Command::SetControllerTimeout {
                timeout_ms: call.arg("timeout")?.unwrap_or(3000),
            },
            "setVideoTitle" => Command::SetVideoTitle {
                title: call.arg("title")?.unwrap_or_else(|| "Video".to_string()),
            },
            "enterFullscreen" => Command::EnterFullscreen,
            "getTracks" => Command::GetTracks,
            "getTracksFromPlayer" => Command::GetTracksFromPlayer,
            "refreshTracks" => Command::RefreshTracks,
            "setAudioTrack" => Command::SetAudioTrack {
                index: call.arg("index")?.unwrap_or(0),
            },
            "getSelectedAudioTrackIndex" => Command::GetSelectedAudioTrackIndex,
            "setSubtitleTrack" => Command::SetSubtitleTrack {
                index: call.arg("index")?.unwrap_or(0),
            },
            "disableSubtitle" => Command::DisableSubtitle,
            "addMediaItems" => {
                let uris: Vec<String> = call.required("mediaItems")?;
                Command::AddMediaItems {
                    items: uris.into_iter().map(MediaSource::from_uri).collect(),
                }
            }
            "removeMediaItem" => Command::RemoveMediaItem {
                index: call.required("index")?,
            },
            "seekToNext" => Command::SeekToNext,
            "seekToPrevious" => Command::SeekToPrevious,
            "seekToMediaItem" => Command::SeekToMediaItem {
                index: call.required("index")?,
            },
            "clearPlaylist" => Command::ClearPlaylist,
            "getThumbnail" => Command::GetThumbnail {
                position_ms: call.millis("position")?.ok_or_else(|| {
                    Error::invalid_args(&call.method, "position cannot be null")
                })?,
            },
            "preload" => Command::Preload {
                source: call.required("videoPath")?,
            },
            "releasePlayer" => Command::ReleasePlayer {
                source: call.required("videoPath")?,
            },
            "getSystemVolume" => Command::GetSystemVolume,
            "setSystemVolume" => Command::SetSystemVolume {
                volume: call.ratio("volume", 0.7)?,
            },
            "debugAudioTracks" => Command::DebugAudioTracks,
            "debugCurrentAudioTrack" => Command::DebugCurrentAudioTrack,
            "dispose" => Command::Dispose,
            other => return Err(Error::NotImplemented(other.to_string())),
        };
        Ok(command)
    }

    /// Wire name of the command
    pub fn method(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::SeekTo { .. } => "seekTo",
            Command::SetPlaybackSpeed { .. } => "setPlaybackSpeed",
            Command::SetVolume { .. } => "setVolume",
            Command::SetResizeMode { .. } => "setResizeMode",
            Command::GetCurrentPosition => "getCurrentPosition",
            Command::GetDuration => "getDuration",
            Command::IsPlaying => "isPlaying",
            Command::ShowControls => "showControls",
            Command::HideControls => "hideControls",
            Command::SetControllerTimeout { .. } => "setControllerTimeout",
            Command::SetVideoTitle { .. } => "setVideoTitle",
            Command::EnterFullscreen => "enterFullscreen",
            Command::GetTracks => "getTracks",
            Command::GetTracksFromPlayer => "getTracksFromPlayer",
            Command::RefreshTracks => "refreshTracks",
            Command::SetAudioTrack { .. } => "setAudioTrack",
            Command::GetSelectedAudioTrackIndex => "getSelectedAudioTrackIndex",
            Command::SetSubtitleTrack { .. } => "setSubtitleTrack",
            Command::DisableSubtitle => "disableSubtitle",
            Command::AddMediaItems { .. } => "addMediaItems",
            Command::RemoveMediaItem { .. } => "removeMediaItem",
            Command::SeekToNext => "seekToNext",
            Command::SeekToPrevious => "seekToPrevious",
            Command::SeekToMediaItem { .. } => "seekToMediaItem",
            Command::ClearPlaylist => "clearPlaylist",
            Command::GetThumbnail { .. } => "getThumbnail",
            Command::Preload { .. } => "preload",
            Command::ReleasePlayer { .. } => "releasePlayer",
            Command::GetSystemVolume => "getSystemVolume",
            Command::SetSystemVolume { .. } => "setSystemVolume",
            Command::DebugAudioTracks => "debugAudioTracks",
            Command::DebugCurrentAudioTrack => "debugCurrentAudioTrack",
            Command::Dispose => "dispose",
        }
    }
}

/// Successful command result
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Unit,
    Bool(bool),
    Position(u64),
    Duration(Option<u64>),
    Index(Option<usize>),
    Volume(f32),
    Tracks(TrackCatalog),
    Thumbnail(Bytes),
}

impl Reply {
    /// JSON form; thumbnails become a byte array
    pub fn to_value(&self) -> Value {
        match self {
            Reply::Unit => Value::Null,
            Reply::Bool(b) => json!(b),
            Reply::Position(p) => json!(p),
            Reply::Duration(d) => json!(d),
            Reply::Index(i) => json!(i),
            Reply::Volume(v) => json!(v),
            Reply::Tracks(catalog) => serde_json::to_value(catalog).unwrap_or(Value::Null),
            Reply::Thumbnail(bytes) => json!(bytes.as_ref()),
        }
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Payload of `onPlaybackStateChanged`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatePayload {
    pub state: &'static str,
    pub is_playing: bool,
    pub is_buffering: bool,
    pub buffered_percentage: u8,
    pub buffered_position: u64,
}

/// Payload of `onError`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error: String,
    pub error_code: i32,
    pub error_kind: ErrorKind,
}

impl ErrorPayload {
    pub fn load_failed(message: impl std::fmt::Display) -> Self {
        Self {
            error: format!("Failed to load video: {message}"),
            error_code: LOAD_ERROR_CODE,
            error_kind: ErrorKind::LoadFailed,
        }
    }

    pub fn playback(error: &EngineError) -> Self {
        Self {
            error: error.message.clone(),
            error_code: error.code,
            error_kind: error.kind(),
        }
    }
}

/// Payload of `onTracksChanged`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracksPayload {
    #[serde(flatten)]
    pub catalog: TrackCatalog,
    /// The audio marker was forced rather than reported by the engine
    pub forced_selection: bool,
}

/// Notifications sent to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", content = "arguments")]
pub enum BridgeEvent {
    #[serde(rename = "onPlayingChanged")]
    PlayingChanged(bool),
    #[serde(rename = "onLoadingChanged")]
    LoadingChanged {
        #[serde(rename = "isLoading")]
        is_loading: bool,
    },
    #[serde(rename = "onPlaybackStateChanged")]
    PlaybackStateChanged(PlaybackStatePayload),
    #[serde(rename = "onError")]
    Error(ErrorPayload),
    #[serde(rename = "onPositionChanged")]
    PositionChanged { position: u64, duration: u64 },
    #[serde(rename = "onVideoSizeChanged")]
    VideoSizeChanged {
        width: u32,
        height: u32,
        #[serde(rename = "pixelWidthHeightRatio")]
        pixel_ratio: f32,
    },
    #[serde(rename = "onRenderedFirstFrame")]
    RenderedFirstFrame,
    #[serde(rename = "onTracksChanged")]
    TracksChanged(TracksPayload),
    #[serde(rename = "onSystemVolumeChanged")]
    SystemVolumeChanged { volume: f32 },
}

impl BridgeEvent {
    pub fn playback_state(
        state: EngineState,
        is_playing: bool,
        buffered_percentage: u8,
        buffered_position: u64,
    ) -> Self {
        BridgeEvent::PlaybackStateChanged(PlaybackStatePayload {
            state: state.wire_name(),
            is_playing,
            is_buffering: state == EngineState::Buffering,
            buffered_percentage,
            buffered_position,
        })
    }

    pub fn tracks(catalog: TrackCatalog, forced_selection: bool) -> Self {
        BridgeEvent::TracksChanged(TracksPayload {
            catalog,
            forced_selection,
        })
    }

    /// Wire name of the event
    pub fn method(&self) -> &'static str {
        match self {
            BridgeEvent::PlayingChanged(_) => "onPlayingChanged",
            BridgeEvent::LoadingChanged { .. } => "onLoadingChanged",
            BridgeEvent::PlaybackStateChanged(_) => "onPlaybackStateChanged",
            BridgeEvent::Error(_) => "onError",
            BridgeEvent::PositionChanged { .. } => "onPositionChanged",
            BridgeEvent::VideoSizeChanged { .. } => "onVideoSizeChanged",
            BridgeEvent::RenderedFirstFrame => "onRenderedFirstFrame",
            BridgeEvent::TracksChanged(_) => "onTracksChanged",
            BridgeEvent::SystemVolumeChanged { .. } => "onSystemVolumeChanged",
        }
    }
}

/// A sequenced, timestamped notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub session_id: SessionId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: BridgeEvent,
}

/// Failure to hand a notification to the host
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("host channel closed")]
    Closed,
    #[error("host channel write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound notification transport
pub trait HostChannel: Send + Sync {
    fn notify(&self, envelope: &EventEnvelope) -> std::result::Result<(), ChannelError>;
}

impl HostChannel for mpsc::UnboundedSender<EventEnvelope> {
    fn notify(&self, envelope: &EventEnvelope) -> std::result::Result<(), ChannelError> {
        self.send(envelope.clone()).map_err(|_| ChannelError::Closed)
    }
}

/// Writes one JSON document per line
pub struct JsonLinesChannel<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesChannel<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> HostChannel for JsonLinesChannel<W> {
    fn notify(&self, envelope: &EventEnvelope) -> std::result::Result<(), ChannelError> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, envelope)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Per-session emitter stamping envelopes in emission order
pub struct EventSink {
    session_id: SessionId,
    sequence: u64,
    channel: Arc<dyn HostChannel>,
}

impl EventSink {
    pub fn new(session_id: SessionId, channel: Arc<dyn HostChannel>) -> Self {
        Self {
            session_id,
            sequence: 0,
            channel,
        }
    }

    /// Send `event`; transport failures are logged and swallowed
    pub fn emit(&mut self, event: BridgeEvent) {
        self.sequence += 1;
        let envelope = EventEnvelope {
            session_id: self.session_id,
            sequence: self.sequence,
            timestamp: Utc::now(),
            event,
        };
        match self.channel.notify(&envelope) {
            Ok(()) => debug!(
                session_id = %self.session_id,
                sequence = self.sequence,
                method = envelope.event.method(),
                "Event sent"
            ),
            Err(e) => warn!(
                session_id = %self.session_id,
                method = envelope.event.method(),
                error = %e,
                "Dropping event"
            ),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("session_id", &self.session_id)
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(method: &str, arguments: Value) -> Result<Command> {
        Command::parse(&MethodCall::new(method, arguments))
    }

    #[test]
    fn test_defaults_applied() {
        assert_eq!(
            parse("setPlaybackSpeed", Value::Null).unwrap(),
            Command::SetPlaybackSpeed { speed: 1.0 }
        );
        assert_eq!(
            parse("setSystemVolume", json!({})).unwrap(),
            Command::SetSystemVolume { volume: 0.7 }
        );
        assert_eq!(
            parse("setControllerTimeout", json!({})).unwrap(),
            Command::SetControllerTimeout { timeout_ms: 3000 }
        );
        assert_eq!(
            parse("setAudioTrack", json!({ "index": null })).unwrap(),
            Command::SetAudioTrack { index: 0 }
        );
        assert_eq!(parse("seekTo", json!({})).unwrap(), Command::SeekTo { position_ms: 0 });
    }

    #[test]
    fn test_negative_track_index_is_not_an_argument_error() {
        assert_eq!(
            parse("setAudioTrack", json!({ "index": -1 })).unwrap(),
            Command::SetAudioTrack { index: -1 }
        );
        assert_eq!(
            parse("setSubtitleTrack", json!({ "index": -1 })).unwrap(),
            Command::SetSubtitleTrack { index: -1 }
        );
    }

    #[test]
    fn test_title_and_debug_commands() {
        assert_eq!(
            parse("setVideoTitle", json!({})).unwrap(),
            Command::SetVideoTitle { title: "Video".to_string() }
        );
        assert_eq!(
            parse("setVideoTitle", json!({ "title": "Trailer" })).unwrap(),
            Command::SetVideoTitle { title: "Trailer".to_string() }
        );
        assert_eq!(parse("enterFullscreen", Value::Null).unwrap(), Command::EnterFullscreen);
        assert_eq!(parse("debugAudioTracks", Value::Null).unwrap(), Command::DebugAudioTracks);
        assert_eq!(
            parse("debugCurrentAudioTrack", Value::Null).unwrap().method(),
            "debugCurrentAudioTrack"
        );
    }

    #[test]
    fn test_numeric_positions() {
        assert_eq!(
            parse("seekTo", json!({ "position": 1500 })).unwrap(),
            Command::SeekTo { position_ms: 1500 }
        );
        assert_eq!(
            parse("seekTo", json!({ "position": 2500.7 })).unwrap(),
            Command::SeekTo { position_ms: 2500 }
        );
    }

    #[test]
    fn test_missing_required_arguments() {
        for method in ["removeMediaItem", "seekToMediaItem", "getThumbnail", "preload", "releasePlayer", "addMediaItems"] {
            let err = parse(method, json!({})).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_ARGUMENTS", "{method}");
        }
    }

    #[test]
    fn test_wrong_type_is_invalid() {
        let err = parse("removeMediaItem", json!({ "index": "two" })).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENTS");
    }

    #[test]
    fn test_unknown_method() {
        let err = parse("enterHyperspace", Value::Null).unwrap_err();
        assert_eq!(err.error_code(), "NOT_IMPLEMENTED");
    }

    #[test]
    fn test_unknown_resize_mode_falls_back_to_fit() {
        assert_eq!(
            parse("setResizeMode", json!({ "mode": "cover" })).unwrap(),
            Command::SetResizeMode { mode: ResizeMode::Fit }
        );
        assert_eq!(
            parse("setResizeMode", json!({ "mode": "zoomToFill" })).unwrap(),
            Command::SetResizeMode { mode: ResizeMode::ZoomToFill }
        );
    }

    #[test]
    fn test_media_items() {
        let command = parse("addMediaItems", json!({ "mediaItems": ["a.mp4", "b.mp4"] })).unwrap();
        assert_eq!(
            command,
            Command::AddMediaItems {
                items: vec![MediaSource::from_uri("a.mp4"), MediaSource::from_uri("b.mp4")]
            }
        );
        assert_eq!(command.method(), "addMediaItems");
    }

    #[test]
    fn test_event_wire_shape() {
        let envelope = EventEnvelope {
            session_id: SessionId::new(),
            sequence: 3,
            timestamp: Utc::now(),
            event: BridgeEvent::PlayingChanged(true),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["method"], "onPlayingChanged");
        assert_eq!(value["arguments"], true);
        assert_eq!(value["sequence"], 3);

        let value = serde_json::to_value(BridgeEvent::Error(ErrorPayload::load_failed("boom"))).unwrap();
        assert_eq!(value["arguments"]["error"], "Failed to load video: boom");
        assert_eq!(value["arguments"]["errorCode"], -1);
        assert_eq!(value["arguments"]["errorKind"], "loadFailed");
    }

    #[test]
    fn test_json_lines_channel() {
        let channel = JsonLinesChannel::new(Vec::new());
        let envelope = EventEnvelope {
            session_id: SessionId::new(),
            sequence: 1,
            timestamp: Utc::now(),
            event: BridgeEvent::RenderedFirstFrame,
        };
        channel.notify(&envelope).unwrap();
        channel.notify(&envelope).unwrap();

        let out = String::from_utf8(channel.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["method"], "onRenderedFirstFrame");
    }

    #[test]
    fn test_sink_swallows_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel::<EventEnvelope>();
        drop(rx);
        let mut sink = EventSink::new(SessionId::new(), Arc::new(tx));
        sink.emit(BridgeEvent::RenderedFirstFrame);
        assert_eq!(sink.sequence(), 1);
    }
}
