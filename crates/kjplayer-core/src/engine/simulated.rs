//! Deterministic in-process engine
//!
//! Stands in for a hardware decoder on hosts without one. Media is described
//! up front through a [`MediaLibrary`]; every engine call updates shared
//! state and emits the notifications a real engine would, in the same order.

use super::{
    CurrentTrackGroup, EngineEvent, EngineFactory, EngineListener, EngineState, MappedRenderer,
    MappedTrackInfo, MediaEngine, RendererType, SelectionOverride, TrackFormat, TrackGroup,
    TrackSelectionParameters,
};
use crate::{EngineError, MediaSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Description of one piece of media the simulated engine can "decode"
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedMedia {
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
    pub video: Vec<TrackGroup>,
    pub audio: Vec<TrackGroup>,
    pub text: Vec<TrackGroup>,
    /// Refuse the source outright when it is set
    pub rejected: bool,
    /// Fault raised while preparing
    pub prepare_error: Option<EngineError>,
}

impl SimulatedMedia {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            width: 1920,
            height: 1080,
            video: Vec::new(),
            audio: Vec::new(),
            text: Vec::new(),
            rejected: false,
            prepare_error: None,
        }
    }

    /// Two minute clip with one video track, two audio languages and English subtitles
    pub fn sample() -> Self {
        Self::new(120_000)
            .with_video_group(vec![TrackFormat::video("video/avc", 1920, 1080, 30.0)
                .with_codecs("avc1.640028")
                .with_bitrate(4_000_000)])
            .with_audio_group(vec![
                TrackFormat::audio("audio/mp4a-latm", "en", 48_000, 2)
                    .with_label("English")
                    .with_codecs("mp4a.40.2")
                    .with_bitrate(128_000),
                TrackFormat::audio("audio/mp4a-latm", "es", 48_000, 2)
                    .with_label("Español")
                    .with_codecs("mp4a.40.2")
                    .with_bitrate(128_000),
            ])
            .with_text_group(vec![TrackFormat::text("text/vtt", "en").with_label("English CC")])
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_video_group(mut self, formats: Vec<TrackFormat>) -> Self {
        self.video.push(TrackGroup::new(formats));
        self
    }

    pub fn with_audio_group(mut self, formats: Vec<TrackFormat>) -> Self {
        self.audio.push(TrackGroup::new(formats));
        self
    }

    pub fn with_text_group(mut self, formats: Vec<TrackFormat>) -> Self {
        self.text.push(TrackGroup::new(formats));
        self
    }

    pub fn rejected(mut self) -> Self {
        self.rejected = true;
        self
    }

    pub fn failing_with(mut self, error: EngineError) -> Self {
        self.prepare_error = Some(error);
        self
    }

    fn groups(&self, renderer: RendererType) -> &[TrackGroup] {
        match renderer {
            RendererType::Video => &self.video,
            RendererType::Audio => &self.audio,
            RendererType::Text => &self.text,
            RendererType::Metadata => &[],
        }
    }
}

/// Media known to simulated engines, keyed by URI
#[derive(Debug, Clone)]
pub struct MediaLibrary {
    entries: HashMap<String, SimulatedMedia>,
    fallback: SimulatedMedia,
}

impl Default for MediaLibrary {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            fallback: SimulatedMedia::sample(),
        }
    }
}

impl MediaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_media(mut self, uri: impl Into<String>, media: SimulatedMedia) -> Self {
        self.entries.insert(uri.into(), media);
        self
    }

    /// Media used for URIs that were never registered
    pub fn with_fallback(mut self, media: SimulatedMedia) -> Self {
        self.fallback = media;
        self
    }

    pub fn lookup(&self, uri: &str) -> &SimulatedMedia {
        self.entries.get(uri).unwrap_or(&self.fallback)
    }
}

const RENDERERS: [RendererType; 3] = [RendererType::Video, RendererType::Audio, RendererType::Text];

#[derive(Debug)]
struct SimState {
    library: Arc<MediaLibrary>,
    listener: Option<EngineListener>,
    playlist: Vec<MediaSource>,
    index: usize,
    state: EngineState,
    prepared: bool,
    play_when_ready: bool,
    position_ms: u64,
    anchor: Option<Instant>,
    speed: f32,
    volume: f32,
    params: TrackSelectionParameters,
    // Knobs
    drop_overrides: u32,
    hide_mapped: bool,
    hide_audio_groups: bool,
    // Counters
    prepare_count: u32,
    selection_updates: u32,
}

impl SimState {
    fn new(library: Arc<MediaLibrary>) -> Self {
        Self {
            library,
            listener: None,
            playlist: Vec::new(),
            index: 0,
            state: EngineState::Idle,
            prepared: false,
            play_when_ready: false,
            position_ms: 0,
            anchor: None,
            speed: 1.0,
            volume: 1.0,
            params: TrackSelectionParameters::default(),
            drop_overrides: 0,
            hide_mapped: false,
            hide_audio_groups: false,
            prepare_count: 0,
            selection_updates: 0,
        }
    }

    fn emit(&self, event: EngineEvent) {
        trace!(?event, "Simulated engine event");
        if let Some(listener) = &self.listener {
            // A closed receiver means nobody is listening any more
            let _ = listener.send(event);
        }
    }

    fn media(&self) -> Option<&SimulatedMedia> {
        self.playlist
            .get(self.index)
            .map(|source| self.library.lookup(&source.uri))
    }

    fn is_playing(&self) -> bool {
        self.play_when_ready && self.state == EngineState::Ready
    }

    fn duration(&self) -> Option<u64> {
        if self.prepared {
            self.media().map(|m| m.duration_ms)
        } else {
            None
        }
    }

    fn position(&self) -> u64 {
        let mut position = self.position_ms;
        if let Some(anchor) = self.anchor {
            let elapsed = anchor.elapsed().as_millis() as f64 * f64::from(self.speed);
            position += elapsed as u64;
        }
        match self.duration() {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    /// Fold elapsed playback into the stored position and restart the clock
    fn settle(&mut self) {
        self.position_ms = self.position();
        self.anchor = self.is_playing().then(Instant::now);
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            let was_playing = self.is_playing();
            self.settle();
            self.state = state;
            self.anchor = self.is_playing().then(Instant::now);
            self.emit(EngineEvent::PlaybackStateChanged(state));
            if was_playing != self.is_playing() {
                self.emit(EngineEvent::IsPlayingChanged(self.is_playing()));
            }
        }
    }

    fn visible_groups(&self, renderer: RendererType) -> Vec<TrackGroup> {
        if !self.prepared || (renderer == RendererType::Audio && self.hide_audio_groups) {
            return Vec::new();
        }
        self.media()
            .map(|m| m.groups(renderer).to_vec())
            .unwrap_or_default()
    }

    /// Which (group, track) the renderer actually plays
    fn effective_selection(&self, renderer: usize) -> Option<SelectionOverride> {
        if self.params.is_renderer_disabled(renderer) {
            return None;
        }
        let kind = RENDERERS.get(renderer)?;
        let groups = self.visible_groups(*kind);
        if let Some(selection) = self.params.override_for(renderer) {
            let valid = groups
                .get(selection.group)
                .is_some_and(|g| selection.track < g.len());
            if valid {
                return Some(selection);
            }
        }
        match kind {
            RendererType::Text => None,
            _ => groups
                .iter()
                .position(|g| !g.is_empty())
                .map(|group| SelectionOverride { group, track: 0 }),
        }
    }

    fn reset_playback(&mut self) {
        self.prepared = false;
        self.position_ms = 0;
        self.anchor = None;
    }
}

/// Test and diagnostics handle onto a simulated engine's state
#[derive(Debug, Clone)]
pub struct SimulatedEngineHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedEngineHandle {
    /// Discard the overrides of the next `count` selection updates
    pub fn drop_overrides(&self, count: u32) {
        self.state.lock().drop_overrides = count;
    }

    /// Make the renderer-oriented track view unavailable
    pub fn hide_mapped_tracks(&self, hide: bool) {
        self.state.lock().hide_mapped = hide;
    }

    /// Hide audio groups from both track views while still rendering audio
    pub fn hide_audio_groups(&self, hide: bool) {
        self.state.lock().hide_audio_groups = hide;
    }

    /// Raise a playback fault
    pub fn raise_error(&self, error: EngineError) {
        let mut state = self.state.lock();
        state.emit(EngineEvent::PlayerError(error));
        state.set_state(EngineState::Idle);
    }

    /// Play through to the end of the current item
    pub fn complete(&self) {
        let mut state = self.state.lock();
        if let Some(duration) = state.duration() {
            state.position_ms = duration;
            state.anchor = None;
        }
        state.set_state(EngineState::Ended);
    }

    /// Emit an arbitrary notification
    pub fn emit(&self, event: EngineEvent) {
        self.state.lock().emit(event);
    }

    pub fn playlist(&self) -> Vec<MediaSource> {
        self.state.lock().playlist.clone()
    }

    pub fn playback_state(&self) -> EngineState {
        self.state.lock().state
    }

    pub fn play_when_ready(&self) -> bool {
        self.state.lock().play_when_ready
    }

    pub fn position_ms(&self) -> u64 {
        self.state.lock().position()
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn speed(&self) -> f32 {
        self.state.lock().speed
    }

    pub fn has_listener(&self) -> bool {
        self.state.lock().listener.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().state == EngineState::Released
    }

    pub fn prepare_count(&self) -> u32 {
        self.state.lock().prepare_count
    }

    pub fn selection_updates(&self) -> u32 {
        self.state.lock().selection_updates
    }

    pub fn selection_parameters(&self) -> TrackSelectionParameters {
        self.state.lock().params.clone()
    }
}

/// Engine backed by a [`MediaLibrary`]
pub struct SimulatedEngine {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedEngine {
    pub fn new(library: Arc<MediaLibrary>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(library))),
        }
    }

    pub fn handle(&self) -> SimulatedEngineHandle {
        SimulatedEngineHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MediaEngine for SimulatedEngine {
    fn set_listener(&mut self, listener: Option<EngineListener>) {
        self.state.lock().listener = listener;
    }

    fn set_media_sources(&mut self, sources: Vec<MediaSource>) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if let Some(source) = sources
            .iter()
            .find(|s| state.library.lookup(&s.uri).rejected)
        {
            return Err(EngineError::new(
                EngineError::IO_FILE_NOT_FOUND,
                format!("cannot open {}", source.uri),
            ));
        }
        debug!(count = sources.len(), "Setting media sources");
        let was_prepared = state.prepared;
        state.playlist = sources;
        state.index = 0;
        state.reset_playback();
        state.set_state(EngineState::Idle);
        if was_prepared {
            state.emit(EngineEvent::TracksChanged);
        }
        Ok(())
    }

    fn add_media_sources(&mut self, sources: Vec<MediaSource>) {
        self.state.lock().playlist.extend(sources);
    }

    fn remove_media_source(&mut self, index: usize) {
        let mut state = self.state.lock();
        if index >= state.playlist.len() {
            return;
        }
        state.playlist.remove(index);
        if index < state.index {
            state.index -= 1;
        } else if index == state.index && state.index >= state.playlist.len() {
            state.index = state.playlist.len().saturating_sub(1);
        }
    }

    fn clear_media_sources(&mut self) {
        let mut state = self.state.lock();
        let was_prepared = state.prepared;
        state.playlist.clear();
        state.index = 0;
        state.reset_playback();
        if was_prepared {
            state.emit(EngineEvent::TracksChanged);
            state.set_state(EngineState::Ended);
        }
    }

    fn media_sources(&self) -> Vec<MediaSource> {
        self.state.lock().playlist.clone()
    }

    fn current_source(&self) -> Option<MediaSource> {
        let state = self.state.lock();
        state.playlist.get(state.index).cloned()
    }

    fn current_item_index(&self) -> usize {
        self.state.lock().index
    }

    fn item_count(&self) -> usize {
        self.state.lock().playlist.len()
    }

    fn prepare(&mut self) {
        let mut state = self.state.lock();
        if state.state == EngineState::Released {
            return;
        }
        state.prepare_count += 1;
        let Some(media) = state.media().cloned() else {
            state.set_state(EngineState::Ended);
            return;
        };

        state.emit(EngineEvent::IsLoadingChanged(true));
        state.set_state(EngineState::Buffering);

        if let Some(error) = media.prepare_error {
            state.emit(EngineEvent::PlayerError(error));
            state.set_state(EngineState::Idle);
            state.emit(EngineEvent::IsLoadingChanged(false));
            return;
        }

        state.prepared = true;
        state.emit(EngineEvent::TracksChanged);
        state.emit(EngineEvent::VideoSizeChanged {
            width: media.width,
            height: media.height,
            pixel_ratio: 1.0,
        });
        state.set_state(EngineState::Ready);
        state.emit(EngineEvent::IsLoadingChanged(false));
        state.emit(EngineEvent::RenderedFirstFrame);
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        if state.state == EngineState::Released {
            return;
        }
        state.settle();
        state.prepared = false;
        state.anchor = None;
        state.set_state(EngineState::Idle);
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.settle();
        state.prepared = false;
        state.play_when_ready = false;
        state.anchor = None;
        state.state = EngineState::Released;
        state.listener = None;
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool) {
        let mut state = self.state.lock();
        if state.play_when_ready == play_when_ready {
            return;
        }
        let was_playing = state.is_playing();
        state.settle();
        state.play_when_ready = play_when_ready;
        state.anchor = state.is_playing().then(Instant::now);
        if was_playing != state.is_playing() {
            let playing = state.is_playing();
            state.emit(EngineEvent::IsPlayingChanged(playing));
        }
    }

    fn play_when_ready(&self) -> bool {
        self.state.lock().play_when_ready
    }

    fn seek_to(&mut self, position_ms: u64) {
        let mut state = self.state.lock();
        let old_position_ms = state.position();
        let new_position_ms = match state.duration() {
            Some(duration) => position_ms.min(duration),
            None => position_ms,
        };
        state.position_ms = new_position_ms;
        state.anchor = state.is_playing().then(Instant::now);
        state.emit(EngineEvent::PositionDiscontinuity {
            old_position_ms,
            new_position_ms,
        });
    }

    fn seek_to_item(&mut self, index: usize, position_ms: u64) {
        let mut state = self.state.lock();
        if index >= state.playlist.len() {
            return;
        }
        let old_position_ms = state.position();
        let changed = state.index != index;
        state.index = index;
        state.position_ms = position_ms;
        state.anchor = state.is_playing().then(Instant::now);
        state.emit(EngineEvent::PositionDiscontinuity {
            old_position_ms,
            new_position_ms: position_ms,
        });
        if changed && state.prepared {
            state.emit(EngineEvent::TracksChanged);
        }
    }

    fn seek_to_next(&mut self) {
        let (index, count) = {
            let state = self.state.lock();
            (state.index, state.playlist.len())
        };
        if index + 1 < count {
            self.seek_to_item(index + 1, 0);
        }
    }

    fn seek_to_previous(&mut self) {
        let index = self.state.lock().index;
        if index > 0 {
            self.seek_to_item(index - 1, 0);
        } else {
            self.seek_to(0);
        }
    }

    fn set_playback_speed(&mut self, speed: f32) {
        let mut state = self.state.lock();
        state.settle();
        state.speed = speed;
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().volume = volume.clamp(0.0, 1.0);
    }

    fn playback_state(&self) -> EngineState {
        self.state.lock().state
    }

    fn is_playing(&self) -> bool {
        self.state.lock().is_playing()
    }

    fn position_ms(&self) -> u64 {
        self.state.lock().position()
    }

    fn duration_ms(&self) -> Option<u64> {
        self.state.lock().duration()
    }

    fn buffered_position_ms(&self) -> u64 {
        let state = self.state.lock();
        let buffered = state.position() + 5_000;
        state.duration().map_or(0, |d| buffered.min(d))
    }

    fn buffered_percentage(&self) -> u8 {
        let buffered = self.buffered_position_ms();
        match self.duration_ms() {
            Some(duration) if duration > 0 => ((buffered * 100) / duration).min(100) as u8,
            _ => 0,
        }
    }

    fn mapped_track_info(&self) -> Option<MappedTrackInfo> {
        let state = self.state.lock();
        if !state.prepared || state.hide_mapped {
            return None;
        }
        let renderers = RENDERERS
            .iter()
            .map(|kind| MappedRenderer::new(*kind, state.visible_groups(*kind)))
            .collect();
        Some(MappedTrackInfo { renderers })
    }

    fn current_tracks(&self) -> Vec<CurrentTrackGroup> {
        let state = self.state.lock();
        let mut current = Vec::new();
        for (renderer, kind) in RENDERERS.iter().enumerate() {
            let selection = state.effective_selection(renderer);
            for (group_index, group) in state.visible_groups(*kind).into_iter().enumerate() {
                let selected = (0..group.len())
                    .map(|track| {
                        selection == Some(SelectionOverride { group: group_index, track })
                    })
                    .collect();
                current.push(CurrentTrackGroup {
                    supported: vec![true; group.len()],
                    selected,
                    group,
                });
            }
        }
        current
    }

    fn audio_format(&self) -> Option<TrackFormat> {
        let state = self.state.lock();
        if !state.prepared {
            return None;
        }
        let media = state.media()?;
        let selection = state
            .params
            .override_for(1)
            .filter(|_| !state.hide_audio_groups)
            .unwrap_or(SelectionOverride { group: 0, track: 0 });
        media
            .audio
            .get(selection.group)
            .and_then(|g| g.formats.get(selection.track))
            .or_else(|| media.audio.iter().flat_map(|g| g.formats.iter()).next())
            .cloned()
    }

    fn selection_parameters(&self) -> TrackSelectionParameters {
        self.state.lock().params.clone()
    }

    fn set_selection_parameters(&mut self, mut parameters: TrackSelectionParameters) {
        let mut state = self.state.lock();
        state.selection_updates += 1;
        if state.drop_overrides > 0 {
            state.drop_overrides -= 1;
            debug!("Discarding track overrides");
            parameters.overrides.clear();
        }
        state.params = parameters;
        if state.prepared {
            state.emit(EngineEvent::TracksChanged);
        }
    }
}

/// Factory producing [`SimulatedEngine`]s over a shared library
#[derive(Default)]
pub struct SimulatedEngineFactory {
    library: Arc<MediaLibrary>,
    created: Mutex<Vec<SimulatedEngineHandle>>,
}

impl SimulatedEngineFactory {
    pub fn new(library: MediaLibrary) -> Self {
        Self {
            library: Arc::new(library),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Number of engines constructed so far
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn handles(&self) -> Vec<SimulatedEngineHandle> {
        self.created.lock().clone()
    }

    pub fn last_handle(&self) -> Option<SimulatedEngineHandle> {
        self.created.lock().last().cloned()
    }
}

impl EngineFactory for SimulatedEngineFactory {
    fn create(&self) -> Result<Box<dyn MediaEngine>, EngineError> {
        let engine = SimulatedEngine::new(Arc::clone(&self.library));
        self.created.lock().push(engine.handle());
        Ok(Box::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_prepare_event_order() {
        let mut engine = SimulatedEngine::new(Arc::new(MediaLibrary::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.set_listener(Some(tx));
        engine
            .set_media_sources(vec![MediaSource::from_uri("a.mp4")])
            .unwrap();
        engine.set_play_when_ready(true);
        engine.prepare();

        let events = drain(&mut rx);
        assert_eq!(events[0], EngineEvent::IsLoadingChanged(true));
        assert_eq!(events[1], EngineEvent::PlaybackStateChanged(EngineState::Buffering));
        assert!(events.contains(&EngineEvent::TracksChanged));
        assert!(events.contains(&EngineEvent::PlaybackStateChanged(EngineState::Ready)));
        assert!(events.contains(&EngineEvent::IsPlayingChanged(true)));
        assert!(engine.is_playing());
    }

    #[test]
    fn test_mapped_view_requires_prepare() {
        let mut engine = SimulatedEngine::new(Arc::new(MediaLibrary::new()));
        engine
            .set_media_sources(vec![MediaSource::from_uri("a.mp4")])
            .unwrap();
        assert!(engine.mapped_track_info().is_none());

        engine.prepare();
        let info = engine.mapped_track_info().unwrap();
        assert_eq!(info.renderer_count(), 3);
        assert_eq!(info.renderers[1].groups[0].len(), 2);
    }

    #[test]
    fn test_rejected_source() {
        let library = MediaLibrary::new().with_media("bad.mp4", SimulatedMedia::sample().rejected());
        let mut engine = SimulatedEngine::new(Arc::new(library));
        let err = engine
            .set_media_sources(vec![MediaSource::from_uri("bad.mp4")])
            .unwrap_err();
        assert_eq!(err.code, EngineError::IO_FILE_NOT_FOUND);
    }

    #[test]
    fn test_dropped_override_falls_back_to_default() {
        let mut engine = SimulatedEngine::new(Arc::new(MediaLibrary::new()));
        engine
            .set_media_sources(vec![MediaSource::from_uri("a.mp4")])
            .unwrap();
        engine.prepare();
        engine.handle().drop_overrides(1);

        let mut params = engine.selection_parameters();
        params.set_override(1, SelectionOverride { group: 0, track: 1 });
        engine.set_selection_parameters(params.clone());
        assert!(engine.selection_parameters().override_for(1).is_none());

        let audio = engine
            .current_tracks()
            .into_iter()
            .find(|g| g.kind() == Some(crate::TrackKind::Audio))
            .unwrap();
        assert_eq!(audio.selected, vec![true, false]);

        engine.set_selection_parameters(params);
        assert_eq!(
            engine.selection_parameters().override_for(1),
            Some(SelectionOverride { group: 0, track: 1 })
        );
    }

    #[test]
    fn test_factory_tracks_instances() {
        let factory = SimulatedEngineFactory::new(MediaLibrary::new());
        let _a = factory.create().unwrap();
        let _b = factory.create().unwrap();
        assert_eq!(factory.created_count(), 2);
        assert_eq!(factory.handles().len(), 2);
    }
}
