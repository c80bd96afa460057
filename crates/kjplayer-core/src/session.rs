//! Playback Session - one per embedded view
//!
//! Coordinates:
//! - The leased engine instance and its event channel
//! - Host commands and their replies
//! - Track catalog emission and audio selection verification
//! - Position ticks, memory pressure and lifecycle hooks
//! - Disposal back to the pool
//!
//! All of it runs on a single task. Host commands, engine events, timer
//! ticks and delayed continuations are serialized through one `select!`
//! loop, so the session never mutates its engine concurrently.

use crate::{
    bridge::{BridgeEvent, Command, ErrorPayload, EventSink, HostChannel, MethodCall, Reply},
    config::{BridgeConfig, SessionParams},
    engine::{EngineEvent, EngineState, MediaEngine},
    pool::{PlayerLease, PlayerPool},
    selector::{RequestId, TrackSelector, VerifyOutcome},
    surface::{HeadlessSurface, PlayerSurface},
    thumbnail::{PatternThumbnails, ThumbnailExtractor},
    tracks::CatalogBuilder,
    types::*,
    volume::{FixedSystemVolume, ObserverId, SystemVolume},
    EngineError, Error, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Collaborators shared by sessions
#[derive(Clone)]
pub struct SessionServices {
    pub pool: Arc<PlayerPool>,
    pub channel: Arc<dyn HostChannel>,
    pub surface: Arc<dyn PlayerSurface>,
    pub volume: Arc<dyn SystemVolume>,
    pub thumbnails: Arc<dyn ThumbnailExtractor>,
    pub config: BridgeConfig,
}

impl SessionServices {
    /// Headless defaults around a pool and a host channel
    pub fn new(pool: Arc<PlayerPool>, channel: Arc<dyn HostChannel>) -> Self {
        let config = BridgeConfig::default();
        Self {
            pool,
            channel,
            surface: Arc::new(HeadlessSurface::new(config.controller_timeout_ms)),
            volume: Arc::new(FixedSystemVolume::default()),
            thumbnails: Arc::new(PatternThumbnails::default()),
            config,
        }
    }

    pub fn with_surface(mut self, surface: Arc<dyn PlayerSurface>) -> Self {
        self.surface = surface;
        self
    }

    pub fn with_volume(mut self, volume: Arc<dyn SystemVolume>) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_thumbnails(mut self, thumbnails: Arc<dyn ThumbnailExtractor>) -> Self {
        self.thumbnails = thumbnails;
        self
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }
}

/// Host-side lifecycle signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Start,
    Resume,
    Pause,
    Stop,
}

/// Delayed work scheduled by the session itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuation {
    VerifySelection(RequestId),
    RefreshTracks { retry: bool },
    ResumeTicks(u64),
}

enum Input {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<Reply>>,
    },
    Lifecycle(Lifecycle),
    Memory(MemoryPressure),
    Continuation(Continuation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Handle to a running playback session
///
/// Dropping the handle cancels the session, which then releases its player.
pub struct PlaybackSession {
    id: SessionId,
    key: SourceKey,
    inputs: mpsc::UnboundedSender<Input>,
    state_rx: watch::Receiver<SessionState>,
    token: CancellationToken,
}

impl PlaybackSession {
    /// Acquire a player, wire events, load the initial source and start the loop
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(params: SessionParams, services: SessionServices) -> Result<Self> {
        services.config.validate()?;
        let id = SessionId::new();
        let key = params
            .source
            .as_deref()
            .map(SourceKey::from)
            .unwrap_or_else(SourceKey::synthetic);

        let lease = services.pool.acquire(&key)?;
        info!(session_id = %id, source = %key, warm = lease.is_warm(), "Creating playback session");

        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        services
            .pool
            .with_engine(&lease, |engine| engine.set_listener(Some(engine_tx)));

        let (volume_tx, volume_rx) = mpsc::unbounded_channel();
        let observer = services.volume.register(volume_tx);

        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Constructed);
        let token = CancellationToken::new();

        let mut actor = SessionActor {
            id,
            lease: Some(lease),
            sink: EventSink::new(id, Arc::clone(&services.channel)),
            selector: TrackSelector::new(services.config.max_forced_refreshes),
            pool: services.pool,
            surface: services.surface,
            volume: services.volume,
            thumbnails: services.thumbnails,
            config: services.config,
            state_tx,
            token: token.clone(),
            inputs: inputs_tx.clone(),
            source: None,
            resume: None,
            observer: Some(observer),
            ticks_enabled: true,
            ticks_held: false,
            hold_generation: 0,
            has_played: false,
            disposed: false,
        };

        if let Some(path) = params.source {
            let autoplay = params.autoplay.unwrap_or(actor.config.default_autoplay);
            actor.load(MediaSource::from_uri(path), autoplay, params.start_position_ms);
        }

        tokio::spawn(actor.run(inputs_rx, engine_rx, volume_rx));

        Ok(Self {
            id,
            key,
            inputs: inputs_tx,
            state_rx,
            token,
        })
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Pool key the session's player is held under
    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Parse and execute a raw host call
    pub async fn call(&self, call: MethodCall) -> Result<Reply> {
        let command = Command::parse(&call)?;
        self.execute(command).await
    }

    /// Execute a command on the session loop
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn execute(&self, command: Command) -> Result<Reply> {
        let (reply, rx) = oneshot::channel();
        self.inputs
            .send(Input::Command { command, reply })
            .map_err(|_| Error::SessionDisposed)?;
        rx.await.map_err(|_| Error::SessionDisposed)?
    }

    /// Dispose the session; safe to call more than once
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn dispose(&self) {
        match self.execute(Command::Dispose).await {
            Ok(_) | Err(Error::SessionDisposed) => {}
            Err(e) => warn!(error = %e, "Dispose failed"),
        }
    }

    pub fn on_start(&self) {
        self.signal(Input::Lifecycle(Lifecycle::Start));
    }

    pub fn on_resume(&self) {
        self.signal(Input::Lifecycle(Lifecycle::Resume));
    }

    pub fn on_pause(&self) {
        self.signal(Input::Lifecycle(Lifecycle::Pause));
    }

    pub fn on_stop(&self) {
        self.signal(Input::Lifecycle(Lifecycle::Stop));
    }

    /// Forward an OS memory pressure signal
    pub fn on_memory_pressure(&self, level: MemoryPressure) {
        self.signal(Input::Memory(level));
    }

    fn signal(&self, input: Input) {
        if self.inputs.send(input).is_err() {
            debug!(session_id = %self.id, "Signal after disposal ignored");
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

/// Run `f` against the leased engine; `None` once the lease is gone or stale
fn engine_op<R>(
    pool: &PlayerPool,
    lease: Option<&PlayerLease>,
    f: impl FnOnce(&mut dyn MediaEngine) -> R,
) -> Option<R> {
    lease.and_then(|lease| pool.with_engine(lease, f))
}

struct SessionActor {
    id: SessionId,
    lease: Option<PlayerLease>,
    sink: EventSink,
    selector: TrackSelector,
    pool: Arc<PlayerPool>,
    surface: Arc<dyn PlayerSurface>,
    volume: Arc<dyn SystemVolume>,
    thumbnails: Arc<dyn ThumbnailExtractor>,
    config: BridgeConfig,
    state_tx: watch::Sender<SessionState>,
    token: CancellationToken,
    inputs: mpsc::UnboundedSender<Input>,
    /// Source loaded at construction
    source: Option<MediaSource>,
    resume: Option<ResumeState>,
    observer: Option<ObserverId>,
    ticks_enabled: bool,
    ticks_held: bool,
    hold_generation: u64,
    has_played: bool,
    disposed: bool,
}

impl SessionActor {
    async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<Input>,
        mut engine_events: mpsc::UnboundedReceiver<EngineEvent>,
        mut volume_changes: mpsc::UnboundedReceiver<f32>,
    ) {
        let mut ticker = tokio::time::interval(self.config.position_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let token = self.token.clone();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(input) = inputs.recv() => {
                    if self.handle_input(input) == Flow::Stop {
                        break;
                    }
                }
                Some(event) = engine_events.recv() => self.handle_engine_event(event),
                Some(volume) = volume_changes.recv() => {
                    self.sink.emit(BridgeEvent::SystemVolumeChanged { volume });
                }
                _ = ticker.tick() => {
                    if self.ticks_enabled && !self.ticks_held {
                        self.emit_position();
                    }
                }
            }
        }

        self.teardown();
    }

    fn handle_input(&mut self, input: Input) -> Flow {
        match input {
            Input::Command { command, reply } => {
                if let Command::GetThumbnail { position_ms } = command {
                    self.thumbnail(position_ms, reply);
                    return Flow::Continue;
                }
                let stop = command == Command::Dispose;
                let result = self.handle_command(command);
                // The caller may have stopped waiting
                let _ = reply.send(result);
                if stop {
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
            Input::Lifecycle(event) => {
                self.lifecycle(event);
                Flow::Continue
            }
            Input::Memory(level) => {
                self.memory_pressure(level);
                Flow::Continue
            }
            Input::Continuation(continuation) => {
                self.continuation(continuation);
                Flow::Continue
            }
        }
    }

    // =========================================================================
    // Loading
    // =========================================================================

    fn load(&mut self, source: MediaSource, autoplay: bool, start_position_ms: Option<u64>) {
        info!(session_id = %self.id, uri = %source.uri, autoplay, "Loading source");
        let warm = self.lease.as_ref().is_some_and(PlayerLease::is_warm);
        let start = start_position_ms.filter(|p| *p > 0);

        let outcome = engine_op(&self.pool, self.lease.as_ref(), |engine| -> std::result::Result<bool, EngineError> {
            if warm && engine.current_source().as_ref() == Some(&source) {
                engine.set_play_when_ready(autoplay);
                if let Some(position) = start {
                    engine.seek_to(position);
                }
                return Ok(true);
            }
            engine.set_media_sources(vec![source.clone()])?;
            engine.set_play_when_ready(autoplay);
            if let Some(position) = start {
                engine.seek_to(position);
            }
            engine.prepare();
            Ok(false)
        });

        match outcome {
            Some(Ok(reused)) => {
                self.source = Some(source);
                self.selector.reset();
                self.has_played = false;
                self.transition(SessionState::Loading);
                if reused {
                    debug!(session_id = %self.id, "Reusing preloaded source");
                    self.sync_state();
                    self.emit_tracks();
                }
            }
            Some(Err(e)) => {
                error!(session_id = %self.id, uri = %source.uri, error = %e, "Failed to load source");
                self.sink.emit(BridgeEvent::Error(ErrorPayload::load_failed(&e)));
            }
            None => warn!(session_id = %self.id, "No player to load into"),
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn handle_command(&mut self, command: Command) -> Result<Reply> {
        if self.disposed {
            return Err(Error::SessionDisposed);
        }
        debug!(session_id = %self.id, method = command.method(), "Handling command");
        let pool = Arc::clone(&self.pool);
        let lease = self.lease.as_ref();

        let reply = match command {
            Command::Play => {
                engine_op(&pool, lease, |e| e.play());
                Reply::Unit
            }
            Command::Pause => {
                engine_op(&pool, lease, |e| e.pause());
                Reply::Unit
            }
            Command::SeekTo { position_ms } => {
                engine_op(&pool, lease, |e| e.seek_to(position_ms));
                Reply::Unit
            }
            Command::SetPlaybackSpeed { speed } => {
                engine_op(&pool, lease, |e| e.set_playback_speed(speed));
                Reply::Unit
            }
            Command::SetVolume { volume } => {
                engine_op(&pool, lease, |e| e.set_volume(volume));
                Reply::Unit
            }
            Command::SetResizeMode { mode } => {
                self.surface.set_resize_mode(mode);
                Reply::Unit
            }
            Command::GetCurrentPosition => {
                Reply::Position(engine_op(&pool, lease, |e| e.position_ms()).unwrap_or(0))
            }
            Command::GetDuration => Reply::Duration(engine_op(&pool, lease, |e| e.duration_ms()).flatten()),
            Command::IsPlaying => Reply::Bool(engine_op(&pool, lease, |e| e.is_playing()).unwrap_or(false)),
            Command::ShowControls => {
                self.surface.show_controller();
                Reply::Unit
            }
            Command::HideControls => {
                self.surface.hide_controller();
                Reply::Unit
            }
            Command::SetControllerTimeout { timeout_ms } => {
                self.surface.set_controller_timeout(timeout_ms);
                Reply::Unit
            }
            Command::SetVideoTitle { title } => {
                self.surface.set_title(&title);
                Reply::Unit
            }
            Command::EnterFullscreen => {
                self.surface.enter_fullscreen();
                Reply::Unit
            }
            Command::GetTracks => {
                let selector = &mut self.selector;
                Reply::Tracks(engine_op(&pool, lease, |e| selector.catalog(e)).unwrap_or_default())
            }
            Command::GetTracksFromPlayer => Reply::Tracks(
                engine_op(&pool, lease, |e| CatalogBuilder::build_from_current(e)).unwrap_or_default(),
            ),
            Command::RefreshTracks => {
                self.schedule(
                    self.config.track_refresh_delay(),
                    Continuation::RefreshTracks { retry: false },
                );
                Reply::Unit
            }
            Command::SetAudioTrack { index } => {
                let selector = &mut self.selector;
                if let Some(id) = engine_op(&pool, lease, |e| selector.request_audio(e, index)).flatten() {
                    self.schedule(self.config.selection_settle(), Continuation::VerifySelection(id));
                }
                Reply::Unit
            }
            Command::GetSelectedAudioTrackIndex => {
                let selector = &mut self.selector;
                Reply::Index(engine_op(&pool, lease, |e| selector.catalog(e).selected_audio).flatten())
            }
            Command::SetSubtitleTrack { index } => {
                let selector = &mut self.selector;
                engine_op(&pool, lease, |e| selector.select_subtitle(e, index));
                Reply::Unit
            }
            Command::DisableSubtitle => {
                let selector = &mut self.selector;
                engine_op(&pool, lease, |e| selector.disable_subtitle(e));
                Reply::Unit
            }
            Command::AddMediaItems { items } => {
                engine_op(&pool, lease, |e| e.add_media_sources(items));
                Reply::Unit
            }
            Command::RemoveMediaItem { index } => {
                self.navigate(|e| e.remove_media_source(index));
                Reply::Unit
            }
            Command::SeekToNext => {
                self.navigate(|e| e.seek_to_next());
                Reply::Unit
            }
            Command::SeekToPrevious => {
                self.navigate(|e| e.seek_to_previous());
                Reply::Unit
            }
            Command::SeekToMediaItem { index } => {
                self.navigate(|e| e.seek_to_item(index, 0));
                Reply::Unit
            }
            Command::ClearPlaylist => {
                engine_op(&pool, lease, |e| e.clear_media_sources());
                self.selector.reset();
                Reply::Unit
            }
            Command::GetThumbnail { .. } => {
                return Err(Error::Thumbnail("thumbnail requests are served off-loop".into()))
            }
            Command::Preload { source } => {
                let key = SourceKey::from(source.as_str());
                pool.preload(&key, MediaSource::from_uri(source))?;
                Reply::Unit
            }
            Command::ReleasePlayer { source } => {
                pool.release(&SourceKey::from(source));
                Reply::Unit
            }
            Command::GetSystemVolume => Reply::Volume(self.volume.get()),
            Command::SetSystemVolume { volume } => {
                self.volume.set(volume);
                Reply::Unit
            }
            Command::DebugAudioTracks => {
                engine_op(&pool, lease, |e| TrackSelector::log_audio_tracks(e));
                Reply::Unit
            }
            Command::DebugCurrentAudioTrack => {
                match engine_op(&pool, lease, |e| TrackSelector::current_audio_override(e)).flatten() {
                    Some((selection, format)) => debug!(
                        session_id = %self.id,
                        group = selection.group,
                        track = selection.track,
                        language = ?format.language,
                        label = ?format.label,
                        codecs = ?format.codecs,
                        sample_rate = ?format.sample_rate,
                        channels = ?format.channel_count,
                        "Current audio override"
                    ),
                    None => debug!(session_id = %self.id, "No audio override, engine default in use"),
                }
                Reply::Unit
            }
            Command::Dispose => {
                self.teardown();
                Reply::Unit
            }
        };
        Ok(reply)
    }

    /// Run a playlist operation; a change of current item resets selection state
    fn navigate(&mut self, op: impl FnOnce(&mut dyn MediaEngine)) {
        let changed = engine_op(&self.pool, self.lease.as_ref(), |e| {
            let before = (e.current_item_index(), e.current_source());
            op(e);
            before != (e.current_item_index(), e.current_source())
        });
        if changed == Some(true) {
            debug!(session_id = %self.id, "Current item changed");
            self.selector.reset();
        }
    }

    fn thumbnail(&mut self, position_ms: u64, reply: oneshot::Sender<Result<Reply>>) {
        let source = engine_op(&self.pool, self.lease.as_ref(), |e| e.current_source())
            .flatten()
            .or_else(|| self.source.clone());
        let Some(source) = source else {
            let _ = reply.send(Err(Error::Thumbnail("no source loaded".into())));
            return;
        };

        let thumbnails = Arc::clone(&self.thumbnails);
        let token = self.token.child_token();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => Err(Error::SessionDisposed),
                frame = thumbnails.frame_at(&source, position_ms) => frame
                    .map(Reply::Thumbnail)
                    .map_err(|e| match e {
                        Error::Thumbnail(_) => e,
                        other => Error::Thumbnail(other.to_string()),
                    }),
            };
            if let Err(e) = &result {
                warn!(uri = %source.uri, position_ms, error = %e, "Thumbnail failed");
            }
            let _ = reply.send(result);
        });
    }

    // =========================================================================
    // Engine events
    // =========================================================================

    fn handle_engine_event(&mut self, event: EngineEvent) {
        if self.disposed {
            return;
        }
        match event {
            EngineEvent::IsPlayingChanged(playing) => {
                self.sink.emit(BridgeEvent::PlayingChanged(playing));
                self.sync_state();
            }
            EngineEvent::IsLoadingChanged(is_loading) => {
                self.sink.emit(BridgeEvent::LoadingChanged { is_loading });
            }
            EngineEvent::PlaybackStateChanged(state) => {
                let payload = engine_op(&self.pool, self.lease.as_ref(), |e| {
                    BridgeEvent::playback_state(
                        state,
                        e.is_playing(),
                        e.buffered_percentage(),
                        e.buffered_position_ms(),
                    )
                });
                if let Some(event) = payload {
                    self.sink.emit(event);
                }
                self.sync_state();
            }
            EngineEvent::PlayerError(error) => {
                error!(
                    session_id = %self.id,
                    code = error.code,
                    kind = %error.kind(),
                    "Player error: {}",
                    error.message
                );
                self.sink.emit(BridgeEvent::Error(ErrorPayload::playback(&error)));
            }
            EngineEvent::PositionDiscontinuity { .. } => self.emit_position(),
            EngineEvent::VideoSizeChanged {
                width,
                height,
                pixel_ratio,
            } => {
                self.sink.emit(BridgeEvent::VideoSizeChanged {
                    width,
                    height,
                    pixel_ratio,
                });
            }
            EngineEvent::RenderedFirstFrame => self.sink.emit(BridgeEvent::RenderedFirstFrame),
            EngineEvent::TracksChanged => self.emit_tracks(),
        }
    }

    fn emit_tracks(&mut self) {
        let selector = &mut self.selector;
        if let Some(catalog) = engine_op(&self.pool, self.lease.as_ref(), |e| selector.catalog(e)) {
            let forced = self.selector.optimistic_index().is_some();
            self.sink.emit(BridgeEvent::tracks(catalog, forced));
        }
    }

    fn emit_position(&mut self) {
        // No tick without a current item
        let Some((position, duration)) = engine_op(&self.pool, self.lease.as_ref(), |e| {
            e.current_source().map(|_| (e.position_ms(), e.duration_ms()))
        })
        .flatten() else {
            return;
        };
        self.sink.emit(BridgeEvent::PositionChanged {
            position,
            duration: duration.unwrap_or(0),
        });
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Derive the session state from what the engine reports
    fn sync_state(&mut self) {
        let Some((engine_state, playing)) =
            engine_op(&self.pool, self.lease.as_ref(), |e| (e.playback_state(), e.is_playing()))
        else {
            return;
        };
        let target = match engine_state {
            EngineState::Buffering => SessionState::Buffering,
            EngineState::Ready if playing => SessionState::Playing,
            EngineState::Ready if self.has_played => SessionState::Paused,
            EngineState::Ready => SessionState::Ready,
            EngineState::Ended => SessionState::Ended,
            EngineState::Idle | EngineState::Released => return,
        };
        self.transition(target);
    }

    fn transition(&mut self, target: SessionState) {
        let current = *self.state_tx.borrow();
        if current == target {
            return;
        }
        if !current.can_transition_to(target) {
            debug!(session_id = %self.id, from = %current, to = %target, "Ignoring transition");
            return;
        }
        if target == SessionState::Playing {
            self.has_played = true;
        }
        let _ = self.state_tx.send(target);
        info!(session_id = %self.id, from = %current, to = %target, "State transition");
    }

    // =========================================================================
    // Lifecycle and memory
    // =========================================================================

    fn lifecycle(&mut self, event: Lifecycle) {
        debug!(session_id = %self.id, ?event, "Lifecycle");
        match event {
            Lifecycle::Start => self.ticks_enabled = true,
            Lifecycle::Resume => {
                self.ticks_enabled = true;
                if let Some(saved) = self.resume.take() {
                    engine_op(&self.pool, self.lease.as_ref(), |e| {
                        if e.current_item_index() != saved.media_item_index {
                            e.seek_to_item(saved.media_item_index, saved.position_ms);
                        } else if e.position_ms() != saved.position_ms {
                            e.seek_to(saved.position_ms);
                        }
                        e.set_play_when_ready(saved.play_when_ready);
                    });
                }
            }
            Lifecycle::Pause => {
                self.save_resume_state();
                engine_op(&self.pool, self.lease.as_ref(), |e| e.pause());
                self.ticks_enabled = false;
            }
            Lifecycle::Stop => {
                self.save_resume_state();
                self.ticks_enabled = false;
            }
        }
    }

    fn save_resume_state(&mut self) {
        let saved = engine_op(&self.pool, self.lease.as_ref(), |e| ResumeState {
            position_ms: e.position_ms(),
            media_item_index: e.current_item_index(),
            play_when_ready: e.play_when_ready(),
        });
        if let Some(saved) = saved {
            debug!(
                session_id = %self.id,
                position_ms = saved.position_ms,
                item = saved.media_item_index,
                play_when_ready = saved.play_when_ready,
                "Saved resume state"
            );
            self.resume = Some(saved);
        }
    }

    fn memory_pressure(&mut self, level: MemoryPressure) {
        let cooldown = match level {
            MemoryPressure::RunningCritical => self.config.critical_memory_cooldown_ms,
            MemoryPressure::RunningLow | MemoryPressure::LowMemory => self.config.low_memory_cooldown_ms,
        };
        warn!(session_id = %self.id, ?level, cooldown_ms = cooldown, "Memory pressure, pausing ticks");
        self.ticks_held = true;
        self.hold_generation += 1;
        self.schedule(
            Duration::from_millis(cooldown),
            Continuation::ResumeTicks(self.hold_generation),
        );
    }

    // =========================================================================
    // Continuations
    // =========================================================================

    /// Deliver `continuation` after `delay` unless the session is cancelled first
    fn schedule(&self, delay: Duration, continuation: Continuation) {
        let token = self.token.child_token();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = inputs.send(Input::Continuation(continuation));
                }
            }
        });
    }

    fn continuation(&mut self, continuation: Continuation) {
        if self.disposed {
            return;
        }
        match continuation {
            Continuation::VerifySelection(id) => self.verify_selection(id),
            Continuation::RefreshTracks { retry } => self.refresh_tracks(retry),
            Continuation::ResumeTicks(generation) => {
                if generation == self.hold_generation {
                    debug!(session_id = %self.id, "Resuming ticks");
                    self.ticks_held = false;
                }
            }
        }
    }

    fn verify_selection(&mut self, id: RequestId) {
        let selector = &mut self.selector;
        let Some(outcome) = engine_op(&self.pool, self.lease.as_ref(), |e| selector.verify(e, id)) else {
            return;
        };
        match outcome {
            VerifyOutcome::Stale => debug!(session_id = %self.id, request_id = id, "Stale verification"),
            VerifyOutcome::Verified(catalog) => self.sink.emit(BridgeEvent::tracks(catalog, false)),
            VerifyOutcome::Unconfirmed(catalog) => {
                let forced = self.selector.optimistic_index().is_some();
                self.sink.emit(BridgeEvent::tracks(catalog, forced));
            }
            VerifyOutcome::RefreshForced { catalog, reverify } => {
                self.sink.emit(BridgeEvent::tracks(catalog, true));
                if let Some(next) = reverify {
                    self.schedule(self.config.selection_settle(), Continuation::VerifySelection(next));
                }
            }
        }
    }

    fn refresh_tracks(&mut self, retry: bool) {
        let selector = &mut self.selector;
        let Some(catalog) = engine_op(&self.pool, self.lease.as_ref(), |e| selector.catalog(e)) else {
            return;
        };
        if !catalog.is_empty() {
            let forced = self.selector.optimistic_index().is_some();
            self.sink.emit(BridgeEvent::tracks(catalog, forced));
        } else if !retry {
            debug!(session_id = %self.id, "No tracks yet, retrying once");
            self.schedule(
                self.config.track_refresh_retry(),
                Continuation::RefreshTracks { retry: true },
            );
        } else {
            debug!(session_id = %self.id, "No tracks after retry, giving up");
        }
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    fn teardown(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.ticks_enabled = false;
        self.token.cancel();

        if let Some(observer) = self.observer.take() {
            self.volume.unregister(observer);
        }
        if let Some(lease) = self.lease.take() {
            self.pool.with_engine(&lease, |e| e.set_listener(None));
            self.pool.release_lease(lease);
        }
        self.transition(SessionState::Disposed);
        info!(session_id = %self.id, events = self.sink.sequence(), "Session disposed");
    }
}

#[cfg(all(test, feature = "simulated"))]
mod tests {
    use super::*;
    use crate::bridge::EventEnvelope;
    use crate::engine::SimulatedEngineFactory;

    fn services() -> (SessionServices, mpsc::UnboundedReceiver<EventEnvelope>) {
        let factory = Arc::new(SimulatedEngineFactory::default());
        let pool = Arc::new(PlayerPool::new(factory, 2));
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionServices::new(pool, Arc::new(tx)), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_without_source() {
        let (services, _rx) = services();
        let session = PlaybackSession::spawn(SessionParams::default(), services).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(session.state(), SessionState::Constructed);
        assert!(session.key().as_str().starts_with("session-"));
        assert_eq!(
            session.execute(Command::GetDuration).await.unwrap(),
            Reply::Duration(None)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoplay_reaches_playing() {
        let (services, _rx) = services();
        let session = PlaybackSession::spawn(SessionParams::with_source("a.mp4"), services).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(session.state(), SessionState::Playing);
        assert_eq!(session.execute(Command::IsPlaying).await.unwrap(), Reply::Bool(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_after_play_is_paused() {
        let (services, _rx) = services();
        let params = SessionParams::with_source("a.mp4").autoplay(false);
        let session = PlaybackSession::spawn(params, services).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(session.state(), SessionState::Ready);

        session.execute(Command::Play).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(session.state(), SessionState::Playing);

        session.execute(Command::Pause).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(session.state(), SessionState::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_commands() {
        let (services, _rx) = services();
        let surface = HeadlessSurface::new(3000);
        let services = services.with_surface(Arc::new(surface.clone()));
        let session = PlaybackSession::spawn(SessionParams::default(), services).unwrap();

        session
            .call(MethodCall::new("setResizeMode", serde_json::json!({ "mode": "zoomToFill" })))
            .await
            .unwrap();
        session.execute(Command::ShowControls).await.unwrap();
        session
            .execute(Command::SetControllerTimeout { timeout_ms: 5000 })
            .await
            .unwrap();

        session
            .call(MethodCall::new("setVideoTitle", serde_json::json!({ "title": "Trailer" })))
            .await
            .unwrap();
        session.execute(Command::EnterFullscreen).await.unwrap();

        let state = surface.state();
        assert_eq!(state.resize_mode, ResizeMode::ZoomToFill);
        assert!(state.controller_visible);
        assert_eq!(state.controller_timeout_ms, 5000);
        assert_eq!(state.title.as_deref(), Some("Trailer"));
        assert!(state.fullscreen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_commands_reply_unit() {
        let (services, _rx) = services();
        let session = PlaybackSession::spawn(SessionParams::with_source("a.mp4"), services).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        for method in ["debugAudioTracks", "debugCurrentAudioTrack"] {
            let reply = session.call(MethodCall::bare(method)).await.unwrap();
            assert_eq!(reply, Reply::Unit, "{method}");
        }
        session.execute(Command::SetAudioTrack { index: 1 }).await.unwrap();
        assert_eq!(
            session.execute(Command::DebugCurrentAudioTrack).await.unwrap(),
            Reply::Unit
        );
    }
}
