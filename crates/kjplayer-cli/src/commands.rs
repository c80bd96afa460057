//! CLI command implementations

use crate::output::{print_catalog, print_json, print_stats, reply_value, OutputFormat};
use anyhow::Context;
use kjplayer_core::engine::{MediaLibrary, SimulatedEngineFactory, SimulatedMedia, TrackFormat};
use kjplayer_core::thumbnail::FfmpegThumbnails;
use kjplayer_core::{
    BridgeConfig, BridgeEvent, Command, EngineError, Error, EventEnvelope, MediaSource,
    MemoryPressure, MethodCall, PlaybackSession, PlayerPool, Reply, SessionParams,
    SessionServices, SessionState, SourceKey,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

// =============================================================================
// Media library file
// =============================================================================

/// One entry of a `--library` file, keyed by URI
#[derive(Debug, Deserialize)]
#[serde(default)]
struct LibraryEntry {
    duration_ms: u64,
    width: u32,
    height: u32,
    /// Audio languages, one track each
    audio: Vec<String>,
    /// Subtitle languages, one track each
    subtitles: Vec<String>,
    /// Refuse to open the source
    rejected: bool,
    /// Engine error code raised while preparing
    error_code: Option<i32>,
}

impl Default for LibraryEntry {
    fn default() -> Self {
        Self {
            duration_ms: 60_000,
            width: 1280,
            height: 720,
            audio: vec!["en".to_string()],
            subtitles: Vec::new(),
            rejected: false,
            error_code: None,
        }
    }
}

impl LibraryEntry {
    fn into_media(self) -> SimulatedMedia {
        let mut media = SimulatedMedia::new(self.duration_ms)
            .with_size(self.width, self.height)
            .with_video_group(vec![TrackFormat::video(
                "video/avc",
                self.width,
                self.height,
                30.0,
            )]);
        if !self.audio.is_empty() {
            media = media.with_audio_group(
                self.audio
                    .iter()
                    .map(|lang| TrackFormat::audio("audio/mp4a-latm", lang, 48_000, 2))
                    .collect(),
            );
        }
        if !self.subtitles.is_empty() {
            media = media.with_text_group(
                self.subtitles
                    .iter()
                    .map(|lang| TrackFormat::text("text/vtt", lang))
                    .collect(),
            );
        }
        if self.rejected {
            media = media.rejected();
        }
        if let Some(code) = self.error_code {
            media = media.failing_with(EngineError::new(code, format!("simulated error {code}")));
        }
        media
    }
}

fn load_library(path: &Path) -> anyhow::Result<MediaLibrary> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading library {}", path.display()))?;
    let entries: HashMap<String, LibraryEntry> =
        serde_json::from_str(&raw).with_context(|| format!("parsing library {}", path.display()))?;
    info!(entries = entries.len(), "Loaded media library");
    Ok(entries
        .into_iter()
        .fold(MediaLibrary::default(), |library, (uri, entry)| {
            library.with_media(uri, entry.into_media())
        }))
}

// =============================================================================
// Serve
// =============================================================================

/// One inbound line of the stdio channel
#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<u64>,
    method: String,
    #[serde(default)]
    arguments: Value,
}

fn write_line(value: &Value) {
    println!("{}", value);
}

fn error_response(id: Option<u64>, error: &Error) -> Value {
    json!({
        "id": id,
        "error": { "code": error.error_code(), "message": error.to_string() },
    })
}

/// Handle one request line; returns false once the session is disposed
async fn handle_line(session: &PlaybackSession, line: &str) -> bool {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Malformed request");
            write_line(&error_response(None, &Error::Json(e)));
            return true;
        }
    };

    // Host lifecycle signals are not session commands
    match request.method.as_str() {
        "onStart" => session.on_start(),
        "onResume" => session.on_resume(),
        "onPause" => session.on_pause(),
        "onStop" => session.on_stop(),
        "onTrimMemory" => {
            let level = request
                .arguments
                .get("level")
                .cloned()
                .map(serde_json::from_value::<MemoryPressure>)
                .transpose();
            match level {
                Ok(level) => session.on_memory_pressure(level.unwrap_or(MemoryPressure::LowMemory)),
                Err(e) => {
                    write_line(&error_response(request.id, &Error::invalid_args("onTrimMemory", e.to_string())));
                    return true;
                }
            }
        }
        _ => {
            let dispose = request.method == "dispose";
            let call = MethodCall::new(request.method, request.arguments);
            let response = match session.call(call).await {
                Ok(reply) => json!({ "id": request.id, "result": reply_value(&reply) }),
                Err(e) => error_response(request.id, &e),
            };
            write_line(&response);
            return !dispose;
        }
    }
    write_line(&json!({ "id": request.id, "result": Value::Null }));
    true
}

/// Drive one session from JSON lines on stdin; events and replies go to stdout
pub async fn serve(
    params: SessionParams,
    library: Option<PathBuf>,
    config: Option<PathBuf>,
    ffmpeg: bool,
) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => BridgeConfig::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    let library = match library {
        Some(path) => load_library(&path)?,
        None => MediaLibrary::default(),
    };

    let factory = Arc::new(SimulatedEngineFactory::new(library));
    let pool = Arc::new(PlayerPool::new(factory, config.pool_capacity));
    let (tx, mut events) = mpsc::unbounded_channel::<EventEnvelope>();
    let mut services = SessionServices::new(Arc::clone(&pool), Arc::new(tx)).with_config(config);
    if ffmpeg {
        services = services.with_thumbnails(Arc::new(FfmpegThumbnails::default()));
    }
    let session = PlaybackSession::spawn(params, services)?;
    info!(session_id = %session.id(), "Serving session on stdio");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(envelope) = events.recv() => write_line(&serde_json::to_value(&envelope)?),
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if !handle_line(&session, &line).await {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    session.dispose().await;
    while let Ok(envelope) = events.try_recv() {
        write_line(&serde_json::to_value(&envelope)?);
    }
    pool.shutdown();
    info!("Host channel closed");
    Ok(())
}

// =============================================================================
// Demo
// =============================================================================

fn drain_events(events: &mut mpsc::UnboundedReceiver<EventEnvelope>, tally: &mut BTreeMap<&'static str, usize>) -> Vec<BridgeEvent> {
    let mut drained = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        *tally.entry(envelope.event.method()).or_default() += 1;
        drained.push(envelope.event);
    }
    drained
}

fn forced_flags(events: &[BridgeEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            BridgeEvent::TracksChanged(payload) => Some(payload.forced_selection),
            _ => None,
        })
        .collect()
}

async fn show_tracks(session: &PlaybackSession, format: OutputFormat) -> anyhow::Result<()> {
    if let Reply::Tracks(catalog) = session.execute(Command::GetTracks).await? {
        print_catalog(&catalog, format);
    }
    Ok(())
}

/// Scripted session: load, play, switch audio, force a refresh, seek, dispose
pub async fn demo(source: &str, format: OutputFormat) -> anyhow::Result<()> {
    let factory = Arc::new(SimulatedEngineFactory::default());
    let pool = Arc::new(PlayerPool::new(factory.clone(), 2));
    let (tx, mut events) = mpsc::unbounded_channel::<EventEnvelope>();
    let config = BridgeConfig::default();
    let settle = config.selection_settle() + Duration::from_millis(200);
    let services = SessionServices::new(Arc::clone(&pool), Arc::new(tx)).with_config(config);
    let mut tally = BTreeMap::new();

    let session = PlaybackSession::spawn(SessionParams::with_source(source).autoplay(false), services)?;
    let mut state = session.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| matches!(s, SessionState::Ready | SessionState::Playing)),
    )
    .await
    .context("session did not become ready")?
    .context("session closed while loading")?;

    println!("Session {} ready: {}", session.id(), source);
    show_tracks(&session, format).await?;

    session.execute(Command::Play).await?;
    println!("\nSelecting audio track 1");
    session.execute(Command::SetAudioTrack { index: 1 }).await?;
    tokio::time::sleep(settle).await;
    drain_events(&mut events, &mut tally);
    let selected = session.execute(Command::GetSelectedAudioTrackIndex).await?;
    println!("  Engine reports: {}", reply_value(&selected));

    println!("\nSelecting audio track 0 while the engine drops overrides");
    if let Some(handle) = factory.last_handle() {
        handle.drop_overrides(1);
    }
    session.execute(Command::SetAudioTrack { index: 0 }).await?;
    tokio::time::sleep(settle).await;
    let flags = forced_flags(&drain_events(&mut events, &mut tally));
    println!(
        "  Forced refresh: {}",
        if flags.contains(&true) { "yes" } else { "no" }
    );
    show_tracks(&session, format).await?;

    session.execute(Command::SeekTo { position_ms: 60_000 }).await?;
    let position = session.execute(Command::GetCurrentPosition).await?;
    println!("\nPosition after seek: {}ms", reply_value(&position));

    if let Reply::Thumbnail(bytes) = session
        .execute(Command::GetThumbnail { position_ms: 60_000 })
        .await?
    {
        println!("Thumbnail: {} bytes of JPEG", bytes.len());
    }

    session.dispose().await;
    drain_events(&mut events, &mut tally);
    println!("\nSession state: {}", session.state());
    match format {
        OutputFormat::Json => print_json(&tally),
        OutputFormat::Text => {
            println!("Events sent:");
            for (method, count) in &tally {
                println!("  {:<24} {}", method, count);
            }
        }
    }
    pool.shutdown();
    Ok(())
}

// =============================================================================
// Pool
// =============================================================================

/// Acquire every key, release them, then preload and adopt the first
pub fn pool(capacity: usize, keys: &[String], format: OutputFormat) -> anyhow::Result<()> {
    let factory = Arc::new(SimulatedEngineFactory::default());
    let pool = PlayerPool::new(factory.clone(), capacity);
    print_stats("start", &pool.stats(), format);

    let mut leases = Vec::new();
    for key in keys {
        leases.push(pool.acquire(&SourceKey::from(key.as_str()))?);
        print_stats(&format!("acquire {key}"), &pool.stats(), format);
    }
    for lease in leases {
        let key = lease.key().clone();
        pool.release_lease(lease);
        print_stats(&format!("release {key}"), &pool.stats(), format);
    }

    if let Some(first) = keys.first() {
        let key = SourceKey::from(first.as_str());
        pool.preload(&key, MediaSource::from_uri(first.clone()))?;
        print_stats(&format!("preload {key}"), &pool.stats(), format);
        let lease = pool.acquire(&key)?;
        let label = if lease.is_warm() { "acquire (warm)" } else { "acquire (cold)" };
        print_stats(label, &pool.stats(), format);
        pool.release_lease(lease);
    }

    pool.shutdown();
    print_stats("shutdown", &pool.stats(), format);
    if format == OutputFormat::Text {
        println!("Instances created: {}", factory.created_count());
    }
    Ok(())
}
