//! Track selection
//!
//! Applying an override does not guarantee the engine switches tracks, so
//! audio selections are verified after a settle window. A selection the
//! engine did not pick up is forced through by reloading the source, and the
//! requested index is then reported optimistically until the engine agrees.

use crate::engine::{MediaEngine, SelectionOverride, TrackFormat};
use crate::tracks::{resolve_global_index, CatalogBuilder};
use crate::{TrackCatalog, TrackKind};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Identifier of one selection request
pub type RequestId = u64;

/// Lifecycle of a selection request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectionPhase {
    Requested,
    ParametersApplied,
    RefreshForced,
}

/// The single in-flight audio selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRequest {
    pub id: RequestId,
    pub kind: TrackKind,
    pub index: usize,
    pub phase: SelectionPhase,
    pub refreshes: u32,
}

/// Result of one verification step
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    /// Request was superseded or cancelled
    Stale,
    /// Engine reports the requested track
    Verified(TrackCatalog),
    /// Source reloaded and the requested index forced into the catalog
    RefreshForced {
        catalog: TrackCatalog,
        /// Set when another verification should follow
        reverify: Option<RequestId>,
    },
    /// Engine disagreed and no refresh budget is left; prior selection stands
    Unconfirmed(TrackCatalog),
}

/// Per-session selection controller
#[derive(Debug)]
pub struct TrackSelector {
    next_id: RequestId,
    pending: Option<SelectionRequest>,
    optimistic: Option<usize>,
    max_forced_refreshes: u32,
}

impl TrackSelector {
    pub fn new(max_forced_refreshes: u32) -> Self {
        Self {
            next_id: 0,
            pending: None,
            optimistic: None,
            max_forced_refreshes,
        }
    }

    pub fn pending(&self) -> Option<&SelectionRequest> {
        self.pending.as_ref()
    }

    /// Audio index currently forced into catalogs
    pub fn optimistic_index(&self) -> Option<usize> {
        self.optimistic
    }

    /// Apply an audio override for `index`
    ///
    /// Returns the request to verify after the settle window, or `None` when
    /// the index does not address a real track.
    pub fn request_audio(&mut self, engine: &mut dyn MediaEngine, index: i64) -> Option<RequestId> {
        let index = Self::track_index(TrackKind::Audio, index)?;
        let (renderer, selection) = Self::locate(engine, TrackKind::Audio, index)?;

        self.next_id += 1;
        let mut request = SelectionRequest {
            id: self.next_id,
            kind: TrackKind::Audio,
            index,
            phase: SelectionPhase::Requested,
            refreshes: 0,
        };
        if let Some(previous) = self.pending.replace(request) {
            debug!(request_id = previous.id, "Superseding pending selection");
        }
        self.optimistic = None;

        Self::apply_override(engine, renderer, selection);
        request.phase = SelectionPhase::ParametersApplied;
        self.pending = Some(request);
        info!(
            request_id = request.id,
            index,
            group = selection.group,
            track = selection.track,
            "Audio override applied"
        );
        Some(request.id)
    }

    /// Compare the engine's selection with the pending request
    pub fn verify(&mut self, engine: &mut dyn MediaEngine, request_id: RequestId) -> VerifyOutcome {
        let Some(mut request) = self.pending.filter(|r| r.id == request_id) else {
            return VerifyOutcome::Stale;
        };

        let reported = CatalogBuilder::engine_selected_audio(engine);
        if reported == Some(request.index) {
            info!(request_id, index = request.index, "Audio selection verified");
            self.pending = None;
            self.optimistic = None;
            return VerifyOutcome::Verified(CatalogBuilder::build(engine));
        }

        if request.refreshes >= self.max_forced_refreshes {
            warn!(
                request_id,
                requested = request.index,
                reported = ?reported,
                "Audio selection not confirmed"
            );
            self.pending = None;
            return VerifyOutcome::Unconfirmed(self.catalog(engine));
        }

        warn!(
            request_id,
            requested = request.index,
            reported = ?reported,
            "Audio selection mismatch, forcing source refresh"
        );
        let Some((renderer, selection)) = Self::locate(engine, TrackKind::Audio, request.index)
        else {
            self.pending = None;
            return VerifyOutcome::Stale;
        };
        Self::reload_source(engine);
        Self::apply_override(engine, renderer, selection);

        request.refreshes += 1;
        request.phase = SelectionPhase::RefreshForced;
        self.optimistic = Some(request.index);

        let reverify = if request.refreshes < self.max_forced_refreshes {
            self.pending = Some(request);
            Some(request.id)
        } else {
            self.pending = None;
            None
        };

        let mut catalog = CatalogBuilder::build(engine);
        catalog.mark_selected_audio(request.index);
        VerifyOutcome::RefreshForced { catalog, reverify }
    }

    /// Rebuild the catalog, keeping an optimistic marker until the engine converges
    pub fn catalog(&mut self, engine: &dyn MediaEngine) -> TrackCatalog {
        let mut catalog = CatalogBuilder::build(engine);
        self.reconcile(engine, &mut catalog);
        catalog
    }

    /// Apply the optimistic marker to a freshly built catalog
    pub fn reconcile(&mut self, engine: &dyn MediaEngine, catalog: &mut TrackCatalog) {
        if let Some(index) = self.optimistic {
            if CatalogBuilder::engine_selected_audio(engine) == Some(index) {
                debug!(index, "Engine converged on forced selection");
                self.optimistic = None;
            } else {
                catalog.mark_selected_audio(index);
            }
        }
    }

    /// Drop pending and optimistic state after the source changed
    pub fn reset(&mut self) {
        let pending = self.pending.take();
        let optimistic = self.optimistic.take();
        if pending.is_some() || optimistic.is_some() {
            debug!("Selection state reset");
        }
    }

    /// Select a subtitle track by global index; no verification follows
    pub fn select_subtitle(&mut self, engine: &mut dyn MediaEngine, index: i64) -> bool {
        let Some((renderer, selection)) = Self::track_index(TrackKind::Subtitle, index)
            .and_then(|index| Self::locate(engine, TrackKind::Subtitle, index))
        else {
            return false;
        };
        Self::apply_override(engine, renderer, selection);
        info!(index, "Subtitle track selected");
        true
    }

    /// Turn the subtitle renderer off
    pub fn disable_subtitle(&mut self, engine: &mut dyn MediaEngine) -> bool {
        let Some(renderer) = engine
            .mapped_track_info()
            .and_then(|info| info.renderer_for(TrackKind::Subtitle))
        else {
            return false;
        };
        let mut params = engine.selection_parameters();
        params.set_renderer_disabled(renderer, true);
        engine.set_selection_parameters(params);
        info!("Subtitles disabled");
        true
    }

    /// Log every mapped audio track and the active override
    ///
    /// Returns the number of tracks listed.
    pub fn log_audio_tracks(engine: &dyn MediaEngine) -> usize {
        let Some(info) = engine.mapped_track_info() else {
            debug!("No track mapping yet");
            return 0;
        };
        let Some(renderer) = info.renderer_for(TrackKind::Audio) else {
            debug!("No audio renderer");
            return 0;
        };
        let groups = &info.renderers[renderer].groups;
        debug!(renderer, groups = groups.len(), "Audio track dump");
        let mut listed = 0;
        for (group, formats) in groups.iter().enumerate() {
            for (track, format) in formats.formats.iter().enumerate() {
                debug!(
                    group,
                    track,
                    label = ?format.label,
                    language = ?format.language,
                    "Audio track"
                );
                listed += 1;
            }
        }
        debug!(selection = ?engine.selection_parameters().override_for(renderer), "Audio override");
        listed
    }

    /// The audio override in effect and the format it points at
    pub fn current_audio_override(engine: &dyn MediaEngine) -> Option<(SelectionOverride, TrackFormat)> {
        let info = engine.mapped_track_info()?;
        let renderer = info.renderer_for(TrackKind::Audio)?;
        let selection = engine.selection_parameters().override_for(renderer)?;
        let format = info.renderers[renderer]
            .groups
            .get(selection.group)?
            .formats
            .get(selection.track)?
            .clone();
        Some((selection, format))
    }

    fn track_index(kind: TrackKind, index: i64) -> Option<usize> {
        match usize::try_from(index) {
            Ok(index) => Some(index),
            Err(_) => {
                debug!(%kind, index, "Negative track index, selection ignored");
                None
            }
        }
    }

    /// Resolve a global index to a renderer and override
    fn locate(
        engine: &dyn MediaEngine,
        kind: TrackKind,
        index: usize,
    ) -> Option<(usize, SelectionOverride)> {
        let Some(info) = engine.mapped_track_info() else {
            debug!(%kind, index, "No track mapping yet, selection ignored");
            return None;
        };
        let Some(renderer) = info.renderer_for(kind) else {
            debug!(%kind, "No renderer for kind, selection ignored");
            return None;
        };
        let lengths = info.renderers[renderer].group_lengths();
        match resolve_global_index(&lengths, index) {
            Some((group, track)) => Some((renderer, SelectionOverride { group, track })),
            None => {
                debug!(%kind, index, "Track index out of range, selection ignored");
                None
            }
        }
    }

    fn apply_override(engine: &mut dyn MediaEngine, renderer: usize, selection: SelectionOverride) {
        let mut params = engine.selection_parameters();
        params
            .set_renderer_disabled(renderer, false)
            .set_override(renderer, selection);
        engine.set_selection_parameters(params);
    }

    /// Set the same playlist again so the engine reconsiders its tracks
    fn reload_source(engine: &mut dyn MediaEngine) {
        let sources = engine.media_sources();
        if sources.is_empty() {
            return;
        }
        let index = engine.current_item_index();
        let position = engine.position_ms();
        let play_when_ready = engine.play_when_ready();

        if let Err(e) = engine.set_media_sources(sources) {
            warn!(error = %e, "Source refresh failed");
            return;
        }
        engine.seek_to_item(index, position);
        engine.prepare();
        engine.set_play_when_ready(play_when_ready);
    }
}

#[cfg(all(test, feature = "simulated"))]
mod tests {
    use super::*;
    use crate::engine::{MediaLibrary, SimulatedEngine, SimulatedMedia, TrackFormat};
    use crate::MediaSource;
    use std::sync::Arc;

    fn prepared() -> SimulatedEngine {
        let mut engine = SimulatedEngine::new(Arc::new(MediaLibrary::new()));
        engine
            .set_media_sources(vec![MediaSource::from_uri("a.mp4")])
            .unwrap();
        engine.prepare();
        engine
    }

    #[test]
    fn test_request_then_verify() {
        let mut engine = prepared();
        let mut selector = TrackSelector::new(1);

        let id = selector.request_audio(&mut engine, 1).unwrap();
        assert_eq!(selector.pending().unwrap().phase, SelectionPhase::ParametersApplied);

        match selector.verify(&mut engine, id) {
            VerifyOutcome::Verified(catalog) => assert_eq!(catalog.selected_audio, Some(1)),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(selector.pending().is_none());
    }

    #[test]
    fn test_out_of_range_is_noop() {
        let mut engine = prepared();
        let mut selector = TrackSelector::new(1);
        let before = engine.selection_parameters();

        assert!(selector.request_audio(&mut engine, 7).is_none());
        assert!(selector.pending().is_none());
        assert_eq!(engine.selection_parameters(), before);
    }

    #[test]
    fn test_negative_index_is_noop() {
        let mut engine = prepared();
        let mut selector = TrackSelector::new(1);
        let before = engine.selection_parameters();

        assert!(selector.request_audio(&mut engine, -1).is_none());
        assert!(!selector.select_subtitle(&mut engine, -1));
        assert!(selector.pending().is_none());
        assert_eq!(engine.selection_parameters(), before);
    }

    #[test]
    fn test_current_audio_override() {
        let mut engine = prepared();
        let mut selector = TrackSelector::new(1);
        assert!(TrackSelector::current_audio_override(&engine).is_none());
        assert_eq!(TrackSelector::log_audio_tracks(&engine), 2);

        selector.request_audio(&mut engine, 1).unwrap();
        let (selection, format) = TrackSelector::current_audio_override(&engine).unwrap();
        assert_eq!(selection, SelectionOverride { group: 0, track: 1 });
        assert_eq!(format.language.as_deref(), Some("es"));
    }

    #[test]
    fn test_before_mapping_is_noop() {
        let mut engine = SimulatedEngine::new(Arc::new(MediaLibrary::new()));
        let mut selector = TrackSelector::new(1);
        assert!(selector.request_audio(&mut engine, 0).is_none());
        assert!(!selector.select_subtitle(&mut engine, 0));
        assert!(!selector.disable_subtitle(&mut engine));
    }

    #[test]
    fn test_synthetic_audio_is_not_selectable() {
        let mut engine = prepared();
        engine.handle().hide_audio_groups(true);
        let mut selector = TrackSelector::new(1);

        assert_eq!(CatalogBuilder::build(&engine).audio.len(), 1);
        assert!(selector.request_audio(&mut engine, 0).is_none());
    }

    #[test]
    fn test_mismatch_forces_refresh_and_optimistic_marker() {
        let mut engine = prepared();
        let handle = engine.handle();
        handle.drop_overrides(u32::MAX);
        let mut selector = TrackSelector::new(1);
        let prepares = handle.prepare_count();

        let id = selector.request_audio(&mut engine, 1).unwrap();
        match selector.verify(&mut engine, id) {
            VerifyOutcome::RefreshForced { catalog, reverify } => {
                assert_eq!(catalog.selected_audio, Some(1));
                assert!(catalog.audio[1].selected);
                assert!(reverify.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(handle.prepare_count(), prepares + 1);
        assert_eq!(selector.optimistic_index(), Some(1));

        // Later rebuilds keep the forced marker while the engine disagrees
        assert_eq!(selector.catalog(&engine).selected_audio, Some(1));
        assert_eq!(CatalogBuilder::build(&engine).selected_audio, Some(0));
    }

    #[test]
    fn test_optimistic_marker_clears_on_convergence() {
        let mut engine = prepared();
        engine.handle().drop_overrides(1);
        let mut selector = TrackSelector::new(1);

        let id = selector.request_audio(&mut engine, 1).unwrap();
        assert!(matches!(
            selector.verify(&mut engine, id),
            VerifyOutcome::RefreshForced { .. }
        ));
        // The reapplied override was kept, so the engine now agrees
        assert_eq!(selector.catalog(&engine).selected_audio, Some(1));
        assert_eq!(selector.optimistic_index(), None);
    }

    #[test]
    fn test_refresh_budget_exhausted() {
        let mut engine = prepared();
        engine.handle().drop_overrides(u32::MAX);
        let mut selector = TrackSelector::new(0);

        let id = selector.request_audio(&mut engine, 1).unwrap();
        match selector.verify(&mut engine, id) {
            VerifyOutcome::Unconfirmed(catalog) => assert_eq!(catalog.selected_audio, Some(0)),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(selector.pending().is_none());
    }

    #[test]
    fn test_multiple_refreshes_reverify() {
        let mut engine = prepared();
        engine.handle().drop_overrides(u32::MAX);
        let mut selector = TrackSelector::new(2);

        let id = selector.request_audio(&mut engine, 1).unwrap();
        let next = match selector.verify(&mut engine, id) {
            VerifyOutcome::RefreshForced { reverify, .. } => reverify.unwrap(),
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(next, id);
        assert_eq!(selector.pending().unwrap().phase, SelectionPhase::RefreshForced);
        assert!(matches!(
            selector.verify(&mut engine, next),
            VerifyOutcome::RefreshForced { reverify: None, .. }
        ));
    }

    #[test]
    fn test_superseded_request_is_stale() {
        let mut engine = prepared();
        let mut selector = TrackSelector::new(1);
        let first = selector.request_audio(&mut engine, 1).unwrap();
        let second = selector.request_audio(&mut engine, 0).unwrap();

        assert_eq!(selector.verify(&mut engine, first), VerifyOutcome::Stale);
        assert!(matches!(
            selector.verify(&mut engine, second),
            VerifyOutcome::Verified(_)
        ));
    }

    #[test]
    fn test_subtitle_uses_global_index() {
        let media = SimulatedMedia::sample()
            .with_text_group(vec![
                TrackFormat::text("text/vtt", "fr"),
                TrackFormat::text("text/vtt", "de"),
            ]);
        let library = MediaLibrary::new().with_fallback(media);
        let mut engine = SimulatedEngine::new(Arc::new(library));
        engine
            .set_media_sources(vec![MediaSource::from_uri("a.mp4")])
            .unwrap();
        engine.prepare();
        let mut selector = TrackSelector::new(1);

        assert!(selector.select_subtitle(&mut engine, 2));
        let catalog = CatalogBuilder::build(&engine);
        assert!(catalog.subtitle[2].selected);
        assert_eq!(catalog.subtitle[2].language, "de");

        assert!(selector.disable_subtitle(&mut engine));
        assert!(CatalogBuilder::build(&engine).subtitle.iter().all(|t| !t.selected));
    }
}
