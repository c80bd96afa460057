//! Track discovery
//!
//! Builds one [`TrackCatalog`] from the engine's two track views. The
//! renderer-oriented mapping is authoritative; the active-groups view fills
//! in any kind the mapping left empty. Both the catalog and the selector
//! address tracks through the same flattened global index.

use crate::engine::{
    CurrentTrackGroup, FormatSupport, MappedTrackInfo, MediaEngine, TrackFormat,
    TrackSelectionParameters,
};
use crate::{FormatMetrics, TrackAddress, TrackCatalog, TrackDescriptor, TrackKind};
use tracing::{debug, warn};

/// Name of the placeholder audio descriptor
pub const DEFAULT_AUDIO_NAME: &str = "Default Audio";

const UNKNOWN_LANGUAGE: &str = "Unknown";
const UNKNOWN: &str = "unknown";

// =============================================================================
// Global Index
// =============================================================================

/// Translate a global index into `(group, track)` by walking groups in order
///
/// Zero-length groups occupy no slots.
pub fn resolve_global_index(group_lengths: &[usize], global: usize) -> Option<(usize, usize)> {
    let mut offset = 0;
    for (group, &len) in group_lengths.iter().enumerate() {
        if global < offset + len {
            return Some((group, global - offset));
        }
        offset += len;
    }
    None
}

/// Inverse of [`resolve_global_index`]
pub fn global_index(group_lengths: &[usize], group: usize, track: usize) -> Option<usize> {
    let len = *group_lengths.get(group)?;
    if track >= len {
        return None;
    }
    Some(group_lengths[..group].iter().sum::<usize>() + track)
}

// =============================================================================
// Catalog Builder
// =============================================================================

/// Reconciles the engine's track views into a catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogBuilder;

impl CatalogBuilder {
    /// Run one full discovery pass
    ///
    /// Before the engine has produced any mapping every list is empty.
    pub fn build(engine: &dyn MediaEngine) -> TrackCatalog {
        let params = engine.selection_parameters();
        let mapped = engine.mapped_track_info();
        let current = engine.current_tracks();

        let mut catalog = match &mapped {
            Some(info) => Self::from_mapped(info, &params),
            None => TrackCatalog::new(),
        };

        for kind in TrackKind::ALL {
            if catalog.tracks(kind).is_empty() {
                let fallback = Self::collect_current(&current, kind);
                if !fallback.is_empty() {
                    debug!(%kind, count = fallback.len(), "Using active track groups");
                }
                *catalog.tracks_mut(kind) = fallback;
            }
        }

        if catalog.audio.is_empty() {
            if let Some(format) = engine.audio_format() {
                warn!("Audio is playing but no audio tracks were reported");
                catalog.audio.push(Self::default_audio(&format));
            }
        }

        if params
            .disabled_renderers
            .iter()
            .any(|r| Self::renderer_kind(mapped.as_ref(), *r) == Some(TrackKind::Subtitle))
        {
            catalog.subtitle.iter_mut().for_each(|t| t.selected = false);
        }

        catalog.selected_audio = Self::selected_audio(&catalog, mapped.as_ref(), &params, &current);
        if let Some(index) = catalog.selected_audio {
            catalog.mark_selected_audio(index);
        }
        catalog
    }

    /// Catalog from the active-groups view alone
    pub fn build_from_current(engine: &dyn MediaEngine) -> TrackCatalog {
        let current = engine.current_tracks();
        let mut catalog = TrackCatalog::new();
        for kind in TrackKind::ALL {
            *catalog.tracks_mut(kind) = Self::collect_current(&current, kind);
        }
        catalog.selected_audio = selected_in_current(&current, TrackKind::Audio)
            .filter(|i| *i < catalog.audio.len())
            .or(if catalog.audio.is_empty() { None } else { Some(0) });
        catalog
    }

    /// Global audio index the engine currently reports as selected
    ///
    /// A valid override wins; otherwise the active-groups view decides.
    pub fn engine_selected_audio(engine: &dyn MediaEngine) -> Option<usize> {
        let params = engine.selection_parameters();
        if let Some(info) = engine.mapped_track_info() {
            if let Some(index) = override_index(&info, &params, TrackKind::Audio) {
                return Some(index);
            }
        }
        selected_in_current(&engine.current_tracks(), TrackKind::Audio)
    }

    fn from_mapped(info: &MappedTrackInfo, params: &TrackSelectionParameters) -> TrackCatalog {
        let mut catalog = TrackCatalog::new();
        for kind in TrackKind::ALL {
            let Some(renderer_index) = info.renderer_for(kind) else {
                continue;
            };
            let renderer = &info.renderers[renderer_index];
            let selection = params
                .override_for(renderer_index)
                .filter(|_| !params.is_renderer_disabled(renderer_index));
            let list = catalog.tracks_mut(kind);
            for (group_index, group) in renderer.groups.iter().enumerate() {
                for (track_index, format) in group.formats.iter().enumerate() {
                    let address = TrackAddress {
                        renderer: Some(renderer_index),
                        group: group_index,
                        track: track_index,
                    };
                    let supported =
                        renderer.track_support(group_index, track_index) == FormatSupport::Handled;
                    let selected = selection
                        .is_some_and(|s| s.group == group_index && s.track == track_index);
                    let descriptor =
                        describe(kind, format, Some(address), list.len(), supported, selected);
                    list.push(descriptor);
                }
            }
        }
        catalog
    }

    fn collect_current(current: &[CurrentTrackGroup], kind: TrackKind) -> Vec<TrackDescriptor> {
        let mut tracks = Vec::new();
        let groups = current.iter().filter(|g| g.kind() == Some(kind));
        for (group_index, group) in groups.enumerate() {
            for (track_index, format) in group.group.formats.iter().enumerate() {
                let address = TrackAddress {
                    renderer: None,
                    group: group_index,
                    track: track_index,
                };
                tracks.push(describe(
                    kind,
                    format,
                    Some(address),
                    tracks.len(),
                    group.is_track_supported(track_index),
                    group.is_track_selected(track_index),
                ));
            }
        }
        tracks
    }

    fn default_audio(format: &TrackFormat) -> TrackDescriptor {
        let mut descriptor = describe(TrackKind::Audio, format, None, 0, true, true);
        descriptor.name = DEFAULT_AUDIO_NAME.to_string();
        descriptor.language = UNKNOWN_LANGUAGE.to_string();
        descriptor.synthetic = true;
        descriptor
    }

    fn renderer_kind(mapped: Option<&MappedTrackInfo>, renderer: usize) -> Option<TrackKind> {
        mapped?.renderers.get(renderer)?.renderer_type.track_kind()
    }

    fn selected_audio(
        catalog: &TrackCatalog,
        mapped: Option<&MappedTrackInfo>,
        params: &TrackSelectionParameters,
        current: &[CurrentTrackGroup],
    ) -> Option<usize> {
        if catalog.audio.is_empty() {
            return None;
        }
        let from_override = mapped.and_then(|info| override_index(info, params, TrackKind::Audio));
        let index = from_override
            .or_else(|| selected_in_current(current, TrackKind::Audio))
            .filter(|i| *i < catalog.audio.len())
            .unwrap_or(0);
        Some(index)
    }
}

/// Global index of the override on the first renderer of `kind`, if it addresses a real track
fn override_index(
    info: &MappedTrackInfo,
    params: &TrackSelectionParameters,
    kind: TrackKind,
) -> Option<usize> {
    let renderer = info.renderer_for(kind)?;
    if params.is_renderer_disabled(renderer) {
        return None;
    }
    let selection = params.override_for(renderer)?;
    global_index(
        &info.renderers[renderer].group_lengths(),
        selection.group,
        selection.track,
    )
}

/// Global index of the first selected track of `kind` in the active-groups view
fn selected_in_current(current: &[CurrentTrackGroup], kind: TrackKind) -> Option<usize> {
    let mut offset = 0;
    for group in current.iter().filter(|g| g.kind() == Some(kind)) {
        if let Some(track) = group.selected.iter().position(|s| *s) {
            if track < group.group.len() {
                return Some(offset + track);
            }
        }
        offset += group.group.len();
    }
    None
}

fn describe(
    kind: TrackKind,
    format: &TrackFormat,
    address: Option<TrackAddress>,
    ordinal: usize,
    supported: bool,
    selected: bool,
) -> TrackDescriptor {
    let metrics = match kind {
        TrackKind::Video => FormatMetrics::Video {
            width: format.width.unwrap_or(0),
            height: format.height.unwrap_or(0),
            frame_rate: format.frame_rate.unwrap_or(0.0),
        },
        TrackKind::Audio => FormatMetrics::Audio {
            sample_rate: format.sample_rate.unwrap_or(0),
            channel_count: format.channel_count.unwrap_or(0),
        },
        TrackKind::Subtitle => FormatMetrics::Text {},
    };
    TrackDescriptor {
        kind,
        address,
        name: format
            .label
            .clone()
            .unwrap_or_else(|| format!("{} {}", kind.fallback_label(), ordinal + 1)),
        language: format
            .language
            .clone()
            .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string()),
        codec: format.codecs.clone().unwrap_or_else(|| UNKNOWN.to_string()),
        mime_type: format
            .sample_mime_type
            .clone()
            .unwrap_or_else(|| UNKNOWN.to_string()),
        bitrate: format.bitrate.unwrap_or(0),
        metrics,
        supported,
        selected,
        synthetic: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_global_index() {
        let lengths = [2, 3, 4];
        assert_eq!(resolve_global_index(&lengths, 0), Some((0, 0)));
        assert_eq!(resolve_global_index(&lengths, 1), Some((0, 1)));
        assert_eq!(resolve_global_index(&lengths, 2), Some((1, 0)));
        // a + b + 1 lands on the second track of the third group
        assert_eq!(resolve_global_index(&lengths, 2 + 3 + 1), Some((2, 1)));
        assert_eq!(resolve_global_index(&lengths, 9), None);
    }

    #[test]
    fn test_zero_length_groups_are_skipped() {
        let lengths = [0, 2, 0, 1];
        assert_eq!(resolve_global_index(&lengths, 0), Some((1, 0)));
        assert_eq!(resolve_global_index(&lengths, 2), Some((3, 0)));
        assert_eq!(global_index(&lengths, 3, 0), Some(2));
        assert_eq!(global_index(&lengths, 0, 0), None);
    }

    #[test]
    fn test_global_index_inverse() {
        let lengths = [3, 1, 2];
        for global in 0..6 {
            let (group, track) = resolve_global_index(&lengths, global).unwrap();
            assert_eq!(global_index(&lengths, group, track), Some(global));
        }
    }

    #[test]
    fn test_describe_fallback_names() {
        let descriptor = describe(
            TrackKind::Audio,
            &TrackFormat::default(),
            None,
            1,
            true,
            false,
        );
        assert_eq!(descriptor.name, "Audio Track 2");
        assert_eq!(descriptor.language, "Unknown");
        assert_eq!(descriptor.codec, "unknown");
        assert_eq!(descriptor.mime_type, "unknown");
    }
}

#[cfg(all(test, feature = "simulated"))]
mod catalog_tests {
    use super::*;
    use crate::engine::{MediaLibrary, SelectionOverride, SimulatedEngine, SimulatedMedia};
    use crate::MediaSource;
    use std::sync::Arc;

    fn prepared(media: SimulatedMedia) -> SimulatedEngine {
        let library = MediaLibrary::new().with_fallback(media);
        let mut engine = SimulatedEngine::new(Arc::new(library));
        engine
            .set_media_sources(vec![MediaSource::from_uri("clip.mp4")])
            .unwrap();
        engine.prepare();
        engine
    }

    fn two_audio_one_video() -> SimulatedMedia {
        SimulatedMedia::new(60_000)
            .with_video_group(vec![TrackFormat::video("video/avc", 1280, 720, 25.0)])
            .with_audio_group(vec![
                TrackFormat::audio("audio/mp4a-latm", "en", 44_100, 2),
                TrackFormat::audio("audio/mp4a-latm", "fr", 44_100, 2),
            ])
    }

    #[test]
    fn test_empty_before_mapping() {
        let library = MediaLibrary::new();
        let engine = SimulatedEngine::new(Arc::new(library));
        let catalog = CatalogBuilder::build(&engine);
        assert!(catalog.is_empty());
        assert_eq!(catalog.selected_audio, None);
    }

    #[test]
    fn test_default_selection_is_first_audio() {
        let engine = prepared(two_audio_one_video());
        let catalog = CatalogBuilder::build(&engine);

        assert_eq!(catalog.audio.len(), 2);
        assert_eq!(catalog.video.len(), 1);
        assert!(catalog.subtitle.is_empty());
        assert_eq!(catalog.selected_audio, Some(0));
        assert!(catalog.audio[0].selected);
        assert!(!catalog.audio[1].selected);
        assert_eq!(catalog.audio[1].name, "Audio Track 2");
    }

    #[test]
    fn test_override_selects_audio() {
        let mut engine = prepared(two_audio_one_video());
        let mut params = engine.selection_parameters();
        params.set_override(1, SelectionOverride { group: 0, track: 1 });
        engine.set_selection_parameters(params);

        let catalog = CatalogBuilder::build(&engine);
        assert_eq!(catalog.selected_audio, Some(1));
        assert!(catalog.audio[1].selected);
        assert!(!catalog.audio[0].selected);
        assert_eq!(CatalogBuilder::engine_selected_audio(&engine), Some(1));
    }

    #[test]
    fn test_fallback_to_active_groups() {
        let engine = prepared(two_audio_one_video());
        engine.handle().hide_mapped_tracks(true);

        let catalog = CatalogBuilder::build(&engine);
        assert_eq!(catalog.audio.len(), 2);
        assert!(catalog.audio.iter().all(|t| t.address.unwrap().renderer.is_none()));
        assert_eq!(catalog.selected_audio, Some(0));
    }

    #[test]
    fn test_synthetic_default_audio() {
        let engine = prepared(two_audio_one_video());
        engine.handle().hide_audio_groups(true);

        let catalog = CatalogBuilder::build(&engine);
        assert_eq!(catalog.audio.len(), 1);
        let audio = &catalog.audio[0];
        assert_eq!(audio.name, DEFAULT_AUDIO_NAME);
        assert!(audio.synthetic);
        assert!(audio.selected);
        assert!(audio.supported);
        assert!(audio.address.is_none());
        assert_eq!(catalog.selected_audio, Some(0));
    }

    #[test]
    fn test_disabled_text_renderer_clears_subtitle_selection() {
        let mut engine = prepared(SimulatedMedia::sample());
        let mut params = engine.selection_parameters();
        params.set_override(2, SelectionOverride { group: 0, track: 0 });
        engine.set_selection_parameters(params.clone());
        assert!(CatalogBuilder::build(&engine).subtitle[0].selected);

        params.set_renderer_disabled(2, true);
        engine.set_selection_parameters(params);
        assert!(!CatalogBuilder::build(&engine).subtitle[0].selected);
    }
}
