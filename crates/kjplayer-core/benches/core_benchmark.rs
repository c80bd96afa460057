//! Benchmark tests for kjplayer-core operations
//!
//! Run with: cargo bench -p kjplayer-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;

use kjplayer_core::bridge::{BridgeEvent, Command, MethodCall};
use kjplayer_core::engine::{MediaEngine, MediaLibrary, SimulatedEngine, SimulatedMedia, TrackFormat};
use kjplayer_core::tracks::{resolve_global_index, CatalogBuilder};
use kjplayer_core::MediaSource;

// ============================================================================
// Helpers
// ============================================================================

/// Media with `groups` audio groups of three languages each
fn multi_language_media(groups: usize) -> SimulatedMedia {
    let mut media = SimulatedMedia::new(3_600_000)
        .with_video_group(vec![TrackFormat::video("video/avc", 1920, 1080, 30.0)]);
    for g in 0..groups {
        media = media.with_audio_group(
            ["en", "es", "fr"]
                .iter()
                .map(|lang| {
                    TrackFormat::audio("audio/mp4a-latm", lang, 48_000, 2)
                        .with_label(format!("{lang} {g}"))
                })
                .collect(),
        );
    }
    media.with_text_group(vec![TrackFormat::text("text/vtt", "en")])
}

fn prepared_engine(groups: usize) -> SimulatedEngine {
    let library = MediaLibrary::new().with_fallback(multi_language_media(groups));
    let mut engine = SimulatedEngine::new(Arc::new(library));
    engine
        .set_media_sources(vec![MediaSource::from_uri("bench.mp4")])
        .expect("bench media loads");
    engine.prepare();
    engine
}

// ============================================================================
// Track Catalog Benchmarks
// ============================================================================

fn bench_catalog_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog");

    for groups in [1usize, 4, 16] {
        let engine = prepared_engine(groups);
        group.bench_with_input(BenchmarkId::new("build", groups), &engine, |b, engine| {
            b.iter(|| CatalogBuilder::build(black_box(engine)))
        });
        group.bench_with_input(
            BenchmarkId::new("build_from_current", groups),
            &engine,
            |b, engine| b.iter(|| CatalogBuilder::build_from_current(black_box(engine))),
        );
    }

    group.finish();
}

fn bench_global_index(c: &mut Criterion) {
    let lengths: Vec<usize> = (0..64).map(|i| i % 5).collect();
    let total: usize = lengths.iter().sum();

    c.bench_function("resolve_global_index", |b| {
        b.iter(|| {
            for global in 0..total {
                black_box(resolve_global_index(black_box(&lengths), global));
            }
        })
    });
}

// ============================================================================
// Wire Protocol Benchmarks
// ============================================================================

fn bench_command_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_parse");

    let calls = [
        MethodCall::bare("play"),
        MethodCall::new("seekTo", json!({ "position": 125_000 })),
        MethodCall::new("setAudioTrack", json!({ "index": 2 })),
        MethodCall::new(
            "addMediaItems",
            json!({ "mediaItems": ["a.mp4", "b.mp4", "c.mp4", "d.mp4"] }),
        ),
    ];

    for call in &calls {
        group.bench_with_input(BenchmarkId::from_parameter(&call.method), call, |b, call| {
            b.iter(|| Command::parse(black_box(call)))
        });
    }

    group.finish();
}

fn bench_tracks_event_encoding(c: &mut Criterion) {
    let engine = prepared_engine(4);
    let event = BridgeEvent::tracks(CatalogBuilder::build(&engine), false);

    c.bench_function("encode_tracks_event", |b| {
        b.iter(|| serde_json::to_vec(black_box(&event)))
    });
}

criterion_group!(catalog_benches, bench_catalog_build, bench_global_index);
criterion_group!(protocol_benches, bench_command_parse, bench_tracks_event_encoding);
criterion_main!(catalog_benches, protocol_benches);
