//! Output formatting for CLI

use base64::{engine::general_purpose::STANDARD, Engine as _};
use kjplayer_core::{PoolStats, Reply, TrackCatalog, TrackKind};
use serde::Serialize;
use serde_json::Value;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Print `data` as pretty JSON
pub fn print_json<T: Serialize>(data: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Reply as sent over the JSON-lines channel; thumbnails travel as base64
pub fn reply_value(reply: &Reply) -> Value {
    match reply {
        Reply::Thumbnail(bytes) => Value::String(STANDARD.encode(bytes)),
        other => other.to_value(),
    }
}

pub fn print_catalog(catalog: &TrackCatalog, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(catalog);
        return;
    }
    for kind in TrackKind::ALL {
        let tracks = catalog.tracks(kind);
        println!("  {} ({}):", kind, tracks.len());
        for (i, track) in tracks.iter().enumerate() {
            println!(
                "    {}{} {} [{}] {} {}bps{}",
                if track.selected { "*" } else { " " },
                i,
                track.name,
                track.language,
                track.codec,
                track.bitrate,
                if track.synthetic { " (synthetic)" } else { "" }
            );
        }
    }
    match catalog.selected_audio {
        Some(index) => println!("  Selected audio: {}", index),
        None => println!("  Selected audio: none"),
    }
}

pub fn print_stats(label: &str, stats: &PoolStats, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "step": label, "stats": stats })
        ),
        OutputFormat::Text => println!(
            "{:<24} live={} active={} idle={}/{} detached={}",
            label, stats.live, stats.active, stats.idle, stats.capacity, stats.detached
        ),
    }
}
