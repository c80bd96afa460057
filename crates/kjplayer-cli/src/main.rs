//! KJ Player CLI - Headless Player Host
//!
//! Features:
//! - JSON-lines method channel over stdio
//! - Scripted demo session with audio selection verification
//! - Player pool inspection

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use output::OutputFormat;

/// KJ Player CLI - Embedded player bridge toolkit
#[derive(Parser)]
#[command(name = "kjplayer")]
#[command(version)]
#[command(about = "Headless host for the embedded media player bridge", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one session over stdin/stdout as JSON lines
    Serve {
        /// Source to load at creation
        #[arg(short, long)]
        source: Option<String>,

        /// Start playback once ready
        #[arg(long)]
        autoplay: Option<bool>,

        /// Initial position in milliseconds
        #[arg(long)]
        start_position: Option<u64>,

        /// JSON file describing the simulated media library
        #[arg(short, long)]
        library: Option<PathBuf>,

        /// Bridge configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Extract thumbnails with ffmpeg instead of a generated pattern
        #[arg(long)]
        ffmpeg: bool,
    },

    /// Run a scripted session against the simulated engine
    Demo {
        /// Source to play
        #[arg(short, long, default_value = "demo.mp4")]
        source: String,
    },

    /// Walk the player pool through acquire/release cycles
    Pool {
        /// Idle capacity
        #[arg(short, long, default_value = "3")]
        capacity: usize,

        /// Source keys to acquire
        #[arg(short, long, num_args = 1.., default_values_t = vec!["a.mp4".to_string(), "b.mp4".to_string()])]
        keys: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    kjplayer_core::init();

    match cli.command {
        Commands::Serve {
            source,
            autoplay,
            start_position,
            library,
            config,
            ffmpeg,
        } => {
            let params = kjplayer_core::SessionParams {
                source,
                autoplay,
                start_position_ms: start_position,
            };
            commands::serve(params, library, config, ffmpeg).await?;
        }
        Commands::Demo { source } => {
            commands::demo(&source, cli.format).await?;
        }
        Commands::Pool { capacity, keys } => {
            commands::pool(capacity, &keys, cli.format)?;
        }
    }

    Ok(())
}
