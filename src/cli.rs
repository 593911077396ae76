use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cf_core::Rendition;

#[derive(Parser)]
#[command(name = "castforge")]
#[command(author, version, about = "Live and on-demand HLS packaging server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the ingest and streaming server
    Start {
        /// Host to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Package a single file into an HLS asset
    Package {
        /// Input video file
        #[arg(required = true)]
        input: PathBuf,

        /// Output rendition as WIDTHxHEIGHT:VIDEOk:AUDIOk; repeat for a ladder
        #[arg(short, long = "rendition")]
        renditions: Vec<Rendition>,

        /// Storage root to publish into (defaults to storage.root)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,

    /// Generate a random secret for signed URLs
    GenerateSecret,
}
