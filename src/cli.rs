use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start incident-assist as a service.
    Daemon {},

    /// Ingest a CSV export of resolved incidents.
    ///
    /// Every row is also matched against the incidents stored before this
    /// upload, so the output doubles as a batch of suggested resolutions.
    Upload {
        /// Path to the CSV file
        file: PathBuf,
    },

    /// Match a problem description against the stored incidents
    Search {
        /// Free-text problem description
        query: String,

        /// Maximum number of matches to return
        #[clap(short, long = "top-k")]
        k: Option<usize>,

        /// Minimum similarity [0.0, 1.0] for a match to count
        #[clap(short, long)]
        threshold: Option<f32>,
    },

    /// Print the embedding vector for a text, to verify the model is healthy
    Embed {
        /// Text to embed
        text: String,
    },
}
