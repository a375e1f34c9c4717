//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "marquee",
    version,
    author = "neur0map",
    about = "Answer natural-language questions about a movie collection",
    long_about = "Marquee retrieves movies for a question through keyword search, falling back to \
                  vector search over embeddings and then to plain substring matching, and \
                  composes an answer with a text-generation endpoint or an extractive summary."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/marquee/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration profile to apply (e.g., "offline", "atlas")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Retrieve documents for a query
    Query {
        /// Search query text
        query: String,

        /// Maximum number of results (defaults to retrieval.limit)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,

        /// Show which tiers were attempted
        #[arg(long)]
        explain: bool,
    },

    /// Ask a question and compose an answer
    Ask {
        /// Question to ask
        question: String,

        /// Skip the generation endpoint and use the extractive summary
        #[arg(long)]
        offline: bool,

        /// Number of documents to retrieve (defaults to retrieval.limit)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Show the answer and its sources as JSON
        #[arg(long)]
        json: bool,
    },

    /// Answer a conversational bot event and print the response envelope
    Respond {
        /// Event JSON file (reads stdin when omitted)
        event: Option<PathBuf>,
    },

    /// Load movies from a JSON array or JSON-lines file into the local store
    Ingest {
        /// Movies file
        file: PathBuf,
    },

    /// Embed stored movies that have no vector yet
    Backfill {
        /// Stop after this many documents
        #[arg(long)]
        max: Option<usize>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
