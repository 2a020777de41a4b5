//! CLI argument parsing.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};
use knn_types::{Metric, VectorEncoding};

/// Stream-backed vector index tool
///
/// Builds, inspects and searches flat vector indexes, moving every byte
/// through the managed-stream bridge.
#[derive(Parser, Debug)]
#[command(name = "knn-stream")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/knn-stream/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an index from a JSON file of vectors
    Build {
        /// JSON array of {"id": .., "vector": [..]}
        #[arg(short, long)]
        input: String,

        /// Index file to write
        #[arg(short, long)]
        output: String,

        /// Distance metric (l2, ip); defaults to the configured one
        #[arg(short, long)]
        metric: Option<Metric>,

        /// Stored encoding (float, int8)
        #[arg(short, long, default_value = "float")]
        encoding: VectorEncoding,

        /// Leave vectors out of the file; search replays them from --vectors
        #[arg(long)]
        external: bool,
    },

    /// Print an index header as JSON
    Inspect {
        /// Index file
        #[arg(short, long)]
        index: String,
    },

    /// Search an index
    Search {
        /// Index file
        #[arg(short, long)]
        index: String,

        /// Vectors file for indexes built with --external
        #[arg(long)]
        vectors: Option<String>,

        /// Widen int8 codes so float queries can be scored
        #[arg(long)]
        adc: bool,

        /// Comma-separated query vector, e.g. "1,2,3"
        #[arg(short, long)]
        query: String,

        /// Number of results
        #[arg(short, default_value_t = 5)]
        k: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_build() {
        let cli = Cli::parse_from([
            "knn-stream",
            "build",
            "--input",
            "vectors.json",
            "--output",
            "index.knnf",
            "--metric",
            "ip",
            "--encoding",
            "int8",
            "--external",
        ]);
        match cli.command {
            Commands::Build {
                metric,
                encoding,
                external,
                ..
            } => {
                assert_eq!(metric, Some(Metric::InnerProduct));
                assert_eq!(encoding, VectorEncoding::Int8);
                assert!(external);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_cli_parse_search_defaults() {
        let cli = Cli::parse_from([
            "knn-stream",
            "--log-level",
            "debug",
            "search",
            "--index",
            "index.knnf",
            "--query",
            "1,2,3",
        ]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Search { k, adc, vectors, .. } => {
                assert_eq!(k, 5);
                assert!(!adc);
                assert!(vectors.is_none());
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_encoding() {
        assert!(Cli::try_parse_from([
            "knn-stream",
            "build",
            "--input",
            "a.json",
            "--output",
            "b.knnf",
            "--encoding",
            "f16",
        ])
        .is_err());
    }
}
