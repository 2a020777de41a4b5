//! knn-stream
//!
//! Builds, inspects and searches flat vector indexes through the
//! managed-stream bridge.
//!
//! # Usage
//!
//! ```bash
//! knn-stream build --input vectors.json --output index.knnf \
//!     [--metric ip] [--encoding int8] [--external]
//! knn-stream inspect --index index.knnf
//! knn-stream search --index index.knnf --query "1,2,3" [-k 5] [--adc] [--vectors vectors.json]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/knn-stream/config.toml)
//! 3. Environment variables (KNN_STREAM_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use knn_cli::{run, Cli};

fn main() -> Result<()> {
    run(Cli::parse())
}
