//! knn-stream command-line tool.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (build, inspect, search)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{build_index, inspect_index, run, search_index, BuildSummary, VectorRecord};
