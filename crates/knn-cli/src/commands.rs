//! Command implementations.
//!
//! Every command runs against an in-process managed runtime: index files are
//! registered as managed streams and all reads and writes go through the
//! stream adapters, the same path a host runtime would drive.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{bail, Context, Result};
use knn_index::{
    init_shared_state, is_shared_state_required, load_index_with_stream,
    load_index_with_stream_adc, read_index_header, set_shared_state, write_index, FlatIndex,
    IndexHeader, LoadOptions, Query, SearchResult, Storage, StoreOptions,
};
use knn_runtime::{LocalRuntime, ObjRef, VectorSupply};
use knn_types::{Metric, Settings, VectorEncoding};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cli::{Cli, Commands};

/// One entry of a vectors file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: i64,
    pub vector: Vec<f32>,
}

/// What `build` wrote.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub path: String,
    pub vectors: usize,
    pub dimension: usize,
    pub metric: Metric,
    pub encoding: VectorEncoding,
    pub external: bool,
}

/// Load settings and apply CLI overrides.
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Install the fmt subscriber, `RUST_LOG` first, configured level otherwise.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Run a parsed command line, printing results to stdout.
pub fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(cli.config.as_deref(), cli.log_level.as_deref())?;
    init_logging(&settings)?;

    match cli.command {
        Commands::Build {
            input,
            output,
            metric,
            encoding,
            external,
        } => {
            let summary = build_index(
                &settings,
                Path::new(&input),
                Path::new(&output),
                metric.unwrap_or(settings.index.metric),
                encoding,
                external || settings.index.external_vectors,
            )?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Inspect { index } => {
            let header = inspect_index(&settings, Path::new(&index))?;
            println!("{}", serde_json::to_string_pretty(&header)?);
        }
        Commands::Search {
            index,
            vectors,
            adc,
            query,
            k,
        } => {
            let results = search_index(
                &settings,
                Path::new(&index),
                vectors.as_deref().map(Path::new),
                adc,
                &query,
                k,
            )?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }
    Ok(())
}

/// Read a JSON vectors file.
pub fn read_vectors(path: &Path) -> Result<Vec<VectorRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let records: Vec<VectorRecord> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    if records.is_empty() {
        bail!("{} contains no vectors", path.display());
    }
    Ok(records)
}

fn to_code(value: f32) -> Result<i8> {
    if value.fract() != 0.0 || value < f32::from(i8::MIN) || value > f32::from(i8::MAX) {
        bail!("{} is not an int8 code", value);
    }
    Ok(value as i8)
}

fn to_codes(vector: &[f32]) -> Result<Vec<i8>> {
    vector.iter().map(|&v| to_code(v)).collect()
}

/// Build an index from `input` and stream it to `output`.
pub fn build_index(
    settings: &Settings,
    input: &Path,
    output: &Path,
    metric: Metric,
    encoding: VectorEncoding,
    external: bool,
) -> Result<BuildSummary> {
    let records = read_vectors(input)?;
    let dimension = records[0].vector.len();
    let mut index = FlatIndex::new(dimension, metric, encoding)?;
    for record in &records {
        match encoding {
            VectorEncoding::Float32 => index.add_float(record.id, &record.vector)?,
            VectorEncoding::Int8 => index.add_int8(record.id, &to_codes(&record.vector)?)?,
        }
    }
    debug!(vectors = index.len(), dimension, "Built index");

    let file = File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let runtime = LocalRuntime::from_settings(&settings.runtime);
    let stream = runtime.register_output(BufWriter::new(file));
    {
        let env = runtime.attach();
        let options = StoreOptions::from_settings(settings).with_external_vectors(external);
        write_index(&env, Some(stream), &index, &options)
            .with_context(|| format!("Failed to write {}", output.display()))?;
    }
    runtime.unregister(stream);

    info!(path = %output.display(), vectors = index.len(), "Index written");
    Ok(BuildSummary {
        path: output.display().to_string(),
        vectors: index.len(),
        dimension,
        metric,
        encoding,
        external,
    })
}

fn open_input(
    runtime: &LocalRuntime,
    path: &Path,
    vectors: Option<VectorSupply>,
) -> Result<ObjRef> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    Ok(match vectors {
        Some(vectors) => runtime.register_input_with_vectors(reader, vectors),
        None => runtime.register_input(reader),
    })
}

/// Read the header of the index at `path`.
pub fn inspect_index(settings: &Settings, path: &Path) -> Result<IndexHeader> {
    let runtime = LocalRuntime::from_settings(&settings.runtime);
    let stream = open_input(&runtime, path, None)?;
    let env = runtime.attach();
    let header = read_index_header(&env, Some(stream), &LoadOptions::from_settings(settings))
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(header)
}

fn supply(records: &[VectorRecord], encoding: VectorEncoding) -> Result<VectorSupply> {
    Ok(match encoding {
        VectorEncoding::Float32 => {
            VectorSupply::Float(records.iter().map(|r| r.vector.clone()).collect())
        }
        VectorEncoding::Int8 => VectorSupply::Int8(
            records
                .iter()
                .map(|r| to_codes(&r.vector))
                .collect::<Result<_>>()?,
        ),
    })
}

/// Parse a comma-separated query vector.
pub fn parse_query(query: &str) -> Result<Vec<f32>> {
    query
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("Invalid query component {:?}", part))
        })
        .collect()
}

/// Load the index at `path` and return the `k` closest vectors to `query`.
pub fn search_index(
    settings: &Settings,
    path: &Path,
    vectors: Option<&Path>,
    adc: bool,
    query: &str,
    k: usize,
) -> Result<Vec<SearchResult>> {
    let header = inspect_index(settings, path)?;
    let supply = match (header.storage, vectors) {
        (Storage::External, Some(vectors)) => {
            Some(supply(&read_vectors(vectors)?, header.encoding)?)
        }
        (Storage::External, None) => {
            bail!("{} stores vectors externally; pass --vectors", path.display())
        }
        (Storage::Inline, _) => None,
    };

    let runtime = LocalRuntime::from_settings(&settings.runtime);
    let stream = open_input(&runtime, path, supply)?;
    let options = LoadOptions::from_settings(settings);
    let mut index = {
        let env = runtime.attach();
        if adc {
            load_index_with_stream_adc(&env, Some(stream), &options)?
        } else {
            load_index_with_stream(&env, Some(stream), &options)?
        }
    };
    runtime.unregister(stream);

    if is_shared_state_required(&index) {
        let state = init_shared_state(&index)?;
        set_shared_state(&mut index, state)?;
    }

    let query = parse_query(query)?;
    let results = match index.encoding() {
        VectorEncoding::Int8 => index.search(Query::Int8(&to_codes(&query)?), k)?,
        VectorEncoding::Float32 => index.search(Query::Float(&query), k)?,
    };
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        assert_eq!(parse_query("1, 2.5,-3").unwrap(), vec![1.0, 2.5, -3.0]);
        assert!(parse_query("1,x").is_err());
    }

    #[test]
    fn test_int8_codes() {
        assert_eq!(to_codes(&[1.0, -128.0, 127.0]).unwrap(), vec![1, -128, 127]);
        assert!(to_code(0.5).is_err());
        assert!(to_code(128.0).is_err());
    }
}
