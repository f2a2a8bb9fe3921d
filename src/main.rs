//! CLI entry point for ddas-sort
//!
//! Streams protocol records from an input file through the sorter into an
//! output file. Hit-bearing records come out as time-ordered single-hit
//! records; every other record passes through in place.
//!
//! # Usage
//!
//! ```bash
//! ddas-sort --input run-0042.evt --output run-0042-sorted.evt --window-ns 5e9
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use ddas_sort::config::SorterConfig;
use ddas_sort::io::{RecordFileSource, RecordSink, WriterSink};
use ddas_sort::logging::{self, LogConfig, LogFormat};
use ddas_sort::Orchestrator;

#[derive(Parser)]
#[command(name = "ddas-sort")]
#[command(about = "Time-order digitizer hits across modules", long_about = None)]
struct Cli {
    /// Input file of protocol records
    #[arg(long)]
    input: PathBuf,

    /// Output file for sorted records
    #[arg(long)]
    output: PathBuf,

    /// Configuration file (TOML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Merge window in nanoseconds (overrides the configuration)
    #[arg(long)]
    window_ns: Option<f64>,

    /// Log output format (overrides the configuration)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SorterConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SorterConfig::load_env().context("loading configuration")?,
    };
    if let Some(window_ns) = cli.window_ns {
        config.sorter.window_ns = window_ns;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.validate()?;

    logging::init(LogConfig::from_settings(&config.logging)?)?;

    let input = tokio::fs::File::open(&cli.input)
        .await
        .with_context(|| format!("opening input {}", cli.input.display()))?;
    let output = File::create(&cli.output)
        .with_context(|| format!("creating output {}", cli.output.display()))?;

    let mut source = RecordFileSource::new(input, config.sorter.max_chunk_bytes);
    let mut sink = WriterSink::new(BufWriter::new(output));
    let mut sorter = Orchestrator::new(&config.sorter);

    info!(
        input = %cli.input.display(),
        output = %cli.output.display(),
        window_ns = config.sorter.window_ns,
        "Sorting"
    );
    let stats = sorter.run(&mut source, &mut sink).await?;
    sink.flush()?;

    info!(
        records = stats.records,
        hits_emitted = stats.hits_emitted,
        late_hits = stats.late_hits,
        "Done"
    );
    Ok(())
}
