//! Log output for the command-line tool
//!
//! Console output goes to stderr as bare messages; `--debug` adds
//! timestamps, levels, targets and line numbers. A log file, when given,
//! is replaced at startup and receives the same events without colours.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::cli::error::CliError;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Where and how much to log
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub debug: bool,
    /// No console output
    pub quiet: bool,
    pub logfile: Option<PathBuf>,
}

/// Default filter directive; `RUST_LOG` takes precedence when set
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "pg_upsert=debug"
    } else {
        "pg_upsert=info"
    }
}

fn filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
}

fn output_layer<W>(writer: W, debug: bool, ansi: bool) -> BoxedLayer
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    if debug {
        layer
            .with_line_number(true)
            .with_filter(filter(debug))
            .boxed()
    } else {
        layer
            .without_time()
            .with_target(false)
            .with_level(false)
            .with_filter(filter(debug))
            .boxed()
    }
}

fn create_logfile(path: &Path) -> Result<File, CliError> {
    File::create(path).map_err(|e| {
        CliError::IoError(format!("Failed to create log file {}: {}", path.display(), e))
    })
}

/// Install the global subscriber
pub fn init_logging(options: &LogOptions) -> Result<(), CliError> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if !options.quiet {
        layers.push(output_layer(std::io::stderr, options.debug, true));
    }
    if let Some(path) = &options.logfile {
        let file = create_logfile(path)?;
        layers.push(output_layer(Mutex::new(file), options.debug, false));
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| CliError::IoError(format!("Failed to initialize logging: {}", e)))
}
