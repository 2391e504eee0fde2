//! QA-and-upsert run command
//!
//! Settings are layered: configuration file, then command-line flags that
//! were given, then environment variables.

use std::path::PathBuf;

use tracing::debug;

use crate::cli::error::CliError;
use crate::cli::logging::{LogOptions, init_logging};
use crate::cli::prompt::ConsolePrompt;
use crate::config::{UpsertConfig, UpsertMethod, split_list};
use crate::database::PostgresBackend;
use crate::engine::PgUpsert;
use crate::error::UpsertError;

/// Run command arguments
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Table names; each value may itself be a comma-separated list
    pub tables: Vec<String>,
    pub staging_schema: Option<String>,
    pub base_schema: Option<String>,
    pub upsert_method: Option<UpsertMethod>,
    pub commit: bool,
    pub interactive: bool,
    /// Comma-separated columns never written to base tables
    pub exclude_columns: Option<String>,
    /// Comma-separated columns skipped by the not-null check
    pub null_columns: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub config_file: Option<PathBuf>,
    pub logfile: Option<PathBuf>,
    pub debug: bool,
    pub quiet: bool,
}

impl RunArgs {
    /// Overlay the flags that were given onto `config`
    pub fn merge_into(&self, mut config: UpsertConfig) -> UpsertConfig {
        let tables: Vec<String> = self.tables.iter().flat_map(|t| split_list(t)).collect();
        if !tables.is_empty() {
            config.tables = tables;
        }
        if let Some(schema) = &self.staging_schema {
            config.staging_schema = schema.clone();
        }
        if let Some(schema) = &self.base_schema {
            config.base_schema = schema.clone();
        }
        if let Some(method) = self.upsert_method {
            config.upsert_method = method;
        }
        if let Some(columns) = &self.exclude_columns {
            config.exclude_columns = split_list(columns);
        }
        if let Some(columns) = &self.null_columns {
            config.null_columns = split_list(columns);
        }
        if let Some(host) = &self.host {
            config.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(database) = &self.database {
            config.database = Some(database.clone());
        }
        if let Some(user) = &self.user {
            config.user = Some(user.clone());
        }
        if let Some(logfile) = &self.logfile {
            config.logfile = Some(logfile.display().to_string());
        }
        config.commit |= self.commit;
        config.interactive |= self.interactive;
        config.debug |= self.debug;
        config.quiet |= self.quiet;
        config
    }

    /// Build the run configuration from the file, the flags and the environment
    pub fn resolve(&self) -> Result<UpsertConfig, CliError> {
        let base = match &self.config_file {
            Some(path) if !path.exists() => return Err(CliError::FileNotFound(path.clone())),
            Some(path) => UpsertConfig::load(path)?,
            None => UpsertConfig::default(),
        };
        let mut config = self.merge_into(base);
        config.apply_env_overrides();
        Ok(config)
    }
}

/// Configuration problems found before connecting are argument errors
fn argument_error(err: UpsertError) -> CliError {
    match err {
        UpsertError::Config(msg) => CliError::InvalidArgument(msg),
        other => CliError::Upsert(other),
    }
}

/// Run QA checks and upserts as configured
///
/// Fails when QA finds errors, when the operator cancels, or on any
/// configuration or database error.
pub fn handle_run(args: &RunArgs) -> Result<(), CliError> {
    let config = args.resolve()?;

    init_logging(&LogOptions {
        debug: config.debug,
        quiet: config.quiet,
        logfile: config.logfile.as_ref().map(PathBuf::from),
    })?;
    if let Ok(settings) = serde_yaml::to_string(&config) {
        debug!("Run configuration:\n{}", settings);
    }

    let connection_string = config.connection_string().map_err(argument_error)?;
    config.validate().map_err(argument_error)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::IoError(format!("Failed to create runtime: {}", e)))?;

    rt.block_on(async {
        let db = PostgresBackend::new(&connection_string).await?;
        debug!("Connected to {}", db);

        let mut upsert = PgUpsert::new(db, config.clone()).await?;
        if config.interactive {
            upsert = upsert.with_decisions(ConsolePrompt::new());
        }

        let result = upsert.run().await;
        upsert.close().await?;

        let summary = result?;
        if !summary.qa_passed {
            return Err(UpsertError::QaFailed(summary.failing_tables().join(", ")).into());
        }
        Ok(())
    })
}
