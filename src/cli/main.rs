//! CLI binary entry point for pg-upsert

#[cfg(feature = "cli")]
use clap::{ArgAction, Parser};
#[cfg(feature = "cli")]
use pg_upsert::UpsertMethod;
#[cfg(feature = "cli")]
use pg_upsert::cli::commands::run::{RunArgs, handle_run};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "pg-upsert")]
#[command(about = "Run not-null, primary key, foreign key and check constraint QA checks on \
                   PostgreSQL staging tables, then update and insert them into base tables")]
#[command(version)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// Table name(s), repeatable or comma-separated
    #[arg(short = 't', long = "tables")]
    tables: Vec<String>,

    /// Staging schema name [default: staging]
    #[arg(short = 's', long = "staging-schema")]
    staging_schema: Option<String>,

    /// Base schema name [default: public]
    #[arg(short = 'b', long = "base-schema")]
    base_schema: Option<String>,

    /// Upsert method: upsert, update or insert [default: upsert]
    #[arg(short = 'm', long = "upsert-method")]
    upsert_method: Option<UpsertMethod>,

    /// Commit changes to the database
    #[arg(short = 'c', long)]
    commit: bool,

    /// Confirm each step interactively
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Comma-separated columns to leave out of the upsert
    #[arg(short = 'e', long = "exclude-columns")]
    exclude_columns: Option<String>,

    /// Comma-separated columns to leave out of the not-null check
    #[arg(short = 'n', long = "null-columns")]
    null_columns: Option<String>,

    /// Database host
    #[arg(short = 'h', long)]
    host: Option<String>,

    /// Database port [default: 5432]
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Database name
    #[arg(short = 'd', long)]
    database: Option<String>,

    /// Database user
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// YAML configuration file
    #[arg(short = 'f', long = "config-file")]
    config_file: Option<PathBuf>,

    /// Write log messages to this file, replacing it
    #[arg(short = 'l', long)]
    logfile: Option<PathBuf>,

    /// Display debug output
    #[arg(long)]
    debug: bool,

    /// Suppress all console output
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Print version
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,
}

#[cfg(feature = "cli")]
impl From<Cli> for RunArgs {
    fn from(cli: Cli) -> Self {
        RunArgs {
            tables: cli.tables,
            staging_schema: cli.staging_schema,
            base_schema: cli.base_schema,
            upsert_method: cli.upsert_method,
            commit: cli.commit,
            interactive: cli.interactive,
            exclude_columns: cli.exclude_columns,
            null_columns: cli.null_columns,
            host: cli.host,
            port: cli.port,
            database: cli.database,
            user: cli.user,
            config_file: cli.config_file,
            logfile: cli.logfile,
            debug: cli.debug,
            quiet: cli.quiet,
        }
    }
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();
    let args = RunArgs::from(cli);

    if let Err(e) = handle_run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
