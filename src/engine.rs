//! Run coordinator
//!
//! [`PgUpsert`] ties the pieces of a run together: it validates the
//! configuration and the database objects, runs the QA checks over every
//! selected table, upserts the tables in dependency order when QA passed,
//! and finally commits or rolls back.
//!
//! Everything happens on one connection inside one transaction. Nothing is
//! committed before [`PgUpsert::commit`].
//!
//! ## Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use pg_upsert::{PgUpsert, PostgresBackend, UpsertConfig};
//!
//! let config = UpsertConfig {
//!     tables: vec!["genres".to_string(), "books".to_string()],
//!     commit: true,
//!     ..UpsertConfig::default()
//! };
//! let db = PostgresBackend::new("host=localhost dbname=library user=loader").await?;
//!
//! let mut upsert = PgUpsert::new(db, config).await?;
//! let summary = upsert.run().await?;
//! println!("QA passed: {}, committed: {}", summary.qa_passed, summary.committed);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::config::UpsertConfig;
use crate::control::{ControlTable, TableSpec};
use crate::database::{Database, QueryResult, format_table};
use crate::decision::{
    AutoContinue, CONTINUE_CANCEL, ConfirmKind, ConfirmRequest, Decision, DecisionProvider,
};
use crate::dependency::DependencyResolver;
use crate::error::{UpsertError, UpsertResult};
use crate::qa::{CheckKind, QaTarget, run_check};
use crate::upsert::{self, UpsertOutcome, UpsertTarget};

/// A per-table step of a run
#[derive(Debug, Clone, Copy)]
enum Phase {
    Check(CheckKind),
    Upsert,
}

/// Result of [`PgUpsert::run`]
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub qa_passed: bool,
    pub committed: bool,
    /// Final control table
    pub tables: Vec<TableSpec>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// Tables with at least one QA error
    pub fn failing_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.has_errors())
            .map(|t| t.table_name.as_str())
            .collect()
    }
}

/// QA and upsert engine for one set of staging tables
pub struct PgUpsert<D: Database> {
    db: D,
    catalog: Catalog,
    control: ControlTable,
    config: UpsertConfig,
    decisions: Box<dyn DecisionProvider>,
    qa_passed: bool,
}

impl<D: Database> PgUpsert<D> {
    /// Validate the configuration and the database objects it names
    ///
    /// Fails with [`UpsertError::Config`] for invalid settings,
    /// [`UpsertError::InvalidSchemas`] when a schema is missing and
    /// [`UpsertError::InvalidTables`] listing every missing base or staging table.
    pub async fn new(db: D, mut config: UpsertConfig) -> UpsertResult<Self> {
        config.validate()?;
        config.tables = config
            .tables
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        debug!("Connected to {} database", db.backend_type());

        let catalog = Catalog::new();

        debug!(
            "Validating schemas {} and {}",
            config.base_schema, config.staging_schema
        );
        let missing = catalog
            .missing_schemas(&db, &config.base_schema, &config.staging_schema)
            .await?;
        if !missing.is_empty() {
            return Err(UpsertError::InvalidSchemas(missing.join(", ")));
        }

        debug!("Validating tables {}", config.tables.join(", "));
        let missing = catalog
            .missing_tables(&db, &config.base_schema, &config.staging_schema, &config.tables)
            .await?;
        if !missing.is_empty() {
            error!("Invalid table(s) specified:");
            for table in &missing {
                error!("  {}", table);
            }
            return Err(UpsertError::InvalidTables(missing.join(", ")));
        }

        let mut upsert = Self {
            db,
            catalog,
            control: ControlTable::new(),
            config,
            decisions: Box::new(AutoContinue),
            qa_passed: false,
        };
        upsert.init_control();
        Ok(upsert)
    }

    /// Use `decisions` for every confirmation
    pub fn with_decisions(mut self, decisions: impl DecisionProvider + 'static) -> Self {
        self.decisions = Box::new(decisions);
        self
    }

    pub fn control(&self) -> &ControlTable {
        &self.control
    }

    pub fn config(&self) -> &UpsertConfig {
        &self.config
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    /// Whether the last [`PgUpsert::qa_all`] found no errors
    pub fn qa_passed(&self) -> bool {
        self.qa_passed
    }

    /// Roll back anything pending and close the connection
    pub async fn close(self) -> UpsertResult<()> {
        self.db.close().await?;
        Ok(())
    }

    fn init_control(&mut self) {
        debug!("Initializing upsert control table");
        self.control.initialize(
            &self.config.tables,
            &self.config.exclude_columns,
            &self.config.null_columns,
            self.config.interactive,
        );
    }

    fn control_text(&self) -> String {
        format_table(&self.control.to_query_result())
    }

    /// Log the control table, or show it when interactive
    pub fn show_control(&self) {
        if self.config.interactive {
            let request = ConfirmRequest::new(
                ConfirmKind::Control,
                "Control Table",
                "Control table contents:",
                self.control.to_query_result(),
                CONTINUE_CANCEL,
            );
            self.decisions.confirm(&request);
        } else {
            info!("Control table contents:\n{}", self.control_text());
        }
    }

    /// Run `phase` for every table of the control table, in its current order
    async fn process_each(&mut self, phase: Phase) -> UpsertResult<()> {
        self.control.reset_processed();
        while let Some(table) = self
            .control
            .next_unprocessed()
            .map(|spec| spec.table_name.clone())
        {
            match phase {
                Phase::Check(kind) => {
                    self.qa_one(kind, &table).await?;
                }
                Phase::Upsert => {
                    self.upsert_one(&table).await?;
                }
            }
            self.control.mark_processed(&table);
        }
        Ok(())
    }

    /// Run all four QA checks on every table
    ///
    /// Findings are recorded in the control table. Returns whether every
    /// table passed.
    pub async fn qa_all(&mut self) -> UpsertResult<bool> {
        self.control.reset_run_fields();
        self.qa_passed = false;

        for kind in CheckKind::ALL {
            info!("==={} checks===", kind);
            let start = Utc::now();
            self.process_each(Phase::Check(kind)).await?;
            debug!(
                "{} checks completed in {}",
                kind,
                format_elapsed(Utc::now() - start)
            );
            if !self.config.interactive {
                debug!("Control table after {} checks:", kind);
                debug!("\n{}", self.control_text());
            }
        }

        if self.control.has_errors() {
            let failing = self.control.rows_for(self.control.failing().into_iter());
            debug!("QA checks failed");
            debug!("\n{}", self.control_text());
            if self.config.interactive {
                // The gate holds whatever the answer
                self.decisions.confirm(&ConfirmRequest::new(
                    ConfirmKind::QaSummary,
                    "QA Errors",
                    "QA checks failed. Below is a summary of the errors:",
                    failing,
                    CONTINUE_CANCEL,
                ));
            } else {
                error!("===QA checks failed. Below is a summary of the errors===");
                error!("\n{}", format_table(&failing));
            }
            return Ok(false);
        }

        self.qa_passed = true;
        Ok(true)
    }

    /// Run one check on one table and record its result
    ///
    /// Returns the control-table error string, `None` when the check passed.
    pub async fn qa_one(&mut self, kind: CheckKind, table: &str) -> UpsertResult<Option<String>> {
        let Some(spec) = self.control.get(table) else {
            warn!("Table {} not found in control table", table);
            return Ok(None);
        };
        let exclude_null_checks = spec.exclude_null_checks.clone();
        let interactive = spec.interactive;

        let target = QaTarget {
            base_schema: &self.config.base_schema,
            stg_schema: &self.config.staging_schema,
            table,
            exclude_null_checks: &exclude_null_checks,
        };
        let outcome = run_check(kind, &self.db, &mut self.catalog, &target).await?;

        if interactive && kind.confirms() {
            for finding in &outcome.findings {
                let request = ConfirmRequest::new(
                    ConfirmKind::Qa(kind),
                    finding.title.clone(),
                    finding.message.clone(),
                    finding.rows.clone(),
                    CONTINUE_CANCEL,
                );
                if self.decisions.confirm(&request) != Decision::Continue {
                    warn!("Script cancelled by user");
                    return Err(UpsertError::Cancelled);
                }
            }
        }

        let error = outcome.error();
        if let Some(spec) = self.control.get_mut(table) {
            *kind.error_field_mut(spec) = error.clone();
        }
        Ok(error)
    }

    /// Not-null check on one table
    pub async fn qa_one_null(&mut self, table: &str) -> UpsertResult<Option<String>> {
        self.qa_one(CheckKind::NotNull, table).await
    }

    /// Primary key duplicate check on one table
    pub async fn qa_one_pk(&mut self, table: &str) -> UpsertResult<Option<String>> {
        self.qa_one(CheckKind::PrimaryKey, table).await
    }

    /// Foreign key check on one table
    pub async fn qa_one_fk(&mut self, table: &str) -> UpsertResult<Option<String>> {
        self.qa_one(CheckKind::ForeignKey, table).await
    }

    /// Check constraint check on one table
    pub async fn qa_one_ck(&mut self, table: &str) -> UpsertResult<Option<String>> {
        self.qa_one(CheckKind::CheckConstraint, table).await
    }

    /// Upsert every table, referenced tables first
    pub async fn upsert_all(&mut self) -> UpsertResult<()> {
        if !self.qa_passed {
            warn!("QA checks have not been run or have failed. Continuing anyway.");
        }
        info!(
            "===Starting upsert procedures (COMMIT={})===",
            self.config.commit
        );

        let edges = self
            .catalog
            .dependency_edges(&self.db, &self.config.base_schema)
            .await?;
        let order = DependencyResolver::new(&edges).order(&self.control.table_names());
        debug!(
            "Processing order: {}",
            order
                .iter()
                .map(|(table, rank)| format!("{} ({})", table, rank))
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.control.set_order(&order);
        let result = self.process_each(Phase::Upsert).await;
        self.control.clear_order();
        result
    }

    /// Update and insert one table, recording the row counts
    pub async fn upsert_one(&mut self, table: &str) -> UpsertResult<UpsertOutcome> {
        let Some(spec) = self.control.get(table).cloned() else {
            warn!("Table {} not found in control table", table);
            return Ok(UpsertOutcome::default());
        };

        let target = UpsertTarget {
            base_schema: &self.config.base_schema,
            stg_schema: &self.config.staging_schema,
            method: self.config.upsert_method,
        };
        let outcome =
            upsert::upsert_one(&self.db, &self.catalog, self.decisions.as_ref(), &target, &spec)
                .await?;

        if let Some(spec) = self.control.get_mut(table) {
            spec.rows_updated = Some(outcome.rows_updated);
            spec.rows_inserted = Some(outcome.rows_inserted);
        }
        Ok(outcome)
    }

    /// Commit or roll back, after showing the summary of changes
    ///
    /// Commits only when the summary is confirmed, some table changed and
    /// the commit flag is set. Returns whether the transaction was committed.
    pub async fn commit(&mut self) -> UpsertResult<bool> {
        let summary = self.control.to_query_result();
        let decision = if self.config.interactive {
            self.decisions.confirm(&ConfirmRequest::new(
                ConfirmKind::Commit,
                "Upsert Summary",
                "Below is a summary of changes. Do you want to commit these changes? ",
                summary,
                CONTINUE_CANCEL,
            ))
        } else {
            info!("");
            info!("Summary of changes:");
            info!("\n{}", format_table(&summary));
            Decision::Continue
        };
        info!("");

        if decision != Decision::Continue {
            info!("Rolling back changes");
            self.db.rollback().await?;
            return Ok(false);
        }

        if self.control.changed().is_empty() {
            info!("No changes to commit");
            self.db.rollback().await?;
            Ok(false)
        } else if self.config.commit {
            self.db.commit().await?;
            info!("Changes committed");
            Ok(true)
        } else {
            info!("The do_commit flag is set to FALSE, rolling back changes.");
            self.db.rollback().await?;
            Ok(false)
        }
    }

    /// QA every table, then upsert and commit when QA passed
    ///
    /// Any error, including a cancellation, rolls the transaction back.
    pub async fn run(&mut self) -> UpsertResult<RunSummary> {
        let started_at = Utc::now();
        info!(
            "Upserting to {} from {}",
            self.config.base_schema, self.config.staging_schema
        );

        match self.run_steps().await {
            Ok((qa_passed, committed)) => {
                let finished_at = Utc::now();
                debug!(
                    "Upsert completed in {}",
                    format_elapsed(finished_at - started_at)
                );
                Ok(RunSummary {
                    qa_passed,
                    committed,
                    tables: self.control.specs().to_vec(),
                    started_at,
                    finished_at,
                })
            }
            Err(e) => {
                if let Err(rollback_err) = self.db.rollback().await {
                    error!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn run_steps(&mut self) -> UpsertResult<(bool, bool)> {
        if self.config.interactive {
            debug!("Tables selected for upsert:");
            for table in &self.config.tables {
                debug!("  {}", table);
            }
            let rows = self
                .config
                .tables
                .iter()
                .map(|t| json!({ "Table": t }))
                .collect();
            let request = ConfirmRequest::new(
                ConfirmKind::Tables,
                "Upsert Tables",
                "Tables selected for upsert",
                QueryResult::new(vec!["Table".to_string()], rows),
                CONTINUE_CANCEL,
            );
            if self.decisions.confirm(&request) != Decision::Continue {
                info!("Upsert cancelled");
                return Err(UpsertError::Cancelled);
            }
        } else {
            info!("Tables selected for upsert:");
            for table in &self.config.tables {
                info!("  {}", table);
            }
        }

        self.init_control();
        if !self.qa_all().await? {
            self.db.rollback().await?;
            return Ok((false, false));
        }
        self.upsert_all().await?;
        let committed = self.commit().await?;
        Ok((true, committed))
    }
}

/// Human-readable duration: `N seconds`, `N minutes, N seconds` or
/// `N hours, N minutes, N seconds`
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
    if seconds < 60.0 {
        return format!("{} seconds", seconds);
    }
    let whole = seconds as u64;
    let rest = ((seconds % 60.0) * 1000.0).round() / 1000.0;
    if seconds < 3600.0 {
        return format!("{} minutes, {} seconds", whole / 60, rest);
    }
    format!(
        "{} hours, {} minutes, {} seconds",
        whole / 3600,
        (whole % 3600) / 60,
        rest
    )
}
