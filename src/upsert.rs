//! Upsert synthesizer and executor
//!
//! For one table, [`UpsertPlan`] derives the column lists from the catalog
//! and renders the statements; [`upsert_one`] previews the affected rows,
//! asks for confirmation where the table is interactive, and runs them.
//!
//! Matched rows are rewritten unconditionally: the update never compares
//! staging values with base values.

use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::UpsertMethod;
use crate::control::TableSpec;
use crate::database::{Database, DatabaseResult, QueryResult};
use crate::decision::{
    CONTINUE_SKIP_CANCEL, ConfirmKind, ConfirmRequest, Decision, DecisionProvider,
};
use crate::error::{UpsertError, UpsertResult};
use crate::sql::Sql;

/// Schemas and policy shared by every table of a run
#[derive(Debug, Clone, Copy)]
pub struct UpsertTarget<'a> {
    pub base_schema: &'a str,
    pub stg_schema: &'a str,
    pub method: UpsertMethod,
}

/// Rows changed in one table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub rows_updated: u64,
    pub rows_inserted: u64,
    /// The operator chose to skip this table
    pub skipped: bool,
}

/// Column lists and statements for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertPlan {
    pub base_schema: String,
    pub stg_schema: String,
    pub table: String,
    /// Columns in both staging and base, minus exclusions, in staging order
    pub columns: Vec<String>,
    /// Base primary key, in key order
    pub pk_columns: Vec<String>,
    /// `columns` without the key columns
    pub non_key_columns: Vec<String>,
}

impl UpsertPlan {
    pub fn new(
        base_schema: impl Into<String>,
        stg_schema: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<String>,
        pk_columns: Vec<String>,
    ) -> Self {
        let non_key_columns = columns
            .iter()
            .filter(|c| !pk_columns.contains(c))
            .cloned()
            .collect();
        Self {
            base_schema: base_schema.into(),
            stg_schema: stg_schema.into(),
            table: table.into(),
            columns,
            pk_columns,
            non_key_columns,
        }
    }

    /// Read the column lists for `table` from the catalog
    pub async fn build<D: Database + ?Sized>(
        db: &D,
        catalog: &Catalog,
        base_schema: &str,
        stg_schema: &str,
        table: &str,
        exclude_cols: &[String],
    ) -> DatabaseResult<Self> {
        let columns = catalog
            .common_columns(db, base_schema, stg_schema, table, exclude_cols)
            .await?;
        let pk_columns = catalog.primary_key_columns(db, base_schema, table).await?;
        Ok(Self::new(base_schema, stg_schema, table, columns, pk_columns))
    }

    pub fn has_primary_key(&self) -> bool {
        !self.pk_columns.is_empty()
    }

    fn base(&self) -> Sql {
        Sql::qualified(self.base_schema.as_str(), self.table.as_str())
    }

    fn staging(&self) -> Sql {
        Sql::qualified(self.stg_schema.as_str(), self.table.as_str())
    }

    fn key_join(&self) -> Sql {
        Sql::column_pairs("b", &self.pk_columns, "s", &self.pk_columns, " and ")
    }

    /// Staging rows whose key exists in the base table
    pub fn staging_matches_sql(&self) -> Sql {
        self.matches_sql("s")
    }

    /// Base rows whose key exists in the staging table
    pub fn base_matches_sql(&self) -> Sql {
        self.matches_sql("b")
    }

    fn matches_sql(&self, alias: &'static str) -> Sql {
        Sql::raw("select ")
            .push(Sql::text_columns(alias, &self.columns))
            .push_raw(" from ")
            .push(self.base())
            .push_raw(" as b inner join ")
            .push(self.staging())
            .push_raw(" as s on ")
            .push(self.key_join())
            .push_raw(" order by ")
            .push(Sql::ident_list(Some(alias), &self.pk_columns))
    }

    /// Rewrite every non-key column of the matched base rows
    pub fn update_sql(&self) -> Sql {
        let assignments = Sql::join(
            ", ",
            self.non_key_columns.iter().map(|c| {
                Sql::ident(c.as_str())
                    .push_raw(" = ")
                    .push(Sql::aliased("s", c.as_str()))
            }),
        );

        Sql::raw("update ")
            .push(self.base())
            .push_raw(" as b set ")
            .push(assignments)
            .push_raw(" from ")
            .push(self.staging())
            .push_raw(" as s where ")
            .push(self.key_join())
    }

    /// Staging rows joined to the keys missing from the base table
    fn new_rows_from(&self) -> Sql {
        let keys = Sql::ident_list::<String>(None, &self.pk_columns);
        Sql::raw(" from ")
            .push(self.staging())
            .push_raw(" as s inner join (select ")
            .push(keys.clone())
            .push_raw(" from ")
            .push(self.staging())
            .push_raw(" except select ")
            .push(keys.clone())
            .push_raw(" from ")
            .push(self.base())
            .push_raw(") as n using (")
            .push(keys)
            .push_raw(")")
    }

    /// Staging rows whose key is not yet in the base table
    pub fn new_rows_sql(&self) -> Sql {
        Sql::raw("select ")
            .push(Sql::text_columns("s", &self.columns))
            .push(self.new_rows_from())
            .push_raw(" order by ")
            .push(Sql::ident_list(Some("s"), &self.pk_columns))
    }

    /// Copy the new staging rows into the base table
    pub fn insert_sql(&self) -> Sql {
        Sql::raw("insert into ")
            .push(self.base())
            .push_raw(" (")
            .push(Sql::ident_list::<String>(None, &self.columns))
            .push_raw(") select ")
            .push(Sql::ident_list(Some("s"), &self.columns))
            .push(self.new_rows_from())
    }
}

/// Ask about `request` when the table is interactive, otherwise continue
fn decide(decisions: &dyn DecisionProvider, spec: &TableSpec, request: ConfirmRequest) -> Decision {
    if spec.interactive {
        decisions.confirm(&request)
    } else {
        Decision::Continue
    }
}

/// Update and insert one table according to `target.method`
///
/// Both previews are confirmed before either statement runs, so a `Skip`
/// at either prompt leaves the table untouched. `Cancel` returns
/// [`UpsertError::Cancelled`].
pub async fn upsert_one<D: Database + ?Sized>(
    db: &D,
    catalog: &Catalog,
    decisions: &dyn DecisionProvider,
    target: &UpsertTarget<'_>,
    spec: &TableSpec,
) -> UpsertResult<UpsertOutcome> {
    let table = spec.table_name.as_str();
    info!("Performing upsert on table {}.{}", target.base_schema, table);

    let plan = UpsertPlan::build(
        db,
        catalog,
        target.base_schema,
        target.stg_schema,
        table,
        &spec.exclude_cols,
    )
    .await?;

    let mut outcome = UpsertOutcome::default();
    if plan.columns.is_empty() {
        warn!("No columns found in base table");
        return Ok(outcome);
    }
    if !plan.has_primary_key() {
        warn!("Base table has no primary key");
        return Ok(outcome);
    }

    let mut run_update = false;
    if target.method.does_update() {
        let matches = db.query(&plan.staging_matches_sql()).await?;
        if matches.is_empty() {
            debug!("  No rows in staging table matching primary key in base table");
        }
        if !matches.is_empty() && !plan.non_key_columns.is_empty() {
            let request = if spec.interactive {
                let existing = db.query(&plan.base_matches_sql()).await?;
                update_request(table, matches).with_compare(existing)
            } else {
                update_request(table, matches)
            };
            match decide(decisions, spec, request) {
                Decision::Continue => run_update = true,
                Decision::Skip => return Ok(skipped(table)),
                Decision::Cancel => return Err(cancelled()),
            }
        } else {
            info!("  No rows to update");
        }
    }

    let mut run_insert = false;
    if target.method.does_insert() {
        let new_rows = db.query(&plan.new_rows_sql()).await?;
        if new_rows.is_empty() {
            info!("  No new data to insert");
        } else {
            match decide(decisions, spec, insert_request(target, table, new_rows)) {
                Decision::Continue => run_insert = true,
                Decision::Skip => return Ok(skipped(table)),
                Decision::Cancel => return Err(cancelled()),
            }
        }
    }

    if run_update {
        info!("  Updating {}.{}", target.base_schema, table);
        let stmt = plan.update_sql();
        debug!("    UPDATE statement for {}.{}", target.base_schema, table);
        debug!("{}", stmt);
        outcome.rows_updated = db.execute(&stmt).await?;
        info!("    {} rows updated", outcome.rows_updated);
    }

    if run_insert {
        info!("  Adding data to {}.{}", target.base_schema, table);
        let stmt = plan.insert_sql();
        debug!("    INSERT statement for {}.{}", target.base_schema, table);
        debug!("{}", stmt);
        outcome.rows_inserted = db.execute(&stmt).await?;
        info!("    {} rows inserted", outcome.rows_inserted);
    }

    Ok(outcome)
}

fn update_request(table: &str, matches: QueryResult) -> ConfirmRequest {
    ConfirmRequest::new(
        ConfirmKind::Update,
        "Compare Tables",
        format!(
            "Do you want to make these changes? For table {}, new data are shown in the top table; \
             existing data are shown in the bottom table.",
            table
        ),
        matches,
        CONTINUE_SKIP_CANCEL,
    )
}

fn insert_request(target: &UpsertTarget<'_>, table: &str, new_rows: QueryResult) -> ConfirmRequest {
    ConfirmRequest::new(
        ConfirmKind::Insert,
        "New Data",
        format!(
            "Do you want to add these new data to the {}.{} table?",
            target.base_schema, table
        ),
        new_rows,
        CONTINUE_SKIP_CANCEL,
    )
}

fn skipped(table: &str) -> UpsertOutcome {
    info!("  Skipping {}", table);
    UpsertOutcome {
        skipped: true,
        ..UpsertOutcome::default()
    }
}

fn cancelled() -> UpsertError {
    warn!("Script cancelled by user");
    UpsertError::Cancelled
}
