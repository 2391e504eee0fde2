//! Control table
//!
//! Per-table configuration and results of one run, held in memory. The
//! control table is also the work queue of every phase: pick the next
//! unprocessed table, process it, mark it processed, repeat until none remain.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

use crate::database::QueryResult;

/// Column names of the control table, in display order
pub const CONTROL_COLUMNS: [&str; 10] = [
    "table_name",
    "exclude_cols",
    "exclude_null_checks",
    "interactive",
    "null_errors",
    "pk_errors",
    "fk_errors",
    "ck_errors",
    "rows_updated",
    "rows_inserted",
];

/// One selected table and its results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub table_name: String,
    /// Columns never written to the base table
    pub exclude_cols: Vec<String>,
    /// Columns skipped by the not-null check
    pub exclude_null_checks: Vec<String>,
    pub interactive: bool,
    pub null_errors: Option<String>,
    pub pk_errors: Option<String>,
    pub fk_errors: Option<String>,
    pub ck_errors: Option<String>,
    pub rows_updated: Option<u64>,
    pub rows_inserted: Option<u64>,
}

impl TableSpec {
    pub fn new(
        table_name: impl Into<String>,
        exclude_cols: Vec<String>,
        exclude_null_checks: Vec<String>,
        interactive: bool,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            exclude_cols,
            exclude_null_checks,
            interactive,
            null_errors: None,
            pk_errors: None,
            fk_errors: None,
            ck_errors: None,
            rows_updated: None,
            rows_inserted: None,
        }
    }

    /// Whether any QA check recorded an error
    pub fn has_errors(&self) -> bool {
        self.null_errors.is_some()
            || self.pk_errors.is_some()
            || self.fk_errors.is_some()
            || self.ck_errors.is_some()
    }

    /// Whether the upsert changed any rows
    pub fn changed(&self) -> bool {
        self.rows_updated.unwrap_or(0) > 0 || self.rows_inserted.unwrap_or(0) > 0
    }

    fn clear_results(&mut self) {
        self.null_errors = None;
        self.pk_errors = None;
        self.fk_errors = None;
        self.ck_errors = None;
        self.rows_updated = None;
        self.rows_inserted = None;
    }
}

/// The run's table specs, processed-set and optional processing order
#[derive(Debug, Clone, Default)]
pub struct ControlTable {
    specs: Vec<TableSpec>,
    processed: HashSet<String>,
    order: Option<Vec<String>>,
}

impl ControlTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with one fresh spec per table
    ///
    /// Names are trimmed; blank names and repeats are dropped.
    pub fn initialize<S: AsRef<str>>(
        &mut self,
        tables: &[S],
        exclude_cols: &[String],
        exclude_null_checks: &[String],
        interactive: bool,
    ) {
        self.specs.clear();
        self.processed.clear();
        self.order = None;

        for table in tables {
            let name = table.as_ref().trim();
            if name.is_empty() || self.get(name).is_some() {
                continue;
            }
            self.specs.push(TableSpec::new(
                name,
                exclude_cols.to_vec(),
                exclude_null_checks.to_vec(),
                interactive,
            ));
        }
    }

    /// Clear every error field and row counter, keeping the configuration
    pub fn reset_run_fields(&mut self) {
        for spec in &mut self.specs {
            spec.clear_results();
        }
    }

    /// Next table not yet processed, in processing order when one is set
    pub fn next_unprocessed(&self) -> Option<&TableSpec> {
        match &self.order {
            Some(order) => order
                .iter()
                .filter(|name| !self.processed.contains(name.as_str()))
                .find_map(|name| self.get(name)),
            None => self
                .specs
                .iter()
                .find(|spec| !self.processed.contains(&spec.table_name)),
        }
    }

    pub fn mark_processed(&mut self, table: &str) {
        self.processed.insert(table.to_string());
    }

    /// Mark every table unprocessed again
    pub fn reset_processed(&mut self) {
        self.processed.clear();
    }

    /// Process tables by ascending rank, ties by name
    ///
    /// Tables without a rank are left out of ordered iteration.
    pub fn set_order(&mut self, ranks: &[(String, usize)]) {
        let mut ranked: Vec<&(String, usize)> = ranks
            .iter()
            .filter(|(name, _)| self.get(name).is_some())
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        for spec in &self.specs {
            if !ranked.iter().any(|(name, _)| name == &spec.table_name) {
                warn!(
                    "Table {} has no processing order and will be skipped",
                    spec.table_name
                );
            }
        }

        self.order = Some(ranked.into_iter().map(|(name, _)| name.clone()).collect());
    }

    /// Drop the processing order, reverting to insertion order
    pub fn clear_order(&mut self) {
        self.order = None;
    }

    pub fn get(&self, table: &str) -> Option<&TableSpec> {
        self.specs.iter().find(|spec| spec.table_name == table)
    }

    pub fn get_mut(&mut self, table: &str) -> Option<&mut TableSpec> {
        self.specs.iter_mut().find(|spec| spec.table_name == table)
    }

    /// All specs in insertion order
    pub fn specs(&self) -> &[TableSpec] {
        &self.specs
    }

    pub fn table_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.table_name.clone()).collect()
    }

    /// Whether any table failed any QA check
    pub fn has_errors(&self) -> bool {
        self.specs.iter().any(TableSpec::has_errors)
    }

    /// Tables with at least one QA error
    pub fn failing(&self) -> Vec<&TableSpec> {
        self.specs.iter().filter(|s| s.has_errors()).collect()
    }

    /// Tables whose upsert changed rows
    pub fn changed(&self) -> Vec<&TableSpec> {
        self.specs.iter().filter(|s| s.changed()).collect()
    }

    /// Render the control table as a query result for display
    pub fn to_query_result(&self) -> QueryResult {
        self.rows_for(self.specs.iter())
    }

    /// Render only the given specs with the control-table columns
    pub fn rows_for<'a>(&self, specs: impl Iterator<Item = &'a TableSpec>) -> QueryResult {
        use serde_json::{Value, json};

        let text = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        let count = |v: Option<u64>| v.map(|n| json!(n)).unwrap_or(Value::Null);
        let list = |v: &[String]| {
            if v.is_empty() {
                Value::Null
            } else {
                Value::String(v.join(","))
            }
        };

        let rows = specs
            .map(|spec| {
                json!({
                    "table_name": spec.table_name,
                    "exclude_cols": list(&spec.exclude_cols),
                    "exclude_null_checks": list(&spec.exclude_null_checks),
                    "interactive": spec.interactive,
                    "null_errors": text(&spec.null_errors),
                    "pk_errors": text(&spec.pk_errors),
                    "fk_errors": text(&spec.fk_errors),
                    "ck_errors": text(&spec.ck_errors),
                    "rows_updated": count(spec.rows_updated),
                    "rows_inserted": count(spec.rows_inserted),
                })
            })
            .collect();

        QueryResult::new(CONTROL_COLUMNS.iter().map(|c| c.to_string()).collect(), rows)
    }
}
