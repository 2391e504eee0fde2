//! QA checks
//!
//! Four independent checks run against one staging table using the
//! constraints of its base table:
//! - [`null`]: `NOT NULL` columns without a default that hold nulls in staging
//! - [`pk`]: duplicated primary key values
//! - [`fk`]: foreign key values with no referenced row in staging or base
//! - [`ck`]: rows that violate a check constraint
//!
//! A check never fails the run on its own. Its findings are returned as a
//! summary string for the control table plus the rows that illustrate them.

pub mod ck;
pub mod fk;
pub mod null;
pub mod pk;

use crate::catalog::Catalog;
use crate::control::TableSpec;
use crate::database::{Database, DatabaseResult, QueryResult};

/// The four QA checks, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    NotNull,
    PrimaryKey,
    ForeignKey,
    CheckConstraint,
}

impl CheckKind {
    pub const ALL: [CheckKind; 4] = [
        CheckKind::NotNull,
        CheckKind::PrimaryKey,
        CheckKind::ForeignKey,
        CheckKind::CheckConstraint,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CheckKind::NotNull => "Non-NULL",
            CheckKind::PrimaryKey => "Primary Key",
            CheckKind::ForeignKey => "Foreign Key",
            CheckKind::CheckConstraint => "Check Constraint",
        }
    }

    /// Whether a finding of this kind is shown for confirmation in interactive runs
    pub fn confirms(self) -> bool {
        matches!(self, CheckKind::PrimaryKey | CheckKind::ForeignKey)
    }

    /// The control-table field this check writes
    pub fn error_field(self, spec: &TableSpec) -> &Option<String> {
        match self {
            CheckKind::NotNull => &spec.null_errors,
            CheckKind::PrimaryKey => &spec.pk_errors,
            CheckKind::ForeignKey => &spec.fk_errors,
            CheckKind::CheckConstraint => &spec.ck_errors,
        }
    }

    pub fn error_field_mut(self, spec: &mut TableSpec) -> &mut Option<String> {
        match self {
            CheckKind::NotNull => &mut spec.null_errors,
            CheckKind::PrimaryKey => &mut spec.pk_errors,
            CheckKind::ForeignKey => &mut spec.fk_errors,
            CheckKind::CheckConstraint => &mut spec.ck_errors,
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The table a check runs against
#[derive(Debug, Clone, Copy)]
pub struct QaTarget<'a> {
    pub base_schema: &'a str,
    pub stg_schema: &'a str,
    pub table: &'a str,
    /// Columns skipped by the not-null check
    pub exclude_null_checks: &'a [String],
}

/// One failing item of a check, with the rows that show it
#[derive(Debug, Clone)]
pub struct Finding {
    /// Dialog title
    pub title: String,
    /// Human-readable description of the failure
    pub message: String,
    /// Summary entry for the control table, e.g. `books_genre_fk (3)`
    pub summary: String,
    pub rows: QueryResult,
}

/// Result of one check on one table
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    pub findings: Vec<Finding>,
}

impl CheckOutcome {
    /// Summary entries joined by `", "`, or `None` when the check passed
    pub fn error(&self) -> Option<String> {
        if self.findings.is_empty() {
            None
        } else {
            Some(
                self.findings
                    .iter()
                    .map(|f| f.summary.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        }
    }

    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Run one check against one table
pub async fn run_check<D: Database + ?Sized>(
    kind: CheckKind,
    db: &D,
    catalog: &mut Catalog,
    target: &QaTarget<'_>,
) -> DatabaseResult<CheckOutcome> {
    match kind {
        CheckKind::NotNull => null::check(db, catalog, target).await,
        CheckKind::PrimaryKey => pk::check(db, catalog, target).await,
        CheckKind::ForeignKey => fk::check(db, catalog, target).await,
        CheckKind::CheckConstraint => ck::check(db, catalog, target).await,
    }
}

/// Count rows reported in an `nrows` column, summed across rows
pub(crate) fn total_rows(result: &QueryResult) -> i64 {
    (0..result.row_count())
        .filter_map(|i| result.get_i64(i, "nrows"))
        .sum()
}
