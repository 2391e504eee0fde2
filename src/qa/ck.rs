//! Check constraint check

use serde_json::json;
use tracing::{debug, info, warn};

use super::{CheckOutcome, Finding, QaTarget};
use crate::catalog::{Catalog, CheckConstraint};
use crate::database::{Database, DatabaseResult, QueryResult};
use crate::sql::Sql;

/// Evaluate every base check constraint against the staging rows
pub async fn check<D: Database + ?Sized>(
    db: &D,
    catalog: &mut Catalog,
    target: &QaTarget<'_>,
) -> DatabaseResult<CheckOutcome> {
    info!(
        "Conducting check constraint QA checks on table {}.{}",
        target.stg_schema, target.table
    );

    let constraints = catalog
        .check_constraints(db, target.base_schema, target.table)
        .await?;

    let mut outcome = CheckOutcome::default();
    for constraint in &constraints {
        debug!("  Checking constraint {}", constraint.constraint_name);
        let nrows = db
            .query(&violations_sql(target, constraint))
            .await?
            .get_i64(0, "nrows")
            .unwrap_or(0);
        if nrows == 0 {
            continue;
        }

        warn!(
            "    Check constraint {} has {} failing rows",
            constraint.constraint_name, nrows
        );
        outcome.findings.push(Finding {
            title: "Check constraint error".to_string(),
            message: format!(
                "Check constraint {} has {} failing rows",
                constraint.constraint_name, nrows
            ),
            summary: format!("{} ({})", constraint.constraint_name, nrows),
            rows: QueryResult::new(
                vec![
                    "constraint_name".to_string(),
                    "definition".to_string(),
                    "nrows".to_string(),
                ],
                vec![json!({
                    "constraint_name": constraint.constraint_name,
                    "definition": constraint.definition,
                    "nrows": nrows,
                })],
            ),
        });
    }

    Ok(outcome)
}

/// Count staging rows for which the constraint expression is false
///
/// The expression comes from `pg_get_constraintdef` and is emitted as raw SQL.
pub fn violations_sql(target: &QaTarget<'_>, constraint: &CheckConstraint) -> Sql {
    Sql::raw("select count(*)::bigint as nrows from ")
        .push_qualified(target.stg_schema, target.table)
        .push_raw(" where not (")
        .push_raw(constraint.expression())
        .push_raw(")")
}
