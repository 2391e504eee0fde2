//! Primary key duplicate check

use tracing::{debug, info, warn};

use super::{CheckOutcome, Finding, QaTarget, total_rows};
use crate::catalog::Catalog;
use crate::database::{Database, DatabaseResult, format_table};
use crate::sql::Sql;

/// Find primary key values that occur more than once in the staging table
///
/// Tables without a primary key are skipped.
pub async fn check<D: Database + ?Sized>(
    db: &D,
    catalog: &mut Catalog,
    target: &QaTarget<'_>,
) -> DatabaseResult<CheckOutcome> {
    info!(
        "Conducting primary key QA checks on table {}.{}",
        target.stg_schema, target.table
    );

    let pk_columns = catalog
        .primary_key_columns(db, target.base_schema, target.table)
        .await?;
    if pk_columns.is_empty() {
        info!("Table has no primary key");
        return Ok(CheckOutcome::default());
    }
    debug!("  Checking primary key ({})", pk_columns.join(", "));

    let duplicates = db.query(&duplicate_keys_sql(target, &pk_columns)).await?;
    let mut outcome = CheckOutcome::default();
    if duplicates.is_empty() {
        return Ok(outcome);
    }

    let message = format!(
        "{} duplicate keys ({} rows) in table {}.{}",
        duplicates.row_count(),
        total_rows(&duplicates),
        target.stg_schema,
        target.table
    );
    warn!(
        "    Duplicate key error in columns {}",
        Sql::ident_list(None, &pk_columns)
    );
    warn!("\n{}\n", format_table(&duplicates));

    outcome.findings.push(Finding {
        title: "Duplicate key error".to_string(),
        summary: message.clone(),
        message,
        rows: duplicates,
    });
    Ok(outcome)
}

/// Group staging rows by the full key and keep groups with more than one row
pub fn duplicate_keys_sql(target: &QaTarget<'_>, pk_columns: &[String]) -> Sql {
    Sql::raw("select ")
        .push(Sql::text_columns("s", pk_columns))
        .push_raw(", count(*)::bigint as nrows from ")
        .push_qualified(target.stg_schema, target.table)
        .push_raw(" as s group by ")
        .push(Sql::ident_list(Some("s"), pk_columns))
        .push_raw(" having count(*) > 1 order by ")
        .push(Sql::ident_list(Some("s"), pk_columns))
}
