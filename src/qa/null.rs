//! Not-null check

use serde_json::json;
use tracing::{debug, info, warn};

use super::{CheckOutcome, Finding, QaTarget};
use crate::catalog::Catalog;
use crate::database::{Database, DatabaseResult, QueryResult};
use crate::sql::Sql;

/// Count staging nulls in every base `NOT NULL` column that has no default
pub async fn check<D: Database + ?Sized>(
    db: &D,
    catalog: &mut Catalog,
    target: &QaTarget<'_>,
) -> DatabaseResult<CheckOutcome> {
    info!(
        "Conducting not-null QA checks on table {}.{}",
        target.stg_schema, target.table
    );

    let columns = catalog
        .not_null_columns(db, target.base_schema, target.table, target.exclude_null_checks)
        .await?;

    let mut outcome = CheckOutcome::default();
    for column in &columns {
        debug!("  Checking column {} for nulls", column);
        let sql = Sql::raw("select count(*)::bigint as nrows from ")
            .push_qualified(target.stg_schema, target.table)
            .push_raw(" where ")
            .push_ident(column)
            .push_raw(" is null");
        let nrows = db.query(&sql).await?.get_i64(0, "nrows").unwrap_or(0);

        if nrows > 0 {
            warn!("    Column {} has {} null values", column, nrows);
            outcome.findings.push(Finding {
                title: "Null value error".to_string(),
                message: format!(
                    "Column {} of {}.{} has {} null values",
                    column, target.stg_schema, target.table, nrows
                ),
                summary: format!("{} ({})", column, nrows),
                rows: QueryResult::new(
                    vec!["column_name".to_string(), "nrows".to_string()],
                    vec![json!({"column_name": column, "nrows": nrows})],
                ),
            });
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::ScriptedDatabase;

    #[tokio::test]
    async fn test_reports_each_column_with_nulls() {
        let db = ScriptedDatabase::new()
            .on_query(
                "is_nullable = 'NO'",
                &["column_name"],
                vec![
                    json!({"column_name": "author_id"}),
                    json!({"column_name": "first_name"}),
                    json!({"column_name": "last_name"}),
                ],
            )
            .on_query("where \"first_name\" is null", &["nrows"], vec![json!({"nrows": 2})])
            .on_query("where \"last_name\" is null", &["nrows"], vec![json!({"nrows": 1})])
            .on_query("is null", &["nrows"], vec![json!({"nrows": 0})]);
        let mut catalog = Catalog::new();
        let target = QaTarget {
            base_schema: "public",
            stg_schema: "staging",
            table: "authors",
            exclude_null_checks: &[],
        };

        let outcome = check(&db, &mut catalog, &target).await.unwrap();
        assert_eq!(
            outcome.error().as_deref(),
            Some("first_name (2), last_name (1)")
        );
        assert_eq!(
            db.statements_matching("from \"staging\".\"authors\"").len(),
            3
        );
    }

    #[tokio::test]
    async fn test_excluded_columns_are_not_checked() {
        let db = ScriptedDatabase::new()
            .on_query(
                "is_nullable = 'NO'",
                &["column_name"],
                vec![json!({"column_name": "alias"})],
            )
            .on_query("is null", &["nrows"], vec![json!({"nrows": 5})]);
        let mut catalog = Catalog::new();
        let exclude = vec!["alias".to_string()];
        let target = QaTarget {
            base_schema: "public",
            stg_schema: "staging",
            table: "authors",
            exclude_null_checks: &exclude,
        };

        let outcome = check(&db, &mut catalog, &target).await.unwrap();
        assert!(outcome.passed());
    }
}
