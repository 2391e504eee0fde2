//! Foreign key check
//!
//! A staging row fails a foreign key when all of its key columns are set and
//! the referenced row exists neither in the referenced base table nor in the
//! staging copy of that table (when there is one). Rows with a null key column
//! are never reported.

use tracing::{debug, info, warn};

use super::{CheckOutcome, Finding, QaTarget, total_rows};
use crate::catalog::{Catalog, ForeignKey};
use crate::database::{Database, DatabaseResult, format_table};
use crate::sql::Sql;

pub async fn check<D: Database + ?Sized>(
    db: &D,
    catalog: &mut Catalog,
    target: &QaTarget<'_>,
) -> DatabaseResult<CheckOutcome> {
    info!(
        "Conducting foreign key QA checks on table {}.{}",
        target.stg_schema, target.table
    );

    let foreign_keys = catalog
        .foreign_keys(db, target.base_schema, target.table)
        .await?;

    let mut outcome = CheckOutcome::default();
    for fk in &foreign_keys {
        debug!("  Checking constraint {}", fk.constraint_name);
        let staged_parent = catalog
            .table_exists(db, target.stg_schema, &fk.ref_table)
            .await?;

        let orphans = db
            .query(&orphan_rows_sql(target, fk, staged_parent))
            .await?;
        if orphans.is_empty() {
            continue;
        }

        let message = format!(
            "Foreign key error referencing {}.{}",
            fk.ref_schema, fk.ref_table
        );
        warn!("    {}", message);
        warn!("\n{}\n", format_table(&orphans));

        outcome.findings.push(Finding {
            title: "Foreign key error".to_string(),
            summary: format!("{} ({})", fk.constraint_name, total_rows(&orphans)),
            message,
            rows: orphans,
        });
    }

    Ok(outcome)
}

/// Staging key values with no referenced row, grouped with their row counts
pub fn orphan_rows_sql(target: &QaTarget<'_>, fk: &ForeignKey, staged_parent: bool) -> Sql {
    let checked = Sql::ident_list(Some("s"), &fk.columns);
    let first_ref = fk.ref_columns.first().map(String::as_str).unwrap_or_default();

    let mut sql = Sql::raw("select ")
        .push(Sql::text_columns("s", &fk.columns))
        .push_raw(", count(*)::bigint as nrows from ")
        .push_qualified(target.stg_schema, target.table)
        .push_raw(" as s left join ")
        .push_qualified(fk.ref_schema.as_str(), fk.ref_table.as_str())
        .push_raw(" as u on ")
        .push(Sql::column_pairs("s", &fk.columns, "u", &fk.ref_columns, " and "));

    if staged_parent {
        sql = sql
            .push_raw(" left join ")
            .push_qualified(target.stg_schema, fk.ref_table.as_str())
            .push_raw(" as su on ")
            .push(Sql::column_pairs("s", &fk.columns, "su", &fk.ref_columns, " and "));
    }

    sql = sql.push_raw(" where ").push(Sql::aliased("u", first_ref)).push_raw(" is null");
    if staged_parent {
        sql = sql
            .push_raw(" and ")
            .push(Sql::aliased("su", first_ref))
            .push_raw(" is null");
    }

    let not_null = Sql::join(
        " and ",
        fk.columns
            .iter()
            .map(|c| Sql::aliased("s", c.as_str()).push_raw(" is not null")),
    );

    sql.push_raw(" and ")
        .push(not_null)
        .push_raw(" group by ")
        .push(checked.clone())
        .push_raw(" order by ")
        .push(checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::ScriptedDatabase;
    use serde_json::json;

    fn books_genre_fk() -> ForeignKey {
        ForeignKey {
            constraint_name: "books_genre_fk".to_string(),
            table_schema: "public".to_string(),
            table_name: "books".to_string(),
            columns: vec!["genre".to_string()],
            ref_schema: "public".to_string(),
            ref_table: "genres".to_string(),
            ref_columns: vec!["genre".to_string()],
        }
    }

    fn target() -> QaTarget<'static> {
        QaTarget {
            base_schema: "public",
            stg_schema: "staging",
            table: "books",
            exclude_null_checks: &[],
        }
    }

    #[test]
    fn test_orphan_sql_with_staged_parent() {
        let (text, _) = orphan_rows_sql(&target(), &books_genre_fk(), true).render();
        assert_eq!(
            text,
            "select s.\"genre\"::text as \"genre\", count(*)::bigint as nrows \
             from \"staging\".\"books\" as s \
             left join \"public\".\"genres\" as u on s.\"genre\" = u.\"genre\" \
             left join \"staging\".\"genres\" as su on s.\"genre\" = su.\"genre\" \
             where u.\"genre\" is null and su.\"genre\" is null and s.\"genre\" is not null \
             group by s.\"genre\" order by s.\"genre\""
        );
    }

    #[test]
    fn test_orphan_sql_without_staged_parent() {
        let mut fk = books_genre_fk();
        fk.columns = vec!["book_id".to_string(), "lang".to_string()];
        fk.ref_columns = vec!["id".to_string(), "language".to_string()];
        let (text, _) = orphan_rows_sql(&target(), &fk, false).render();
        assert!(!text.contains(" as su "));
        assert!(text.contains("on s.\"book_id\" = u.\"id\" and s.\"lang\" = u.\"language\""));
        assert!(text.contains("s.\"book_id\" is not null and s.\"lang\" is not null"));
    }

    #[tokio::test]
    async fn test_reports_failing_constraint() {
        let db = ScriptedDatabase::new()
            .on_query(
                "from pg_constraint as cons",
                &[
                    "constraint_name",
                    "table_schema",
                    "table_name",
                    "column_name",
                    "uq_schema",
                    "uq_table",
                    "uq_column",
                ],
                vec![json!({
                    "constraint_name": "books_genre_fk",
                    "table_schema": "public",
                    "table_name": "books",
                    "column_name": "genre",
                    "uq_schema": "public",
                    "uq_table": "genres",
                    "uq_column": "genre",
                })],
            )
            .on_query(
                "table_schema = 'staging' and table_name = 'genres'",
                &["table_name"],
                vec![json!({"table_name": "genres"})],
            )
            .on_query(
                "as su on",
                &["genre", "nrows"],
                vec![json!({"genre": "Poetry", "nrows": 1})],
            );
        let mut catalog = Catalog::new();

        let outcome = check(&db, &mut catalog, &target()).await.unwrap();
        assert_eq!(outcome.error().as_deref(), Some("books_genre_fk (1)"));
        assert_eq!(
            outcome.findings[0].message,
            "Foreign key error referencing public.genres"
        );
    }
}
