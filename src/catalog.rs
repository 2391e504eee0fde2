//! Metadata introspector
//!
//! Reads column, key and constraint metadata from `information_schema` and
//! `pg_catalog`. Foreign keys and check constraints are read once into a
//! snapshot and reused for every later table lookup.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

use crate::database::{Database, DatabaseResult};
use crate::sql::Sql;

static RE_CHECK_ENVELOPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^CHECK\s*\((.*)\)$").expect("Invalid regex"));

/// A foreign key constraint with its paired column lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub constraint_name: String,
    pub table_schema: String,
    pub table_name: String,
    /// Referencing columns, in key order
    pub columns: Vec<String>,
    pub ref_schema: String,
    pub ref_table: String,
    /// Referenced columns, paired with `columns`
    pub ref_columns: Vec<String>,
}

/// A check constraint as reported by `pg_get_constraintdef`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConstraint {
    pub constraint_name: String,
    pub table_name: String,
    pub definition: String,
}

impl CheckConstraint {
    /// The boolean expression inside the `CHECK (...)` envelope
    pub fn expression(&self) -> &str {
        unwrap_check(&self.definition)
    }
}

/// Strip a `CHECK (...)` envelope; other text is returned unchanged
pub fn unwrap_check(definition: &str) -> &str {
    RE_CHECK_ENVELOPE
        .captures(definition.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(definition)
}

/// Catalog lookups with a per-session constraint snapshot
#[derive(Debug, Default)]
pub struct Catalog {
    foreign_keys: Option<Vec<ForeignKey>>,
    check_constraints: HashMap<String, Vec<CheckConstraint>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the constraint snapshots so the next lookup reads the catalog again
    pub fn invalidate_cache(&mut self) {
        self.foreign_keys = None;
        self.check_constraints.clear();
    }

    /// Schemas that do not exist, as `"<schema> (base|staging)"`
    pub async fn missing_schemas<D: Database + ?Sized>(
        &self,
        db: &D,
        base_schema: &str,
        stg_schema: &str,
    ) -> DatabaseResult<Vec<String>> {
        let mut missing = Vec::new();
        for (schema, role) in [(base_schema, "base"), (stg_schema, "staging")] {
            let sql = Sql::raw(
                "select schema_name::text as schema_name \
                 from information_schema.schemata where schema_name = ",
            )
            .push_literal(schema);
            if db.query(&sql).await?.is_empty() {
                missing.push(format!("{} ({})", schema, role));
            }
        }
        Ok(missing)
    }

    /// Base and staging tables that do not exist, as `"<schema>.<table> (base|staging)"`
    pub async fn missing_tables<D: Database + ?Sized, S: AsRef<str>>(
        &self,
        db: &D,
        base_schema: &str,
        stg_schema: &str,
        tables: &[S],
    ) -> DatabaseResult<Vec<String>> {
        let mut missing = Vec::new();
        for table in tables {
            let table = table.as_ref();
            for (schema, role) in [(base_schema, "base"), (stg_schema, "staging")] {
                if !self.table_exists(db, schema, table).await? {
                    missing.push(format!("{}.{} ({})", schema, table, role));
                }
            }
        }
        Ok(missing)
    }

    pub async fn table_exists<D: Database + ?Sized>(
        &self,
        db: &D,
        schema: &str,
        table: &str,
    ) -> DatabaseResult<bool> {
        let sql = Sql::raw(
            "select table_name::text as table_name \
             from information_schema.tables where table_schema = ",
        )
        .push_literal(schema)
        .push_raw(" and table_name = ")
        .push_literal(table);
        Ok(!db.query(&sql).await?.is_empty())
    }

    /// Columns present in both the staging and base table, in staging column order
    pub async fn common_columns<D: Database + ?Sized>(
        &self,
        db: &D,
        base_schema: &str,
        stg_schema: &str,
        table: &str,
        exclude: &[String],
    ) -> DatabaseResult<Vec<String>> {
        let sql = Sql::raw(
            "select s.column_name::text as column_name \
             from information_schema.columns as s \
             inner join information_schema.columns as b on s.column_name = b.column_name \
             where s.table_schema = ",
        )
        .push_literal(stg_schema)
        .push_raw(" and s.table_name = ")
        .push_literal(table)
        .push_raw(" and b.table_schema = ")
        .push_literal(base_schema)
        .push_raw(" and b.table_name = ")
        .push_literal(table)
        .push_raw(" order by s.ordinal_position");

        let columns = db.query(&sql).await?.column_values("column_name");
        Ok(columns
            .into_iter()
            .filter(|c| !exclude.contains(c))
            .collect())
    }

    /// Primary key columns in key order; empty when the table has no primary key
    pub async fn primary_key_columns<D: Database + ?Sized>(
        &self,
        db: &D,
        schema: &str,
        table: &str,
    ) -> DatabaseResult<Vec<String>> {
        let sql = Sql::raw(
            "select k.column_name::text as column_name \
             from information_schema.table_constraints as tc \
             inner join information_schema.key_column_usage as k \
             on tc.constraint_type = 'PRIMARY KEY' \
             and tc.constraint_name = k.constraint_name \
             and tc.constraint_catalog = k.constraint_catalog \
             and tc.constraint_schema = k.constraint_schema \
             and tc.table_catalog = k.table_catalog \
             and tc.table_schema = k.table_schema \
             and tc.table_name = k.table_name \
             where k.table_schema = ",
        )
        .push_literal(schema)
        .push_raw(" and k.table_name = ")
        .push_literal(table)
        .push_raw(" order by k.ordinal_position");

        Ok(db.query(&sql).await?.column_values("column_name"))
    }

    /// `NOT NULL` columns without a default, minus `exclude`
    pub async fn not_null_columns<D: Database + ?Sized>(
        &self,
        db: &D,
        schema: &str,
        table: &str,
        exclude: &[String],
    ) -> DatabaseResult<Vec<String>> {
        let sql = Sql::raw(
            "select column_name::text as column_name from information_schema.columns \
             where table_schema = ",
        )
        .push_literal(schema)
        .push_raw(" and table_name = ")
        .push_literal(table)
        .push_raw(" and is_nullable = 'NO' and column_default is null order by ordinal_position");

        let columns = db.query(&sql).await?.column_values("column_name");
        Ok(columns
            .into_iter()
            .filter(|c| !exclude.contains(c))
            .collect())
    }

    /// Foreign keys declared on `schema.table`
    pub async fn foreign_keys<D: Database + ?Sized>(
        &mut self,
        db: &D,
        schema: &str,
        table: &str,
    ) -> DatabaseResult<Vec<ForeignKey>> {
        Ok(self
            .foreign_key_snapshot(db)
            .await?
            .iter()
            .filter(|fk| fk.table_schema == schema && fk.table_name == table)
            .cloned()
            .collect())
    }

    /// `(child, parent)` table pairs for foreign keys within `schema`, excluding self-references
    pub async fn dependency_edges<D: Database + ?Sized>(
        &mut self,
        db: &D,
        schema: &str,
    ) -> DatabaseResult<Vec<(String, String)>> {
        let mut edges: Vec<(String, String)> = Vec::new();
        for fk in self.foreign_key_snapshot(db).await? {
            if fk.table_schema == schema
                && fk.ref_schema == schema
                && fk.table_name != fk.ref_table
            {
                let edge = (fk.table_name.clone(), fk.ref_table.clone());
                if !edges.contains(&edge) {
                    edges.push(edge);
                }
            }
        }
        Ok(edges)
    }

    /// Check constraints declared on `schema.table`
    pub async fn check_constraints<D: Database + ?Sized>(
        &mut self,
        db: &D,
        schema: &str,
        table: &str,
    ) -> DatabaseResult<Vec<CheckConstraint>> {
        if !self.check_constraints.contains_key(schema) {
            let snapshot = load_check_constraints(db, schema).await?;
            self.check_constraints.insert(schema.to_string(), snapshot);
        }
        Ok(self
            .check_constraints
            .get(schema)
            .map(|all| {
                all.iter()
                    .filter(|ck| ck.table_name == table)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn foreign_key_snapshot<D: Database + ?Sized>(
        &mut self,
        db: &D,
    ) -> DatabaseResult<&[ForeignKey]> {
        if self.foreign_keys.is_none() {
            self.foreign_keys = Some(load_foreign_keys(db).await?);
        }
        Ok(self.foreign_keys.as_deref().unwrap_or_default())
    }
}

/// Read every foreign key in the database, one row per column pair
async fn load_foreign_keys<D: Database + ?Sized>(db: &D) -> DatabaseResult<Vec<ForeignKey>> {
    let sql = Sql::raw(
        "select \
            cons.conname::text as constraint_name, \
            ns1.nspname::text as table_schema, \
            cls1.relname::text as table_name, \
            att1.attname::text as column_name, \
            ns2.nspname::text as uq_schema, \
            cls2.relname::text as uq_table, \
            att2.attname::text as uq_column \
         from pg_constraint as cons \
            inner join pg_class as cls1 on cls1.oid = cons.conrelid \
            inner join pg_namespace as ns1 on ns1.oid = cls1.relnamespace \
            inner join pg_class as cls2 on cls2.oid = cons.confrelid \
            inner join pg_namespace as ns2 on ns2.oid = cls2.relnamespace \
            cross join lateral unnest(cons.conkey, cons.confkey) \
                with ordinality as k(conkey, confkey, ord) \
            inner join pg_attribute as att1 \
                on att1.attrelid = cons.conrelid and att1.attnum = k.conkey \
            inner join pg_attribute as att2 \
                on att2.attrelid = cons.confrelid and att2.attnum = k.confkey \
         where cons.contype = 'f' \
         order by ns1.nspname, cls1.relname, cons.conname, k.ord",
    );
    let result = db.query(&sql).await?;
    debug!("Read {} foreign key column pairs", result.row_count());

    let mut keys: Vec<ForeignKey> = Vec::new();
    for i in 0..result.row_count() {
        let text = |col: &str| result.get_str(i, col).unwrap_or_default().to_string();
        let (name, schema, table) = (
            text("constraint_name"),
            text("table_schema"),
            text("table_name"),
        );

        let same_constraint = keys.last().is_some_and(|fk| {
            fk.constraint_name == name && fk.table_schema == schema && fk.table_name == table
        });

        if same_constraint && let Some(fk) = keys.last_mut() {
            fk.columns.push(text("column_name"));
            fk.ref_columns.push(text("uq_column"));
        } else {
            keys.push(ForeignKey {
                constraint_name: name,
                table_schema: schema,
                table_name: table,
                columns: vec![text("column_name")],
                ref_schema: text("uq_schema"),
                ref_table: text("uq_table"),
                ref_columns: vec![text("uq_column")],
            });
        }
    }
    Ok(keys)
}

async fn load_check_constraints<D: Database + ?Sized>(
    db: &D,
    schema: &str,
) -> DatabaseResult<Vec<CheckConstraint>> {
    let sql = Sql::raw(
        "select \
            cls.relname::text as table_name, \
            con.conname::text as constraint_name, \
            pg_get_constraintdef(con.oid) as consrc \
         from pg_constraint as con \
            inner join pg_class as cls on con.conrelid = cls.oid \
            inner join pg_namespace as ns on cls.relnamespace = ns.oid \
         where con.contype = 'c' and ns.nspname = ",
    )
    .push_literal(schema)
    .push_raw(" order by cls.relname, con.conname");
    let result = db.query(&sql).await?;
    debug!("Read {} check constraints in {}", result.row_count(), schema);

    Ok((0..result.row_count())
        .map(|i| CheckConstraint {
            constraint_name: result.get_str(i, "constraint_name").unwrap_or_default().to_string(),
            table_name: result.get_str(i, "table_name").unwrap_or_default().to_string(),
            definition: result.get_str(i, "consrc").unwrap_or_default().to_string(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::ScriptedDatabase;
    use serde_json::json;

    const FK_COLUMNS: &[&str] = &[
        "constraint_name",
        "table_schema",
        "table_name",
        "column_name",
        "uq_schema",
        "uq_table",
        "uq_column",
    ];

    fn fk_row(
        name: &str,
        table: &str,
        col: &str,
        uq_table: &str,
        uq_col: &str,
    ) -> serde_json::Value {
        json!({
            "constraint_name": name,
            "table_schema": "public",
            "table_name": table,
            "column_name": col,
            "uq_schema": "public",
            "uq_table": uq_table,
            "uq_column": uq_col,
        })
    }

    #[test]
    fn test_unwrap_check() {
        assert_eq!(unwrap_check("CHECK ((price > (0)::numeric))"), "(price > (0)::numeric)");
        assert_eq!(unwrap_check("CHECK(a <> b)"), "a <> b");
        assert_eq!(unwrap_check("CHECK (a\n OR b)"), "a\n OR b");
        assert_eq!(unwrap_check("a > 0"), "a > 0");
    }

    #[tokio::test]
    async fn test_foreign_keys_group_columns() {
        let db = ScriptedDatabase::new().on_query(
            "from pg_constraint as cons",
            FK_COLUMNS,
            vec![
                fk_row("book_authors_fk", "book_authors", "book_id", "books", "book_id"),
                fk_row("book_authors_fk", "book_authors", "lang", "books", "lang"),
                fk_row("books_genre_fk", "books", "genre", "genres", "genre"),
                fk_row("genres_parent_fk", "genres", "parent", "genres", "genre"),
            ],
        );
        let mut catalog = Catalog::new();

        let fks = catalog.foreign_keys(&db, "public", "book_authors").await.unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].columns, vec!["book_id", "lang"]);
        assert_eq!(fks[0].ref_columns, vec!["book_id", "lang"]);

        let edges = catalog.dependency_edges(&db, "public").await.unwrap();
        assert_eq!(
            edges,
            vec![
                ("book_authors".to_string(), "books".to_string()),
                ("books".to_string(), "genres".to_string()),
            ]
        );

        // snapshot is read once
        assert_eq!(db.statements_matching("from pg_constraint as cons").len(), 1);

        catalog.invalidate_cache();
        catalog.foreign_keys(&db, "public", "books").await.unwrap();
        assert_eq!(db.statements_matching("from pg_constraint as cons").len(), 2);
    }

    #[tokio::test]
    async fn test_check_constraints_snapshot_per_schema() {
        let db = ScriptedDatabase::new().on_query(
            "con.contype = 'c'",
            &["table_name", "constraint_name", "consrc"],
            vec![
                json!({
                    "table_name": "books",
                    "constraint_name": "books_price_ck",
                    "consrc": "CHECK ((price >= (0)::numeric))",
                }),
                json!({
                    "table_name": "genres",
                    "constraint_name": "genres_name_ck",
                    "consrc": "CHECK ((length(name) > 0))",
                }),
            ],
        );
        let mut catalog = Catalog::new();

        let cks = catalog.check_constraints(&db, "public", "books").await.unwrap();
        assert_eq!(cks.len(), 1);
        assert_eq!(cks[0].expression(), "(price >= (0)::numeric)");

        catalog.check_constraints(&db, "public", "genres").await.unwrap();
        assert_eq!(db.statements_matching("con.contype = 'c'").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_tables_lists_every_role() {
        let db = ScriptedDatabase::new().on_query(
            "table_schema = 'public' and table_name = 'books'",
            &["table_name"],
            vec![json!({"table_name": "books"})],
        );
        let catalog = Catalog::new();

        let missing = catalog
            .missing_tables(&db, "public", "staging", &["books", "genres"])
            .await
            .unwrap();
        assert_eq!(
            missing,
            vec![
                "staging.books (staging)",
                "public.genres (base)",
                "staging.genres (staging)"
            ]
        );
    }

    #[tokio::test]
    async fn test_common_columns_respects_exclusions() {
        let db = ScriptedDatabase::new().on_query(
            "inner join information_schema.columns as b",
            &["column_name"],
            vec![
                json!({"column_name": "book_id"}),
                json!({"column_name": "title"}),
                json!({"column_name": "rev_time"}),
            ],
        );
        let catalog = Catalog::new();

        let cols = catalog
            .common_columns(&db, "public", "staging", "books", &["rev_time".to_string()])
            .await
            .unwrap();
        assert_eq!(cols, vec!["book_id", "title"]);
    }
}
