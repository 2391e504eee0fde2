//! Database client abstraction
//!
//! The QA and upsert engine only needs a narrow capability from the database:
//! run a statement, get rows or an affected-row count back, and end the
//! transaction. This module defines that capability as the [`Database`] trait
//! together with the result type shared by every backend.
//!
//! - PostgreSQL: [`PostgresBackend`], built on tokio-postgres (feature `postgres-backend`)
//!
//! All statements are passed as [`Sql`] fragments so that identifiers and
//! literals are escaped or bound by the backend, never interpolated.

use async_trait::async_trait;

use crate::sql::Sql;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::PostgresBackend;

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Commit or rollback failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Query result row: a JSON object keyed by column name
pub type QueryRow = serde_json::Value;

/// Rows returned by a query, with their column names in select order
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<QueryRow>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<QueryRow>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`
    pub fn value(&self, row: usize, column: &str) -> Option<&serde_json::Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Text value of `column` in row `row`; null and missing values yield `None`
    pub fn get_str(&self, row: usize, column: &str) -> Option<&str> {
        self.value(row, column).and_then(|v| v.as_str())
    }

    /// Integer value of `column` in row `row`
    ///
    /// Accepts both JSON numbers and numeric text, since counts cast to text
    /// and counts returned natively are both common.
    pub fn get_i64(&self, row: usize, column: &str) -> Option<i64> {
        match self.value(row, column)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// All non-null text values of one column, in row order
    pub fn column_values(&self, column: &str) -> Vec<String> {
        (0..self.rows.len())
            .filter_map(|i| self.get_str(i, column).map(str::to_string))
            .collect()
    }
}

/// Database client used by the engine
///
/// Mirrors a DB-API style connection with autocommit off: the first statement
/// opens a transaction that stays open until [`Database::commit`] or
/// [`Database::rollback`] is called.
#[async_trait(?Send)]
pub trait Database {
    /// Execute a statement and return its rows
    async fn query(&self, sql: &Sql) -> DatabaseResult<QueryResult>;

    /// Execute a statement and return the number of rows it affected
    async fn execute(&self, sql: &Sql) -> DatabaseResult<u64>;

    /// Commit the open transaction, if any
    async fn commit(&self) -> DatabaseResult<()>;

    /// Roll back the open transaction, if any
    async fn rollback(&self) -> DatabaseResult<()>;

    /// Get the database backend type name
    fn backend_type(&self) -> &'static str;

    /// Roll back anything pending and close the connection
    async fn close(&self) -> DatabaseResult<()>;
}

/// Render one cell; nulls are shown as an empty string
fn cell_text(row: &QueryRow, column: &str) -> String {
    match row.get(column).unwrap_or(&serde_json::Value::Null) {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render rows as an aligned text table followed by a row count
///
/// ```text
/// table_name | fk_errors
/// -----------+-------------------
/// books      | books_genre_fk (1)
/// (1 row)
/// ```
pub fn format_table(result: &QueryResult) -> String {
    if result.is_empty() {
        return "(0 rows)".to_string();
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| result.columns.iter().map(|c| cell_text(row, c)).collect())
        .collect();

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (i, value) in row.iter().enumerate() {
            widths[i] = widths[i].max(value.chars().count());
        }
    }

    let line = |values: &[String]| -> String {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{:width$}", v, width = widths[i]))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let mut output = line(&result.columns);
    output.push('\n');
    output.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    output.push('\n');
    for row in &cells {
        output.push_str(line(row).trim_end());
        output.push('\n');
    }

    let noun = if result.row_count() == 1 { "row" } else { "rows" };
    output.push_str(&format!("({} {})", result.row_count(), noun));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_accessors() {
        let result = QueryResult::new(
            vec!["column_name".to_string(), "nrows".to_string()],
            vec![
                json!({"column_name": "title", "nrows": 3}),
                json!({"column_name": null, "nrows": "12"}),
            ],
        );
        assert_eq!(result.get_str(0, "column_name"), Some("title"));
        assert_eq!(result.get_str(1, "column_name"), None);
        assert_eq!(result.get_i64(0, "nrows"), Some(3));
        assert_eq!(result.get_i64(1, "nrows"), Some(12));
        assert_eq!(result.get_i64(2, "nrows"), None);
        assert_eq!(result.column_values("column_name"), vec!["title"]);
    }

    #[test]
    fn test_format_table() {
        let result = QueryResult::new(
            vec!["table_name".to_string(), "fk_errors".to_string()],
            vec![
                json!({"table_name": "books", "fk_errors": "books_genre_fk (1)"}),
                json!({"table_name": "genres", "fk_errors": null}),
            ],
        );

        let output = format_table(&result);
        assert!(output.starts_with("table_name | fk_errors"));
        assert!(output.contains("books      | books_genre_fk (1)"));
        assert!(output.contains("\ngenres     |\n"));
        assert!(output.ends_with("(2 rows)"));
    }

    #[test]
    fn test_format_single_row_and_empty() {
        let result = QueryResult::new(vec!["id".to_string()], vec![json!({"id": 7})]);
        assert!(format_table(&result).ends_with("(1 row)"));
        assert_eq!(format_table(&QueryResult::empty()), "(0 rows)");
    }
}
