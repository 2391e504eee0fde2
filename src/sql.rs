//! SQL fragment builder
//!
//! Every statement the engine sends to the database is assembled from
//! [`Sql`] fragments. A fragment is an ordered list of parts:
//!
//! - raw SQL text written by the engine itself
//! - identifiers (schema, table, column and constraint names), always double-quoted
//! - literal values, always sent as positional parameters
//!
//! Catalog-derived names therefore never reach the server as bare text.
//!
//! ## Example
//!
//! ```rust
//! use pg_upsert::sql::Sql;
//!
//! let stmt = Sql::raw("select count(*) from ")
//!     .push_qualified("staging", "books")
//!     .push_raw(" where ")
//!     .push_ident("title")
//!     .push_raw(" = ")
//!     .push_literal("Dune");
//!
//! let (text, params) = stmt.render();
//! assert_eq!(text, r#"select count(*) from "staging"."books" where "title" = $1::text"#);
//! assert_eq!(params, vec!["Dune".to_string()]);
//! ```

use std::fmt;

/// One piece of a SQL statement
#[derive(Debug, Clone, PartialEq, Eq)]
enum SqlPart {
    /// Trusted SQL text emitted verbatim
    Raw(String),
    /// An identifier, quoted on render
    Ident(String),
    /// A literal value, bound as a text parameter on render
    Literal(String),
}

/// A composable SQL statement or statement fragment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sql {
    parts: Vec<SqlPart>,
}

impl Sql {
    /// Create an empty fragment
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragment holding trusted SQL text
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            parts: vec![SqlPart::Raw(text.into())],
        }
    }

    /// Fragment holding a single identifier
    pub fn ident(name: impl Into<String>) -> Self {
        Self {
            parts: vec![SqlPart::Ident(name.into())],
        }
    }

    /// Fragment holding a schema-qualified name (`"schema"."name"`)
    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new().push_qualified(schema, name)
    }

    /// Fragment holding a column reference behind an engine-chosen alias (`alias."column"`)
    pub fn aliased(alias: &'static str, column: impl Into<String>) -> Self {
        Self::raw(format!("{}.", alias)).push_ident(column)
    }

    /// Fragment holding a single literal value
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            parts: vec![SqlPart::Literal(value.into())],
        }
    }

    /// Append another fragment
    pub fn push(mut self, other: Sql) -> Self {
        self.parts.extend(other.parts);
        self
    }

    /// Append trusted SQL text
    pub fn push_raw(mut self, text: impl Into<String>) -> Self {
        self.parts.push(SqlPart::Raw(text.into()));
        self
    }

    /// Append an identifier
    pub fn push_ident(mut self, name: impl Into<String>) -> Self {
        self.parts.push(SqlPart::Ident(name.into()));
        self
    }

    /// Append a schema-qualified name
    pub fn push_qualified(mut self, schema: impl Into<String>, name: impl Into<String>) -> Self {
        self.parts.push(SqlPart::Ident(schema.into()));
        self.parts.push(SqlPart::Raw(".".to_string()));
        self.parts.push(SqlPart::Ident(name.into()));
        self
    }

    /// Append a literal value
    pub fn push_literal(mut self, value: impl Into<String>) -> Self {
        self.parts.push(SqlPart::Literal(value.into()));
        self
    }

    /// Join fragments with a trusted separator
    pub fn join(separator: &str, items: impl IntoIterator<Item = Sql>) -> Self {
        let mut joined = Sql::new();
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                joined.parts.push(SqlPart::Raw(separator.to_string()));
            }
            joined.parts.extend(item.parts);
        }
        joined
    }

    /// Comma-separated list of quoted identifiers, optionally behind an alias
    pub fn ident_list<S: AsRef<str>>(alias: Option<&'static str>, columns: &[S]) -> Self {
        Self::join(
            ", ",
            columns.iter().map(|c| match alias {
                Some(alias) => Sql::aliased(alias, c.as_ref()),
                None => Sql::ident(c.as_ref()),
            }),
        )
    }

    /// Select list casting each aliased column to text under its own name
    ///
    /// `alias."c"::text as "c", ...`
    pub fn text_columns<S: AsRef<str>>(alias: &'static str, columns: &[S]) -> Self {
        Self::join(
            ", ",
            columns.iter().map(|c| {
                Sql::aliased(alias, c.as_ref())
                    .push_raw("::text as ")
                    .push_ident(c.as_ref())
            }),
        )
    }

    /// Equality conditions between two aliased column lists, paired positionally
    ///
    /// `left_alias."l1" = right_alias."r1" <separator> ...`
    pub fn column_pairs<S: AsRef<str>, T: AsRef<str>>(
        left_alias: &'static str,
        left: &[S],
        right_alias: &'static str,
        right: &[T],
        separator: &str,
    ) -> Self {
        Self::join(
            separator,
            left.iter().zip(right.iter()).map(|(l, r)| {
                Sql::aliased(left_alias, l.as_ref())
                    .push_raw(" = ")
                    .push(Sql::aliased(right_alias, r.as_ref()))
            }),
        )
    }

    /// Whether the fragment has no parts
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Render the statement text and its positional parameters
    pub fn render(&self) -> (String, Vec<String>) {
        let mut text = String::new();
        let mut params = Vec::new();
        for part in &self.parts {
            match part {
                SqlPart::Raw(raw) => text.push_str(raw),
                SqlPart::Ident(name) => text.push_str(&quote_ident(name)),
                SqlPart::Literal(value) => {
                    params.push(value.clone());
                    text.push_str(&format!("${}::text", params.len()));
                }
            }
        }
        (text, params)
    }
}

impl fmt::Display for Sql {
    /// Renders with literals inlined as quoted strings. For logging only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                SqlPart::Raw(raw) => f.write_str(raw)?,
                SqlPart::Ident(name) => f.write_str(&quote_ident(name))?,
                SqlPart::Literal(value) => f.write_str(&quote_literal(value))?,
            }
        }
        Ok(())
    }
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a PostgreSQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("books"), "\"books\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_literals_become_parameters() {
        let sql = Sql::raw("select * from t where a = ")
            .push_literal("x")
            .push_raw(" and b = ")
            .push_literal("it's");
        let (text, params) = sql.render();
        assert_eq!(text, "select * from t where a = $1::text and b = $2::text");
        assert_eq!(params, vec!["x".to_string(), "it's".to_string()]);
    }

    #[test]
    fn test_injection_attempt_stays_quoted() {
        let sql = Sql::raw("select * from ").push_qualified("public", "t\"; drop table x; --");
        let (text, params) = sql.render();
        assert_eq!(text, "select * from \"public\".\"t\"\"; drop table x; --\"");
        assert!(params.is_empty());
    }

    #[test]
    fn test_column_pairs() {
        let sql = Sql::column_pairs("b", &["id", "lang"], "s", &["id", "lang"], " and ");
        assert_eq!(sql.render().0, "b.\"id\" = s.\"id\" and b.\"lang\" = s.\"lang\"");
    }

    #[test]
    fn test_ident_list_with_alias() {
        let sql = Sql::ident_list(Some("s"), &["id", "name"]);
        assert_eq!(sql.render().0, "s.\"id\", s.\"name\"");
        let bare = Sql::ident_list::<&str>(None, &["id"]);
        assert_eq!(bare.render().0, "\"id\"");
    }

    #[test]
    fn test_text_columns() {
        let sql = Sql::text_columns("s", &["id", "title"]);
        assert_eq!(
            sql.render().0,
            "s.\"id\"::text as \"id\", s.\"title\"::text as \"title\""
        );
    }

    #[test]
    fn test_display_inlines_literals() {
        let sql = Sql::raw("select ").push_literal("O'Brien");
        assert_eq!(sql.to_string(), "select 'O''Brien'");
    }

    #[test]
    fn test_join_empty() {
        let sql = Sql::join(", ", Vec::<Sql>::new());
        assert!(sql.is_empty());
    }
}
