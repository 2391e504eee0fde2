//! PostgreSQL database backend implementation
//!
//! Wraps a single tokio-postgres connection. The connection behaves like a
//! client with autocommit disabled: the first statement after a commit or
//! rollback issues `BEGIN`, so every QA query and upsert of one run shares a
//! transaction until the engine decides to commit or roll back.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tracing::{debug, error};

use super::{Database, DatabaseError, DatabaseResult, QueryResult};
use crate::sql::Sql;

struct Session {
    client: tokio_postgres::Client,
    in_transaction: bool,
}

/// PostgreSQL database backend
pub struct PostgresBackend {
    /// Connection string
    connection_string: String,
    /// Client and transaction state (wrapped for async access)
    session: Arc<Mutex<Session>>,
}

impl PostgresBackend {
    /// Connect to PostgreSQL
    ///
    /// # Arguments
    /// * `connection_string` - URL (`postgresql://...`) or key/value connection string
    pub async fn new(connection_string: &str) -> DatabaseResult<Self> {
        let (client, connection) =
            tokio_postgres::connect(connection_string, tokio_postgres::NoTls)
                .await
                .map_err(|e| {
                    DatabaseError::ConnectionFailed(format!(
                        "Failed to connect to PostgreSQL: {}",
                        e
                    ))
                })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        let backend = Self {
            connection_string: connection_string.to_string(),
            session: Arc::new(Mutex::new(Session {
                client,
                in_transaction: false,
            })),
        };
        debug!("Connected to {}", backend.connection_string_masked());

        Ok(backend)
    }

    /// Get the connection string (masked for security)
    pub fn connection_string_masked(&self) -> String {
        mask_password(&self.connection_string)
    }

    async fn begin_if_needed(session: &mut Session) -> DatabaseResult<()> {
        if !session.in_transaction {
            session.client.batch_execute("BEGIN").await.map_err(|e| {
                DatabaseError::TransactionFailed(format!("Failed to begin transaction: {}", e))
            })?;
            session.in_transaction = true;
        }
        Ok(())
    }

    /// Convert a PostgreSQL row to a JSON value
    fn row_to_json(row: &tokio_postgres::Row, columns: &[String]) -> serde_json::Value {
        let mut map = serde_json::Map::new();

        for (i, col_name) in columns.iter().enumerate() {
            let value = Self::get_column_value(row, i);
            map.insert(col_name.clone(), value);
        }

        serde_json::Value::Object(map)
    }

    /// Get a column value as JSON
    fn get_column_value(row: &tokio_postgres::Row, idx: usize) -> serde_json::Value {
        use serde_json::Value;

        if let Ok(v) = row.try_get::<_, Option<String>>(idx) {
            return v.map(Value::String).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i64>>(idx) {
            return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i32>>(idx) {
            return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i16>>(idx) {
            return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<bool>>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<f64>>(idx) {
            return v
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null);
        }

        Value::Null
    }
}

impl std::fmt::Display for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PostgresBackend({})", self.connection_string_masked())
    }
}

/// Replace the password in a URL or key/value connection string with `****`
pub fn mask_password(connection_string: &str) -> String {
    if connection_string.contains("://") {
        if let Some(at_pos) = connection_string.rfind('@')
            && let Some(scheme_end) = connection_string.find("://")
            && let Some(colon_pos) = connection_string[scheme_end + 3..at_pos].rfind(':')
        {
            let colon_pos = scheme_end + 3 + colon_pos;
            let prefix = &connection_string[..colon_pos + 1];
            let suffix = &connection_string[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
        return connection_string.to_string();
    }

    if let Some(start) = connection_string.find("password=") {
        let value_start = start + "password=".len();
        let rest = &connection_string[value_start..];
        let value_len = if let Some(quoted) = rest.strip_prefix('\'') {
            let mut escaped = false;
            let mut end = quoted.len();
            for (i, c) in quoted.char_indices() {
                match c {
                    '\\' if !escaped => escaped = true,
                    '\'' if !escaped => {
                        end = i;
                        break;
                    }
                    _ => escaped = false,
                }
            }
            (end + 2).min(rest.len())
        } else {
            rest.find(char::is_whitespace).unwrap_or(rest.len())
        };
        return format!(
            "{}****{}",
            &connection_string[..value_start],
            &rest[value_len..]
        );
    }

    connection_string.to_string()
}

fn param_refs(params: &[String]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|s| s as &(dyn ToSql + Sync)).collect()
}

#[async_trait(?Send)]
impl Database for PostgresBackend {
    async fn query(&self, sql: &Sql) -> DatabaseResult<QueryResult> {
        let (text, params) = sql.render();
        debug!("{}", sql);

        let mut session = self.session.lock().await;
        Self::begin_if_needed(&mut session).await?;

        let statement = session
            .client
            .prepare(&text)
            .await
            .map_err(|e| DatabaseError::QueryFailed(format!("{}: {}", e, text)))?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let rows = session
            .client
            .query(&statement, &param_refs(&params))
            .await
            .map_err(|e| DatabaseError::QueryFailed(format!("{}: {}", e, text)))?;

        let json_rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| Self::row_to_json(row, &columns))
            .collect();

        Ok(QueryResult::new(columns, json_rows))
    }

    async fn execute(&self, sql: &Sql) -> DatabaseResult<u64> {
        let (text, params) = sql.render();
        debug!("{}", sql);

        let mut session = self.session.lock().await;
        Self::begin_if_needed(&mut session).await?;

        session
            .client
            .execute(text.as_str(), &param_refs(&params))
            .await
            .map_err(|e| DatabaseError::QueryFailed(format!("{}: {}", e, text)))
    }

    async fn commit(&self) -> DatabaseResult<()> {
        let mut session = self.session.lock().await;
        if session.in_transaction {
            session.client.batch_execute("COMMIT").await.map_err(|e| {
                DatabaseError::TransactionFailed(format!("Failed to commit: {}", e))
            })?;
            session.in_transaction = false;
        }
        Ok(())
    }

    async fn rollback(&self) -> DatabaseResult<()> {
        let mut session = self.session.lock().await;
        if session.in_transaction {
            session.client.batch_execute("ROLLBACK").await.map_err(|e| {
                DatabaseError::TransactionFailed(format!("Failed to roll back: {}", e))
            })?;
            session.in_transaction = false;
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn close(&self) -> DatabaseResult<()> {
        // The connection task ends when the client is dropped
        self.rollback().await
    }
}
