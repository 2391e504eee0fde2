//! Scripted in-memory database for unit tests
//!
//! Answers statements by substring match against the rendered SQL (literals
//! inlined), in the order rules were added. Unmatched queries return an
//! empty result and unmatched statements affect zero rows.

use async_trait::async_trait;
use std::cell::RefCell;

use super::{Database, DatabaseError, DatabaseResult, QueryResult};
use crate::sql::Sql;

enum Reply {
    Rows(QueryResult),
    Affected(u64),
    Fail(String),
}

#[derive(Default)]
pub(crate) struct ScriptedDatabase {
    rules: RefCell<Vec<(String, Reply)>>,
    statements: RefCell<Vec<String>>,
    events: RefCell<Vec<&'static str>>,
}

impl ScriptedDatabase {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer queries containing `pattern` with the given rows
    pub(crate) fn on_query(
        self,
        pattern: &str,
        columns: &[&str],
        rows: Vec<serde_json::Value>,
    ) -> Self {
        let result = QueryResult::new(columns.iter().map(|c| c.to_string()).collect(), rows);
        self.rules
            .borrow_mut()
            .push((pattern.to_string(), Reply::Rows(result)));
        self
    }

    /// Answer statements containing `pattern` with an affected-row count
    pub(crate) fn on_execute(self, pattern: &str, affected: u64) -> Self {
        self.rules
            .borrow_mut()
            .push((pattern.to_string(), Reply::Affected(affected)));
        self
    }

    /// Fail statements containing `pattern`
    pub(crate) fn on_fail(self, pattern: &str, message: &str) -> Self {
        self.rules
            .borrow_mut()
            .push((pattern.to_string(), Reply::Fail(message.to_string())));
        self
    }

    /// Statements containing `pattern`
    pub(crate) fn statements_matching(&self, pattern: &str) -> Vec<String> {
        self.statements
            .borrow()
            .iter()
            .filter(|s| s.contains(pattern))
            .cloned()
            .collect()
    }

    /// `"commit"`/`"rollback"` calls in order
    pub(crate) fn events(&self) -> Vec<&'static str> {
        self.events.borrow().clone()
    }

    fn reply(&self, sql: &Sql) -> Option<DatabaseResult<Result<QueryResult, u64>>> {
        let text = sql.to_string();
        self.statements.borrow_mut().push(text.clone());
        let rules = self.rules.borrow();
        let (_, reply) = rules
            .iter()
            .find(|(pattern, _)| text.contains(pattern.as_str()))?;
        Some(match reply {
            Reply::Rows(result) => Ok(Ok(result.clone())),
            Reply::Affected(n) => Ok(Err(*n)),
            Reply::Fail(message) => Err(DatabaseError::QueryFailed(message.clone())),
        })
    }
}

#[async_trait(?Send)]
impl Database for ScriptedDatabase {
    async fn query(&self, sql: &Sql) -> DatabaseResult<QueryResult> {
        match self.reply(sql) {
            Some(Ok(Ok(result))) => Ok(result),
            Some(Ok(Err(_))) | None => Ok(QueryResult::empty()),
            Some(Err(e)) => Err(e),
        }
    }

    async fn execute(&self, sql: &Sql) -> DatabaseResult<u64> {
        match self.reply(sql) {
            Some(Ok(Err(n))) => Ok(n),
            Some(Ok(Ok(result))) => Ok(result.row_count() as u64),
            None => Ok(0),
            Some(Err(e)) => Err(e),
        }
    }

    async fn commit(&self) -> DatabaseResult<()> {
        self.events.borrow_mut().push("commit");
        Ok(())
    }

    async fn rollback(&self) -> DatabaseResult<()> {
        self.events.borrow_mut().push("rollback");
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "scripted"
    }

    async fn close(&self) -> DatabaseResult<()> {
        Ok(())
    }
}
