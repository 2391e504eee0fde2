//! pg-upsert - QA checks and upserts from staging tables into base tables
//!
//! Staging tables hold candidate rows for base tables of the same name. A run:
//! - checks the staging rows against the base table's constraints
//!   (not-null, primary key, foreign key and check constraints)
//! - records the findings per table in a control table
//! - when every table passed, updates matching rows and inserts new rows,
//!   referenced tables first
//! - commits only when asked to and something changed
//!
//! The engine talks to the database through the [`Database`] trait; the
//! PostgreSQL implementation is [`PostgresBackend`] (feature `postgres-backend`).
//! Interactive confirmations go through a [`DecisionProvider`].

pub mod catalog;
pub mod config;
pub mod control;
pub mod database;
pub mod decision;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod qa;
pub mod sql;
pub mod upsert;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export commonly used types
pub use config::{UpsertConfig, UpsertMethod};
pub use control::{ControlTable, TableSpec};
pub use database::{Database, DatabaseError, DatabaseResult, QueryResult};
pub use decision::{AutoContinue, ConfirmKind, ConfirmRequest, Decision, DecisionProvider};
pub use engine::{PgUpsert, RunSummary};
pub use error::{UpsertError, UpsertResult};
pub use qa::CheckKind;
pub use sql::Sql;
pub use upsert::{UpsertOutcome, UpsertPlan};

#[cfg(feature = "postgres-backend")]
pub use database::PostgresBackend;
