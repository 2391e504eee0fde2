//! End-to-end tests against a live PostgreSQL server
//!
//! Set `PG_UPSERT_TEST_URL` (e.g. `host=localhost user=postgres dbname=pg_upsert_test`)
//! to run them; without it every test returns immediately. Each test works in
//! its own pair of schemas and drops them afterwards.

#![cfg(feature = "postgres-backend")]

use pg_upsert::{PgUpsert, PostgresBackend, UpsertConfig, UpsertError};
use tokio_postgres::{Client, NoTls};

const TEST_URL: &str = "PG_UPSERT_TEST_URL";

const LIBRARY_DDL: &str = "
create schema {base};
create schema {stg};
create table {base}.genres (
    id integer primary key,
    name text not null
);
create table {base}.books (
    id integer primary key,
    title text not null,
    genre_id integer,
    constraint books_genre_fk foreign key (genre_id) references {base}.genres (id),
    constraint books_title_ck check (length(title) > 0)
);
create table {stg}.genres (id integer, name text);
create table {stg}.books (id integer, title text, genre_id integer);
";

struct Fixture {
    url: String,
    client: Client,
    base: String,
    stg: String,
}

impl Fixture {
    /// Connect and create the library schemas, or `None` when no server is configured
    async fn library(name: &str) -> anyhow::Result<Option<Self>> {
        let Ok(url) = std::env::var(TEST_URL) else {
            return Ok(None);
        };
        let (client, connection) = tokio_postgres::connect(&url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("connection error: {}", e);
            }
        });

        let fixture = Self {
            url,
            client,
            base: format!("pgu_{}_{}_base", name, std::process::id()),
            stg: format!("pgu_{}_{}_stg", name, std::process::id()),
        };
        fixture.drop_schemas().await?;
        fixture.exec(LIBRARY_DDL).await?;
        Ok(Some(fixture))
    }

    async fn exec(&self, sql: &str) -> anyhow::Result<()> {
        let sql = sql.replace("{base}", &self.base).replace("{stg}", &self.stg);
        self.client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn count(&self, schema: &str, table: &str) -> anyhow::Result<i64> {
        let row = self
            .client
            .query_one(&format!("select count(*) from {}.{}", schema, table), &[])
            .await?;
        Ok(row.get(0))
    }

    fn config(&self, tables: &[&str], commit: bool) -> UpsertConfig {
        UpsertConfig {
            tables: tables.iter().map(|t| t.to_string()).collect(),
            base_schema: self.base.clone(),
            staging_schema: self.stg.clone(),
            commit,
            ..UpsertConfig::default()
        }
    }

    async fn engine(
        &self,
        tables: &[&str],
        commit: bool,
    ) -> anyhow::Result<PgUpsert<PostgresBackend>> {
        let db = PostgresBackend::new(&self.url).await?;
        Ok(PgUpsert::new(db, self.config(tables, commit)).await?)
    }

    async fn drop_schemas(&self) -> anyhow::Result<()> {
        self.exec("drop schema if exists {base} cascade; drop schema if exists {stg} cascade;")
            .await
    }
}

#[tokio::test]
async fn test_orphan_foreign_key_blocks_every_table() -> anyhow::Result<()> {
    let Some(fx) = Fixture::library("orphan").await? else {
        return Ok(());
    };
    fx.exec(
        "insert into {stg}.genres values (1, 'Fiction'), (2, 'Poetry');
         insert into {stg}.books values (1, 'Dune', 99);",
    )
    .await?;

    let mut upsert = fx.engine(&["genres", "books"], true).await?;
    let summary = upsert.run().await?;
    upsert.close().await?;

    assert!(!summary.qa_passed);
    assert_eq!(summary.failing_tables(), vec!["books"]);
    let books = summary.tables.iter().find(|t| t.table_name == "books").unwrap();
    assert_eq!(books.fk_errors.as_deref(), Some("books_genre_fk (1)"));
    assert_eq!(fx.count(&fx.base, "genres").await?, 0);
    assert_eq!(fx.count(&fx.base, "books").await?, 0);

    fx.drop_schemas().await
}

#[tokio::test]
async fn test_null_foreign_key_is_not_reported() -> anyhow::Result<()> {
    let Some(fx) = Fixture::library("nullfk").await? else {
        return Ok(());
    };
    fx.exec(
        "insert into {stg}.genres values (1, 'Fiction');
         insert into {stg}.books values (1, 'Dune', null), (2, 'Emma', 1);",
    )
    .await?;

    // books listed first; genres must still be loaded before it
    let mut upsert = fx.engine(&["books", "genres"], true).await?;
    let summary = upsert.run().await?;
    upsert.close().await?;

    assert!(summary.qa_passed);
    assert!(summary.committed);
    assert_eq!(fx.count(&fx.base, "genres").await?, 1);
    assert_eq!(fx.count(&fx.base, "books").await?, 2);

    fx.drop_schemas().await
}

#[tokio::test]
async fn test_without_commit_base_is_unchanged() -> anyhow::Result<()> {
    let Some(fx) = Fixture::library("nocommit").await? else {
        return Ok(());
    };
    fx.exec("insert into {stg}.genres values (1, 'Fiction'), (2, 'Poetry');")
        .await?;

    let mut upsert = fx.engine(&["genres"], false).await?;
    let summary = upsert.run().await?;
    upsert.close().await?;

    assert!(summary.qa_passed);
    assert!(!summary.committed);
    assert_eq!(summary.tables[0].rows_inserted, Some(2));
    assert_eq!(fx.count(&fx.base, "genres").await?, 0);

    fx.drop_schemas().await
}

#[tokio::test]
async fn test_second_run_updates_every_match() -> anyhow::Result<()> {
    let Some(fx) = Fixture::library("rerun").await? else {
        return Ok(());
    };
    fx.exec("insert into {stg}.genres values (1, 'Fiction'), (2, 'Poetry');")
        .await?;

    let mut first = fx.engine(&["genres"], true).await?;
    let summary = first.run().await?;
    first.close().await?;
    assert_eq!(summary.tables[0].rows_inserted, Some(2));
    assert_eq!(summary.tables[0].rows_updated, Some(0));

    let mut second = fx.engine(&["genres"], true).await?;
    let summary = second.run().await?;
    second.close().await?;
    assert_eq!(summary.tables[0].rows_inserted, Some(0));
    assert_eq!(summary.tables[0].rows_updated, Some(2));
    assert_eq!(fx.count(&fx.base, "genres").await?, 2);

    fx.drop_schemas().await
}

#[tokio::test]
async fn test_findings_recorded_per_check() -> anyhow::Result<()> {
    let Some(fx) = Fixture::library("findings").await? else {
        return Ok(());
    };
    fx.exec(
        "insert into {stg}.genres values (1, 'Fiction'), (1, 'Poetry'), (2, null);
         insert into {stg}.books values (1, '', null);",
    )
    .await?;

    let mut upsert = fx.engine(&["genres", "books"], true).await?;
    assert!(!upsert.qa_all().await?);

    let genres = upsert.control().get("genres").unwrap().clone();
    assert_eq!(genres.null_errors.as_deref(), Some("name (1)"));
    assert_eq!(
        genres.pk_errors,
        Some(format!("1 duplicate keys (2 rows) in table {}.genres", fx.stg))
    );
    let books = upsert.control().get("books").unwrap().clone();
    assert_eq!(books.ck_errors.as_deref(), Some("books_title_ck (1)"));
    assert!(books.fk_errors.is_none());
    upsert.close().await?;

    fx.drop_schemas().await
}

#[tokio::test]
async fn test_missing_tables_are_all_listed() -> anyhow::Result<()> {
    let Some(fx) = Fixture::library("missing").await? else {
        return Ok(());
    };

    let db = PostgresBackend::new(&fx.url).await?;
    let result = PgUpsert::new(db, fx.config(&["genres", "publishers"], false)).await;
    match result {
        Err(UpsertError::InvalidTables(msg)) => assert_eq!(
            msg,
            format!(
                "{}.publishers (base), {}.publishers (staging)",
                fx.base, fx.stg
            )
        ),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("publishers does not exist"),
    }

    fx.drop_schemas().await
}
