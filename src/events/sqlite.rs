//! SQLite Connection
//!
//! [`Connection`] implementation over an `sqlx` SQLite pool. The pool holds a
//! single connection: SQLite allows one writer at a time, and queueing on the
//! pool avoids "database is locked" failures under concurrent appends.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Column, Pool, Row as _, Sqlite, TypeInfo, ValueRef};
use tracing::debug;

use super::connection::{Connection, QueryResult, Row, SqlValue, Transaction};
use crate::error::Result;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite-backed connection
#[derive(Debug, Clone)]
pub struct SqliteConnection {
    pool: Pool<Sqlite>,
}

impl SqliteConnection {
    /// Open (creating if missing) a database from an `sqlite:` URL
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        debug!(url = %url, "Opened SQLite database");
        Ok(Self { pool })
    }

    /// Private in-memory database. The single connection is never recycled,
    /// since closing it would discard the data.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let query = bind_params(sql, params);
        if returns_rows(sql) {
            let rows = query.fetch_all(&self.pool).await?;
            Ok(QueryResult::with_rows(decode_rows(&rows)?))
        } else {
            let done = query.execute(&self.pool).await?;
            Ok(QueryResult::affected(done.rows_affected()))
        }
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

/// Open SQLite transaction
pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let query = bind_params(sql, params);
        if returns_rows(sql) {
            let rows = query.fetch_all(&mut *self.tx).await?;
            Ok(QueryResult::with_rows(decode_rows(&rows)?))
        } else {
            let done = query.execute(&mut *self.tx).await?;
            Ok(QueryResult::affected(done.rows_affected()))
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn returns_rows(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_uppercase();
    head.starts_with("SELECT")
        || head.starts_with("WITH")
        || head.starts_with("PRAGMA")
        || head.contains(" RETURNING ")
}

fn bind_params<'q>(sql: &'q str, params: &'q [SqlValue]) -> SqliteQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Integer(value) => query.bind(*value),
            SqlValue::Real(value) => query.bind(*value),
            SqlValue::Text(value) => query.bind(value.as_str()),
        })
}

fn decode_rows(rows: &[SqliteRow]) -> Result<Vec<Row>> {
    rows.iter().map(decode_row).collect()
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        let (is_null, storage) = {
            let raw = row.try_get_raw(index)?;
            (raw.is_null(), raw.type_info().name().to_string())
        };

        let value = if is_null {
            SqlValue::Null
        } else {
            match storage.as_str() {
                "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" => SqlValue::Real(row.try_get_unchecked::<f64, _>(index)?),
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                    SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        columns.push((column.name().to_string(), value));
    }
    Ok(Row::new(columns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_and_select() {
        let conn = SqliteConnection::in_memory().await.unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL)", &[])
            .await
            .unwrap();

        let inserted = conn
            .execute(
                "INSERT INTO t (name, score) VALUES (?, ?), (?, ?)",
                &["a".into(), 1.5.into(), SqlValue::Null, 2.0.into()],
            )
            .await
            .unwrap();
        assert_eq!(inserted.rows_affected, 2);

        let result = conn
            .execute("SELECT id, name, score FROM t ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].get_str("name").unwrap(), "a");
        assert_eq!(result.rows[0].get("score"), Some(&SqlValue::Real(1.5)));
        assert_eq!(result.rows[1].get_opt_str("name").unwrap(), None);
        assert_eq!(result.rows[1].get_i64("id").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let conn = SqliteConnection::in_memory().await.unwrap();
        conn.execute("CREATE TABLE t (v INTEGER)", &[]).await.unwrap();

        let mut tx = conn.begin().await.unwrap();
        tx.execute("INSERT INTO t (v) VALUES (?)", &[1i64.into()]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = conn.begin().await.unwrap();
        tx.execute("INSERT INTO t (v) VALUES (?)", &[2i64.into()]).await.unwrap();
        tx.rollback().await.unwrap();

        // Dropped without commit
        {
            let mut tx = conn.begin().await.unwrap();
            tx.execute("INSERT INTO t (v) VALUES (?)", &[3i64.into()]).await.unwrap();
        }

        let rows = conn.execute("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(rows.rows[0].get_i64("n").unwrap(), 1);
    }

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("  select 1"));
        assert!(returns_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows("DELETE FROM t WHERE id = ? RETURNING id"));
        assert!(!returns_rows("INSERT INTO t VALUES (1)"));
    }
}
