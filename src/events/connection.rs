//! SQL Connection Port
//!
//! The event store talks to its relational backend only through
//! [`Connection`] and [`Transaction`]. Statements use `?` positional
//! placeholders and [`SqlValue`] parameters; results come back as
//! name-addressed [`Row`]s.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Statement parameter or column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<u64> for SqlValue {
    fn from(value: u64) -> Self {
        // Versions and counts stay far below i64::MAX
        SqlValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One result row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new(columns: Vec<(String, SqlValue)>) -> Self {
        Self { columns }
    }

    /// Raw value of a column
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    fn require(&self, column: &str) -> Result<&SqlValue> {
        self.get(column)
            .ok_or_else(|| Error::Database(format!("column '{}' missing from result", column)))
    }

    pub fn get_opt_str(&self, column: &str) -> Result<Option<&str>> {
        match self.require(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(text) => Ok(Some(text.as_str())),
            other => Err(Error::Database(format!(
                "column '{}' is not text: {:?}",
                column, other
            ))),
        }
    }

    pub fn get_str(&self, column: &str) -> Result<&str> {
        self.get_opt_str(column)?
            .ok_or_else(|| Error::Database(format!("column '{}' is NULL", column)))
    }

    pub fn get_opt_i64(&self, column: &str) -> Result<Option<i64>> {
        match self.require(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(value) => Ok(Some(*value)),
            other => Err(Error::Database(format!(
                "column '{}' is not an integer: {:?}",
                column, other
            ))),
        }
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        self.get_opt_i64(column)?
            .ok_or_else(|| Error::Database(format!("column '{}' is NULL", column)))
    }

    /// Non-negative integer column
    pub fn get_u64(&self, column: &str) -> Result<u64> {
        let value = self.get_i64(column)?;
        u64::try_from(value)
            .map_err(|_| Error::Corruption(format!("column '{}' is negative: {}", column, value)))
    }
}

/// Result of one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryResult {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows_affected: 0,
            rows,
        }
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

/// Relational backend handle
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run one statement outside any explicit transaction
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// Start a transaction
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// Open transaction; dropping it without commit rolls back
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Either a plain connection or an open transaction
pub(crate) enum Executor<'a> {
    Connection(&'a dyn Connection),
    Transaction(&'a mut dyn Transaction),
}

impl Executor<'_> {
    pub(crate) async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        match self {
            Executor::Connection(conn) => conn.execute(sql, params).await,
            Executor::Transaction(tx) => tx.execute(sql, params).await,
        }
    }

    /// First row of a query, if any
    pub(crate) async fn fetch_optional(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        Ok(self.execute(sql, params).await?.rows.into_iter().next())
    }

    pub(crate) async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        Ok(self.execute(sql, params).await?.rows)
    }
}
