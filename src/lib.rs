pub mod backup;
pub mod browse;
pub mod config;
pub mod connection;
pub mod core;
pub mod ddl;
pub mod drivers;
pub mod ops;
pub mod pattern;
pub mod script;

// Re-export for shorter paths: use pgforge::ForgeTable;
pub use crate::core::{ForgeColumn, ForgeError, ForgeTable, ForgeValue};
use crate::core::{ColumnRecord, DataRow, TableStats};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Stream of decoded rows, used where whole tables should not sit in memory.
pub type RowStream<'a> = Pin<Box<dyn Stream<Item = Result<DataRow, ForgeError>> + Send + 'a>>;

/// Everything the planner, executor, browser and backup need from a database.
///
/// Metadata methods only look at base tables in schema `public`.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Runs a trivial query to prove the connection works.
    async fn ping(&self) -> Result<(), ForgeError>;

    /// Base tables with their statistics, ordered by name.
    async fn fetch_table_stats(&self) -> Result<Vec<TableStats>, ForgeError>;

    /// Column metadata ordered by table name, then ordinal position.
    /// `None` returns the columns of every table in one query.
    async fn fetch_columns(&self, table_name: Option<&str>)
    -> Result<Vec<ColumnRecord>, ForgeError>;

    /// Executes a statement without parameters, returns affected rows.
    async fn execute(&self, sql: &str) -> Result<u64, ForgeError>;

    /// Executes a parameterized statement, returns affected rows.
    async fn execute_with(&self, sql: &str, params: &[ForgeValue]) -> Result<u64, ForgeError>;

    /// Runs a query and decodes all rows into memory.
    async fn fetch_rows(&self, sql: &str, params: &[ForgeValue])
    -> Result<Vec<DataRow>, ForgeError>;

    /// Runs a query inside a READ ONLY transaction that is always rolled back.
    async fn fetch_rows_read_only(&self, sql: &str) -> Result<Vec<DataRow>, ForgeError>;

    /// Streams the rows of a query one by one.
    async fn stream_rows<'a>(&'a self, sql: &'a str) -> Result<RowStream<'a>, ForgeError>;

    /// Releases the connection.
    async fn close(&self);
}
