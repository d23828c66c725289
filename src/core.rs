//! Core data structures for table descriptions, row values and results.
//!
//! This module defines the fundamental types used throughout pgforge:
//! - Configuration structures loaded from TOML
//! - Table and column descriptions produced by introspection
//! - Universal row values for moving data between databases
//! - Migration plans and per-table outcomes
//! - Error types for all operations

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use ipnetwork::IpNetwork;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// config structures for pgforge.toml

/// Main configuration structure for pgforge.
///
/// Every section is optional, missing values fall back to built-in defaults
/// through the accessor methods.
///
/// # Examples
///
/// ```
/// use pgforge::core::ForgeConfig;
///
/// let config = ForgeConfig::default();
/// assert_eq!(config.batch_size(), 1000);
/// assert!(config.copy_data_default());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ForgeConfig {
    /// General settings (SQL logging)
    pub general: Option<ForgeGeneralConfig>,
    /// Connection settings
    pub connection: Option<ForgeConnectionConfig>,
    /// Live migration settings
    pub migrate: Option<ForgeMigrateConfig>,
    /// Script export settings
    pub export: Option<ForgeExportConfig>,
    /// Table browsing settings
    pub browse: Option<ForgeBrowseConfig>,
}

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

impl ForgeConfig {
    /// Log every generated SQL statement at debug level.
    #[must_use]
    pub fn log_sql(&self) -> bool {
        self.general
            .as_ref()
            .and_then(|g| g.log_sql)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn connect_timeout_secs(&self) -> u64 {
        self.connection
            .as_ref()
            .and_then(|c| c.connect_timeout_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
    }

    /// Whether tables without an explicit flag get their rows copied.
    #[must_use]
    pub fn copy_data_default(&self) -> bool {
        self.migrate
            .as_ref()
            .and_then(|m| m.copy_data_default)
            .unwrap_or(true)
    }

    /// Rows per `\copy` chunk in exported scripts (never 0).
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.export
            .as_ref()
            .and_then(|e| e.batch_size)
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE)
    }

    #[must_use]
    pub fn default_page_size(&self) -> u32 {
        self.browse
            .as_ref()
            .and_then(|b| b.default_page_size)
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    #[must_use]
    pub fn max_page_size(&self) -> u32 {
        self.browse
            .as_ref()
            .and_then(|b| b.max_page_size)
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_MAX_PAGE_SIZE)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ForgeGeneralConfig {
    pub log_sql: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ForgeConnectionConfig {
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ForgeMigrateConfig {
    pub copy_data_default: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ForgeExportConfig {
    pub batch_size: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ForgeBrowseConfig {
    pub default_page_size: Option<u32>,
    pub max_page_size: Option<u32>,
}

// Structures for the internal representation of tables

/// Represents a table column as seen by introspection.
///
/// # Examples
///
/// ```
/// use pgforge::core::ForgeColumn;
///
/// let col = ForgeColumn::new("email", "character varying")
///     .with_max_length(255)
///     .not_null();
/// assert_eq!(col.name, "email");
/// assert!(!col.is_nullable);
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForgeColumn {
    /// Column name
    pub name: String,
    /// Declared type, used verbatim in CREATE TABLE
    pub data_type: String,
    /// Underlying type name from `pg_type` (int4, varchar, _text, ...)
    pub udt_name: String,
    /// Whether the column allows NULL values
    pub is_nullable: bool,
    /// Default value expression, verbatim
    pub default: Option<String>,
    /// Length for character and bit types
    pub max_length: Option<i32>,
    /// 1-based position inside the table
    pub ordinal_position: i32,
    /// Whether this column is part of the primary key
    pub is_primary_key: bool,
}

impl ForgeColumn {
    /// Creates a nullable column; `udt_name` starts out equal to `data_type`.
    #[must_use]
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            udt_name: data_type.to_string(),
            is_nullable: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_udt(mut self, udt_name: &str) -> Self {
        self.udt_name = udt_name.to_string();
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    #[must_use]
    pub fn with_default(mut self, expression: &str) -> Self {
        self.default = Some(expression.to_string());
        self
    }

    #[must_use]
    pub fn with_max_length(mut self, length: i32) -> Self {
        self.max_length = Some(length);
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }
}

/// Represents a table with its columns and statistics.
///
/// `row_count` and `size_bytes` come from the statistics collector and are
/// estimates only.
///
/// # Examples
///
/// ```
/// use pgforge::core::{ForgeColumn, ForgeTable};
///
/// let table = ForgeTable::from_columns(
///     "users",
///     vec![ForgeColumn::new("id", "integer").primary_key(), ForgeColumn::new("name", "text")],
/// );
/// assert_eq!(table.primary_key, vec!["id".to_string()]);
/// assert_eq!(table.columns[1].ordinal_position, 2);
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForgeTable {
    /// Table name
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<ForgeColumn>,
    /// Primary key column names in ordinal order
    pub primary_key: Vec<String>,
    /// Live row estimate (`n_live_tup`), 0 without statistics
    pub row_count: i64,
    /// Total relation size in bytes, 0 without statistics
    pub size_bytes: i64,
}

impl ForgeTable {
    /// Builds a table from columns; ordinal positions left at 0 are numbered
    /// by their position in the list.
    #[must_use]
    pub fn from_columns(name: &str, columns: Vec<ForgeColumn>) -> Self {
        let columns: Vec<ForgeColumn> = columns
            .into_iter()
            .enumerate()
            .map(|(idx, mut col)| {
                if col.ordinal_position == 0 {
                    col.ordinal_position = i32::try_from(idx + 1).unwrap_or(i32::MAX);
                }
                col
            })
            .collect();

        let primary_key = columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect();

        Self {
            name: name.to_string(),
            columns,
            primary_key,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ForgeColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One row of the column metadata query, still tagged with its table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRecord {
    pub table_name: String,
    pub column: ForgeColumn,
}

/// Statistics row for one base table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableStats {
    pub name: String,
    pub row_count: i64,
    pub size_bytes: i64,
}

/// Short listing entry used by `analyze` and `tables`.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub name: String,
    pub approximate_row_count: i64,
    #[serde(rename = "humanReadableSize")]
    pub size: String,
    pub size_bytes: i64,
}

impl From<&TableStats> for TableSummary {
    fn from(stats: &TableStats) -> Self {
        Self {
            name: stats.name.clone(),
            approximate_row_count: stats.row_count,
            size: format_bytes(u64::try_from(stats.size_bytes).unwrap_or(0)),
            size_bytes: stats.size_bytes,
        }
    }
}

const SIZE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Renders a byte count with base-1024 units and at most two decimals.
///
/// # Examples
///
/// ```
/// use pgforge::core::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 Bytes");
/// assert_eq!(format_bytes(1024), "1 KB");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rendered = format!("{value:.2}");
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, SIZE_UNITS[unit])
}

// --- UNIVERSAL intermediate data types ---

/// Universal value type for one cell of a row.
///
/// Types without a native variant travel as `Raw`, holding the text
/// rendering PostgreSQL produced for them.
///
/// # Examples
///
/// ```
/// use pgforge::core::ForgeValue;
///
/// assert_eq!(ForgeValue::Text("it's".into()).to_sql_literal(), "'it''s'");
/// assert_eq!(ForgeValue::Null.to_sql_literal(), "NULL");
/// assert_eq!(ForgeValue::from_json(&serde_json::json!(42)), ForgeValue::Integer(42));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ForgeValue {
    /// NULL value
    Null,
    /// UTF-8 text (text, varchar, char, name)
    Text(String),
    /// Signed integer (int2, int4, int8)
    Integer(i64),
    /// Floating point (float4, float8)
    Float(f64),
    /// Arbitrary precision decimal (numeric)
    Numeric(Decimal),
    /// Boolean value
    Boolean(bool),
    /// Timestamp without time zone
    Timestamp(NaiveDateTime),
    /// Timestamp with time zone, normalized to UTC
    TimestampTz(DateTime<Utc>),
    /// Date without time
    Date(NaiveDate),
    /// Time without date
    Time(NaiveTime),
    /// json / jsonb
    Json(serde_json::Value),
    /// UUID value
    Uuid(Uuid),
    /// IP network address (inet, cidr)
    Inet(IpNetwork),
    /// Binary data (bytea)
    Bytes(Vec<u8>),
    /// Text rendering of any other type
    Raw(String),
}

impl ForgeValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, ForgeValue::Null)
    }

    /// Converts a JSON request value into a cell value.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ForgeValue::Null,
            serde_json::Value::Bool(b) => ForgeValue::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ForgeValue::Integer(i),
                None => n.as_f64().map_or(ForgeValue::Null, ForgeValue::Float),
            },
            serde_json::Value::String(s) => ForgeValue::Text(s.clone()),
            other => ForgeValue::Json(other.clone()),
        }
    }

    /// Converts the cell into JSON for responses.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            ForgeValue::Null => J::Null,
            ForgeValue::Text(s) | ForgeValue::Raw(s) => J::String(s.clone()),
            ForgeValue::Integer(i) => J::from(*i),
            ForgeValue::Float(f) => serde_json::Number::from_f64(*f)
                .map_or_else(|| J::String(f.to_string()), J::Number),
            ForgeValue::Numeric(d) => d
                .to_string()
                .parse::<serde_json::Number>()
                .map_or_else(|_| J::String(d.to_string()), J::Number),
            ForgeValue::Boolean(b) => J::Bool(*b),
            ForgeValue::Timestamp(ts) => J::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            ForgeValue::TimestampTz(ts) => J::String(ts.to_rfc3339()),
            ForgeValue::Date(d) => J::String(d.to_string()),
            ForgeValue::Time(t) => J::String(t.to_string()),
            ForgeValue::Json(v) => v.clone(),
            ForgeValue::Uuid(u) => J::String(u.to_string()),
            ForgeValue::Inet(net) => J::String(net.to_string()),
            ForgeValue::Bytes(b) => J::String(format!("\\x{}", hex_string(b))),
        }
    }

    /// Renders the value as a SQL literal for text dumps.
    #[must_use]
    pub fn to_sql_literal(&self) -> String {
        match self {
            ForgeValue::Null => "NULL".to_string(),
            ForgeValue::Text(s) | ForgeValue::Raw(s) => quote_literal(s),
            ForgeValue::Integer(i) => i.to_string(),
            ForgeValue::Float(f) if f.is_finite() => f.to_string(),
            ForgeValue::Float(f) => quote_literal(&float_special(*f)),
            ForgeValue::Numeric(d) => d.to_string(),
            ForgeValue::Boolean(true) => "TRUE".to_string(),
            ForgeValue::Boolean(false) => "FALSE".to_string(),
            ForgeValue::Timestamp(ts) => quote_literal(&ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            ForgeValue::TimestampTz(ts) => quote_literal(&ts.to_rfc3339()),
            ForgeValue::Date(d) => quote_literal(&d.to_string()),
            ForgeValue::Time(t) => quote_literal(&t.to_string()),
            ForgeValue::Json(v) => quote_literal(&v.to_string()),
            ForgeValue::Uuid(u) => quote_literal(&u.to_string()),
            ForgeValue::Inet(net) => quote_literal(&net.to_string()),
            ForgeValue::Bytes(b) => format!("'\\x{}'", hex_string(b)),
        }
    }
}

/// Quotes a string as a standard-conforming SQL literal.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn float_special(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_sign_positive() {
        "Infinity".to_string()
    } else {
        "-Infinity".to_string()
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Represents a database row: column name to value, in column order.
pub type DataRow = IndexMap<String, ForgeValue>;

/// Converts a row into a JSON object preserving column order.
#[must_use]
pub fn row_to_json(row: &DataRow) -> serde_json::Value {
    serde_json::Value::Object(
        row.iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect(),
    )
}

// --- Migration plan and outcomes ---

/// One step of a dry-run plan.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", content = "sql", rename_all = "lowercase")]
pub enum PlanAction {
    Comment(String),
    Drop(String),
    Create(String),
}

impl PlanAction {
    #[must_use]
    pub fn sql(&self) -> &str {
        match self {
            PlanAction::Comment(s) | PlanAction::Drop(s) | PlanAction::Create(s) => s,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTable {
    pub table_name: String,
    pub actions: Vec<PlanAction>,
}

/// Ordered preview of what a migration would do. Purely descriptive.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    pub tables: Vec<PlannedTable>,
}

impl MigrationPlan {
    /// Tables the migration would drop in the destination.
    #[must_use]
    pub fn dropped_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.actions.iter().any(|a| matches!(a, PlanAction::Drop(_))))
            .map(|t| t.table_name.as_str())
            .collect()
    }

    /// Operator warning for the destructive part of the plan, if any.
    #[must_use]
    pub fn warning(&self) -> Option<String> {
        let dropped = self.dropped_tables();
        if dropped.is_empty() {
            return None;
        }
        Some(format!(
            "WARNING: {} table(s) will be dropped with CASCADE in the destination if they exist: {}",
            dropped.len(),
            dropped.join(", ")
        ))
    }

    /// All statements as one SQL text, one per line.
    #[must_use]
    pub fn to_sql(&self) -> String {
        self.tables
            .iter()
            .flat_map(|t| t.actions.iter().map(PlanAction::sql))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// Result of migrating one table.
///
/// `rows_copied` is present iff the status is success, `error_message` iff
/// it is error; use the constructors to keep it that way.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableMigrationOutcome {
    pub table: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_copied: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TableMigrationOutcome {
    #[must_use]
    pub fn success(table: &str, rows_copied: u64) -> Self {
        Self {
            table: table.to_string(),
            status: OutcomeStatus::Success,
            rows_copied: Some(rows_copied),
            error_message: None,
        }
    }

    #[must_use]
    pub fn failure(table: &str, message: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            status: OutcomeStatus::Error,
            rows_copied: None,
            error_message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn from_result(table: &str, result: Result<u64, ForgeError>) -> Self {
        match result {
            Ok(rows) => Self::success(table, rows),
            Err(e) => Self::failure(table, e.to_string()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

// --- Errors ---

/// Which leg of an operation a connection belongs to.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionSide {
    Source,
    Destination,
    Database,
}

impl fmt::Display for ConnectionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionSide::Source => "source",
            ConnectionSide::Destination => "destination",
            ConnectionSide::Database => "database",
        };
        f.write_str(label)
    }
}

/// Error types for pgforge operations.
///
/// Validation and connection errors abort an operation; errors raised while
/// migrating a single table are folded into that table's outcome instead.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Malformed descriptor, identifier or request. Never reaches the database.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Connection or authentication failure, labeled by side.
    #[error("Connection to {side} database failed: {source}")]
    Connection {
        side: ConnectionSide,
        source: sqlx::Error,
    },

    /// Requested table does not exist in schema `public`.
    #[error("Table '{0}' not found in schema 'public'")]
    NotFound(String),

    /// Standard database error from sqlx.
    ///
    /// Automatically converted from `sqlx::Error` via the `?` operator.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Ad hoc query refused by the read-only guard.
    #[error("Query rejected: {0}")]
    UnsafeQuery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected internal state that should not occur during normal operation.
    #[error("General Internal Error: {0}")]
    Internal(String),
}

impl ForgeError {
    /// Machine-checkable error category.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ForgeError::Validation(_) => "validation",
            ForgeError::Connection { .. } => "connection",
            ForgeError::NotFound(_) => "not_found",
            ForgeError::Database(_) => "database",
            ForgeError::UnsafeQuery(_) => "unsafe_query",
            ForgeError::Config(_) => "config",
            ForgeError::Io(_) => "io",
            ForgeError::Json(_) => "json",
            ForgeError::Internal(_) => "internal",
        }
    }

    /// Process exit code used by the command line tool.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            ForgeError::Validation(_) | ForgeError::Config(_) => 2,
            ForgeError::Connection { .. } => 3,
            ForgeError::NotFound(_) => 4,
            ForgeError::UnsafeQuery(_) => 5,
            _ => 1,
        }
    }

    pub fn connection(side: ConnectionSide, source: sqlx::Error) -> Self {
        ForgeError::Connection { side, source }
    }
}
