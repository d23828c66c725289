//! Generic table browsing: listing, paging, edits and read-only queries.
//!
//! Table names go through the identifier check, column names must exist in
//! the introspected table, and all values travel as bind parameters.

use crate::core::{
    ForgeColumn, ForgeConfig, ForgeError, ForgeTable, ForgeValue, TableSummary, row_to_json,
};
use crate::{DatabaseDriver, ddl, ops};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

type JsonMap = serde_json::Map<String, serde_json::Value>;

static WRITE_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|GRANT|REVOKE|COPY|MERGE|CALL|VACUUM|REINDEX|CLUSTER|COMMENT|LOCK|REFRESH|SECURITY|INTO)\b",
    )
    .expect("write keyword regex is valid")
});

/// Table listing without system tables.
pub async fn list_tables(driver: &dyn DatabaseDriver) -> Result<Vec<TableSummary>, ForgeError> {
    let stats = ops::list_table_stats(driver, None).await?;
    Ok(stats.iter().map(TableSummary::from).collect())
}

#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// 1-based page, 0 is treated as 1
    pub page: u32,
    pub page_size: Option<u32>,
    pub sort_column: Option<String>,
    pub descending: bool,
    /// Case-insensitive substring over all columns
    pub search: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RowPage {
    pub table: String,
    pub page: u32,
    pub page_size: u32,
    pub total_rows: i64,
    pub total_pages: i64,
    pub rows: Vec<serde_json::Value>,
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn find_column<'t>(table: &'t ForgeTable, name: &str) -> Result<&'t ForgeColumn, ForgeError> {
    table.column(name).ok_or_else(|| {
        ForgeError::Validation(format!(
            "table '{}' has no column '{}'",
            table.name, name
        ))
    })
}

/// One page of rows, optionally sorted and filtered.
pub async fn fetch_page(
    driver: &dyn DatabaseDriver,
    table_name: &str,
    request: &PageRequest,
    config: &ForgeConfig,
) -> Result<RowPage, ForgeError> {
    let table = ops::describe_table(driver, table_name).await?;

    let page = request.page.max(1);
    let page_size = request
        .page_size
        .unwrap_or_else(|| config.default_page_size())
        .clamp(1, config.max_page_size());

    let mut params = Vec::new();
    let mut where_sql = String::new();
    if let Some(search) = request.search.as_deref().filter(|s| !s.trim().is_empty()) {
        params.push(ForgeValue::Text(format!("%{}%", escape_like(search.trim()))));
        let conditions = table
            .columns
            .iter()
            .map(|c| format!("{}::text ILIKE $1", ddl::quote_ident(&c.name)))
            .collect::<Vec<_>>()
            .join(" OR ");
        where_sql = format!(" WHERE ({conditions})");
    }

    let count_sql = format!(
        "SELECT COUNT(*)::int8 AS total FROM {}{}",
        ddl::quote_ident(&table.name),
        where_sql
    );
    let total_rows = match driver
        .fetch_rows(&count_sql, &params)
        .await?
        .first()
        .and_then(|row| row.get("total"))
    {
        Some(ForgeValue::Integer(total)) => *total,
        _ => 0,
    };

    let direction = if request.descending { "DESC" } else { "ASC" };
    let order_sql = match request.sort_column.as_deref() {
        Some(column) => format!(
            " ORDER BY {} {}",
            ddl::quote_ident(&find_column(&table, column)?.name),
            direction
        ),
        None if !table.primary_key.is_empty() => format!(
            " ORDER BY {}",
            table
                .primary_key
                .iter()
                .map(|c| format!("{} {}", ddl::quote_ident(c), direction))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        None => String::new(),
    };

    let offset = i64::from(page - 1) * i64::from(page_size);
    let limit_index = params.len() + 1;
    params.push(ForgeValue::Integer(i64::from(page_size)));
    params.push(ForgeValue::Integer(offset));

    let page_sql = format!(
        "{}{}{} LIMIT ${} OFFSET ${}",
        ddl::render_select(&table.name, &table.columns),
        where_sql,
        order_sql,
        limit_index,
        limit_index + 1
    );
    let rows = driver.fetch_rows(&page_sql, &params).await?;

    Ok(RowPage {
        table: table.name,
        page,
        page_size,
        total_rows,
        total_pages: (total_rows + i64::from(page_size) - 1) / i64::from(page_size),
        rows: rows.iter().map(row_to_json).collect(),
    })
}

/// Columns named in `values`, in table order, paired with their values.
fn bind_columns<'t>(
    table: &'t ForgeTable,
    values: &JsonMap,
) -> Result<Vec<(&'t ForgeColumn, ForgeValue)>, ForgeError> {
    if let Some(unknown) = values.keys().find(|key| table.column(key).is_none()) {
        return Err(ForgeError::Validation(format!(
            "table '{}' has no column '{}'",
            table.name, unknown
        )));
    }
    Ok(table
        .columns
        .iter()
        .filter_map(|col| {
            values
                .get(&col.name)
                .map(|value| (col, ForgeValue::from_json(value)))
        })
        .collect())
}

/// `"a" = CAST($n AS type) AND "b" IS NULL ...`, parameters appended to `params`.
fn predicate_sql(
    table: &ForgeTable,
    predicate: &JsonMap,
    params: &mut Vec<ForgeValue>,
) -> Result<String, ForgeError> {
    if predicate.is_empty() {
        return Err(ForgeError::Validation(
            "refusing to touch every row: the predicate is empty".to_string(),
        ));
    }

    let conditions = bind_columns(table, predicate)?
        .into_iter()
        .map(|(col, value)| {
            if value.is_null() {
                format!("{} IS NULL", ddl::quote_ident(&col.name))
            } else {
                params.push(value);
                format!(
                    "{} = {}",
                    ddl::quote_ident(&col.name),
                    ddl::render_placeholder(col, params.len())
                )
            }
        })
        .collect::<Vec<_>>();

    Ok(conditions.join(" AND "))
}

/// Inserts one row built from a JSON object.
pub async fn insert_row(
    driver: &dyn DatabaseDriver,
    table_name: &str,
    values: &JsonMap,
) -> Result<u64, ForgeError> {
    let table = ops::describe_table(driver, table_name).await?;
    if values.is_empty() {
        return Err(ForgeError::Validation("no values to insert".to_string()));
    }

    let (columns, params): (Vec<ForgeColumn>, Vec<ForgeValue>) = bind_columns(&table, values)?
        .into_iter()
        .map(|(col, value)| (col.clone(), value))
        .unzip();

    driver
        .execute_with(&ddl::render_insert(&table.name, &columns), &params)
        .await
}

/// Updates every row matching `predicate` (column equality, ANDed).
pub async fn update_rows(
    driver: &dyn DatabaseDriver,
    table_name: &str,
    set: &JsonMap,
    predicate: &JsonMap,
) -> Result<u64, ForgeError> {
    let table = ops::describe_table(driver, table_name).await?;
    if set.is_empty() {
        return Err(ForgeError::Validation("no values to update".to_string()));
    }

    let mut params = Vec::new();
    let assignments = bind_columns(&table, set)?
        .into_iter()
        .map(|(col, value)| {
            params.push(value);
            format!(
                "{} = {}",
                ddl::quote_ident(&col.name),
                ddl::render_placeholder(col, params.len())
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let where_sql = predicate_sql(&table, predicate, &mut params)?;

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        ddl::quote_ident(&table.name),
        assignments,
        where_sql
    );
    driver.execute_with(&sql, &params).await
}

/// Deletes every row matching `predicate` (column equality, ANDed).
pub async fn delete_rows(
    driver: &dyn DatabaseDriver,
    table_name: &str,
    predicate: &JsonMap,
) -> Result<u64, ForgeError> {
    let table = ops::describe_table(driver, table_name).await?;

    let mut params = Vec::new();
    let where_sql = predicate_sql(&table, predicate, &mut params)?;
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        ddl::quote_ident(&table.name),
        where_sql
    );
    driver.execute_with(&sql, &params).await
}

/// Read-only guard for ad hoc queries; returns the statement without a
/// trailing semicolon.
///
/// Lexical only: the query must start with SELECT, hold a single statement
/// and mention no write keyword anywhere (string literals included).
pub fn check_read_only(sql: &str) -> Result<&str, ForgeError> {
    let trimmed = sql.trim();
    let statement = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();

    let starts_with_select = statement
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"));
    if !starts_with_select {
        return Err(ForgeError::UnsafeQuery(
            "only SELECT statements are allowed".to_string(),
        ));
    }
    if statement.contains(';') {
        return Err(ForgeError::UnsafeQuery(
            "multiple statements are not allowed".to_string(),
        ));
    }
    if let Some(keyword) = WRITE_KEYWORDS.find(statement) {
        return Err(ForgeError::UnsafeQuery(format!(
            "keyword '{}' is not allowed in a read-only query",
            keyword.as_str().to_uppercase()
        )));
    }
    Ok(statement)
}

/// Runs a guarded SELECT inside a read-only transaction.
pub async fn run_query(
    driver: &dyn DatabaseDriver,
    sql: &str,
) -> Result<Vec<serde_json::Value>, ForgeError> {
    let statement = check_read_only(sql)?;
    let rows = driver.fetch_rows_read_only(statement).await?;
    Ok(rows.iter().map(row_to_json).collect())
}
