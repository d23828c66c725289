use crate::connection::ConnectionDescriptor;
use crate::core::{
    ColumnRecord, ConnectionSide, ForgeColumn, ForgeConfig, ForgeError, ForgeTable, ForgeValue,
    MigrationPlan, PlanAction, PlannedTable, TableMigrationOutcome, TableStats,
};
use crate::{DatabaseDriver, ddl, drivers, pattern};
use indexmap::IndexMap;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, error, info, warn};
use std::collections::HashMap;

/// Groups metadata rows by table, keeping the query's table order and the
/// ordinal order inside each table.
#[must_use]
pub fn group_columns(records: Vec<ColumnRecord>) -> IndexMap<String, Vec<ForgeColumn>> {
    let mut grouped: IndexMap<String, Vec<ForgeColumn>> = IndexMap::new();
    for record in records {
        grouped
            .entry(record.table_name)
            .or_default()
            .push(record.column);
    }
    for columns in grouped.values_mut() {
        columns.sort_by_key(|c| c.ordinal_position);
    }
    grouped
}

/// Base tables without system tables, filtered by pattern.
pub async fn list_table_stats(
    driver: &dyn DatabaseDriver,
    table_pattern: Option<&str>,
) -> Result<Vec<TableStats>, ForgeError> {
    let stats = driver.fetch_table_stats().await?;
    Ok(stats
        .into_iter()
        .filter(|s| pattern::is_selected(&s.name, table_pattern))
        .collect())
}

/// Full descriptions of every selected table, columns from one metadata query.
pub async fn list_tables(
    driver: &dyn DatabaseDriver,
    table_pattern: Option<&str>,
) -> Result<Vec<ForgeTable>, ForgeError> {
    let stats = list_table_stats(driver, table_pattern).await?;
    let mut columns = group_columns(driver.fetch_columns(None).await?);

    Ok(stats
        .into_iter()
        .map(|s| {
            let mut table =
                ForgeTable::from_columns(&s.name, columns.shift_remove(&s.name).unwrap_or_default());
            table.row_count = s.row_count;
            table.size_bytes = s.size_bytes;
            table
        })
        .collect())
}

/// Describes one table of schema `public`.
pub async fn describe_table(
    driver: &dyn DatabaseDriver,
    table_name: &str,
) -> Result<ForgeTable, ForgeError> {
    pattern::validate_table_name(table_name)?;

    let records = driver.fetch_columns(Some(table_name)).await?;
    let columns = group_columns(records)
        .shift_remove(table_name)
        .ok_or_else(|| ForgeError::NotFound(table_name.to_string()))?;

    let mut table = ForgeTable::from_columns(table_name, columns);
    if let Some(stats) = driver
        .fetch_table_stats()
        .await?
        .into_iter()
        .find(|s| s.name == table_name)
    {
        table.row_count = stats.row_count;
        table.size_bytes = stats.size_bytes;
    }
    Ok(table)
}

/// Opens a connection, runs `SELECT 1` and closes it again.
pub async fn test_connection(
    descriptor: &ConnectionDescriptor,
    side: ConnectionSide,
    config: &ForgeConfig,
) -> Result<(), ForgeError> {
    let driver = drivers::create_driver(descriptor, side, config).await?;
    let result = driver.ping().await;
    driver.close().await;
    result
}

/// Dry-run actions for one table.
#[must_use]
pub fn plan_table(table_name: &str, columns: &[ForgeColumn]) -> PlannedTable {
    let actions = if pattern::is_valid_identifier(table_name) {
        vec![
            PlanAction::Drop(ddl::render_drop(table_name)),
            PlanAction::Create(ddl::render_create(table_name, columns)),
            PlanAction::Comment(ddl::render_copy_comment(table_name)),
        ]
    } else {
        vec![PlanAction::Comment(format!(
            "-- skipped: table name {table_name:?} is not a plain identifier"
        ))]
    };

    PlannedTable {
        table_name: table_name.to_string(),
        actions,
    }
}

/// Builds the dry-run plan from the source alone; the destination is never touched.
pub async fn build_plan(
    source: &dyn DatabaseDriver,
    table_pattern: Option<&str>,
) -> Result<MigrationPlan, ForgeError> {
    let grouped = group_columns(source.fetch_columns(None).await?);

    let tables = grouped
        .iter()
        .filter(|(name, _)| pattern::is_selected(name, table_pattern))
        .map(|(name, columns)| plan_table(name, columns))
        .collect::<Vec<_>>();

    info!("dry run planned {} table(s)", tables.len());
    Ok(MigrationPlan { tables })
}

/// What to migrate and whether to copy rows.
#[derive(Debug, Clone)]
pub struct MigrationRequest {
    /// LIKE pattern, `None` selects everything
    pub pattern: Option<String>,
    /// Restricts the selection further (intersection)
    pub allow_list: Option<Vec<String>>,
    /// Per-table copy switch
    pub copy_data: HashMap<String, bool>,
    /// Applied to tables without an entry in `copy_data`
    pub copy_data_default: bool,
}

impl Default for MigrationRequest {
    fn default() -> Self {
        Self {
            pattern: None,
            allow_list: None,
            copy_data: HashMap::new(),
            copy_data_default: true,
        }
    }
}

impl MigrationRequest {
    #[must_use]
    pub fn new(pattern: Option<&str>) -> Self {
        Self {
            pattern: pattern.map(str::to_string),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn should_copy(&self, table_name: &str) -> bool {
        self.copy_data
            .get(table_name)
            .copied()
            .unwrap_or(self.copy_data_default)
    }

    /// Rejects malformed names in the allow-list and the copy flags.
    pub fn validate(&self) -> Result<(), ForgeError> {
        self.allow_list
            .iter()
            .flatten()
            .chain(self.copy_data.keys())
            .try_for_each(|name| pattern::validate_table_name(name))
    }
}

/// Discovered tables minus system tables, filtered by pattern and allow-list.
pub async fn select_tables(
    source: &dyn DatabaseDriver,
    request: &MigrationRequest,
) -> Result<Vec<String>, ForgeError> {
    let stats = list_table_stats(source, request.pattern.as_deref()).await?;

    Ok(stats
        .into_iter()
        .map(|s| s.name)
        .filter(|name| {
            request
                .allow_list
                .as_ref()
                .is_none_or(|allowed| allowed.iter().any(|a| a == name))
        })
        .collect())
}

fn progress_style() -> Result<ProgressStyle, ForgeError> {
    Ok(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} rows ({msg}) {per_sec}",
    )
    .map_err(|e| ForgeError::Internal(e.to_string()))?
    .progress_chars("#>-"))
}

/// Runs the live migration, one table after the other.
///
/// A failing table is recorded as an error outcome and the run continues
/// with the next table. Nothing is rolled back.
pub async fn migrate(
    source: &dyn DatabaseDriver,
    destination: &dyn DatabaseDriver,
    request: &MigrationRequest,
    show_progress: bool,
) -> Result<Vec<TableMigrationOutcome>, ForgeError> {
    request.validate()?;

    let tables = select_tables(source, request).await?;
    info!("migrating {} table(s)", tables.len());

    let multi = MultiProgress::with_draw_target(if show_progress {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    });
    let style = progress_style()?;

    let mut outcomes = Vec::with_capacity(tables.len());
    for table in &tables {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(style.clone());
        pb.set_message(format!("Forging table: {table}"));

        let result = migrate_table(source, destination, table, request.should_copy(table), &pb).await;
        match &result {
            Ok(rows) => {
                info!("table {table}: done, {rows} row(s) copied");
                pb.finish_with_message(format!("Done: {table} ({rows} rows)"));
            }
            Err(e) => {
                error!("table {table}: {e}");
                pb.abandon_with_message(format!("Failed: {table}"));
            }
        }
        outcomes.push(TableMigrationOutcome::from_result(table, result));
    }

    Ok(outcomes)
}

/// discover -> drop -> create -> (copy) for one table.
async fn migrate_table(
    source: &dyn DatabaseDriver,
    destination: &dyn DatabaseDriver,
    table_name: &str,
    copy_data: bool,
    pb: &ProgressBar,
) -> Result<u64, ForgeError> {
    pattern::validate_table_name(table_name)?;

    let columns = group_columns(source.fetch_columns(Some(table_name)).await?)
        .shift_remove(table_name)
        .ok_or_else(|| ForgeError::NotFound(table_name.to_string()))?;

    destination.execute(&ddl::render_drop(table_name)).await?;
    destination
        .execute(&ddl::render_create(table_name, &columns))
        .await?;
    debug!("table {table_name}: recreated in destination");

    if !copy_data {
        warn!("table {table_name}: data copy disabled, structure only");
        return Ok(0);
    }

    let rows = source
        .fetch_rows(&ddl::render_select(table_name, &columns), &[])
        .await?;
    pb.set_length(rows.len() as u64);

    let insert_sql = ddl::render_insert(table_name, &columns);
    let mut copied = 0;
    for row in &rows {
        // canonical column order, missing cells bound as NULL
        let params: Vec<ForgeValue> = columns
            .iter()
            .map(|c| row.get(&c.name).cloned().unwrap_or(ForgeValue::Null))
            .collect();
        destination.execute_with(&insert_sql, &params).await?;
        copied += 1;
        pb.set_position(copied);
    }

    Ok(copied)
}
