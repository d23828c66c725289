//! Plain SQL backup of the selected tables: DROP + CREATE + INSERT literals.
//!
//! The dump carries the same DDL the migration would issue, so restoring it
//! with `psql -f` reproduces tables and rows, not indexes or constraints.

use crate::core::{ForgeError, ForgeTable, ForgeValue};
use crate::{DatabaseDriver, ddl, ops, pattern};
use chrono::Utc;
use futures::StreamExt;
use log::{info, warn};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub tables: usize,
    pub rows: u64,
    pub skipped: Vec<String>,
}

fn write_header<W: Write>(
    out: &mut W,
    tables: &[ForgeTable],
    pattern: Option<&str>,
) -> Result<(), ForgeError> {
    writeln!(out, "-- pgforge SQL backup")?;
    writeln!(out, "-- created at {}", Utc::now().to_rfc3339())?;
    writeln!(
        out,
        "-- pattern: {}",
        pattern.map_or("(all tables)".to_string(), |p| p.escape_default().to_string())
    )?;
    writeln!(out, "-- tables: {}", tables.len())?;
    writeln!(out)?;
    writeln!(out, "SET standard_conforming_strings = on;")?;
    writeln!(out, "SET client_encoding = 'UTF8';")?;
    Ok(())
}

async fn write_table<W: Write>(
    driver: &dyn DatabaseDriver,
    table: &ForgeTable,
    out: &mut W,
) -> Result<u64, ForgeError> {
    writeln!(out)?;
    writeln!(out, "-- Table: {}", ddl::quote_ident(&table.name))?;
    writeln!(out, "{}", ddl::render_drop(&table.name))?;
    writeln!(out, "{}", ddl::render_create(&table.name, &table.columns))?;

    let columns = table
        .columns
        .iter()
        .map(|c| ddl::quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let insert_prefix = format!(
        "INSERT INTO {} ({columns}) VALUES",
        ddl::quote_ident(&table.name)
    );

    let sql = ddl::render_select(&table.name, &table.columns);
    let mut stream = driver.stream_rows(&sql).await?;
    let mut rows = 0;
    while let Some(row) = stream.next().await {
        let row = row?;
        let values = table
            .columns
            .iter()
            .map(|c| {
                row.get(&c.name)
                    .map_or_else(|| "NULL".to_string(), ForgeValue::to_sql_literal)
            })
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, "{insert_prefix} ({values});")?;
        rows += 1;
    }
    Ok(rows)
}

/// Writes the backup of every table selected by `table_pattern`.
///
/// Tables whose names are not plain identifiers are skipped and reported.
pub async fn write_backup<W: Write>(
    driver: &dyn DatabaseDriver,
    table_pattern: Option<&str>,
    out: &mut W,
) -> Result<BackupSummary, ForgeError> {
    let (tables, skipped): (Vec<ForgeTable>, Vec<ForgeTable>) =
        ops::list_tables(driver, table_pattern)
            .await?
            .into_iter()
            .partition(|t| pattern::is_valid_identifier(&t.name));

    let mut summary = BackupSummary {
        skipped: skipped.into_iter().map(|t| t.name).collect(),
        ..Default::default()
    };
    for name in &summary.skipped {
        warn!("backup: skipping table {name:?}, not a plain identifier");
    }

    write_header(out, &tables, table_pattern)?;
    for table in &tables {
        let rows = write_table(driver, table, out).await?;
        info!("backup: table {} ({rows} rows)", table.name);
        summary.tables += 1;
        summary.rows += rows;
    }
    out.flush()?;

    Ok(summary)
}
