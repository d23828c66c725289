//! SQL text for the migration: DROP/CREATE from introspected columns, plus
//! the SELECT and INSERT used to move rows.
//!
//! Types and defaults are passed through verbatim. Indexes, foreign keys,
//! check constraints, identity/sequences and triggers are not reproduced.

use crate::core::ForgeColumn;

/// Types read natively when copying rows. Everything else is read as
/// `::text` and written back through a cast.
///
/// `numeric`, `timestamp`, `timestamptz` and `date` stay on the text path:
/// their value ranges (unbounded precision, `NaN`, `infinity`) exceed what
/// `Decimal` and chrono can hold.
pub const NATIVE_UDT_NAMES: [&str; 17] = [
    "bool", "int2", "int4", "int8", "float4", "float8", "text", "varchar", "bpchar", "name",
    "time", "json", "jsonb", "uuid", "inet", "cidr", "bytea",
];

/// Quotes an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[must_use]
pub fn render_drop(table_name: &str) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE;", quote_ident(table_name))
}

/// One column clause: `"name" type[(len)][ NOT NULL][ DEFAULT expr]`.
#[must_use]
pub fn render_column(col: &ForgeColumn) -> String {
    let mut def = format!("{} {}", quote_ident(&col.name), col.data_type);

    if let Some(len) = col.max_length {
        def.push_str(&format!("({len})"));
    }
    if !col.is_nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default {
        def.push_str(&format!(" DEFAULT {default}"));
    }
    def
}

/// Generates the CREATE TABLE statement, columns in the given (ordinal) order.
#[must_use]
pub fn render_create(table_name: &str, columns: &[ForgeColumn]) -> String {
    let col_defs = columns
        .iter()
        .map(render_column)
        .collect::<Vec<_>>()
        .join(", ");

    format!("CREATE TABLE {} ({});", quote_ident(table_name), col_defs)
}

#[must_use]
pub fn is_native_type(udt_name: &str) -> bool {
    NATIVE_UDT_NAMES.contains(&udt_name)
}

/// Full-table read in ordinal order.
#[must_use]
pub fn render_select(table_name: &str, columns: &[ForgeColumn]) -> String {
    let select_list = columns
        .iter()
        .map(|col| {
            let ident = quote_ident(&col.name);
            if is_native_type(&col.udt_name) {
                ident
            } else {
                format!("{ident}::text AS {ident}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!("SELECT {} FROM {}", select_list, quote_ident(table_name))
}

/// Placeholder for parameter `index`, cast to the column's type so untyped
/// NULLs and text-rendered values are accepted.
#[must_use]
pub fn render_placeholder(col: &ForgeColumn, index: usize) -> String {
    format!("CAST(${} AS {})", index, quote_ident(&col.udt_name))
}

/// Single-row parameterized INSERT in the given column order.
#[must_use]
pub fn render_insert(table_name: &str, columns: &[ForgeColumn]) -> String {
    let names = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = columns
        .iter()
        .enumerate()
        .map(|(idx, col)| render_placeholder(col, idx + 1))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table_name),
        names,
        placeholders
    )
}

/// Informational placeholder shown by the dry run in place of the data copy.
#[must_use]
pub fn render_copy_comment(table_name: &str) -> String {
    format!(
        "-- copy all rows: SELECT * FROM {0} (source) -> INSERT INTO {0} (destination)",
        quote_ident(table_name)
    )
}
