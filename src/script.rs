//! Standalone migration script export.
//!
//! The exported bash program repeats the live algorithm with `psql`:
//! discover tables, exclude system tables, apply the LIKE pattern with the
//! same escape-then-substitute rule as [`crate::pattern::like_to_regex`],
//! then per table DROP + CREATE (built from introspection at run time) and
//! a chunked `\copy` of the rows, all inside one transaction per table.

use crate::connection::ConnectionDescriptor;
use crate::core::ForgeError;
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct ScriptOptions {
    /// Rows per `\copy` chunk
    pub batch_size: usize,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::core::DEFAULT_BATCH_SIZE,
        }
    }
}

const SCRIPT_TEMPLATE: &str = r#"#!/usr/bin/env bash
#
# Table migration script generated by pgforge @@VERSION@@ at @@CREATED_AT@@
#
#   source:      @@SOURCE_LABEL@@
#   destination: @@DEST_LABEL@@
#   pattern:     @@PATTERN_LABEL@@
#
# WARNING: every matching table that already exists in the destination is
#          dropped with DROP TABLE ... CASCADE before it is recreated.
# WARNING: the connection strings below contain credentials in cleartext.
#          Keep this file private and delete it when you are done.
#
# Tables and CREATE TABLE statements are discovered when the script runs.
# Indexes, foreign keys, check constraints, sequences and triggers are not
# copied. Each table is migrated in its own transaction; a failing table is
# rolled back and the script continues with the next one.
#
# Requires: bash, psql, grep, sed, split, mktemp

set -u

SOURCE_DSN=@@SOURCE_DSN@@
DEST_DSN=@@DEST_DSN@@
TABLE_PATTERN=@@PATTERN@@
BATCH_SIZE=@@BATCH_SIZE@@

PSQL=(psql -X -q -v ON_ERROR_STOP=1)

# LIKE pattern -> extended regex: escape metacharacters, then % -> .* and _ -> .
like_to_regex() {
    printf '%s' "$1" | sed -e 's/[[\\.^$*+?(){|]/\\&/g' -e 's/%/.*/g' -e 's/_/./g'
}

table_selected() {
    case "$1" in
        pg_*|information_schema*) return 1 ;;
    esac
    if [ -z "$TABLE_PATTERN" ]; then
        return 0
    fi
    printf '%s\n' "$1" | grep -Eiqx -- "$(like_to_regex "$TABLE_PATTERN")"
}

# CREATE TABLE from live column metadata, same clause grammar as pgforge:
# "name" type[(length)][ NOT NULL][ DEFAULT expr]
create_statement() {
    "${PSQL[@]}" -At -d "$SOURCE_DSN" -v tbl="$1" <<'SQL'
SELECT 'CREATE TABLE "' || :'tbl' || '" (' || string_agg(
           '"' || replace(column_name::text, '"', '""') || '" '
           || CASE WHEN data_type::text IN ('ARRAY', 'USER-DEFINED')
                   THEN udt_name::text ELSE data_type::text END
           || COALESCE('(' || character_maximum_length::text || ')', '')
           || CASE WHEN is_nullable::text = 'NO' THEN ' NOT NULL' ELSE '' END
           || COALESCE(' DEFAULT ' || column_default::text, ''),
           ', ' ORDER BY ordinal_position) || ');'
FROM information_schema.columns
WHERE table_schema = 'public' AND table_name = :'tbl'
HAVING count(*) > 0;
SQL
}

migrate_table() {
    local name="$1"
    local create_sql data_file rows chunk
    local -a steps

    create_sql=$(create_statement "$name") || return 1
    if [ -z "$create_sql" ]; then
        echo "  no columns found for $name" >&2
        return 1
    fi

    data_file="$WORKDIR/$name.data"
    "${PSQL[@]}" -d "$SOURCE_DSN" -c "\\copy \"$name\" TO '$data_file'" < /dev/null || return 1
    rows=$(wc -l < "$data_file")
    split -a 6 -l "$BATCH_SIZE" "$data_file" "$WORKDIR/$name.chunk_" || return 1

    steps=(-c "DROP TABLE IF EXISTS \"$name\" CASCADE;" -c "$create_sql")
    for chunk in "$WORKDIR/$name".chunk_*; do
        [ -e "$chunk" ] || continue
        steps+=(-c "\\copy \"$name\" FROM '$chunk'")
    done

    "${PSQL[@]}" -d "$DEST_DSN" --single-transaction "${steps[@]}" < /dev/null || return 1
    rm -f "$data_file" "$WORKDIR/$name".chunk_*
    echo "  copied $((rows)) row(s)"
}

WORKDIR=$(mktemp -d) || exit 1
trap 'rm -rf "$WORKDIR"' EXIT

TABLES=$("${PSQL[@]}" -At -d "$SOURCE_DSN" -c "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public' AND table_type = 'BASE TABLE' ORDER BY table_name" < /dev/null) || {
    echo "cannot read the table list from the source database" >&2
    exit 1
}
mapfile -t TABLE_LIST <<< "$TABLES"

SUCCEEDED=0
FAILED=()

for name in "${TABLE_LIST[@]}"; do
    [ -n "$name" ] || continue
    table_selected "$name" || continue
    if ! [[ "$name" =~ ^[A-Za-z_][A-Za-z0-9_]*$ ]]; then
        echo "SKIP $name: not a plain identifier" >&2
        FAILED+=("$name")
        continue
    fi

    echo "Table $name"
    if migrate_table "$name"; then
        SUCCEEDED=$((SUCCEEDED + 1))
    else
        echo "  FAILED $name: rolled back, continuing" >&2
        FAILED+=("$name")
    fi
done

echo
echo "Done: $SUCCEEDED table(s) migrated, ${#FAILED[@]} failed"
if [ "${#FAILED[@]}" -gt 0 ]; then
    printf '  failed: %s\n' "${FAILED[@]}" >&2
    exit 1
fi
"#;

/// Quotes a value for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Single-line, control-character free rendering for header comments.
fn comment_label(value: &str) -> String {
    value.escape_default().to_string()
}

/// Renders the standalone migration script.
///
/// Credentials end up in the text in cleartext; the header says so.
pub fn render_script(
    source: &ConnectionDescriptor,
    destination: &ConnectionDescriptor,
    table_pattern: Option<&str>,
    options: &ScriptOptions,
) -> Result<String, ForgeError> {
    if options.batch_size == 0 {
        return Err(ForgeError::Validation(
            "batch size must be greater than 0".to_string(),
        ));
    }
    let pattern = table_pattern.unwrap_or_default();
    let source_dsn = source.to_dsn();
    let dest_dsn = destination.to_dsn();
    if [pattern, source_dsn.as_str(), dest_dsn.as_str()]
        .iter()
        .any(|value| value.contains('\0'))
    {
        return Err(ForgeError::Validation(
            "script values must not contain NUL characters".to_string(),
        ));
    }

    let pattern_label = if pattern.is_empty() {
        "(all tables)".to_string()
    } else {
        comment_label(pattern)
    };

    let values = [
        ("VERSION", env!("CARGO_PKG_VERSION").to_string()),
        ("CREATED_AT", Utc::now().to_rfc3339()),
        ("SOURCE_LABEL", comment_label(&source.redacted())),
        ("DEST_LABEL", comment_label(&destination.redacted())),
        ("PATTERN_LABEL", pattern_label),
        ("SOURCE_DSN", shell_quote(&source_dsn)),
        ("DEST_DSN", shell_quote(&dest_dsn)),
        ("PATTERN", shell_quote(pattern)),
        ("BATCH_SIZE", options.batch_size.to_string()),
    ];
    Ok(fill_template(SCRIPT_TEMPLATE, &values))
}

/// Replaces `@@KEY@@` markers in one pass, so substituted text is never
/// scanned again.
fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;

    while let Some(start) = rest.find("@@") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let replaced = after.find("@@").and_then(|end| {
            let key = &after[..end];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (value, end))
        });
        match replaced {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("@@");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
