//! Table name filtering: LIKE-style patterns, system tables and the
//! identifier grammar every interpolated table name must satisfy.

use crate::core::ForgeError;
use log::warn;
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

static IDENTIFIER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid")
});

/// Upper bound for the compiled pattern; larger patterns fall back to match-all.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Translates a LIKE pattern into an anchored regex source.
///
/// Regex metacharacters are escaped first, then `%` becomes `.*` and `_`
/// becomes `.`. The exported script applies the same rule with `sed`.
#[must_use]
pub fn like_to_regex(pattern: &str) -> String {
    let escaped = regex::escape(pattern)
        .replace('%', ".*")
        .replace('_', ".");
    format!("^(?:{escaped})$")
}

/// Case-insensitive, anchored LIKE match of a table name.
///
/// An empty or missing pattern matches everything. If the regex cannot be
/// built the matcher fails open and returns `true`.
#[must_use]
pub fn matches(table_name: &str, pattern: Option<&str>) -> bool {
    let Some(pattern) = pattern.filter(|p| !p.is_empty()) else {
        return true;
    };

    match RegexBuilder::new(&like_to_regex(pattern))
        .case_insensitive(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
    {
        Ok(re) => re.is_match(table_name),
        Err(e) => {
            warn!("table pattern '{pattern}' could not be compiled ({e}), matching all tables");
            true
        }
    }
}

/// Catalog tables never listed, copied or dumped.
#[must_use]
pub fn is_system_table(name: &str) -> bool {
    name.starts_with("pg_") || name.starts_with("information_schema")
}

/// System exclusion followed by the pattern filter.
#[must_use]
pub fn is_selected(name: &str, pattern: Option<&str>) -> bool {
    !is_system_table(name) && matches(name, pattern)
}

#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER_REGEX.is_match(name)
}

/// Rejects table names that may not be interpolated into SQL.
pub fn validate_table_name(name: &str) -> Result<(), ForgeError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(ForgeError::Validation(format!(
            "invalid table name '{name}': expected [A-Za-z_][A-Za-z0-9_]*"
        )))
    }
}
