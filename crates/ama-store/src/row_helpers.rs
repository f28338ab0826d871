use std::str::FromStr;

use crate::error::StoreError;

/// Parse an id column, returning CorruptRow on failure.
pub fn parse_id<T: FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}
