//! SQL identifier quoting and validation.
//!
//! Table, schema and column names are interpolated into SQL text, so mapping
//! construction validates them up front and rendering always quotes them.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result, SchemaErrorKind};

/// Accepted shape of a mapped identifier.
const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_$]*$";

fn identifier_regex() -> Result<&'static Regex> {
    static REGEX: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(IDENTIFIER_PATTERN))
        .as_ref()
        .map_err(|e| Error::Custom(format!("identifier pattern failed to compile: {}", e)))
}

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// ```
/// use relmap_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Check that `name` is a plain identifier (letters, digits, `_`, `$`).
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_ok_and(|re| re.is_match(name))
}

/// Validate an identifier used by `table`'s mapping.
///
/// `what` names the kind of identifier in the error ("column", "schema", ...).
pub fn validate_identifier(table: &str, what: &str, name: &str) -> Result<()> {
    if identifier_regex()?.is_match(name) {
        Ok(())
    } else {
        Err(Error::schema(
            SchemaErrorKind::InvalidIdentifier,
            table,
            format!("invalid {} name '{}'", what, name),
        ))
    }
}
