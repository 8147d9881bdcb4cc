//! SQL identifier checks and quoting.

use regex::Regex;
use std::sync::LazyLock;

/// Identifiers that can be emitted without quoting.
const PLAIN_IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

static PLAIN_IDENTIFIER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(PLAIN_IDENTIFIER_PATTERN).expect("invalid identifier pattern")
});

/// Keywords that must be quoted even though they look like plain identifiers.
const RESERVED_WORDS: &[&str] = &[
    "all", "and", "any", "array", "as", "asc", "between", "by", "case", "cast", "desc",
    "distinct", "else", "end", "exists", "false", "format", "from", "global", "group",
    "having", "in", "inner", "interval", "is", "join", "like", "limit", "not", "null",
    "offset", "on", "or", "order", "prewhere", "select", "settings", "then", "true",
    "union", "using", "when", "where", "with",
];

/// Whether `name` is a plain `[A-Za-z_][A-Za-z0-9_]*` identifier.
pub fn is_plain_identifier(name: &str) -> bool {
    PLAIN_IDENTIFIER_REGEX.is_match(name)
}

fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS
        .iter()
        .any(|word| word.eq_ignore_ascii_case(name))
}

/// Render an identifier for embedding in SQL text.
///
/// Plain, non-reserved identifiers are emitted bare. Everything else is
/// wrapped in backticks with embedded backticks and backslashes escaped.
pub fn quote_identifier(name: &str) -> String {
    if is_plain_identifier(name) && !is_reserved(name) {
        return name.to_string();
    }
    let escaped = name.replace('\\', "\\\\").replace('`', "``");
    format!("`{}`", escaped)
}
