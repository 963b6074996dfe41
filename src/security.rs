//! SQL statement policy and identifier validation.
//!
//! Parameters are bound through each backend's native mechanism, so query
//! text itself never carries caller data. What remains is policing the
//! statement shape: dashboard-style callers issue single read statements,
//! and multi-statement text or DDL is rejected unless the deployment has
//! opted into administrative access via
//! [`StatementPolicy`](crate::config::StatementPolicy).

use crate::config::StatementPolicy;
use crate::error::{Error, Result};

const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Leading keywords that mark a statement as DDL.
const DDL_KEYWORDS: &[&str] = &[
    "CREATE", "ALTER", "DROP", "TRUNCATE", "GRANT", "REVOKE", "RENAME",
];

/// Validate a parameter name as a safe identifier.
///
/// Must start with a letter or underscore and contain only letters, digits
/// and underscores.
pub fn validate_param_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("parameter name cannot be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(Error::validation(format!(
            "parameter name exceeds {MAX_IDENTIFIER_LENGTH} characters"
        )));
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::validation(format!(
                "parameter name '{name}' must start with a letter or underscore"
            )))
        }
    }
    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::validation(format!(
                "parameter name '{name}' contains invalid character '{c}'"
            )));
        }
    }
    Ok(())
}

/// Apply the statement policy to SQL text.
///
/// Policy violations are permanent failures: retrying the same text cannot
/// succeed.
pub fn check_statement(policy: &StatementPolicy, sql: &str) -> Result<()> {
    if sql.trim().is_empty() {
        return Err(Error::validation("query cannot be empty"));
    }
    if !policy.allow_multiple_statements && contains_statement_separator(sql) {
        return Err(Error::permanent(
            "multiple statements per query are not permitted",
        ));
    }
    if !policy.allow_ddl {
        if let Some(keyword) = leading_ddl_keyword(sql) {
            return Err(Error::permanent(format!(
                "DDL statement '{keyword}' is not permitted"
            )));
        }
    }
    Ok(())
}

/// Scanner state shared by the statement checks and the placeholder
/// rewriter in [`crate::sql`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanState {
    /// Plain SQL text.
    Normal,
    /// Inside a single-quoted string literal.
    SingleQuote,
    /// Inside a double-quoted identifier.
    DoubleQuote,
    /// Inside a `--` line comment.
    LineComment,
    /// Inside a `/* */` block comment.
    BlockComment,
}

/// Advance the scanner over one character, returning the next state.
/// `next` is the lookahead character, if any.
pub(crate) fn scan_step(state: ScanState, c: char, next: Option<char>) -> ScanState {
    match state {
        ScanState::Normal => match (c, next) {
            ('\'', _) => ScanState::SingleQuote,
            ('"', _) => ScanState::DoubleQuote,
            ('-', Some('-')) => ScanState::LineComment,
            ('/', Some('*')) => ScanState::BlockComment,
            _ => ScanState::Normal,
        },
        ScanState::SingleQuote => {
            // A doubled quote is an escaped quote; the second one re-enters
            // the literal on the next step, which lands back here.
            if c == '\'' {
                ScanState::Normal
            } else {
                ScanState::SingleQuote
            }
        }
        ScanState::DoubleQuote => {
            if c == '"' {
                ScanState::Normal
            } else {
                ScanState::DoubleQuote
            }
        }
        ScanState::LineComment => {
            if c == '\n' {
                ScanState::Normal
            } else {
                ScanState::LineComment
            }
        }
        ScanState::BlockComment => {
            if c == '*' && next == Some('/') {
                // The closing '/' is consumed as a normal character.
                ScanState::Normal
            } else {
                ScanState::BlockComment
            }
        }
    }
}

/// Whether the text contains a `;` separating two statements, ignoring
/// separators inside literals and comments and a trailing terminator.
fn contains_statement_separator(sql: &str) -> bool {
    let chars: Vec<char> = sql.chars().collect();
    let mut state = ScanState::Normal;
    for (i, &c) in chars.iter().enumerate() {
        let next = chars.get(i + 1).copied();
        if state == ScanState::Normal && c == ';' {
            // A terminator followed only by whitespace is harmless.
            if chars[i + 1..].iter().any(|t| !t.is_whitespace()) {
                return true;
            }
        }
        state = scan_step(state, c, next);
    }
    false
}

/// First keyword of the statement when it is DDL, skipping leading
/// whitespace and comments.
fn leading_ddl_keyword(sql: &str) -> Option<&'static str> {
    let chars: Vec<char> = sql.chars().collect();
    let mut state = ScanState::Normal;
    let mut word = String::new();
    for (i, &c) in chars.iter().enumerate() {
        let next = chars.get(i + 1).copied();
        if state == ScanState::Normal {
            if c.is_ascii_alphabetic() {
                word.push(c.to_ascii_uppercase());
                if chars
                    .get(i + 1)
                    .map_or(true, |t| !t.is_ascii_alphabetic())
                {
                    break;
                }
            } else if !word.is_empty() {
                break;
            }
        }
        state = scan_step(state, c, next);
    }
    DDL_KEYWORDS.iter().copied().find(|k| *k == word)
}
