//! Named-placeholder rewriting shared by the relational connectors.
//!
//! Callers write `:name` placeholders; each driver wants its own binding
//! form (`$n` for PostgreSQL, `?` for MySQL). The rewriter walks the text
//! with the same literal/comment-aware scanner the statement policy uses,
//! so colons inside strings, `::` casts and comments are left alone.

use crate::error::{Error, Result};
use crate::security::{scan_step, ScanState};
use crate::types::Params;

/// Driver binding form to rewrite into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ... with repeated names sharing one number.
    Numbered,
    /// `?` per occurrence, with repeated names repeated in the order list.
    Positional,
}

/// A query rewritten into a driver's native binding form.
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenQuery {
    /// Query text with native placeholders.
    pub sql: String,
    /// Parameter names in binding order. For [`PlaceholderStyle::Numbered`]
    /// each name appears once; for [`PlaceholderStyle::Positional`] a name
    /// appears once per occurrence.
    pub order: Vec<String>,
}

/// Rewrite `:name` placeholders into the given style.
///
/// Every placeholder must name a supplied parameter; unused parameters are
/// permitted. Colons inside string literals, quoted identifiers, comments
/// and `::` casts are not placeholders.
pub fn rewrite_placeholders(
    sql: &str,
    params: &Params,
    style: PlaceholderStyle,
) -> Result<RewrittenQuery> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut order: Vec<String> = Vec::new();
    let mut state = ScanState::Normal;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if state == ScanState::Normal && c == ':' {
            let prev_colon = i > 0 && chars[i - 1] == ':';
            let starts_name = next.map_or(false, |n| n.is_ascii_alphabetic() || n == '_');
            if next == Some(':') {
                // Cast operator; emit both colons and skip the second so it
                // is not mistaken for a placeholder start.
                out.push_str("::");
                i += 2;
                continue;
            }
            if !prev_colon && starts_name {
                let start = i + 1;
                let mut end = start;
                while end < chars.len()
                    && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                if params.get(&name).is_none() {
                    return Err(Error::validation(format!(
                        "query references unknown parameter ':{name}'"
                    )));
                }
                match style {
                    PlaceholderStyle::Numbered => {
                        let position = match order.iter().position(|n| *n == name) {
                            Some(p) => p,
                            None => {
                                order.push(name);
                                order.len() - 1
                            }
                        };
                        out.push('$');
                        out.push_str(&(position + 1).to_string());
                    }
                    PlaceholderStyle::Positional => {
                        order.push(name);
                        out.push('?');
                    }
                }
                i = end;
                continue;
            }
        }

        out.push(c);
        state = scan_step(state, c, next);
        i += 1;
    }

    Ok(RewrittenQuery { sql: out, order })
}
