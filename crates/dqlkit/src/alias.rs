//! Root-alias prefixing for bare column references.
//!
//! `name = :name AND LOWER(email) LIKE ?` becomes
//! `e.name = :name AND LOWER(e.email) LIKE ?` for root alias `e`.
//! Keywords, function names, known aliases, placeholders, numbers, quoted
//! literals and already qualified paths are left untouched, so the rewrite is
//! idempotent.

use crate::params::skip_quoted;

const KEYWORDS: &[&str] = &[
    "ALL", "AND", "ANY", "AS", "ASC", "BETWEEN", "BY", "CASE", "DESC", "DISTINCT", "ELSE",
    "EMPTY", "END", "ESCAPE", "EXISTS", "FALSE", "FIRST", "FROM", "GROUP", "HAVING", "IN",
    "INDEX", "INNER", "INSTANCE", "IS", "JOIN", "LAST", "LEFT", "LIKE", "MEMBER", "NEW", "NOT",
    "NULL", "NULLS", "OF", "ON", "OR", "ORDER", "PARTIAL", "SELECT", "SOME", "THEN", "TRUE",
    "WHEN", "WHERE", "WITH",
];

fn is_keyword(token: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(token))
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'\\'
}

/// Prefix bare identifiers in `text` with `alias`.
///
/// `known_aliases` lists identifiers that must never be prefixed (join
/// aliases, result variables declared with `AS`).
pub fn prefix_aliases(text: &str, alias: &str, known_aliases: &[&str]) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 8);
    let mut last = 0;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i),
            b':' | b'?' => {
                i += 1;
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
            }
            b'0'..=b'9' => {
                while i < bytes.len() && (is_ident_char(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < bytes.len() && (is_ident_char(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
                let token = &text[start..i];
                if should_prefix(text, start, i, token, alias, known_aliases) {
                    out.push_str(&text[last..start]);
                    out.push_str(alias);
                    out.push('.');
                    out.push_str(token);
                    last = i;
                }
            }
            _ => i += 1,
        }
    }

    out.push_str(&text[last..]);
    out
}

fn should_prefix(
    text: &str,
    start: usize,
    end: usize,
    token: &str,
    alias: &str,
    known_aliases: &[&str],
) -> bool {
    if token.contains('.') || token.contains('\\') {
        return false;
    }
    if token == alias || known_aliases.contains(&token) || is_keyword(token) {
        return false;
    }
    // function call
    if text[end..].trim_start().starts_with('(') {
        return false;
    }
    // `.name` continuation of an expression such as `(a).b`
    if start > 0 && text.as_bytes()[start - 1] == b'.' {
        return false;
    }
    true
}
