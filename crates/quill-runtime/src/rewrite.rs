//! Source rewriting for inline guest functions.
//!
//! Handlers passed inline (`config.OnPreCreate((s, v) => ...)`) have no
//! name the resolver could look up later. The rewriter turns the source
//! text of such a function into a top-level declaration of a chosen name:
//!
//! ```text
//! async function (a, b) { ... }   ->  async function name(a, b) { ... }
//! async (a, b) => ...             ->  const name = async (a, b) => ...
//! ```
//!
//! Only the first line is matched; the rest of the source is passed through.
//! Parentheses in default values are balanced, so `(a = f()) => a` is
//! still recognized as an arrow.

use regex::Regex;
use std::sync::OnceLock;

fn function_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([ \t]*)(async[ \t]+)?function[ \t]*(\*?)[ \t]*(?:[A-Za-z_$][A-Za-z0-9_$]*)?[ \t]*\(").ok())
        .as_ref()
}

/// Rewrite the leading function of `source` into a declaration of `name`.
///
/// Text that already declares `name` (or matches neither form) is
/// returned unchanged.
pub fn rewrite(source: &str, name: &str) -> String {
    rename_function(source, name)
        .or_else(|| name_arrow(source, name))
        .unwrap_or_else(|| source.to_string())
}

fn rename_function(source: &str, name: &str) -> Option<String> {
    let caps = function_regex()?.captures(source)?;
    let indent = caps.get(1).map_or("", |m| m.as_str());
    let qualifier = caps.get(2).map_or("", |m| m.as_str());
    let star = caps.get(3).map_or("", |m| m.as_str());
    let end = caps.get(0).map_or(0, |m| m.end());
    Some(format!("{indent}{qualifier}function{star} {name}({}", &source[end..]))
}

fn name_arrow(source: &str, name: &str) -> Option<String> {
    let trimmed = source.trim_start_matches(INLINE_SPACE);
    let indent = &source[..source.len() - trimmed.len()];
    let (qualifier, rest) = split_async(trimmed);

    // The parameter list and arrow must sit on the first line.
    let line = &rest[..rest.find('\n').unwrap_or(rest.len())];
    let params_len = if line.starts_with('(') {
        closing_paren(line)?
    } else {
        identifier_len(line)?
    };
    let (params, after) = rest.split_at(params_len);
    let body = after.trim_start_matches(INLINE_SPACE).strip_prefix("=>")?;
    Some(format!("{indent}const {name} = {qualifier}{params} =>{body}"))
}

const INLINE_SPACE: [char; 2] = [' ', '\t'];

/// Split a leading `async` keyword, keeping the whitespace that follows it.
///
/// `async => ...` is an arrow whose parameter is named `async`.
fn split_async(source: &str) -> (&str, &str) {
    let Some(rest) = source.strip_prefix("async") else {
        return ("", source);
    };
    let after = rest.trim_start_matches(INLINE_SPACE);
    let separated = rest.starts_with(INLINE_SPACE) || rest.starts_with('(');
    if separated && !after.starts_with("=>") {
        source.split_at(source.len() - after.len())
    } else {
        ("", source)
    }
}

fn identifier_len(source: &str) -> Option<usize> {
    let mut chars = source.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return None,
    }
    let end = chars
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '$'))
        .map_or(source.len(), |(i, _)| i);
    Some(end)
}

/// Byte length of the parenthesized list at the start of `source`.
///
/// String literals and comments are skipped, so parentheses inside default
/// values such as `(a = f(")"))` do not end the list early.
fn closing_paren(source: &str) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}
