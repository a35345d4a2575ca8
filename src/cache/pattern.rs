//! Glob Pattern Matching
//!
//! Key enumeration in both tiers uses Redis-style globs:
//!
//! | Syntax      | Matches                                  |
//! |-------------|------------------------------------------|
//! | `*`         | any run of characters, including empty   |
//! | `?`         | exactly one character                    |
//! | `[abc]`     | one of the listed characters             |
//! | `[a-z]`     | one character in the range               |
//! | `[!abc]`    | one character not listed (`[^abc]` too)  |
//! | `\x`        | the literal character `x`                |
//!
//! Patterns are anchored to the whole key. They are translated once into a
//! [`regex::Regex`].

use regex::Regex;

use crate::error::{Error, Result};

/// Compiled glob pattern
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a glob pattern
    pub fn new(pattern: &str) -> Result<Self> {
        let translated = glob_to_regex(pattern)?;
        let regex = Regex::new(&translated).map_err(|e| invalid(pattern, e.to_string()))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Check whether `key` matches the whole pattern
    #[inline]
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// Original glob text
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn invalid(pattern: &str, reason: impl Into<String>) -> Error {
    Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

/// Translate a glob into an anchored regular expression
pub fn glob_to_regex(pattern: &str) -> Result<String> {
    if pattern.is_empty() {
        return Err(invalid(pattern, "pattern is empty"));
    }

    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push_str("(?s)^");

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => push_literal(&mut out, escaped),
                None => return Err(invalid(pattern, "trailing escape character")),
            },
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    chars.next();
                    out.push('^');
                }

                let mut first = true;
                let mut closed = false;
                while let Some(cc) = chars.next() {
                    match cc {
                        // A leading ']' is a literal member
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some(escaped) => push_class_member(&mut out, escaped),
                            None => return Err(invalid(pattern, "trailing escape character")),
                        },
                        '-' => out.push('-'),
                        other => push_class_member(&mut out, other),
                    }
                    first = false;
                }

                if !closed {
                    return Err(invalid(pattern, "unterminated character class"));
                }
                out.push(']');
            }
            other => push_literal(&mut out, other),
        }
    }

    out.push('$');
    Ok(out)
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn push_class_member(out: &mut String, c: char) {
    if matches!(c, '\\' | ']' | '[' | '^' | '&' | '~' | '-') {
        out.push('\\');
    }
    out.push(c);
}

/// Escape glob metacharacters so `literal` matches only itself
pub fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
