//! Statement parsing for the flat N-Triples dialect of the authority dumps.
//!
//! A line is `<subject-token> <predicate-iri> <object-token> .` where every
//! token is an IRI in angle brackets, a quoted literal (optionally
//! `@lang`-tagged or `^^<datatype>`-typed), or a bare literal such as a blank
//! node label. Values are resolved as follows:
//!
//! 1. language-tagged literal: the text if the tag is `en`, otherwise no value
//! 2. IRI: the text between the brackets
//! 3. quoted or typed literal: the unescaped text; bare token: as written
//!
//! Anything else is an [`UnresolvableValueError`].

use std::borrow::Cow;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::consts::LANGUAGE;
use crate::errors::{ParseError, UnresolvableValueError};

lazy_static! {
    static ref STATEMENT: Regex =
        Regex::new(r"^(?P<subject>\S+) <(?P<predicate>.+?)> (?P<object>.+?) \.$").unwrap();
    static ref LANG_LITERAL: Regex =
        Regex::new(r#"^"(?P<value>.*)"@(?P<language>[A-Za-z][A-Za-z0-9-]*)$"#).unwrap();
    static ref TYPED_LITERAL: Regex =
        Regex::new(r#"^"(?P<value>.*)"\^\^<(?P<datatype>[^<>]*)>$"#).unwrap();
}

/// One parsed statement. `object` is `None` when the source token was a literal
/// tagged with a language other than English: there is no usable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Option<String>,
}

/// Why a line did not produce a [`Triple`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementError {
    /// The line does not have the statement shape; callers skip and count it.
    Malformed(ParseError),
    /// The line has the shape but a token has no valid encoding.
    Unresolvable(UnresolvableValueError),
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StatementError::Malformed(e) => write!(f, "{}", e),
            StatementError::Unresolvable(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StatementError {}

impl From<ParseError> for StatementError {
    fn from(e: ParseError) -> Self {
        StatementError::Malformed(e)
    }
}

impl From<UnresolvableValueError> for StatementError {
    fn from(e: UnresolvableValueError) -> Self {
        StatementError::Unresolvable(e)
    }
}

impl Triple {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: Option<String>) -> Self {
        Triple {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }

    /// Parse one raw line. Pure; trailing line terminators are ignored.
    pub fn parse(line: &str) -> Result<Triple, StatementError> {
        let trimmed = line.trim();
        let caps = STATEMENT.captures(trimmed).ok_or_else(|| ParseError {
            line: line.to_string(),
        })?;
        let subject = resolve_value(&caps["subject"])?.ok_or_else(|| ParseError {
            line: line.to_string(),
        })?;
        let object = resolve_value(&caps["object"])?;
        Ok(Triple {
            subject,
            predicate: caps["predicate"].to_string(),
            object,
        })
    }
}

/// Resolve a single token to its value.
pub fn resolve_value(token: &str) -> Result<Option<String>, UnresolvableValueError> {
    let unresolvable = || UnresolvableValueError {
        token: token.to_string(),
    };
    if token.starts_with('"') {
        if let Some(caps) = LANG_LITERAL.captures(token) {
            if &caps["language"] == LANGUAGE {
                return Ok(Some(unescape(&caps["value"]).into_owned()));
            }
            return Ok(None);
        }
        if let Some(caps) = TYPED_LITERAL.captures(token) {
            return Ok(Some(unescape(&caps["value"]).into_owned()));
        }
        if token.len() >= 2 && token.ends_with('"') {
            return Ok(Some(unescape(&token[1..token.len() - 1]).into_owned()));
        }
        return Err(unresolvable());
    }
    if token.starts_with('<') {
        if token.len() >= 2 && token.ends_with('>') {
            return Ok(Some(token[1..token.len() - 1].to_string()));
        }
        return Err(unresolvable());
    }
    if token.is_empty() {
        return Err(unresolvable());
    }
    Ok(Some(token.to_string()))
}

/// Decode N-Triples string escapes. Unknown escapes are kept verbatim.
pub fn unescape(s: &str) -> Cow<'_, str> {
    if !s.contains('\\') {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            out.push('\\');
            break;
        };
        match esc {
            't' => out.push('\t'),
            'b' => out.push('\u{8}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            'f' => out.push('\u{c}'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            'u' | 'U' => {
                let width = if esc == 'u' { 4 } else { 8 };
                let hex: String = chars.clone().take(width).collect();
                let decoded = if hex.len() == width {
                    u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
                } else {
                    None
                };
                match decoded {
                    Some(ch) => {
                        out.push(ch);
                        for _ in 0..width {
                            chars.next();
                        }
                    }
                    None => {
                        out.push('\\');
                        out.push(esc);
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Cow::Owned(out)
}

/// Cheap subject extraction for sorting: the raw subject token, i.e. the
/// bytes before the first space. No value resolution is performed.
pub fn subject_key(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\n', '\r']);
    match line.find(' ') {
        Some(0) | None => None,
        Some(idx) => Some(&line[..idx]),
    }
}

/// Cheap predicate extraction: the IRI of the token after the subject key.
pub fn predicate_iri(line: &str) -> Option<&str> {
    let key = subject_key(line)?;
    let rest = line[key.len()..].strip_prefix(" <")?;
    let end = rest.find('>')?;
    Some(&rest[..end])
}

/// Blank lines and `#` comments carry no statement and are not failures.
pub fn is_ignorable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}
