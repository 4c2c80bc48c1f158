//! CoRE Link-Format (RFC 6690) payload parser
//!
//! ```text
//! payload    := link-value (',' link-value)* | ""
//! link-value := '<' uri '>' link-param*
//! link-param := ';' name ['=' (quoted-string | ptoken)]
//! ```
//!
//! Any violation fails the whole payload; there is no partial recovery.
use std::fmt;
use thiserror::Error;
use winnow::combinator::{delimited, opt, preceded};
use winnow::prelude::*;
use winnow::token::{take_till, take_while};
use winnow::ModalResult;

/// Excerpt length reported with a parse error
const EXCERPT_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at {excerpt:?}...")]
pub struct FormatError {
    pub message: String,
    /// Up to 40 characters of the input remaining where parsing stopped
    pub excerpt: String,
}

impl FormatError {
    fn at(message: impl Into<String>, remaining: &str) -> Self {
        Self {
            message: message.into(),
            excerpt: remaining.chars().take(EXCERPT_LEN).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("link-value contains multiple {0:?} parameters")]
pub struct AmbiguousParameter(pub String);

/// One `<uri>;param;...` entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkValue {
    pub uri: String,
    /// Parameters in payload order; names may repeat
    pub params: Vec<(String, Option<String>)>,
}

impl LinkValue {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            params: Vec::new(),
        }
    }

    /// Value of a single-valued parameter
    ///
    /// Returns `Ok(None)` when the parameter is absent or carries no value.
    pub fn get(&self, name: &str) -> Result<Option<&str>, AmbiguousParameter> {
        let mut found = self.params.iter().filter(|(n, _)| n == name);
        let first = found.next();
        if found.next().is_some() {
            return Err(AmbiguousParameter(name.to_owned()));
        }
        Ok(first.and_then(|(_, v)| v.as_deref()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.params.iter().any(|(n, _)| n == name)
    }

    /// All values of a (possibly repeated) parameter
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.params
            .iter()
            .filter(move |(n, _)| n == name)
            .filter_map(|(_, v)| v.as_deref())
    }
}

/// Renders the link-value in a form [`LinkFormat::parse_str`] reads back
/// unchanged: the URI is percent-encoded and every value is quoted.
/// Empty values have no link-format representation.
impl fmt::Display for LinkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<")?;
        write_uri(f, &self.uri)?;
        f.write_str(">")?;
        for (name, value) in &self.params {
            write!(f, ";{name}")?;
            if let Some(v) = value {
                f.write_str("=\"")?;
                for c in v.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\"")?;
            }
        }
        Ok(())
    }
}

/// Percent-encode what would end the URI reference or not decode back
fn write_uri(f: &mut fmt::Formatter<'_>, uri: &str) -> fmt::Result {
    for c in uri.chars() {
        if c == '%' || c == '>' || !c.is_ascii() || c.is_ascii_control() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                write!(f, "%{byte:02X}")?;
            }
        } else {
            write!(f, "{c}")?;
        }
    }
    Ok(())
}

/// A parsed link-format payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkFormat {
    values: Vec<LinkValue>,
}

impl LinkFormat {
    /// Parse a raw payload, which must be UTF-8
    pub fn parse(payload: &[u8]) -> Result<Self, FormatError> {
        let text = std::str::from_utf8(payload).map_err(|e| FormatError {
            message: e.to_string(),
            excerpt: String::from_utf8_lossy(&payload[..payload.len().min(EXCERPT_LEN)])
                .into_owned(),
        })?;
        Self::parse_str(text)
    }

    pub fn parse_str(text: &str) -> Result<Self, FormatError> {
        let mut input = text;
        let mut values = Vec::new();

        if !input.is_empty() {
            loop {
                values.push(link_value(&mut input)?);
                if input.is_empty() {
                    break;
                }
                match input.strip_prefix(',') {
                    Some(rest) => input = rest,
                    None => return Err(fail("malformed delimiter, expected ','", input)),
                }
            }
        }

        tracing::trace!("parsed {} link-values", values.len());
        Ok(Self { values })
    }

    pub fn values(&self) -> &[LinkValue] {
        &self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LinkValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<'a> IntoIterator for &'a LinkFormat {
    type Item = &'a LinkValue;
    type IntoIter = std::slice::Iter<'a, LinkValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

fn fail(message: &str, remaining: &str) -> FormatError {
    tracing::debug!("link-format error: {} at {:?}", message, remaining);
    FormatError::at(message, remaining)
}

fn link_value(input: &mut &str) -> Result<LinkValue, FormatError> {
    let start = *input;
    let raw_uri = uri_reference.parse_next(input).map_err(|_| {
        *input = start;
        fail("malformed uri", input)
    })?;
    let mut link = LinkValue::new(percent_decode(raw_uri)?);

    while input.starts_with(';') {
        let start = *input;
        let (name, has_value) = param_name.parse_next(input).map_err(|_| {
            *input = start;
            fail("malformed parmname", input)
        })?;

        let value = if !has_value {
            None
        } else if input.starts_with('"') {
            Some(quoted_string(input, name)?)
        } else {
            let start = *input;
            let token = ptoken.parse_next(input).map_err(|_| {
                *input = start;
                fail("malformed ptoken", input)
            })?;
            Some(percent_decode(token)?)
        };
        link.params.push((name.to_owned(), value));
    }

    Ok(link)
}

fn uri_reference<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    delimited('<', take_till(0.., '>'), '>').parse_next(input)
}

fn param_name<'i>(input: &mut &'i str) -> ModalResult<(&'i str, bool)> {
    preceded(
        ';',
        (
            take_while(1.., is_name_char),
            opt('=').map(|eq: Option<char>| eq.is_some()),
        ),
    )
    .parse_next(input)
}

fn ptoken<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., is_ptoken_char).parse_next(input)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&+^_`{}~-".contains(c)
}

fn is_ptoken_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "]!#$%&'()*+./:<=>?@[^_`{|}~-".contains(c)
}

/// Read a quoted-string value; `\"` and `\\` are unescaped, any other escape
/// is kept as written (backslash included).
fn quoted_string(input: &mut &str, name: &str) -> Result<String, FormatError> {
    let mut value = String::new();
    let mut escaped = false;
    let mut end = None;

    for (i, c) in input.char_indices().skip(1) {
        if escaped {
            escaped = false;
            if c != '"' && c != '\\' {
                value.push('\\');
            }
            value.push(c);
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            end = Some(i);
            break;
        } else {
            value.push(c);
        }
    }

    let Some(end) = end else {
        return Err(fail(
            &format!("attribute value for {name:?} is an unterminated quoted-string"),
            input,
        ));
    };
    if value.is_empty() {
        return Err(fail(&format!("attribute value for {name:?} is empty"), input));
    }

    *input = &input[end + 1..];
    Ok(value)
}

/// Strict percent-decoding: every `%` must introduce two hex digits and the
/// decoded bytes must be valid UTF-8.
fn percent_decode(s: &str) -> Result<String, FormatError> {
    if !s.contains('%') {
        return Ok(s.to_owned());
    }

    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            match hex {
                Some(byte) => out.push(byte),
                None => return Err(fail("malformed percent-encoding", &s[i..])),
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|e| FormatError {
        message: format!("{e} in percent-encoded string"),
        excerpt: s.chars().take(EXCERPT_LEN).collect(),
    })
}
