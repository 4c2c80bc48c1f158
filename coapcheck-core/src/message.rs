//! Decoded CoAP message model (RFC 7252).
//!
//! Messages are produced by an external dissector and are read-only for the
//! rest of the workspace. The model keeps options typed so the tracker and
//! the templates can query Block1/Block2, Observe and the Uri options without
//! re-parsing option bytes.
use crate::error::{CoapCheckError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Con,
    Non,
    Ack,
    Rst,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Con => "CON",
            MessageType::Non => "NON",
            MessageType::Ack => "ACK",
            MessageType::Rst => "RST",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// 8-bit message code, `class.detail` with a 3-bit class and 5-bit detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code(u8);

impl Code {
    pub const EMPTY: Code = Code::new(0, 0);

    // Methods
    pub const GET: Code = Code::new(0, 1);
    pub const POST: Code = Code::new(0, 2);
    pub const PUT: Code = Code::new(0, 3);
    pub const DELETE: Code = Code::new(0, 4);

    // Success
    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);
    pub const CONTINUE: Code = Code::new(2, 31);

    // Client errors
    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const UNAUTHORIZED: Code = Code::new(4, 1);
    pub const BAD_OPTION: Code = Code::new(4, 2);
    pub const FORBIDDEN: Code = Code::new(4, 3);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);
    pub const NOT_ACCEPTABLE: Code = Code::new(4, 6);
    pub const REQUEST_ENTITY_INCOMPLETE: Code = Code::new(4, 8);
    pub const PRECONDITION_FAILED: Code = Code::new(4, 12);
    pub const REQUEST_ENTITY_TOO_LARGE: Code = Code::new(4, 13);
    pub const UNSUPPORTED_CONTENT_FORMAT: Code = Code::new(4, 15);

    // Server errors
    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
    pub const NOT_IMPLEMENTED: Code = Code::new(5, 1);
    pub const BAD_GATEWAY: Code = Code::new(5, 2);
    pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);
    pub const GATEWAY_TIMEOUT: Code = Code::new(5, 4);
    pub const PROXYING_NOT_SUPPORTED: Code = Code::new(5, 5);

    pub const fn new(class: u8, detail: u8) -> Self {
        Code(((class & 0x07) << 5) | (detail & 0x1f))
    }

    pub const fn from_raw(raw: u8) -> Self {
        Code(raw)
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }

    pub const fn class(&self) -> u8 {
        self.0 >> 5
    }

    pub const fn detail(&self) -> u8 {
        self.0 & 0x1f
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_request(&self) -> bool {
        0 < self.0 && self.0 < 32
    }

    pub const fn is_response(&self) -> bool {
        self.0 >= 32
    }

    /// Human readable name, e.g. `GET` or `2.05 Content`
    pub fn describe(&self) -> String {
        let known = match *self {
            Code::EMPTY => Some("Empty"),
            Code::GET => Some("GET"),
            Code::POST => Some("POST"),
            Code::PUT => Some("PUT"),
            Code::DELETE => Some("DELETE"),
            Code::CREATED => Some("2.01 Created"),
            Code::DELETED => Some("2.02 Deleted"),
            Code::VALID => Some("2.03 Valid"),
            Code::CHANGED => Some("2.04 Changed"),
            Code::CONTENT => Some("2.05 Content"),
            Code::CONTINUE => Some("2.31 Continue"),
            Code::BAD_REQUEST => Some("4.00 Bad Request"),
            Code::UNAUTHORIZED => Some("4.01 Unauthorized"),
            Code::BAD_OPTION => Some("4.02 Bad Option"),
            Code::FORBIDDEN => Some("4.03 Forbidden"),
            Code::NOT_FOUND => Some("4.04 Not Found"),
            Code::METHOD_NOT_ALLOWED => Some("4.05 Method Not Allowed"),
            Code::NOT_ACCEPTABLE => Some("4.06 Not Acceptable"),
            Code::REQUEST_ENTITY_INCOMPLETE => Some("4.08 Request Entity Incomplete"),
            Code::PRECONDITION_FAILED => Some("4.12 Precondition Failed"),
            Code::REQUEST_ENTITY_TOO_LARGE => Some("4.13 Request Entity Too Large"),
            Code::UNSUPPORTED_CONTENT_FORMAT => Some("4.15 Unsupported Media Type"),
            Code::INTERNAL_SERVER_ERROR => Some("5.00 Internal Server Error"),
            Code::NOT_IMPLEMENTED => Some("5.01 Not Implemented"),
            Code::BAD_GATEWAY => Some("5.02 Bad Gateway"),
            Code::SERVICE_UNAVAILABLE => Some("5.03 Service Unavailable"),
            Code::GATEWAY_TIMEOUT => Some("5.04 Gateway Timeout"),
            Code::PROXYING_NOT_SUPPORTED => Some("5.05 Proxying Not Supported"),
            _ => None,
        };
        if let Some(name) = known {
            return name.to_owned();
        }

        if self.is_request() {
            return format!("Request {}", self.0);
        }
        let group = match self.class() {
            2 => "Success",
            4 => "Client Error",
            5 => "Server Error",
            _ => "Reserved",
        };
        format!("{}.{:02} {}", self.class(), self.detail(), group)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Code::EMPTY => f.pad("EMPTY"),
            Code::GET => f.pad("GET"),
            Code::POST => f.pad("POST"),
            Code::PUT => f.pad("PUT"),
            Code::DELETE => f.pad("DELETE"),
            _ => f.pad(&format!("{}.{:02}", self.class(), self.detail())),
        }
    }
}

impl FromStr for Code {
    type Err = CoapCheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EMPTY" => return Ok(Code::EMPTY),
            "GET" => return Ok(Code::GET),
            "POST" => return Ok(Code::POST),
            "PUT" => return Ok(Code::PUT),
            "DELETE" => return Ok(Code::DELETE),
            _ => {}
        }

        let invalid = || CoapCheckError::InvalidCode(s.to_owned());
        let (class, detail) = s.trim().split_once('.').ok_or_else(invalid)?;
        let class: u8 = class.parse().map_err(|_| invalid())?;
        let detail: u8 = detail.parse().map_err(|_| invalid())?;
        if class > 7 || detail > 31 {
            return Err(invalid());
        }
        Ok(Code::new(class, detail))
    }
}

impl TryFrom<String> for Code {
    type Error = CoapCheckError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.to_string()
    }
}

/// Request/response correlation token (0 to 8 bytes)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(Bytes);

impl Token {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Parse a token written as hexadecimal digits, optionally space separated
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() % 2 != 0 {
            return Err(CoapCheckError::InvalidToken(hex.to_owned()));
        }
        let bytes = (0..digits.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|_| CoapCheckError::InvalidToken(hex.to_owned()))?;
        if bytes.len() > 8 {
            return Err(CoapCheckError::InvalidToken(format!(
                "{hex} (token longer than 8 bytes)"
            )));
        }
        Ok(Self(Bytes::from(bytes)))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Token {
    type Error = CoapCheckError;

    fn try_from(value: String) -> Result<Self> {
        Token::from_hex(&value)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.to_string()
    }
}

impl From<&[u8]> for Token {
    fn from(bytes: &[u8]) -> Self {
        Token(Bytes::copy_from_slice(bytes))
    }
}

/// Value of a Block1 or Block2 option
///
/// Deserialization rejects values outside the option's 20-bit NUM and
/// 3-bit SZX fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBlockValue")]
pub struct BlockValue {
    pub num: u32,
    #[serde(default)]
    pub more: bool,
    pub szx: u8,
}

#[derive(Deserialize)]
struct RawBlockValue {
    num: u32,
    #[serde(default)]
    more: bool,
    szx: u8,
}

impl TryFrom<RawBlockValue> for BlockValue {
    type Error = CoapCheckError;

    fn try_from(raw: RawBlockValue) -> Result<Self> {
        BlockValue::checked(raw.num, raw.more, raw.szx)
    }
}

impl BlockValue {
    pub const MAX_NUM: u32 = (1 << 20) - 1;
    pub const MAX_SZX: u8 = 7;

    /// Unchecked constructor; `num` and `szx` must be in range
    pub const fn new(num: u32, more: bool, szx: u8) -> Self {
        Self { num, more, szx }
    }

    pub fn checked(num: u32, more: bool, szx: u8) -> Result<Self> {
        if szx > Self::MAX_SZX {
            return Err(CoapCheckError::InvalidFrame(format!(
                "block szx {szx} exceeds {}",
                Self::MAX_SZX
            )));
        }
        if num > Self::MAX_NUM {
            return Err(CoapCheckError::InvalidFrame(format!(
                "block number {num} exceeds {}",
                Self::MAX_NUM
            )));
        }
        Ok(Self::new(num, more, szx))
    }

    pub fn validate(&self) -> Result<()> {
        Self::checked(self.num, self.more, self.szx).map(|_| ())
    }

    /// Block size in bytes (`2^(szx+4)`)
    pub const fn size(&self) -> usize {
        1 << (self.szx as usize + 4)
    }

    pub const fn offset(&self) -> usize {
        self.num as usize * self.size()
    }
}

impl fmt::Display for BlockValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.num,
            if self.more { 1 } else { 0 },
            self.size()
        )
    }
}

/// Registered option number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OptionNumber(pub u16);

impl OptionNumber {
    pub const IF_MATCH: OptionNumber = OptionNumber(1);
    pub const URI_HOST: OptionNumber = OptionNumber(3);
    pub const ETAG: OptionNumber = OptionNumber(4);
    pub const IF_NONE_MATCH: OptionNumber = OptionNumber(5);
    pub const OBSERVE: OptionNumber = OptionNumber(6);
    pub const URI_PORT: OptionNumber = OptionNumber(7);
    pub const LOCATION_PATH: OptionNumber = OptionNumber(8);
    pub const URI_PATH: OptionNumber = OptionNumber(11);
    pub const CONTENT_FORMAT: OptionNumber = OptionNumber(12);
    pub const MAX_AGE: OptionNumber = OptionNumber(14);
    pub const URI_QUERY: OptionNumber = OptionNumber(15);
    pub const ACCEPT: OptionNumber = OptionNumber(17);
    pub const LOCATION_QUERY: OptionNumber = OptionNumber(20);
    pub const BLOCK2: OptionNumber = OptionNumber(23);
    pub const BLOCK1: OptionNumber = OptionNumber(27);
    pub const SIZE2: OptionNumber = OptionNumber(28);
    pub const PROXY_URI: OptionNumber = OptionNumber(35);
    pub const PROXY_SCHEME: OptionNumber = OptionNumber(39);
    pub const SIZE1: OptionNumber = OptionNumber(60);

    pub fn name(&self) -> Option<&'static str> {
        Some(match *self {
            OptionNumber::IF_MATCH => "If-Match",
            OptionNumber::URI_HOST => "Uri-Host",
            OptionNumber::ETAG => "ETag",
            OptionNumber::IF_NONE_MATCH => "If-None-Match",
            OptionNumber::OBSERVE => "Observe",
            OptionNumber::URI_PORT => "Uri-Port",
            OptionNumber::LOCATION_PATH => "Location-Path",
            OptionNumber::URI_PATH => "Uri-Path",
            OptionNumber::CONTENT_FORMAT => "Content-Format",
            OptionNumber::MAX_AGE => "Max-Age",
            OptionNumber::URI_QUERY => "Uri-Query",
            OptionNumber::ACCEPT => "Accept",
            OptionNumber::LOCATION_QUERY => "Location-Query",
            OptionNumber::BLOCK2 => "Block2",
            OptionNumber::BLOCK1 => "Block1",
            OptionNumber::SIZE2 => "Size2",
            OptionNumber::PROXY_URI => "Proxy-Uri",
            OptionNumber::PROXY_SCHEME => "Proxy-Scheme",
            OptionNumber::SIZE1 => "Size1",
            _ => return None,
        })
    }
}

impl fmt::Display for OptionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Option{}", self.0),
        }
    }
}

/// A decoded option, typed by its registered number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "value", rename_all = "kebab-case")]
pub enum CoapOption {
    IfMatch(Bytes),
    UriHost(String),
    #[serde(rename = "etag")]
    ETag(Bytes),
    IfNoneMatch,
    Observe(u32),
    UriPort(u16),
    LocationPath(String),
    UriPath(String),
    ContentFormat(u16),
    MaxAge(u32),
    UriQuery(String),
    Accept(u16),
    LocationQuery(String),
    Block2(BlockValue),
    Block1(BlockValue),
    Size2(u32),
    ProxyUri(String),
    ProxyScheme(String),
    Size1(u32),
    Other { number: u16, value: Bytes },
}

impl CoapOption {
    pub fn number(&self) -> OptionNumber {
        match self {
            CoapOption::IfMatch(_) => OptionNumber::IF_MATCH,
            CoapOption::UriHost(_) => OptionNumber::URI_HOST,
            CoapOption::ETag(_) => OptionNumber::ETAG,
            CoapOption::IfNoneMatch => OptionNumber::IF_NONE_MATCH,
            CoapOption::Observe(_) => OptionNumber::OBSERVE,
            CoapOption::UriPort(_) => OptionNumber::URI_PORT,
            CoapOption::LocationPath(_) => OptionNumber::LOCATION_PATH,
            CoapOption::UriPath(_) => OptionNumber::URI_PATH,
            CoapOption::ContentFormat(_) => OptionNumber::CONTENT_FORMAT,
            CoapOption::MaxAge(_) => OptionNumber::MAX_AGE,
            CoapOption::UriQuery(_) => OptionNumber::URI_QUERY,
            CoapOption::Accept(_) => OptionNumber::ACCEPT,
            CoapOption::LocationQuery(_) => OptionNumber::LOCATION_QUERY,
            CoapOption::Block2(_) => OptionNumber::BLOCK2,
            CoapOption::Block1(_) => OptionNumber::BLOCK1,
            CoapOption::Size2(_) => OptionNumber::SIZE2,
            CoapOption::ProxyUri(_) => OptionNumber::PROXY_URI,
            CoapOption::ProxyScheme(_) => OptionNumber::PROXY_SCHEME,
            CoapOption::Size1(_) => OptionNumber::SIZE1,
            CoapOption::Other { number, .. } => OptionNumber(*number),
        }
    }
}

impl fmt::Display for CoapOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.number();
        match self {
            CoapOption::IfNoneMatch => write!(f, "{name}"),
            CoapOption::UriHost(v)
            | CoapOption::LocationPath(v)
            | CoapOption::UriPath(v)
            | CoapOption::UriQuery(v)
            | CoapOption::LocationQuery(v)
            | CoapOption::ProxyUri(v)
            | CoapOption::ProxyScheme(v) => write!(f, "{name}={v:?}"),
            CoapOption::Observe(v)
            | CoapOption::MaxAge(v)
            | CoapOption::Size1(v)
            | CoapOption::Size2(v) => write!(f, "{name}={v}"),
            CoapOption::UriPort(v) | CoapOption::ContentFormat(v) | CoapOption::Accept(v) => {
                write!(f, "{name}={v}")
            }
            CoapOption::Block1(b) | CoapOption::Block2(b) => write!(f, "{name}={b}"),
            CoapOption::IfMatch(v) | CoapOption::ETag(v) | CoapOption::Other { value: v, .. } => {
                write!(f, "{name}=")?;
                for byte in v.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// A decoded CoAP message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoapMessage {
    #[serde(rename = "type")]
    pub mtype: MessageType,
    pub code: Code,
    #[serde(rename = "mid")]
    pub message_id: u16,
    #[serde(default)]
    pub token: Token,
    #[serde(default)]
    pub options: Vec<CoapOption>,
    #[serde(default, with = "payload_repr")]
    pub payload: Bytes,
}

impl CoapMessage {
    pub fn new(mtype: MessageType, code: Code, message_id: u16) -> Self {
        Self {
            mtype,
            code,
            message_id,
            token: Token::empty(),
            options: Vec::new(),
            payload: Bytes::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<Bytes>) -> Self {
        self.token = Token::new(token);
        self
    }

    pub fn with_option(mut self, option: CoapOption) -> Self {
        self.options.push(option);
        self
    }

    /// Append Uri-Path and Uri-Query options for `path` (e.g. `/a/b?x=1&y`)
    pub fn with_uri(mut self, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (uri, None),
        };
        self.options.extend(
            path.split('/')
                .filter(|seg| !seg.is_empty())
                .map(|seg| CoapOption::UriPath(seg.to_owned())),
        );
        if let Some(query) = query {
            self.options.extend(
                query
                    .split('&')
                    .filter(|q| !q.is_empty())
                    .map(|q| CoapOption::UriQuery(q.to_owned())),
            );
        }
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn is_request(&self) -> bool {
        self.code.is_request()
    }

    pub fn is_response(&self) -> bool {
        self.code.is_response()
    }

    /// CoAP ping: an empty Confirmable message
    pub fn is_ping(&self) -> bool {
        self.code.is_empty() && self.mtype == MessageType::Con
    }

    pub fn is_empty_ack(&self) -> bool {
        self.code.is_empty() && self.mtype == MessageType::Ack
    }

    /// First occurrence of an option
    pub fn option(&self, number: OptionNumber) -> Option<&CoapOption> {
        self.options.iter().find(|o| o.number() == number)
    }

    pub fn options_of(&self, number: OptionNumber) -> impl Iterator<Item = &CoapOption> {
        self.options.iter().filter(move |o| o.number() == number)
    }

    pub fn has_option(&self, number: OptionNumber) -> bool {
        self.option(number).is_some()
    }

    pub fn block1(&self) -> Option<BlockValue> {
        self.options.iter().find_map(|o| match o {
            CoapOption::Block1(b) => Some(*b),
            _ => None,
        })
    }

    pub fn block2(&self) -> Option<BlockValue> {
        self.options.iter().find_map(|o| match o {
            CoapOption::Block2(b) => Some(*b),
            _ => None,
        })
    }

    pub fn observe(&self) -> Option<u32> {
        self.options.iter().find_map(|o| match o {
            CoapOption::Observe(v) => Some(*v),
            _ => None,
        })
    }

    pub fn content_format(&self) -> Option<u16> {
        self.options.iter().find_map(|o| match o {
            CoapOption::ContentFormat(v) => Some(*v),
            _ => None,
        })
    }

    pub fn max_age(&self) -> Option<u32> {
        self.options.iter().find_map(|o| match o {
            CoapOption::MaxAge(v) => Some(*v),
            _ => None,
        })
    }

    pub fn uri_path(&self) -> impl Iterator<Item = &str> {
        self.options.iter().filter_map(|o| match o {
            CoapOption::UriPath(v) => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn uri_query(&self) -> impl Iterator<Item = &str> {
        self.options.iter().filter_map(|o| match o {
            CoapOption::UriQuery(v) => Some(v.as_str()),
            _ => None,
        })
    }

    /// Request URI built from Uri-Host, Uri-Port, Uri-Path and Uri-Query
    ///
    /// The path defaults to `/` when no Uri-Path option is present.
    pub fn uri(&self) -> String {
        let mut host = String::new();
        let mut port = String::new();
        let mut path = String::new();
        let mut query = String::new();

        for option in &self.options {
            match option {
                CoapOption::UriHost(h) => host = h.clone(),
                CoapOption::UriPort(p) => port = p.to_string(),
                CoapOption::UriPath(seg) => {
                    path.push('/');
                    path.push_str(&quote_plus(seg, ""));
                }
                CoapOption::UriQuery(q) => {
                    query.push(if query.is_empty() { '?' } else { '&' });
                    query.push_str(&quote_plus(q, "="));
                }
                _ => {}
            }
        }
        if path.is_empty() {
            path.push('/');
        }

        let sep = if host.is_empty() && port.is_empty() { "" } else { ":" };
        format!("{host}{sep}{port}{path}{query}")
    }

    /// URI built from Location-Path and Location-Query
    pub fn location_uri(&self) -> String {
        let mut uri = String::new();
        let mut query = String::new();
        for option in &self.options {
            match option {
                CoapOption::LocationPath(seg) => {
                    uri.push('/');
                    uri.push_str(&quote_plus(seg, ""));
                }
                CoapOption::LocationQuery(q) => {
                    query.push(if query.is_empty() { '?' } else { '&' });
                    query.push_str(&quote_plus(q, "="));
                }
                _ => {}
            }
        }
        uri.push_str(&query);
        uri
    }

    /// One-line description used in traces: `CoAP [CON mid 1] GET /test, tok 41`
    pub fn summary(&self) -> String {
        let mut kind = self.mtype.as_str().to_owned();
        if self.message_id != 0 {
            kind.push_str(&format!(" mid {}", self.message_id));
        }

        let target = if self.code.is_empty() {
            String::new()
        } else if self.is_response() {
            self.location_uri()
        } else {
            self.uri()
        };

        let mut out = format!("CoAP [{kind}] {} {target}", self.code.describe());
        if !self.code.is_empty() {
            out.push_str(", tok ");
            if self.token.is_empty() {
                out.push_str("None");
            } else {
                let hex: Vec<String> = self
                    .token
                    .as_bytes()
                    .iter()
                    .map(|b| format!("{b:02x}"))
                    .collect();
                out.push_str(&hex.join(" "));
            }
        }
        out
    }
}

/// Form-style percent encoding: unreserved characters and `safe` are kept,
/// spaces become `+`, everything else is `%XX`-escaped per UTF-8 byte.
fn quote_plus(s: &str, safe: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() || "_.-~".contains(ch) || safe.contains(ch) {
            out.push(ch);
        } else if ch == ' ' {
            out.push('+');
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    out
}

/// Payloads are written as text when they are valid UTF-8, as a byte array otherwise
mod payload_repr {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Raw(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(payload) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => serializer.collect_seq(payload.iter()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => Bytes::from(text),
            Repr::Raw(raw) => Bytes::from(raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_classes() {
        assert!(Code::GET.is_request());
        assert!(!Code::GET.is_response());
        assert!(Code::CONTENT.is_response());
        assert!(Code::EMPTY.is_empty());
        assert_eq!(Code::CONTENT.raw(), 69);
        assert_eq!(Code::CONTENT.class(), 2);
        assert_eq!(Code::CONTENT.detail(), 5);
    }

    #[test]
    fn test_code_parse_and_display() {
        assert_eq!("get".parse::<Code>().unwrap(), Code::GET);
        assert_eq!("2.05".parse::<Code>().unwrap(), Code::CONTENT);
        assert_eq!("4.04".parse::<Code>().unwrap(), Code::NOT_FOUND);
        assert!("8.00".parse::<Code>().is_err());
        assert!("2.32".parse::<Code>().is_err());
        assert!("bogus".parse::<Code>().is_err());
        assert_eq!(Code::CONTENT.to_string(), "2.05");
        assert_eq!(Code::DELETE.to_string(), "DELETE");
        assert_eq!(Code::CONTENT.describe(), "2.05 Content");
        assert_eq!(Code::new(2, 6).describe(), "2.06 Success");
        assert_eq!(Code::from_raw(7).describe(), "Request 7");
    }

    #[test]
    fn test_token_hex() {
        let token = Token::from_hex("de ad be ef").unwrap();
        assert_eq!(token.as_bytes(), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(token.to_string(), "deadbeef");
        assert!(Token::from_hex("abc").is_err());
        assert!(Token::from_hex("000102030405060708").is_err());
        assert!(Token::from_hex("").unwrap().is_empty());
    }

    #[test]
    fn test_block_size() {
        let block = BlockValue::new(3, true, 2);
        assert_eq!(block.size(), 64);
        assert_eq!(block.offset(), 192);
        assert_eq!(block.to_string(), "3/1/64");
    }

    #[test]
    fn test_block_fields_checked_on_load() {
        let block: BlockValue = toml::from_str("num = 1048575\nmore = true\nszx = 7").unwrap();
        assert_eq!(block, BlockValue::new(BlockValue::MAX_NUM, true, 7));
        assert_eq!(block.size(), 2048);

        let err = toml::from_str::<BlockValue>("num = 0\nszx = 70").unwrap_err();
        assert!(err.to_string().contains("block szx 70 exceeds 7"), "{err}");
        let err = toml::from_str::<BlockValue>("num = 1048576\nszx = 0").unwrap_err();
        assert!(err.to_string().contains("block number 1048576 exceeds"), "{err}");
    }

    #[test]
    fn test_uri_defaults_to_root() {
        let msg = CoapMessage::new(MessageType::Con, Code::GET, 1);
        assert_eq!(msg.uri(), "/");
    }

    #[test]
    fn test_uri_path_and_query() {
        let msg = CoapMessage::new(MessageType::Con, Code::GET, 1).with_uri("/seg1/seg 2?first=1&second=a b");
        assert_eq!(msg.uri(), "/seg1/seg+2?first=1&second=a+b");
        assert_eq!(msg.uri_path().collect::<Vec<_>>(), vec!["seg1", "seg 2"]);
    }

    #[test]
    fn test_uri_with_host_and_port() {
        let msg = CoapMessage::new(MessageType::Con, Code::GET, 1)
            .with_option(CoapOption::UriHost("example.org".into()))
            .with_option(CoapOption::UriPort(5683))
            .with_uri("/a");
        assert_eq!(msg.uri(), "example.org:5683/a");
    }

    #[test]
    fn test_uri_escapes_slash_in_segment() {
        let msg = CoapMessage::new(MessageType::Con, Code::GET, 1)
            .with_option(CoapOption::UriPath("a/b".into()));
        assert_eq!(msg.uri(), "/a%2Fb");
    }

    #[test]
    fn test_summary() {
        let msg = CoapMessage::new(MessageType::Con, Code::GET, 1)
            .with_token(&b"\x41\x42"[..])
            .with_uri("/test");
        assert_eq!(msg.summary(), "CoAP [CON mid 1] GET /test, tok 41 42");

        let ack = CoapMessage::new(MessageType::Ack, Code::EMPTY, 7);
        assert_eq!(ack.summary(), "CoAP [ACK mid 7] Empty ");
    }

    #[test]
    fn test_ping_and_empty_ack() {
        assert!(CoapMessage::new(MessageType::Con, Code::EMPTY, 1).is_ping());
        assert!(!CoapMessage::new(MessageType::Non, Code::EMPTY, 1).is_ping());
        assert!(CoapMessage::new(MessageType::Ack, Code::EMPTY, 1).is_empty_ack());
    }

    #[test]
    fn test_option_accessors() {
        let msg = CoapMessage::new(MessageType::Ack, Code::CONTENT, 1)
            .with_option(CoapOption::Observe(3))
            .with_option(CoapOption::ContentFormat(40))
            .with_option(CoapOption::Block2(BlockValue::new(0, true, 6)));
        assert_eq!(msg.observe(), Some(3));
        assert_eq!(msg.content_format(), Some(40));
        assert_eq!(msg.block2(), Some(BlockValue::new(0, true, 6)));
        assert_eq!(msg.block1(), None);
        assert!(msg.has_option(OptionNumber::OBSERVE));
        assert_eq!(msg.max_age(), None);
    }
}
