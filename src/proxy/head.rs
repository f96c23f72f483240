//! HTTP/1.1 message heads: reading, parsing, and serialization.

use std::fmt::Write as _;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::ProxyError;
use crate::websocket::handshake::{header_has_token, is_websocket_upgrade};

/// Largest request or response head accepted, in bytes.
pub const MAX_HEAD_LEN: usize = 64 * 1024;
pub const MAX_HEADERS: usize = 100;

/// Connection-scoped headers that are never forwarded (RFC 9110 §7.6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Ordered header list. Names keep their original case; lookups ignore it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any `name` header lists `token` (comma separated, case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).any(|v| header_has_token(v, token))
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replace every `name` header with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.append(name, value);
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drop hop-by-hop headers, including any named by `Connection`.
    pub fn strip_hop_by_hop(&mut self) {
        let named: Vec<String> = self
            .get_all("connection")
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self.0.retain(|(n, _)| {
            let lower = n.to_ascii_lowercase();
            !HOP_BY_HOP.contains(&lower.as_str()) && !named.contains(&lower)
        });
    }

    fn from_httparse(raw: &[httparse::Header<'_>]) -> Self {
        Self(
            raw.iter()
                .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                .collect(),
        )
    }

    fn write_to(&self, out: &mut String) {
        for (name, value) in &self.0 {
            let _ = write!(out, "{}: {}\r\n", name, value);
        }
        out.push_str("\r\n");
    }
}

/// How a message body is delimited (RFC 9112 §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    ContentLength(u64),
    Chunked,
    /// Body runs until the sender closes the connection.
    UntilClose,
}

fn framing(headers: &Headers) -> Result<Option<BodyKind>, ProxyError> {
    if headers.contains("transfer-encoding") {
        // chunked must be the final coding; anything else is unframeable here
        let last = headers
            .get_all("transfer-encoding")
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .last();
        return match last {
            Some(coding) if coding.eq_ignore_ascii_case("chunked") => Ok(Some(BodyKind::Chunked)),
            _ => Ok(None),
        };
    }

    let mut length = None;
    for value in headers.get_all("content-length") {
        for part in value.split(',') {
            let n: u64 = part
                .trim()
                .parse()
                .map_err(|_| ProxyError::MalformedHead(format!("invalid Content-Length {:?}", value)))?;
            if length.is_some_and(|prev| prev != n) {
                return Err(ProxyError::MalformedHead("conflicting Content-Length values".into()));
            }
            length = Some(n);
        }
    }
    Ok(length.map(|n| if n == 0 { BodyKind::Empty } else { BodyKind::ContentLength(n) }))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    /// Minor version: `1` for HTTP/1.1, `0` for HTTP/1.0.
    pub version: u8,
    pub headers: Headers,
}

impl RequestHead {
    pub fn parse(raw: &[u8]) -> Result<Self, ProxyError> {
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut storage);
        match req.parse(raw) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(ProxyError::MalformedHead("incomplete request head".into()))
            }
            Err(e) => return Err(ProxyError::MalformedHead(format!("invalid request: {}", e))),
        }
        Ok(Self {
            method: req.method.unwrap_or_default().to_string(),
            target: req.path.unwrap_or_default().to_string(),
            version: req.version.unwrap_or(1),
            headers: Headers::from_httparse(req.headers),
        })
    }

    /// Request bodies are never close-delimited; without framing there is none.
    pub fn body_kind(&self) -> Result<BodyKind, ProxyError> {
        match framing(&self.headers)? {
            Some(kind) => Ok(kind),
            None if self.headers.contains("transfer-encoding") => Err(ProxyError::MalformedHead(
                "request Transfer-Encoding does not end in chunked".into(),
            )),
            None => Ok(BodyKind::Empty),
        }
    }

    /// Whether the client expects the connection to stay open afterwards.
    pub fn keep_alive(&self) -> bool {
        keep_alive(self.version, &self.headers)
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
            && is_websocket_upgrade(self.headers.get_all("connection"), self.headers.get_all("upgrade"))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} HTTP/1.{}\r\n", self.method, self.target, self.version);
        self.headers.write_to(&mut out);
        out.into_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub version: u8,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            version: 1,
            headers: Headers::new(),
        }
    }

    pub fn parse(raw: &[u8]) -> Result<Self, ProxyError> {
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut res = httparse::Response::new(&mut storage);
        match res.parse(raw) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(ProxyError::MalformedHead("incomplete response head".into()))
            }
            Err(e) => return Err(ProxyError::MalformedHead(format!("invalid response: {}", e))),
        }
        Ok(Self {
            status: res.code.unwrap_or_default(),
            reason: res.reason.unwrap_or_default().to_string(),
            version: res.version.unwrap_or(1),
            headers: Headers::from_httparse(res.headers),
        })
    }

    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }

    /// Body framing given the method of the request being answered.
    pub fn body_kind(&self, request_method: &str) -> Result<BodyKind, ProxyError> {
        if request_method.eq_ignore_ascii_case("HEAD")
            || self.is_informational()
            || self.status == 204
            || self.status == 304
        {
            return Ok(BodyKind::Empty);
        }
        Ok(framing(&self.headers)?.unwrap_or(BodyKind::UntilClose))
    }

    pub fn keep_alive(&self) -> bool {
        keep_alive(self.version, &self.headers)
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.status == 101
            && is_websocket_upgrade(self.headers.get_all("connection"), self.headers.get_all("upgrade"))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.{} {} {}\r\n", self.version, self.status, self.reason);
        self.headers.write_to(&mut out);
        out.into_bytes()
    }
}

fn keep_alive(version: u8, headers: &Headers) -> bool {
    if headers.has_token("connection", "close") {
        return false;
    }
    version >= 1 || headers.has_token("connection", "keep-alive")
}

/// Read one head, up to and including the blank line.
///
/// Returns `None` on a clean EOF before any byte of a new head. Leading empty
/// lines are skipped.
pub async fn read_head<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);
    loop {
        let budget = (MAX_HEAD_LEN + 1 - head.len()) as u64;
        let before = head.len();
        let n = (&mut *reader).take(budget).read_until(b'\n', &mut head).await?;
        if n == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(ProxyError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if head.len() > MAX_HEAD_LEN {
            return Err(ProxyError::HeadTooLarge(MAX_HEAD_LEN));
        }
        let line = &head[before..];
        if line == b"\r\n" || line == b"\n" {
            if before == 0 {
                head.clear();
                continue;
            }
            return Ok(Some(head));
        }
    }
}

pub async fn read_request_head<R>(reader: &mut R) -> Result<Option<RequestHead>, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    match read_head(reader).await? {
        Some(raw) => RequestHead::parse(&raw).map(Some),
        None => Ok(None),
    }
}

pub async fn read_response_head<R>(reader: &mut R) -> Result<ResponseHead, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    match read_head(reader).await? {
        Some(raw) => ResponseHead::parse(&raw),
        None => Err(ProxyError::Io(std::io::ErrorKind::UnexpectedEof.into())),
    }
}
