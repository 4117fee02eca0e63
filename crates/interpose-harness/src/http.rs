//! Minimal HTTP/1.x message heads.
//!
//! Just enough framing for the harness: parse and render request and
//! response heads, and decide how the body that follows a head is delimited.

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpParseError {
    #[error("message head is not valid UTF-8")]
    NotUtf8,
    #[error("malformed start line {0:?}")]
    StartLine(String),
    #[error("malformed header line {0:?}")]
    Header(String),
    #[error("invalid status code {0:?}")]
    Status(String),
    #[error("invalid content-length {0:?}")]
    ContentLength(String),
}

/// Offset just past the blank line that ends a message head, if present.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    for (i, &b) in buf.iter().enumerate() {
        if b != b'\n' {
            continue;
        }
        let line = &buf[line_start..i];
        if line.is_empty() || line == b"\r" {
            return Some(i + 1);
        }
        line_start = i + 1;
    }
    None
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn content_length(&self) -> Result<Option<usize>, HttpParseError> {
        self.get("content-length")
            .map(|v| {
                v.trim()
                    .parse()
                    .map_err(|_| HttpParseError::ContentLength(v.to_string()))
            })
            .transpose()
    }

    pub fn is_chunked(&self) -> bool {
        self.get("transfer-encoding").is_some_and(|v| {
            v.rsplit(',')
                .next()
                .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
        })
    }

    pub fn expects_continue(&self) -> bool {
        self.get("expect")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }

    fn parse<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self, HttpParseError> {
        let mut headers = Self::default();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HttpParseError::Header(line.to_string()))?;
            headers.push(name.trim(), value.trim());
        }
        Ok(headers)
    }

    fn render(&self, out: &mut String) {
        for (name, value) in &self.0 {
            let _ = write!(out, "{name}: {value}\r\n");
        }
    }
}

fn head_lines(buf: &[u8]) -> Result<impl Iterator<Item = &str>, HttpParseError> {
    let text = std::str::from_utf8(buf).map_err(|_| HttpParseError::NotUtf8)?;
    Ok(text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)))
}

/// How the body following a head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Headers,
}

impl RequestHead {
    pub fn new(method: &str, target: impl Into<String>) -> Self {
        Self {
            method: method.to_string(),
            target: target.into(),
            version: "HTTP/1.1".to_string(),
            headers: Headers::default(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn parse(buf: &[u8]) -> Result<Self, HttpParseError> {
        let mut lines = head_lines(buf)?;
        let start = lines.next().unwrap_or_default();
        let mut parts = start.split_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HttpParseError::StartLine(start.to_string()));
        };
        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers: Headers::parse(lines)?,
        })
    }

    /// Path of the request target, with any `scheme://authority` removed.
    pub fn path(&self) -> &str {
        match self.target.split_once("://") {
            Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
            None => &self.target,
        }
    }

    pub fn body_framing(&self) -> Result<BodyFraming, HttpParseError> {
        if self.headers.is_chunked() {
            return Ok(BodyFraming::Chunked);
        }
        Ok(match self.headers.content_length()? {
            Some(0) | None => BodyFraming::Empty,
            Some(n) => BodyFraming::Length(n),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.target, self.version);
        self.headers.render(&mut out);
        out.push_str("\r\n");
        out.into_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn new(version: &str, status: u16) -> Self {
        Self {
            version: version.to_string(),
            status,
            reason: reason_phrase(status).to_string(),
            headers: Headers::default(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn parse(buf: &[u8]) -> Result<Self, HttpParseError> {
        let mut lines = head_lines(buf)?;
        let start = lines.next().unwrap_or_default();
        let mut parts = start.splitn(3, ' ');
        let (Some(version), Some(status)) = (parts.next(), parts.next()) else {
            return Err(HttpParseError::StartLine(start.to_string()));
        };
        if !version.starts_with("HTTP/") {
            return Err(HttpParseError::StartLine(start.to_string()));
        }
        let status = status
            .parse()
            .map_err(|_| HttpParseError::Status(status.to_string()))?;
        Ok(Self {
            version: version.to_string(),
            status,
            reason: parts.next().unwrap_or("").to_string(),
            headers: Headers::parse(lines)?,
        })
    }

    /// 1xx responses other than 101 precede the final response.
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status) && self.status != 101
    }

    pub fn body_framing(&self, request_method: &str) -> Result<BodyFraming, HttpParseError> {
        if request_method.eq_ignore_ascii_case("HEAD")
            || self.is_interim()
            || self.status == 204
            || self.status == 304
        {
            return Ok(BodyFraming::Empty);
        }
        if request_method.eq_ignore_ascii_case("CONNECT") && (200..300).contains(&self.status) {
            return Ok(BodyFraming::Empty);
        }
        if self.headers.is_chunked() {
            return Ok(BodyFraming::Chunked);
        }
        Ok(match self.headers.content_length()? {
            Some(0) => BodyFraming::Empty,
            Some(n) => BodyFraming::Length(n),
            None => BodyFraming::UntilClose,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.version, self.status, self.reason);
        self.headers.render(&mut out);
        out.push_str("\r\n");
        out.into_bytes()
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
