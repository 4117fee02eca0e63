//! The test client: one connection to the subject.
//!
//! Writes requests the way the scenario's send mode dictates and reads
//! responses back, decoding chunked bodies. Every byte in either direction is
//! recorded so a failing scenario can show what was on the wire.

use std::fmt::Write as _;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::chunked::{self, Decoded};
use crate::error::{HarnessError, Result};
use crate::http::{self, BodyFraming, RequestHead, ResponseHead};
use crate::oracle::RequestSpec;
use crate::scenario::SendMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Self::Sent => "client->subject",
            Self::Received => "subject->client",
        }
    }
}

/// Bytes exchanged on the client connection, in order.
#[derive(Debug, Default, Clone)]
pub struct TrafficLog {
    packets: Vec<(Direction, Vec<u8>)>,
}

impl TrafficLog {
    fn record(&mut self, direction: Direction, data: &[u8]) {
        match self.packets.last_mut() {
            Some((last, bytes)) if *last == direction => bytes.extend_from_slice(data),
            _ => self.packets.push((direction, data.to_vec())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn total(&self, direction: Direction) -> usize {
        self.packets
            .iter()
            .filter(|(d, _)| *d == direction)
            .map(|(_, bytes)| bytes.len())
            .sum()
    }

    /// Hex dump of every run of bytes, labelled by direction.
    pub fn hex_dump(&self) -> String {
        let mut out = String::new();
        for (direction, data) in &self.packets {
            let _ = writeln!(out, "[{}] {} bytes:", direction.label(), data.len());
            out.push_str(&hexdump(data));
        }
        out
    }
}

fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", row * 16);
        for column in 0..16 {
            match chunk.get(column) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                }
                None => out.push_str("   "),
            }
            if column == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Interim statuses read ahead of the final head.
    pub interim: Vec<u16>,
    pub head: ResponseHead,
    pub body: Vec<u8>,
}

pub struct ClientConnection {
    stream: TcpStream,
    buf: Vec<u8>,
    send_mode: SendMode,
    /// Method of the request in flight, which decides response framing.
    method: String,
    held_body: Option<Vec<u8>>,
    traffic: TrafficLog,
}

impl ClientConnection {
    pub async fn connect(addr: SocketAddr, send_mode: SendMode) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(%addr, %send_mode, "client connected");
        Ok(Self {
            stream,
            buf: Vec::new(),
            send_mode,
            method: String::from("GET"),
            held_body: None,
            traffic: TrafficLog::default(),
        })
    }

    pub fn traffic(&self) -> &TrafficLog {
        &self.traffic
    }

    pub fn into_traffic(self) -> TrafficLog {
        self.traffic
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.traffic.record(Direction::Sent, data);
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read more bytes; `Ok(0)` on end-of-stream.
    async fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; 8192];
        let n = self.stream.read(&mut chunk).await?;
        self.traffic.record(Direction::Received, &chunk[..n]);
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Write a complete request.
    ///
    /// `Immediate` writes the head and then the body as separate segments as
    /// soon as each is ready; `Collect` assembles the whole request and writes
    /// it at once.
    pub async fn send_request(&mut self, request: &RequestSpec) -> Result<()> {
        let head = request.head();
        let body = request.body();
        self.method = head.method.clone();
        match self.send_mode {
            SendMode::Immediate => {
                self.write(&head.to_bytes()).await?;
                if !body.is_empty() {
                    self.write(&body).await?;
                }
            }
            SendMode::Collect => {
                self.write(&[head.to_bytes(), body].concat()).await?;
            }
        }
        Ok(())
    }

    /// Write only the request head and hold the body for [`Self::send_body`].
    pub async fn send_head(&mut self, request: &RequestSpec) -> Result<()> {
        let head = request.head();
        self.method = head.method.clone();
        self.held_body = Some(request.body());
        self.write(&head.to_bytes()).await
    }

    pub async fn send_body(&mut self) -> Result<()> {
        let body = self.held_body.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no request head is awaiting its body")
        })?;
        self.write(&body).await
    }

    async fn read_head(&mut self) -> Result<ResponseHead> {
        loop {
            if let Some(end) = http::find_head_end(&self.buf) {
                let head = ResponseHead::parse(&self.buf[..end])?;
                self.buf.drain(..end);
                return Ok(head);
            }
            if self.fill().await? == 0 {
                return Err(HarnessError::MalformedResponse(format!(
                    "connection closed after {} bytes, before a complete response head",
                    self.buf.len()
                )));
            }
        }
    }

    /// Read one interim (1xx) response head.
    pub async fn read_interim(&mut self) -> Result<ResponseHead> {
        let head = self.read_head().await?;
        if !head.is_interim() {
            return Err(HarnessError::mismatch(
                "interim",
                "a 1xx response",
                head.status.to_string(),
            ));
        }
        Ok(head)
    }

    /// Read a final response, collecting any interim heads before it.
    pub async fn read_response(&mut self) -> Result<Response> {
        let mut interim = Vec::new();
        let head = loop {
            let head = self.read_head().await?;
            if !head.is_interim() {
                break head;
            }
            interim.push(head.status);
        };

        let framing = head.body_framing(&self.method)?;
        let body = self.read_body(framing).await?;
        Ok(Response {
            interim,
            head,
            body,
        })
    }

    async fn read_body(&mut self, framing: BodyFraming) -> Result<Vec<u8>> {
        match framing {
            BodyFraming::Empty => Ok(Vec::new()),
            BodyFraming::Length(len) => {
                while self.buf.len() < len {
                    if self.fill().await? == 0 {
                        return Err(HarnessError::MalformedResponse(format!(
                            "body ended after {} of {len} bytes",
                            self.buf.len()
                        )));
                    }
                }
                Ok(self.buf.drain(..len).collect())
            }
            BodyFraming::Chunked => loop {
                if let Decoded::Complete { body, consumed } = chunked::decode(&self.buf)? {
                    self.buf.drain(..consumed);
                    return Ok(body);
                }
                if self.fill().await? == 0 {
                    return Err(chunked::ChunkError::Truncated.into());
                }
            },
            BodyFraming::UntilClose => {
                while self.fill().await? > 0 {}
                Ok(std::mem::take(&mut self.buf))
            }
        }
    }

    /// Ask the subject for a tunnel to `host:port` and wait for it to accept.
    pub async fn open_tunnel(&mut self, host: &str, port: u16) -> Result<()> {
        let authority = format!("{host}:{port}");
        let request = RequestHead::new("CONNECT", authority.clone()).header("Host", authority);
        self.method = request.method.clone();
        self.write(&request.to_bytes()).await?;

        let head = self.read_head().await?;
        if !(200..300).contains(&head.status) {
            return Err(HarnessError::mismatch(
                "tunnel status",
                "2xx",
                head.status.to_string(),
            ));
        }
        tracing::debug!(%host, port, "tunnel established");
        Ok(())
    }

    /// Close the connection and hand back the recorded traffic.
    pub async fn close(mut self) -> TrafficLog {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(error = %e, "client shutdown");
        }
        self.traffic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_records_in_one_direction_merge() {
        let mut log = TrafficLog::default();
        log.record(Direction::Sent, b"GET ");
        log.record(Direction::Sent, b"/ HTTP/1.1\r\n\r\n");
        log.record(Direction::Received, b"HTTP/1.0 200 OK\r\n\r\n");
        assert_eq!(log.packets.len(), 2);
        assert_eq!(log.total(Direction::Sent), 18);
        assert_eq!(log.total(Direction::Received), 19);
    }

    #[test]
    fn hex_dump_shows_offsets_and_ascii() {
        let mut log = TrafficLog::default();
        log.record(Direction::Received, b"HTTP/1.1 404 Not Found\r\n");
        let dump = log.hex_dump();
        assert!(dump.starts_with("[subject->client] 24 bytes:\n"));
        assert!(dump.contains("00000000  48 54 54 50"));
        assert!(dump.contains("00000010  "));
        assert!(dump.contains("|HTTP/1.1 404 Not|"));
        assert!(dump.contains("| Found..|"));
    }
}
