//! Reference origin the subject forwards to.
//!
//! Serves canned responses keyed by method and the first path segment, and
//! counts every request that reaches its handler logic. One tokio task per
//! accepted connection; the counter is shared with every task.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::chunked::{self, Decoded};
use crate::counter::RequestCounter;
use crate::http::{self, BodyFraming, RequestHead, ResponseHead};
use crate::scenario::{Method, PathSuffix};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http10,
    Http11,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginConfig {
    pub protocol: Protocol,
    /// Keep connections open between requests.
    pub persistent: bool,
    /// Seeds chunk partitions and padding.
    pub seed: u64,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http10,
            persistent: false,
            seed: 0,
        }
    }
}

/// Body served on the body routes.
pub fn origin_body(method: Method, request_body_len: usize) -> Vec<u8> {
    match method {
        Method::Head => Vec::new(),
        Method::Get => b"<h1>body_200</h1>".to_vec(),
        Method::Post => format!("<h1>body_200 {request_body_len}</h1>").into_bytes(),
    }
}

pub struct OriginServer {
    addr: SocketAddr,
    counter: RequestCounter,
    accept_loop: JoinHandle<()>,
}

impl OriginServer {
    /// Bind an ephemeral loopback port and start accepting.
    pub async fn start(config: OriginConfig) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let counter = RequestCounter::new();

        let accept_loop = tokio::spawn(accept_loop(listener, config, counter.clone()));
        tracing::debug!(%addr, ?config, "origin listening");

        Ok(Self {
            addr,
            counter,
            accept_loop,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn counter(&self) -> &RequestCounter {
        &self.counter
    }

    /// Stop accepting. Connections already being served run to completion.
    pub fn shutdown(self) {
        self.accept_loop.abort();
    }
}

impl Drop for OriginServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn accept_loop(listener: TcpListener, config: OriginConfig, counter: RequestCounter) {
    let mut index = 0u64;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "origin accept failed");
                continue;
            }
        };
        let rng = StdRng::seed_from_u64(config.seed ^ index);
        index += 1;
        let counter = counter.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, config, counter, rng).await {
                tracing::debug!(%peer, error = %e, "origin connection ended with error");
            }
        });
    }
}

fn invalid_data(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

/// Read more bytes into `buf`; `Ok(0)` on end-of-stream.
async fn fill(stream: &mut TcpStream, buf: &mut Vec<u8>) -> io::Result<usize> {
    let mut chunk = [0u8; 8192];
    let n = stream.read(&mut chunk).await?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

/// Next request head, or `None` if the peer closed between requests.
async fn read_head(stream: &mut TcpStream, buf: &mut Vec<u8>) -> io::Result<Option<RequestHead>> {
    loop {
        if let Some(end) = http::find_head_end(buf) {
            let head = RequestHead::parse(&buf[..end]).map_err(invalid_data)?;
            buf.drain(..end);
            return Ok(Some(head));
        }
        if fill(stream, buf).await? == 0 {
            if buf.iter().all(u8::is_ascii_whitespace) {
                return Ok(None);
            }
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
    }
}

/// Consume the request body and return its length.
async fn read_body(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    framing: BodyFraming,
) -> io::Result<usize> {
    match framing {
        BodyFraming::Empty => Ok(0),
        BodyFraming::Length(len) => {
            while buf.len() < len {
                if fill(stream, buf).await? == 0 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
            }
            buf.drain(..len);
            Ok(len)
        }
        BodyFraming::Chunked => loop {
            if let Decoded::Complete { body, consumed } =
                chunked::decode(buf).map_err(invalid_data)?
            {
                buf.drain(..consumed);
                return Ok(body.len());
            }
            if fill(stream, buf).await? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        },
        BodyFraming::UntilClose => {
            while fill(stream, buf).await? > 0 {}
            let len = buf.len();
            buf.clear();
            Ok(len)
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    config: OriginConfig,
    counter: RequestCounter,
    mut rng: StdRng,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let version = config.protocol.as_str();
    let mut buf = Vec::new();

    while let Some(request) = read_head(&mut stream, &mut buf).await? {
        let route = route_of(request.path());
        tracing::debug!(method = %request.method, target = %request.target, "origin request");

        if config.protocol == Protocol::Http11 && request.headers.expects_continue() {
            match route {
                Some(PathSuffix::RejectContinueNoBody) => {
                    let head = ResponseHead::new(version, 404).header("Content-Length", "0");
                    stream.write_all(&head.to_bytes()).await?;
                    break;
                }
                Some(PathSuffix::RejectContinueBody) => {
                    let head = ResponseHead::new(version, 404).header("Content-Length", "4");
                    stream.write_all(&head.to_bytes()).await?;
                    stream.flush().await?;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    stream.write_all(b"nope").await?;
                    break;
                }
                _ => {
                    stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
                    stream.flush().await?;
                }
            }
        }

        counter.increment();
        let framing = request.body_framing().map_err(invalid_data)?;
        let body_len = read_body(&mut stream, &mut buf, framing).await?;

        let keep_open = respond(&mut stream, &config, &request, route, body_len, &mut rng).await?;
        if !keep_open {
            break;
        }
    }

    stream.shutdown().await
}

fn route_of(path: &str) -> Option<PathSuffix> {
    let segment = path.trim_start_matches('/').split('/').next()?;
    PathSuffix::from_name(segment)
}

/// Write the canned response; returns whether the connection may be reused.
async fn respond(
    stream: &mut TcpStream,
    config: &OriginConfig,
    request: &RequestHead,
    route: Option<PathSuffix>,
    request_body_len: usize,
    rng: &mut StdRng,
) -> io::Result<bool> {
    let version = config.protocol.as_str();
    let base = ResponseHead::new(version, 200).header("Content-type", "text/html");

    let Some(method) = Method::from_name(&request.method) else {
        let head = ResponseHead::new(version, 400).header("Content-Length", "0");
        stream.write_all(&head.to_bytes()).await?;
        return Ok(false);
    };

    if method == Method::Head {
        stream
            .write_all(&base.header("Content-Length", "5").to_bytes())
            .await?;
        return Ok(config.persistent);
    }

    let body = origin_body(method, request_body_len);
    let Some(route) = route else {
        let head = ResponseHead::new(version, 404).header("Content-Length", "0");
        stream.write_all(&head.to_bytes()).await?;
        return Ok(config.persistent);
    };

    match route {
        PathSuffix::Body200Length => {
            let head = base.header("Content-Length", body.len().to_string());
            stream.write_all(&[head.to_bytes(), body].concat()).await?;
            Ok(config.persistent)
        }
        PathSuffix::CloseAfterResponse => {
            let head = base.header("Content-Length", body.len().to_string());
            stream.write_all(&[head.to_bytes(), body].concat()).await?;
            Ok(false)
        }
        PathSuffix::Body200NoLength => {
            stream.write_all(&[base.to_bytes(), body].concat()).await?;
            Ok(false)
        }
        PathSuffix::Body200Chunked | PathSuffix::Body200ChunkedPaddedLength => {
            let head = base.header("Transfer-Encoding", "chunked");
            stream.write_all(&head.to_bytes()).await?;
            let padded = route == PathSuffix::Body200ChunkedPaddedLength;
            write_chunked(stream, &body, padded, rng).await?;
            Ok(config.persistent)
        }
        PathSuffix::NoBody200Length => {
            let head = base.header("Content-Length", "0");
            stream.write_all(&head.to_bytes()).await?;
            Ok(config.persistent)
        }
        PathSuffix::NoBody200NoLength => {
            stream.write_all(&base.to_bytes()).await?;
            Ok(false)
        }
        PathSuffix::RejectContinueBody | PathSuffix::RejectContinueNoBody => {
            // Only meaningful with an expectation; otherwise a plain 404.
            let head = ResponseHead::new(version, 404).header("Content-Length", "0");
            stream.write_all(&head.to_bytes()).await?;
            Ok(config.persistent)
        }
    }
}

/// Write `payload` as chunks of random size, each flushed on its own. Padded
/// bodies get zero-padded size fields, sometimes with a lone `0` flushed
/// ahead of the size line.
async fn write_chunked(
    stream: &mut TcpStream,
    payload: &[u8],
    padded: bool,
    rng: &mut StdRng,
) -> io::Result<()> {
    let mut sizes = chunked::random_partition(payload.len(), rng);
    sizes.push(0);

    let mut offset = 0;
    for size in sizes {
        let mut width = 0;
        if padded {
            if rng.gen_bool(0.5) {
                stream.write_all(b"0").await?;
                stream.flush().await?;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            width = rng.gen_range(0..=5);
        }

        let mut chunk = chunked::size_line(size, width);
        chunk.extend_from_slice(&payload[offset..offset + size]);
        chunk.extend_from_slice(b"\r\n");
        stream.write_all(&chunk).await?;
        stream.flush().await?;
        offset += size;

        if rng.gen_bool(0.5) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_come_from_the_first_segment() {
        assert_eq!(route_of("/body_200_length/"), Some(PathSuffix::Body200Length));
        assert_eq!(route_of("/close_after_response"), Some(PathSuffix::CloseAfterResponse));
        assert_eq!(route_of("/"), None);
        assert_eq!(route_of("/unknown/"), None);
    }

    #[test]
    fn canned_bodies() {
        assert_eq!(origin_body(Method::Get, 0), b"<h1>body_200</h1>");
        assert_eq!(origin_body(Method::Post, 17), b"<h1>body_200 17</h1>");
        assert!(origin_body(Method::Head, 0).is_empty());
    }

    #[tokio::test]
    async fn ports_and_counters_are_per_instance() {
        let a = OriginServer::start(OriginConfig::default()).await.unwrap();
        let b = OriginServer::start(OriginConfig::default()).await.unwrap();
        assert_ne!(a.port(), b.port());
        a.counter().increment();
        assert_eq!(b.counter().value(), 0);
        a.shutdown();
    }
}
