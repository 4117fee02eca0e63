//! Chunked transfer coding.
//!
//! The decoder reconstructs a body from the bytes read so far and reports
//! whether the terminating zero-size chunk (and its trailer section) has been
//! seen. Size fields may carry any amount of zero padding and a `;extension`.
//! Line breaks may be CRLF or a bare LF.

use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("invalid chunk size line {0:?}")]
    InvalidSize(String),
    #[error("chunk data at offset {0} is not followed by a line break")]
    MissingTerminator(usize),
    #[error("chunked body ended before the zero-size chunk")]
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The whole body is present; `consumed` bytes of input belong to it.
    Complete { body: Vec<u8>, consumed: usize },
    /// More input is needed.
    Incomplete,
}

/// Decode a chunked body from the start of `input`.
pub fn decode(input: &[u8]) -> Result<Decoded, ChunkError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let Some((line, next)) = next_line(input, pos) else {
            return Ok(Decoded::Incomplete);
        };
        let size = parse_size(line)?;
        pos = next;

        if size == 0 {
            // Trailer section: header lines up to an empty line.
            loop {
                let Some((line, next)) = next_line(input, pos) else {
                    return Ok(Decoded::Incomplete);
                };
                pos = next;
                if line.is_empty() {
                    return Ok(Decoded::Complete {
                        body,
                        consumed: pos,
                    });
                }
            }
        }

        if input.len() - pos < size {
            return Ok(Decoded::Incomplete);
        }
        body.extend_from_slice(&input[pos..pos + size]);
        pos += size;

        match &input[pos..] {
            [b'\r', b'\n', ..] => pos += 2,
            [b'\n', ..] => pos += 1,
            [] | [b'\r'] => return Ok(Decoded::Incomplete),
            _ => return Err(ChunkError::MissingTerminator(pos)),
        }
    }
}

/// Decode a complete chunked body, failing if it is truncated.
pub fn decode_all(input: &[u8]) -> Result<Vec<u8>, ChunkError> {
    match decode(input)? {
        Decoded::Complete { body, .. } => Ok(body),
        Decoded::Incomplete => Err(ChunkError::Truncated),
    }
}

/// Returns the line starting at `pos` without its terminator, and the offset
/// just past the terminator.
fn next_line(input: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let nl = input[pos..].iter().position(|&b| b == b'\n')? + pos;
    let line = &input[pos..nl];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, nl + 1))
}

fn parse_size(line: &[u8]) -> Result<usize, ChunkError> {
    let invalid = || ChunkError::InvalidSize(String::from_utf8_lossy(line).into_owned());
    let text = std::str::from_utf8(line).map_err(|_| invalid())?;
    let digits = text.split(';').next().unwrap_or("").trim();
    if digits.is_empty() {
        return Err(invalid());
    }
    usize::from_str_radix(digits, 16).map_err(|_| invalid())
}

/// Split `len` bytes into random chunk sizes, each at least one byte.
pub fn random_partition<R: Rng>(len: usize, rng: &mut R) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut remaining = len;
    while remaining > 0 {
        let size = rng.gen_range(1..=remaining);
        sizes.push(size);
        remaining -= size;
    }
    sizes
}

/// Size line for a chunk, hex size zero-padded to at least `width` digits.
pub fn size_line(size: usize, width: usize) -> Vec<u8> {
    format!("{size:0width$x}\r\n").into_bytes()
}

/// Encode `payload` with the given partition and no padding.
pub fn encode(payload: &[u8], partition: &[usize]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + partition.len() * 8 + 5);
    let mut offset = 0;
    for &size in partition {
        out.extend_from_slice(&size_line(size, 0));
        out.extend_from_slice(&payload[offset..offset + size]);
        out.extend_from_slice(b"\r\n");
        offset += size;
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}
