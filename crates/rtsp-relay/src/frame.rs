//! RTSP stream framing.
//!
//! An RTSP connection carries two kinds of units on one byte stream:
//!
//! * interleaved binary frames: `$`, a one-byte channel id, a big-endian
//!   `u16` length, then exactly that many payload bytes;
//! * text messages: a start-line and header lines terminated by CR LF, a
//!   blank line, then a body whose length is given by `Content-Length`.
//!
//! [`FrameDecoder`] splits buffered bytes into [`Frame`]s without ever
//! copying or inspecting binary payload. Encoding a decoded frame yields the
//! exact bytes it was decoded from.

use std::borrow::Cow;
use std::fmt;
use std::ops::Range;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// First byte of an interleaved binary frame.
pub const INTERLEAVED_MARKER: u8 = b'$';

/// Header field carrying the body length of a text message.
pub const CONTENT_LENGTH: &str = "Content-Length";

const INTERLEAVED_HEADER_LEN: usize = 4;
const CRLF: &[u8] = b"\r\n";
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Upper bounds on how much a single frame may make the decoder buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Longest accepted start-line plus header block, terminator included.
    pub max_header_bytes: usize,
    /// Largest accepted `Content-Length`.
    pub max_body_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Which part of a frame the stream ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePart {
    InterleavedHeader,
    InterleavedPayload,
    MessageHead,
    MessageBody,
}

impl fmt::Display for FramePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FramePart::InterleavedHeader => "interleaved header",
            FramePart::InterleavedPayload => "interleaved payload",
            FramePart::MessageHead => "message head",
            FramePart::MessageBody => "message body",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("message head exceeds {limit} bytes without a blank line")]
    HeaderTooLarge { limit: usize },

    #[error("invalid Content-Length value {value:?}")]
    InvalidContentLength { value: String },

    #[error("Content-Length {length} exceeds limit of {limit} bytes")]
    BodyTooLarge { length: u64, limit: usize },

    #[error("stream ended inside {part}: {available} of {} bytes", .expected.map_or_else(|| "?".to_string(), |n| n.to_string()))]
    Truncated {
        part: FramePart,
        expected: Option<usize>,
        available: usize,
    },
}

/// One protocol unit read from an RTSP stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(BinaryFrame),
    Text(TextFrame),
}

impl Frame {
    /// Append the wire representation of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Binary(frame) => dst.put_slice(frame.as_bytes()),
            Frame::Text(frame) => frame.encode(dst),
        }
    }
}

/// An interleaved binary frame, kept as the exact bytes read: the 4-byte
/// header followed by the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    bytes: Bytes,
}

impl BinaryFrame {
    /// Interleaved channel id (second header byte).
    pub fn channel(&self) -> u8 {
        self.bytes[1]
    }

    /// The 4-byte `$`, channel, length prefix.
    pub fn header(&self) -> &[u8] {
        &self.bytes[..INTERLEAVED_HEADER_LEN]
    }

    /// Payload bytes, never inspected.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[INTERLEAVED_HEADER_LEN..]
    }

    /// Header and payload exactly as read.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A single header line, stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    line: Bytes,
    colon: Option<usize>,
}

impl HeaderLine {
    /// Wrap a line without its CR LF.
    pub fn new(line: impl Into<Bytes>) -> Self {
        let line = line.into();
        let colon = line.iter().position(|&b| b == b':');
        Self { line, colon }
    }

    /// The whole line as read, without its CR LF.
    pub fn raw(&self) -> &[u8] {
        &self.line
    }

    /// Field name, trimmed. A line without a colon is all name.
    pub fn name(&self) -> &[u8] {
        split_field(&self.line).0
    }

    /// Field value, trimmed. Empty when the line has no colon.
    pub fn value(&self) -> &[u8] {
        split_field(&self.line).1
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name.as_bytes())
    }

    /// Splits the line into everything up to and including the colon, and
    /// the untrimmed remainder.
    pub(crate) fn split_raw(&self) -> (&[u8], Option<&[u8]>) {
        match self.colon {
            Some(colon) => (&self.line[..=colon], Some(&self.line[colon + 1..])),
            None => (&self.line, None),
        }
    }
}

/// A text control message: start-line, headers in arrival order, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFrame {
    start_line: Bytes,
    headers: Vec<HeaderLine>,
    body: Bytes,
}

impl TextFrame {
    /// Assemble a message; `start_line` and `headers` carry no CR LF.
    pub fn new(start_line: impl Into<Bytes>, headers: Vec<HeaderLine>, body: impl Into<Bytes>) -> Self {
        Self {
            start_line: start_line.into(),
            headers,
            body: body.into(),
        }
    }

    /// Build a frame from a head block (without the blank line) and a body.
    fn from_head(head: Bytes, body: Bytes) -> Self {
        let mut lines = line_ranges(&head).into_iter().map(|range| head.slice(range));
        let start_line = lines.next().unwrap_or_default();
        Self {
            start_line,
            headers: lines.map(HeaderLine::new).collect(),
            body,
        }
    }

    /// Request or status line, without its CR LF.
    pub fn start_line(&self) -> &[u8] {
        &self.start_line
    }

    /// Start-line for logging.
    pub fn start_line_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.start_line)
    }

    /// Header lines in arrival order.
    pub fn headers(&self) -> &[HeaderLine] {
        &self.headers
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&HeaderLine> {
        self.headers.iter().find(|h| h.is(name))
    }

    /// Body bytes, `Content-Length` of them.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// A frame with a new head and this frame's body.
    pub fn with_head(&self, start_line: impl Into<Bytes>, headers: Vec<HeaderLine>) -> Self {
        Self::new(start_line, headers, self.body.clone())
    }

    /// Responses start with the protocol version, requests with a method.
    pub fn is_response(&self) -> bool {
        self.start_line.starts_with(b"RTSP/")
    }

    /// Size of the wire representation.
    pub fn encoded_len(&self) -> usize {
        let headers: usize = self.headers.iter().map(|h| CRLF.len() + h.raw().len()).sum();
        self.start_line.len() + headers + HEAD_TERMINATOR.len() + self.body.len()
    }

    /// Append the message to `dst`, byte-for-byte as it was read.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&self.start_line);
        for header in &self.headers {
            dst.put_slice(CRLF);
            dst.put_slice(header.raw());
        }
        dst.put_slice(HEAD_TERMINATOR);
        dst.put_slice(&self.body);
    }
}

/// Head of a text message whose body has not fully arrived yet.
#[derive(Debug, Clone, Copy)]
struct PendingBody {
    head_len: usize,
    body_len: usize,
}

/// Incremental splitter from buffered bytes to [`Frame`]s.
///
/// Feed it the connection's read buffer after every read; complete frames
/// are split off the front of the buffer and anything incomplete is left in
/// place for the next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    limits: FrameLimits,
    /// Bytes of the current head already searched for the terminator.
    scanned: usize,
    pending: Option<PendingBody>,
}

impl FrameDecoder {
    /// Decoder enforcing `limits`.
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            limits,
            scanned: 0,
            pending: None,
        }
    }

    /// Split the next complete frame off `buf`, or return `Ok(None)` if more
    /// bytes are needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        match buf.first() {
            None => Ok(None),
            Some(&INTERLEAVED_MARKER) => Ok(decode_binary(buf)),
            Some(_) => self.decode_text(buf),
        }
    }

    /// Like [`decode`](Self::decode), for when the source has reached end of
    /// stream: leftover bytes that do not form a frame are an error.
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        Err(self.truncation(buf))
    }

    fn decode_text(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        let pending = match self.pending {
            Some(pending) => pending,
            None => {
                let Some(head_len) = self.find_terminator(buf) else {
                    if buf.len() > self.limits.max_header_bytes {
                        return Err(FramingError::HeaderTooLarge {
                            limit: self.limits.max_header_bytes,
                        });
                    }
                    return Ok(None);
                };
                if head_len + HEAD_TERMINATOR.len() > self.limits.max_header_bytes {
                    return Err(FramingError::HeaderTooLarge {
                        limit: self.limits.max_header_bytes,
                    });
                }

                let body_len = content_length(&buf[..head_len])?;
                if body_len > self.limits.max_body_bytes as u64 {
                    return Err(FramingError::BodyTooLarge {
                        length: body_len,
                        limit: self.limits.max_body_bytes,
                    });
                }

                let pending = PendingBody {
                    head_len,
                    body_len: body_len as usize,
                };
                self.pending = Some(pending);
                pending
            }
        };

        let total = pending.head_len + HEAD_TERMINATOR.len() + pending.body_len;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        self.pending = None;
        self.scanned = 0;

        let mut raw = buf.split_to(total).freeze();
        let head = raw.split_to(pending.head_len);
        raw.advance(HEAD_TERMINATOR.len());

        Ok(Some(Frame::Text(TextFrame::from_head(head, raw))))
    }

    /// Offset of the blank line ending the head, resuming where the last
    /// unsuccessful search stopped.
    fn find_terminator(&mut self, buf: &[u8]) -> Option<usize> {
        let start = self.scanned.saturating_sub(HEAD_TERMINATOR.len() - 1);
        match find(&buf[start..], HEAD_TERMINATOR) {
            Some(pos) => Some(start + pos),
            None => {
                self.scanned = buf.len();
                None
            }
        }
    }

    fn truncation(&self, buf: &[u8]) -> FramingError {
        let (part, expected, available) = if buf[0] == INTERLEAVED_MARKER {
            if buf.len() < INTERLEAVED_HEADER_LEN {
                (FramePart::InterleavedHeader, Some(INTERLEAVED_HEADER_LEN), buf.len())
            } else {
                (
                    FramePart::InterleavedPayload,
                    Some(u16::from_be_bytes([buf[2], buf[3]]) as usize),
                    buf.len() - INTERLEAVED_HEADER_LEN,
                )
            }
        } else if let Some(pending) = self.pending {
            (
                FramePart::MessageBody,
                Some(pending.body_len),
                buf.len() - pending.head_len - HEAD_TERMINATOR.len(),
            )
        } else {
            (FramePart::MessageHead, None, buf.len())
        };

        FramingError::Truncated {
            part,
            expected,
            available,
        }
    }
}

fn decode_binary(buf: &mut BytesMut) -> Option<Frame> {
    if buf.len() < INTERLEAVED_HEADER_LEN {
        return None;
    }

    let payload_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let total = INTERLEAVED_HEADER_LEN + payload_len;
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return None;
    }

    Some(Frame::Binary(BinaryFrame {
        bytes: buf.split_to(total).freeze(),
    }))
}

/// Body length declared by the head, zero when no `Content-Length` is
/// present. The first matching header wins.
fn content_length(head: &[u8]) -> Result<u64, FramingError> {
    let field = line_ranges(head)
        .into_iter()
        .skip(1)
        .map(|range| split_field(&head[range]))
        .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_LENGTH.as_bytes()));

    let Some((_, value)) = field else {
        return Ok(0);
    };

    let invalid = || FramingError::InvalidContentLength {
        value: String::from_utf8_lossy(value).into_owned(),
    };

    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    std::str::from_utf8(value)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(invalid)
}

/// Trimmed name and value of a header line, split on the first colon.
fn split_field(line: &[u8]) -> (&[u8], &[u8]) {
    match line.iter().position(|&b| b == b':') {
        Some(colon) => (line[..colon].trim_ascii(), line[colon + 1..].trim_ascii()),
        None => (line.trim_ascii(), &[][..]),
    }
}

/// Ranges of the CR LF separated lines of a head block.
fn line_ranges(head: &[u8]) -> Vec<Range<usize>> {
    let mut lines = Vec::new();
    let mut start = 0;
    while let Some(pos) = find(&head[start..], CRLF) {
        lines.push(start..start + pos);
        start += pos + CRLF.len();
    }
    lines.push(start..head.len());
    lines
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
