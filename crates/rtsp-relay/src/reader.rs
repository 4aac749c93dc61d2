use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::RelayError;
use crate::frame::{Frame, FrameDecoder, FrameLimits};

/// Grow the read buffer by this much when it runs out of spare room.
const READ_CHUNK: usize = 16 * 1024;

/// Reads [`Frame`]s from an async byte source.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    decoder: FrameDecoder,
    eof: bool,
    idle_timeout: Option<Duration>,
    idle_expired: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Reader over `inner` that waits indefinitely for more bytes.
    pub fn new(inner: R, limits: FrameLimits) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            decoder: FrameDecoder::new(limits),
            eof: false,
            idle_timeout: None,
            idle_expired: false,
        }
    }

    /// Bound every wait for more bytes. A wait that expires ends the stream
    /// as if the source had closed: a clean end at a frame boundary, a
    /// truncation error inside a frame.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Whether the stream ended because the idle timeout expired.
    pub fn idle_expired(&self) -> bool {
        self.idle_expired
    }

    /// Next complete frame, `Ok(None)` on a clean end of stream.
    ///
    /// Cancel safe: dropping the future loses no bytes, since everything
    /// read is kept in the internal buffer.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, RelayError> {
        loop {
            if self.eof {
                return Ok(self.decoder.decode_eof(&mut self.buf)?);
            }
            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }

            if self.buf.capacity() == self.buf.len() {
                self.buf.reserve(READ_CHUNK);
            }
            let n = match self.idle_timeout {
                Some(limit) => {
                    let read = tokio::time::timeout(limit, self.inner.read_buf(&mut self.buf)).await;
                    match read {
                        Ok(result) => result.map_err(RelayError::Read)?,
                        Err(_) => {
                            self.idle_expired = true;
                            0
                        }
                    }
                }
                None => self
                    .inner
                    .read_buf(&mut self.buf)
                    .await
                    .map_err(RelayError::Read)?,
            };
            if n == 0 {
                self.eof = true;
            }
        }
    }
}
