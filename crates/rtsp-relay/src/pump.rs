use bytes::BytesMut;
use event_log::{EventEntry, EventKind};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::config::RelaySettings;
use crate::connection::ConnectionContext;
use crate::error::RelayError;
use crate::frame::{Frame, TextFrame};
use crate::reader::FrameReader;
use crate::rewrite::{rewrite, Direction, Rewrite, RewriteOutcome};

/// Why a pump stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpEnd {
    /// The source closed at a frame boundary.
    PeerClosed,
    /// No bytes arrived within the idle timeout.
    IdleTimeout,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpStats {
    /// Frames fully written to the destination.
    pub frames: u64,
    pub binary_frames: u64,
    pub text_frames: u64,
    pub rewritten: u64,
    pub bytes: u64,
}

/// What a pump did before it stopped.
#[derive(Debug)]
pub struct PumpReport {
    pub direction: Direction,
    pub stats: PumpStats,
    pub result: Result<PumpEnd, RelayError>,
}

/// Forwards frames from one side of a connection to the other.
///
/// Exactly one frame is in flight: the next read is issued only after the
/// previous frame has been written and flushed, so a slow destination
/// stalls this direction's source and nothing else.
pub struct Pump<'a, R, W> {
    reader: FrameReader<R>,
    writer: W,
    direction: Direction,
    rewrite_enabled: bool,
    ctx: &'a ConnectionContext,
    scratch: BytesMut,
    stats: PumpStats,
}

impl<'a, R, W> Pump<'a, R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Pump from `source` to `destination`, rewriting per `settings.rewrite`.
    pub fn new(
        source: R,
        destination: W,
        direction: Direction,
        ctx: &'a ConnectionContext,
        settings: &RelaySettings,
    ) -> Self {
        let rewrite_enabled = match direction {
            Direction::ToInternal => settings.rewrite.requests,
            Direction::ToExternal => settings.rewrite.responses,
        };

        Self {
            reader: FrameReader::new(source, settings.limits)
                .with_idle_timeout(settings.idle_timeout),
            writer: destination,
            direction,
            rewrite_enabled,
            ctx,
            scratch: BytesMut::new(),
            stats: PumpStats::default(),
        }
    }

    /// Forward until the source ends or something fails. The transports are
    /// left open; closing them is the caller's job.
    pub async fn run(mut self) -> PumpReport {
        let result = self.forward_all().await;
        PumpReport {
            direction: self.direction,
            stats: self.stats,
            result,
        }
    }

    async fn forward_all(&mut self) -> Result<PumpEnd, RelayError> {
        loop {
            let Some(frame) = self.reader.next_frame().await? else {
                return Ok(if self.reader.idle_expired() {
                    PumpEnd::IdleTimeout
                } else {
                    PumpEnd::PeerClosed
                });
            };

            match frame {
                Frame::Binary(binary) => {
                    self.stats.binary_frames += 1;
                    self.write(binary.as_bytes()).await?;
                }
                Frame::Text(text) => {
                    self.stats.text_frames += 1;
                    let text = self.rewrite(text);

                    let mut scratch = std::mem::take(&mut self.scratch);
                    scratch.clear();
                    text.encode(&mut scratch);
                    let written = self.write(&scratch).await;
                    self.scratch = scratch;
                    written?;
                }
            }
        }
    }

    fn rewrite(&mut self, text: TextFrame) -> TextFrame {
        tracing::debug!(
            channel = %self.ctx.channel.name,
            connection_id = self.ctx.id,
            direction = %self.direction,
            start_line = %text.start_line_lossy(),
            body_len = text.body().len(),
            "{}",
            if text.is_response() { "rtsp response" } else { "rtsp request" }
        );

        if !self.rewrite_enabled {
            return text;
        }

        match rewrite(text, self.direction, &self.ctx.addrs) {
            RewriteOutcome::Unchanged(text) => text,
            RewriteOutcome::Undecodable(text) => {
                tracing::debug!(
                    channel = %self.ctx.channel.name,
                    connection_id = self.ctx.id,
                    direction = %self.direction,
                    "message head is not UTF-8, forwarding unchanged"
                );
                text
            }
            RewriteOutcome::Rewritten(rewritten) => {
                self.stats.rewritten += 1;
                self.report_rewrite(&rewritten);
                rewritten.frame
            }
        }
    }

    fn report_rewrite(&self, rewritten: &Rewrite) {
        tracing::info!(
            channel = %self.ctx.channel.name,
            connection_id = self.ctx.id,
            direction = %self.direction,
            from = %rewritten.start_line_before,
            to = %rewritten.start_line_after,
            replacements = rewritten.replacements,
            "address rewritten"
        );

        self.ctx.events.record(EventEntry::new(
            EventKind::FrameRewritten,
            self.ctx.event_source("pump"),
            serde_json::json!({
                "direction": self.direction,
                "replacements": rewritten.replacements,
                "before": rewritten.start_line_before,
                "after": rewritten.start_line_after,
            }),
        ));
    }

    /// Write one whole frame and flush it before the next read.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), RelayError> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(RelayError::Write)?;
        self.writer.flush().await.map_err(RelayError::Write)?;

        self.stats.frames += 1;
        self.stats.bytes += bytes.len() as u64;
        Ok(())
    }
}
