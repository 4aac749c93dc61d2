//! Address substitution for RTSP text messages.
//!
//! The client addresses the bridge (`bridge-host:external-port`) while the
//! camera believes it is `camera-host:internal-port`. Both addresses leak into
//! request URIs, `Content-Base`, `Location` and similar fields, so every
//! occurrence is swapped as messages cross the bridge. `Authorization` is the
//! exception: digest responses are computed over the URI the client saw and
//! must reach the camera byte-for-byte.

use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;

use crate::config::{join_host_port, ChannelConfig, ExternalHost};
use crate::frame::{HeaderLine, TextFrame};

/// Header whose value is never rewritten.
pub const AUTHORIZATION: &str = "Authorization";

/// Which way a message is travelling through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Client to camera: external address becomes internal.
    ToInternal,
    /// Camera to client: internal address becomes external.
    ToExternal,
}

impl Direction {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Direction::ToInternal => Direction::ToExternal,
            Direction::ToExternal => Direction::ToInternal,
        }
    }

    /// Human-readable arrow form used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ToInternal => "client->camera",
            Direction::ToExternal => "camera->client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two `host:port` spellings of one connection's endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPair {
    external: String,
    internal: String,
}

impl AddressPair {
    /// Pair two already formatted `host:port` strings.
    pub fn new(external: impl Into<String>, internal: impl Into<String>) -> Self {
        Self {
            external: external.into(),
            internal: internal.into(),
        }
    }

    /// Addresses for a connection accepted on `local_addr` for `channel`.
    ///
    /// A fixed host is paired with the channel's external port; otherwise
    /// the accepted socket's local address is used. An IPv4 client accepted
    /// on a dual-stack socket shows up as `::ffff:a.b.c.d`, which is unmapped
    /// back to the address the client actually dialled.
    pub fn resolve(
        external_host: &ExternalHost,
        local_addr: SocketAddr,
        channel: &ChannelConfig,
    ) -> Self {
        let external = match external_host {
            ExternalHost::Fixed(host) => join_host_port(host.trim(), channel.external_port),
            ExternalHost::LocalInterface => {
                SocketAddr::new(local_addr.ip().to_canonical(), local_addr.port()).to_string()
            }
        };
        Self::new(external, channel.internal_addr())
    }

    /// Address as the client sees it.
    pub fn external(&self) -> &str {
        &self.external
    }

    /// Address as the camera sees it.
    pub fn internal(&self) -> &str {
        &self.internal
    }

    /// Address replaced when travelling in `direction`.
    pub fn source(&self, direction: Direction) -> &str {
        match direction {
            Direction::ToInternal => &self.external,
            Direction::ToExternal => &self.internal,
        }
    }

    /// Address written in place of [`source`](Self::source).
    pub fn target(&self, direction: Direction) -> &str {
        self.source(direction.reverse())
    }
}

/// A successful substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub frame: TextFrame,
    /// Occurrences replaced across the start-line and headers.
    pub replacements: usize,
    pub start_line_before: String,
    pub start_line_after: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// The source address does not occur outside the body or `Authorization`.
    Unchanged(TextFrame),
    Rewritten(Rewrite),
    /// The head is not valid UTF-8; the frame is passed through as is.
    Undecodable(TextFrame),
}

impl RewriteOutcome {
    /// The frame to forward, rewritten or not.
    pub fn into_frame(self) -> TextFrame {
        match self {
            RewriteOutcome::Unchanged(frame) | RewriteOutcome::Undecodable(frame) => frame,
            RewriteOutcome::Rewritten(rewrite) => rewrite.frame,
        }
    }
}

/// Replace every occurrence of the direction's source address with its
/// target address in the start-line and header values of `frame`.
pub fn rewrite(frame: TextFrame, direction: Direction, addrs: &AddressPair) -> RewriteOutcome {
    let source = addrs.source(direction);
    let target = addrs.target(direction);

    if source.is_empty() || source == target || !mentions(&frame, source.as_bytes()) {
        return RewriteOutcome::Unchanged(frame);
    }

    match substitute(&frame, source, target) {
        None => RewriteOutcome::Undecodable(frame),
        Some((_, _, 0)) => RewriteOutcome::Unchanged(frame),
        Some((start_line, headers, replacements)) => {
            let start_line_before = String::from_utf8_lossy(frame.start_line()).into_owned();
            let rewritten = frame.with_head(start_line.clone().into_bytes(), headers);
            RewriteOutcome::Rewritten(Rewrite {
                frame: rewritten,
                replacements,
                start_line_before,
                start_line_after: start_line,
            })
        }
    }
}

/// New start-line, new headers and the replacement count, or `None` when
/// some part of the head is not UTF-8.
fn substitute(
    frame: &TextFrame,
    source: &str,
    target: &str,
) -> Option<(String, Vec<HeaderLine>, usize)> {
    let start_line = std::str::from_utf8(frame.start_line()).ok()?;
    let mut replacements = start_line.matches(source).count();
    let start_line = start_line.replace(source, target);

    let mut headers = Vec::with_capacity(frame.headers().len());
    for header in frame.headers() {
        if header.is(AUTHORIZATION) {
            headers.push(header.clone());
            continue;
        }

        let line = std::str::from_utf8(header.raw()).ok()?;
        let (prefix, value) = match header.split_raw() {
            (prefix, Some(_)) => line.split_at(prefix.len()),
            (_, None) => {
                headers.push(header.clone());
                continue;
            }
        };

        let count = value.matches(source).count();
        if count == 0 {
            headers.push(header.clone());
            continue;
        }

        replacements += count;
        headers.push(HeaderLine::new(format!(
            "{prefix}{}",
            value.replace(source, target)
        )));
    }

    Some((start_line, headers, replacements))
}

fn mentions(frame: &TextFrame, needle: &[u8]) -> bool {
    let contains = |haystack: &[u8]| haystack.windows(needle.len()).any(|w| w == needle);
    contains(frame.start_line()) || frame.headers().iter().any(|h| contains(h.raw()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    use crate::frame::{Frame, FrameDecoder};

    const BRIDGE: &str = "192.168.2.183:8554";
    const CAMERA: &str = "10.10.1.110:554";

    fn addrs() -> AddressPair {
        AddressPair::new(BRIDGE, CAMERA)
    }

    fn parse(raw: &str) -> TextFrame {
        let mut buf = BytesMut::from(raw.as_bytes());
        match FrameDecoder::default().decode_eof(&mut buf).unwrap() {
            Some(Frame::Text(frame)) => frame,
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn encode(frame: &TextFrame) -> String {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn describe_request_is_rewritten_toward_camera() {
        let frame = parse(
            "DESCRIBE rtsp://192.168.2.183:8554/stream1 RTSP/1.0\r\n\
             Authorization: Digest abc123\r\n\r\n",
        );

        let RewriteOutcome::Rewritten(rewrite) = rewrite(frame, Direction::ToInternal, &addrs())
        else {
            panic!("expected a rewrite");
        };

        assert_eq!(
            rewrite.frame.start_line(),
            b"DESCRIBE rtsp://10.10.1.110:554/stream1 RTSP/1.0"
        );
        assert_eq!(
            rewrite.frame.header("authorization").unwrap().raw(),
            b"Authorization: Digest abc123"
        );
        assert_eq!(rewrite.replacements, 1);
        assert_eq!(
            rewrite.start_line_before,
            "DESCRIBE rtsp://192.168.2.183:8554/stream1 RTSP/1.0"
        );
        assert_eq!(
            rewrite.start_line_after,
            "DESCRIBE rtsp://10.10.1.110:554/stream1 RTSP/1.0"
        );
    }

    #[test]
    fn every_occurrence_in_a_value_is_replaced() {
        let frame = parse(
            "RTSP/1.0 200 OK\r\n\
             CSeq: 3\r\n\
             RTP-Info: url=rtsp://10.10.1.110:554/s1/track1,url=rtsp://10.10.1.110:554/s1/track2\r\n\r\n",
        );

        let rewrite = match rewrite(frame, Direction::ToExternal, &addrs()) {
            RewriteOutcome::Rewritten(rewrite) => rewrite,
            other => panic!("expected a rewrite, got {other:?}"),
        };

        assert_eq!(rewrite.replacements, 2);
        assert_eq!(
            rewrite.frame.header("RTP-Info").unwrap().value(),
            b"url=rtsp://192.168.2.183:8554/s1/track1,url=rtsp://192.168.2.183:8554/s1/track2"
        );
    }

    #[test]
    fn all_rewrite_sites_in_one_response_agree() {
        let body = "v=0\r\nc=IN IP4 10.10.1.110\r\na=control:rtsp://10.10.1.110:554/s1\r\n";
        let raw = format!(
            "RTSP/1.0 200 OK\r\n\
             Content-Base:rtsp://10.10.1.110:554/s1/\r\n\
             Location: rtsp://10.10.1.110:554/s1\r\n\
             Content-Length: {}\r\n\r\n{body}",
            body.len()
        );

        let frame = rewrite(parse(&raw), Direction::ToExternal, &addrs()).into_frame();

        let expected = format!(
            "RTSP/1.0 200 OK\r\n\
             Content-Base:rtsp://192.168.2.183:8554/s1/\r\n\
             Location: rtsp://192.168.2.183:8554/s1\r\n\
             Content-Length: {}\r\n\r\n{body}",
            body.len()
        );
        assert_eq!(encode(&frame), expected);
    }

    #[test]
    fn absent_source_is_identity() {
        let raw = "OPTIONS rtsp://10.10.1.110:554/s1 RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let frame = parse(raw);

        let outcome = rewrite(frame.clone(), Direction::ToInternal, &addrs());
        assert_eq!(outcome, RewriteOutcome::Unchanged(frame));
        assert_eq!(encode(&outcome.into_frame()), raw);
    }

    #[test]
    fn address_only_inside_authorization_is_identity() {
        let frame = parse(
            "PLAY rtsp://cam/s1 RTSP/1.0\r\n\
             authorization: Digest uri=\"rtsp://192.168.2.183:8554/s1\"\r\n\r\n",
        );
        let outcome = rewrite(frame.clone(), Direction::ToInternal, &addrs());
        assert_eq!(outcome, RewriteOutcome::Unchanged(frame));
    }

    #[test]
    fn authorization_survives_a_round_trip() {
        let auth = "Authorization: Digest username=\"admin\", uri=\"rtsp://192.168.2.183:8554/s1\", \
                    response=\"6629fae49393a05397450978507c4ef1\"";
        let raw = format!("SETUP rtsp://192.168.2.183:8554/s1/track1 RTSP/1.0\r\n{auth}\r\n\r\n");
        let original = parse(&raw);

        let there = rewrite(original.clone(), Direction::ToInternal, &addrs()).into_frame();
        assert_eq!(there.header(AUTHORIZATION).unwrap().raw(), auth.as_bytes());

        let back = rewrite(there, Direction::ToExternal, &addrs()).into_frame();
        assert_eq!(back.header(AUTHORIZATION).unwrap().raw(), auth.as_bytes());
        assert_eq!(back, original);
    }

    #[test]
    fn body_is_never_rewritten() {
        let body = "a=control:rtsp://10.10.1.110:554/s1\r\n";
        let raw = format!(
            "RTSP/1.0 200 OK\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let outcome = rewrite(parse(&raw), Direction::ToExternal, &addrs());
        assert!(matches!(outcome, RewriteOutcome::Unchanged(_)));
        assert_eq!(outcome.into_frame().body(), body.as_bytes());
    }

    #[test]
    fn undecodable_head_fails_open() {
        let frame = TextFrame::new(
            &b"RTSP/1.0 200 OK"[..],
            vec![
                HeaderLine::new(&b"Location: rtsp://10.10.1.110:554/s1"[..]),
                HeaderLine::new(&b"X-Vendor: \xff\xfe"[..]),
            ],
            &b""[..],
        );

        let outcome = rewrite(frame.clone(), Direction::ToExternal, &addrs());
        assert_eq!(outcome, RewriteOutcome::Undecodable(frame));
    }

    #[test]
    fn direction_selects_source_and_target() {
        let pair = addrs();
        assert_eq!(pair.source(Direction::ToInternal), BRIDGE);
        assert_eq!(pair.target(Direction::ToInternal), CAMERA);
        assert_eq!(pair.source(Direction::ToExternal), CAMERA);
        assert_eq!(pair.target(Direction::ToExternal), BRIDGE);
        assert_eq!(Direction::ToInternal.reverse(), Direction::ToExternal);
    }

    #[test]
    fn resolve_uses_fixed_host_or_local_interface() {
        let channel = ChannelConfig {
            name: "CH01".to_string(),
            external_port: 8554,
            internal_host: "10.10.1.110".to_string(),
            internal_port: 554,
        };
        let local: SocketAddr = "192.168.2.50:8554".parse().unwrap();

        let fixed = AddressPair::resolve(
            &ExternalHost::Fixed("192.168.2.183".to_string()),
            local,
            &channel,
        );
        assert_eq!(fixed, AddressPair::new(BRIDGE, CAMERA));

        let local_if = AddressPair::resolve(&ExternalHost::LocalInterface, local, &channel);
        assert_eq!(local_if.external(), "192.168.2.50:8554");
        assert_eq!(local_if.internal(), CAMERA);
    }

    #[test]
    fn resolve_unmaps_ipv4_accepted_on_dual_stack_socket() {
        let channel = ChannelConfig {
            name: "CH01".to_string(),
            external_port: 8554,
            internal_host: "10.10.1.110".to_string(),
            internal_port: 554,
        };

        let mapped: SocketAddr = "[::ffff:192.168.2.183]:8554".parse().unwrap();
        let pair = AddressPair::resolve(&ExternalHost::LocalInterface, mapped, &channel);
        assert_eq!(pair, AddressPair::new(BRIDGE, CAMERA));

        let frame = parse("DESCRIBE rtsp://192.168.2.183:8554/s1 RTSP/1.0\r\nCSeq: 2\r\n\r\n");
        assert!(matches!(
            rewrite(frame, Direction::ToInternal, &pair),
            RewriteOutcome::Rewritten(_)
        ));

        let native: SocketAddr = "[fd00::1]:8554".parse().unwrap();
        let pair = AddressPair::resolve(&ExternalHost::LocalInterface, native, &channel);
        assert_eq!(pair.external(), "[fd00::1]:8554");
    }
}
