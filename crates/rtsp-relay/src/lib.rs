//! Transparent RTSP relay with address rewriting.
//!
//! Each configured channel maps a port on the bridge to a camera on a
//! private network. Clients talk to the bridge as if it were the camera; the
//! relay opens a matching connection to the camera and forwards traffic in
//! both directions, rewriting `host:port` references in RTSP message heads so
//! each side only ever sees its own view of the address.
//!
//! # Architecture
//!
//! ```text
//! Client  <--TCP-->  RelayServer  <--TCP-->  Camera
//!                        |
//!                   [Connection]
//!                    /        \
//!        Pump(to_internal)  Pump(to_external)
//!                    \        /
//!                 [FrameReader + rewrite]
//!                        |
//!                   [Event Sink]
//! ```
//!
//! Interleaved binary frames (`$` + channel + length) are forwarded
//! byte-for-byte. Text messages are parsed just far enough to find the start
//! line, header lines and body; only the start line and header values are
//! rewritten, and `Authorization` is never touched. When either direction
//! stops, for any reason, the whole connection is torn down.

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod listener;
pub mod pump;
pub mod reader;
pub mod rewrite;

pub use config::{ChannelConfig, ConfigError, ExternalHost, RelayConfig, RelaySettings, RewritePolicy};
pub use connection::{Closure, Connection, ConnectionContext, ConnectionState};
pub use error::RelayError;
pub use frame::{Frame, FrameDecoder, FrameLimits, FramingError};
pub use listener::RelayServer;
pub use pump::{Pump, PumpEnd, PumpReport, PumpStats};
pub use reader::FrameReader;
pub use rewrite::{rewrite, AddressPair, Direction, RewriteOutcome};
