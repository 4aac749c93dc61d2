//! Structured JSON-lines event log for the RTSP bridge.
//!
//! Connection lifecycle, address rewrites and relay errors are recorded as
//! [`EventEntry`] values. Each entry becomes one newline-terminated JSON
//! object appended to a file by a background task, so the log can be tailed,
//! shipped or replayed without touching the relay's hot path.
//!
//! ```rust,no_run
//! use event_log::{EventEntry, EventKind, EventSink, EventSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = EventSink::start("/var/log/rtsp-bridge/events.jsonl").await?;
//!
//! sink.record(EventEntry::new(
//!     EventKind::RelayStarted,
//!     EventSource::new("rtsp-bridge"),
//!     serde_json::json!({ "channels": 2 }),
//! ));
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{EventEntry, EventKind, EventSource};
pub use sink::EventSink;
pub use writer::{EventWriteError, EventWriter};
