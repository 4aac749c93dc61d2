use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::entry::EventEntry;
use crate::writer::{EventWriteError, EventWriter};

/// Channel buffer between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Flush after this long without a new entry.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Cloneable handle for submitting [`EventEntry`] values.
///
/// Recording never waits: relay tasks call [`record`](Self::record) from
/// their forwarding loops, so a slow disk must not stall a media stream.
/// When the buffer is full the entry is dropped and counted.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<EventEntry>>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Spawn the background writer for `path` and return the sink together
    /// with the writer task handle. The task drains entries, flushes when
    /// idle and performs a final flush once every sink clone is dropped.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<()>), EventWriteError> {
        let mut writer = EventWriter::open(path).await?;
        let (sink, rx) = Self::in_memory(CHANNEL_BUFFER);

        let handle = tokio::spawn(async move {
            run_writer_loop(&mut writer, rx).await;
        });

        Ok((sink, handle))
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A sink backed by a plain channel; the caller owns the receiving end.
    pub fn in_memory(capacity: usize) -> (Self, mpsc::Receiver<EventEntry>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sink = Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Submit an entry without waiting.
    pub fn record(&self, entry: EventEntry) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(kind = ?entry.kind, dropped = total, "event buffer full, entry dropped");
            }
            Err(TrySendError::Closed(entry)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind = ?entry.kind, "event writer gone, entry dropped");
            }
        }
    }

    /// Number of entries dropped so far across all clones.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_writer_loop(writer: &mut EventWriter, mut rx: mpsc::Receiver<EventEntry>) {
    let mut dirty = false;

    loop {
        match tokio::time::timeout(FLUSH_INTERVAL, rx.recv()).await {
            Ok(Some(entry)) => match writer.write(&entry).await {
                Ok(()) => dirty = true,
                Err(err) => tracing::error!(%err, "failed to write event"),
            },
            Ok(None) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "failed to flush event log on shutdown");
                    }
                }
                tracing::debug!("event writer task shutting down");
                return;
            }
            Err(_) if dirty => match writer.flush().await {
                Ok(()) => dirty = false,
                Err(err) => tracing::error!(%err, "periodic event log flush failed"),
            },
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EventKind, EventSource};

    fn entry(kind: EventKind) -> EventEntry {
        EventEntry::new(kind, EventSource::new("test"), serde_json::json!({}))
    }

    #[test]
    fn disabled_sink_accepts_and_discards() {
        let sink = EventSink::disabled();
        assert!(!sink.is_enabled());
        sink.record(entry(EventKind::RelayStarted));
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn full_buffer_counts_drops() {
        let (sink, mut rx) = EventSink::in_memory(1);
        sink.record(entry(EventKind::ConnectionOpened));
        sink.record(entry(EventKind::ConnectionClosed));

        assert_eq!(sink.dropped(), 1);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::ConnectionOpened);
    }

    #[tokio::test]
    async fn writer_task_flushes_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let (sink, handle) = EventSink::start(&path).await.unwrap();
        sink.record(entry(EventKind::RelayStarted));
        sink.record(entry(EventKind::RelayStopped));
        drop(sink);
        handle.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let kinds: Vec<EventKind> = contents
            .lines()
            .map(|line| serde_json::from_str::<EventEntry>(line).unwrap().kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::RelayStarted, EventKind::RelayStopped]);
    }
}
