use std::path::Path;

use tokio::io::{AsyncWriteExt, BufWriter};

use crate::entry::EventEntry;

/// Errors raised while persisting events.
#[derive(Debug, thiserror::Error)]
pub enum EventWriteError {
    #[error("failed to create event log directory: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open event log file: {0}")]
    OpenFile(std::io::Error),

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write event: {0}")]
    Write(std::io::Error),

    #[error("failed to flush event log: {0}")]
    Flush(std::io::Error),
}

/// Buffered append-only writer producing one JSON object per line.
pub struct EventWriter {
    out: BufWriter<tokio::fs::File>,
}

impl EventWriter {
    /// Open `path` for appending, creating it and any missing parent
    /// directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EventWriteError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(EventWriteError::CreateDir)?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(EventWriteError::OpenFile)?;

        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub async fn write(&mut self, entry: &EventEntry) -> Result<(), EventWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        self.out
            .write_all(&line)
            .await
            .map_err(EventWriteError::Write)
    }

    pub async fn flush(&mut self) -> Result<(), EventWriteError> {
        self.out.flush().await.map_err(EventWriteError::Flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EventKind, EventSource};

    #[tokio::test]
    async fn writes_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");

        let mut writer = EventWriter::open(&path).await.unwrap();
        for kind in [EventKind::RelayStarted, EventKind::RelayStopped] {
            let entry = EventEntry::new(kind, EventSource::new("test"), serde_json::json!({}));
            writer.write(&entry).await.unwrap();
        }
        writer.flush().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: EventEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.kind, EventKind::RelayStarted);
    }

    #[tokio::test]
    async fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        for _ in 0..2 {
            let mut writer = EventWriter::open(&path).await.unwrap();
            let entry = EventEntry::new(
                EventKind::ListenerBound,
                EventSource::new("test"),
                serde_json::json!({ "port": 8554 }),
            );
            writer.write(&entry).await.unwrap();
            writer.flush().await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
