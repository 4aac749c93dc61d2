use serde::{Deserialize, Serialize};

/// A single structured event emitted by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub kind: EventKind,
    pub source: EventSource,
    pub details: serde_json::Value,
}

impl EventEntry {
    /// Create an entry stamped with a fresh UUID v4 and the current UTC time.
    pub fn new(kind: EventKind, source: EventSource, details: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            kind,
            source,
            details,
        }
    }
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RelayStarted,
    RelayStopped,
    ListenerBound,
    ConnectionOpened,
    ConnectionClosed,
    UpstreamConnectFailed,
    FrameRewritten,
    FramingError,
}

/// Where it happened: the emitting component plus, for per-connection
/// events, the channel and connection it belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSource {
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_addr: Option<String>,
}

impl EventSource {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ..Self::default()
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_connection(mut self, connection_id: u64, peer_addr: impl ToString) -> Self {
        self.connection_id = Some(connection_id);
        self.peer_addr = Some(peer_addr.to_string());
        self
    }
}
