use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use event_log::{EventEntry, EventKind, EventSink, EventSource};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::{ChannelConfig, RelaySettings};
use crate::error::RelayError;
use crate::pump::{Pump, PumpReport};
use crate::rewrite::{AddressPair, Direction};

/// Per-connection data shared by both pumps of a connection.
pub struct ConnectionContext {
    /// Process-unique id for log correlation.
    pub id: u64,
    pub channel: Arc<ChannelConfig>,
    /// Address of the connecting client.
    pub peer_addr: SocketAddr,
    pub addrs: AddressPair,
    pub events: EventSink,
}

impl ConnectionContext {
    pub(crate) fn event_source(&self, component: &str) -> EventSource {
        EventSource::new(component)
            .with_channel(self.channel.name.clone())
            .with_connection(self.id, self.peer_addr)
    }
}

/// Lifecycle of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepting,
    Connecting,
    Relaying,
    Closing,
    Closed,
}

/// How a connection ended.
#[derive(Debug)]
pub enum Closure {
    /// The camera could not be reached; nothing was relayed.
    UpstreamUnavailable(RelayError),
    /// One pump stopped and the other was cancelled. The report is from the
    /// pump that stopped first.
    Finished(PumpReport),
}

impl Closure {
    /// Side whose behaviour ended the connection.
    pub fn initiator(&self) -> &'static str {
        match self {
            Closure::UpstreamUnavailable(_) => "camera",
            Closure::Finished(report) => match report.direction {
                Direction::ToInternal => "client",
                Direction::ToExternal => "camera",
            },
        }
    }

    /// The error that ended the connection, if it did not end cleanly.
    pub fn error(&self) -> Option<&RelayError> {
        match self {
            Closure::UpstreamUnavailable(err) => Some(err),
            Closure::Finished(report) => report.result.as_ref().err(),
        }
    }
}

/// Supervisor for a single client connection and its camera connection.
pub struct Connection {
    ctx: ConnectionContext,
    settings: Arc<RelaySettings>,
    state: ConnectionState,
    opened_at: Instant,
}

impl Connection {
    /// Supervisor for an already-built context.
    pub fn new(ctx: ConnectionContext, settings: Arc<RelaySettings>) -> Self {
        Self {
            ctx,
            settings,
            state: ConnectionState::Accepting,
            opened_at: Instant::now(),
        }
    }

    /// Supervisor for a connection accepted on `local_addr`.
    pub fn accept(
        id: u64,
        channel: Arc<ChannelConfig>,
        settings: Arc<RelaySettings>,
        events: EventSink,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Self {
        let addrs = AddressPair::resolve(&settings.external_host, local_addr, &channel);
        let ctx = ConnectionContext {
            id,
            channel,
            peer_addr,
            addrs,
            events,
        };
        Self::new(ctx, settings)
    }

    /// Identity and addresses of this connection.
    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connect to the channel's camera and relay until either side stops.
    pub async fn serve<A>(mut self, mut inbound: A) -> Closure
    where
        A: AsyncRead + AsyncWrite + Unpin,
    {
        self.open();
        self.transition(ConnectionState::Connecting);

        let outbound = match self.connect().await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(
                    channel = %self.ctx.channel.name,
                    connection_id = self.ctx.id,
                    %err,
                    "camera unreachable"
                );
                self.ctx.events.record(EventEntry::new(
                    EventKind::UpstreamConnectFailed,
                    self.ctx.event_source("connection"),
                    serde_json::json!({
                        "internal_addr": self.ctx.addrs.internal(),
                        "error": err.to_string(),
                        "error_kind": err.kind(),
                    }),
                ));

                self.transition(ConnectionState::Closing);
                let _ = inbound.shutdown().await;
                drop(inbound);
                return self.finish(Closure::UpstreamUnavailable(err));
            }
        };

        self.relay_streams(inbound, outbound).await
    }

    /// Relay between two already-connected transports.
    pub async fn relay<A, B>(mut self, inbound: A, outbound: B) -> Closure
    where
        A: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        self.open();
        self.relay_streams(inbound, outbound).await
    }

    async fn relay_streams<A, B>(mut self, mut inbound: A, mut outbound: B) -> Closure
    where
        A: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        self.transition(ConnectionState::Relaying);

        let report = {
            let (client_read, client_write) = tokio::io::split(&mut inbound);
            let (camera_read, camera_write) = tokio::io::split(&mut outbound);

            let to_camera = Pump::new(
                client_read,
                camera_write,
                Direction::ToInternal,
                &self.ctx,
                &self.settings,
            )
            .run();
            let to_client = Pump::new(
                camera_read,
                client_write,
                Direction::ToExternal,
                &self.ctx,
                &self.settings,
            )
            .run();

            // The losing pump is dropped here, mid-read or mid-write.
            tokio::select! {
                report = to_camera => report,
                report = to_client => report,
            }
        };

        self.transition(ConnectionState::Closing);
        let _ = inbound.shutdown().await;
        let _ = outbound.shutdown().await;
        drop(inbound);
        drop(outbound);

        self.finish(Closure::Finished(report))
    }

    async fn connect(&self) -> Result<TcpStream, RelayError> {
        let channel = &self.ctx.channel;
        let addr = self.ctx.addrs.internal().to_string();
        let timeout = self.settings.connect_timeout;

        let connect = TcpStream::connect((channel.internal_host.as_str(), channel.internal_port));
        let stream = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(RelayError::Connect { addr, source }),
            Err(_) => {
                return Err(RelayError::ConnectTimeout {
                    addr,
                    timeout_ms: timeout.as_millis(),
                })
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(connection_id = self.ctx.id, %err, "failed to set TCP_NODELAY");
        }

        tracing::debug!(
            channel = %channel.name,
            connection_id = self.ctx.id,
            camera = %addr,
            "camera connected"
        );
        Ok(stream)
    }

    fn open(&mut self) {
        tracing::info!(
            channel = %self.ctx.channel.name,
            connection_id = self.ctx.id,
            peer_addr = %self.ctx.peer_addr,
            external = %self.ctx.addrs.external(),
            internal = %self.ctx.addrs.internal(),
            "client connected"
        );

        self.ctx.events.record(EventEntry::new(
            EventKind::ConnectionOpened,
            self.ctx.event_source("connection"),
            serde_json::json!({
                "external_addr": self.ctx.addrs.external(),
                "internal_addr": self.ctx.addrs.internal(),
            }),
        ));
    }

    fn finish(mut self, closure: Closure) -> Closure {
        self.transition(ConnectionState::Closed);

        let duration_ms = self.opened_at.elapsed().as_millis() as u64;
        let error = closure.error().map(|err| err.to_string());

        let mut details = serde_json::json!({
            "duration_ms": duration_ms,
            "initiator": closure.initiator(),
            "error": error,
            "error_kind": closure.error().map(RelayError::kind),
        });

        if let Closure::Finished(report) = &closure {
            details["direction"] = serde_json::json!(report.direction);
            details["stats"] = serde_json::json!(report.stats);
            if let Ok(end) = &report.result {
                details["end"] = serde_json::json!(end);
            }

            if let Err(err @ RelayError::Framing(_)) = &report.result {
                tracing::warn!(
                    channel = %self.ctx.channel.name,
                    connection_id = self.ctx.id,
                    direction = %report.direction,
                    %err,
                    "framing error, closing connection"
                );
                self.ctx.events.record(EventEntry::new(
                    EventKind::FramingError,
                    self.ctx.event_source("connection"),
                    serde_json::json!({
                        "direction": report.direction,
                        "error": err.to_string(),
                        "error_kind": err.kind(),
                    }),
                ));
            }
        }

        tracing::info!(
            channel = %self.ctx.channel.name,
            connection_id = self.ctx.id,
            duration_ms,
            initiator = closure.initiator(),
            error = error.as_deref().unwrap_or("none"),
            "connection closed"
        );

        self.ctx.events.record(EventEntry::new(
            EventKind::ConnectionClosed,
            self.ctx.event_source("connection"),
            details,
        ));

        closure
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::debug!(
            connection_id = self.ctx.id,
            from = ?self.state,
            to = ?next,
            "connection state"
        );
        self.state = next;
    }
}

#[cfg(test)]
pub(crate) fn test_context(events: EventSink) -> ConnectionContext {
    ConnectionContext {
        id: 1,
        channel: Arc::new(ChannelConfig {
            name: "CH01".to_string(),
            external_port: 8554,
            internal_host: "10.10.1.110".to_string(),
            internal_port: 554,
        }),
        peer_addr: "192.168.2.20:50000".parse().unwrap(),
        addrs: AddressPair::new("192.168.2.183:8554", "10.10.1.110:554"),
        events,
    }
}
