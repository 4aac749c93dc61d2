use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use event_log::{EventEntry, EventKind, EventSink, EventSource};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::config::{ChannelConfig, RelayConfig, RelaySettings};
use crate::connection::Connection;
use crate::error::RelayError;

/// Pause after a failed accept, so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// One bound listener per configured channel.
///
/// Binding happens up front so that a port conflict is reported before any
/// connection is served. [`RelayServer::run`] then accepts on every channel
/// concurrently and hands each accepted socket to its own [`Connection`]
/// task.
pub struct RelayServer {
    listeners: Vec<ChannelListener>,
}

struct ChannelListener {
    channel: Arc<ChannelConfig>,
    listener: TcpListener,
    local_addr: SocketAddr,
    settings: Arc<RelaySettings>,
    events: EventSink,
    next_id: Arc<AtomicU64>,
}

impl RelayServer {
    /// Bind every channel's listening socket.
    pub async fn bind(config: RelayConfig, events: EventSink) -> Result<Self, RelayError> {
        let settings = Arc::new(config.settings.clone());
        let next_id = Arc::new(AtomicU64::new(1));
        let mut listeners = Vec::with_capacity(config.channels.len());

        for channel in &config.channels {
            let addr = config.listen_addr(channel);
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| RelayError::Bind {
                    channel: channel.name.clone(),
                    addr: addr.to_string(),
                    source,
                })?;
            let local_addr = listener.local_addr().map_err(|source| RelayError::Bind {
                channel: channel.name.clone(),
                addr: addr.to_string(),
                source,
            })?;

            tracing::info!(
                channel = %channel.name,
                listen = %local_addr,
                internal = %channel.internal_addr(),
                "{}: {} -> {}",
                channel.name,
                local_addr,
                channel.internal_addr()
            );

            events.record(EventEntry::new(
                EventKind::ListenerBound,
                EventSource::new("listener").with_channel(channel.name.clone()),
                serde_json::json!({
                    "listen_addr": local_addr.to_string(),
                    "internal_addr": channel.internal_addr(),
                }),
            ));

            listeners.push(ChannelListener {
                channel: Arc::new(channel.clone()),
                listener,
                local_addr,
                settings: Arc::clone(&settings),
                events: events.clone(),
                next_id: Arc::clone(&next_id),
            });
        }

        Ok(Self { listeners })
    }

    /// Bound address of each channel, in configuration order.
    pub fn local_addrs(&self) -> Vec<(String, SocketAddr)> {
        self.listeners
            .iter()
            .map(|l| (l.channel.name.clone(), l.local_addr))
            .collect()
    }

    /// Accept and relay on every channel. Runs until the future is dropped.
    ///
    /// Dropping it stops accepting; connections already handed off keep
    /// running in their own tasks.
    pub async fn run(self) {
        let mut set = JoinSet::new();
        for listener in self.listeners {
            set.spawn(listener.serve());
        }

        while let Some(result) = set.join_next().await {
            if let Err(err) = result {
                tracing::error!(%err, "channel listener task failed");
            }
        }
    }
}

impl ChannelListener {
    async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => self.dispatch(stream, peer_addr),
                Err(err) => {
                    tracing::warn!(channel = %self.channel.name, %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let local_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                tracing::warn!(
                    channel = %self.channel.name,
                    connection_id = id,
                    %peer_addr,
                    %err,
                    "accepted socket has no local address, dropping"
                );
                return;
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(connection_id = id, %err, "failed to set TCP_NODELAY");
        }

        let connection = Connection::accept(
            id,
            Arc::clone(&self.channel),
            Arc::clone(&self.settings),
            self.events.clone(),
            peer_addr,
            local_addr,
        );
        tokio::spawn(connection.serve(stream));
    }
}
