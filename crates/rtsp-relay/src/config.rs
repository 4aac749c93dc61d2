use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::frame::FrameLimits;

/// One proxied camera: where the bridge listens and where it forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelConfig {
    /// Display label used in logs and events.
    pub name: String,
    /// Port the bridge listens on for this channel.
    pub external_port: u16,
    /// Host of the camera on the private network.
    pub internal_host: String,
    pub internal_port: u16,
}

impl ChannelConfig {
    /// `host:port` of the camera as it appears inside RTSP messages.
    pub fn internal_addr(&self) -> String {
        join_host_port(&self.internal_host, self.internal_port)
    }
}

/// Where the externally visible host of a connection comes from.
///
/// Cameras embed their own address in responses; the bridge replaces it with
/// the address the client dialled. That address must be known exactly, so it
/// is either configured or read from the accepted socket, never guessed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalHost {
    /// Always use this host (e.g. the bridge's LAN address).
    Fixed(String),
    /// Use the local address the connection was accepted on.
    #[default]
    LocalInterface,
}

/// Which directions get their text messages rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewritePolicy {
    /// Client to camera: external address becomes the internal one.
    pub requests: bool,
    /// Camera to client: internal address becomes the external one.
    pub responses: bool,
}

impl Default for RewritePolicy {
    fn default() -> Self {
        Self {
            requests: true,
            responses: true,
        }
    }
}

/// Per-connection behaviour shared by every channel.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub external_host: ExternalHost,
    pub connect_timeout: Duration,
    /// Longest wait for more bytes before a direction is treated as closed.
    pub idle_timeout: Option<Duration>,
    pub limits: FrameLimits,
    pub rewrite: RewritePolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            external_host: ExternalHost::default(),
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            limits: FrameLimits::default(),
            rewrite: RewritePolicy::default(),
        }
    }
}

/// Everything the listener set needs to start serving.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_host: IpAddr,
    pub channels: Vec<ChannelConfig>,
    pub settings: RelaySettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            channels: Vec::new(),
            settings: RelaySettings::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no channels configured")]
    NoChannels,
    #[error("channel name must not be empty")]
    EmptyName,
    #[error("duplicate channel name '{0}'")]
    DuplicateName(String),
    #[error("channel '{0}': external port must be between 1 and 65535")]
    ZeroExternalPort(String),
    #[error("channel '{0}': internal port must be between 1 and 65535")]
    ZeroInternalPort(String),
    #[error("channel '{0}': internal host must not be empty")]
    EmptyInternalHost(String),
    #[error("channels '{first}' and '{second}' both listen on port {port}")]
    DuplicatePort {
        port: u16,
        first: String,
        second: String,
    },
    #[error("fixed external host must not be empty")]
    EmptyExternalHost,
    #[error("frame limits must be non-zero")]
    ZeroLimit,
}

impl RelayConfig {
    /// Check the channel table and settings for contradictions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }

        let mut names = HashSet::new();
        let mut ports: Vec<(u16, &str)> = Vec::new();

        for channel in &self.channels {
            let name = channel.name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if !names.insert(name) {
                return Err(ConfigError::DuplicateName(name.to_string()));
            }
            if channel.external_port == 0 {
                return Err(ConfigError::ZeroExternalPort(name.to_string()));
            }
            if channel.internal_port == 0 {
                return Err(ConfigError::ZeroInternalPort(name.to_string()));
            }
            if channel.internal_host.trim().is_empty() {
                return Err(ConfigError::EmptyInternalHost(name.to_string()));
            }
            if let Some((port, first)) = ports.iter().find(|(p, _)| *p == channel.external_port) {
                return Err(ConfigError::DuplicatePort {
                    port: *port,
                    first: first.to_string(),
                    second: name.to_string(),
                });
            }
            ports.push((channel.external_port, name));
        }

        if let ExternalHost::Fixed(host) = &self.settings.external_host {
            if host.trim().is_empty() {
                return Err(ConfigError::EmptyExternalHost);
            }
        }

        let limits = &self.settings.limits;
        if limits.max_header_bytes == 0 || limits.max_body_bytes == 0 {
            return Err(ConfigError::ZeroLimit);
        }

        Ok(())
    }

    /// Socket address a channel's listener binds to.
    pub fn listen_addr(&self, channel: &ChannelConfig) -> SocketAddr {
        SocketAddr::new(self.bind_host, channel.external_port)
    }
}

/// Format `host:port`, bracketing bare IPv6 literals.
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
