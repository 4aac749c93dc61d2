use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rtsp_relay::{ChannelConfig, ExternalHost, FrameLimits, RelayConfig, RelaySettings, RewritePolicy};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub relay: RelayTuning,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: IpAddr,
    #[serde(default)]
    pub external_host: ExternalHost,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            external_host: ExternalHost::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RelayTuning {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Zero or absent disables the idle timeout.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_true")]
    pub rewrite_requests: bool,
    #[serde(default = "default_true")]
    pub rewrite_responses: bool,
}

impl Default for RelayTuning {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: None,
            max_header_bytes: default_max_header_bytes(),
            max_body_bytes: default_max_body_bytes(),
            rewrite_requests: default_true(),
            rewrite_responses: default_true(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// JSON-lines event log. No path, no event log.
    #[serde(default)]
    pub event_log_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            event_log_path: None,
        }
    }
}

fn default_bind_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_max_header_bytes() -> usize {
    FrameLimits::default().max_header_bytes
}

fn default_max_body_bytes() -> usize {
    FrameLimits::default().max_body_bytes
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

impl Config {
    /// Parse a YAML document.
    pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
        serde_yml::from_str(contents).context("invalid configuration")
    }

    /// Relay configuration as the listener set consumes it.
    pub fn to_relay_config(&self) -> RelayConfig {
        let relay = &self.relay;
        RelayConfig {
            bind_host: self.bridge.bind_host,
            channels: self.channels.clone(),
            settings: RelaySettings {
                external_host: self.bridge.external_host.clone(),
                connect_timeout: Duration::from_secs(relay.connect_timeout_secs),
                idle_timeout: relay
                    .idle_timeout_secs
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs),
                limits: FrameLimits {
                    max_header_bytes: relay.max_header_bytes,
                    max_body_bytes: relay.max_body_bytes,
                },
                rewrite: RewritePolicy {
                    requests: relay.rewrite_requests,
                    responses: relay.rewrite_responses,
                },
            },
        }
    }
}

/// Load configuration from a YAML file. The file must exist: without a
/// channel table there is nothing to serve.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    Config::from_yaml(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
bridge:
  bind_host: 192.168.2.183
  external_host:
    fixed: 192.168.2.183
relay:
  connect_timeout_secs: 2
  idle_timeout_secs: 30
  max_header_bytes: 8192
  rewrite_requests: false
logging:
  level: debug
  format: text
  event_log_path: /var/log/rtsp-bridge/events.jsonl
channels:
  - name: CH01
    external_port: 8554
    internal_host: 10.10.1.110
    internal_port: 554
  - name: CH02
    external_port: 8555
    internal_host: 10.10.1.111
    internal_port: 554
"#;

    #[test]
    fn parses_every_section() {
        let config = Config::from_yaml(FULL).unwrap();

        assert_eq!(config.bridge.bind_host.to_string(), "192.168.2.183");
        assert_eq!(
            config.bridge.external_host,
            ExternalHost::Fixed("192.168.2.183".to_string())
        );
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[1].internal_addr(), "10.10.1.111:554");

        let relay = config.to_relay_config();
        relay.validate().unwrap();
        assert_eq!(relay.settings.connect_timeout, Duration::from_secs(2));
        assert_eq!(relay.settings.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(relay.settings.limits.max_header_bytes, 8192);
        assert_eq!(
            relay.settings.limits.max_body_bytes,
            FrameLimits::default().max_body_bytes
        );
        assert!(!relay.settings.rewrite.requests);
        assert!(relay.settings.rewrite.responses);
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = Config::from_yaml(
            "channels:\n  - {name: CH01, external_port: 8554, internal_host: cam1, internal_port: 554}\n",
        )
        .unwrap();

        assert_eq!(config.bridge.bind_host, default_bind_host());
        assert_eq!(config.bridge.external_host, ExternalHost::LocalInterface);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.logging.event_log_path.is_none());

        let relay = config.to_relay_config();
        assert_eq!(relay.settings.connect_timeout, Duration::from_secs(5));
        assert_eq!(relay.settings.idle_timeout, None);
        assert_eq!(relay.settings.rewrite, RewritePolicy::default());
    }

    #[test]
    fn zero_idle_timeout_disables_it() {
        let config = Config::from_yaml("relay:\n  idle_timeout_secs: 0\n").unwrap();
        assert_eq!(config.to_relay_config().settings.idle_timeout, None);
    }

    #[test]
    fn empty_channel_table_fails_validation() {
        let config = Config::from_yaml("bridge:\n  external_host: local_interface\n").unwrap();
        let err = config.to_relay_config().validate().unwrap_err();
        assert!(err.to_string().contains("no channels"), "unexpected error: {err}");
    }

    #[test]
    fn rejects_unknown_log_format() {
        let err = Config::from_yaml("logging:\n  format: xml\n").unwrap_err();
        assert!(format!("{err:#}").contains("xml"), "unexpected error: {err:#}");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load(Path::new("/nonexistent/rtsp-bridge.yaml")).unwrap_err();
        assert!(
            err.to_string().contains("failed to read config file"),
            "unexpected error: {err}"
        );
    }
}
