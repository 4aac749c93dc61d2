use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rtsp-bridge",
    version,
    about = "Expose private RTSP cameras on the bridge's own address"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Address to bind channel listeners on (overrides config file setting)
    #[arg(long)]
    pub bind_host: Option<IpAddr>,

    /// Host clients use to reach the bridge (overrides config file setting)
    #[arg(long)]
    pub external_host: Option<String>,

    /// Log level filter, e.g. "info" or "rtsp_relay=debug" (RUST_LOG wins)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Validate the configuration, print the channel table and exit
    #[arg(long)]
    pub check: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["rtsp-bridge"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
        assert!(cli.bind_host.is_none());
        assert!(!cli.check);
    }

    #[test]
    fn overrides() {
        let cli = Cli::try_parse_from([
            "rtsp-bridge",
            "-c",
            "/etc/rtsp-bridge.yaml",
            "--bind-host",
            "192.168.2.183",
            "--external-host",
            "cams.example.net",
            "--check",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/rtsp-bridge.yaml"));
        assert_eq!(cli.bind_host, Some("192.168.2.183".parse().unwrap()));
        assert_eq!(cli.external_host.as_deref(), Some("cams.example.net"));
        assert!(cli.check);
    }

    #[test]
    fn rejects_bad_bind_host() {
        assert!(Cli::try_parse_from(["rtsp-bridge", "--bind-host", "not-an-ip"]).is_err());
    }
}
