mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use event_log::{EventEntry, EventKind, EventSink, EventSource};
use rtsp_relay::{ExternalHost, RelayConfig, RelayServer};

use crate::cli::Cli;
use crate::config::{LogFormat, LoggingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;

    if let Some(bind_host) = cli.bind_host {
        cfg.bridge.bind_host = bind_host;
    }
    if let Some(ref host) = cli.external_host {
        cfg.bridge.external_host = ExternalHost::Fixed(host.clone());
    }
    if let Some(ref level) = cli.log_level {
        cfg.logging.level = level.clone();
    }

    let relay_config = cfg.to_relay_config();
    relay_config
        .validate()
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;

    if cli.check {
        print_channel_table(&relay_config);
        return Ok(());
    }

    // 3. Init tracing-subscriber.
    init_tracing(&cfg.logging);

    info!(
        config_file = %cli.config.display(),
        bind_host = %relay_config.bind_host,
        external_host = ?relay_config.settings.external_host,
        channels = relay_config.channels.len(),
        "rtsp-bridge starting"
    );

    // 4. Start the event log, if one is configured.
    let (events, event_writer) = match &cfg.logging.event_log_path {
        Some(path) => {
            let (sink, handle) = EventSink::start(path)
                .await
                .with_context(|| format!("failed to start event log at {}", path.display()))?;
            (sink, Some(handle))
        }
        None => (EventSink::disabled(), None),
    };

    events.record(EventEntry::new(
        EventKind::RelayStarted,
        EventSource::new("rtsp-bridge"),
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "config_file": cli.config.display().to_string(),
            "channels": relay_config.channels.len(),
        }),
    ));

    // 5. Bind every channel before serving any of them.
    let server = RelayServer::bind(relay_config, events.clone())
        .await
        .context("failed to start channel listeners")?;

    // 6. Serve until ctrl-c or SIGTERM.
    let outcome = tokio::select! {
        () = server.run() => {
            warn!("all channel listeners stopped");
            Ok(())
        }
        result = shutdown_signal() => result,
    };

    info!("rtsp-bridge shutting down");

    events.record(EventEntry::new(
        EventKind::RelayStopped,
        EventSource::new("rtsp-bridge"),
        serde_json::json!({
            "events_dropped": events.dropped(),
            "error": outcome.as_ref().err().map(|err| format!("{err:#}")),
        }),
    ));

    // 7. Close the sink and let the writer flush what it has.
    drop(events);
    if let Some(handle) = event_writer {
        if let Err(err) = handle.await {
            warn!(%err, "event log writer task failed");
        }
    }

    outcome
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to register SIGTERM handler")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("received SIGINT (ctrl-c)");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        info!("received SIGINT (ctrl-c)");
    }

    Ok(())
}

fn print_channel_table(config: &RelayConfig) {
    println!("{:<12} {:<24} internal", "channel", "listen");
    for channel in &config.channels {
        println!(
            "{:<12} {:<24} {}",
            channel.name,
            config.listen_addr(channel).to_string(),
            channel.internal_addr()
        );
    }
    println!("{} channel(s) ok", config.channels.len());
}
