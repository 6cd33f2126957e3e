//! Radar gateway server entry point.
//!
//! Accepts TCP connections from radar sensors, keeps one session per
//! registered device, answers heartbeats and registration, and fans every
//! protocol event out to observers.
//!
//! # Usage
//!
//! ```text
//! radar-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>        TOML config file [default: platform config dir]
//!   --bind <IP>            Listen address (overrides server.bind_address)
//!   --port <PORT>          Listen port (overrides server.port)
//!   --idle-timeout <SECS>  Read-inactivity window (overrides server.idle_timeout_secs)
//!   --log-level <LEVEL>    Level used when RUST_LOG is unset
//!   --print-events         Stream events to stdout as JSON lines
//! ```
//!
//! Every option can also be set through the `RADAR_*` variable shown in
//! `--help`.  CLI arguments win over the environment, which wins over the
//! config file.
//!
//! # Startup
//!
//! ```text
//! main()
//!  ├─ load config, apply CLI overrides
//!  ├─ ServerContext::new()          -- registries, correlator, cache, events
//!  ├─ correlator sweeper            -- purges expired pending requests
//!  ├─ JSON event printer (optional)
//!  └─ run_server()                  -- until Ctrl-C clears the running flag
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use radar_server::application::context::ServerContext;
use radar_server::application::events::EventFilter;
use radar_server::infrastructure::event_log::JsonLinesListener;
use radar_server::infrastructure::network::{bind, run_server};
use radar_server::infrastructure::storage::config::{load_config, AppConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// TCP gateway for radar sensors.
#[derive(Debug, Parser)]
#[command(
    name = "radar-server",
    about = "Telemetry and control gateway for radar sensors",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "RADAR_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to listen on.
    #[arg(long, env = "RADAR_BIND")]
    bind: Option<String>,

    /// TCP port devices connect to.
    #[arg(long, env = "RADAR_PORT")]
    port: Option<u16>,

    /// Seconds without a frame before a device connection is dropped.
    #[arg(long, env = "RADAR_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "RADAR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write every server event to stdout as one JSON object per line.
    #[arg(long, env = "RADAR_PRINT_EVENTS")]
    print_events: bool,
}

impl Cli {
    /// Loads the config file and applies the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed.
    fn into_app_config(self) -> anyhow::Result<AppConfig> {
        let mut cfg = load_config(self.config.as_deref()).with_context(|| match &self.config {
            Some(path) => format!("failed to load config from {}", path.display()),
            None => "failed to load config from the default location".to_string(),
        })?;

        if let Some(bind) = self.bind {
            cfg.server.bind_address = bind;
        }
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(secs) = self.idle_timeout {
            cfg.server.idle_timeout_secs = secs;
        }
        if let Some(level) = self.log_level {
            cfg.logging.log_level = level;
        }
        Ok(cfg)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let print_events = cli.print_events;
    let cfg = cli.into_app_config()?;

    // `RUST_LOG` wins; otherwise the configured level.  Logs go to stderr so
    // stdout stays clean for `--print-events`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let addr = cfg.listen_addr()?;
    info!("radar server starting on {addr}");

    let ctx = ServerContext::new(cfg.to_engine_settings());
    let sweeper = ctx.correlator.spawn_sweeper(ctx.settings.response_timeout);

    if print_events {
        let printer = Arc::new(JsonLinesListener::new(std::io::stdout()));
        ctx.events.spawn_listener(EventFilter::ALL, printer);
    }

    let listener = bind(addr).await?;

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_server(listener, Arc::clone(&ctx), cfg.to_connection_options(), running).await?;

    sweeper.abort();
    info!("radar server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
