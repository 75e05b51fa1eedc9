//! Exposes the command line application.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mediagate_service::config::Config;
use mediagate_service::metrics;

use crate::healthcheck;
use crate::logging;
use crate::server;

/// mediagate commands.
#[derive(Subcommand)]
enum Command {
    /// Run the web server.
    Run,

    /// Check the health of a running instance.
    Healthcheck {
        /// Address of the instance. Defaults to the configured bind address.
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Request timeout in seconds.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

/// Command line interface parser.
#[derive(Parser)]
#[command(name = "mediagate", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();

    // Settings may be kept in a `.env` file next to the binary during development.
    let dotenv = match dotenvy::dotenv() {
        Ok(path) => Some(path),
        Err(err) if err.not_found() => None,
        Err(err) => return Err(err).context("failed to load .env file"),
    };

    let config = Config::load(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        session_mode: sentry::SessionMode::Request,
        auto_session_tracking: false,
        ..Default::default()
    });

    // SAFETY: We are still single-threaded, no runtime has been started yet.
    unsafe { logging::init_logging(&config) };

    if let Some(path) = dotenv {
        tracing::debug!(?path, "Loaded environment from file");
    }

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone() {
            if let Some(name) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(tag, name);
            }
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
        Command::Healthcheck { addr, timeout } => {
            healthcheck::healthcheck(config, addr, timeout)?
        }
    }

    Ok(())
}
