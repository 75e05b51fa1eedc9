use std::env;

use mediagate_service::config::{Config, LogFormat};
use mediagate_service::logging::init_json_logging;
use sentry::integrations::tracing::EventFilter;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// The default filter for the configured level.
///
/// Below `DEBUG`, the chatty HTTP and AWS internals are only shown when something goes wrong.
fn get_rust_log(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => {
            "WARN,\
             aws_config=ERROR,\
             aws_smithy_runtime=ERROR"
        }
        LevelFilter::INFO => {
            "INFO,\
             aws_config=WARN,\
             aws_smithy_runtime=WARN,\
             hyper=WARN"
        }
        LevelFilter::DEBUG => {
            "INFO,\
             hyper=WARN,\
             mediagate=DEBUG,\
             mediagate_service=DEBUG"
        }
        LevelFilter::TRACE => {
            "INFO,\
             mediagate=TRACE,\
             mediagate_service=TRACE,\
             tower_http=TRACE"
        }
    }
}

/// The filter directives in effect, `RUST_LOG` taking precedence over the configured level.
fn rust_log(config: &Config) -> String {
    env::var("RUST_LOG").unwrap_or_else(|_| get_rust_log(config.logging.level).to_owned())
}

/// Forwards errors to Sentry as events, and everything at or above INFO as logs.
fn sentry_layer<S>() -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    sentry::integrations::tracing::layer().event_filter(|md| match *md.level() {
        tracing::Level::ERROR => EventFilter::Event | EventFilter::Log,
        tracing::Level::WARN | tracing::Level::INFO => EventFilter::Log,
        tracing::Level::DEBUG | tracing::Level::TRACE => EventFilter::Ignore,
    })
}

/// Initializes logging for the gateway.
///
/// This considers the `RUST_LOG` environment variable and defaults it to the level specified in the
/// configuration. Additionally, this toggles `RUST_BACKTRACE` based on the `enable_backtraces`
/// config value.
///
/// # Safety
/// This function uses [`std::env::set_var`] to modify the environment. That function is only safe
/// to call in single-threaded contexts to prevent unsynchronized concurrent access to the environment.
pub unsafe fn init_logging(config: &Config) {
    if config.logging.enable_backtraces {
        // SAFETY: As documented, this function may only be called in a single-threaded context.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let rust_log = rust_log(config);
    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true);

    let fmt_layer = match (config.logging.format, console::user_attended()) {
        (LogFormat::Json, _) => return init_json_logging(&rust_log, std::io::stdout),
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => layer.pretty().boxed(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            layer.compact().with_ansi(false).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(EnvFilter::new(&rust_log)))
        .with(sentry_layer())
        .init();
}

/// Logs an error to the configured logger or `stderr` if not yet configured.
pub fn ensure_log_error(error: &anyhow::Error) {
    if tracing::Level::ERROR <= tracing::level_filters::STATIC_MAX_LEVEL
        && tracing::Level::ERROR <= LevelFilter::current()
    {
        tracing::error!("{:?}", error);
    } else {
        eprintln!("{error:?}");
    }
}
