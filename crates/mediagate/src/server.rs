use std::net::SocketAddr;

use anyhow::{Context, Result};
use mediagate_service::config::Config;
use mediagate_service::metric;
use mediagate_service::services::MediaService;

use crate::endpoints;

/// Starts the services and the HTTP server based on the loaded config.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let io_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("mediagate-io")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("mediagate-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    let socket = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid bind address: {}", config.bind))?;

    let service = web_pool
        .block_on(MediaService::create(&config, io_pool.handle().to_owned()))
        .context("failed to create HTTP service state")?;

    let app = endpoints::create_app(service, config.static_dir.as_deref());
    let server = axum_server::bind(socket).serve(app.into_make_service());
    tracing::info!("Starting HTTP server on {}", socket);

    web_pool.block_on(server)?;
    tracing::info!("System shutdown complete");

    Ok(())
}
