//! mediagate.
//!
//! mediagate is a small web service that serves media files stored in an S3-compatible bucket.
//! Clients that do not ask for a specific file are redirected to a random one. Every file is
//! downloaded once into a local cache directory and served from there, with support for range
//! requests so that players can seek.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;

#[cfg(test)]
mod test;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
