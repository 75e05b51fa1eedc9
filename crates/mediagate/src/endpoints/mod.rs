use std::path::Path;

use axum::Router;
use axum::routing::get;
use mediagate_service::metric;
use mediagate_service::services::MediaService;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

mod error;
mod metrics;
mod range;
mod stream;

pub use error::ResponseError;
use metrics::MetricsLayer;
use stream::stream_media as stream;

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

/// Creates the router of the gateway.
///
/// Everything not handled by an endpoint is looked up in `static_dir`, if one is configured.
pub fn create_app(service: MediaService, static_dir: Option<&Path>) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(MetricsLayer)
        .layer(TraceLayer::new_for_http());

    let mut router = Router::new().route("/stream", get(stream).head(stream));
    if let Some(static_dir) = static_dir {
        tracing::info!(path = ?static_dir, "Serving static files");
        router = router.fallback_service(ServeDir::new(static_dir));
    }

    router
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use mediagate_service::test::MockStore;

    use crate::test::{self, Server};

    #[tokio::test]
    async fn test_healthcheck() {
        test::setup();
        let server = Server::start(Arc::new(MockStore::new())).await;

        let response = test::client()
            .get(server.url("/healthcheck"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_static_files() {
        test::setup();
        let static_dir = test::tempdir();
        std::fs::write(static_dir.path().join("index.html"), "<audio>").unwrap();

        let server =
            Server::start_with_static(Arc::new(MockStore::new()), Some(static_dir.path())).await;

        let response = test::client()
            .get(server.url("/index.html"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "<audio>");

        let response = test::client()
            .get(server.url("/missing.css"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_no_static_dir() {
        test::setup();
        let server = Server::start(Arc::new(MockStore::new())).await;

        let response = test::client()
            .get(server.url("/index.html"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
