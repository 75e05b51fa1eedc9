use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{Method, Request, Response, StatusCode};
use mediagate_service::metric;
use tower_layer::Layer;
use tower_service::Service as TowerService;

/// Records the duration and the status code of every request.
#[derive(Clone, Debug)]
pub struct MetricsLayer;

#[derive(Clone, Debug)]
pub struct MetricsService<S> {
    service: S,
}

pub struct MetricsFuture<F> {
    start: Instant,
    method: Method,
    future: Pin<Box<F>>,
}

impl<F> std::fmt::Debug for MetricsFuture<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsFuture")
            .field("start", &self.start)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl<F, B, E> Future for MetricsFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let poll = self.future.as_mut().poll(cx);
        if let Poll::Ready(ref res) = poll {
            let status = res
                .as_ref()
                .map(|r| r.status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            metric!(
                timer("requests.duration") = self.start.elapsed(),
                "method" => self.method.as_str(),
            );
            metric!(
                counter("responses.status_code") += 1,
                "status" => status.as_str(),
            );
        }
        poll
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, service: S) -> Self::Service {
        Self::Service { service }
    }
}

impl<S, B, ResBody> TowerService<Request<B>> for MetricsService<S>
where
    S: TowerService<Request<B>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = MetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        Self::Future {
            start: Instant::now(),
            method: request.method().clone(),
            future: Box::pin(self.service.call(request)),
        }
    }
}
