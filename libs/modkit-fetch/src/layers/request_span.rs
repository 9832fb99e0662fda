use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

/// Tower layer that wraps each outbound request in a tracing span
///
/// Creates an `outgoing_http` span with:
/// - `http.method`: The HTTP method
/// - `http.url`: Scheme, authority and path (the query string is left out)
///
/// Records `http.status_code` once the response head arrives and sets
/// `error=true` for 4xx/5xx statuses and transport failures.
#[derive(Clone, Default)]
pub struct RequestSpanLayer;

impl RequestSpanLayer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestSpanLayer {
    type Service = RequestSpanService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestSpanService { inner }
    }
}

/// Service produced by [`RequestSpanLayer`]
#[derive(Clone)]
pub struct RequestSpanService<S> {
    inner: S,
}

impl<S, ResBody> Service<Request<Full<Bytes>>> for RequestSpanService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: std::fmt::Display + Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        use tracing::{Instrument, Level};

        let method = req.method().clone();
        let uri = req.uri();
        let url_str = format!(
            "{}://{}{}",
            uri.scheme_str().unwrap_or("http"),
            uri.authority().map_or("", http::uri::Authority::as_str),
            uri.path()
        );

        // Call the instance that was poll_ready'd and keep a fresh clone
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let span = tracing::span!(
                Level::INFO, "outgoing_http",
                http.method = %method,
                http.url = %url_str,
                http.status_code = tracing::field::Empty,
                error = tracing::field::Empty,
            );

            let started = Instant::now();
            let result = inner.call(req).instrument(span.clone()).await;
            let elapsed_ms = started.elapsed().as_millis();

            match &result {
                Ok(response) => {
                    let status = response.status();
                    span.record("http.status_code", status.as_u16());
                    if status.is_client_error() || status.is_server_error() {
                        span.record("error", true);
                    }
                    tracing::debug!(
                        parent: &span,
                        status = status.as_u16(),
                        elapsed_ms,
                        "response head received"
                    );
                }
                Err(e) => {
                    span.record("error", true);
                    tracing::debug!(parent: &span, error = %e, elapsed_ms, "request failed");
                }
            }

            result
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use tower::ServiceExt;

    fn request(uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_response_passes_through() {
        let inner = tower::service_fn(|req: Request<Full<Bytes>>| async move {
            assert_eq!(req.uri().query(), Some("token=secret"));
            Ok::<_, HttpError>(Response::builder().status(503).body(()).unwrap())
        });

        let service = RequestSpanLayer::new().layer(inner);
        let response = service
            .oneshot(request("http://localhost/path?token=secret"))
            .await
            .unwrap();

        assert_eq!(response.status(), http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_error_passes_through() {
        let inner = tower::service_fn(|_req: Request<Full<Bytes>>| async move {
            Err::<Response<()>, _>(HttpError::Timeout(std::time::Duration::from_secs(1)))
        });

        let service = RequestSpanLayer::new().layer(inner);
        let result = service.oneshot(request("http://localhost/")).await;

        assert!(matches!(result, Err(HttpError::Timeout(_))));
    }
}
