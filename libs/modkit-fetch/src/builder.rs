use crate::client::{HttpClient, TransportService};
use crate::config::HttpClientConfig;
use crate::error::HttpError;
use crate::layers::RequestSpanLayer;
use crate::stream::ResponseBody;
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower::util::BoxCloneSyncService;

/// Builder for constructing an [`HttpClient`] over a layered tower stack.
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self { config }
    }

    /// Set the buffered response limit in bytes
    #[must_use]
    pub fn max_buffer_bytes(mut self, limit: usize) -> Self {
        self.config.max_buffer_bytes = limit;
        self
    }

    /// Set the timeout used by requests that do not set their own
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    /// Restrict connections to HTTP/1.1
    #[must_use]
    pub fn http1_only(mut self) -> Self {
        self.config.http2 = false;
        self
    }

    /// Build the HTTP client
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn build(self) -> Result<HttpClient, HttpError> {
        let https = build_https_connector(self.config.http2)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_timer is required for idle pooled connections to expire
        client_builder.pool_timer(TokioTimer::new());
        let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

        // Request flow (outer -> inner):
        //   RequestSpan -> ErrorMapping -> BodyBoxing -> hyper_client
        //
        // Decompression and the inactivity timeout are per-request options,
        // so they are applied by RequestBuilder::send around the body.
        let service = ServiceBuilder::new()
            .layer(RequestSpanLayer::new())
            .map_err(HttpError::from)
            .map_response(box_response_body)
            .service(hyper_client);

        let service: TransportService = BoxCloneSyncService::new(service);

        tracing::debug!(
            max_buffer_bytes = self.config.max_buffer_bytes,
            default_timeout = ?self.config.default_timeout,
            http2 = self.config.http2,
            "http client built"
        );

        Ok(HttpClient {
            service,
            max_buffer_bytes: self.config.max_buffer_bytes,
            default_timeout: self.config.default_timeout,
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Box the transport body, mapping its errors to `HttpError`.
fn box_response_body(response: Response<Incoming>) -> Response<ResponseBody> {
    let (parts, body) = response.into_parts();
    let boxed: ResponseBody = body.map_err(HttpError::from).boxed();
    Response::from_parts(parts, boxed)
}

/// Build the connector for `http` and `https` URLs.
///
/// Uses the process-wide rustls crypto provider when one is installed and
/// aws-lc-rs otherwise, with the webpki root store. With `http2` enabled ALPN
/// advertises both h2 and http/1.1.
fn build_https_connector(http2: bool) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(provider)
        // rustls::Error implements Error + Send + Sync
        .map_err(|e| HttpError::Tls(Box::new(e)))?
        .https_or_http();

    let connector = if http2 {
        builder.enable_all_versions().build()
    } else {
        builder.enable_http1().build()
    };
    Ok(connector)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_BUFFER_BYTES;

    #[test]
    fn test_builder_default() {
        let builder = HttpClientBuilder::new();
        assert_eq!(builder.config.max_buffer_bytes, DEFAULT_MAX_BUFFER_BYTES);
        assert_eq!(builder.config.default_timeout, None);
        assert!(builder.config.http2);
    }

    #[test]
    fn test_builder_setters() {
        let builder = HttpClientBuilder::new()
            .max_buffer_bytes(1024)
            .default_timeout(Duration::from_secs(5))
            .http1_only();
        assert_eq!(builder.config.max_buffer_bytes, 1024);
        assert_eq!(builder.config.default_timeout, Some(Duration::from_secs(5)));
        assert!(!builder.config.http2);
    }

    #[test]
    fn test_builder_with_config() {
        let builder = HttpClientBuilder::with_config(HttpClientConfig::for_testing());
        assert_eq!(builder.config.max_buffer_bytes, 1024 * 1024);
    }

    #[test]
    fn test_builder_build() {
        let client = HttpClientBuilder::new().max_buffer_bytes(10).build().unwrap();
        assert_eq!(client.max_buffer_bytes, 10);
    }

    #[test]
    fn test_builder_build_http1_only() {
        let client = HttpClientBuilder::new().http1_only().build();
        assert!(client.is_ok());
    }
}
