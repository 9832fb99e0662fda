use std::time::Duration;

/// Default cap on a buffered response body (50,000,000 bytes).
///
/// Applies only to buffered `send()`; streaming responses are never capped.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 50_000_000;

/// `Accept-Encoding` value injected by [`RequestBuilder::compress`](crate::RequestBuilder::compress)
pub const DEFAULT_ACCEPT_ENCODING: &str = "gzip, deflate";

/// Overall HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum accumulated response size in buffered mode
    /// (default: [`DEFAULT_MAX_BUFFER_BYTES`])
    ///
    /// Once the buffered body grows past this value the connection is torn
    /// down and `send()` fails with `HttpError::BodyTooLarge`.
    pub max_buffer_bytes: usize,

    /// Inactivity timeout for requests that do not call
    /// [`RequestBuilder::timeout`](crate::RequestBuilder::timeout) (default: None)
    pub default_timeout: Option<Duration>,

    /// Allow HTTP/2 when the server negotiates it via ALPN (default: true)
    pub http2: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            default_timeout: None,
            http2: true,
        }
    }
}

impl HttpClientConfig {
    /// Create configuration for testing with mock servers
    ///
    /// Small buffer cap (1 MB) and a 10 second default timeout so a broken
    /// mock never hangs a test run.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_buffer_bytes: 1024 * 1024,
            default_timeout: Some(Duration::from_secs(10)),
            http2: false,
        }
    }
}
