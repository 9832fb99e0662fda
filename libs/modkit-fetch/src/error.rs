use std::time::Duration;
use thiserror::Error;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
}

/// HTTP client error types
///
/// Configuration errors (`InvalidUri`, `InvalidScheme`, `InvalidMethod`, invalid
/// headers) are raised before any network I/O. In buffered mode every other
/// failure is returned from `send()`; in streaming mode failures after the
/// response head arrive through the [`ResponseStream`](crate::ResponseStream).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid HTTP method token
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(#[from] http::method::InvalidMethod),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// URL scheme other than `http` or `https`
    #[error("Bad URL protocol: '{scheme}' (only http and https are supported)")]
    InvalidScheme {
        /// The URL scheme that was rejected
        scheme: String,
    },

    /// No progress on the request within the configured timeout
    #[error("Timeout reached after {0:?}")]
    Timeout(Duration),

    /// Transport error (DNS, connection refused, reset, protocol error)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The server closed the connection before the response body completed
    #[error("Server aborted request")]
    Aborted(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Buffered response body grew past the buffer limit
    #[error(
        "Received a response which was longer than acceptable when buffering \
         ({actual} bytes, limit {limit} bytes)"
    )]
    BodyTooLarge { limit: usize, actual: usize },

    /// Compressed response body could not be decoded
    #[error("Failed to decompress response body: {0}")]
    Decompress(#[source] std::io::Error),

    /// JSON serialization or parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),
}

impl HttpError {
    /// Map an error raised while reading a response body.
    ///
    /// A connection that ends before the body is complete is reported as
    /// [`HttpError::Aborted`]; everything else is a transport error.
    pub(crate) fn from_body_error(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        if is_peer_abort(err.as_ref()) {
            HttpError::Aborted(err)
        } else {
            HttpError::Transport(err)
        }
    }
}

fn is_peer_abort(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(hyper_err) = e.downcast_ref::<hyper::Error>()
            && hyper_err.is_incomplete_message()
        {
            return true;
        }
        if let Some(io_err) = e.downcast_ref::<std::io::Error>()
            && matches!(
                io_err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            )
        {
            return true;
        }
        current = e.source();
    }
    false
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::from_body_error(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}
