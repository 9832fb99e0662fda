#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Fluent HTTP/HTTPS client for `ModKit`
//!
//! This crate provides a hyper-based request builder with:
//! - Chained URL construction (`path`, `query`)
//! - Request bodies encoded as JSON, form data or raw bytes
//! - Buffered responses capped at [`DEFAULT_MAX_BUFFER_BYTES`]
//! - Streaming responses with no cap
//! - Opt-in `gzip` / `deflate` response decoding
//! - A per-request inactivity timeout
//!
//! Both `http` and `https` URLs are accepted; TLS uses rustls with the
//! webpki root store. Every HTTP status is a normal response: only
//! transport failures, timeouts, the buffer limit and configuration errors
//! are reported as [`HttpError`].
//!
//! # Buffered example
//!
//! ```ignore
//! use modkit_fetch::request;
//! use serde_json::{Value, json};
//!
//! let resp = request("post", "https://jsonplaceholder.typicode.com/posts")?
//!     .body(json!({"title": "foo", "body": "bar", "userId": 1}))
//!     .send()
//!     .await?;
//!
//! let acc = resp.into_buffered().expect("buffered mode");
//! let created: Option<Value> = acc.json()?;
//! ```
//!
//! # Streaming example
//!
//! ```ignore
//! use modkit_fetch::HttpClient;
//! use std::time::Duration;
//!
//! let client = HttpClient::new()?;
//! let mut stream = client
//!     .get("https://example.com/export.ndjson")
//!     .compress()
//!     .stream()
//!     .timeout(Duration::from_secs(10))
//!     .send()
//!     .await?
//!     .into_stream()
//!     .expect("stream mode");
//!
//! while let Some(chunk) = stream.chunk().await? {
//!     handle(&chunk);
//! }
//! ```

mod body;
mod builder;
mod client;
mod config;
mod decompress;
mod error;
mod layers;
mod request;
mod response;
mod stream;

pub use body::{BodyEncoding, Payload};
pub use builder::HttpClientBuilder;
pub use client::{HttpClient, TransportService};
pub use config::{DEFAULT_ACCEPT_ENCODING, DEFAULT_MAX_BUFFER_BYTES, HttpClientConfig};
pub use decompress::{ContentCoding, DECODE_PIECE_BYTES, DecompressBody};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{RequestSpanLayer, RequestSpanService};
pub use request::RequestBuilder;
pub use response::{HttpResponse, ResponseAccumulator};
pub use stream::{ResponseBody, ResponseStream};

/// Start a request on the process-wide shared client.
///
/// `method` is case-insensitive (`"get"`, `"Post"`, ...) and may be any valid
/// method token. The URL is parsed here, but any parse error is only returned
/// by [`RequestBuilder::send`].
///
/// # Errors
///
/// Returns `HttpError::InvalidMethod` for a token that is not a valid HTTP
/// method, or `HttpError::Tls` if the shared client cannot be built.
pub fn request(method: &str, url: &str) -> Result<RequestBuilder, HttpError> {
    let method = http::Method::from_bytes(method.to_ascii_uppercase().as_bytes())?;
    Ok(HttpClient::shared()?.request(method, url))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_lowercase_method() {
        assert!(request("get", "https://example.com").is_ok());
        assert!(request("Patch", "https://example.com").is_ok());
    }

    #[test]
    fn test_request_rejects_invalid_method_token() {
        let result = request("GE T", "https://example.com");
        assert!(matches!(result, Err(HttpError::InvalidMethod(_))));
    }
}
