use crate::builder::HttpClientBuilder;
use crate::error::HttpError;
use crate::request::RequestBuilder;
use crate::stream::ResponseBody;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::sync::OnceLock;
use std::time::Duration;
use tower::util::BoxCloneSyncService;

/// Type-erased transport stack shared by every request of a client.
pub type TransportService =
    BoxCloneSyncService<Request<Full<Bytes>>, Response<ResponseBody>, HttpError>;

/// Client used by the free [`request`](crate::request) function.
static SHARED_CLIENT: OnceLock<HttpClient> = OnceLock::new();

/// HTTP client over a pooled hyper connection stack
///
/// Holds the connection pool and TLS configuration; every request builder it
/// hands out shares them. Use [`HttpClientBuilder`] to change the buffer
/// limit, the default timeout or HTTP/2 negotiation.
///
/// # Thread Safety
///
/// `HttpClient` is `Clone + Send + Sync`. Cloning is cheap and clones share
/// the connection pool, so store the client directly instead of wrapping it
/// in a `Mutex`.
///
/// # Example
///
/// ```ignore
/// struct PostsApi {
///     http: HttpClient,
/// }
///
/// impl PostsApi {
///     async fn post(&self, id: u32) -> Result<Option<Post>, HttpError> {
///         let resp = self
///             .http
///             .get("https://jsonplaceholder.typicode.com/posts")
///             .path(&id.to_string())
///             .send()
///             .await?;
///         resp.into_buffered().map_or(Ok(None), |acc| acc.json())
///     }
/// }
/// ```
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: TransportService,
    pub(crate) max_buffer_bytes: usize,
    pub(crate) default_timeout: Option<Duration>,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    /// Create a builder for configuring the HTTP client
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Process-wide client with default configuration, built on first use.
    ///
    /// # Errors
    /// Returns an error if the first build fails TLS initialization
    pub fn shared() -> Result<Self, HttpError> {
        if let Some(client) = SHARED_CLIENT.get() {
            return Ok(client.clone());
        }
        let client = HttpClient::new()?;
        Ok(SHARED_CLIENT.get_or_init(|| client).clone())
    }

    /// Create a request builder for an arbitrary method
    ///
    /// The URL must be absolute. Parse failures are reported by
    /// [`RequestBuilder::send`]; the scheme must be `http` or `https`.
    pub fn request(&self, method: http::Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(
            self.service.clone(),
            self.max_buffer_bytes,
            self.default_timeout,
            method,
            url,
        )
    }

    /// Create a GET request builder
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::GET, url)
    }

    /// Create a POST request builder
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::POST, url)
    }

    /// Create a PUT request builder
    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::PUT, url)
    }

    /// Create a PATCH request builder
    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::PATCH, url)
    }

    /// Create a DELETE request builder
    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::DELETE, url)
    }

    /// Create a HEAD request builder
    pub fn head(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::HEAD, url)
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("max_buffer_bytes", &self.max_buffer_bytes)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}
