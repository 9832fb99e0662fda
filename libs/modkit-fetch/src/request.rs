use crate::body::{EncodedBody, Payload};
use crate::client::TransportService;
use crate::config::DEFAULT_ACCEPT_ENCODING;
use crate::decompress::{ContentCoding, DecompressBody};
use crate::error::{HttpError, InvalidUriKind};
use crate::response::HttpResponse;
use crate::stream::ResponseStream;
use bytes::Bytes;
use http::header::{ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Request};
use http_body_util::{BodyExt, Full};
use std::time::Duration;
use tower::ServiceExt;
use url::Url;

/// HTTP request builder with fluent API
///
/// Created by [`HttpClient::get`](crate::HttpClient::get),
/// [`HttpClient::request`](crate::HttpClient::request) or the free
/// [`request`](crate::request) function. Every setter consumes and returns the
/// builder; nothing touches the network until [`send()`](RequestBuilder::send).
///
/// Setter failures (bad header name, body that cannot be serialized) are
/// captured and returned from `send()`, so chains never need intermediate `?`.
///
/// # Example
///
/// ```ignore
/// use modkit_fetch::HttpClient;
/// use serde_json::json;
///
/// let client = HttpClient::new()?;
///
/// // GET https://jsonplaceholder.typicode.com/posts/1?expand=user
/// let resp = client
///     .get("https://jsonplaceholder.typicode.com")
///     .path("posts")
///     .path("1")
///     .query("expand", "user")
///     .send()
///     .await?;
///
/// // POST with a JSON body (content-type and content-length are filled in)
/// let resp = client
///     .post("https://jsonplaceholder.typicode.com/posts")
///     .header("x-request-id", "123")
///     .body(json!({"title": "foo", "body": "bar", "userId": 1}))
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    service: TransportService,
    max_buffer_bytes: usize,
    method: http::Method,
    url: Option<Url>,
    headers: HeaderMap,
    body: Option<EncodedBody>,
    stream: bool,
    compress: bool,
    timeout: Option<Duration>,
    /// Error captured during building (deferred to `send()`)
    error: Option<HttpError>,
}

/// A request ready for the transport, with the per-request options it needs.
pub struct PreparedRequest {
    service: TransportService,
    request: Request<Full<Bytes>>,
    stream: bool,
    compress: bool,
    timeout: Option<Duration>,
    max_buffer_bytes: usize,
}

impl RequestBuilder {
    /// Create a new request builder (internal use only)
    pub(crate) fn new(
        service: TransportService,
        max_buffer_bytes: usize,
        default_timeout: Option<Duration>,
        method: http::Method,
        url: &str,
    ) -> Self {
        let (url, error) = match Url::parse(url) {
            Ok(parsed) => (Some(parsed), None),
            Err(e) => (
                None,
                Some(HttpError::InvalidUri {
                    url: url.to_owned(),
                    kind: InvalidUriKind::ParseError,
                    reason: e.to_string(),
                }),
            ),
        };

        Self {
            service,
            max_buffer_bytes,
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            stream: false,
            compress: false,
            timeout: default_timeout,
            error,
        }
    }

    /// Append a query parameter.
    ///
    /// Parameters accumulate in call order, and existing query parameters of
    /// the URL are kept. Repeating a key appends another pair.
    pub fn query(mut self, key: &str, value: &str) -> Self {
        if let Some(url) = self.url.as_mut() {
            url.query_pairs_mut().append_pair(key, value);
        }
        self
    }

    /// Append several query parameters in iteration order.
    pub fn query_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if let Some(url) = self.url.as_mut() {
            let mut serializer = url.query_pairs_mut();
            for (key, value) in pairs {
                serializer.append_pair(key.as_ref(), value.as_ref());
            }
        }
        self
    }

    /// Join a segment onto the URL path.
    ///
    /// The result is normalized like a POSIX path: empty and `.` segments
    /// disappear and `..` removes the previous segment. A trailing slash on
    /// `segment` is preserved.
    ///
    /// ```ignore
    /// client.get("https://api.example.com/v1/").path("users").path("42");
    /// // -> https://api.example.com/v1/users/42
    /// ```
    pub fn path(mut self, segment: &str) -> Self {
        if let Some(url) = self.url.as_mut() {
            let joined = join_path(url.path(), segment);
            url.set_path(&joined);
        }
        self
    }

    /// Set the request body.
    ///
    /// The encoding follows from the payload kind: bytes are sent as-is,
    /// structured values as JSON, text as an already URL-encoded form. Use
    /// [`body_as`](RequestBuilder::body_as) to choose the encoding explicitly.
    ///
    /// A later call replaces the earlier body.
    pub fn body(self, payload: impl Into<Payload>) -> Self {
        self.set_body(payload.into(), None)
    }

    /// Set the request body with an explicit encoding tag.
    ///
    /// Recognized tags (case-insensitive) are `json`, `form` and `buffer`.
    /// Any other tag sends the payload unchanged without a content type.
    pub fn body_as(self, payload: impl Into<Payload>, encoding: &str) -> Self {
        self.set_body(payload.into(), Some(encoding))
    }

    fn set_body(mut self, payload: Payload, hint: Option<&str>) -> Self {
        if self.error.is_some() {
            return self;
        }

        match EncodedBody::encode(payload, hint) {
            Ok(body) => self.body = Some(body),
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Set a single header.
    ///
    /// Names are case-insensitive and stored lowercased. Setting a name that
    /// is already present replaces the previous value.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let resp = client
    ///     .get("https://api.example.com")
    ///     .header("Authorization", "Bearer token")
    ///     .header("x-request-id", "abc123")
    ///     .send()
    ///     .await?;
    /// ```
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => {
                self.error = Some(HttpError::InvalidHeaderName(e));
            }
            (_, Err(e)) => {
                self.error = Some(HttpError::InvalidHeaderValue(e));
            }
        }
        self
    }

    /// Set several headers, with the same semantics as [`header`](RequestBuilder::header).
    ///
    /// # Example
    ///
    /// ```ignore
    /// let resp = client
    ///     .get("https://api.example.com")
    ///     .headers([("authorization", "Bearer token"), ("x-request-id", "abc123")])
    ///     .send()
    ///     .await?;
    /// ```
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self = self.header(name.as_ref(), value.as_ref());
        }
        self
    }

    /// Set the inactivity timeout for this request.
    ///
    /// The timer starts at `send()` and restarts whenever a body chunk
    /// arrives. When it fires the request is aborted with
    /// `HttpError::Timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Switch to streaming mode.
    ///
    /// `send()` then returns [`HttpResponse::Stream`] as soon as the response
    /// head arrives. The buffer limit does not apply.
    pub fn stream(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Enable transparent `gzip` / `deflate` response decoding.
    ///
    /// Sends `accept-encoding: gzip, deflate` unless an `accept-encoding`
    /// header was already set. Responses with any other content coding are
    /// delivered as received.
    pub fn compress(mut self) -> Self {
        self.compress = true;
        if !self.headers.contains_key(ACCEPT_ENCODING) {
            self.headers.insert(
                ACCEPT_ENCODING,
                HeaderValue::from_static(DEFAULT_ACCEPT_ENCODING),
            );
        }
        self
    }

    /// Validate the URL and assemble the transport request.
    ///
    /// Fails with a configuration error before any network I/O.
    pub(crate) fn prepare(mut self) -> Result<PreparedRequest, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let Some(mut url) = self.url.take() else {
            return Err(HttpError::InvalidUri {
                url: String::new(),
                kind: InvalidUriKind::ParseError,
                reason: "no URL".to_owned(),
            });
        };
        let uri = validate_url(&mut url)?;

        let body = match self.body {
            Some(body) => {
                if !self.headers.contains_key(CONTENT_TYPE)
                    && let Some(content_type) = body.encoding.content_type()
                {
                    self.headers
                        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
                if !self.headers.contains_key(CONTENT_LENGTH) {
                    self.headers
                        .insert(CONTENT_LENGTH, HeaderValue::from(body.bytes.len()));
                }
                body.bytes
            }
            None => Bytes::new(),
        };

        let mut request = Request::builder()
            .method(self.method)
            .uri(uri)
            .body(Full::new(body))?;
        *request.headers_mut() = self.headers;

        Ok(PreparedRequest {
            service: self.service,
            request,
            stream: self.stream,
            compress: self.compress,
            timeout: self.timeout,
            max_buffer_bytes: self.max_buffer_bytes,
        })
    }

    /// Send the request.
    ///
    /// In buffered mode the whole body is received (and decompressed when
    /// [`compress`](RequestBuilder::compress) was called) before this returns
    /// [`HttpResponse::Buffered`]. In streaming mode it returns
    /// [`HttpResponse::Stream`] once the response head arrives.
    ///
    /// Every HTTP status, including 4xx and 5xx, is a successful response.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` if:
    /// - A setter captured an error (invalid header, body serialization)
    /// - The URL is invalid or its scheme is not `http` / `https`
    /// - The connection fails (`Transport`, `Tls`)
    /// - No progress was made within the timeout (`Timeout`)
    /// - Buffered mode only: the body exceeds the buffer limit
    ///   (`BodyTooLarge`), the server closes early (`Aborted`) or the body
    ///   cannot be decompressed (`Decompress`)
    pub async fn send(self) -> Result<HttpResponse, HttpError> {
        let PreparedRequest {
            service,
            request,
            stream,
            compress,
            timeout,
            max_buffer_bytes,
        } = self.prepare()?;

        tracing::debug!(
            method = %request.method(),
            stream,
            compress,
            "sending request"
        );

        let call = service.oneshot(request);
        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_elapsed| HttpError::Timeout(limit))??,
            None => call.await?,
        };

        let (parts, body) = response.into_parts();
        let body = match ContentCoding::from_headers(&parts.headers) {
            Some(coding) if compress => {
                tracing::trace!(?coding, "decoding compressed response body");
                DecompressBody::new(body, coding).boxed()
            }
            _ => body,
        };

        let response_stream = ResponseStream::new(parts.status, parts.headers, body, timeout);
        if stream {
            return Ok(HttpResponse::Stream(response_stream));
        }

        let accumulator = response_stream.collect_limited(max_buffer_bytes).await?;
        tracing::debug!(
            status = accumulator.status().as_u16(),
            bytes = accumulator.len(),
            "response buffered"
        );
        Ok(HttpResponse::Buffered(accumulator))
    }
}

/// Check the scheme and host, strip the fragment and convert to an `http::Uri`.
fn validate_url(url: &mut Url) -> Result<http::Uri, HttpError> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(HttpError::InvalidScheme {
                scheme: other.to_owned(),
            });
        }
    }

    if !url.has_host() {
        return Err(HttpError::InvalidUri {
            url: url.to_string(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    // Fragments are never sent
    url.set_fragment(None);

    url.as_str()
        .parse()
        .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
            url: url.to_string(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })
}

/// Join `segment` onto `base` and normalize the result.
fn join_path(base: &str, segment: &str) -> String {
    if segment.is_empty() {
        return normalize_path(base);
    }
    if base.is_empty() {
        return normalize_path(segment);
    }
    normalize_path(&format!("{base}/{segment}"))
}

fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let trailing = path.ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let mut normalized = segments.join("/");
    if normalized.is_empty() {
        return match (absolute, trailing) {
            (true, _) => "/".to_owned(),
            (false, true) => "./".to_owned(),
            (false, false) => ".".to_owned(),
        };
    }
    if trailing {
        normalized.push('/');
    }
    if absolute {
        normalized.insert(0, '/');
    }
    normalized
}
