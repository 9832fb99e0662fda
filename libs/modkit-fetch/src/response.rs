use crate::error::HttpError;
use crate::stream::ResponseStream;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

/// Buffered response: status, headers and the complete body.
///
/// Produced by buffered `send()`. The body is the concatenation of every
/// received chunk in arrival order, after decompression when it was requested.
///
/// # Example
///
/// ```ignore
/// let resp = client.get("https://api.example.com/posts/1").send().await?;
/// let acc = resp.into_buffered().expect("buffered mode");
///
/// assert!(acc.status().is_success());
/// let post: Option<Post> = acc.json()?;
/// ```
#[derive(Debug, Clone)]
pub struct ResponseAccumulator {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
}

impl ResponseAccumulator {
    /// Start an empty accumulator for a response with the given head.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            headers,
            body: BytesMut::new(),
        }
    }

    /// Append a body chunk.
    pub fn add_chunk(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    /// Get the response status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Number of body bytes received so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether no body bytes were received
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Body decoded as UTF-8.
    ///
    /// Invalid sequences are replaced with U+FFFD rather than failing.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON.
    ///
    /// A `204 No Content` response yields `Ok(None)` without looking at the
    /// body. The status is otherwise not checked: an error response with a
    /// JSON body parses like any other.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Json` if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<Option<T>, HttpError> {
        if self.status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.body)?))
    }

    /// Copy of the body bytes.
    ///
    /// The returned buffer is independent; mutating it does not affect the
    /// accumulator.
    #[must_use]
    pub fn buffer(&self) -> Vec<u8> {
        self.body.to_vec()
    }

    /// Borrow the body bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Consume the accumulator and return the body
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.body.freeze()
    }
}

/// Outcome of [`RequestBuilder::send`](crate::RequestBuilder::send).
///
/// The variant is fixed by the request mode: [`RequestBuilder::stream`](crate::RequestBuilder::stream)
/// yields `Stream`, every other request yields `Buffered`.
#[derive(Debug)]
pub enum HttpResponse {
    /// Fully received body
    Buffered(ResponseAccumulator),
    /// Live body stream
    Stream(ResponseStream),
}

impl HttpResponse {
    /// Get the response status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            HttpResponse::Buffered(acc) => acc.status(),
            HttpResponse::Stream(stream) => stream.status(),
        }
    }

    /// Get the response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        match self {
            HttpResponse::Buffered(acc) => acc.headers(),
            HttpResponse::Stream(stream) => stream.headers(),
        }
    }

    #[must_use]
    pub fn is_stream(&self) -> bool {
        matches!(self, HttpResponse::Stream(_))
    }

    /// The buffered response, or `None` in streaming mode
    #[must_use]
    pub fn into_buffered(self) -> Option<ResponseAccumulator> {
        match self {
            HttpResponse::Buffered(acc) => Some(acc),
            HttpResponse::Stream(_) => None,
        }
    }

    /// The response stream, or `None` in buffered mode
    #[must_use]
    pub fn into_stream(self) -> Option<ResponseStream> {
        match self {
            HttpResponse::Stream(stream) => Some(stream),
            HttpResponse::Buffered(_) => None,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn accumulator(status: u16, chunks: &[&[u8]]) -> ResponseAccumulator {
        let mut acc = ResponseAccumulator::new(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
        );
        for chunk in chunks {
            acc.add_chunk(chunk);
        }
        acc
    }

    #[test]
    fn test_chunks_concatenate_in_order() {
        let acc = accumulator(200, &[b"Hello, ", b"", b"world"]);
        assert_eq!(acc.len(), 12);
        assert_eq!(acc.text(), "Hello, world");
    }

    #[test]
    fn test_empty_body() {
        let acc = accumulator(200, &[]);
        assert!(acc.is_empty());
        assert_eq!(acc.text(), "");
    }

    #[test]
    fn test_json_parses_body() {
        let acc = accumulator(200, &[br#"{"id":1,"#, br#""title":"x"}"#]);
        let value: Value = acc.json().unwrap().unwrap();
        assert_eq!(value, json!({"id": 1, "title": "x"}));
    }

    #[test]
    fn test_json_on_no_content_is_none() {
        let acc = accumulator(204, &[]);
        let value: Option<Value> = acc.json().unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_json_on_no_content_ignores_invalid_body() {
        let acc = accumulator(204, &[b"not json"]);
        assert!(matches!(acc.json::<Value>(), Ok(None)));
        // Raw bytes stay available
        assert_eq!(acc.text(), "not json");
    }

    #[test]
    fn test_json_error_on_invalid_body() {
        let acc = accumulator(200, &[b"not json"]);
        let err = acc.json::<Value>().unwrap_err();
        assert!(matches!(err, HttpError::Json(_)), "got: {err:?}");
    }

    #[test]
    fn test_json_parses_error_status_body() {
        let acc = accumulator(404, &[br#"{"error":"missing"}"#]);
        let value: Value = acc.json().unwrap().unwrap();
        assert_eq!(value["error"], "missing");
    }

    #[test]
    fn test_text_replaces_invalid_utf8() {
        let acc = accumulator(200, &[b"ok ", &[0xff, 0xfe]]);
        assert!(acc.text().starts_with("ok "));
        assert!(acc.text().contains('\u{FFFD}'));
    }

    #[test]
    fn test_buffer_is_independent_copy() {
        let acc = accumulator(200, &[b"abc"]);
        let mut copy = acc.buffer();
        copy[0] = b'z';
        assert_eq!(acc.bytes(), b"abc");
        assert_eq!(copy, b"zbc");
    }

    #[test]
    fn test_http_response_buffered_accessors() {
        let resp = HttpResponse::Buffered(accumulator(201, &[b"x"]));
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(!resp.is_stream());
        assert!(resp.into_buffered().is_some());
    }
}
