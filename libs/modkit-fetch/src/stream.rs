use crate::error::HttpError;
use crate::response::ResponseAccumulator;
use bytes::Bytes;
use futures_core::Stream;
use http::{HeaderMap, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Empty};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// Type alias for the boxed response body.
///
/// Holds either the raw transport body or a [`DecompressBody`](crate::DecompressBody)
/// wrapping it. Errors are already mapped to [`HttpError`].
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, HttpError>;

/// Inactivity timer: expires when no progress was made for `timeout`.
struct IdleTimer {
    timeout: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl IdleTimer {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sleep: Box::pin(tokio::time::sleep(timeout)),
        }
    }

    fn reset(&mut self) {
        self.sleep.as_mut().reset(Instant::now() + self.timeout);
    }

    fn poll_elapsed(&mut self, cx: &mut Context<'_>) -> bool {
        self.sleep.as_mut().poll(cx).is_ready()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Receiving,
    Finished,
}

/// Live response body handle returned by streaming `send()`.
///
/// Yields decoded body chunks in network order. Nothing is buffered and no
/// size limit is applied; the caller controls backpressure by how fast it
/// polls.
///
/// Failures after the response head (transport errors, early close by the
/// server, and the request timeout) are delivered **here**, as an `Err` item,
/// not from `send()`. After an `Err` or the end of the body the stream only
/// yields `None`.
///
/// # Example
///
/// ```ignore
/// let mut stream = client
///     .get("https://example.com/large-file")
///     .stream()
///     .timeout(Duration::from_secs(5))
///     .send()
///     .await?
///     .into_stream()
///     .expect("stream mode");
///
/// while let Some(chunk) = stream.chunk().await? {
///     process_chunk(&chunk);
/// }
/// ```
pub struct ResponseStream {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    idle: Option<IdleTimer>,
    state: StreamState,
}

impl ResponseStream {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: ResponseBody,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            idle: timeout.map(IdleTimer::new),
            state: StreamState::Receiving,
        }
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

    /// Receive the next body chunk.
    ///
    /// Returns `Ok(None)` once the body is complete.
    ///
    /// # Errors
    ///
    /// - `HttpError::Timeout` if no chunk arrived within the request timeout
    /// - `HttpError::Aborted` if the server closed the connection early
    /// - `HttpError::Transport` / `HttpError::Decompress` for other body failures
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, HttpError> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx))
            .await
            .transpose()
    }

    /// Drain the stream into a [`ResponseAccumulator`], failing once more than
    /// `limit` bytes have been received.
    ///
    /// The size check runs after every appended chunk. On overflow the
    /// underlying connection is dropped before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::BodyTooLarge` on overflow, or any error the stream yields.
    pub async fn collect_limited(
        mut self,
        limit: usize,
    ) -> Result<ResponseAccumulator, HttpError> {
        let mut accumulator =
            ResponseAccumulator::new(self.status, std::mem::take(&mut self.headers));

        while let Some(chunk) = self.chunk().await? {
            accumulator.add_chunk(&chunk);

            if accumulator.len() > limit {
                self.terminate();
                tracing::warn!(
                    limit,
                    received = accumulator.len(),
                    "response exceeded buffer limit; connection terminated"
                );
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: accumulator.len(),
                });
            }
        }

        Ok(accumulator)
    }

    /// Drop the transport body so the connection is closed rather than reused.
    fn terminate(&mut self) {
        self.state = StreamState::Finished;
        self.idle = None;
        self.body = Empty::<Bytes>::new()
            .map_err(|never: Infallible| -> HttpError { match never {} })
            .boxed();
    }
}

impl Stream for ResponseStream {
    type Item = Result<Bytes, HttpError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.state == StreamState::Finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.body).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    if let Some(idle) = this.idle.as_mut() {
                        idle.reset();
                    }
                    // Trailers carry no body bytes
                    if let Ok(data) = frame.into_data()
                        && !data.is_empty()
                    {
                        return Poll::Ready(Some(Ok(data)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.terminate();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.terminate();
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    if let Some(idle) = this.idle.as_mut()
                        && idle.poll_elapsed(cx)
                    {
                        let timeout = idle.timeout;
                        this.terminate();
                        tracing::debug!(?timeout, "response body timed out; request aborted");
                        return Poll::Ready(Some(Err(HttpError::Timeout(timeout))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("state", &self.state)
            .field("timeout", &self.idle.as_ref().map(|idle| idle.timeout))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use http_body::Frame;
    use crate::decompress::{ContentCoding, DECODE_PIECE_BYTES, DecompressBody};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use http_body_util::StreamBody;
    use std::io::Write;

    fn body_from_chunks(chunks: &[&'static [u8]]) -> ResponseBody {
        let frames: Vec<Result<Frame<Bytes>, HttpError>> = chunks
            .iter()
            .map(|c| Ok(Frame::data(Bytes::from_static(c))))
            .collect();
        BodyExt::boxed(StreamBody::new(futures_util::stream::iter(frames)))
    }

    /// Body that yields one chunk and then never completes.
    fn stalled_body() -> ResponseBody {
        let first = futures_util::stream::iter(vec![Ok::<_, HttpError>(Frame::data(
            Bytes::from_static(b"first"),
        ))]);
        BodyExt::boxed(StreamBody::new(
            first.chain(futures_util::stream::pending()),
        ))
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_in_order() {
        let stream = ResponseStream::new(
            StatusCode::OK,
            HeaderMap::new(),
            body_from_chunks(&[b"ab", b"", b"cd", b"ef"]),
            None,
        );

        let chunks: Vec<Bytes> = stream.map(Result::unwrap).collect().await;
        assert_eq!(chunks, vec!["ab", "cd", "ef"]);
    }

    #[tokio::test]
    async fn test_collect_limited_accumulates_everything() {
        let stream = ResponseStream::new(
            StatusCode::CREATED,
            HeaderMap::new(),
            body_from_chunks(&[b"{\"id\":", b"1}"]),
            None,
        );

        let acc = stream.collect_limited(1024).await.unwrap();
        assert_eq!(acc.status(), StatusCode::CREATED);
        assert_eq!(acc.text(), r#"{"id":1}"#);
    }

    #[tokio::test]
    async fn test_collect_limited_allows_exactly_limit_bytes() {
        let stream = ResponseStream::new(
            StatusCode::OK,
            HeaderMap::new(),
            body_from_chunks(&[b"1234", b"5678"]),
            None,
        );

        let acc = stream.collect_limited(8).await.unwrap();
        assert_eq!(acc.len(), 8);
    }

    #[tokio::test]
    async fn test_collect_limited_overflow_reports_bytes_reached() {
        let stream = ResponseStream::new(
            StatusCode::OK,
            HeaderMap::new(),
            body_from_chunks(&[b"1234", b"5678", b"9"]),
            None,
        );

        match stream.collect_limited(6).await {
            Err(HttpError::BodyTooLarge { limit, actual }) => {
                assert_eq!(limit, 6);
                // Check runs after the append that crossed the limit
                assert_eq!(actual, 8);
            }
            other => panic!("expected BodyTooLarge, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overflow_emits_warning() {
        use std::sync::{Arc, Mutex};
        use tracing_subscriber::layer::SubscriberExt;

        #[derive(Clone, Default)]
        struct WarningCapture {
            warnings: Arc<Mutex<Vec<String>>>,
        }

        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarningCapture {
            fn on_event(
                &self,
                event: &tracing::Event<'_>,
                _ctx: tracing_subscriber::layer::Context<'_, S>,
            ) {
                if *event.metadata().level() == tracing::Level::WARN {
                    let mut visitor = MessageVisitor(String::new());
                    event.record(&mut visitor);
                    self.warnings.lock().unwrap().push(visitor.0);
                }
            }
        }

        struct MessageVisitor(String);
        impl tracing::field::Visit for MessageVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.0 = format!("{value:?}");
                }
            }
        }

        let capture = WarningCapture::default();
        let warnings = capture.warnings.clone();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(capture));

        let stream = ResponseStream::new(
            StatusCode::OK,
            HeaderMap::new(),
            body_from_chunks(&[b"0123456789"]),
            None,
        );
        let result = stream.collect_limited(4).await;
        assert!(matches!(result, Err(HttpError::BodyTooLarge { .. })));

        let captured = warnings.lock().unwrap();
        assert!(
            captured.iter().any(|w| w.contains("exceeded buffer limit")),
            "expected overflow warning, got: {:?}",
            *captured
        );
    }

    #[tokio::test]
    async fn test_stream_finished_after_error() {
        let frames: Vec<Result<Frame<Bytes>, HttpError>> = vec![
            Ok(Frame::data(Bytes::from_static(b"partial"))),
            Err(HttpError::Aborted(Box::new(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "eof",
            )))),
            Ok(Frame::data(Bytes::from_static(b"never seen"))),
        ];
        let body = BodyExt::boxed(StreamBody::new(futures_util::stream::iter(frames)));
        let mut stream = ResponseStream::new(StatusCode::OK, HeaderMap::new(), body, None);

        assert_eq!(stream.chunk().await.unwrap().unwrap(), "partial");
        assert!(matches!(stream.chunk().await, Err(HttpError::Aborted(_))));
        assert!(stream.chunk().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_delivered_through_stream() {
        let mut stream = ResponseStream::new(
            StatusCode::OK,
            HeaderMap::new(),
            stalled_body(),
            Some(Duration::from_millis(50)),
        );

        assert_eq!(stream.chunk().await.unwrap().unwrap(), "first");
        match stream.chunk().await {
            Err(HttpError::Timeout(d)) => assert_eq!(d, Duration::from_millis(50)),
            other => panic!("expected Timeout, got: {other:?}"),
        }
        assert!(stream.chunk().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_fails_buffered_drain() {
        let stream = ResponseStream::new(
            StatusCode::OK,
            HeaderMap::new(),
            stalled_body(),
            Some(Duration::from_millis(50)),
        );

        let result = stream.collect_limited(1024).await;
        assert!(matches!(result, Err(HttpError::Timeout(_))), "got: {result:?}");
    }

    fn gzip_compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_compressed_frame_cannot_grow_buffer_past_limit() {
        let limit = 1024 * 1024;
        let compressed = gzip_compress(&vec![0u8; 16 * 1024 * 1024]);
        let frames: Vec<Result<Frame<Bytes>, HttpError>> =
            vec![Ok(Frame::data(Bytes::from(compressed)))];
        let body = BodyExt::boxed(DecompressBody::new(
            StreamBody::new(futures_util::stream::iter(frames)),
            ContentCoding::Gzip,
        ));

        let stream = ResponseStream::new(StatusCode::OK, HeaderMap::new(), body, None);
        match stream.collect_limited(limit).await {
            Err(HttpError::BodyTooLarge { actual, .. }) => {
                assert!(actual > limit);
                assert!(actual <= limit + DECODE_PIECE_BYTES, "buffered {actual} bytes");
            }
            other => panic!("expected BodyTooLarge, got: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_compressed_trickle_keeps_idle_timer_alive() {
        let plain = b"slow but steady";
        let compressed = gzip_compress(plain);
        let frames: Vec<Result<Frame<Bytes>, HttpError>> = compressed
            .chunks(1)
            .map(|c| Ok(Frame::data(Bytes::copy_from_slice(c))))
            .collect();
        // Each byte arrives well inside the timeout, but the header alone
        // takes far longer than the timeout to decode into anything
        let trickle = futures_util::stream::iter(frames).then(|frame| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            frame
        });
        let body = BodyExt::boxed(DecompressBody::new(
            StreamBody::new(trickle),
            ContentCoding::Gzip,
        ));

        let stream = ResponseStream::new(
            StatusCode::OK,
            HeaderMap::new(),
            body,
            Some(Duration::from_millis(50)),
        );
        let acc = stream.collect_limited(1024).await.unwrap();
        assert_eq!(acc.bytes(), plain);
    }
}
