//! Streaming `gzip` / `deflate` response decoding.

use crate::error::HttpError;
use bytes::{Buf, Bytes};
use flate2::bufread::{GzDecoder, ZlibDecoder};
use http::HeaderMap;
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::io::{self, BufRead, Read};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

/// Upper bound on the size of one decoded body frame.
///
/// A single compressed frame may expand to many frames of at most this size,
/// so a downstream size limit overshoots by less than one piece.
pub const DECODE_PIECE_BYTES: usize = 16 * 1024;

/// Response content codings the client can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    /// `Content-Encoding: gzip`
    Gzip,
    /// `Content-Encoding: deflate` (zlib-wrapped deflate stream)
    Deflate,
}

impl ContentCoding {
    /// Detect a supported coding from response headers.
    ///
    /// Returns `None` for a missing header or any other coding (`br`,
    /// `identity`, stacked codings, ...); such bodies are delivered as-is.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers
            .get(http::header::CONTENT_ENCODING)?
            .to_str()
            .ok()?
            .trim();

        if value.eq_ignore_ascii_case("gzip") {
            Some(ContentCoding::Gzip)
        } else if value.eq_ignore_ascii_case("deflate") {
            Some(ContentCoding::Deflate)
        } else {
            None
        }
    }
}

/// Compressed bytes received so far but not yet consumed by the decoder.
///
/// Reports `WouldBlock` while empty and open, so the decoder suspends with
/// its state intact until the next body frame is pushed.
#[derive(Default)]
struct PendingInput {
    chunks: VecDeque<Bytes>,
    closed: bool,
}

impl Read for PendingInput {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for PendingInput {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.chunks.front().is_some_and(Bytes::is_empty) {
            self.chunks.pop_front();
        }
        match self.chunks.front() {
            Some(front) => Ok(front.as_ref()),
            None if self.closed => Ok(&[]),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn consume(&mut self, amt: usize) {
        if let Some(front) = self.chunks.front_mut() {
            front.advance(amt.min(front.len()));
        }
    }
}

enum Reader {
    Gzip(GzDecoder<PendingInput>),
    Deflate(ZlibDecoder<PendingInput>),
}

enum Piece {
    Data(Bytes),
    NeedInput,
    Done,
}

struct Decoder {
    reader: Reader,
    scratch: Box<[u8]>,
}

impl Decoder {
    fn new(coding: ContentCoding) -> Self {
        let input = PendingInput::default();
        let reader = match coding {
            ContentCoding::Gzip => Reader::Gzip(GzDecoder::new(input)),
            ContentCoding::Deflate => Reader::Deflate(ZlibDecoder::new(input)),
        };
        Self {
            reader,
            scratch: vec![0; DECODE_PIECE_BYTES].into_boxed_slice(),
        }
    }

    fn input(&mut self) -> &mut PendingInput {
        match &mut self.reader {
            Reader::Gzip(d) => d.get_mut(),
            Reader::Deflate(d) => d.get_mut(),
        }
    }

    fn push(&mut self, data: Bytes) {
        self.input().chunks.push_back(data);
    }

    fn close_input(&mut self) {
        self.input().closed = true;
    }

    /// Decode at most one piece from the pending input.
    fn next_piece(&mut self) -> io::Result<Piece> {
        let read = match &mut self.reader {
            Reader::Gzip(d) => d.read(&mut self.scratch),
            Reader::Deflate(d) => d.read(&mut self.scratch),
        };
        match read {
            Ok(0) => Ok(Piece::Done),
            Ok(n) => Ok(Piece::Data(Bytes::copy_from_slice(&self.scratch[..n]))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Piece::NeedInput),
            Err(e) => Err(e),
        }
    }
}

pin_project! {
    /// Body filter that decodes a compressed response body.
    ///
    /// Decoded bytes are yielded in frames of at most [`DECODE_PIECE_BYTES`],
    /// so a size limit applied downstream counts **decompressed** bytes and
    /// is checked before the next piece is inflated.
    ///
    /// Compressed input that produces no output yet is reported as an empty
    /// data frame, letting an inactivity timer observe the progress.
    pub struct DecompressBody<B> {
        #[pin]
        inner: B,
        decoder: Decoder,
        fed: bool,
        finished: bool,
    }
}

impl<B> DecompressBody<B> {
    /// Wrap `inner`, decoding it with `coding`.
    #[must_use]
    pub fn new(inner: B, coding: ContentCoding) -> Self {
        Self {
            inner,
            decoder: Decoder::new(coding),
            fed: false,
            finished: false,
        }
    }
}

impl<B> Body for DecompressBody<B>
where
    B: Body<Data = Bytes, Error = HttpError>,
{
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            if *this.finished {
                return Poll::Ready(None);
            }

            match this.decoder.next_piece() {
                Ok(Piece::Data(out)) => {
                    *this.fed = false;
                    return Poll::Ready(Some(Ok(Frame::data(out))));
                }
                Ok(Piece::Done) => {
                    *this.finished = true;
                    return Poll::Ready(None);
                }
                Ok(Piece::NeedInput) => {}
                Err(e) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(HttpError::Decompress(e))));
                }
            }

            if std::mem::take(this.fed) {
                return Poll::Ready(Some(Ok(Frame::data(Bytes::new()))));
            }

            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => {
                        this.decoder.push(data);
                        *this.fed = true;
                    }
                    Err(trailers) => return Poll::Ready(Some(Ok(trailers))),
                },
                Some(Err(e)) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => this.decoder.close_input(),
            }
        }
    }
}
