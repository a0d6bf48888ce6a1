//! Streaming a byte source as a full, single-range or multipart response.
//!
//! The source is read exactly once, front to back. Ranges must already be
//! merged and sorted (as [`RangeSet`] produces them): a single cursor
//! moves through the byte stream and the range list together and never
//! backtracks.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use tracing::{debug, warn};

use crate::parse::{ByteRange, RangeSet};

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

const CONTENT_TRANSFER_ENCODING: HeaderName = HeaderName::from_static("content-transfer-encoding");

#[derive(Clone, Debug)]
pub struct SendOptions {
    /// File name for `Content-Disposition`.
    pub name: String,
    pub content_type: String,
    /// Total size, if known up front.
    pub size: Option<u64>,
    pub ranges: Option<RangeSet>,
    /// `attachment` rather than `inline`.
    pub download: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            name: "content.bin".into(),
            content_type: "application/octet-stream".into(),
            size: None,
            ranges: None,
            download: false,
        }
    }
}

/// Status, headers and body ready to hand to the HTTP layer.
///
/// `error` is set when the source failed before anything was sent; the
/// status is then `404` and the body a generic JSON message.
pub struct RangeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: RangeBody,
    pub error: Option<io::Error>,
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// One requested interval after resolving it against the object size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Span {
    start: u64,
    end: Option<u64>,
}

impl Span {
    fn last_byte(&self) -> u64 {
        self.end.unwrap_or(u64::MAX)
    }

    /// `None` when the end is open or the count does not fit in a `u64`.
    fn len(&self) -> Option<u64> {
        self.end?.checked_sub(self.start)?.checked_add(1)
    }
}

pub struct RangeSender {
    opts: SendOptions,
}

impl RangeSender {
    pub fn new(opts: SendOptions) -> Self {
        Self { opts }
    }

    /// Read the first chunk of `source` and decide the response shape.
    ///
    /// Once the status and headers are returned they are final: a later
    /// read error only ends the body stream early.
    pub async fn send<S>(self, source: S) -> RangeResponse
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let spans = match self.spans() {
            Ok(spans) => spans,
            Err(size) => return self.unsatisfiable(size),
        };

        let mut source = source.boxed();
        let first = match source.next().await {
            Some(Err(err)) => return self.not_found(err),
            first => first,
        };
        let source: ByteStream = match first {
            Some(chunk) => stream::once(async move { chunk }).chain(source).boxed(),
            None => source,
        };

        match spans {
            None => self.full(source),
            Some(spans) if spans.len() == 1 => self.single(source, spans[0]),
            Some(spans) => self.multipart(source, spans),
        }
    }

    /// `Ok(None)` serves the whole body. `Err(size)` means nothing
    /// requested lies inside an object of known `size`.
    fn spans(&self) -> Result<Option<Vec<Span>>, u64> {
        let Some(set) = self.opts.ranges.as_ref() else {
            return Ok(None);
        };
        if !set.is_bytes() || set.is_empty() {
            return Ok(None);
        }
        // Ranges without a start are not served partially.
        if set.has_suffix() {
            debug!(ranges = %set, "suffix range present; sending full body");
            return Ok(None);
        }

        let mut spans: Vec<Span> = set
            .ranges()
            .iter()
            .filter_map(|r: &ByteRange| r.start.map(|start| Span { start, end: r.end }))
            .collect();

        if let Some(size) = self.opts.size {
            spans.retain(|s| s.start < size);
            for span in &mut spans {
                span.end = Some(span.end.map_or(size - 1, |end| end.min(size - 1)));
            }
            if spans.is_empty() {
                return Err(size);
            }
        }
        Ok(Some(spans))
    }

    fn base_headers(&self, disposition: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(CONTENT_TRANSFER_ENCODING, HeaderValue::from_static("binary"));
        if disposition {
            headers.insert(header::CONTENT_DISPOSITION, self.disposition());
        }
        headers
    }

    fn disposition(&self) -> HeaderValue {
        if !self.opts.download {
            return HeaderValue::from_static("inline");
        }
        let name = self.opts.name.replace('"', "");
        HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
    }

    fn content_type(&self) -> HeaderValue {
        HeaderValue::from_str(&self.opts.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
    }

    fn full(self, source: ByteStream) -> RangeResponse {
        let mut headers = self.base_headers(true);
        headers.insert(header::CONTENT_TYPE, self.content_type());
        if let Some(size) = self.opts.size {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        }
        debug!(name = %self.opts.name, size = ?self.opts.size, "sending full body");
        RangeResponse {
            status: StatusCode::OK,
            headers,
            body: RangeBody::passthrough(source),
            error: None,
        }
    }

    fn single(self, source: ByteStream, span: Span) -> RangeResponse {
        let mut headers = self.base_headers(true);
        headers.insert(header::CONTENT_TYPE, self.content_type());
        headers.insert(header::CONTENT_RANGE, text(content_range(span, self.opts.size)));
        if let Some(len) = span.len() {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
        debug!(name = %self.opts.name, ?span, "sending single range");
        RangeResponse {
            status: StatusCode::PARTIAL_CONTENT,
            headers,
            body: RangeBody::ranged(source, vec![span], None),
            error: None,
        }
    }

    fn multipart(self, source: ByteStream, spans: Vec<Span>) -> RangeResponse {
        let boundary = uuid::Uuid::new_v4().to_string();
        let mut headers = self.base_headers(true);
        headers.insert(
            header::CONTENT_TYPE,
            text(format!("multipart/byteranges; boundary={boundary}")),
        );
        debug!(name = %self.opts.name, parts = spans.len(), "sending multipart ranges");
        let parts = Multipart {
            boundary,
            content_type: self.opts.content_type.clone(),
            size: self.opts.size,
        };
        RangeResponse {
            status: StatusCode::PARTIAL_CONTENT,
            headers,
            body: RangeBody::ranged(source, spans, Some(parts)),
            error: None,
        }
    }

    fn unsatisfiable(self, size: u64) -> RangeResponse {
        let mut headers = self.base_headers(false);
        headers.insert(header::CONTENT_RANGE, text(format!("bytes */{size}")));
        debug!(name = %self.opts.name, size, "no requested range inside object");
        RangeResponse {
            status: StatusCode::RANGE_NOT_SATISFIABLE,
            headers,
            body: RangeBody::empty(),
            error: None,
        }
    }

    /// The real error is logged and returned to the caller, never sent.
    fn not_found(self, err: io::Error) -> RangeResponse {
        warn!(name = %self.opts.name, error = %err, "source failed before first chunk");
        let body = serde_json::json!({ "message": format!("File not found: {}", self.opts.name) });
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        RangeResponse {
            status: StatusCode::NOT_FOUND,
            headers,
            body: RangeBody::once(Bytes::from(body.to_string())),
            error: Some(err),
        }
    }
}

fn content_range(span: Span, size: Option<u64>) -> String {
    let end = span.end.map(|e| e.to_string()).unwrap_or_default();
    let size = size.map(|s| s.to_string()).unwrap_or_else(|| "*".into());
    format!("bytes {}-{end}/{size}", span.start)
}

// Only called with ASCII built from numbers and a uuid.
fn text(s: String) -> HeaderValue {
    HeaderValue::from_str(&s).unwrap_or_else(|_| HeaderValue::from_static(""))
}

struct Multipart {
    boundary: String,
    content_type: String,
    size: Option<u64>,
}

impl Multipart {
    fn part_header(&self, span: Span) -> Bytes {
        let mut head = format!(
            "\r\n--{}\r\nContent-Range: {}\r\nContent-Type: {}\r\n",
            self.boundary,
            content_range(span, self.size),
            self.content_type
        );
        if let Some(len) = span.len() {
            head.push_str(&format!("Content-Length: {len}\r\n"));
        }
        head.push_str("\r\n");
        Bytes::from(head)
    }

    fn close(&self) -> Bytes {
        Bytes::from(format!("\r\n--{}--\r\n", self.boundary))
    }
}

/// Response body produced by [`RangeSender`].
pub struct RangeBody {
    state: BodyState,
}

enum BodyState {
    Once(Option<Bytes>),
    Passthrough(ByteStream),
    Ranged(Box<Ranged>),
}

struct Ranged {
    source: ByteStream,
    spans: Vec<Span>,
    index: usize,
    read_offset: u64,
    parts: Option<Multipart>,
    queue: VecDeque<Bytes>,
    done: bool,
}

impl RangeBody {
    fn empty() -> Self {
        Self { state: BodyState::Once(None) }
    }

    fn once(bytes: Bytes) -> Self {
        Self { state: BodyState::Once(Some(bytes)) }
    }

    fn passthrough(source: ByteStream) -> Self {
        Self { state: BodyState::Passthrough(source) }
    }

    fn ranged(source: ByteStream, spans: Vec<Span>, parts: Option<Multipart>) -> Self {
        let mut queue = VecDeque::new();
        if let (Some(parts), Some(first)) = (&parts, spans.first()) {
            queue.push_back(parts.part_header(*first));
        }
        Self {
            state: BodyState::Ranged(Box::new(Ranged {
                source,
                spans,
                index: 0,
                read_offset: 0,
                parts,
                queue,
                done: false,
            })),
        }
    }
}

impl Ranged {
    /// Queue the parts of `chunk` that fall inside the requested spans,
    /// plus part headers for every span that starts along the way.
    fn consume(&mut self, chunk: &Bytes) {
        if chunk.is_empty() {
            return;
        }
        let chunk_start = self.read_offset;
        let chunk_end = chunk_start + chunk.len() as u64 - 1;

        while let Some(span) = self.spans.get(self.index).copied() {
            let want_end = span.last_byte();
            if chunk_end < span.start || chunk_start > want_end {
                break;
            }
            let from = (chunk_start.max(span.start) - chunk_start) as usize;
            let to = (chunk_end.min(want_end) - chunk_start) as usize;
            self.queue.push_back(chunk.slice(from..=to));

            if want_end > chunk_end {
                break;
            }
            self.index += 1;
            if let Some(parts) = &self.parts {
                match self.spans.get(self.index) {
                    Some(next) => self.queue.push_back(parts.part_header(*next)),
                    None => self.queue.push_back(parts.close()),
                }
            }
        }

        self.read_offset += chunk.len() as u64;
        if self.index >= self.spans.len() {
            self.done = true;
        }
    }

    fn finish(&mut self) {
        if self.index < self.spans.len() {
            if let Some(parts) = &self.parts {
                self.queue.push_back(parts.close());
            }
        }
        self.done = true;
    }

    fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        loop {
            if let Some(bytes) = self.queue.pop_front() {
                return Poll::Ready(Some(Ok(bytes)));
            }
            if self.done {
                return Poll::Ready(None);
            }
            match self.source.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => self.consume(&chunk),
                Poll::Ready(Some(Err(err))) => {
                    self.done = true;
                    self.queue.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => self.finish(),
            }
        }
    }
}

impl Stream for RangeBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().state {
            BodyState::Once(bytes) => Poll::Ready(bytes.take().map(Ok)),
            BodyState::Passthrough(source) => source.poll_next_unpin(cx),
            BodyState::Ranged(ranged) => ranged.poll_next(cx),
        }
    }
}
