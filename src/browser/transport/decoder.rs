//! Frame reassembly and parsing for the render service's event stream.
//!
//! The reply body is a sequence of `event: <name>\ndata: <json>\n\n` frames.
//! Transport reads split it at arbitrary byte positions; [`FrameDecoder`]
//! buffers partial frames across reads, [`parse_frame`] turns one complete
//! frame into a [`RenderEvent`].

use crate::error::SpiderError;
use crate::request::Request;
use crate::response::{NO_MORE_CONTENT, Response, STILL_RUNNING};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;
use url::Url;

const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Whether a delivered event is followed by more content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// More frames are buffered or the stream is still open.
    More,
    /// Final frame of the stream.
    Last,
    /// Synthetic terminal delivery: the stream ended with nothing left for this fetch.
    NoMoreContent,
}

/// One rendered page taken from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderEvent {
    /// Event name from the frame's `event:` line.
    pub name: String,
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub continuation: Continuation,
}

impl RenderEvent {
    /// The 204 delivered to waiters left over when a stream ends.
    pub fn no_more_content(url: &Url) -> Self {
        Self {
            name: String::new(),
            url: url.clone(),
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            continuation: Continuation::NoMoreContent,
        }
    }

    pub fn with_continuation(mut self, continuation: Continuation) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.continuation != Continuation::More
    }

    /// Converts the event into a page response for `request`, mapping the
    /// continuation to the crawl loop's response flags.
    pub fn into_response(self, request: Request) -> Response {
        let mut response = Response::new(self.url, self.status, request)
            .with_headers(self.headers)
            .with_body(self.body);
        match self.continuation {
            Continuation::More => response.add_flag(STILL_RUNNING),
            Continuation::NoMoreContent => response.add_flag(NO_MORE_CONTENT),
            Continuation::Last => {}
        }
        response
    }
}

/// Splits a byte stream into `\n\n`-delimited frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    // Bytes of `buffer` already searched without finding a delimiter.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame it completed, delimiter stripped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            // A delimiter may straddle the previous read boundary.
            let from = self.scanned.saturating_sub(FRAME_DELIMITER.len() - 1);
            match find_delimiter(&self.buffer[from..]) {
                Some(offset) => {
                    let frame = self.buffer.split_to(from + offset).freeze();
                    self.buffer.advance(FRAME_DELIMITER.len());
                    self.scanned = 0;
                    frames.push(frame);
                }
                None => {
                    self.scanned = self.buffer.len();
                    break;
                }
            }
        }
        frames
    }

    /// Bytes of an incomplete trailing frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

#[derive(Deserialize)]
struct Envelope {
    url: String,
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, HeaderField>,
    #[serde(default)]
    body: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderField {
    One(String),
    Many(Vec<String>),
}

/// Parses one frame. Frames holding only comments or blank lines are
/// keep-alives and yield `Ok(None)`.
pub fn parse_frame(frame: &[u8]) -> Result<Option<RenderEvent>, SpiderError> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| SpiderError::Decode(format!("frame is not UTF-8: {e}")))?;

    let mut name = None;
    let mut data = Vec::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => name = Some(value),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return match name {
            None => Ok(None),
            Some(name) => Err(SpiderError::Decode(format!(
                "event '{name}' carries no data line"
            ))),
        };
    }

    let envelope: Envelope = serde_json::from_str(&data.join("\n"))
        .map_err(|e| SpiderError::Decode(format!("invalid event payload: {e}")))?;

    let url = Url::parse(&envelope.url)
        .map_err(|e| SpiderError::Decode(format!("invalid url '{}': {e}", envelope.url)))?;
    let status = StatusCode::from_u16(envelope.status)
        .map_err(|e| SpiderError::Decode(format!("invalid status {}: {e}", envelope.status)))?;

    Ok(Some(RenderEvent {
        name: name.unwrap_or("message").to_string(),
        url,
        status,
        headers: header_map(envelope.headers),
        body: decode_body(&envelope.body)?,
        continuation: Continuation::Last,
    }))
}

/// Decodes a base64 body, ignoring the line breaks some encoders insert.
fn decode_body(encoded: &str) -> Result<Bytes, SpiderError> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map(Bytes::from)
        .map_err(|e| SpiderError::Decode(format!("invalid base64 body: {e}")))
}

fn header_map(fields: BTreeMap<String, HeaderField>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, field) in fields {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!("Skipping invalid header name from render service: {:?}", name);
            continue;
        };
        let values = match field {
            HeaderField::One(value) => vec![value],
            HeaderField::Many(values) => values,
        };
        for value in values {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => warn!("Skipping invalid value for header {}", name),
            }
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(url: &str, status: u16, body: &[u8]) -> String {
        format!(
            "event: response\ndata: {{\"url\": \"{url}\", \"status\": {status}, \"headers\": {{\"Content-Type\": \"text/html\"}}, \"body\": \"{}\"}}\n\n",
            STANDARD.encode(body)
        )
    }

    #[test]
    fn decodes_whole_frames() {
        let mut decoder = FrameDecoder::new();
        let raw = format!("{}{}", frame("http://x/1", 200, b"one"), frame("http://x/2", 200, b"two"));

        let frames = decoder.feed(raw.as_bytes());
        assert_eq!(frames.len(), 2);
        assert!(decoder.pending().is_empty());

        let event = parse_frame(&frames[1]).unwrap().unwrap();
        assert_eq!(event.name, "response");
        assert_eq!(event.url.as_str(), "http://x/2");
        assert_eq!(event.status, StatusCode::OK);
        assert_eq!(event.headers["content-type"], "text/html");
        assert_eq!(&event.body[..], b"two");
    }

    #[test]
    fn any_split_decodes_like_the_whole_frame() {
        let raw = frame("http://x/page", 200, b"<html>split me</html>");
        let whole = {
            let mut decoder = FrameDecoder::new();
            parse_frame(&decoder.feed(raw.as_bytes())[0]).unwrap().unwrap()
        };

        let bytes = raw.as_bytes();
        for first in 0..bytes.len() {
            for second in first..bytes.len() {
                let mut decoder = FrameDecoder::new();
                let mut frames = decoder.feed(&bytes[..first]);
                frames.extend(decoder.feed(&bytes[first..second]));
                frames.extend(decoder.feed(&bytes[second..]));

                assert_eq!(frames.len(), 1, "split at {first}/{second}");
                assert_eq!(parse_frame(&frames[0]).unwrap().unwrap(), whole);
            }
        }
    }

    #[test]
    fn byte_at_a_time_feeding() {
        let raw = format!("{}{}", frame("http://x/1", 200, b"a"), frame("http://x/2", 404, b"b"));
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in raw.as_bytes() {
            frames.extend(decoder.feed(std::slice::from_ref(byte)));
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(parse_frame(&frames[1]).unwrap().unwrap().status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn partial_frame_stays_pending() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"event: response\ndata: {\"url\"").is_empty());
        assert_eq!(decoder.pending(), b"event: response\ndata: {\"url\"");
    }

    #[test]
    fn body_with_wrapped_base64_lines() {
        let payload = vec![b'x'; 200];
        let encoded = STANDARD.encode(&payload);
        let wrapped: Vec<String> = encoded
            .as_bytes()
            .chunks(76)
            .map(|c| String::from_utf8(c.to_vec()).unwrap())
            .collect();
        let raw = format!(
            "event: response\ndata: {{\"url\": \"http://x\", \"status\": 200, \"headers\": {{}}, \"body\": \"{}\\n\"}}",
            wrapped.join("\\n")
        );

        let event = parse_frame(raw.as_bytes()).unwrap().unwrap();
        assert_eq!(&event.body[..], &payload[..]);
    }

    #[test]
    fn keep_alive_frames_are_skipped() {
        assert!(parse_frame(b": ping").unwrap().is_none());
        assert!(parse_frame(b"").unwrap().is_none());
    }

    #[test]
    fn malformed_frames_are_decode_errors() {
        for raw in [
            &b"event: response"[..],
            b"event: response\ndata: not json",
            b"event: response\ndata: {\"url\": \"http://x\", \"status\": 200, \"body\": \"***\"}",
            b"event: response\ndata: {\"url\": \"nowhere\", \"status\": 200, \"body\": \"\"}",
            b"event: response\ndata: {\"url\": \"http://x\", \"status\": 1000, \"body\": \"\"}",
        ] {
            assert!(
                matches!(parse_frame(raw), Err(SpiderError::Decode(_))),
                "{}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn multi_valued_headers_are_kept() {
        let raw = b"event: response\ndata: {\"url\": \"http://x\", \"status\": 200, \"headers\": {\"Set-Cookie\": [\"a=1\", \"b=2\"]}, \"body\": \"\"}";
        let event = parse_frame(raw).unwrap().unwrap();
        assert_eq!(event.headers.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn continuation_maps_to_response_flags() {
        let url = Url::parse("http://render/render.json").unwrap();
        let request = Request::new(url.clone());

        let terminal = RenderEvent::no_more_content(&url).into_response(request.clone());
        assert_eq!(terminal.status, StatusCode::NO_CONTENT);
        assert!(terminal.body.is_empty());
        assert_eq!(terminal.flags, vec![NO_MORE_CONTENT.to_string()]);

        let more = RenderEvent::no_more_content(&url)
            .with_continuation(Continuation::More)
            .into_response(request.clone());
        assert_eq!(more.flags, vec![STILL_RUNNING.to_string()]);

        let last = RenderEvent::no_more_content(&url)
            .with_continuation(Continuation::Last)
            .into_response(request);
        assert!(last.flags.is_empty());
    }
}
