//! Logical streams: one render-service reply shared by many fetches.
//!
//! Each stream is driven by its own task which alone owns the decoder, the
//! buffer of undelivered events and the queue of waiting fetches. Fetches
//! talk to it through a [`StreamHandle`], in the same message-passing style
//! the scheduler uses. Registrations travel over a tokio channel: the task
//! polls `recv` inside `select!`, which needs a cancel-safe receiver.

use super::decoder::{Continuation, FrameDecoder, RenderEvent, parse_frame};
use crate::error::SpiderError;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{Semaphore, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};
use url::Url;

pub(crate) type EventResult = Result<RenderEvent, SpiderError>;
pub(crate) type Waiter = oneshot::Sender<EventResult>;

pub(crate) enum StreamMessage {
    Await(Waiter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Dispatched, reply headers not received yet.
    Init,
    /// Reply is being read; zero or more `More` events delivered.
    Streaming,
    /// A `Last` or synthetic terminal event was delivered.
    Closed,
}

/// Buffer and waiter bookkeeping for one logical stream.
pub(crate) struct LogicalStream {
    id: u64,
    request_url: Url,
    decoder: FrameDecoder,
    events: VecDeque<RenderEvent>,
    waiters: VecDeque<Waiter>,
    state: StreamState,
    body_closed: bool,
    failure: Option<SpiderError>,
    bytes_received: usize,
    delivered: usize,
    max_buffered: usize,
}

impl LogicalStream {
    pub(crate) fn new(id: u64, request_url: Url, max_buffered: usize) -> Self {
        Self {
            id,
            request_url,
            decoder: FrameDecoder::new(),
            events: VecDeque::new(),
            waiters: VecDeque::new(),
            state: StreamState::Init,
            body_closed: false,
            failure: None,
            bytes_received: 0,
            delivered: 0,
            max_buffered: max_buffered.max(1),
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        self.state
    }

    pub(crate) fn on_connected(&mut self) {
        if self.state == StreamState::Init {
            self.state = StreamState::Streaming;
        }
    }

    /// Feeds body bytes, buffering every frame they complete.
    pub(crate) fn feed(&mut self, chunk: &[u8]) {
        self.bytes_received += chunk.len();
        for frame in self.decoder.feed(chunk) {
            match parse_frame(&frame) {
                Ok(Some(event)) => self.events.push_back(event),
                Ok(None) => trace!("Stream {}: skipping keep-alive frame", self.id),
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
        self.resolve();
    }

    /// The reply body reached EOF.
    pub(crate) fn close(&mut self) {
        self.body_closed = true;
        if self.decoder.pending().iter().any(|b| !b.is_ascii_whitespace()) {
            warn!(
                "Stream {}: discarding {} trailing bytes without frame delimiter",
                self.id,
                self.decoder.pending().len()
            );
        }
        debug!(
            "Stream {}: reply closed after {} bytes, {} events buffered",
            self.id,
            self.bytes_received,
            self.events.len()
        );
        self.resolve();
    }

    /// Abandons the stream; pending waiters receive `error`.
    pub(crate) fn fail(&mut self, error: SpiderError) {
        warn!("Stream {} failed: {}", self.id, error);
        self.events.clear();
        self.failure = Some(error);
        self.resolve();
    }

    /// Queues a fetch for the next event.
    pub(crate) fn register(&mut self, waiter: Waiter) {
        if self.state == StreamState::Closed {
            let _ = waiter.send(Err(SpiderError::StreamClosed));
            return;
        }
        self.waiters.push_back(waiter);
        self.resolve();
    }

    /// Pairs the oldest buffered events with the oldest waiters.
    fn resolve(&mut self) {
        if let Some(error) = &self.failure {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Err(error.clone()));
            }
            return;
        }

        while !self.events.is_empty() {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            if waiter.is_closed() {
                trace!("Stream {}: skipping cancelled waiter", self.id);
                continue;
            }
            let Some(event) = self.events.pop_front() else {
                break;
            };

            let continuation = if !self.events.is_empty() || !self.body_closed {
                Continuation::More
            } else {
                Continuation::Last
            };
            match waiter.send(Ok(event.with_continuation(continuation))) {
                Ok(()) => {
                    self.delivered += 1;
                    if continuation == Continuation::Last {
                        self.state = StreamState::Closed;
                    }
                }
                Err(Ok(event)) => self.events.push_front(event),
                Err(Err(_)) => {}
            }
        }

        if self.body_closed && self.events.is_empty() {
            for waiter in self.waiters.drain(..) {
                if waiter
                    .send(Ok(RenderEvent::no_more_content(&self.request_url)))
                    .is_ok()
                {
                    self.state = StreamState::Closed;
                }
            }
        }
    }

    /// The reply body reached EOF or failed; no more bytes will be read.
    pub(crate) fn reply_done(&self) -> bool {
        self.body_closed || self.failure.is_some()
    }

    /// Whether the body should be polled for more data.
    pub(crate) fn wants_data(&self) -> bool {
        !self.body_closed && self.failure.is_none() && self.events.len() < self.max_buffered
    }

    /// Nothing more will ever be delivered and nobody is waiting.
    pub(crate) fn is_finished(&self) -> bool {
        (self.state == StreamState::Closed || self.failure.is_some()) && self.waiters.is_empty()
    }

    pub(crate) fn buffered(&self) -> usize {
        self.events.len()
    }
}

/// Runs one logical stream: acquires a connection slot, sends the command,
/// then reads the reply while serving waiter registrations.
pub(crate) async fn drive_stream(
    mut stream: LogicalStream,
    client: reqwest::Client,
    outbound: reqwest::Request,
    limiter: Arc<Semaphore>,
    mut rx: UnboundedReceiver<StreamMessage>,
) {
    let target = outbound.url().to_string();

    let mut permit = match limiter.acquire_owned().await {
        Ok(permit) => Some(permit),
        Err(_) => {
            stream.fail(SpiderError::Transport(format!(
                "connection pool for {target} is closed"
            )));
            return;
        }
    };

    trace!("Stream {}: sending command to {}", stream.id, target);
    let reply = match client.execute(outbound).await {
        Ok(reply) => reply,
        Err(e) => {
            stream.fail(SpiderError::from(e));
            return;
        }
    };
    if !reply.status().is_success() {
        stream.fail(SpiderError::RenderService {
            url: target,
            status: reply.status().as_u16(),
        });
        return;
    }
    stream.on_connected();

    let body = reply.bytes_stream();
    tokio::pin!(body);

    while !stream.is_finished() {
        tokio::select! {
            biased;
            chunk = body.next(), if stream.wants_data() => match chunk {
                Some(Ok(bytes)) => stream.feed(&bytes),
                Some(Err(e)) => stream.fail(SpiderError::from(e)),
                None => stream.close(),
            },
            message = rx.recv() => match message {
                Some(StreamMessage::Await(waiter)) => stream.register(waiter),
                None => {
                    debug!("Stream {}: every handle dropped, tearing down", stream.id);
                    break;
                }
            },
        }

        // The connection slot covers the reply, not the buffered tail.
        if stream.reply_done() && permit.take().is_some() {
            trace!("Stream {}: released connection slot for {}", stream.id, target);
        }
    }

    debug!(
        "Stream {} finished: {} events delivered, {} bytes received, {} left buffered",
        stream.id,
        stream.delivered,
        stream.bytes_received,
        stream.buffered()
    );
}

/// Reference to a running logical stream, carried in the request's
/// execution context so continuation fetches reach the same reply.
#[derive(Clone)]
pub struct StreamHandle {
    id: u64,
    tx: UnboundedSender<StreamMessage>,
    task: AbortHandle,
}

impl StreamHandle {
    pub(crate) fn new(id: u64, tx: UnboundedSender<StreamMessage>, task: AbortHandle) -> Self {
        Self { id, tx, task }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registers a waiter for the next event.
    pub(crate) fn register(&self) -> Result<oneshot::Receiver<EventResult>, SpiderError> {
        let (waiter, receiver) = oneshot::channel();
        self.tx
            .send(StreamMessage::Await(waiter))
            .map_err(|_| SpiderError::StreamClosed)?;
        Ok(receiver)
    }

    /// Tears the stream task down immediately, dropping its connection.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Whether the stream task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tokio::sync::oneshot::error::TryRecvError;

    fn frame(n: usize) -> String {
        format!(
            "event: response\ndata: {{\"url\": \"http://x/{n}\", \"status\": 200, \"headers\": {{}}, \"body\": \"{}\"}}\n\n",
            STANDARD.encode(format!("page {n}"))
        )
    }

    fn stream() -> LogicalStream {
        let mut stream = LogicalStream::new(1, Url::parse("http://render/render.json").unwrap(), 64);
        stream.on_connected();
        stream
    }

    fn waiter(stream: &mut LogicalStream) -> oneshot::Receiver<EventResult> {
        let (tx, rx) = oneshot::channel();
        stream.register(tx);
        rx
    }

    fn take(rx: &mut oneshot::Receiver<EventResult>) -> RenderEvent {
        rx.try_recv().expect("waiter resolved").expect("event")
    }

    #[test]
    fn n_frames_yield_n_events_in_order_with_last_flag_at_end() {
        let mut stream = stream();
        for n in 1..=3 {
            stream.feed(frame(n).as_bytes());
        }
        stream.close();

        let mut continuations = Vec::new();
        for n in 1..=3 {
            let mut rx = waiter(&mut stream);
            let event = take(&mut rx);
            assert_eq!(event.url.as_str(), format!("http://x/{n}"));
            assert_eq!(&event.body[..], format!("page {n}").as_bytes());
            continuations.push(event.continuation);
        }

        assert_eq!(
            continuations,
            vec![Continuation::More, Continuation::More, Continuation::Last]
        );
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(stream.is_finished());
    }

    #[test]
    fn event_is_more_while_stream_is_open() {
        let mut stream = stream();
        let mut rx = waiter(&mut stream);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        stream.feed(frame(1).as_bytes());
        assert_eq!(take(&mut rx).continuation, Continuation::More);
        assert_eq!(stream.state(), StreamState::Streaming);
    }

    #[test]
    fn waiters_resolve_in_registration_order() {
        let mut stream = stream();
        let mut first = waiter(&mut stream);
        let mut second = waiter(&mut stream);

        let raw = format!("{}{}", frame(1), frame(2));
        let (head, tail) = raw.split_at(raw.len() / 2 + 7);
        stream.feed(head.as_bytes());
        stream.feed(tail.as_bytes());

        assert_eq!(take(&mut first).url.as_str(), "http://x/1");
        assert_eq!(take(&mut second).url.as_str(), "http://x/2");
    }

    #[test]
    fn close_with_pending_waiters_sends_synthetic_terminals() {
        let mut stream = stream();
        let mut waiters: Vec<_> = (0..3).map(|_| waiter(&mut stream)).collect();

        stream.close();

        for rx in &mut waiters {
            let event = take(rx);
            assert_eq!(event.status, http::StatusCode::NO_CONTENT);
            assert!(event.body.is_empty());
            assert_eq!(event.url.as_str(), "http://render/render.json");
            assert_eq!(event.continuation, Continuation::NoMoreContent);
        }
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn buffered_events_are_served_before_synthetic_terminals() {
        let mut stream = stream();
        let mut waiters: Vec<_> = (0..4).map(|_| waiter(&mut stream)).collect();

        // Frames and EOF land in the same resolve pass.
        stream.body_closed = true;
        stream.feed(format!("{}{}", frame(1), frame(2)).as_bytes());

        let delivered: Vec<_> = waiters.iter_mut().map(take).collect();
        assert_eq!(delivered[0].url.as_str(), "http://x/1");
        assert_eq!(delivered[1].url.as_str(), "http://x/2");
        assert_eq!(
            delivered.iter().map(|e| e.continuation).collect::<Vec<_>>(),
            vec![
                Continuation::More,
                Continuation::Last,
                Continuation::NoMoreContent,
                Continuation::NoMoreContent,
            ]
        );
    }

    #[test]
    fn closed_stream_rejects_new_waiters() {
        let mut stream = stream();
        stream.close();
        let mut first = waiter(&mut stream);
        assert_eq!(take(&mut first).continuation, Continuation::NoMoreContent);

        let mut rejected = waiter(&mut stream);
        assert!(matches!(
            rejected.try_recv(),
            Ok(Err(SpiderError::StreamClosed))
        ));
    }

    #[test]
    fn cancelled_waiter_does_not_consume_an_event() {
        let mut stream = stream();
        let cancelled = waiter(&mut stream);
        let mut next = waiter(&mut stream);
        drop(cancelled);

        stream.feed(frame(1).as_bytes());
        assert_eq!(take(&mut next).url.as_str(), "http://x/1");
    }

    #[test]
    fn decode_error_fails_every_pending_waiter() {
        let mut stream = stream();
        let mut first = waiter(&mut stream);
        let mut second = waiter(&mut stream);

        stream.feed(b"event: response\ndata: {broken\n\n");

        for rx in [&mut first, &mut second] {
            assert!(matches!(rx.try_recv(), Ok(Err(SpiderError::Decode(_)))));
        }
        assert!(stream.is_finished());
        assert!(stream.reply_done());
        assert!(!stream.wants_data());
    }

    #[test]
    fn full_buffer_stops_reading() {
        let mut stream = LogicalStream::new(3, Url::parse("http://render/").unwrap(), 2);
        stream.on_connected();
        stream.feed(format!("{}{}", frame(1), frame(2)).as_bytes());
        assert!(!stream.wants_data());

        let mut rx = waiter(&mut stream);
        take(&mut rx);
        assert!(stream.wants_data());
        assert!(!stream.reply_done());
    }
}
