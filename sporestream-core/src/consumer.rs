//! Opening an exchange and consuming it as a lazy [`Stream`] of events.
//!
//! Contract:
//! - [`StreamConsumer::open`] fails with a connection error before any event
//!   if the request cannot be established.
//! - [`EventStream`] yields events in byte-arrival order and ends right after
//!   exactly one terminal event.
//! - The response body is released exactly once: when the terminal event is
//!   decoded, on cancel, or on drop, whichever comes first.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::{Stream, StreamExt};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::Span;

use crate::config::{Config, EndpointCfg};
use crate::decoder::{EventDecoder, PayloadDecoder};
use crate::error::CoreResult;
use crate::http_client::{ByteStream, HttpClient, RequestCtx};
use crate::model::StreamRequest;
use crate::stream::{ErrorKind, Status, StreamEvent};
use crate::telemetry::keys::*;

/// Cloneable handle that cancels one exchange from anywhere.
///
/// Cancelling is idempotent and harmless after the exchange has ended.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Issues requests against one endpoint with one payload decoder.
#[derive(Clone)]
pub struct StreamConsumer {
    http: HttpClient,
    endpoint: EndpointCfg,
    decoder: Arc<dyn PayloadDecoder>,
    settle: Option<Duration>,
}

impl StreamConsumer {
    pub fn new(
        http: HttpClient,
        endpoint: EndpointCfg,
        decoder: Arc<dyn PayloadDecoder>,
        settle: Option<Duration>,
    ) -> Self {
        Self {
            http,
            endpoint,
            decoder,
            settle,
        }
    }

    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        cfg.validate()?;
        let http = HttpClient::from_cfg(&cfg.http)?;
        Ok(Self::new(
            http,
            cfg.endpoint.clone(),
            cfg.stream.schema.decoder(),
            cfg.stream.settle(),
        ))
    }

    /// Swap the payload decoder, e.g. for a page that speaks its own shape.
    pub fn with_decoder(mut self, decoder: Arc<dyn PayloadDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn endpoint(&self) -> &EndpointCfg {
        &self.endpoint
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn schema_name(&self) -> &str {
        self.decoder.name()
    }

    /// POST the request and return the event stream for its response.
    pub async fn open(
        &self,
        request: &StreamRequest,
        conversation_id: Option<&str>,
    ) -> CoreResult<EventStream> {
        let span = tracing::info_span!(
            "sse.exchange",
            "conversation.id" = conversation_id.unwrap_or(""),
            "req.id" = request.request_id.as_deref().unwrap_or(""),
            "stream.schema" = self.decoder.name(),
            "http.status" = tracing::field::Empty,
            "latency.ms" = tracing::field::Empty,
            "stream.outcome" = tracing::field::Empty,
            "stream.fragments" = tracing::field::Empty,
            "stream.chars" = tracing::field::Empty,
        );

        let headers: Vec<(&str, &str)> = self
            .endpoint
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let bearer = self.endpoint.api_key();
        let ctx = RequestCtx {
            request_id: request.request_id.as_deref(),
            conversation_id,
        };

        let opened = match self
            .http
            .post_stream(&self.endpoint.url, request, &headers, bearer.as_ref(), &ctx)
            .await
        {
            Ok(o) => o,
            Err(e) => {
                span.record(KEY_OUTCOME, "connection_error");
                let _enter = span.enter();
                tracing::warn!(error = %e, "exchange could not be established");
                return Err(e);
            }
        };
        span.record(KEY_HTTP_STATUS, opened.status);
        span.record(KEY_LATENCY_MS, opened.latency_ms);

        let mut events = EventStream::from_body(opened.body, self.decoder.clone(), self.settle);
        events.http_status = Some(opened.status);
        events.latency_ms = Some(opened.latency_ms);
        Ok(events.in_span(span))
    }
}

/// The lazy, finite, non-restartable sequence of events for one exchange.
pub struct EventStream {
    body: Option<ByteStream>,
    decoder: EventDecoder,
    queue: VecDeque<StreamEvent>,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    settle: Option<Duration>,
    settle_timer: Option<Pin<Box<tokio::time::Sleep>>>,
    released: bool,
    fragments: usize,
    chars: usize,
    http_status: Option<u16>,
    latency_ms: Option<u32>,
    span: Span,
}

impl EventStream {
    /// Wrap any byte source. The HTTP path goes through [`StreamConsumer::open`].
    pub fn from_body(
        body: ByteStream,
        decoder: Arc<dyn PayloadDecoder>,
        settle: Option<Duration>,
    ) -> Self {
        let token = CancellationToken::new();
        Self {
            body: Some(body),
            decoder: EventDecoder::new(decoder),
            queue: VecDeque::new(),
            cancelled: Box::pin(token.clone().cancelled_owned()),
            token,
            settle,
            settle_timer: None,
            released: false,
            fragments: 0,
            chars: 0,
            http_status: None,
            latency_ms: None,
            span: Span::none(),
        }
    }

    fn in_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }

    /// Cancel and release the body right away. Safe to call any number of times.
    ///
    /// If the exchange had not ended yet, the next poll yields one
    /// `Cancelled` error and then the stream ends.
    pub fn cancel(&mut self) {
        self.token.cancel();
        self.release("cancelled");
    }

    /// Response status, when the stream came from [`StreamConsumer::open`].
    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    /// Time until response headers arrived, in milliseconds.
    pub fn latency_ms(&self) -> Option<u32> {
        self.latency_ms
    }

    /// True once the response body has been dropped.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// True once the terminal event has been produced (it may still be queued).
    pub fn is_terminated(&self) -> bool {
        self.decoder.is_terminated()
    }

    /// True once the terminal event has been handed out and nothing is left to yield.
    pub fn is_drained(&self) -> bool {
        self.decoder.is_terminated() && self.queue.is_empty()
    }

    fn release(&mut self, reason: &'static str) {
        if let Some(body) = self.body.take() {
            drop(body);
            self.released = true;
            let _enter = self.span.enter();
            tracing::debug!(reason, "transport released");
        }
    }

    fn enqueue(&mut self, events: Vec<StreamEvent>) {
        for ev in events {
            match &ev {
                StreamEvent::Content(text) => {
                    self.fragments += 1;
                    self.chars += text.chars().count();
                }
                StreamEvent::Status(Status::Done) => {
                    if let (Some(d), None) = (self.settle, self.settle_timer.as_ref()) {
                        self.settle_timer = Some(Box::pin(tokio::time::sleep(d)));
                    }
                }
                _ => {}
            }
            let terminal = ev.is_terminal();
            self.queue.push_back(ev);
            if terminal {
                self.finish_with(self.queue.back().cloned());
                break;
            }
        }
    }

    fn finish_with(&mut self, terminal: Option<StreamEvent>) {
        self.settle_timer = None;
        let outcome = match &terminal {
            Some(StreamEvent::Complete) => "complete",
            Some(StreamEvent::Error(e)) => e.kind.as_str(),
            _ => "ended",
        };
        self.span.record(KEY_OUTCOME, outcome);
        self.span.record(KEY_FRAGMENTS, self.fragments as u64);
        self.span.record(KEY_CHARS, self.chars as u64);
        self.release(outcome_reason(outcome));
    }
}

fn outcome_reason(outcome: &str) -> &'static str {
    match outcome {
        "complete" => "complete",
        "cancelled" => "cancelled",
        _ => "terminal error",
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if !this.decoder.is_terminated() && this.cancelled.as_mut().poll(cx).is_ready() {
                this.decoder.terminate();
                this.queue.clear();
                let ev = StreamEvent::cancelled();
                this.finish_with(Some(ev.clone()));
                return Poll::Ready(Some(ev));
            }

            if let Some(ev) = this.queue.pop_front() {
                return Poll::Ready(Some(ev));
            }
            if this.decoder.is_terminated() {
                return Poll::Ready(None);
            }

            if let Some(timer) = this.settle_timer.as_mut()
                && timer.as_mut().poll(cx).is_ready()
            {
                this.span.in_scope(|| tracing::debug!("settle delay elapsed after done status"));
                this.decoder.terminate();
                this.finish_with(Some(StreamEvent::Complete));
                return Poll::Ready(Some(StreamEvent::Complete));
            }

            let Some(body) = this.body.as_mut() else {
                // `cancel` trips the token before releasing, so the check above wins.
                debug_assert!(false, "body released before a terminal event");
                return Poll::Ready(None);
            };
            match body.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let events = this.decoder.feed(&chunk);
                    this.enqueue(events);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.decoder.terminate();
                    this.enqueue(vec![StreamEvent::error(ErrorKind::Transport, e.to_string())]);
                }
                Poll::Ready(None) => {
                    let events = this.decoder.finish();
                    if events.last() == Some(&StreamEvent::interrupted()) {
                        let _enter = this.span.enter();
                        tracing::warn!("body closed before a terminal frame");
                    }
                    this.enqueue(events);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if self.body.is_some() {
            self.release("abandoned");
        }
    }
}
