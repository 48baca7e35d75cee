//! Bridge from [`Engine::stream_text`] to an SSE response.
//!
//! The engine runs in its own task and writes frames into a channel with
//! capacity one, so a slow client holds back the upstream read. When the
//! client goes away the channel closes, the engine call is dropped and no
//! terminal `[DONE]` frame is written.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderValue;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::engine::{self, DeltaSink, Engine, EngineError, GenerateOptions, Message};

pub const DONE_SENTINEL: &str = "[DONE]";

/// Turns engine output into surface-specific SSE frames.
pub trait StreamEncoder: Send + 'static {
    fn delta(&mut self, delta: &str) -> Event;

    fn error(&mut self, err: &EngineError) -> Event;

    /// Optional frame written before `[DONE]` on success.
    fn completed(&mut self, _full_text: &str) -> Option<Event> {
        None
    }
}

/// SSE event whose data is `payload` serialized as JSON.
pub fn json_event(name: Option<&str>, payload: &impl Serialize) -> Event {
    let data = serde_json::to_string(payload).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to encode SSE payload");
        "{}".to_string()
    });
    let event = match name {
        Some(name) => Event::default().event(name),
        None => Event::default(),
    };
    event.data(data)
}

struct ChannelSink<E> {
    tx: mpsc::Sender<Event>,
    encoder: E,
}

#[async_trait]
impl<E: StreamEncoder> DeltaSink for ChannelSink<E> {
    async fn send_delta(&mut self, delta: &str) -> engine::Result<()> {
        let event = self.encoder.delta(delta);
        self.tx.send(event).await.map_err(|_| EngineError::Canceled)
    }
}

/// Everything needed to run one streamed generation.
pub struct StreamJob {
    pub engine: Arc<dyn Engine>,
    pub model: String,
    pub messages: Vec<Message>,
    pub options: GenerateOptions,
}

/// Start `job` and return the SSE response that carries its output.
pub fn sse_response<E: StreamEncoder>(job: StreamJob, encoder: E) -> Response {
    let (tx, rx) = mpsc::channel::<Event>(1);

    tokio::spawn(run(job, ChannelSink { tx, encoder }).instrument(tracing::Span::current()));

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut response = Sse::new(stream).into_response();
    response
        .headers_mut()
        .insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

async fn run<E: StreamEncoder>(job: StreamJob, mut sink: ChannelSink<E>) {
    let closed = sink.tx.clone();
    let result = tokio::select! {
        result = job.engine.stream_text(&job.model, &job.messages, &job.options, &mut sink) => result,
        _ = closed.closed() => Err(EngineError::Canceled),
    };

    let frames = match result {
        Ok(full) => {
            let mut frames: Vec<Event> = sink.encoder.completed(&full).into_iter().collect();
            frames.push(Event::default().data(DONE_SENTINEL));
            frames
        }
        Err(EngineError::Canceled) => {
            tracing::debug!(model = %job.model, "stream canceled by client");
            return;
        }
        Err(e) => {
            tracing::warn!(model = %job.model, error = %e, "stream failed");
            vec![sink.encoder.error(&e)]
        }
    };

    for frame in frames {
        if sink.tx.send(frame).await.is_err() {
            tracing::debug!(model = %job.model, "client left before the stream ended");
            return;
        }
    }
}
