//! Streaming requests
//!
//! A stream request registers a set of callbacks under its request id.
//! Correlated frames are classified into chunks and a single terminal
//! outcome. Once a stream is closed (completed, failed or cancelled) none
//! of its callbacks fire again.

use parking_lot::ReentrantMutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::connection::Command;
use super::events::isolate;
use super::protocol::Envelope;
use crate::error::Error;

type ChunkFn = Box<dyn FnMut(Value) + Send + 'static>;
type CompleteFn = Box<dyn FnOnce(Value) + Send + 'static>;
type ErrorFn = Box<dyn FnOnce(Error) + Send + 'static>;

/// Callbacks for one stream request
#[derive(Default)]
pub struct StreamCallbacks {
    on_chunk: Option<ChunkFn>,
    on_complete: Option<CompleteFn>,
    on_error: Option<ErrorFn>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for each chunk, in arrival order
    pub fn on_chunk<F>(mut self, f: F) -> Self
    where
        F: FnMut(Value) + Send + 'static,
    {
        self.on_chunk = Some(Box::new(f));
        self
    }

    /// Called once with the final result
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Called once if the stream fails
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_chunk", &self.on_chunk.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Shared between a [`StreamHandle`] and the actor's stream entry.
///
/// Callback dispatch and cancellation both run under `lock`, so a cancel
/// issued from another thread waits for an in-flight callback, while a
/// cancel issued from inside a callback re-enters without deadlock.
#[derive(Debug, Default)]
pub(crate) struct StreamGate {
    lock: ReentrantMutex<()>,
    closed: AtomicBool,
}

impl StreamGate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// How a stream ended
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamEnd {
    Complete(Value),
    Failed(String),
}

/// One correlated frame, split into its parts
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct StreamFrame {
    pub chunk: Option<Value>,
    pub end: Option<StreamEnd>,
}

impl StreamFrame {
    /// Classify an envelope routed to a stream opened with `request_kind`.
    ///
    /// - an `error` on the envelope or in the payload fails the stream
    /// - a payload `chunk` field is delivered as a chunk
    /// - `complete: true`, or a type ending in `.complete`/`.done`, ends
    ///   the stream with `payload.message` (or the whole payload)
    /// - any other frame of a different type is itself a chunk
    /// - a bare frame of the request's own type is an acknowledgement
    pub(crate) fn classify(request_kind: &str, envelope: &Envelope) -> Self {
        if let Some(err) = &envelope.error {
            return StreamFrame {
                chunk: None,
                end: Some(StreamEnd::Failed(err.clone())),
            };
        }

        let payload = envelope.payload_or_null();
        if let Some(err) = payload.get("error").filter(|e| !e.is_null()) {
            let message = err
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return StreamFrame {
                chunk: None,
                end: Some(StreamEnd::Failed(message)),
            };
        }

        let explicit_chunk = payload.get("chunk").filter(|c| !c.is_null()).cloned();
        let complete = payload.get("complete").and_then(Value::as_bool) == Some(true)
            || envelope.kind.ends_with(".complete")
            || envelope.kind.ends_with(".done");

        if complete {
            let result = payload
                .get("message")
                .filter(|m| !m.is_null())
                .cloned()
                .unwrap_or_else(|| payload.clone());
            return StreamFrame {
                chunk: explicit_chunk,
                end: Some(StreamEnd::Complete(result)),
            };
        }

        let chunk = match explicit_chunk {
            Some(chunk) => Some(chunk),
            None if envelope.kind == request_kind => None,
            None => Some(payload),
        };
        StreamFrame { chunk, end: None }
    }
}

/// Actor-side state of an open stream
pub(crate) struct StreamEntry {
    kind: String,
    callbacks: StreamCallbacks,
    gate: Arc<StreamGate>,
}

impl StreamEntry {
    pub(crate) fn new(kind: String, callbacks: StreamCallbacks, gate: Arc<StreamGate>) -> Self {
        StreamEntry {
            kind,
            callbacks,
            gate,
        }
    }

    /// Deliver one envelope. Returns `true` when the stream is finished
    /// and its entry should be dropped.
    pub(crate) fn deliver(&mut self, envelope: &Envelope) -> bool {
        let frame = StreamFrame::classify(&self.kind, envelope);
        let gate = Arc::clone(&self.gate);
        let _guard = gate.lock.lock();
        if gate.is_closed() {
            return true;
        }

        if let Some(chunk) = frame.chunk {
            if let Some(on_chunk) = self.callbacks.on_chunk.as_mut() {
                isolate("stream chunk", || on_chunk(chunk));
            }
            // The chunk callback may have cancelled the stream
            if gate.is_closed() {
                return true;
            }
        }

        match frame.end {
            None => false,
            Some(StreamEnd::Complete(result)) => {
                gate.closed.store(true, Ordering::Release);
                if let Some(on_complete) = self.callbacks.on_complete.take() {
                    isolate("stream complete", || on_complete(result));
                }
                true
            }
            Some(StreamEnd::Failed(message)) => {
                gate.closed.store(true, Ordering::Release);
                if let Some(on_error) = self.callbacks.on_error.take() {
                    isolate("stream error", || on_error(Error::Remote(message)));
                }
                true
            }
        }
    }

    /// Fail the stream unless it already finished
    pub(crate) fn fail(mut self, error: Error) {
        let gate = Arc::clone(&self.gate);
        let _guard = gate.lock.lock();
        if gate.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(on_error) = self.callbacks.on_error.take() {
            isolate("stream error", || on_error(error));
        }
    }
}

/// Caller's handle on an open stream
#[derive(Debug)]
pub struct StreamHandle {
    id: String,
    kind: String,
    gate: Arc<StreamGate>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl StreamHandle {
    pub(crate) fn new(
        id: String,
        kind: String,
        gate: Arc<StreamGate>,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        StreamHandle {
            id,
            kind,
            gate,
            commands,
        }
    }

    /// Request id of the stream
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the stream has completed, failed or been cancelled
    pub fn is_finished(&self) -> bool {
        self.gate.is_closed()
    }

    /// Stop the stream.
    ///
    /// No callback fires after this returns. The gateway is sent a
    /// `<type>.cancel` notice the first time an open stream is cancelled;
    /// later calls, and calls after the stream finished, do nothing.
    pub fn cancel(&self) {
        let _guard = self.gate.lock.lock();
        if self.gate.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(tx) = self.commands.upgrade() {
            let _ = tx.send(Command::CancelStream {
                id: self.id.clone(),
                kind: self.kind.clone(),
            });
        }
    }
}
