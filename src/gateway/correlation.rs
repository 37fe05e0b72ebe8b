//! Correlation table - outstanding requests keyed by request id
//!
//! Each entry is completed at most once: by a reply, by its timer, by a
//! cancel, or by a bulk failure when the connection goes away. Removal from
//! the table is what makes that guarantee hold.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use super::protocol::Envelope;
use super::stream::StreamEntry;
use crate::error::{Error, Result};

/// What kind of caller is waiting on an id
pub(crate) enum Waiter {
    /// One-shot request awaiting a single reply
    Request {
        reply: oneshot::Sender<Result<Value>>,
        timeout: Duration,
        timer: Option<AbortHandle>,
    },
    /// Stream awaiting chunks and a terminal frame
    Stream(StreamEntry),
}

/// One outstanding request
pub(crate) struct PendingRequest {
    pub id: String,
    pub created_at: Instant,
    pub waiter: Waiter,
}

impl PendingRequest {
    pub(crate) fn request(
        id: String,
        timeout: Duration,
        reply: oneshot::Sender<Result<Value>>,
        timer: Option<AbortHandle>,
    ) -> Self {
        PendingRequest {
            id,
            created_at: Instant::now(),
            waiter: Waiter::Request {
                reply,
                timeout,
                timer,
            },
        }
    }

    pub(crate) fn stream(id: String, entry: StreamEntry) -> Self {
        PendingRequest {
            id,
            created_at: Instant::now(),
            waiter: Waiter::Stream(entry),
        }
    }

    /// Complete with an outcome, consuming the entry
    fn finish(self, outcome: Result<Value>) {
        match self.waiter {
            Waiter::Request { reply, timer, .. } => {
                if let Some(timer) = timer {
                    timer.abort();
                }
                // Receiver gone means the caller stopped waiting
                let _ = reply.send(outcome);
            }
            Waiter::Stream(entry) => {
                if let Err(e) = outcome {
                    entry.fail(e);
                }
            }
        }
    }
}

/// Outstanding requests, exclusively owned by the connection actor
#[derive(Default)]
pub(crate) struct CorrelationTable {
    entries: HashMap<String, PendingRequest>,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert a new entry.
    ///
    /// An id collision leaves the existing entry untouched and fails the new
    /// one with [`Error::DuplicateRequestId`].
    pub(crate) fn register(&mut self, pending: PendingRequest) -> Result<()> {
        if self.entries.contains_key(&pending.id) {
            error!("Request id collision on {}", pending.id);
            let id = pending.id.clone();
            pending.finish(Err(Error::DuplicateRequestId(id.clone())));
            return Err(Error::DuplicateRequestId(id));
        }
        trace!("Registered pending request {}", pending.id);
        self.entries.insert(pending.id.clone(), pending);
        Ok(())
    }

    /// Route an inbound envelope to the entry it correlates with.
    ///
    /// Returns `true` if an entry consumed it.
    pub(crate) fn dispatch(&mut self, envelope: &Envelope) -> bool {
        let Some(id) = self.route(envelope) else {
            trace!("Uncorrelated {} frame", envelope.kind);
            return false;
        };
        let Some(pending) = self.entries.get_mut(id) else {
            return false;
        };

        match &mut pending.waiter {
            Waiter::Stream(entry) => {
                if entry.deliver(envelope) {
                    self.entries.remove(id);
                }
            }
            Waiter::Request { .. } => {
                if let Some(pending) = self.entries.remove(id) {
                    debug!(
                        "Reply for {} after {}ms",
                        pending.id,
                        pending.created_at.elapsed().as_millis()
                    );
                    let outcome = match &envelope.error {
                        Some(err) => Err(Error::Remote(err.clone())),
                        None => Ok(envelope.payload_or_null()),
                    };
                    pending.finish(outcome);
                }
            }
        }
        true
    }

    /// Envelope `id` matches any entry; a payload `id` only matches a stream,
    /// so an event mentioning a request id never completes that request.
    fn route<'e>(&self, envelope: &'e Envelope) -> Option<&'e str> {
        if let Some(id) = envelope.id.as_deref() {
            if self.entries.contains_key(id) {
                return Some(id);
            }
        }
        let id = envelope.payload_id()?;
        match self.entries.get(id).map(|p| &p.waiter) {
            Some(Waiter::Stream(_)) => Some(id),
            _ => None,
        }
    }

    /// Fail a request whose timer fired. Streams have no timer.
    pub(crate) fn expire(&mut self, id: &str) -> bool {
        let after = match self.entries.get(id).map(|p| &p.waiter) {
            Some(Waiter::Request { timeout, .. }) => *timeout,
            _ => return false,
        };
        self.fail(
            id,
            Error::Timeout {
                id: id.to_string(),
                after,
            },
        )
    }

    /// Complete one entry with an error (e.g. a failed send)
    pub(crate) fn fail(&mut self, id: &str, error: Error) -> bool {
        match self.entries.remove(id) {
            Some(pending) => {
                pending.finish(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drop an entry without notifying its caller
    pub(crate) fn cancel(&mut self, id: &str) -> bool {
        match self.entries.remove(id) {
            Some(pending) => {
                if let Waiter::Request {
                    timer: Some(timer), ..
                } = pending.waiter
                {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Fail every entry. Returns how many were failed.
    pub(crate) fn fail_all(&mut self, make_error: impl Fn() -> Error) -> usize {
        let count = self.entries.len();
        for (_, pending) in self.entries.drain() {
            pending.finish(Err(make_error()));
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::stream::{StreamCallbacks, StreamGate};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn request(id: &str) -> (PendingRequest, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingRequest::request(id.to_string(), Duration::from_secs(30), tx, None),
            rx,
        )
    }

    #[tokio::test]
    async fn test_reply_completes_matching_entry() {
        let mut table = CorrelationTable::new();
        let (a, mut rx_a) = request("a");
        let (b, rx_b) = request("b");
        table.register(a).unwrap();
        table.register(b).unwrap();

        assert!(table.dispatch(&Envelope::reply("x", "b", json!(2))));
        assert_eq!(rx_b.await.unwrap().unwrap(), json!(2));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_error_reply_and_missing_payload() {
        let mut table = CorrelationTable::new();
        let (a, rx_a) = request("a");
        let (b, rx_b) = request("b");
        table.register(a).unwrap();
        table.register(b).unwrap();

        table.dispatch(&Envelope::failure("x", "a", "denied"));
        let mut bare = Envelope::event("x", None);
        bare.id = Some("b".into());
        table.dispatch(&bare);

        assert!(matches!(rx_a.await.unwrap(), Err(Error::Remote(m)) if m == "denied"));
        assert_eq!(rx_b.await.unwrap().unwrap(), Value::Null);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_expire_then_late_reply_is_ignored() {
        let mut table = CorrelationTable::new();
        let (a, rx) = request("a");
        table.register(a).unwrap();

        assert!(table.expire("a"));
        assert!(!table.expire("a"));
        assert!(!table.dispatch(&Envelope::reply("x", "a", json!(1))));
        assert!(matches!(rx.await.unwrap(), Err(Error::Timeout { ref id, .. }) if id == "a"));
    }

    #[tokio::test]
    async fn test_duplicate_id_keeps_existing_entry() {
        let mut table = CorrelationTable::new();
        let (first, rx_first) = request("dup");
        let (second, rx_second) = request("dup");
        table.register(first).unwrap();

        assert!(matches!(table.register(second), Err(Error::DuplicateRequestId(_))));
        assert!(matches!(rx_second.await.unwrap(), Err(Error::DuplicateRequestId(ref id)) if id == "dup"));

        table.dispatch(&Envelope::reply("x", "dup", json!("ok")));
        assert_eq!(rx_first.await.unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_fail_all_and_cancel() {
        let mut table = CorrelationTable::new();
        let (a, rx_a) = request("a");
        let (b, rx_b) = request("b");
        table.register(a).unwrap();
        table.register(b).unwrap();

        assert!(table.cancel("b"));
        assert!(rx_b.await.is_err());

        assert_eq!(table.fail_all(|| Error::ConnectionLost), 1);
        assert!(matches!(rx_a.await.unwrap(), Err(Error::ConnectionLost)));
        assert!(!table.cancel("a"));
    }

    #[tokio::test]
    async fn test_payload_id_never_completes_a_request() {
        let mut table = CorrelationTable::new();
        let (a, mut rx) = request("msg_1_1");
        table.register(a).unwrap();

        let progress = Envelope::event("skills.progress", Some(json!({"id": "msg_1_1", "pct": 50})));
        assert!(!table.dispatch(&progress));
        assert!(rx.try_recv().is_err());
        assert_eq!(table.len(), 1);

        assert!(table.dispatch(&Envelope::reply("skills.execute", "msg_1_1", json!({"success": true}))));
        assert_eq!(rx.await.unwrap().unwrap(), json!({"success": true}));
    }

    #[test]
    fn test_stream_entry_routing_by_payload_id() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let callbacks = {
            let chunks = Arc::clone(&chunks);
            StreamCallbacks::new().on_chunk(move |c| chunks.lock().unwrap().push(c))
        };
        let entry = StreamEntry::new("agent.stream".into(), callbacks, StreamGate::new());
        let mut table = CorrelationTable::new();
        table.register(PendingRequest::stream("s".into(), entry)).unwrap();

        let chunk = Envelope::event("agent.stream.chunk", Some(json!({"id": "s", "chunk": "x"})));
        assert!(table.dispatch(&chunk));
        assert!(!table.expire("s"));

        let done = Envelope::event("agent.stream.complete", Some(json!({"id": "s"})));
        assert!(table.dispatch(&done));
        assert!(!table.contains("s"));
        assert_eq!(*chunks.lock().unwrap(), vec![json!("x")]);
    }
}
