//! Gateway client handle
//!
//! [`GatewayClient`] is a cheap, cloneable handle onto the connection actor.
//! All clones share one connection; the actor shuts down once the last
//! clone is dropped.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::connection::{self, Command};
use super::events::Subscription;
use super::protocol::Envelope;
use super::reconnect::ConnectionState;
use super::stream::{StreamCallbacks, StreamGate, StreamHandle};
use super::transport::{Transport, WebSocketTransport};
use crate::config::{Config, ConfigUpdate};
use crate::error::{Error, Result};

struct ClientInner {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    config: watch::Sender<Config>,
    next_subscription: AtomicU64,
}

/// Handle to a gateway connection
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("url", &self.inner.config.borrow().gateway.url)
            .field("state", &self.state())
            .finish()
    }
}

impl GatewayClient {
    /// Create a client over WebSocket. Must be called inside a tokio runtime.
    ///
    /// Nothing is connected until [`connect`](Self::connect) is called.
    /// Each attempt is bounded by the current `gateway.connect_timeout`.
    pub fn new(config: Config) -> Self {
        Self::with_transport(config, WebSocketTransport::without_timeout())
    }

    /// Create a client over a custom transport
    pub fn with_transport<T: Transport>(config: Config, transport: T) -> Self {
        let (config_tx, config_rx) = watch::channel(config);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let commands = connection::spawn(Arc::new(transport), config_rx, state_tx);
        GatewayClient {
            inner: Arc::new(ClientInner {
                commands,
                state: state_rx,
                config: config_tx,
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    fn send_command(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| Error::ConnectionLost)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the connection.
    ///
    /// Returns `true` once connected, `false` if the client is disabled or
    /// the attempt failed. Concurrent callers share a single attempt, and
    /// calling while already connected returns `true` without reconnecting.
    pub async fn connect(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.send_command(Command::Connect { reply: tx }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Pending requests and open streams fail with
    /// [`Error::ConnectionLost`]. Subscriptions are kept.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send_command(Command::Disconnect { reply: tx }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Send a request and wait for its reply, using the configured timeout
    pub async fn request(&self, kind: &str, payload: impl Into<Option<Value>>) -> Result<Value> {
        let timeout = self.inner.config.borrow().gateway.request_timeout;
        self.request_with_timeout(kind, payload, timeout).await
    }

    /// Send a request with an explicit timeout
    pub async fn request_with_timeout(
        &self,
        kind: &str,
        payload: impl Into<Option<Value>>,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Request {
            kind: kind.to_string(),
            payload: payload.into(),
            timeout,
            reply: tx,
        })?;
        rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Send a request and decode the reply payload into `T`
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        kind: &str,
        payload: impl Into<Option<Value>>,
    ) -> Result<T> {
        let value = self.request(kind, payload).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::UnexpectedPayload(format!("{} reply: {}", kind, e)))
    }

    /// Send an uncorrelated event. No reply is expected.
    pub async fn emit_event(&self, kind: &str, payload: impl Into<Option<Value>>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Emit {
            envelope: Envelope::event(kind, payload.into()),
            reply: tx,
        })?;
        rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Open a stream request.
    ///
    /// Fails with [`Error::NotConnected`] immediately when there is no
    /// connection; later failures reach `on_error`.
    pub async fn stream_request(
        &self,
        kind: &str,
        payload: impl Into<Option<Value>>,
        callbacks: StreamCallbacks,
    ) -> Result<StreamHandle> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let gate = StreamGate::new();
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Stream {
            kind: kind.to_string(),
            payload: payload.into(),
            callbacks,
            gate: Arc::clone(&gate),
            reply: tx,
        })?;
        let id = rx.await.map_err(|_| Error::ConnectionLost)??;
        debug!("Stream {} open for {}", id, kind);
        Ok(StreamHandle::new(
            id,
            kind.to_string(),
            gate,
            self.inner.commands.downgrade(),
        ))
    }

    /// Number of requests and streams awaiting completion
    pub async fn pending_requests(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.send_command(Command::PendingCount { reply: tx }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Subscribe to an event type.
    ///
    /// The callback receives the payload of every inbound envelope of that
    /// type (`null` when absent), plus the client's own `connected`,
    /// `disconnected` and `error` events. Subscriptions survive reconnects.
    pub fn on<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + 'static,
    {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        let _ = self.send_command(Command::Subscribe {
            event: event.to_string(),
            id,
            callback: Box::new(callback),
        });
        Subscription::new(event.to_string(), id, self.inner.commands.downgrade())
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Snapshot of the current configuration
    pub fn config(&self) -> Config {
        self.inner.config.borrow().clone()
    }

    /// Apply a partial update.
    ///
    /// Takes effect for later operations; a new gateway URL is used on the
    /// next connect attempt.
    pub fn update_config(&self, update: ConfigUpdate) {
        self.inner.config.send_modify(|config| config.apply(update));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::protocol::events;
    use crate::gateway::transport::mock::{MockPeer, MockTransport};
    use crate::gateway::transport::Outbound;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn test_config(auto_connect: bool) -> Config {
        let mut config = Config::default();
        config.gateway.auto_connect = auto_connect;
        config.gateway.request_timeout = Duration::from_millis(30_000);
        config.gateway.reconnect.base_delay = Duration::from_millis(1000);
        config.gateway.reconnect.max_attempts = 3;
        config
    }

    async fn connected(
        config: Config,
    ) -> (GatewayClient, MockTransport, mpsc::UnboundedReceiver<MockPeer>, MockPeer) {
        let (transport, mut peers) = MockTransport::new();
        let client = GatewayClient::with_transport(config, transport.clone());
        assert!(client.connect().await);
        let peer = peers.recv().await.unwrap();
        (client, transport, peers, peer)
    }

    fn counter(client: &GatewayClient, event: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        client.on(event, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    /// Channel fed by a subscription, used to wait for inbound processing
    fn listen(client: &GatewayClient, event: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on(event, move |payload| {
            let _ = tx.send(payload.clone());
        });
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_while_disconnected_fails_fast() {
        let (transport, _peers) = MockTransport::new();
        let client = GatewayClient::with_transport(test_config(false), transport.clone());

        let started = Instant::now();
        let result = client.request("status", None).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(matches!(
            client.emit_event("ping", None).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            client.stream_request("agent.stream", None, StreamCallbacks::new()).await,
            Err(Error::NotConnected)
        ));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(transport.attempts(), 0);
        assert_eq!(client.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let (transport, mut peers) = MockTransport::new();
        let client = GatewayClient::with_transport(test_config(false), transport.clone());
        let connected_events = counter(&client, events::CONNECTED);

        let (a, b) = tokio::join!(client.connect(), client.connect());
        assert!(a && b);
        assert!(client.connect().await);

        assert_eq!(transport.attempts(), 1);
        assert!(peers.recv().await.is_some());
        assert!(peers.try_recv().is_err());
        assert_eq!(connected_events.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_client_never_connects() {
        let (transport, _peers) = MockTransport::new();
        let mut config = test_config(true);
        config.enabled = false;
        let client = GatewayClient::with_transport(config, transport.clone());

        assert!(!client.connect().await);
        assert_eq!(transport.attempts(), 0);
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_reports_error_event() {
        let (transport, _peers) = MockTransport::new();
        transport.fail_next(1);
        let client = GatewayClient::with_transport(test_config(false), transport.clone());
        let mut errors = listen(&client, events::ERROR);

        assert!(!client.connect().await);
        let payload = errors.recv().await.unwrap();
        assert!(payload["error"].as_str().unwrap().contains("connection refused"));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skills_list_round_trip() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request("skills.list", json!({})).await }
        });

        let sent = peer.next_sent().await;
        assert_eq!(sent.kind, "skills.list");
        assert_eq!(sent.payload, Some(json!({})));
        let id = sent.id.clone().unwrap();
        assert!(id.starts_with("msg_"));

        let skills = json!([{"name": "bloop-code-review", "type": "bundled"}]);
        peer.push(Envelope::reply("skills.list", id, skills.clone())).await;

        assert_eq!(pending.await.unwrap().unwrap(), skills);
        assert_eq!(client.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_replies_reach_their_callers() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.request("a", None).await }
        });
        let id_a = peer.next_sent().await.id.unwrap();
        let second = tokio::spawn({
            let client = client.clone();
            async move { client.request("b", None).await }
        });
        let id_b = peer.next_sent().await.id.unwrap();
        assert_ne!(id_a, id_b);

        peer.push(Envelope::reply("b", id_b, json!("B"))).await;
        peer.push(Envelope::reply("a", id_a, json!("A"))).await;

        assert_eq!(first.await.unwrap().unwrap(), json!("A"));
        assert_eq!(second.await.unwrap().unwrap(), json!("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_echoing_request_id_does_not_resolve_it() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;
        let mut progress = listen(&client, "skills.progress");

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request("skills.execute", json!({"skillName": "lint"})).await }
        });
        let id = peer.next_sent().await.id.unwrap();

        peer.push(Envelope::event("skills.progress", Some(json!({"id": id, "pct": 50}))))
            .await;
        assert_eq!(progress.recv().await.unwrap()["pct"], json!(50));
        assert!(!pending.is_finished());
        assert_eq!(client.pending_requests().await, 1);

        peer.push(Envelope::reply("skills.execute", id, json!({"success": true}))).await;
        assert_eq!(pending.await.unwrap().unwrap(), json!({"success": true}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error_and_missing_payload() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;

        let failing = tokio::spawn({
            let client = client.clone();
            async move { client.request("skills.execute", json!({"skillName": "nope"})).await }
        });
        let id = peer.next_sent().await.id.unwrap();
        peer.push(Envelope::failure("skills.execute", id, "unknown skill")).await;
        assert!(matches!(
            failing.await.unwrap(),
            Err(Error::Remote(ref m)) if m == "unknown skill"
        ));

        let empty = tokio::spawn({
            let client = client.clone();
            async move { client.request("canvas.update", None).await }
        });
        let id = peer.next_sent().await.id.unwrap();
        peer.push(Envelope::request("canvas.update", id, None)).await;
        assert_eq!(empty.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_reply_is_ignored() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;
        let mut late = listen(&client, "status");

        let started = Instant::now();
        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request("status", None).await }
        });
        let id = peer.next_sent().await.id.unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::Timeout { ref id, .. }) if id.starts_with("msg_")));
        assert!(started.elapsed() >= Duration::from_millis(30_000));
        assert!(started.elapsed() < Duration::from_millis(30_100));
        assert_eq!(client.pending_requests().await, 0);

        // The late reply only reaches subscribers
        peer.push(Envelope::reply("status", id, json!({"sessions": 1}))).await;
        assert_eq!(late.recv().await.unwrap(), json!({"sessions": 1}));
        assert_eq!(client.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_timeout_overrides_config() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;

        let started = Instant::now();
        let pending = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .request_with_timeout("slow", None, Duration::from_millis(250))
                    .await
            }
        });
        let _ = peer.next_sent().await;
        assert_err!(pending.await.unwrap());
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_fails_pending_and_emits_once() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;
        let disconnected = counter(&client, events::DISCONNECTED);

        let a = tokio::spawn({
            let client = client.clone();
            async move { client.request("a", None).await }
        });
        let b = tokio::spawn({
            let client = client.clone();
            async move { client.request("b", None).await }
        });
        let _ = peer.next_sent().await;
        let _ = peer.next_sent().await;

        peer.close().await;
        assert!(matches!(a.await.unwrap(), Err(Error::ConnectionLost)));
        assert!(matches!(b.await.unwrap(), Err(Error::ConnectionLost)));
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff_schedule() {
        let (client, transport, _peers, peer) = connected(test_config(true)).await;
        transport.fail_next(10);
        let mut state = client.watch_state();

        peer.close().await;
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        let t0 = Instant::now();

        // attempts: initial connect + retries at +1000, +3000, +7000
        let checkpoints = [
            (999, 1),
            (1001, 2),
            (2999, 2),
            (3001, 3),
            (6999, 3),
            (7001, 4),
            (60_000, 4),
        ];
        for (at, expected) in checkpoints {
            tokio::time::sleep_until(t0 + Duration::from_millis(at)).await;
            assert_eq!(transport.attempts(), expected, "at +{}ms", at);
        }
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_restores_service_and_keeps_subscriptions() {
        let (client, _transport, mut peers, peer) = connected(test_config(true)).await;
        let connected_events = counter(&client, events::CONNECTED);
        let mut notices = listen(&client, "notice");

        peer.close().await;
        let mut peer = peers.recv().await.unwrap();
        let mut state = client.watch_state();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(connected_events.load(Ordering::SeqCst), 1);

        peer.push(Envelope::event("notice", Some(json!("hello")))).await;
        assert_eq!(notices.recv().await.unwrap(), json!("hello"));

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request("status", None).await }
        });
        let id = peer.next_sent().await.id.unwrap();
        peer.push(Envelope::reply("status", id, json!({"ok": true}))).await;
        assert_ok!(pending.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fails_pending_and_stops_reconnect() {
        let (client, transport, _peers, mut peer) = connected(test_config(true)).await;

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request("a", None).await }
        });
        let _ = peer.next_sent().await;

        client.disconnect().await;
        assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
        assert_eq!(client.state(), ConnectionState::Idle);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.attempts(), 1);
        assert!(matches!(
            client.request("a", None).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriber_panic_does_not_stop_dispatch() {
        let (client, _transport, _peers, peer) = connected(test_config(false)).await;
        client.on("status", |_| panic!("broken subscriber"));
        let mut healthy = listen(&client, "status");

        peer.push(Envelope::event("status", Some(json!(1)))).await;
        peer.push(Envelope::event("status", Some(json!(2)))).await;
        assert_eq!(healthy.recv().await.unwrap(), json!(1));
        assert_eq!(healthy.recv().await.unwrap(), json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_delivery() {
        let (client, _transport, _peers, peer) = connected(test_config(false)).await;
        let count = Arc::new(AtomicUsize::new(0));
        let sub = {
            let count = Arc::clone(&count);
            client.on("tick", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        let mut marker = listen(&client, "marker");

        peer.push(Envelope::event("tick", None)).await;
        peer.push(Envelope::event("marker", None)).await;
        marker.recv().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert_eq!(sub.event(), "tick");
        sub.unsubscribe();
        peer.push(Envelope::event("tick", None)).await;
        peer.push(Envelope::event("marker", None)).await;
        marker.recv().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_input_is_dropped() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request("status", None).await }
        });
        let id = peer.next_sent().await.id.unwrap();

        peer.push_raw("{not json").await;
        peer.push_raw(r#"{"id":"no-type"}"#).await;
        peer.push(Envelope::reply("status", id, json!("ok"))).await;

        assert_eq!(pending.await.unwrap().unwrap(), json!("ok"));
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_event_has_no_id() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;

        assert_ok!(client.emit_event("presence", json!({"online": true})).await);
        let sent = peer.next_sent().await;
        assert_eq!(sent.kind, "presence");
        assert_eq!(sent.id, None);
        assert_eq!(client.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_delivers_chunks_then_completes_once() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let callbacks = {
            let chunks = Arc::clone(&chunks);
            StreamCallbacks::new()
                .on_chunk(move |c| chunks.lock().unwrap().push(c))
                .on_complete(move |result| {
                    let _ = done_tx.send(result);
                })
        };
        let handle = client
            .stream_request("agent.stream", json!({"message": "hi"}), callbacks)
            .await
            .unwrap();
        let sent = peer.next_sent().await;
        assert_eq!(sent.id.as_deref(), Some(handle.id()));

        let id = handle.id().to_string();
        for part in ["Hel", "lo", "!"] {
            peer.push(Envelope::event(
                events::AGENT_STREAM_CHUNK,
                Some(json!({"id": id, "chunk": part})),
            ))
            .await;
        }
        peer.push(Envelope::event(
            events::AGENT_STREAM_CHUNK,
            Some(json!({"id": id, "complete": true, "message": {"content": "Hello!"}})),
        ))
        .await;

        assert_eq!(done_rx.recv().await.unwrap(), json!({"content": "Hello!"}));
        assert_eq!(*chunks.lock().unwrap(), vec![json!("Hel"), json!("lo"), json!("!")]);
        assert!(handle.is_finished());
        assert_eq!(client.pending_requests().await, 0);

        // Cancel after completion sends nothing
        handle.cancel();
        assert_eq!(client.pending_requests().await, 0);
        assert!(peer.try_next().is_none());
        assert!(done_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_cancel_is_idempotent_and_silences_callbacks() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        let mut marker = listen(&client, "marker");

        let handle = client
            .stream_request(
                "agent.stream",
                json!({"message": "long"}),
                StreamCallbacks::new().on_chunk(move |c| {
                    let _ = chunk_tx.send(c);
                }),
            )
            .await
            .unwrap();
        let id = peer.next_sent().await.id.unwrap();

        peer.push(Envelope::event(events::AGENT_STREAM_CHUNK, Some(json!({"id": id, "chunk": 1}))))
            .await;
        assert_eq!(chunk_rx.recv().await.unwrap(), json!(1));

        handle.cancel();
        handle.cancel();

        let notice = peer.next_sent().await;
        assert_eq!(notice.kind, "agent.stream.cancel");
        assert_eq!(notice.id, None);
        assert_eq!(notice.payload, Some(json!({"id": id})));

        peer.push(Envelope::event(events::AGENT_STREAM_CHUNK, Some(json!({"id": id, "chunk": 2}))))
            .await;
        peer.push(Envelope::event("marker", None)).await;
        marker.recv().await.unwrap();

        assert!(chunk_rx.try_recv().is_err());
        assert!(peer.try_next().is_none());
        assert_eq!(client.pending_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_cancel_from_inside_callback() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;
        let slot: Arc<Mutex<Option<StreamHandle>>> = Arc::new(Mutex::new(None));
        let seen = Arc::new(AtomicUsize::new(0));
        let mut marker = listen(&client, "marker");

        let callbacks = {
            let slot = Arc::clone(&slot);
            let seen = Arc::clone(&seen);
            StreamCallbacks::new().on_chunk(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = slot.lock().unwrap().as_ref() {
                    handle.cancel();
                }
            })
        };
        let handle = client.stream_request("agent.stream", None, callbacks).await.unwrap();
        let id = handle.id().to_string();
        *slot.lock().unwrap() = Some(handle);
        let _ = peer.next_sent().await;

        for n in 0..3 {
            peer.push(Envelope::event(events::AGENT_STREAM_CHUNK, Some(json!({"id": id, "chunk": n}))))
                .await;
        }
        peer.push(Envelope::event("marker", None)).await;
        marker.recv().await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(peer.next_sent().await.kind, "agent.stream.cancel");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_and_connection_loss() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();

        let make = |tx: mpsc::UnboundedSender<Error>| {
            StreamCallbacks::new().on_error(move |e| {
                let _ = tx.send(e);
            })
        };
        let failing = client
            .stream_request("agent.stream", None, make(err_tx.clone()))
            .await
            .unwrap();
        let id = peer.next_sent().await.id.unwrap();
        peer.push(Envelope::event(
            events::AGENT_STREAM_CHUNK,
            Some(json!({"id": id, "error": "model overloaded"})),
        ))
        .await;
        assert!(matches!(err_rx.recv().await.unwrap(), Error::Remote(ref m) if m == "model overloaded"));
        assert!(failing.is_finished());

        let dropped = client
            .stream_request("agent.stream", None, make(err_tx))
            .await
            .unwrap();
        let _ = peer.next_sent().await;
        peer.close().await;
        assert!(matches!(err_rx.recv().await.unwrap(), Error::ConnectionLost));
        assert!(dropped.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_client_fails_pending_requests() {
        let (client, _transport, _peers, mut peer) = connected(test_config(false)).await;

        let (tx, rx) = oneshot::channel();
        client
            .send_command(Command::Request {
                kind: "status".into(),
                payload: None,
                timeout: Duration::from_secs(30),
                reply: tx,
            })
            .unwrap();
        let _ = peer.next_sent().await;

        drop(client);
        assert!(matches!(rx.await.unwrap(), Err(Error::ConnectionLost)));
        assert!(matches!(peer.try_next(), Some(Outbound::Close) | None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_config_applies_to_next_connect() {
        let (transport, mut peers) = MockTransport::new();
        let client = GatewayClient::with_transport(test_config(false), transport);

        client.update_config(ConfigUpdate {
            gateway_url: Some("ws://10.0.0.5:9000".into()),
            request_timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        });
        assert_eq!(client.config().gateway.url, "ws://10.0.0.5:9000");
        assert_eq!(client.config().gateway.port(), 9000);

        assert!(client.connect().await);
        let mut peer = peers.recv().await.unwrap();
        let started = Instant::now();
        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.request("status", None).await }
        });
        let _ = peer.next_sent().await;
        assert!(matches!(pending.await.unwrap(), Err(Error::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_reconnect_settings_update_at_runtime() {
        let (transport, mut peers) = MockTransport::new();
        let client = GatewayClient::with_transport(test_config(false), transport.clone());
        let mut errors = listen(&client, events::ERROR);

        client.update_config(ConfigUpdate {
            connect_timeout: Some(Duration::from_millis(200)),
            reconnect_base_delay: Some(Duration::from_millis(50)),
            max_reconnect_attempts: Some(1),
            auto_connect: Some(true),
            ..Default::default()
        });

        transport.stall_next(1);
        let started = Instant::now();
        assert!(!client.connect().await);
        assert_eq!(started.elapsed(), Duration::from_millis(200));
        assert!(errors.recv().await.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("timed out after 200ms"));

        // One retry after the updated base delay, then the budget is spent
        assert!(peers.recv().await.is_some());
        assert_eq!(started.elapsed(), Duration::from_millis(250));
        assert_eq!(transport.attempts(), 2);
        let mut state = client.watch_state();
        assert_ok!(state.wait_for(|s| *s == ConnectionState::Connected).await);
    }
}
