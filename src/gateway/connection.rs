//! Connection actor
//!
//! One task owns the link, the correlation table, the event bus and the
//! reconnect policy. Client handles talk to it over an unbounded command
//! channel; timers and connect attempts run as side tasks that report back
//! through a weak sender, so a dropped client lets the actor exit.
//!
//! State transitions:
//!
//! ```text
//! Idle ──connect──▶ Connecting ──ok──▶ Connected ──lost──▶ Disconnected
//!   ▲                   │                  │                   │
//!   │                   └──fail──▶ Disconnected ◀──────────────┘
//!   │                                      │        (backoff timer → Connecting)
//!   └────────── Closing ◀──disconnect──────┘
//! ```

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use super::correlation::{CorrelationTable, PendingRequest};
use super::events::{EventBus, EventCallback};
use super::protocol::{decode, encode, events, Envelope};
use super::reconnect::{ConnectionState, ReconnectPolicy};
use super::stream::{StreamCallbacks, StreamEntry, StreamGate};
use super::transport::{Transport, TransportEvent, TransportLink};
use crate::config::Config;
use crate::error::{Error, Result};

/// Messages accepted by the connection actor
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Request {
        kind: String,
        payload: Option<Value>,
        timeout: Duration,
        reply: oneshot::Sender<Result<Value>>,
    },
    Emit {
        envelope: Envelope,
        reply: oneshot::Sender<Result<()>>,
    },
    Stream {
        kind: String,
        payload: Option<Value>,
        callbacks: StreamCallbacks,
        gate: Arc<StreamGate>,
        reply: oneshot::Sender<Result<String>>,
    },
    CancelStream {
        id: String,
        kind: String,
    },
    Subscribe {
        event: String,
        id: u64,
        callback: EventCallback,
    },
    Unsubscribe {
        event: String,
        id: u64,
    },
    PendingCount {
        reply: oneshot::Sender<usize>,
    },
    // Reports from side tasks
    ConnectFinished {
        generation: u64,
        url: String,
        result: Result<TransportLink>,
    },
    ReconnectDue {
        generation: u64,
    },
    Expire {
        id: String,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Connect { .. } => "Connect",
            Command::Disconnect { .. } => "Disconnect",
            Command::Request { .. } => "Request",
            Command::Emit { .. } => "Emit",
            Command::Stream { .. } => "Stream",
            Command::CancelStream { .. } => "CancelStream",
            Command::Subscribe { .. } => "Subscribe",
            Command::Unsubscribe { .. } => "Unsubscribe",
            Command::PendingCount { .. } => "PendingCount",
            Command::ConnectFinished { .. } => "ConnectFinished",
            Command::ReconnectDue { .. } => "ReconnectDue",
            Command::Expire { .. } => "Expire",
        };
        f.write_str(name)
    }
}

/// Request ids of the form `msg_<counter>_<unix-millis>`
#[derive(Debug, Default)]
struct IdGenerator {
    counter: u64,
}

impl IdGenerator {
    fn next(&mut self) -> String {
        self.counter += 1;
        format!(
            "msg_{}_{}",
            self.counter,
            chrono::Utc::now().timestamp_millis()
        )
    }
}

pub(crate) struct ConnectionActor {
    transport: Arc<dyn Transport>,
    config: watch::Receiver<Config>,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    handle: mpsc::WeakUnboundedSender<Command>,
    link: Option<TransportLink>,
    table: CorrelationTable,
    bus: EventBus,
    policy: ReconnectPolicy,
    ids: IdGenerator,
    /// Bumped on every connect attempt and on disconnect; stale side-task
    /// reports carry an older value and are ignored.
    generation: u64,
    connect_waiters: Vec<oneshot::Sender<bool>>,
    reconnect_timer: Option<AbortHandle>,
}

/// Start the actor on the current runtime and return its command sender
pub(crate) fn spawn(
    transport: Arc<dyn Transport>,
    config: watch::Receiver<Config>,
    state: watch::Sender<ConnectionState>,
) -> mpsc::UnboundedSender<Command> {
    let (tx, rx) = mpsc::unbounded_channel();
    let actor = ConnectionActor {
        transport,
        config,
        state,
        commands: rx,
        handle: tx.downgrade(),
        link: None,
        table: CorrelationTable::new(),
        bus: EventBus::new(),
        policy: ReconnectPolicy::new(),
        ids: IdGenerator::default(),
        generation: 0,
        connect_waiters: Vec::new(),
        reconnect_timer: None,
    };
    tokio::spawn(actor.run());
    tx
}

async fn next_event(link: &mut Option<TransportLink>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

impl ConnectionActor {
    async fn run(mut self) {
        debug!("Gateway connection actor started");
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = next_event(&mut self.link) => self.handle_transport_event(event),
            }
        }
        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        trace!("Command: {:?}", command);
        match command {
            Command::Connect { reply } => self.handle_connect(reply),
            Command::Disconnect { reply } => {
                self.handle_disconnect();
                let _ = reply.send(());
            }
            Command::Request {
                kind,
                payload,
                timeout,
                reply,
            } => self.handle_request(kind, payload, timeout, reply),
            Command::Emit { envelope, reply } => {
                let _ = reply.send(self.send_envelope(&envelope));
            }
            Command::Stream {
                kind,
                payload,
                callbacks,
                gate,
                reply,
            } => self.handle_stream(kind, payload, callbacks, gate, reply),
            Command::CancelStream { id, kind } => self.handle_cancel(id, kind),
            Command::Subscribe {
                event,
                id,
                callback,
            } => self.bus.subscribe(event, id, callback),
            Command::Unsubscribe { event, id } => {
                self.bus.unsubscribe(&event, id);
            }
            Command::PendingCount { reply } => {
                let _ = reply.send(self.table.len());
            }
            Command::ConnectFinished {
                generation,
                url,
                result,
            } => self.handle_connect_finished(generation, url, result),
            Command::ReconnectDue { generation } => {
                if generation == self.generation && self.current_state() == ConnectionState::Disconnected {
                    self.reconnect_timer = None;
                    info!("Reconnect attempt {}", self.policy.attempts());
                    self.start_attempt();
                }
            }
            Command::Expire { id } => {
                if self.table.expire(&id) {
                    debug!("Request {} timed out", id);
                }
            }
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&mut self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("Connection state {} -> {}", prev, next);
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    fn handle_connect(&mut self, reply: oneshot::Sender<bool>) {
        match self.current_state() {
            ConnectionState::Connected => {
                let _ = reply.send(true);
                return;
            }
            ConnectionState::Connecting => {
                self.connect_waiters.push(reply);
                return;
            }
            _ => {}
        }

        if !self.config.borrow().enabled {
            info!("Gateway client is disabled; not connecting");
            let _ = reply.send(false);
            return;
        }

        self.connect_waiters.push(reply);
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        self.generation += 1;
        let generation = self.generation;
        let (url, connect_timeout) = {
            let config = self.config.borrow();
            (config.gateway.url.clone(), config.gateway.connect_timeout)
        };
        self.set_state(ConnectionState::Connecting);
        info!("Connecting to gateway at {}", url);

        let transport = Arc::clone(&self.transport);
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let result = tokio::time::timeout(connect_timeout, transport.connect(&url))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Transport(format!(
                        "connect to {} timed out after {}ms",
                        url,
                        connect_timeout.as_millis()
                    )))
                });
            match handle.upgrade() {
                Some(tx) => {
                    let _ = tx.send(Command::ConnectFinished {
                        generation,
                        url,
                        result,
                    });
                }
                None => {
                    if let Ok(link) = result {
                        link.close();
                    }
                }
            }
        });
    }

    fn handle_connect_finished(&mut self, generation: u64, url: String, result: Result<TransportLink>) {
        if generation != self.generation || self.current_state() != ConnectionState::Connecting {
            debug!("Discarding stale connect result for {}", url);
            if let Ok(link) = result {
                link.close();
            }
            return;
        }

        match result {
            Ok(link) => {
                self.link = Some(link);
                self.policy.reset();
                self.set_state(ConnectionState::Connected);
                info!("Connected to gateway at {}", url);
                self.bus.emit(events::CONNECTED, &json!({ "url": url }));
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(true);
                }
            }
            Err(e) => {
                warn!("Failed to connect to gateway at {}: {}", url, e);
                self.set_state(ConnectionState::Disconnected);
                self.bus.emit(events::ERROR, &json!({ "error": e.to_string() }));
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(false);
                }
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        let gateway = self.config.borrow().gateway.clone();
        let Some(delay) = self.policy.next_delay(&gateway) else {
            if gateway.auto_connect {
                warn!(
                    "Giving up on gateway after {} reconnect attempts",
                    self.policy.attempts()
                );
            }
            return;
        };

        info!(
            "Reconnecting in {}ms (attempt {}/{})",
            delay.as_millis(),
            self.policy.attempts(),
            gateway.reconnect.max_attempts
        );
        let generation = self.generation;
        let handle = self.handle.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = handle.upgrade() {
                let _ = tx.send(Command::ReconnectDue { generation });
            }
        });
        self.reconnect_timer = Some(timer.abort_handle());
    }

    fn handle_disconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        // Invalidate any in-flight attempt
        self.generation += 1;
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(false);
        }

        if let Some(link) = self.link.take() {
            self.set_state(ConnectionState::Closing);
            link.close();
            let failed = self.table.fail_all(|| Error::ConnectionLost);
            info!("Disconnected from gateway ({} pending requests failed)", failed);
            self.bus.emit(events::DISCONNECTED, &json!({}));
        }
        self.set_state(ConnectionState::Idle);
    }

    fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(text)) => self.handle_message(&text),
            Some(TransportEvent::Closed { reason }) => {
                info!(
                    "Gateway closed the connection{}",
                    reason.map(|r| format!(": {}", r)).unwrap_or_default()
                );
                self.connection_lost(None);
            }
            Some(TransportEvent::Error(e)) => {
                warn!("Gateway transport error: {}", e);
                self.connection_lost(Some(e));
            }
            None => self.connection_lost(None),
        }
    }

    fn connection_lost(&mut self, error: Option<String>) {
        if self.link.take().is_none() {
            return;
        }
        let failed = self.table.fail_all(|| Error::ConnectionLost);
        if failed > 0 {
            warn!("Connection lost with {} pending requests", failed);
        }
        self.set_state(ConnectionState::Disconnected);
        if let Some(error) = error {
            self.bus.emit(events::ERROR, &json!({ "error": error }));
        }
        self.bus.emit(events::DISCONNECTED, &json!({}));
        self.schedule_reconnect();
    }

    fn shutdown(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
        let failed = self.table.fail_all(|| Error::ConnectionLost);
        if failed > 0 {
            debug!("Client dropped with {} pending requests", failed);
        }
        self.set_state(ConnectionState::Idle);
        debug!("Gateway connection actor stopped");
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    fn handle_message(&mut self, text: &str) {
        let envelope = match decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed gateway message: {}", e);
                return;
            }
        };
        trace!("<- {} ({:?})", envelope.kind, envelope.id);

        self.table.dispatch(&envelope);
        self.bus.emit(&envelope.kind, &envelope.payload_or_null());
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let link = self.link.as_ref().ok_or(Error::NotConnected)?;
        let text = encode(envelope)?;
        trace!("-> {} ({:?})", envelope.kind, envelope.id);
        link.send(text)
    }

    fn handle_request(
        &mut self,
        kind: String,
        payload: Option<Value>,
        timeout: Duration,
        reply: oneshot::Sender<Result<Value>>,
    ) {
        if self.link.is_none() {
            let _ = reply.send(Err(Error::NotConnected));
            return;
        }

        let id = self.ids.next();
        let envelope = Envelope::request(kind, id.clone(), payload);

        let handle = self.handle.clone();
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = handle.upgrade() {
                let _ = tx.send(Command::Expire { id: timer_id });
            }
        });

        let pending = PendingRequest::request(id.clone(), timeout, reply, Some(timer.abort_handle()));
        if self.table.register(pending).is_err() {
            timer.abort();
            return;
        }

        debug!("Sending {} ({})", envelope.kind, id);
        if let Err(e) = self.send_envelope(&envelope) {
            self.table.fail(&id, e);
        }
    }

    fn handle_stream(
        &mut self,
        kind: String,
        payload: Option<Value>,
        callbacks: StreamCallbacks,
        gate: Arc<StreamGate>,
        reply: oneshot::Sender<Result<String>>,
    ) {
        if self.link.is_none() {
            let _ = reply.send(Err(Error::NotConnected));
            return;
        }

        let id = self.ids.next();
        let envelope = Envelope::request(kind.clone(), id.clone(), payload);
        let entry = StreamEntry::new(kind, callbacks, gate);
        if let Err(e) = self.table.register(PendingRequest::stream(id.clone(), entry)) {
            let _ = reply.send(Err(e));
            return;
        }

        debug!("Opening stream {} ({})", envelope.kind, id);
        match self.send_envelope(&envelope) {
            Ok(()) => {
                let _ = reply.send(Ok(id));
            }
            Err(e) => {
                self.table.cancel(&id);
                let _ = reply.send(Err(e));
            }
        }
    }

    /// Only sent by a handle that won the gate, so the stream was still
    /// open when cancelled even if its entry has since been dropped.
    fn handle_cancel(&mut self, id: String, kind: String) {
        self.table.cancel(&id);
        let notice = Envelope::event(
            format!("{}{}", kind, events::CANCEL_SUFFIX),
            Some(json!({ "id": id })),
        );
        debug!("Cancelling stream {}", id);
        if let Err(e) = self.send_envelope(&notice) {
            debug!("Cancel notice for {} not sent: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique_and_prefixed() {
        let mut ids = IdGenerator::default();
        let a = ids.next();
        let b = ids.next();
        assert_ne!(a, b);
        assert!(a.starts_with("msg_1_"));
        assert!(b.starts_with("msg_2_"));
        let millis: i64 = b.rsplit('_').next().unwrap().parse().unwrap();
        assert!(millis > 1_600_000_000_000);
    }
}
