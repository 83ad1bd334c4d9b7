//! WebSocket client for the session server.
//!
//! Owns the `wss://<server>/session` connection: a writer task drains an
//! outbound channel (plus keepalive pings), a reader task dispatches every
//! inbound frame in arrival order. Requests that expect an ack register a
//! waiter keyed by `request_id`; everything else goes to the message
//! handler. Drops are healed by a single-flight reconnect loop with
//! exponential backoff, and messages submitted while disconnected are
//! queued and flushed in order on the next connect.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use agentcp_proto::envelope::Envelope;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::Connector;
use tracing::{debug, info, warn};

use crate::config::MessageClientConfig;
use crate::error::{AcpError, AcpResult};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Inbound dispatch callback: `(cmd, data)`. Runs on the reader task; must
/// not block.
pub type MessageHandlerFn = Arc<dyn Fn(&str, &Value) + Send + Sync>;
/// Connection lifecycle callback.
pub type LifecycleFn = Arc<dyn Fn() + Send + Sync>;
/// Produces the current session signature for the connect URL.
pub type SignatureFn = Arc<dyn Fn() -> String + Send + Sync>;

struct AckWaiter {
    expected_cmd: String,
    tx: oneshot::Sender<Value>,
}

struct Inner {
    agent_id: String,
    server_url: String,
    signature: SignatureFn,
    config: MessageClientConfig,
    state: Mutex<ConnectionState>,
    out_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    queue: Mutex<VecDeque<String>>,
    waiters: Mutex<HashMap<String, AckWaiter>>,
    handler: RwLock<Option<MessageHandlerFn>>,
    on_disconnect: RwLock<Option<LifecycleFn>>,
    on_reconnect: RwLock<Option<LifecycleFn>>,
    shutdown: AtomicBool,
    reconnect_running: AtomicBool,
    reconnect_interval_ms: AtomicU64,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// Exponential backoff step: `current * factor`, capped.
fn next_backoff(current: Duration, factor: f64, max: Duration) -> Duration {
    let next = Duration::from_millis((current.as_millis() as f64 * factor) as u64);
    next.min(max)
}

impl Inner {
    fn ws_url(&self) -> String {
        let mut url = self.server_url.clone();
        if let Some(rest) = url.strip_prefix("https://") {
            url = format!("wss://{rest}");
        } else if let Some(rest) = url.strip_prefix("http://") {
            url = format!("ws://{rest}");
        }
        while url.ends_with('/') {
            url.pop();
        }
        format!(
            "{url}/session?agent_id={}&signature={}",
            self.agent_id,
            (self.signature)()
        )
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Route one inbound text frame: ack waiters first, then the handler.
    fn dispatch(self: &Arc<Self>, raw: &str) {
        let Some(env) = Envelope::parse(raw) else {
            warn!(len = raw.len(), "unparseable frame dropped");
            return;
        };
        if let Some(request_id) = env.data.get("request_id").and_then(Value::as_str) {
            let mut waiters = self.waiters.lock().unwrap();
            let matches = waiters
                .get(request_id)
                .is_some_and(|w| w.expected_cmd == env.cmd);
            if matches {
                // Removed before waking: a duplicate finds nothing.
                let waiter = waiters.remove(request_id).expect("checked above");
                drop(waiters);
                let _ = waiter.tx.send(env.data);
                return;
            }
        }
        let handler = self.handler.read().unwrap().clone();
        if let Some(handler) = handler {
            handler(&env.cmd, &env.data);
        } else {
            debug!(cmd = %env.cmd, "inbound frame dropped: no handler");
        }
    }

    fn drain_waiters(&self) {
        // Dropping the senders wakes every waiter with no result.
        self.waiters.lock().unwrap().clear();
    }

    /// Establish one WebSocket session; returns after spawning I/O tasks.
    async fn connect_once(self: &Arc<Self>) -> AcpResult<()> {
        self.set_state(ConnectionState::Connecting);
        let url = self.ws_url();
        debug!(url = %redact_signature(&url), "connecting websocket");

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);

        let connector = if self.config.verify_tls {
            None
        } else {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|e| AcpError::Network(format!("tls connector: {e}")))?;
            Some(Connector::NativeTls(tls))
        };

        let (stream, _) = tokio_tungstenite::connect_async_tls_with_config(
            url,
            Some(ws_config),
            false,
            connector,
        )
        .await
        .map_err(|e| {
            self.set_state(ConnectionState::Disconnected);
            AcpError::Network(format!("websocket connect: {e}"))
        })?;

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        *self.out_tx.lock().unwrap() = Some(out_tx);
        self.set_state(ConnectionState::Connected);
        self.reconnect_interval_ms.store(
            self.config.reconnect_base_interval.as_millis() as u64,
            Ordering::Relaxed,
        );
        info!(agent_id = %self.agent_id, "websocket connected");

        // Writer: outbound channel plus keepalive pings, strict FIFO.
        let ping_interval = self.config.ping_interval;
        let writer = tokio::spawn(async move {
            let mut ping = tokio::time::interval(ping_interval);
            ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    msg = out_rx.recv() => match msg {
                        Some(text) => {
                            if sink.send(WsMessage::text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    _ = ping.tick() => {
                        if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Reader: single dispatch task, arrival order.
        let inner = self.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => inner.dispatch(&text),
                    Ok(WsMessage::Binary(bytes)) => {
                        // Stream chunks only; nothing consumes them here.
                        debug!(len = bytes.len(), "binary frame ignored");
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
            inner.on_closed();
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|t| !t.is_finished());
        tasks.push(writer);
        tasks.push(reader);
        drop(tasks);

        self.flush_queue();
        Ok(())
    }

    /// Push queued messages out in submission order.
    fn flush_queue(&self) {
        let out_tx = self.out_tx.lock().unwrap().clone();
        let Some(out_tx) = out_tx else { return };
        let mut queue = self.queue.lock().unwrap();
        while let Some(text) = queue.pop_front() {
            if out_tx.send(text).is_err() {
                break;
            }
        }
    }

    /// Reader saw the connection die.
    fn on_closed(self: &Arc<Self>) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        warn!(agent_id = %self.agent_id, "websocket disconnected");
        self.set_state(ConnectionState::Disconnected);
        self.out_tx.lock().unwrap().take();
        if let Some(cb) = self.on_disconnect.read().unwrap().clone() {
            cb();
        }
        self.spawn_reconnect_if_needed();
    }

    /// At most one reconnect loop at a time.
    fn spawn_reconnect_if_needed(self: &Arc<Self>) {
        if !self.config.auto_reconnect || self.shutdown.load(Ordering::Acquire) {
            return;
        }
        if self
            .reconnect_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let inner = self.clone();
        let handle = tokio::spawn(async move {
            while !inner.shutdown.load(Ordering::Acquire) {
                inner.set_state(ConnectionState::Reconnecting);
                let wait = Duration::from_millis(inner.reconnect_interval_ms.load(Ordering::Relaxed));
                tokio::time::sleep(wait).await;
                if inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                match inner.connect_once().await {
                    Ok(()) => {
                        if let Some(cb) = inner.on_reconnect.read().unwrap().clone() {
                            cb();
                        }
                        break;
                    }
                    Err(e) => {
                        let next = next_backoff(
                            wait,
                            inner.config.reconnect_backoff_factor,
                            inner.config.reconnect_max_interval,
                        );
                        inner
                            .reconnect_interval_ms
                            .store(next.as_millis() as u64, Ordering::Relaxed);
                        debug!(error = %e, next_ms = next.as_millis() as u64, "reconnect failed");
                    }
                }
            }
            inner.reconnect_running.store(false, Ordering::Release);
        });
        self.tasks.lock().unwrap().push(handle);
    }
}

fn redact_signature(url: &str) -> String {
    match url.split_once("signature=") {
        Some((head, _)) => format!("{head}signature=<redacted>"),
        None => url.to_string(),
    }
}

/// Handle to the session WebSocket.
pub struct MessageClient {
    inner: Arc<Inner>,
}

impl MessageClient {
    pub fn new(
        agent_id: impl Into<String>,
        server_url: impl Into<String>,
        signature: SignatureFn,
        config: MessageClientConfig,
    ) -> Self {
        let base = config.reconnect_base_interval;
        Self {
            inner: Arc::new(Inner {
                agent_id: agent_id.into(),
                server_url: server_url.into(),
                signature,
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                out_tx: Mutex::new(None),
                queue: Mutex::new(VecDeque::new()),
                waiters: Mutex::new(HashMap::new()),
                handler: RwLock::new(None),
                on_disconnect: RwLock::new(None),
                on_reconnect: RwLock::new(None),
                shutdown: AtomicBool::new(false),
                reconnect_running: AtomicBool::new(false),
                reconnect_interval_ms: AtomicU64::new(base.as_millis() as u64),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_message_handler(&self, handler: Option<MessageHandlerFn>) {
        *self.inner.handler.write().unwrap() = handler;
    }

    pub fn set_disconnect_callback(&self, cb: Option<LifecycleFn>) {
        *self.inner.on_disconnect.write().unwrap() = cb;
    }

    pub fn set_reconnect_callback(&self, cb: Option<LifecycleFn>) {
        *self.inner.on_reconnect.write().unwrap() = cb;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state() == ConnectionState::Connected
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// Current reconnect delay; resets to base on every successful connect.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.inner.reconnect_interval_ms.load(Ordering::Relaxed))
    }

    /// Connect now. On failure the reconnect loop takes over (when
    /// enabled) and the error is returned to the caller.
    pub async fn connect(&self) -> AcpResult<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(AcpError::WsDisconnected);
        }
        if self.is_connected() {
            return Ok(());
        }
        match self.inner.connect_once().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.spawn_reconnect_if_needed();
                Err(e)
            }
        }
    }

    /// Queue or send one serialized envelope. Connected: straight onto the
    /// socket in FIFO order. Disconnected: buffered up to the queue bound
    /// and flushed on the next connect.
    pub fn send(&self, text: String) -> AcpResult<()> {
        if self.is_connected() {
            let out_tx = self.inner.out_tx.lock().unwrap().clone();
            if let Some(out_tx) = out_tx {
                return out_tx
                    .send(text)
                    .map_err(|e| AcpError::WsSendFailed(e.to_string()));
            }
        }
        let mut queue = self.inner.queue.lock().unwrap();
        if queue.len() >= self.inner.config.max_queue_size {
            return Err(AcpError::WsSendFailed("outbound queue full".into()));
        }
        queue.push_back(text);
        Ok(())
    }

    /// Send and block until the matching ack arrives. The ack must carry
    /// the same `request_id` *and* the expected `cmd`; anything else is
    /// routed to the message handler instead.
    pub async fn send_and_wait_ack(
        &self,
        text: String,
        expected_cmd: &str,
        request_id: &str,
        timeout: Duration,
    ) -> AcpResult<Value> {
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().unwrap().insert(
            request_id.to_string(),
            AckWaiter {
                expected_cmd: expected_cmd.to_string(),
                tx,
            },
        );

        if let Err(e) = self.send(text) {
            self.inner.waiters.lock().unwrap().remove(request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(data)) => Ok(data),
            // Sender dropped: shutdown woke us with no result.
            Ok(Err(_)) => Err(AcpError::WsDisconnected),
            Err(_) => {
                self.inner.waiters.lock().unwrap().remove(request_id);
                Err(AcpError::Timeout(expected_cmd.to_string()))
            }
        }
    }

    /// Tear the connection down and stop reconnecting. Wakes every ack
    /// waiter empty-handed.
    pub fn disconnect(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.set_state(ConnectionState::Disconnected);
        self.inner.out_tx.lock().unwrap().take();
        for task in self.inner.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.inner.drain_waiters();
        info!(agent_id = %self.inner.agent_id, "websocket client shut down");
    }
}

impl Drop for MessageClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_progression_and_cap() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(10);
        let mut current = base;
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(current.as_millis() as u64);
            current = next_backoff(current, 1.5, max);
        }
        assert_eq!(&seen[..5], &[500, 750, 1125, 1687, 2530]);
        assert_eq!(*seen.last().unwrap(), 10_000);
        // Monotone non-decreasing up to the cap.
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    fn test_client() -> MessageClient {
        MessageClient::new(
            "alice.aid.net",
            "https://msg.aid.net/",
            Arc::new(|| "sig-1".to_string()),
            MessageClientConfig::default(),
        )
    }

    #[test]
    fn ws_url_shape() {
        let client = test_client();
        assert_eq!(
            client.inner.ws_url(),
            "wss://msg.aid.net/session?agent_id=alice.aid.net&signature=sig-1"
        );
    }

    #[tokio::test]
    async fn dispatch_matches_cmd_and_request_id() {
        let client = test_client();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        client.set_message_handler(Some(Arc::new(move |cmd, _| {
            seen2.lock().unwrap().push(cmd.to_string());
        })));

        let (tx, rx) = oneshot::channel();
        client.inner.waiters.lock().unwrap().insert(
            "r1".into(),
            AckWaiter {
                expected_cmd: "create_session_ack".into(),
                tx,
            },
        );

        // Same request_id but wrong cmd: goes to the handler.
        client.inner.dispatch(
            &json!({"cmd": "invite_agent_ack", "data": {"request_id": "r1"}}).to_string(),
        );
        // No request_id at all: handler.
        client
            .inner
            .dispatch(&json!({"cmd": "session_message", "data": {}}).to_string());
        // The match: fulfills the waiter, not the handler.
        client.inner.dispatch(
            &json!({"cmd": "create_session_ack", "data": {"request_id": "r1", "session_id": "s9"}})
                .to_string(),
        );
        // Duplicate ack after removal: handler.
        client.inner.dispatch(
            &json!({"cmd": "create_session_ack", "data": {"request_id": "r1"}}).to_string(),
        );

        let data = rx.await.unwrap();
        assert_eq!(data["session_id"], "s9");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["invite_agent_ack", "session_message", "create_session_ack"]
        );
    }

    #[tokio::test]
    async fn queue_bound_is_enforced() {
        let mut config = MessageClientConfig::default();
        config.max_queue_size = 2;
        let client = MessageClient::new(
            "alice.aid.net",
            "https://msg.aid.net",
            Arc::new(|| String::new()),
            config,
        );
        assert!(client.send("a".into()).is_ok());
        assert!(client.send("b".into()).is_ok());
        assert!(client.send("c".into()).is_err());
        assert_eq!(client.queue_len(), 2);
    }

    #[tokio::test]
    async fn disconnect_wakes_waiters_empty_handed() {
        let client = test_client();
        let fut = client.send_and_wait_ack(
            json!({"cmd": "x", "data": {"request_id": "r9"}}).to_string(),
            "x_ack",
            "r9",
            Duration::from_secs(30),
        );
        let client_ref = &client;
        let (result, _) = tokio::join!(fut, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            client_ref.disconnect();
        });
        assert!(matches!(result, Err(AcpError::WsDisconnected)));
    }
}
