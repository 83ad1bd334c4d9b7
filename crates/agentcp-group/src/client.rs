//! The group protocol client.
//!
//! Sits on top of the session WebSocket: requests go out through an injected
//! async send function as raw JSON payloads of `session_message` envelopes,
//! responses come back through [`GroupClient::handle_incoming`] and are
//! matched to waiters by `request_id`. Notifications and push messages are
//! fanned out to the registered handler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cursor::CursorStore;
use crate::error::GroupError;
use crate::events::{
    dispatch_event, dispatch_notify, EventProcessor, GroupEventHandler, NOTIFY_GROUP_EVENT,
    NOTIFY_GROUP_MESSAGE,
};
use crate::types::{GroupMessage, GroupMessageBatch, GroupNotify, GroupRequest, GroupResponse};

/// Default request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Async send function: `(target_aid, payload_json)` → result. The payload
/// must travel as the raw, non-URL-encoded `message` field of a
/// `session_message` addressed to `target_aid`.
pub type SendFn =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

enum Outcome {
    Response(Box<GroupResponse>),
    Cancelled,
}

/// Client-side correlation layer for the group protocol.
pub struct GroupClient {
    agent_id: String,
    send_fn: SendFn,
    pending: Mutex<HashMap<String, oneshot::Sender<Outcome>>>,
    handler: RwLock<Option<Arc<dyn GroupEventHandler>>>,
    processor: RwLock<Option<Arc<dyn EventProcessor>>>,
    cursor_store: RwLock<Option<Arc<dyn CursorStore>>>,
    closed: AtomicBool,
    seq: AtomicI64,
    timeout_ms: AtomicU64,
}

impl GroupClient {
    pub fn new(agent_id: impl Into<String>, send_fn: SendFn) -> Self {
        Self {
            agent_id: agent_id.into(),
            send_fn,
            pending: Mutex::new(HashMap::new()),
            handler: RwLock::new(None),
            processor: RwLock::new(None),
            cursor_store: RwLock::new(None),
            closed: AtomicBool::new(false),
            seq: AtomicI64::new(0),
            timeout_ms: AtomicU64::new(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn set_event_handler(&self, handler: Option<Arc<dyn GroupEventHandler>>) {
        *self.handler.write().unwrap() = handler;
    }

    pub fn set_event_processor(&self, processor: Option<Arc<dyn EventProcessor>>) {
        *self.processor.write().unwrap() = processor;
    }

    pub fn set_cursor_store(&self, store: Option<Arc<dyn CursorStore>>) {
        *self.cursor_store.write().unwrap() = store;
    }

    pub fn cursor_store(&self) -> Option<Arc<dyn CursorStore>> {
        self.cursor_store.read().unwrap().clone()
    }

    /// Override the default request timeout.
    pub fn set_timeout(&self, timeout_ms: u64) {
        self.timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// `<agent_id>-<unix_ms>-<seq>`; unique per client instance.
    fn next_request_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        format!("{}-{}-{}", self.agent_id, now, seq)
    }

    /// Send one request and wait for its response, timeout or cancellation.
    pub async fn send_request(
        &self,
        target_aid: &str,
        group_id: &str,
        action: &str,
        params: Option<Value>,
        timeout_ms: Option<u64>,
    ) -> Result<GroupResponse, GroupError> {
        if self.is_closed() {
            return Err(GroupError::Closed);
        }

        let request_id = self.next_request_id();
        let request = GroupRequest {
            action: action.to_string(),
            request_id: request_id.clone(),
            group_id: group_id.to_string(),
            params,
        };
        let payload = serde_json::to_string(&request).expect("request serializes");
        let timeout = Duration::from_millis(
            timeout_ms.unwrap_or_else(|| self.timeout_ms.load(Ordering::Relaxed)),
        );

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(request_id.clone(), tx);

        if let Err(e) = (self.send_fn)(target_aid.to_string(), payload).await {
            self.pending.lock().unwrap().remove(&request_id);
            return Err(GroupError::Send(e));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Outcome::Response(resp))) => Ok(*resp),
            Ok(Ok(Outcome::Cancelled)) | Ok(Err(_)) => Err(GroupError::Cancelled { request_id }),
            Err(_) => {
                self.pending.lock().unwrap().remove(&request_id);
                warn!(action, group_id, request_id, "group request timed out");
                Err(GroupError::Timeout {
                    action: action.to_string(),
                    group_id: group_id.to_string(),
                })
            }
        }
    }

    /// Feed one inbound group payload (the raw `message` field of a
    /// `session_message` whose sender is the group target).
    pub fn handle_incoming(&self, payload: &str) {
        let data: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "group payload is not JSON, dropped");
                return;
            }
        };

        // Responses carry a request_id.
        let request_id = data
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !request_id.is_empty() {
            let response: GroupResponse = match serde_json::from_value(data.clone()) {
                Ok(r) => r,
                Err(e) => {
                    warn!(request_id, error = %e, "malformed group response");
                    return;
                }
            };
            // Remove before waking, so duplicates find nothing.
            let waiter = self.pending.lock().unwrap().remove(request_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(Outcome::Response(Box::new(response)));
                    // Some servers piggyback an event on the response.
                    if data.get("event").and_then(Value::as_str).is_some_and(|e| !e.is_empty()) {
                        if let Ok(notify) = serde_json::from_value::<GroupNotify>(data) {
                            self.notify(notify);
                        }
                    }
                }
                None => warn!(request_id, "response with no pending request"),
            }
            return;
        }

        // Pure notification.
        if data.get("event").and_then(Value::as_str).is_some_and(|e| !e.is_empty()) {
            match serde_json::from_value::<GroupNotify>(data) {
                Ok(notify) => self.notify(notify),
                Err(e) => warn!(error = %e, "malformed group notification"),
            }
            return;
        }

        // Action-keyed push shapes.
        let action = data.get("action").and_then(Value::as_str).unwrap_or("");
        let group_id = data
            .get("group_id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        match action {
            "message_push" => {
                let Some(msg_data) = data.get("data").filter(|d| !d.is_null()) else {
                    warn!("message_push without data, dropped");
                    return;
                };
                match serde_json::from_value::<GroupMessage>(msg_data.clone()) {
                    Ok(msg) => {
                        let timestamp = msg.timestamp;
                        if let Some(handler) = self.handler() {
                            handler.on_group_message(&group_id, &msg);
                        } else {
                            warn!(group_id, "message_push dropped: no event handler");
                        }
                        // Also visible to notification listeners.
                        self.notify(GroupNotify {
                            action: "group_notify".into(),
                            group_id,
                            event: NOTIFY_GROUP_MESSAGE.into(),
                            data: Some(msg_data.clone()),
                            timestamp,
                        });
                    }
                    Err(e) => warn!(error = %e, "message_push parse error"),
                }
            }
            "message_batch_push" => {
                let Some(batch_data) = data.get("data").filter(|d| !d.is_null()) else {
                    warn!("message_batch_push without data, dropped");
                    return;
                };
                match serde_json::from_value::<GroupMessageBatch>(batch_data.clone()) {
                    Ok(batch) => {
                        if let Some(handler) = self.handler() {
                            handler.on_group_message_batch(&group_id, &batch);
                        } else {
                            warn!(group_id, "message_batch_push dropped: no event handler");
                        }
                    }
                    Err(e) => warn!(error = %e, "message_batch_push parse error"),
                }
            }
            other => {
                warn!(action = other, "unhandled group payload: no request_id and no event");
            }
        }
    }

    fn handler(&self) -> Option<Arc<dyn GroupEventHandler>> {
        self.handler.read().unwrap().clone()
    }

    fn notify(&self, notify: GroupNotify) {
        if let Some(handler) = self.handler() {
            dispatch_notify(handler.as_ref(), &notify);
        } else {
            debug!(event = %notify.event, "group notification dropped: no event handler");
        }
        // Structured events also feed the event processor.
        if notify.event == NOTIFY_GROUP_EVENT {
            if let Some(processor) = self.processor.read().unwrap().clone() {
                if let Some(data) = &notify.data {
                    if let Ok(event) =
                        serde_json::from_value::<crate::types::GroupEvent>(data.clone())
                    {
                        dispatch_event(processor.as_ref(), &event, &notify.group_id);
                    }
                }
            }
        }
    }

    /// Cancel every pending request and close the cursor store. Idempotent.
    /// Must run before the underlying message transport shuts down.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().collect()
        };
        for (request_id, tx) in drained {
            debug!(request_id, "cancelling pending group request");
            let _ = tx.send(Outcome::Cancelled);
        }
        // Outside the pending lock.
        if let Some(store) = self.cursor_store() {
            store.close();
        }
    }
}

impl Drop for GroupClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupEvent;
    use serde_json::json;

    fn noop_send() -> (SendFn, Arc<Mutex<Vec<(String, String)>>>) {
        let sent: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = sent.clone();
        let send: SendFn = Arc::new(move |target, payload| {
            captured.lock().unwrap().push((target, payload));
            Box::pin(async { Ok(()) })
        });
        (send, sent)
    }

    #[derive(Default)]
    struct Events {
        messages: Mutex<Vec<(String, i64)>>,
        batches: Mutex<Vec<usize>>,
        notifies: Mutex<Vec<String>>,
    }

    impl GroupEventHandler for Events {
        fn on_group_message(&self, group_id: &str, message: &GroupMessage) {
            self.messages
                .lock()
                .unwrap()
                .push((group_id.to_string(), message.msg_id));
        }
        fn on_group_message_batch(&self, _group_id: &str, batch: &GroupMessageBatch) {
            self.batches.lock().unwrap().push(batch.messages.len());
        }
        fn on_join_approved(&self, group_id: &str, _addr: &str) {
            self.notifies
                .lock()
                .unwrap()
                .push(format!("join_approved:{group_id}"));
        }
    }

    #[tokio::test]
    async fn request_response_correlation() {
        let (send, sent) = noop_send();
        let client = Arc::new(GroupClient::new("alice.aid.net", send));

        let responder = client.clone();
        let handle = tokio::spawn(async move {
            // Wait for the request to be captured, then answer it.
            let payload = loop {
                if let Some((_, p)) = sent.lock().unwrap().first().cloned() {
                    break p;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            };
            let req: GroupRequest = serde_json::from_str(&payload).unwrap();
            assert_eq!(req.action, "get_master");
            responder.handle_incoming(
                &json!({
                    "action": "get_master",
                    "request_id": req.request_id,
                    "code": 0,
                    "group_id": "g1",
                    "data": {"master": "boss.aid.net"},
                })
                .to_string(),
            );
        });

        let resp = client
            .send_request("group.aid.net", "g1", "get_master", None, Some(2_000))
            .await
            .unwrap();
        assert_eq!(resp.code, 0);
        assert_eq!(resp.data_or_empty()["master"], "boss.aid.net");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_response_is_dropped() {
        let (send, sent) = noop_send();
        let client = Arc::new(GroupClient::new("alice.aid.net", send));

        let responder = client.clone();
        tokio::spawn(async move {
            let payload = loop {
                if let Some((_, p)) = sent.lock().unwrap().first().cloned() {
                    break p;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            };
            let req: GroupRequest = serde_json::from_str(&payload).unwrap();
            let resp = json!({"request_id": req.request_id, "code": 0}).to_string();
            responder.handle_incoming(&resp);
            // The waiter entry is gone; this must be a no-op.
            responder.handle_incoming(&resp);
        });

        let resp = client
            .send_request("group.aid.net", "", "heartbeat", None, Some(2_000))
            .await
            .unwrap();
        assert_eq!(resp.code, 0);
        assert!(client.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_removes_waiter() {
        let (send, _) = noop_send();
        let client = GroupClient::new("alice.aid.net", send);
        let err = client
            .send_request("group.aid.net", "g1", "get_master", None, Some(30))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(client.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_cancels_pending_in_bounded_time() {
        let (send, _) = noop_send();
        let client = Arc::new(GroupClient::new("alice.aid.net", send));

        let closer = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let started = std::time::Instant::now();
        let err = client
            .send_request("group.aid.net", "g1", "get_master", None, Some(30_000))
            .await
            .unwrap_err();
        assert!(matches!(err, GroupError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));

        // Closed clients refuse new requests; double close is fine.
        client.close();
        assert!(matches!(
            client
                .send_request("group.aid.net", "g1", "get_master", None, None)
                .await,
            Err(GroupError::Closed)
        ));
    }

    #[tokio::test]
    async fn send_failure_cleans_up() {
        let send: SendFn =
            Arc::new(|_, _| Box::pin(async { Err("websocket not connected".to_string()) }));
        let client = GroupClient::new("alice.aid.net", send);
        let err = client
            .send_request("group.aid.net", "g1", "get_master", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GroupError::Send(_)));
        assert!(client.pending.lock().unwrap().is_empty());
    }

    #[test]
    fn request_ids_are_unique_and_shaped() {
        let (send, _) = noop_send();
        let client = GroupClient::new("alice.aid.net", send);
        let a = client.next_request_id();
        let b = client.next_request_id();
        assert_ne!(a, b);
        assert!(a.starts_with("alice.aid.net-"));
        assert_eq!(a.split('-').count(), 3);
    }

    #[tokio::test]
    async fn pushes_and_notifications_reach_handler() {
        let (send, _) = noop_send();
        let client = GroupClient::new("alice.aid.net", send);
        let events = Arc::new(Events::default());
        client.set_event_handler(Some(events.clone()));

        client.handle_incoming(
            &json!({
                "action": "message_push",
                "group_id": "g1",
                "data": {"msg_id": 7, "sender": "bob.aid.net", "content": "hi", "timestamp": 1},
            })
            .to_string(),
        );
        client.handle_incoming(
            &json!({
                "action": "message_batch_push",
                "group_id": "g1",
                "data": {"start_msg_id": 1, "latest_msg_id": 2, "count": 2, "messages": [
                    {"msg_id": 1}, {"msg_id": 2}
                ]},
            })
            .to_string(),
        );
        client.handle_incoming(
            &json!({
                "action": "group_notify",
                "group_id": "g2",
                "event": "join_approved",
                "data": {"group_address": "https://group.aid.net/g2"},
                "timestamp": 5,
            })
            .to_string(),
        );
        // No request_id, no event, unknown action: logged and dropped.
        client.handle_incoming(&json!({"action": "mystery"}).to_string());
        client.handle_incoming("not json at all");

        assert_eq!(*events.messages.lock().unwrap(), vec![("g1".to_string(), 7)]);
        assert_eq!(*events.batches.lock().unwrap(), vec![2]);
        assert_eq!(
            *events.notifies.lock().unwrap(),
            vec!["join_approved:g2".to_string()]
        );
    }

    #[tokio::test]
    async fn group_event_notify_feeds_processor() {
        #[derive(Default)]
        struct Proc {
            joined: Mutex<Vec<String>>,
        }
        impl EventProcessor for Proc {
            fn on_member_joined(&self, group_id: &str, agent_id: &str, _role: &str) {
                self.joined
                    .lock()
                    .unwrap()
                    .push(format!("{group_id}:{agent_id}"));
            }
        }

        let (send, _) = noop_send();
        let client = GroupClient::new("alice.aid.net", send);
        let proc = Arc::new(Proc::default());
        client.set_event_processor(Some(proc.clone()));

        let event = GroupEvent {
            event_id: 1,
            event_type: "member_joined".into(),
            data: Some(json!({"agent_id": "new.aid.net"})),
            ..Default::default()
        };
        client.handle_incoming(
            &json!({
                "action": "group_notify",
                "group_id": "g1",
                "event": "group_event",
                "data": serde_json::to_value(&event).unwrap(),
                "timestamp": 9,
            })
            .to_string(),
        );
        assert_eq!(*proc.joined.lock().unwrap(), vec!["g1:new.aid.net"]);
    }
}
