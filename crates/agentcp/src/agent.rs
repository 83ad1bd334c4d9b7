//! One agent endpoint: lifecycle, transports, handlers, group wiring.
//!
//! `online` runs the bring-up sequence — AP sign-in, access-point config
//! fetch, heartbeat sign-in + UDP loops, message-server sign-in + WebSocket
//! — and `offline` unwinds it in the reverse, group-client-first order.
//! Event callbacks fire from whichever I/O task caused them; they must be
//! thread-safe and return promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use agentcp_group::{
    CursorStore, EventProcessor, GroupClient, GroupEventHandler, GroupOperations, SendFn,
};
use agentcp_identity::Identity;
use agentcp_proto::block::{Block, Instruction, Message};
use agentcp_proto::envelope::{self, new_uuid_hex, now_ms};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthClient, DEFAULT_MAX_RETRIES};
use crate::config::{AcpConfig, MessageClientConfig};
use crate::error::{AcpError, AcpResult};
use crate::heartbeat::{HeartbeatClient, HeartbeatEndpoint, ReauthFn};
use crate::http::{HttpClient, ProgressFn};
use crate::message::MessageClient;
use crate::session::SessionManager;

/// Agent lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Offline,
    Connecting,
    Authenticating,
    Online,
    Reconnecting,
    Error,
}

/// Inbound session message callback.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;
/// State transition callback `(old, new)`.
pub type StateCallback = Arc<dyn Fn(AgentState, AgentState) + Send + Sync>;
/// Invite callback `(session_id, inviter_agent_id)`.
pub type InviteCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Background error callback.
pub type ErrorCallback = Arc<dyn Fn(&AcpError) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    message: RwLock<Option<MessageCallback>>,
    state: RwLock<Option<StateCallback>>,
    invite: RwLock<Option<InviteCallback>>,
    error: RwLock<Option<ErrorCallback>>,
}

struct GroupHandle {
    client: Arc<GroupClient>,
    ops: Arc<GroupOperations>,
    target_aid: String,
}

pub(crate) struct AgentInner {
    aid: String,
    config: Arc<RwLock<AcpConfig>>,
    identity: Arc<Identity>,
    http: HttpClient,
    state: Mutex<AgentState>,
    invalidated: AtomicBool,
    signature: Mutex<String>,
    auth: Mutex<Option<Arc<AuthClient>>>,
    heartbeat: Mutex<Option<Arc<HeartbeatClient>>>,
    message: Mutex<Option<Arc<MessageClient>>>,
    sessions: Arc<SessionManager>,
    group: Mutex<Option<GroupHandle>>,
    handlers: Handlers,
}

/// A single agent identity on the network.
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("aid", &self.inner.aid)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub(crate) fn new(
        aid: String,
        identity: Arc<Identity>,
        config: Arc<RwLock<AcpConfig>>,
        http: HttpClient,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(aid.clone()));
        Self {
            inner: Arc::new(AgentInner {
                aid,
                config,
                identity,
                http,
                state: Mutex::new(AgentState::Offline),
                invalidated: AtomicBool::new(false),
                signature: Mutex::new(String::new()),
                auth: Mutex::new(None),
                heartbeat: Mutex::new(None),
                message: Mutex::new(None),
                sessions,
                group: Mutex::new(None),
                handlers: Handlers::default(),
            }),
        }
    }

    pub fn aid(&self) -> &str {
        &self.inner.aid
    }

    pub fn state(&self) -> AgentState {
        *self.inner.state.lock().unwrap()
    }

    pub fn is_online(&self) -> bool {
        !self.inner.invalidated.load(Ordering::Acquire) && self.state() == AgentState::Online
    }

    pub fn is_valid(&self) -> bool {
        !self.inner.invalidated.load(Ordering::Acquire)
    }

    pub fn signature(&self) -> String {
        self.inner.signature.lock().unwrap().clone()
    }

    pub fn certificate(&self) -> &str {
        self.inner.identity.cert_pem()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.inner.sessions
    }

    pub fn set_message_handler(&self, cb: Option<MessageCallback>) {
        *self.inner.handlers.message.write().unwrap() = cb;
    }

    pub fn set_state_change_handler(&self, cb: Option<StateCallback>) {
        *self.inner.handlers.state.write().unwrap() = cb;
    }

    pub fn set_invite_handler(&self, cb: Option<InviteCallback>) {
        *self.inner.handlers.invite.write().unwrap() = cb;
    }

    pub fn set_error_handler(&self, cb: Option<ErrorCallback>) {
        *self.inner.handlers.error.write().unwrap() = cb;
    }

    /// Bring the agent online: AP auth, config fetch, heartbeat, WebSocket.
    pub async fn online(&self) -> AcpResult<()> {
        let inner = &self.inner;
        if inner.invalidated.load(Ordering::Acquire) {
            return Err(AcpError::AidInvalid(inner.aid.clone()));
        }
        {
            let state = *inner.state.lock().unwrap();
            if state == AgentState::Online || state == AgentState::Connecting {
                return Err(AcpError::InvalidArgument("already online".into()));
            }
        }
        let (ap_base, tls_verify) = {
            let config = inner.config.read().unwrap();
            (config.ap_base.clone(), config.tls.verify)
        };
        if ap_base.is_empty() {
            return Err(AcpError::NotInitialized("AP base URL not configured".into()));
        }

        inner.set_state(AgentState::Connecting);
        inner.set_state(AgentState::Authenticating);

        // Phase 1: authenticate with the AP and fetch the transport config.
        let ap_api = format!("{}/api/accesspoint", ap_base.trim_end_matches('/'));
        let ap_auth = Arc::new(AuthClient::new(
            inner.aid.clone(),
            ap_api.clone(),
            inner.identity.clone(),
            inner.http.clone(),
        ));
        if let Err(e) = ap_auth.sign_in(DEFAULT_MAX_RETRIES).await {
            error!(aid = %inner.aid, error = %e, "AP sign-in failed");
            inner.set_state(AgentState::Error);
            return Err(e);
        }
        *inner.signature.lock().unwrap() = ap_auth.signature();
        *inner.auth.lock().unwrap() = Some(ap_auth.clone());

        let (heartbeat_server, message_server) =
            inner.fetch_accesspoint_config(&ap_api, &ap_auth.signature()).await;
        let heartbeat_server = some_or(heartbeat_server, &ap_base, "heartbeat_server");
        let message_server = some_or(message_server, &ap_base, "message_server");

        // Phase 2: heartbeat sign-in and UDP loops.
        let hb_auth = Arc::new(AuthClient::new(
            inner.aid.clone(),
            heartbeat_server.clone(),
            inner.identity.clone(),
            inner.http.clone(),
        ));
        if let Err(e) = hb_auth.sign_in(DEFAULT_MAX_RETRIES).await {
            error!(aid = %inner.aid, error = %e, "heartbeat sign-in failed");
            inner.set_state(AgentState::Error);
            return Err(e);
        }
        let endpoint = HeartbeatEndpoint {
            server_ip: hb_auth.server_ip(),
            port: hb_auth.port(),
            sign_cookie: hb_auth.sign_cookie(),
        };
        if endpoint.server_ip.is_empty() || endpoint.port == 0 {
            inner.set_state(AgentState::Error);
            return Err(AcpError::AuthFailed(
                "heartbeat sign-in returned no UDP endpoint".into(),
            ));
        }

        let reauth_auth = hb_auth.clone();
        let reauth: ReauthFn = Arc::new(move || {
            let auth = reauth_auth.clone();
            Box::pin(async move {
                auth.sign_in(DEFAULT_MAX_RETRIES).await.ok()?;
                Some(HeartbeatEndpoint {
                    server_ip: auth.server_ip(),
                    port: auth.port(),
                    sign_cookie: auth.sign_cookie(),
                })
            })
        });
        let heartbeat = Arc::new(HeartbeatClient::new(inner.aid.clone(), endpoint, reauth));
        let invite_inner = Arc::downgrade(&self.inner);
        heartbeat.set_invite_callback(Some(Arc::new(move |invite| {
            if let Some(inner) = invite_inner.upgrade() {
                inner.on_udp_invite(invite);
            }
        })));
        if let Err(e) = heartbeat.online().await {
            error!(aid = %inner.aid, error = %e, "heartbeat start failed");
            inner.set_state(AgentState::Error);
            return Err(e);
        }
        *inner.heartbeat.lock().unwrap() = Some(heartbeat);

        // Phase 3: message-server auth and WebSocket.
        let msg_auth = Arc::new(AuthClient::new(
            inner.aid.clone(),
            message_server.clone(),
            inner.identity.clone(),
            inner.http.clone(),
        ));
        let ws_signature: Arc<dyn Fn() -> String + Send + Sync> =
            match msg_auth.sign_in(DEFAULT_MAX_RETRIES).await {
                Ok(()) => {
                    *inner.auth.lock().unwrap() = Some(msg_auth.clone());
                    let auth = msg_auth.clone();
                    Arc::new(move || auth.signature())
                }
                Err(e) => {
                    warn!(error = %e, "message-server sign-in failed, reusing AP signature");
                    let fallback = ap_auth.clone();
                    Arc::new(move || fallback.signature())
                }
            };

        let mut msg_config = MessageClientConfig::default();
        msg_config.verify_tls = tls_verify;
        let message = Arc::new(MessageClient::new(
            inner.aid.clone(),
            message_server.clone(),
            ws_signature,
            msg_config,
        ));
        let dispatch_inner = Arc::downgrade(&self.inner);
        message.set_message_handler(Some(Arc::new(move |cmd, data| {
            if let Some(inner) = dispatch_inner.upgrade() {
                inner.on_ws_frame(cmd, data);
            }
        })));
        if let Err(e) = message.connect().await {
            // Recoverable: heartbeat runs, the client keeps reconnecting.
            warn!(error = %e, "websocket connect failed, reconnect loop engaged");
        }
        inner.sessions.attach(Some(message.clone()));
        *inner.message.lock().unwrap() = Some(message);

        inner.set_state(AgentState::Online);
        info!(aid = %inner.aid, "agent online");
        Ok(())
    }

    /// Take the agent offline, releasing resources in dependency order:
    /// group client, message client, heartbeat, then sign-out.
    pub async fn offline(&self) {
        let inner = &self.inner;
        {
            let state = inner.state.lock().unwrap();
            if *state == AgentState::Offline {
                return;
            }
        }

        // Group first: cancels pending requests while the send path is
        // still alive underneath them.
        if let Some(group) = inner.group.lock().unwrap().take() {
            group.client.close();
        }

        inner.sessions.attach(None);
        if let Some(message) = inner.message.lock().unwrap().take() {
            message.disconnect();
        }
        if let Some(heartbeat) = inner.heartbeat.lock().unwrap().take() {
            heartbeat.offline();
        }
        let auth = inner.auth.lock().unwrap().take();
        if let Some(auth) = auth {
            auth.sign_out().await;
        }
        inner.signature.lock().unwrap().clear();

        inner.set_state(AgentState::Offline);
        info!(aid = %inner.aid, "agent offline");
    }

    /// Send blocks into a session. With no explicit receiver the message is
    /// addressed to every other session member, comma-joined.
    pub fn send_message(
        &self,
        session_id: &str,
        receiver: Option<&str>,
        blocks: Vec<Block>,
    ) -> AcpResult<String> {
        self.send_message_inner(session_id, receiver, blocks, None)
    }

    /// Like [`Agent::send_message`] with an instruction rider.
    pub fn send_message_with_instruction(
        &self,
        session_id: &str,
        blocks: Vec<Block>,
        instruction: Instruction,
    ) -> AcpResult<String> {
        self.send_message_inner(session_id, None, blocks, Some(instruction))
    }

    fn send_message_inner(
        &self,
        session_id: &str,
        receiver: Option<&str>,
        blocks: Vec<Block>,
        instruction: Option<Instruction>,
    ) -> AcpResult<String> {
        let inner = &self.inner;
        if !self.is_online() {
            return Err(AcpError::NotInitialized("agent is offline".into()));
        }
        let message = inner
            .message
            .lock()
            .unwrap()
            .clone()
            .ok_or(AcpError::WsDisconnected)?;
        if !message.is_connected() {
            return Err(AcpError::WsDisconnected);
        }

        let now = now_ms() as i64;
        let blocks: Vec<Block> = blocks
            .into_iter()
            .map(|b| b.with_default_timestamp(now))
            .collect();

        let receiver = match receiver {
            Some(r) => r.to_string(),
            None => inner
                .sessions
                .session_info(session_id)
                .map(|info| {
                    info.members
                        .iter()
                        .filter(|m| m.agent_id != inner.aid)
                        .map(|m| m.agent_id.clone())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default(),
        };

        let message_id = new_uuid_hex();
        let env = envelope::session_message(
            &message_id,
            session_id,
            &inner.aid,
            &receiver,
            &blocks,
            "",
            instruction.as_ref(),
            0,
        );
        message.send(env.to_json())?;
        debug!(session_id, message_id = %message_id, blocks = blocks.len(), "message sent");
        Ok(message_id)
    }

    /// Upload a file through the AP, returning the server-assigned URL.
    pub async fn upload_file(
        &self,
        path: &std::path::Path,
        progress: Option<ProgressFn>,
    ) -> AcpResult<String> {
        if !self.is_online() {
            return Err(AcpError::NotInitialized("agent is offline".into()));
        }
        let ap_base = self.inner.config.read().unwrap().ap_base.clone();
        let url = format!("{}/api/files/upload", ap_base.trim_end_matches('/'));
        let resp = self
            .inner
            .http
            .upload_file(&url, path, &self.signature(), progress)
            .await?;
        resp.get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AcpError::Network("upload response missing url".into()))
    }

    /// Download a file to `output`.
    pub async fn download_file(
        &self,
        url: &str,
        output: &std::path::Path,
        progress: Option<ProgressFn>,
    ) -> AcpResult<u64> {
        if !self.is_online() {
            return Err(AcpError::NotInitialized("agent is offline".into()));
        }
        self.inner
            .http
            .download_to_file(url, output, &self.signature(), progress)
            .await
    }

    // ---- group client ----

    /// Attach a group client bound to `session_id`. An empty target
    /// defaults to `group.<issuer>` derived from this agent's AID.
    pub fn init_group_client(&self, session_id: &str, target_aid: Option<&str>) {
        let inner = &self.inner;
        let target = match target_aid {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => match inner.aid.split_once('.') {
                Some((_, issuer)) => format!("group.{issuer}"),
                None => format!("group.{}", inner.aid),
            },
        };

        let send_inner = Arc::downgrade(&self.inner);
        let aid = inner.aid.clone();
        let session = session_id.to_string();
        let send_fn: SendFn = Arc::new(move |to_aid, payload| {
            let send_inner = send_inner.clone();
            let aid = aid.clone();
            let session = session.clone();
            Box::pin(async move {
                let inner = send_inner
                    .upgrade()
                    .ok_or_else(|| "agent dropped".to_string())?;
                let message = inner
                    .message
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| "websocket not connected".to_string())?;
                if !message.is_connected() {
                    return Err("websocket not connected".to_string());
                }
                let env = envelope::raw_session_message(
                    &now_ms().to_string(),
                    &session,
                    &aid,
                    &to_aid,
                    &payload,
                );
                message.send(env.to_json()).map_err(|e| e.to_string())
            })
        });

        let client = Arc::new(GroupClient::new(inner.aid.clone(), send_fn));
        let ops = Arc::new(GroupOperations::new(client.clone()));
        info!(target_aid = %target, session_id, "group client attached");
        *inner.group.lock().unwrap() = Some(GroupHandle {
            client,
            ops,
            target_aid: target,
        });
    }

    pub fn group_target_aid(&self) -> Option<String> {
        self.inner
            .group
            .lock()
            .unwrap()
            .as_ref()
            .map(|g| g.target_aid.clone())
    }

    pub fn group_ops(&self) -> Option<Arc<GroupOperations>> {
        self.inner.group.lock().unwrap().as_ref().map(|g| g.ops.clone())
    }

    pub fn group_client(&self) -> Option<Arc<GroupClient>> {
        self.inner
            .group
            .lock()
            .unwrap()
            .as_ref()
            .map(|g| g.client.clone())
    }

    pub fn set_group_event_handler(&self, handler: Option<Arc<dyn GroupEventHandler>>) {
        if let Some(group) = self.inner.group.lock().unwrap().as_ref() {
            group.client.set_event_handler(handler);
        }
    }

    pub fn set_group_event_processor(&self, processor: Option<Arc<dyn EventProcessor>>) {
        if let Some(group) = self.inner.group.lock().unwrap().as_ref() {
            group.client.set_event_processor(processor);
        }
    }

    pub fn set_group_cursor_store(&self, store: Option<Arc<dyn CursorStore>>) {
        if let Some(group) = self.inner.group.lock().unwrap().as_ref() {
            group.client.set_cursor_store(store);
        }
    }

    /// Detach and close the group client.
    pub fn close_group_client(&self) {
        if let Some(group) = self.inner.group.lock().unwrap().take() {
            group.client.close();
        }
    }

    /// Mark the agent permanently unusable (deleted identity).
    pub(crate) async fn invalidate(&self) {
        self.offline().await;
        self.inner.invalidated.store(true, Ordering::Release);
        self.inner.set_state(AgentState::Error);
    }
}

fn some_or(value: Option<String>, fallback: &str, what: &str) -> String {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => {
            warn!("{what} missing from accesspoint config, falling back to AP base");
            fallback.to_string()
        }
    }
}

impl AgentInner {
    fn set_state(&self, new: AgentState) {
        let old = {
            let mut state = self.state.lock().unwrap();
            let old = *state;
            *state = new;
            old
        };
        if old == new {
            return;
        }
        // Delivered from whichever task caused the transition.
        if let Some(cb) = self.handlers.state.read().unwrap().clone() {
            cb(old, new);
        }
    }

    fn report_error(&self, err: &AcpError) {
        if let Some(cb) = self.handlers.error.read().unwrap().clone() {
            cb(err);
        }
    }

    /// `get_accesspoint_config` → `(heartbeat_server, message_server)`.
    /// The `config` field may be an object or a JSON string of one.
    async fn fetch_accesspoint_config(
        &self,
        ap_api: &str,
        signature: &str,
    ) -> (Option<String>, Option<String>) {
        let url = format!("{ap_api}/get_accesspoint_config");
        let body = serde_json::json!({ "agent_id": self.aid, "signature": signature });
        let resp = match self.http.post_json(&url, &body).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "get_accesspoint_config failed");
                return (None, None);
            }
        };
        let config = match resp.get("config") {
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "accesspoint config string is not json");
                    return (None, None);
                }
            },
            Some(v) => v.clone(),
            None => Value::Null,
        };
        let field = |key: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        (field("heartbeat_server"), field("message_server"))
    }

    /// UDP invite: notify the handler, then auto-join over the WebSocket.
    fn on_udp_invite(&self, invite: agentcp_proto::udp::InviteRequest) {
        info!(
            session_id = %invite.session_id,
            inviter = %invite.inviter_agent_id,
            "session invite"
        );
        if let Some(cb) = self.handlers.invite.read().unwrap().clone() {
            cb(&invite.session_id, &invite.inviter_agent_id);
        }
        if let Err(e) = self.sessions.join_session(
            &invite.session_id,
            &invite.inviter_agent_id,
            &invite.invite_code,
        ) {
            warn!(error = %e, "auto-join after invite failed");
            self.report_error(&e);
        }
    }

    /// Every non-ack WebSocket frame lands here, on the reader task.
    pub(crate) fn on_ws_frame(&self, cmd: &str, data: &Value) {
        match cmd {
            "session_message" => {
                // Group traffic is gated on the sender BEFORE any URL
                // decoding: group payloads are raw JSON in `message`.
                let sender = data.get("sender").and_then(Value::as_str).unwrap_or("");
                let group = self.group.lock().unwrap();
                if let Some(handle) = group.as_ref() {
                    if sender == handle.target_aid {
                        let client = handle.client.clone();
                        drop(group);
                        if let Some(payload) = data.get("message").and_then(Value::as_str) {
                            if !payload.is_empty() {
                                client.handle_incoming(payload);
                            }
                        }
                        return;
                    }
                }
                drop(group);
                self.deliver_session_message(data);
            }
            "system_message" => {
                debug!("system message ignored");
            }
            other => {
                debug!(cmd = other, "unhandled frame");
            }
        }
    }

    fn deliver_session_message(&self, data: &Value) {
        let handler = self.handlers.message.read().unwrap().clone();
        let Some(handler) = handler else {
            debug!("session_message dropped: no message handler");
            return;
        };

        let field = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };
        let timestamp = match data.get("timestamp") {
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            _ => 0,
        };
        let blocks = data
            .get("message")
            .and_then(Value::as_str)
            .and_then(envelope::decode_blocks)
            .unwrap_or_default();
        let instruction = data
            .get("instruction")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        let message = Message {
            message_id: field("message_id"),
            session_id: field("session_id"),
            sender: field("sender"),
            receiver: field("receiver"),
            ref_msg_id: field("ref_msg_id"),
            timestamp,
            blocks,
            instruction,
        };
        handler(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;
    use agentcp_identity::IdentityStore;
    use agentcp_proto::envelope::url_encode;
    use serde_json::json;

    // `persist` stores the certificate verbatim; a placeholder is enough
    // for wiring tests that never touch the key-extraction path.
    const FAKE_CERT: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn test_agent() -> (tempfile::TempDir, Agent) {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let identity = store
            .generate("alice.aid.net")
            .unwrap()
            .persist(FAKE_CERT, "pw")
            .unwrap();
        let config = Arc::new(RwLock::new(AcpConfig::default()));
        let http = HttpClient::new(&TlsConfig::default(), None).unwrap();
        let agent = Agent::new(
            "alice.aid.net".to_string(),
            Arc::new(identity),
            config,
            http,
        );
        (dir, agent)
    }

    #[derive(Default)]
    struct NotifyLog {
        approved: Mutex<Vec<String>>,
    }
    impl GroupEventHandler for NotifyLog {
        fn on_join_approved(&self, group_id: &str, _addr: &str) {
            self.approved.lock().unwrap().push(group_id.to_string());
        }
    }

    #[tokio::test]
    async fn group_target_defaults_to_issuer() {
        let (_dir, agent) = test_agent();
        agent.init_group_client("sess-1", None);
        assert_eq!(agent.group_target_aid().as_deref(), Some("group.aid.net"));

        agent.init_group_client("sess-1", Some("group.other.net"));
        assert_eq!(agent.group_target_aid().as_deref(), Some("group.other.net"));
    }

    #[tokio::test]
    async fn group_frames_gate_on_sender_before_decoding() {
        let (_dir, agent) = test_agent();
        agent.init_group_client("sess-1", None);

        let notifies = Arc::new(NotifyLog::default());
        agent.set_group_event_handler(Some(notifies.clone()));

        let delivered: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        agent.set_message_handler(Some(Arc::new(move |msg| {
            sink.lock().unwrap().push(msg);
        })));

        // Sender matches the group target: raw payload goes to the group
        // client without URL decoding.
        let group_payload = json!({
            "action": "group_notify",
            "group_id": "g7",
            "event": "join_approved",
            "data": {"group_address": "https://group.aid.net/g7"},
            "timestamp": 1,
        })
        .to_string();
        agent.inner.on_ws_frame(
            "session_message",
            &json!({
                "message_id": "m1",
                "session_id": "sess-1",
                "sender": "group.aid.net",
                "receiver": "alice.aid.net",
                "message": group_payload,
                "timestamp": "1",
            }),
        );

        // Any other sender: the message field is URL-decoded block JSON.
        let blocks = json!([{"type": "content", "content": "hello", "timestamp": 2}]).to_string();
        agent.inner.on_ws_frame(
            "session_message",
            &json!({
                "message_id": "m2",
                "session_id": "sess-1",
                "sender": "bob.aid.net",
                "receiver": "alice.aid.net",
                "message": url_encode(&blocks),
                "timestamp": "2",
            }),
        );

        assert_eq!(*notifies.approved.lock().unwrap(), vec!["g7".to_string()]);
        let delivered = delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1, "group frame must not reach the handler");
        assert_eq!(delivered[0].sender, "bob.aid.net");
        assert_eq!(delivered[0].blocks, vec![Block::Content {
            content: "hello".into(),
            timestamp: 2,
            status: "success".into(),
        }]);
    }

    #[tokio::test]
    async fn close_group_client_cancels_and_detaches() {
        let (_dir, agent) = test_agent();
        agent.init_group_client("sess-1", None);
        let client = agent.group_client().unwrap();
        agent.close_group_client();
        assert!(client.is_closed());
        assert!(agent.group_client().is_none());
    }
}
