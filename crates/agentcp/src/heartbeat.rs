//! UDP heartbeat and invite channel.
//!
//! One socket, two tasks: the send loop emits a heartbeat whenever the
//! server-controlled interval has elapsed, the receive loop parses inbound
//! datagrams. A `next_beat` of 401 is the server telling us to
//! re-authenticate; invites are handed to the registered callback and
//! acknowledged on the wire.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use agentcp_proto::envelope::now_ms;
use agentcp_proto::udp::{
    HeartbeatRequest, InviteRequest, InviteResponse, UdpHeader, UdpMessage, MSG_TYPE_INVITE_RESP,
    NEXT_BEAT_REAUTH,
};
use futures_util::future::BoxFuture;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::error::{AcpError, AcpResult};

/// Floor for the heartbeat interval, matching the initial value.
const MIN_INTERVAL_MS: u64 = 5_000;
/// Send-loop wakeup cadence.
const TICK: Duration = Duration::from_secs(1);

/// Heartbeat endpoint and credential as returned by sign-in.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatEndpoint {
    pub server_ip: String,
    pub port: u16,
    pub sign_cookie: u64,
}

/// Invoked from the receive task for every inbound invite.
pub type InviteFn = Arc<dyn Fn(InviteRequest) + Send + Sync>;

/// Re-authentication hook: runs the sign-in again and returns the fresh
/// endpoint, or `None` when authentication failed.
pub type ReauthFn =
    Arc<dyn Fn() -> BoxFuture<'static, Option<HeartbeatEndpoint>> + Send + Sync>;

struct HbState {
    endpoint: HeartbeatEndpoint,
    interval_ms: u64,
    last_sent_ms: u64,
}

struct Inner {
    agent_id: String,
    state: Mutex<HbState>,
    invite_cb: RwLock<Option<InviteFn>>,
    reauth: ReauthFn,
    running: AtomicBool,
    seq: AtomicU64,
}

impl Inner {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn target(&self) -> (String, u16, u64) {
        let state = self.state.lock().unwrap();
        (
            state.endpoint.server_ip.clone(),
            state.endpoint.port,
            state.endpoint.sign_cookie,
        )
    }
}

/// Client side of the UDP heartbeat protocol.
pub struct HeartbeatClient {
    inner: Arc<Inner>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl HeartbeatClient {
    pub fn new(agent_id: impl Into<String>, endpoint: HeartbeatEndpoint, reauth: ReauthFn) -> Self {
        Self {
            inner: Arc::new(Inner {
                agent_id: agent_id.into(),
                state: Mutex::new(HbState {
                    endpoint,
                    interval_ms: MIN_INTERVAL_MS,
                    last_sent_ms: 0,
                }),
                invite_cb: RwLock::new(None),
                reauth,
                running: AtomicBool::new(false),
                seq: AtomicU64::new(0),
            }),
            socket: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn set_invite_callback(&self, cb: Option<InviteFn>) {
        *self.inner.invite_cb.write().unwrap() = cb;
    }

    /// Current interval, as last dictated by the server.
    pub fn interval_ms(&self) -> u64 {
        self.inner.state.lock().unwrap().interval_ms
    }

    pub fn sign_cookie(&self) -> u64 {
        self.inner.state.lock().unwrap().endpoint.sign_cookie
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Bind an ephemeral UDP port and start the send and receive loops.
    pub async fn online(&self) -> AcpResult<()> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|e| AcpError::Network(format!("udp bind: {e}")))?;
        let socket = Arc::new(socket);
        *self.socket.lock().unwrap() = Some(socket.clone());
        info!(agent_id = %self.inner.agent_id, "heartbeat online");

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(send_loop(self.inner.clone(), socket.clone())));
        tasks.push(tokio::spawn(recv_loop(self.inner.clone(), socket)));
        Ok(())
    }

    /// Stop both loops and close the socket. Idempotent.
    pub fn offline(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        // Dropping the socket closes it, waking any blocked recv.
        self.socket.lock().unwrap().take();
        info!(agent_id = %self.inner.agent_id, "heartbeat offline");
    }
}

impl Drop for HeartbeatClient {
    fn drop(&mut self) {
        self.offline();
    }
}

async fn send_loop(inner: Arc<Inner>, socket: Arc<UdpSocket>) {
    while inner.running.load(Ordering::Acquire) {
        let due = {
            let mut state = inner.state.lock().unwrap();
            let now = now_ms();
            if now > state.last_sent_ms + state.interval_ms || state.last_sent_ms == 0 {
                state.last_sent_ms = now;
                true
            } else {
                false
            }
        };
        if due {
            let (ip, port, cookie) = inner.target();
            let req = HeartbeatRequest::new(inner.agent_id.clone(), cookie, inner.next_seq());
            if let Err(e) = socket.send_to(&req.encode(), (ip.as_str(), port)).await {
                warn!(error = %e, "heartbeat send failed");
            }
        }
        tokio::time::sleep(TICK).await;
    }
}

async fn recv_loop(inner: Arc<Inner>, socket: Arc<UdpSocket>) {
    let mut buf = [0u8; 1536];
    while inner.running.load(Ordering::Acquire) {
        let n = match socket.recv_from(&mut buf).await {
            Ok((n, _)) => n,
            Err(e) => {
                debug!(error = %e, "heartbeat recv error");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let msg = match UdpMessage::decode(&buf[..n]) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "undecodable datagram ignored");
                continue;
            }
        };
        match msg {
            UdpMessage::HeartbeatResponse(resp) => {
                if resp.next_beat == NEXT_BEAT_REAUTH {
                    info!("server requested re-authentication");
                    if let Some(endpoint) = (inner.reauth)().await {
                        let mut state = inner.state.lock().unwrap();
                        state.endpoint = endpoint;
                        // Next tick sends a heartbeat with the new cookie.
                        state.last_sent_ms = 0;
                    } else {
                        warn!("re-authentication failed");
                    }
                } else {
                    let mut state = inner.state.lock().unwrap();
                    state.interval_ms = resp.next_beat.max(MIN_INTERVAL_MS);
                }
            }
            UdpMessage::InviteRequest(invite) => {
                debug!(
                    session_id = %invite.session_id,
                    inviter = %invite.inviter_agent_id,
                    "invite received"
                );
                let cb = inner.invite_cb.read().unwrap().clone();
                if let Some(cb) = cb {
                    cb(invite.clone());
                }
                let (ip, port, cookie) = inner.target();
                let resp = InviteResponse {
                    header: UdpHeader::new(MSG_TYPE_INVITE_RESP, inner.next_seq(), 0),
                    agent_id: inner.agent_id.clone(),
                    inviter_agent_id: invite.inviter_agent_id,
                    session_id: invite.session_id,
                    sign_cookie: cookie,
                };
                if let Err(e) = socket.send_to(&resp.encode(), (ip.as_str(), port)).await {
                    warn!(error = %e, "invite response send failed");
                }
            }
            UdpMessage::Unknown(kind) => {
                debug!(kind, "unknown datagram type ignored");
            }
        }
    }
}
