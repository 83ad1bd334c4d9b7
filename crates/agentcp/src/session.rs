//! Local mirror of session membership and the session command surface.
//!
//! The server is authoritative; this map is a convenience view updated
//! optimistically. Only `create_session` waits for an ack — the other
//! operations fire the envelope and adjust the mirror.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use agentcp_proto::envelope::{self, new_uuid_hex, now_ms, CreateSessionAck};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AcpError, AcpResult};
use crate::message::MessageClient;

/// Role of a member within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Member,
}

/// One member of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMember {
    pub agent_id: String,
    pub role: MemberRole,
    pub joined_at: u64,
}

#[derive(Debug, Clone, Default)]
struct Session {
    members: Vec<SessionMember>,
    closed: bool,
}

/// Snapshot of a session's mirror state.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub members: Vec<SessionMember>,
    pub closed: bool,
}

/// Ack wait budget for `create_session`.
const CREATE_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracks the sessions this agent participates in.
pub struct SessionManager {
    agent_id: String,
    client: RwLock<Option<Arc<MessageClient>>>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            client: RwLock::new(None),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the manager to a connected message client (or detach it).
    pub fn attach(&self, client: Option<Arc<MessageClient>>) {
        *self.client.write().unwrap() = client;
    }

    fn client(&self) -> Option<Arc<MessageClient>> {
        self.client.read().unwrap().clone()
    }

    fn connected_client(&self) -> Option<Arc<MessageClient>> {
        self.client().filter(|c| c.is_connected())
    }

    /// Create a session with the given members. The caller becomes `owner`;
    /// every distinct non-self member is recorded and invited.
    ///
    /// Without a server ack (WebSocket down) the session id is generated
    /// locally — observable only in that situation.
    pub async fn create_session(&self, members: &[String]) -> AcpResult<String> {
        let session_id = match self.create_on_server().await {
            Some(id) => id,
            None => {
                warn!("create_session falling back to local-only session id");
                format!("session-{}", new_uuid_hex())
            }
        };

        let joined_at = now_ms();
        let mut session = Session {
            members: vec![SessionMember {
                agent_id: self.agent_id.clone(),
                role: MemberRole::Owner,
                joined_at,
            }],
            closed: false,
        };
        for member in members {
            if member.is_empty() || *member == self.agent_id {
                continue;
            }
            if session.members.iter().any(|m| m.agent_id == *member) {
                continue;
            }
            session.members.push(SessionMember {
                agent_id: member.clone(),
                role: MemberRole::Member,
                joined_at,
            });
        }
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), session);

        for member in members {
            if member.is_empty() || *member == self.agent_id {
                continue;
            }
            // Invite failures leave the session intact.
            if let Err(e) = self.invite_agent(&session_id, member) {
                warn!(member = %member, error = %e, "invite failed");
            }
        }

        info!(session_id = %session_id, members = members.len(), "session created");
        Ok(session_id)
    }

    async fn create_on_server(&self) -> Option<String> {
        let client = self.connected_client()?;
        let request_id = new_uuid_hex();
        let env = envelope::create_session_req(&request_id, "public");
        let ack = client
            .send_and_wait_ack(
                env.to_json(),
                "create_session_ack",
                &request_id,
                CREATE_ACK_TIMEOUT,
            )
            .await
            .ok()?;
        let ack: CreateSessionAck = serde_json::from_value(ack).ok()?;
        (!ack.session_id.is_empty()).then_some(ack.session_id)
    }

    /// Send an invite for `agent_id` and add it to the mirror. The envelope
    /// is sent even when the member is already mirrored; the server is the
    /// judge of duplicates.
    pub fn invite_agent(&self, session_id: &str, agent_id: &str) -> AcpResult<()> {
        if session_id.is_empty() || agent_id.is_empty() {
            return Err(AcpError::InvalidArgument("empty session or agent id".into()));
        }
        if let Some(client) = self.connected_client() {
            let env = envelope::invite_agent_req(
                session_id,
                &new_uuid_hex(),
                &self.agent_id,
                agent_id,
                "",
            );
            client.send(env.to_json())?;
        } else {
            warn!(session_id, agent_id, "invite not sent: websocket down");
        }

        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AcpError::SessionNotFound(session_id.to_string()))?;
        if !session.members.iter().any(|m| m.agent_id == agent_id) {
            session.members.push(SessionMember {
                agent_id: agent_id.to_string(),
                role: MemberRole::Member,
                joined_at: now_ms(),
            });
        }
        Ok(())
    }

    /// Join a session (e.g. after an invite) and mirror it locally.
    pub fn join_session(
        &self,
        session_id: &str,
        inviter_agent_id: &str,
        invite_code: &str,
    ) -> AcpResult<()> {
        if session_id.is_empty() {
            return Err(AcpError::InvalidArgument("empty session id".into()));
        }
        if let Some(client) = self.connected_client() {
            let env = envelope::join_session_req(
                session_id,
                &now_ms().to_string(),
                inviter_agent_id,
                invite_code,
            );
            client.send(env.to_json())?;
        }

        let mut sessions = self.sessions.lock().unwrap();
        sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!(session_id, "mirroring joined session");
            Session {
                members: vec![SessionMember {
                    agent_id: self.agent_id.clone(),
                    role: MemberRole::Member,
                    joined_at: now_ms(),
                }],
                closed: false,
            }
        });
        Ok(())
    }

    pub fn leave_session(&self, session_id: &str) -> AcpResult<()> {
        if session_id.is_empty() {
            return Err(AcpError::InvalidArgument("empty session id".into()));
        }
        if let Some(client) = self.connected_client() {
            let env = envelope::leave_session_req(session_id, &now_ms().to_string());
            client.send(env.to_json())?;
        }
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AcpError::SessionNotFound(session_id.to_string()))?;
        session.members.retain(|m| m.agent_id != self.agent_id);
        Ok(())
    }

    pub fn close_session(&self, session_id: &str) -> AcpResult<()> {
        if session_id.is_empty() {
            return Err(AcpError::InvalidArgument("empty session id".into()));
        }
        if let Some(client) = self.connected_client() {
            let env = envelope::close_session_req(session_id, &now_ms().to_string(), "");
            client.send(env.to_json())?;
        }
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AcpError::SessionNotFound(session_id.to_string()))?;
        session.closed = true;
        Ok(())
    }

    pub fn eject_agent(&self, session_id: &str, agent_id: &str) -> AcpResult<()> {
        if session_id.is_empty() || agent_id.is_empty() {
            return Err(AcpError::InvalidArgument("empty session or agent id".into()));
        }
        if let Some(client) = self.connected_client() {
            let env =
                envelope::eject_agent_req(session_id, &now_ms().to_string(), agent_id, "");
            client.send(env.to_json())?;
        }
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AcpError::SessionNotFound(session_id.to_string()))?;
        session.members.retain(|m| m.agent_id != agent_id);
        Ok(())
    }

    /// Mirror view of the member list; also nudges the server for a fresh
    /// copy when connected.
    pub fn member_list(&self, session_id: &str) -> AcpResult<Vec<SessionMember>> {
        if let Some(client) = self.connected_client() {
            let env = envelope::get_member_list_req(session_id, &now_ms().to_string());
            let _ = client.send(env.to_json());
        }
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(session_id)
            .map(|s| s.members.clone())
            .ok_or_else(|| AcpError::SessionNotFound(session_id.to_string()))
    }

    pub fn session_info(&self, session_id: &str) -> AcpResult<SessionInfo> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(session_id)
            .map(|s| SessionInfo {
                session_id: session_id.to_string(),
                members: s.members.clone(),
                closed: s.closed,
            })
            .ok_or_else(|| AcpError::SessionNotFound(session_id.to_string()))
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }
}
