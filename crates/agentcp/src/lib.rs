//! Client SDK for the AgentCP federated messaging network.
//!
//! An *agent* (a DNS-shaped identity such as `alice.aid.net`) signs in to
//! its access point with an ECDSA P-384 certificate, keeps a UDP heartbeat
//! alive, exchanges session messages over a WebSocket, and can speak the
//! group protocol to a dedicated group AP.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use agentcp::AgentCp;
//!
//! let acp = AgentCp::new();
//! acp.initialize();
//! acp.set_base_urls("https://ca.aid.net", "https://ap.aid.net")?;
//! acp.set_storage_path("/var/lib/agentcp")?;
//!
//! let agent = acp.load_aid("alice.aid.net", "seed-password").await?;
//! agent.online().await?;
//!
//! let session = agent
//!     .sessions()
//!     .create_session(&["bob.aid.net".to_string()])
//!     .await?;
//! agent.send_message(&session, None, vec![agentcp::Block::text("hello")])?;
//! # Ok(())
//! # }
//! ```
//!
//! Event callbacks (messages, state changes, invites, group events) are
//! invoked from the SDK's I/O tasks. Handlers must be thread-safe and
//! return promptly; hop to your own executor if you need to block.

mod acp;
mod agent;
mod auth;
mod config;
mod error;
mod heartbeat;
mod http;
mod message;
mod session;

pub use acp::AgentCp;
pub use agent::{
    Agent, AgentState, ErrorCallback, InviteCallback, MessageCallback, StateCallback,
};
pub use auth::AuthClient;
pub use config::{AcpConfig, MessageClientConfig, ProxyConfig, TlsConfig};
pub use error::{AcpError, AcpResult};
pub use heartbeat::{HeartbeatClient, HeartbeatEndpoint, InviteFn, ReauthFn};
pub use http::{set_dns_resolver, DnsFn, HttpClient, ProgressFn};
pub use message::{ConnectionState, LifecycleFn, MessageClient, MessageHandlerFn, SignatureFn};
pub use session::{MemberRole, SessionInfo, SessionManager, SessionMember};

pub use agentcp_group as group;
pub use agentcp_identity as identity;
pub use agentcp_proto as proto;
pub use agentcp_proto::block::{Block, Instruction, Message};
