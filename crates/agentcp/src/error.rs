//! SDK-level error type.

use thiserror::Error;

pub type AcpResult<T> = std::result::Result<T, AcpError>;

#[derive(Debug, Error)]
pub enum AcpError {
    #[error("not initialized: {0}")]
    NotInitialized(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("aid already exists: {0}")]
    AidAlreadyExists(String),
    #[error("aid not found: {0}")]
    AidNotFound(String),
    #[error("aid has been deleted: {0}")]
    AidInvalid(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("websocket not connected")]
    WsDisconnected,
    #[error("websocket send failed: {0}")]
    WsSendFailed(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error(transparent)]
    Identity(#[from] agentcp_identity::IdentityError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcpError {
    /// Transient errors are worth retrying; protocol and argument errors
    /// are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::WsDisconnected | Self::WsSendFailed(_)
        )
    }
}
