//! Group-layer error taxonomy.

use thiserror::Error;

/// Closed set of protocol error codes returned by the group AP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum GroupErrorCode {
    Success = 0,
    GroupNotFound = 1001,
    NoPermission = 1002,
    GroupDissolved = 1003,
    GroupSuspended = 1004,
    AlreadyMember = 1005,
    NotMember = 1006,
    Banned = 1007,
    MemberFull = 1008,
    InvalidParams = 1009,
    RateLimited = 1010,
    InviteCodeInvalid = 1011,
    RequestExists = 1012,
    BroadcastConflict = 1013,
    DutyNotEnabled = 1020,
    NotDutyAgent = 1021,
    AgentMdNotFound = 1024,
    AgentMdInvalid = 1025,
    ActionNotImplemented = 1099,
}

impl GroupErrorCode {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1001 => Self::GroupNotFound,
            1002 => Self::NoPermission,
            1003 => Self::GroupDissolved,
            1004 => Self::GroupSuspended,
            1005 => Self::AlreadyMember,
            1006 => Self::NotMember,
            1007 => Self::Banned,
            1008 => Self::MemberFull,
            1009 => Self::InvalidParams,
            1010 => Self::RateLimited,
            1011 => Self::InviteCodeInvalid,
            1012 => Self::RequestExists,
            1013 => Self::BroadcastConflict,
            1020 => Self::DutyNotEnabled,
            1021 => Self::NotDutyAgent,
            1024 => Self::AgentMdNotFound,
            1025 => Self::AgentMdInvalid,
            1099 => Self::ActionNotImplemented,
            _ => return None,
        })
    }

    pub fn message(code: i32) -> &'static str {
        match Self::from_code(code) {
            Some(Self::Success) => "success",
            Some(Self::GroupNotFound) => "group not found",
            Some(Self::NoPermission) => "no permission",
            Some(Self::GroupDissolved) => "group dissolved",
            Some(Self::GroupSuspended) => "group suspended",
            Some(Self::AlreadyMember) => "already a member",
            Some(Self::NotMember) => "not a member",
            Some(Self::Banned) => "banned from group",
            Some(Self::MemberFull) => "group member limit reached",
            Some(Self::InvalidParams) => "invalid parameters",
            Some(Self::RateLimited) => "rate limited",
            Some(Self::InviteCodeInvalid) => "invite code invalid",
            Some(Self::RequestExists) => "join request already exists",
            Some(Self::BroadcastConflict) => "broadcast lock held elsewhere",
            Some(Self::DutyNotEnabled) => "duty mode not enabled",
            Some(Self::NotDutyAgent) => "not the duty agent",
            Some(Self::AgentMdNotFound) => "agent metadata not found",
            Some(Self::AgentMdInvalid) => "agent metadata invalid",
            Some(Self::ActionNotImplemented) => "action not implemented",
            None => "unknown error",
        }
    }
}

/// Errors surfaced by the group client and operations.
///
/// Timeouts and cancellation are distinct kinds so callers can back off or
/// retry separately from protocol failures.
#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group request failed: action={action} code={code} group={group_id}: {message}")]
    Protocol {
        action: String,
        code: i32,
        message: String,
        group_id: String,
    },
    #[error("group request timed out: action={action} group={group_id}")]
    Timeout { action: String, group_id: String },
    #[error("group request cancelled: request_id={request_id}")]
    Cancelled { request_id: String },
    #[error("group client is closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
    #[error("invalid group url: {0}")]
    InvalidUrl(String),
    #[error("malformed response payload for {action}: {message}")]
    BadPayload { action: String, message: String },
}

impl GroupError {
    pub fn protocol(action: &str, code: i32, message: String, group_id: String) -> Self {
        let message = if message.is_empty() {
            GroupErrorCode::message(code).to_string()
        } else {
            message
        };
        Self::Protocol {
            action: action.to_string(),
            code,
            message,
            group_id,
        }
    }

    /// Protocol code when this is a protocol error.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
