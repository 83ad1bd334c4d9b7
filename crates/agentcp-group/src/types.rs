//! Wire and domain types of the group protocol.
//!
//! Requests, responses and notifications travel as JSON objects tunneled in
//! the `message` field of `session_message` envelopes. Response `data`
//! payloads deserialize into the typed structs below; fields the server may
//! omit default.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A group protocol request: `{action, request_id, group_id?, params?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRequest {
    pub action: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A group protocol response: `{action, request_id, code, group_id?, data?,
/// error?}`. Code 0 is success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupResponse {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default = "default_code")]
    pub code: i32,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: String,
}

fn default_code() -> i32 {
    -1
}

impl GroupResponse {
    /// The `data` payload, or an empty object when absent.
    pub fn data_or_empty(&self) -> Value {
        self.data.clone().unwrap_or_else(|| Value::Object(Default::default()))
    }
}

/// A server push: `{action: "group_notify", group_id, event, data, timestamp}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupNotify {
    #[serde(default = "default_notify_action")]
    pub action: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub timestamp: i64,
}

fn default_notify_action() -> String {
    "group_notify".to_string()
}

/// One message in a group stream. `msg_id` is monotonic per group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMessage {
    #[serde(default)]
    pub msg_id: i64,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// A batch push of messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMessageBatch {
    #[serde(default)]
    pub start_msg_id: i64,
    #[serde(default)]
    pub latest_msg_id: i64,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub messages: Vec<GroupMessage>,
}

/// One event in a group's event stream. `event_id` is monotonic per group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupEvent {
    #[serde(default)]
    pub event_id: i64,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Per-group message cursor as reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCursor {
    #[serde(default)]
    pub start_msg_id: i64,
    #[serde(default)]
    pub current_msg_id: i64,
    #[serde(default)]
    pub latest_msg_id: i64,
    #[serde(default)]
    pub unread_count: i64,
}

/// Per-group event cursor as reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCursor {
    #[serde(default)]
    pub start_event_id: i64,
    #[serde(default)]
    pub current_event_id: i64,
    #[serde(default)]
    pub latest_event_id: i64,
    #[serde(default)]
    pub unread_count: i64,
}

/// Combined cursor state for a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    #[serde(default)]
    pub msg_cursor: MsgCursor,
    #[serde(default)]
    pub event_cursor: EventCursor,
}

// ---- operation response payloads ----

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateGroupResp {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub group_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageResp {
    #[serde(default)]
    pub msg_id: i64,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullMessagesResp {
    #[serde(default)]
    pub messages: Vec<GroupMessage>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub latest_msg_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullEventsResp {
    #[serde(default)]
    pub events: Vec<GroupEvent>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub latest_event_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupInfoResp {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub member_count: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub master: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestJoinResp {
    #[serde(default = "default_pending")]
    pub status: String,
    #[serde(default)]
    pub request_id: String,
}

fn default_pending() -> String {
    "pending".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchReviewResp {
    #[serde(default)]
    pub processed: i64,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesResp {
    #[serde(default)]
    pub max_members: i64,
    #[serde(default)]
    pub max_message_size: i64,
    #[serde(default)]
    pub broadcast_policy: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnouncementResp {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub updated_by: String,
    #[serde(default)]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinRequirementsResp {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub require_all: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MasterResp {
    #[serde(default)]
    pub master: String,
    #[serde(default)]
    pub master_transferred_at: i64,
    #[serde(default)]
    pub transfer_reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InviteCodeResp {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub max_uses: i64,
    #[serde(default)]
    pub expires_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BroadcastLockResp {
    #[serde(default)]
    pub acquired: bool,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub holder: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BroadcastPermissionResp {
    #[serde(default)]
    pub allowed: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DutyConfig {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub rotation_strategy: String,
    #[serde(default)]
    pub shift_duration_ms: i64,
    #[serde(default)]
    pub max_messages_per_shift: i64,
    #[serde(default)]
    pub duty_priority_window_ms: i64,
    #[serde(default)]
    pub enable_rule_prelude: bool,
    #[serde(default)]
    pub agents: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DutyState {
    #[serde(default)]
    pub current_duty_agent: String,
    #[serde(default)]
    pub shift_start_time: i64,
    #[serde(default)]
    pub messages_in_shift: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DutyStatusResp {
    #[serde(default)]
    pub config: DutyConfig,
    #[serde(default)]
    pub state: DutyState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncStatusResp {
    #[serde(default)]
    pub msg_cursor: MsgCursor,
    #[serde(default)]
    pub event_cursor: EventCursor,
    #[serde(default)]
    pub sync_percentage: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChecksumResp {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub checksum: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicGroupInfoResp {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub member_count: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub join_mode: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchGroupsResp {
    #[serde(default)]
    pub groups: Vec<PublicGroupInfoResp>,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DigestResp {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub message_count: i64,
    #[serde(default)]
    pub unique_senders: i64,
    #[serde(default)]
    pub data_size: i64,
    #[serde(default)]
    pub generated_at: i64,
    #[serde(default)]
    pub top_contributors: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MembershipInfo {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub group_url: String,
    #[serde(default)]
    pub group_server: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMyGroupsResp {
    #[serde(default)]
    pub groups: Vec<MembershipInfo>,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetFileResp {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub total_size: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetSummaryResp {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub message_count: i64,
    #[serde(default)]
    pub senders: Vec<String>,
    #[serde(default)]
    pub data_size: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetMetricsResp {
    #[serde(default)]
    pub goroutines: i64,
    #[serde(default)]
    pub alloc_mb: f64,
    #[serde(default)]
    pub sys_mb: f64,
    #[serde(default)]
    pub gc_cycles: i64,
}
