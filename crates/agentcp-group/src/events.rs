//! Notification and event dispatch.
//!
//! Two dispatchers exist: [`dispatch_notify`] fans server notifications out
//! to an [`GroupEventHandler`] by notify name, and [`dispatch_event`] fans
//! structured [`GroupEvent`]s out to an [`EventProcessor`] by event type.
//! Both are invoked from transport tasks; implementations must not block.

use serde_json::Value;
use tracing::warn;

use crate::types::{GroupEvent, GroupMessage, GroupMessageBatch, GroupNotify};

pub const NOTIFY_NEW_MESSAGE: &str = "new_message";
pub const NOTIFY_NEW_EVENT: &str = "new_event";
pub const NOTIFY_GROUP_INVITE: &str = "group_invite";
pub const NOTIFY_JOIN_APPROVED: &str = "join_approved";
pub const NOTIFY_JOIN_REJECTED: &str = "join_rejected";
pub const NOTIFY_JOIN_REQUEST_RECEIVED: &str = "join_request_received";
pub const NOTIFY_GROUP_MESSAGE: &str = "group_message";
pub const NOTIFY_GROUP_EVENT: &str = "group_event";

/// The enumerated group event vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupEventType {
    MemberJoined,
    MemberRemoved,
    MemberLeft,
    MemberBanned,
    MemberUnbanned,
    MetaUpdated,
    RulesUpdated,
    AnnouncementUpdated,
    GroupDissolved,
    MasterTransferred,
    GroupSuspended,
    GroupResumed,
    JoinRequirementsUpdated,
    InviteCodeCreated,
    InviteCodeRevoked,
}

impl GroupEventType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "member_joined" => Self::MemberJoined,
            "member_removed" => Self::MemberRemoved,
            "member_left" => Self::MemberLeft,
            "member_banned" => Self::MemberBanned,
            "member_unbanned" => Self::MemberUnbanned,
            "meta_updated" => Self::MetaUpdated,
            "rules_updated" => Self::RulesUpdated,
            "announcement_updated" => Self::AnnouncementUpdated,
            "group_dissolved" => Self::GroupDissolved,
            "master_transferred" => Self::MasterTransferred,
            "group_suspended" => Self::GroupSuspended,
            "group_resumed" => Self::GroupResumed,
            "join_requirements_updated" => Self::JoinRequirementsUpdated,
            "invite_code_created" => Self::InviteCodeCreated,
            "invite_code_revoked" => Self::InviteCodeRevoked,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemberJoined => "member_joined",
            Self::MemberRemoved => "member_removed",
            Self::MemberLeft => "member_left",
            Self::MemberBanned => "member_banned",
            Self::MemberUnbanned => "member_unbanned",
            Self::MetaUpdated => "meta_updated",
            Self::RulesUpdated => "rules_updated",
            Self::AnnouncementUpdated => "announcement_updated",
            Self::GroupDissolved => "group_dissolved",
            Self::MasterTransferred => "master_transferred",
            Self::GroupSuspended => "group_suspended",
            Self::GroupResumed => "group_resumed",
            Self::JoinRequirementsUpdated => "join_requirements_updated",
            Self::InviteCodeCreated => "invite_code_created",
            Self::InviteCodeRevoked => "invite_code_revoked",
        }
    }
}

/// Receiver for group notifications and pushed messages. All methods default
/// to no-ops; implement what you need. Called from I/O tasks.
#[allow(unused_variables)]
pub trait GroupEventHandler: Send + Sync {
    fn on_new_message(&self, group_id: &str, latest_msg_id: i64, sender: &str, preview: &str) {}
    fn on_new_event(&self, group_id: &str, latest_event_id: i64, event_type: &str, summary: &str) {
    }
    fn on_group_invite(&self, group_id: &str, group_address: &str, invited_by: &str) {}
    fn on_join_approved(&self, group_id: &str, group_address: &str) {}
    fn on_join_rejected(&self, group_id: &str, reason: &str) {}
    fn on_join_request_received(&self, group_id: &str, agent_id: &str, message: &str) {}
    fn on_group_message(&self, group_id: &str, message: &GroupMessage) {}
    fn on_group_message_batch(&self, group_id: &str, batch: &GroupMessageBatch) {}
    fn on_group_event(&self, group_id: &str, event: &GroupEvent) {}
}

/// Receiver for structured group events keyed by event type. All methods
/// default to no-ops.
#[allow(unused_variables)]
pub trait EventProcessor: Send + Sync {
    fn on_member_joined(&self, group_id: &str, agent_id: &str, role: &str) {}
    fn on_member_removed(&self, group_id: &str, agent_id: &str, reason: &str) {}
    fn on_member_left(&self, group_id: &str, agent_id: &str, reason: &str) {}
    fn on_member_banned(&self, group_id: &str, agent_id: &str, reason: &str) {}
    fn on_member_unbanned(&self, group_id: &str, agent_id: &str) {}
    fn on_meta_updated(&self, group_id: &str, updated_by: &str) {}
    fn on_rules_updated(&self, group_id: &str, updated_by: &str) {}
    fn on_announcement_updated(&self, group_id: &str, updated_by: &str) {}
    fn on_group_dissolved(&self, group_id: &str, dissolved_by: &str, reason: &str) {}
    fn on_master_transferred(&self, group_id: &str, from_agent: &str, to_agent: &str, reason: &str)
    {
    }
    fn on_group_suspended(&self, group_id: &str, suspended_by: &str, reason: &str) {}
    fn on_group_resumed(&self, group_id: &str, resumed_by: &str) {}
    fn on_join_requirements_updated(&self, group_id: &str, updated_by: &str) {}
    fn on_invite_code_created(&self, group_id: &str, code: &str, created_by: &str) {}
    fn on_invite_code_revoked(&self, group_id: &str, code: &str, revoked_by: &str) {}
}

fn str_field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("")
}

fn i64_field(data: &Value, key: &str) -> i64 {
    data.get(key).and_then(Value::as_i64).unwrap_or(0)
}

/// Dispatch a notification to `handler` by notify name. Returns false for
/// unrecognized events.
pub fn dispatch_notify(handler: &dyn GroupEventHandler, notify: &GroupNotify) -> bool {
    let data = notify.data.clone().unwrap_or(Value::Null);
    let gid = notify.group_id.as_str();
    match notify.event.as_str() {
        NOTIFY_NEW_MESSAGE => handler.on_new_message(
            gid,
            i64_field(&data, "latest_msg_id"),
            str_field(&data, "sender"),
            str_field(&data, "preview"),
        ),
        NOTIFY_NEW_EVENT => handler.on_new_event(
            gid,
            i64_field(&data, "latest_event_id"),
            str_field(&data, "event_type"),
            str_field(&data, "summary"),
        ),
        NOTIFY_GROUP_INVITE => handler.on_group_invite(
            gid,
            str_field(&data, "group_address"),
            str_field(&data, "invited_by"),
        ),
        NOTIFY_JOIN_APPROVED => handler.on_join_approved(gid, str_field(&data, "group_address")),
        NOTIFY_JOIN_REJECTED => handler.on_join_rejected(gid, str_field(&data, "reason")),
        NOTIFY_JOIN_REQUEST_RECEIVED => handler.on_join_request_received(
            gid,
            str_field(&data, "agent_id"),
            str_field(&data, "message"),
        ),
        NOTIFY_GROUP_MESSAGE => {
            match serde_json::from_value::<GroupMessage>(data) {
                Ok(msg) => handler.on_group_message(gid, &msg),
                Err(e) => warn!(group_id = gid, error = %e, "bad group_message notify payload"),
            }
        }
        NOTIFY_GROUP_EVENT => match serde_json::from_value::<GroupEvent>(data) {
            Ok(event) => handler.on_group_event(gid, &event),
            Err(e) => warn!(group_id = gid, error = %e, "bad group_event notify payload"),
        },
        other => {
            warn!(group_id = gid, event = other, "unrecognized group notify");
            return false;
        }
    }
    true
}

/// Dispatch a structured event payload to `processor` by event type. Returns
/// false for unrecognized types.
pub fn dispatch_event(processor: &dyn EventProcessor, event: &GroupEvent, group_id: &str) -> bool {
    let data = event.data.clone().unwrap_or(Value::Null);
    let Some(kind) = GroupEventType::parse(&event.event_type) else {
        warn!(group_id, event_type = %event.event_type, "unrecognized group event");
        return false;
    };
    match kind {
        GroupEventType::MemberJoined => processor.on_member_joined(
            group_id,
            str_field(&data, "agent_id"),
            str_field(&data, "role"),
        ),
        GroupEventType::MemberRemoved => processor.on_member_removed(
            group_id,
            str_field(&data, "agent_id"),
            str_field(&data, "reason"),
        ),
        GroupEventType::MemberLeft => processor.on_member_left(
            group_id,
            str_field(&data, "agent_id"),
            str_field(&data, "reason"),
        ),
        GroupEventType::MemberBanned => processor.on_member_banned(
            group_id,
            str_field(&data, "agent_id"),
            str_field(&data, "reason"),
        ),
        GroupEventType::MemberUnbanned => {
            processor.on_member_unbanned(group_id, str_field(&data, "agent_id"))
        }
        GroupEventType::MetaUpdated => {
            processor.on_meta_updated(group_id, str_field(&data, "updated_by"))
        }
        GroupEventType::RulesUpdated => {
            processor.on_rules_updated(group_id, str_field(&data, "updated_by"))
        }
        GroupEventType::AnnouncementUpdated => {
            processor.on_announcement_updated(group_id, str_field(&data, "updated_by"))
        }
        GroupEventType::GroupDissolved => processor.on_group_dissolved(
            group_id,
            str_field(&data, "dissolved_by"),
            str_field(&data, "reason"),
        ),
        GroupEventType::MasterTransferred => processor.on_master_transferred(
            group_id,
            str_field(&data, "from_agent"),
            str_field(&data, "to_agent"),
            str_field(&data, "reason"),
        ),
        GroupEventType::GroupSuspended => processor.on_group_suspended(
            group_id,
            str_field(&data, "suspended_by"),
            str_field(&data, "reason"),
        ),
        GroupEventType::GroupResumed => {
            processor.on_group_resumed(group_id, str_field(&data, "resumed_by"))
        }
        GroupEventType::JoinRequirementsUpdated => {
            processor.on_join_requirements_updated(group_id, str_field(&data, "updated_by"))
        }
        GroupEventType::InviteCodeCreated => processor.on_invite_code_created(
            group_id,
            str_field(&data, "code"),
            str_field(&data, "created_by"),
        ),
        GroupEventType::InviteCodeRevoked => processor.on_invite_code_revoked(
            group_id,
            str_field(&data, "code"),
            str_field(&data, "revoked_by"),
        ),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn record(&self, s: impl Into<String>) {
            self.calls.lock().unwrap().push(s.into());
        }
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut self.calls.lock().unwrap())
        }
    }

    impl GroupEventHandler for Recorder {
        fn on_new_message(&self, group_id: &str, latest: i64, sender: &str, _preview: &str) {
            self.record(format!("new_message:{group_id}:{latest}:{sender}"));
        }
        fn on_group_message(&self, group_id: &str, message: &GroupMessage) {
            self.record(format!("group_message:{group_id}:{}", message.msg_id));
        }
    }

    impl EventProcessor for Recorder {
        fn on_member_joined(&self, group_id: &str, agent_id: &str, role: &str) {
            self.record(format!("member_joined:{group_id}:{agent_id}:{role}"));
        }
        fn on_group_dissolved(&self, group_id: &str, dissolved_by: &str, _reason: &str) {
            self.record(format!("group_dissolved:{group_id}:{dissolved_by}"));
        }
    }

    #[test]
    fn event_type_roundtrip() {
        for name in [
            "member_joined",
            "member_removed",
            "member_left",
            "member_banned",
            "member_unbanned",
            "meta_updated",
            "rules_updated",
            "announcement_updated",
            "group_dissolved",
            "master_transferred",
            "group_suspended",
            "group_resumed",
            "join_requirements_updated",
            "invite_code_created",
            "invite_code_revoked",
        ] {
            assert_eq!(GroupEventType::parse(name).unwrap().as_str(), name);
        }
        assert!(GroupEventType::parse("nope").is_none());
    }

    #[test]
    fn notify_dispatch_by_name() {
        let rec = Recorder::default();
        let notify = GroupNotify {
            group_id: "g1".into(),
            event: NOTIFY_NEW_MESSAGE.into(),
            data: Some(json!({"latest_msg_id": 9, "sender": "a.aid.net"})),
            ..Default::default()
        };
        assert!(dispatch_notify(&rec, &notify));
        assert_eq!(rec.take(), vec!["new_message:g1:9:a.aid.net"]);

        let unknown = GroupNotify {
            event: "mystery".into(),
            ..Default::default()
        };
        assert!(!dispatch_notify(&rec, &unknown));
    }

    #[test]
    fn event_dispatch_by_type() {
        let rec = Recorder::default();
        let event = GroupEvent {
            event_id: 1,
            event_type: "member_joined".into(),
            actor: "admin.aid.net".into(),
            data: Some(json!({"agent_id": "new.aid.net", "role": "member"})),
            ..Default::default()
        };
        assert!(dispatch_event(&rec, &event, "g1"));
        assert_eq!(rec.take(), vec!["member_joined:g1:new.aid.net:member"]);
    }
}
