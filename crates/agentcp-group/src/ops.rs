//! Strongly-typed wrappers over the group client.
//!
//! Every method builds the action's params, sends the request, checks the
//! response code and deserializes the `data` payload. Non-zero codes raise
//! [`GroupError::Protocol`]; timeouts stay a distinct kind so callers can
//! back off separately.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::client::GroupClient;
use crate::error::GroupError;
use crate::types::*;

/// Result of [`GroupOperations::parse_group_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedGroupUrl {
    pub target_aid: String,
    pub group_id: String,
}

/// Receiver for [`GroupOperations::sync_group`] deliveries.
pub trait SyncHandler: Send + Sync {
    fn on_messages(&self, group_id: &str, messages: &[GroupMessage]);
    fn on_events(&self, group_id: &str, events: &[GroupEvent]);
}

/// Batch size used by the sync loop.
const SYNC_BATCH: i64 = 50;

/// Typed façade over [`GroupClient`].
pub struct GroupOperations {
    client: Arc<GroupClient>,
}

impl GroupOperations {
    pub fn new(client: Arc<GroupClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<GroupClient> {
        &self.client
    }

    async fn call(
        &self,
        target: &str,
        group_id: &str,
        action: &str,
        params: Option<Value>,
    ) -> Result<GroupResponse, GroupError> {
        let resp = self
            .client
            .send_request(target, group_id, action, params, None)
            .await?;
        if resp.code != 0 {
            return Err(GroupError::protocol(
                action,
                resp.code,
                resp.error.clone(),
                resp.group_id.clone(),
            ));
        }
        Ok(resp)
    }

    fn parse<T: DeserializeOwned>(resp: &GroupResponse, action: &str) -> Result<T, GroupError> {
        serde_json::from_value(resp.data_or_empty()).map_err(|e| GroupError::BadPayload {
            action: action.to_string(),
            message: e.to_string(),
        })
    }

    fn array_field(resp: &GroupResponse, key: &str) -> Vec<Value> {
        resp.data_or_empty()
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    // ---- utility ----

    /// Split a group URL into `(host, first path segment)`, dropping query,
    /// fragment and trailing slashes.
    pub fn parse_group_url(group_url: &str) -> Result<ParsedGroupUrl, GroupError> {
        let rest = group_url
            .split_once("://")
            .ok_or_else(|| GroupError::InvalidUrl(format!("no scheme: {group_url}")))?
            .1;
        let (host, path) = rest
            .split_once('/')
            .ok_or_else(|| GroupError::InvalidUrl(format!("no path: {group_url}")))?;

        let mut path = path;
        if let Some((p, _)) = path.split_once('?') {
            path = p;
        }
        if let Some((p, _)) = path.split_once('#') {
            path = p;
        }
        let path = path.trim_end_matches('/');

        if host.is_empty() || path.is_empty() {
            return Err(GroupError::InvalidUrl(format!(
                "missing target aid or group id: {group_url}"
            )));
        }
        Ok(ParsedGroupUrl {
            target_aid: host.to_string(),
            group_id: path.to_string(),
        })
    }

    /// Join via a group URL. With an invite code the join is immediate;
    /// otherwise a join request is filed for review.
    pub async fn join_by_url(
        &self,
        group_url: &str,
        invite_code: Option<&str>,
        message: Option<&str>,
    ) -> Result<RequestJoinResp, GroupError> {
        let parsed = Self::parse_group_url(group_url)?;
        match invite_code {
            Some(code) if !code.is_empty() => {
                self.use_invite_code(&parsed.target_aid, &parsed.group_id, code)
                    .await?;
                Ok(RequestJoinResp {
                    status: "joined".into(),
                    request_id: String::new(),
                })
            }
            _ => {
                self.request_join(&parsed.target_aid, &parsed.group_id, message.unwrap_or(""))
                    .await
            }
        }
    }

    // ---- lifecycle ----

    pub async fn register_online(&self, target: &str) -> Result<(), GroupError> {
        self.call(target, "", "register_online", None).await?;
        Ok(())
    }

    pub async fn unregister_online(&self, target: &str) -> Result<(), GroupError> {
        self.call(target, "", "unregister_online", None).await?;
        Ok(())
    }

    pub async fn heartbeat(&self, target: &str) -> Result<(), GroupError> {
        self.call(target, "", "heartbeat", None).await?;
        Ok(())
    }

    // ---- basic operations ----

    #[allow(clippy::too_many_arguments)]
    pub async fn create_group(
        &self,
        target: &str,
        name: &str,
        alias: &str,
        subject: &str,
        visibility: &str,
        description: &str,
        tags: &[String],
    ) -> Result<CreateGroupResp, GroupError> {
        let mut params = Map::new();
        params.insert("name".into(), json!(name));
        if !alias.is_empty() {
            params.insert("alias".into(), json!(alias));
        }
        if !subject.is_empty() {
            params.insert("subject".into(), json!(subject));
        }
        if !description.is_empty() {
            params.insert("description".into(), json!(description));
        }
        if !visibility.is_empty() {
            params.insert("visibility".into(), json!(visibility));
        }
        if !tags.is_empty() {
            params.insert("tags".into(), json!(tags));
        }
        let resp = self
            .call(target, "", "create_group", Some(Value::Object(params)))
            .await?;
        info!(name, "group created");
        Self::parse(&resp, "create_group")
    }

    pub async fn add_member(
        &self,
        target: &str,
        group_id: &str,
        agent_id: &str,
        role: &str,
    ) -> Result<(), GroupError> {
        let mut params = Map::new();
        params.insert("agent_id".into(), json!(agent_id));
        if !role.is_empty() {
            params.insert("role".into(), json!(role));
        }
        self.call(target, group_id, "add_member", Some(Value::Object(params)))
            .await?;
        Ok(())
    }

    pub async fn send_group_message(
        &self,
        target: &str,
        group_id: &str,
        content: &str,
        content_type: &str,
        metadata: Option<Value>,
    ) -> Result<SendMessageResp, GroupError> {
        let mut params = Map::new();
        params.insert("content".into(), json!(content));
        if !content_type.is_empty() {
            params.insert("content_type".into(), json!(content_type));
        }
        if let Some(metadata) = metadata {
            params.insert("metadata".into(), metadata);
        }
        let resp = self
            .call(target, group_id, "send_message", Some(Value::Object(params)))
            .await?;
        Self::parse(&resp, "send_message")
    }

    /// Pull messages after `after_msg_id`. Zero selects auto-cursor mode:
    /// the server resumes from its view of the caller's current cursor.
    pub async fn pull_messages(
        &self,
        target: &str,
        group_id: &str,
        after_msg_id: i64,
        limit: i64,
    ) -> Result<PullMessagesResp, GroupError> {
        let mut params = Map::new();
        if after_msg_id > 0 {
            params.insert("after_msg_id".into(), json!(after_msg_id));
        }
        if limit > 0 {
            params.insert("limit".into(), json!(limit));
        }
        let params = (!params.is_empty()).then_some(Value::Object(params));
        let resp = self.call(target, group_id, "pull_messages", params).await?;
        Self::parse(&resp, "pull_messages")
    }

    /// Acknowledge messages up to `msg_id`; on success the local cursor
    /// store is advanced (never rewound).
    pub async fn ack_messages(
        &self,
        target: &str,
        group_id: &str,
        msg_id: i64,
    ) -> Result<(), GroupError> {
        self.call(
            target,
            group_id,
            "ack_messages",
            Some(json!({ "msg_id": msg_id })),
        )
        .await?;
        if let Some(store) = self.client.cursor_store() {
            store.save_msg_cursor(group_id, msg_id);
        }
        Ok(())
    }

    pub async fn pull_events(
        &self,
        target: &str,
        group_id: &str,
        after_event_id: i64,
        limit: i64,
    ) -> Result<PullEventsResp, GroupError> {
        let mut params = Map::new();
        params.insert("after_event_id".into(), json!(after_event_id));
        if limit > 0 {
            params.insert("limit".into(), json!(limit));
        }
        let resp = self
            .call(target, group_id, "pull_events", Some(Value::Object(params)))
            .await?;
        Self::parse(&resp, "pull_events")
    }

    pub async fn ack_events(
        &self,
        target: &str,
        group_id: &str,
        event_id: i64,
    ) -> Result<(), GroupError> {
        self.call(
            target,
            group_id,
            "ack_events",
            Some(json!({ "event_id": event_id })),
        )
        .await?;
        if let Some(store) = self.client.cursor_store() {
            store.save_event_cursor(group_id, event_id);
        }
        Ok(())
    }

    pub async fn get_cursor(&self, target: &str, group_id: &str) -> Result<CursorState, GroupError> {
        let resp = self.call(target, group_id, "get_cursor", None).await?;
        Self::parse(&resp, "get_cursor")
    }

    /// Drain unseen messages and events, acking as it goes.
    ///
    /// The starting point is the server cursor raised to the locally
    /// persisted one, so a retry after a crash resumes from the last
    /// successful ack. Messages and events are drained independently.
    pub async fn sync_group(
        &self,
        target: &str,
        group_id: &str,
        handler: &dyn SyncHandler,
    ) -> Result<(), GroupError> {
        let mut cursor = self.get_cursor(target, group_id).await?;
        if let Some(store) = self.client.cursor_store() {
            let (local_msg, local_event) = store.load_cursor(group_id);
            cursor.msg_cursor.current_msg_id = cursor.msg_cursor.current_msg_id.max(local_msg);
            cursor.event_cursor.current_event_id =
                cursor.event_cursor.current_event_id.max(local_event);
        }
        debug!(
            group_id,
            from_msg = cursor.msg_cursor.current_msg_id,
            from_event = cursor.event_cursor.current_event_id,
            "sync start"
        );

        let mut after = cursor.msg_cursor.current_msg_id;
        loop {
            let page = self
                .pull_messages(target, group_id, after, SYNC_BATCH)
                .await?;
            if let Some(last) = page.messages.last() {
                let last_id = last.msg_id;
                handler.on_messages(group_id, &page.messages);
                self.ack_messages(target, group_id, last_id).await?;
                after = last_id;
            }
            if !page.has_more {
                break;
            }
        }

        let mut after = cursor.event_cursor.current_event_id;
        loop {
            let page = self.pull_events(target, group_id, after, SYNC_BATCH).await?;
            if let Some(last) = page.events.last() {
                let last_id = last.event_id;
                handler.on_events(group_id, &page.events);
                self.ack_events(target, group_id, last_id).await?;
                after = last_id;
            }
            if !page.has_more {
                break;
            }
        }
        Ok(())
    }

    // ---- management ----

    pub async fn remove_member(
        &self,
        target: &str,
        group_id: &str,
        agent_id: &str,
    ) -> Result<(), GroupError> {
        self.call(
            target,
            group_id,
            "remove_member",
            Some(json!({ "agent_id": agent_id })),
        )
        .await?;
        Ok(())
    }

    pub async fn leave_group(&self, target: &str, group_id: &str) -> Result<(), GroupError> {
        self.call(target, group_id, "leave_group", None).await?;
        Ok(())
    }

    pub async fn dissolve_group(&self, target: &str, group_id: &str) -> Result<(), GroupError> {
        self.call(target, group_id, "dissolve_group", None).await?;
        Ok(())
    }

    pub async fn ban_agent(
        &self,
        target: &str,
        group_id: &str,
        agent_id: &str,
        reason: &str,
        expires_at: i64,
    ) -> Result<(), GroupError> {
        let mut params = Map::new();
        params.insert("agent_id".into(), json!(agent_id));
        if !reason.is_empty() {
            params.insert("reason".into(), json!(reason));
        }
        if expires_at > 0 {
            params.insert("expires_at".into(), json!(expires_at));
        }
        self.call(target, group_id, "ban_agent", Some(Value::Object(params)))
            .await?;
        Ok(())
    }

    pub async fn unban_agent(
        &self,
        target: &str,
        group_id: &str,
        agent_id: &str,
    ) -> Result<(), GroupError> {
        self.call(
            target,
            group_id,
            "unban_agent",
            Some(json!({ "agent_id": agent_id })),
        )
        .await?;
        Ok(())
    }

    pub async fn get_banlist(&self, target: &str, group_id: &str) -> Result<Vec<Value>, GroupError> {
        let resp = self.call(target, group_id, "get_banlist", None).await?;
        Ok(Self::array_field(&resp, "banned"))
    }

    pub async fn request_join(
        &self,
        target: &str,
        group_id: &str,
        message: &str,
    ) -> Result<RequestJoinResp, GroupError> {
        let params = (!message.is_empty()).then(|| json!({ "message": message }));
        let resp = self.call(target, group_id, "request_join", params).await?;
        Self::parse(&resp, "request_join")
    }

    pub async fn review_join_request(
        &self,
        target: &str,
        group_id: &str,
        agent_id: &str,
        action: &str,
        reason: &str,
    ) -> Result<(), GroupError> {
        let mut params = Map::new();
        params.insert("agent_id".into(), json!(agent_id));
        params.insert("action".into(), json!(action));
        if !reason.is_empty() {
            params.insert("reason".into(), json!(reason));
        }
        self.call(
            target,
            group_id,
            "review_join_request",
            Some(Value::Object(params)),
        )
        .await?;
        Ok(())
    }

    pub async fn batch_review_join_requests(
        &self,
        target: &str,
        group_id: &str,
        agent_ids: &[String],
        action: &str,
        reason: &str,
    ) -> Result<BatchReviewResp, GroupError> {
        let mut params = Map::new();
        params.insert("agent_ids".into(), json!(agent_ids));
        params.insert("action".into(), json!(action));
        if !reason.is_empty() {
            params.insert("reason".into(), json!(reason));
        }
        let resp = self
            .call(
                target,
                group_id,
                "batch_review_join_requests",
                Some(Value::Object(params)),
            )
            .await?;
        Self::parse(&resp, "batch_review_join_requests")
    }

    pub async fn get_pending_requests(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<Vec<Value>, GroupError> {
        let resp = self
            .call(target, group_id, "get_pending_requests", None)
            .await?;
        Ok(Self::array_field(&resp, "requests"))
    }

    // ---- info & meta ----

    pub async fn get_group_info(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<GroupInfoResp, GroupError> {
        let resp = self.call(target, group_id, "get_group_info", None).await?;
        Self::parse(&resp, "get_group_info")
    }

    pub async fn update_group_meta(
        &self,
        target: &str,
        group_id: &str,
        meta: Value,
    ) -> Result<(), GroupError> {
        self.call(target, group_id, "update_group_meta", Some(meta))
            .await?;
        Ok(())
    }

    pub async fn get_members(&self, target: &str, group_id: &str) -> Result<Vec<Value>, GroupError> {
        let resp = self.call(target, group_id, "get_members", None).await?;
        Ok(Self::array_field(&resp, "members"))
    }

    pub async fn get_admins(&self, target: &str, group_id: &str) -> Result<Vec<Value>, GroupError> {
        let resp = self.call(target, group_id, "get_admins", None).await?;
        Ok(Self::array_field(&resp, "admins"))
    }

    pub async fn get_rules(&self, target: &str, group_id: &str) -> Result<RulesResp, GroupError> {
        let resp = self.call(target, group_id, "get_rules", None).await?;
        Self::parse(&resp, "get_rules")
    }

    pub async fn update_rules(
        &self,
        target: &str,
        group_id: &str,
        rules: Value,
    ) -> Result<(), GroupError> {
        self.call(target, group_id, "update_rules", Some(rules))
            .await?;
        Ok(())
    }

    pub async fn get_announcement(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<AnnouncementResp, GroupError> {
        let resp = self.call(target, group_id, "get_announcement", None).await?;
        Self::parse(&resp, "get_announcement")
    }

    pub async fn update_announcement(
        &self,
        target: &str,
        group_id: &str,
        content: &str,
    ) -> Result<(), GroupError> {
        self.call(
            target,
            group_id,
            "update_announcement",
            Some(json!({ "content": content })),
        )
        .await?;
        Ok(())
    }

    pub async fn get_join_requirements(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<JoinRequirementsResp, GroupError> {
        let resp = self
            .call(target, group_id, "get_join_requirements", None)
            .await?;
        Self::parse(&resp, "get_join_requirements")
    }

    pub async fn update_join_requirements(
        &self,
        target: &str,
        group_id: &str,
        requirements: Value,
    ) -> Result<(), GroupError> {
        self.call(
            target,
            group_id,
            "update_join_requirements",
            Some(requirements),
        )
        .await?;
        Ok(())
    }

    pub async fn suspend_group(&self, target: &str, group_id: &str) -> Result<(), GroupError> {
        self.call(target, group_id, "suspend_group", None).await?;
        Ok(())
    }

    pub async fn resume_group(&self, target: &str, group_id: &str) -> Result<(), GroupError> {
        self.call(target, group_id, "resume_group", None).await?;
        Ok(())
    }

    pub async fn transfer_master(
        &self,
        target: &str,
        group_id: &str,
        new_master_aid: &str,
        reason: &str,
    ) -> Result<(), GroupError> {
        let mut params = Map::new();
        params.insert("new_master_aid".into(), json!(new_master_aid));
        if !reason.is_empty() {
            params.insert("reason".into(), json!(reason));
        }
        self.call(
            target,
            group_id,
            "transfer_master",
            Some(Value::Object(params)),
        )
        .await?;
        Ok(())
    }

    pub async fn get_master(&self, target: &str, group_id: &str) -> Result<MasterResp, GroupError> {
        let resp = self.call(target, group_id, "get_master", None).await?;
        Self::parse(&resp, "get_master")
    }

    // ---- invite codes ----

    pub async fn create_invite_code(
        &self,
        target: &str,
        group_id: &str,
        label: &str,
        max_uses: i64,
        expires_at: i64,
    ) -> Result<InviteCodeResp, GroupError> {
        let mut params = Map::new();
        if !label.is_empty() {
            params.insert("label".into(), json!(label));
        }
        if max_uses > 0 {
            params.insert("max_uses".into(), json!(max_uses));
        }
        if expires_at > 0 {
            params.insert("expires_at".into(), json!(expires_at));
        }
        let params = (!params.is_empty()).then_some(Value::Object(params));
        let resp = self
            .call(target, group_id, "create_invite_code", params)
            .await?;
        Self::parse(&resp, "create_invite_code")
    }

    pub async fn use_invite_code(
        &self,
        target: &str,
        group_id: &str,
        code: &str,
    ) -> Result<(), GroupError> {
        self.call(
            target,
            group_id,
            "use_invite_code",
            Some(json!({ "code": code })),
        )
        .await?;
        Ok(())
    }

    pub async fn list_invite_codes(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<Vec<Value>, GroupError> {
        let resp = self.call(target, group_id, "list_invite_codes", None).await?;
        Ok(Self::array_field(&resp, "codes"))
    }

    pub async fn revoke_invite_code(
        &self,
        target: &str,
        group_id: &str,
        code: &str,
    ) -> Result<(), GroupError> {
        self.call(
            target,
            group_id,
            "revoke_invite_code",
            Some(json!({ "code": code })),
        )
        .await?;
        Ok(())
    }

    // ---- broadcast lock ----

    pub async fn acquire_broadcast_lock(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<BroadcastLockResp, GroupError> {
        let resp = self
            .call(target, group_id, "acquire_broadcast_lock", None)
            .await?;
        Self::parse(&resp, "acquire_broadcast_lock")
    }

    pub async fn release_broadcast_lock(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<(), GroupError> {
        self.call(target, group_id, "release_broadcast_lock", None)
            .await?;
        Ok(())
    }

    pub async fn check_broadcast_permission(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<BroadcastPermissionResp, GroupError> {
        let resp = self
            .call(target, group_id, "check_broadcast_permission", None)
            .await?;
        Self::parse(&resp, "check_broadcast_permission")
    }

    // ---- duty ----

    pub async fn update_duty_config(
        &self,
        target: &str,
        group_id: &str,
        duty_config: Value,
    ) -> Result<(), GroupError> {
        self.call(
            target,
            group_id,
            "update_duty_config",
            Some(json!({ "duty_config": duty_config })),
        )
        .await?;
        Ok(())
    }

    pub async fn set_fixed_agents(
        &self,
        target: &str,
        group_id: &str,
        agents: &[String],
    ) -> Result<(), GroupError> {
        self.call(
            target,
            group_id,
            "set_fixed_agents",
            Some(json!({ "agents": agents })),
        )
        .await?;
        Ok(())
    }

    pub async fn get_duty_status(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<DutyStatusResp, GroupError> {
        let resp = self.call(target, group_id, "get_duty_status", None).await?;
        Self::parse(&resp, "get_duty_status")
    }

    pub async fn refresh_member_types(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<(), GroupError> {
        self.call(target, group_id, "refresh_member_types", None)
            .await?;
        Ok(())
    }

    // ---- sync diagnostics ----

    pub async fn get_sync_status(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<SyncStatusResp, GroupError> {
        let resp = self.call(target, group_id, "get_sync_status", None).await?;
        Self::parse(&resp, "get_sync_status")
    }

    pub async fn get_sync_log(
        &self,
        target: &str,
        group_id: &str,
        start_date: &str,
    ) -> Result<Vec<Value>, GroupError> {
        let resp = self
            .call(
                target,
                group_id,
                "get_sync_log",
                Some(json!({ "start_date": start_date })),
            )
            .await?;
        Ok(Self::array_field(&resp, "entries"))
    }

    pub async fn get_checksum(
        &self,
        target: &str,
        group_id: &str,
        file: &str,
    ) -> Result<ChecksumResp, GroupError> {
        let resp = self
            .call(target, group_id, "get_checksum", Some(json!({ "file": file })))
            .await?;
        Self::parse(&resp, "get_checksum")
    }

    pub async fn get_message_checksum(
        &self,
        target: &str,
        group_id: &str,
        date: &str,
    ) -> Result<ChecksumResp, GroupError> {
        let resp = self
            .call(
                target,
                group_id,
                "get_message_checksum",
                Some(json!({ "date": date })),
            )
            .await?;
        Self::parse(&resp, "get_message_checksum")
    }

    // ---- discovery ----

    pub async fn get_public_info(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<PublicGroupInfoResp, GroupError> {
        let resp = self.call(target, group_id, "get_public_info", None).await?;
        Self::parse(&resp, "get_public_info")
    }

    pub async fn search_groups(
        &self,
        target: &str,
        keyword: &str,
        tags: &[String],
        limit: i64,
        offset: i64,
    ) -> Result<SearchGroupsResp, GroupError> {
        let mut params = Map::new();
        params.insert("keyword".into(), json!(keyword));
        if !tags.is_empty() {
            params.insert("tags".into(), json!(tags));
        }
        if limit > 0 {
            params.insert("limit".into(), json!(limit));
        }
        if offset > 0 {
            params.insert("offset".into(), json!(offset));
        }
        let resp = self
            .call(target, "", "search_groups", Some(Value::Object(params)))
            .await?;
        Self::parse(&resp, "search_groups")
    }

    // ---- digests ----

    pub async fn generate_digest(
        &self,
        target: &str,
        group_id: &str,
        date: &str,
        period: &str,
    ) -> Result<DigestResp, GroupError> {
        let resp = self
            .call(
                target,
                group_id,
                "generate_digest",
                Some(json!({ "date": date, "period": period })),
            )
            .await?;
        Self::parse(&resp, "generate_digest")
    }

    pub async fn get_digest(
        &self,
        target: &str,
        group_id: &str,
        date: &str,
        period: &str,
    ) -> Result<DigestResp, GroupError> {
        let resp = self
            .call(
                target,
                group_id,
                "get_digest",
                Some(json!({ "date": date, "period": period })),
            )
            .await?;
        Self::parse(&resp, "get_digest")
    }

    // ---- membership index ----

    pub async fn list_my_groups(
        &self,
        target: &str,
        status: i64,
    ) -> Result<ListMyGroupsResp, GroupError> {
        let params = (status != 0).then(|| json!({ "status": status }));
        let resp = self.call(target, "", "list_my_groups", params).await?;
        Self::parse(&resp, "list_my_groups")
    }

    pub async fn unregister_membership(
        &self,
        target: &str,
        group_id: &str,
    ) -> Result<(), GroupError> {
        self.call(target, group_id, "unregister_membership", None)
            .await?;
        Ok(())
    }

    pub async fn change_member_role(
        &self,
        target: &str,
        group_id: &str,
        agent_id: &str,
        new_role: &str,
    ) -> Result<(), GroupError> {
        self.call(
            target,
            group_id,
            "change_member_role",
            Some(json!({ "agent_id": agent_id, "new_role": new_role })),
        )
        .await?;
        Ok(())
    }

    // ---- files & stats ----

    pub async fn get_file(
        &self,
        target: &str,
        group_id: &str,
        file: &str,
        offset: i64,
    ) -> Result<GetFileResp, GroupError> {
        let mut params = Map::new();
        params.insert("file".into(), json!(file));
        if offset > 0 {
            params.insert("offset".into(), json!(offset));
        }
        let resp = self
            .call(target, group_id, "get_file", Some(Value::Object(params)))
            .await?;
        Self::parse(&resp, "get_file")
    }

    pub async fn get_summary(
        &self,
        target: &str,
        group_id: &str,
        date: &str,
    ) -> Result<GetSummaryResp, GroupError> {
        let resp = self
            .call(target, group_id, "get_summary", Some(json!({ "date": date })))
            .await?;
        Self::parse(&resp, "get_summary")
    }

    pub async fn get_metrics(&self, target: &str) -> Result<GetMetricsResp, GroupError> {
        let resp = self.call(target, "", "get_metrics", None).await?;
        Self::parse(&resp, "get_metrics")
    }
}
