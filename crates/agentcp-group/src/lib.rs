//! Group protocol layer for AgentCP.
//!
//! A second request/response protocol rides inside `session_message`
//! envelopes: [`client::GroupClient`] correlates responses to requests by
//! id, [`ops::GroupOperations`] wraps the action surface in typed calls, and
//! [`cursor::JsonCursorStore`] persists per-group ack watermarks so
//! [`ops::GroupOperations::sync_group`] can resume incrementally.
//!
//! The layer is transport-agnostic: the owner injects an async send function
//! and feeds inbound payloads to [`client::GroupClient::handle_incoming`].

pub mod client;
pub mod cursor;
pub mod error;
pub mod events;
pub mod ops;
pub mod types;

pub use client::{GroupClient, SendFn, DEFAULT_TIMEOUT_MS};
pub use cursor::{CursorStore, JsonCursorStore};
pub use error::{GroupError, GroupErrorCode};
pub use events::{EventProcessor, GroupEventHandler, GroupEventType};
pub use ops::{GroupOperations, ParsedGroupUrl, SyncHandler};
pub use types::{
    CursorState, EventCursor, GroupEvent, GroupMessage, GroupMessageBatch, GroupNotify,
    GroupRequest, GroupResponse, MsgCursor,
};
