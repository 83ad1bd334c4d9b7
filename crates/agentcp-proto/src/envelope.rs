//! The `{cmd, data}` JSON envelope spoken over the session WebSocket, the
//! session command builders, and the URL-encoding applied to block payloads.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::block::{Block, Instruction};

/// Every session-layer frame is an envelope of this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub cmd: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(cmd: impl Into<String>, data: Value) -> Self {
        Self {
            cmd: cmd.into(),
            data,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let env: Envelope = serde_json::from_str(raw).ok()?;
        if env.cmd.is_empty() {
            return None;
        }
        Some(env)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serializes")
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// 32 lowercase hex chars, no dashes.
pub fn new_uuid_hex() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Percent-encode everything outside the unreserved set.
pub fn url_encode(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => {
                out.push('%');
                out.push(HEX[(b >> 4) as usize] as char);
                out.push(HEX[(b & 0x0F) as usize] as char);
            }
        }
    }
    out
}

/// Reverse of [`url_encode`]; `+` decodes to a space, malformed escapes pass
/// through untouched.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16);
                let lo = (bytes[i + 2] as char).to_digit(16);
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    out.push((hi as u8) << 4 | lo as u8);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Build a `session_message` envelope. The block array is serialized and
/// URL-encoded into the `message` field.
#[allow(clippy::too_many_arguments)]
pub fn session_message(
    message_id: &str,
    session_id: &str,
    sender: &str,
    receiver: &str,
    blocks: &[Block],
    ref_msg_id: &str,
    instruction: Option<&Instruction>,
    timestamp: u64,
) -> Envelope {
    let timestamp = if timestamp == 0 { now_ms() } else { timestamp };
    let blocks_json = serde_json::to_string(blocks).expect("blocks serialize");
    Envelope::new(
        "session_message",
        json!({
            "message_id": message_id,
            "session_id": session_id,
            "sender": sender,
            "receiver": receiver,
            "message": url_encode(&blocks_json),
            "ref_msg_id": ref_msg_id,
            "timestamp": timestamp.to_string(),
            "instruction": instruction.map(|i| serde_json::to_value(i).expect("instruction")),
        }),
    )
}

/// Build a `session_message` whose `message` field is a raw string with no
/// URL encoding. Group protocol payloads travel this way.
pub fn raw_session_message(
    message_id: &str,
    session_id: &str,
    sender: &str,
    receiver: &str,
    payload: &str,
) -> Envelope {
    Envelope::new(
        "session_message",
        json!({
            "message_id": message_id,
            "session_id": session_id,
            "ref_msg_id": "",
            "sender": sender,
            "receiver": receiver,
            "message": payload,
            "timestamp": now_ms().to_string(),
        }),
    )
}

pub fn create_session_req(request_id: &str, session_type: &str) -> Envelope {
    Envelope::new(
        "create_session_req",
        json!({
            "request_id": request_id,
            "type": session_type,
            "group_name": "",
            "subject": "",
            "timestamp": now_ms().to_string(),
        }),
    )
}

pub fn join_session_req(
    session_id: &str,
    request_id: &str,
    inviter_agent_id: &str,
    invite_code: &str,
) -> Envelope {
    Envelope::new(
        "join_session_req",
        json!({
            "session_id": session_id,
            "request_id": request_id,
            "inviter_agent_id": inviter_agent_id,
            "invite_code": invite_code,
            "last_msg_id": "0",
        }),
    )
}

pub fn leave_session_req(session_id: &str, request_id: &str) -> Envelope {
    Envelope::new(
        "leave_session_req",
        json!({ "session_id": session_id, "request_id": request_id }),
    )
}

pub fn close_session_req(session_id: &str, request_id: &str, identifying_code: &str) -> Envelope {
    Envelope::new(
        "close_session_req",
        json!({
            "session_id": session_id,
            "request_id": request_id,
            "identifying_code": identifying_code,
        }),
    )
}

pub fn invite_agent_req(
    session_id: &str,
    request_id: &str,
    inviter_id: &str,
    acceptor_id: &str,
    invite_code: &str,
) -> Envelope {
    Envelope::new(
        "invite_agent_req",
        json!({
            "session_id": session_id,
            "request_id": request_id,
            "inviter_id": inviter_id,
            "acceptor_id": acceptor_id,
            "invite_code": invite_code,
        }),
    )
}

pub fn eject_agent_req(
    session_id: &str,
    request_id: &str,
    eject_agent_id: &str,
    identifying_code: &str,
) -> Envelope {
    Envelope::new(
        "eject_agent_req",
        json!({
            "session_id": session_id,
            "request_id": request_id,
            "eject_agent_id": eject_agent_id,
            "identifying_code": identifying_code,
        }),
    )
}

pub fn get_member_list_req(session_id: &str, request_id: &str) -> Envelope {
    Envelope::new(
        "get_member_list",
        json!({ "session_id": session_id, "request_id": request_id }),
    )
}

pub fn create_stream_req(
    session_id: &str,
    request_id: &str,
    ref_msg_id: &str,
    sender: &str,
    receiver: &str,
    content_type: &str,
) -> Envelope {
    Envelope::new(
        "session_create_stream_req",
        json!({
            "session_id": session_id,
            "request_id": request_id,
            "ref_msg_id": ref_msg_id,
            "sender": sender,
            "receiver": receiver,
            "content_type": content_type,
            "timestamp": now_ms().to_string(),
        }),
    )
}

pub fn push_text_stream_req(chunk: &str) -> Envelope {
    Envelope::new("push_text_stream_req", json!({ "chunk": url_encode(chunk) }))
}

pub fn close_stream_req() -> Envelope {
    Envelope::new("close_stream_req", json!({}))
}

/// Ack for `create_session_req`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionAck {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub identifying_code: String,
    #[serde(default, deserialize_with = "string_or_int")]
    pub status_code: String,
    #[serde(default)]
    pub message: String,
}

/// Ack for `invite_agent_req`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InviteAgentAck {
    #[serde(default)]
    pub request_id: String,
    #[serde(default, deserialize_with = "string_or_int")]
    pub status_code: String,
    #[serde(default)]
    pub message: String,
}

/// Ack for `session_create_stream_req`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateStreamAck {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub push_url: String,
    #[serde(default)]
    pub pull_url: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub error: String,
    #[serde(default, rename = "message")]
    pub error_message: String,
}

/// Some servers send numeric status codes, some strings.
fn string_or_int<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Decode the `message` field of an inbound `session_message` into blocks.
pub fn decode_blocks(encoded: &str) -> Option<Vec<Block>> {
    serde_json::from_str(&url_decode(encoded)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope::new("create_session_req", json!({"request_id": "r1"}));
        let parsed = Envelope::parse(&env.to_json()).unwrap();
        assert_eq!(parsed.cmd, "create_session_req");
        assert_eq!(parsed.data["request_id"], "r1");
    }

    #[test]
    fn parse_rejects_missing_cmd() {
        assert!(Envelope::parse(r#"{"data":{}}"#).is_none());
        assert!(Envelope::parse("not json").is_none());
    }

    #[test]
    fn url_codec_roundtrip() {
        let s = "a b+c/δ?=&#%";
        assert_eq!(url_decode(&url_encode(s)), s);
        assert_eq!(url_encode("a b"), "a%20b");
        assert_eq!(url_decode("a+b"), "a b");
        // Malformed escapes pass through.
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%zz"), "%zz");
    }

    #[test]
    fn session_message_encodes_blocks() {
        let blocks = vec![Block::text("hello world").with_default_timestamp(5)];
        let env = session_message("m1", "s1", "alice.aid.net", "bob.aid.net", &blocks, "", None, 1);
        assert_eq!(env.cmd, "session_message");
        let encoded = env.data["message"].as_str().unwrap();
        assert!(!encoded.contains('"'), "must be URL-encoded: {encoded}");
        assert_eq!(decode_blocks(encoded).unwrap(), blocks);
        assert_eq!(env.data["timestamp"], "1");
        assert!(env.data["instruction"].is_null());
    }

    #[test]
    fn raw_session_message_is_not_encoded() {
        let payload = r#"{"action":"heartbeat","request_id":"a-1-1"}"#;
        let env = raw_session_message("m1", "s1", "alice.aid.net", "group.aid.net", payload);
        assert_eq!(env.data["message"].as_str().unwrap(), payload);
    }

    #[test]
    fn status_code_accepts_string_or_int() {
        let ack: CreateSessionAck =
            serde_json::from_value(json!({"session_id": "s", "status_code": 200})).unwrap();
        assert_eq!(ack.status_code, "200");
        let ack: CreateSessionAck =
            serde_json::from_value(json!({"session_id": "s", "status_code": "ok"})).unwrap();
        assert_eq!(ack.status_code, "ok");
    }

    #[test]
    fn stream_envelopes() {
        let env = create_stream_req("s1", "r1", "", "alice.aid.net", "bob.aid.net", "text/plain");
        assert_eq!(env.cmd, "session_create_stream_req");
        assert_eq!(env.data["content_type"], "text/plain");

        let env = push_text_stream_req("chunk with spaces");
        assert_eq!(env.data["chunk"], "chunk%20with%20spaces");
        assert_eq!(close_stream_req().cmd, "close_stream_req");

        let ack: CreateStreamAck = serde_json::from_value(json!({
            "request_id": "r1",
            "push_url": "wss://msg.aid.net/stream/1",
            "message": "stream refused",
            "error": "busy",
        }))
        .unwrap();
        assert_eq!(ack.error, "busy");
        assert_eq!(ack.error_message, "stream refused");
    }

    #[test]
    fn uuid_hex_shape() {
        let id = new_uuid_hex();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
