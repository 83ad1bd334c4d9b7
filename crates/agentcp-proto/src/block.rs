//! Message content blocks.
//!
//! A session message carries an ordered sequence of [`Block`]s. On the wire
//! each block is a JSON object tagged by `type`; here it is a proper sum
//! type so a match over variants is checked at compile time.

use serde::{Deserialize, Serialize};

fn default_status() -> String {
    "success".to_string()
}

/// One content block of a session message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Content {
        content: String,
        #[serde(default)]
        timestamp: i64,
        #[serde(default = "default_status")]
        status: String,
    },
    File {
        #[serde(default)]
        url: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        size: u64,
        #[serde(default)]
        mime: String,
        #[serde(default)]
        md5: String,
        #[serde(default)]
        timestamp: i64,
        #[serde(default = "default_status")]
        status: String,
    },
    Image {
        #[serde(default)]
        url: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        timestamp: i64,
        #[serde(default = "default_status")]
        status: String,
    },
    Audio {
        #[serde(default)]
        url: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        timestamp: i64,
        #[serde(default = "default_status")]
        status: String,
    },
    Video {
        #[serde(default)]
        url: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        timestamp: i64,
        #[serde(default = "default_status")]
        status: String,
    },
    Form {
        #[serde(default)]
        content: String,
        #[serde(default)]
        timestamp: i64,
        #[serde(default = "default_status")]
        status: String,
    },
    FormResult {
        #[serde(default)]
        content: String,
        #[serde(default)]
        timestamp: i64,
        #[serde(default = "default_status")]
        status: String,
    },
    Instruction {
        #[serde(default)]
        content: String,
        #[serde(default)]
        timestamp: i64,
        #[serde(default = "default_status")]
        status: String,
    },
}

impl Block {
    /// Plain text block with the given content, timestamp filled by the
    /// sender at encode time when left at zero.
    pub fn text(content: impl Into<String>) -> Self {
        Block::Content {
            content: content.into(),
            timestamp: 0,
            status: default_status(),
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Block::Content { timestamp, .. }
            | Block::File { timestamp, .. }
            | Block::Image { timestamp, .. }
            | Block::Audio { timestamp, .. }
            | Block::Video { timestamp, .. }
            | Block::Form { timestamp, .. }
            | Block::FormResult { timestamp, .. }
            | Block::Instruction { timestamp, .. } => *timestamp,
        }
    }

    /// Stamp a zero timestamp with `now_ms`.
    pub fn with_default_timestamp(mut self, now_ms: i64) -> Self {
        let ts = match &mut self {
            Block::Content { timestamp, .. }
            | Block::File { timestamp, .. }
            | Block::Image { timestamp, .. }
            | Block::Audio { timestamp, .. }
            | Block::Video { timestamp, .. }
            | Block::Form { timestamp, .. }
            | Block::FormResult { timestamp, .. }
            | Block::Instruction { timestamp, .. } => timestamp,
        };
        if *ts == 0 {
            *ts = now_ms;
        }
        self
    }
}

/// An instruction rider on a session message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub cmd: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub params: std::collections::BTreeMap<String, String>,
}

/// A fully parsed session message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub session_id: String,
    pub sender: String,
    pub receiver: String,
    #[serde(default)]
    pub ref_msg_id: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<Instruction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_serializes_with_type_tag() {
        let block = Block::text("hello");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["content"], "hello");
        assert_eq!(json["status"], "success");
    }

    #[test]
    fn block_roundtrip_all_variants() {
        let blocks = vec![
            Block::text("hi"),
            Block::File {
                url: "https://files/x".into(),
                name: "x.bin".into(),
                size: 42,
                mime: "application/octet-stream".into(),
                md5: "d41d8cd9".into(),
                timestamp: 5,
                status: "success".into(),
            },
            Block::Form {
                content: "{}".into(),
                timestamp: 1,
                status: "success".into(),
            },
            Block::FormResult {
                content: "{}".into(),
                timestamp: 2,
                status: "success".into(),
            },
        ];
        let json = serde_json::to_string(&blocks).unwrap();
        let parsed: Vec<Block> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, blocks);
        assert!(json.contains(r#""type":"form_result""#));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let parsed: Block =
            serde_json::from_str(r#"{"type":"content","content":"x","extra":true}"#).unwrap();
        assert_eq!(parsed, Block::text("x"));
    }

    #[test]
    fn default_timestamp_only_fills_zero() {
        let b = Block::text("a").with_default_timestamp(99);
        assert_eq!(b.timestamp(), 99);
        let b = b.with_default_timestamp(123);
        assert_eq!(b.timestamp(), 99);
    }
}
