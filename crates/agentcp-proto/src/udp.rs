//! Codec for the heartbeat channel's UDP datagrams.
//!
//! Every datagram opens with a varint message mask, a varint sequence, a
//! big-endian u16 message type and a big-endian u16 payload size, followed by
//! a type-specific body. Strings are varint-length-prefixed UTF-8; 64-bit
//! integers are big-endian.

use thiserror::Error;

/// Heartbeat request, client → server.
pub const MSG_TYPE_HEARTBEAT_REQ: u16 = 513;
/// Heartbeat response, server → client.
pub const MSG_TYPE_HEARTBEAT_RESP: u16 = 258;
/// Invite request, server → client.
pub const MSG_TYPE_INVITE_REQ: u16 = 259;
/// Invite response, client → server.
pub const MSG_TYPE_INVITE_RESP: u16 = 516;

/// `next_beat` sentinel telling the client to re-authenticate.
pub const NEXT_BEAT_REAUTH: u64 = 401;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UdpCodecError {
    #[error("datagram truncated at offset {0}")]
    Truncated(usize),
    #[error("varint longer than 10 bytes")]
    VarintOverflow,
    #[error("string is not valid utf-8")]
    BadUtf8,
}

/// Encode a u64 as a protobuf-style varint (7-bit little-endian groups).
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decode a varint, returning the value and the number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize), UdpCodecError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &b) in data.iter().take(10).enumerate() {
        value |= u64::from(b & 0x7F) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if data.len() < 10 {
        Err(UdpCodecError::Truncated(data.len()))
    } else {
        Err(UdpCodecError::VarintOverflow)
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    encode_varint(s.len() as u64, buf);
    buf.extend_from_slice(s.as_bytes());
}

fn read_string(data: &[u8], offset: &mut usize) -> Result<String, UdpCodecError> {
    let (len, n) = decode_varint(&data[*offset..])?;
    *offset += n;
    let end = *offset + len as usize;
    if end > data.len() {
        return Err(UdpCodecError::Truncated(*offset));
    }
    let s = std::str::from_utf8(&data[*offset..end]).map_err(|_| UdpCodecError::BadUtf8)?;
    *offset = end;
    Ok(s.to_string())
}

fn read_u64(data: &[u8], offset: &mut usize) -> Result<u64, UdpCodecError> {
    let end = *offset + 8;
    if end > data.len() {
        return Err(UdpCodecError::Truncated(*offset));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[*offset..end]);
    *offset = end;
    Ok(u64::from_be_bytes(bytes))
}

/// Common datagram header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdpHeader {
    pub message_mask: u64,
    pub message_seq: u64,
    pub message_type: u16,
    pub payload_size: u16,
}

impl UdpHeader {
    pub fn new(message_type: u16, message_seq: u64, payload_size: u16) -> Self {
        Self {
            message_mask: 0,
            message_seq,
            message_type,
            payload_size,
        }
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        encode_varint(self.message_mask, buf);
        encode_varint(self.message_seq, buf);
        buf.extend_from_slice(&self.message_type.to_be_bytes());
        buf.extend_from_slice(&self.payload_size.to_be_bytes());
    }

    pub fn read(data: &[u8], offset: &mut usize) -> Result<Self, UdpCodecError> {
        let (message_mask, n) = decode_varint(&data[*offset..])?;
        *offset += n;
        let (message_seq, n) = decode_varint(&data[*offset..])?;
        *offset += n;
        if *offset + 4 > data.len() {
            return Err(UdpCodecError::Truncated(*offset));
        }
        let message_type = u16::from_be_bytes([data[*offset], data[*offset + 1]]);
        let payload_size = u16::from_be_bytes([data[*offset + 2], data[*offset + 3]]);
        *offset += 4;
        Ok(Self {
            message_mask,
            message_seq,
            message_type,
            payload_size,
        })
    }
}

/// Heartbeat request (type 513), client → server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub header: UdpHeader,
    pub agent_id: String,
    pub sign_cookie: u64,
}

impl HeartbeatRequest {
    pub fn new(agent_id: impl Into<String>, sign_cookie: u64, seq: u64) -> Self {
        Self {
            header: UdpHeader::new(MSG_TYPE_HEARTBEAT_REQ, seq, 100),
            agent_id: agent_id.into(),
            sign_cookie,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.agent_id.len() + 24);
        self.header.write(&mut buf);
        write_string(&mut buf, &self.agent_id);
        buf.extend_from_slice(&self.sign_cookie.to_be_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, UdpCodecError> {
        let mut offset = 0;
        let header = UdpHeader::read(data, &mut offset)?;
        let agent_id = read_string(data, &mut offset)?;
        let sign_cookie = read_u64(data, &mut offset)?;
        Ok(Self {
            header,
            agent_id,
            sign_cookie,
        })
    }
}

/// Heartbeat response (type 258), server → client. `next_beat` is the next
/// interval in milliseconds, or [`NEXT_BEAT_REAUTH`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub header: UdpHeader,
    pub next_beat: u64,
}

impl HeartbeatResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        self.header.write(&mut buf);
        buf.extend_from_slice(&self.next_beat.to_be_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, UdpCodecError> {
        let mut offset = 0;
        let header = UdpHeader::read(data, &mut offset)?;
        let next_beat = read_u64(data, &mut offset)?;
        Ok(Self { header, next_beat })
    }
}

/// Invite request (type 259), server → client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteRequest {
    pub header: UdpHeader,
    pub inviter_agent_id: String,
    pub invite_code: String,
    pub invite_code_expire: i64,
    pub session_id: String,
    pub message_server: String,
}

impl InviteRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.header.write(&mut buf);
        write_string(&mut buf, &self.inviter_agent_id);
        write_string(&mut buf, &self.invite_code);
        buf.extend_from_slice(&self.invite_code_expire.to_be_bytes());
        write_string(&mut buf, &self.session_id);
        write_string(&mut buf, &self.message_server);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, UdpCodecError> {
        let mut offset = 0;
        let header = UdpHeader::read(data, &mut offset)?;
        let inviter_agent_id = read_string(data, &mut offset)?;
        let invite_code = read_string(data, &mut offset)?;
        let invite_code_expire = read_u64(data, &mut offset)? as i64;
        let session_id = read_string(data, &mut offset)?;
        let message_server = read_string(data, &mut offset)?;
        Ok(Self {
            header,
            inviter_agent_id,
            invite_code,
            invite_code_expire,
            session_id,
            message_server,
        })
    }
}

/// Invite response (type 516), client → server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteResponse {
    pub header: UdpHeader,
    pub agent_id: String,
    pub inviter_agent_id: String,
    pub session_id: String,
    pub sign_cookie: u64,
}

impl InviteResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.header.write(&mut buf);
        write_string(&mut buf, &self.agent_id);
        write_string(&mut buf, &self.inviter_agent_id);
        write_string(&mut buf, &self.session_id);
        buf.extend_from_slice(&self.sign_cookie.to_be_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, UdpCodecError> {
        let mut offset = 0;
        let header = UdpHeader::read(data, &mut offset)?;
        let agent_id = read_string(data, &mut offset)?;
        let inviter_agent_id = read_string(data, &mut offset)?;
        let session_id = read_string(data, &mut offset)?;
        let sign_cookie = read_u64(data, &mut offset)?;
        Ok(Self {
            header,
            agent_id,
            inviter_agent_id,
            session_id,
            sign_cookie,
        })
    }
}

/// An inbound datagram dispatched by message type. Unknown types decode to
/// [`UdpMessage::Unknown`] and are ignored by callers.
#[derive(Debug, Clone)]
pub enum UdpMessage {
    HeartbeatResponse(HeartbeatResponse),
    InviteRequest(InviteRequest),
    Unknown(u16),
}

impl UdpMessage {
    pub fn decode(data: &[u8]) -> Result<Self, UdpCodecError> {
        let mut offset = 0;
        let header = UdpHeader::read(data, &mut offset)?;
        match header.message_type {
            MSG_TYPE_HEARTBEAT_RESP => {
                Ok(Self::HeartbeatResponse(HeartbeatResponse::decode(data)?))
            }
            MSG_TYPE_INVITE_REQ => Ok(Self::InviteRequest(InviteRequest::decode(data)?)),
            other => Ok(Self::Unknown(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip() {
        for v in [
            0u64,
            1,
            0x7F,
            0x80,
            0x3FFF,
            0x4000,
            300,
            u32::MAX as u64,
            u64::MAX,
        ] {
            let mut buf = Vec::new();
            encode_varint(v, &mut buf);
            let (decoded, len) = decode_varint(&buf).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(len, buf.len());
        }
    }

    #[test]
    fn varint_truncated() {
        assert!(decode_varint(&[0x80]).is_err());
        assert!(decode_varint(&[]).is_err());
    }

    #[test]
    fn heartbeat_request_roundtrip() {
        let req = HeartbeatRequest::new("alice.aid.net", 0xDEAD_BEEF_CAFE, 42);
        let decoded = HeartbeatRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(decoded.header.message_type, MSG_TYPE_HEARTBEAT_REQ);
        assert_eq!(decoded.header.message_seq, 42);
    }

    #[test]
    fn heartbeat_response_roundtrip() {
        let resp = HeartbeatResponse {
            header: UdpHeader::new(MSG_TYPE_HEARTBEAT_RESP, 7, 8),
            next_beat: 15_000,
        };
        let decoded = HeartbeatResponse::decode(&resp.encode()).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn invite_roundtrip() {
        let req = InviteRequest {
            header: UdpHeader::new(MSG_TYPE_INVITE_REQ, 3, 0),
            inviter_agent_id: "bob.aid.net".into(),
            invite_code: "c0de".into(),
            invite_code_expire: -1,
            session_id: "sess-99".into(),
            message_server: "https://msg.aid.net".into(),
        };
        let decoded = InviteRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);

        let resp = InviteResponse {
            header: UdpHeader::new(MSG_TYPE_INVITE_RESP, 4, 0),
            agent_id: "alice.aid.net".into(),
            inviter_agent_id: req.inviter_agent_id.clone(),
            session_id: req.session_id.clone(),
            sign_cookie: 1234,
        };
        let decoded = InviteResponse::decode(&resp.encode()).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn dispatch_by_type_ignores_unknown() {
        let resp = HeartbeatResponse {
            header: UdpHeader::new(MSG_TYPE_HEARTBEAT_RESP, 1, 8),
            next_beat: NEXT_BEAT_REAUTH,
        };
        match UdpMessage::decode(&resp.encode()).unwrap() {
            UdpMessage::HeartbeatResponse(r) => assert_eq!(r.next_beat, 401),
            other => panic!("wrong dispatch: {other:?}"),
        }

        let mut unknown = Vec::new();
        UdpHeader::new(9999, 1, 0).write(&mut unknown);
        assert!(matches!(
            UdpMessage::decode(&unknown).unwrap(),
            UdpMessage::Unknown(9999)
        ));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let req = HeartbeatRequest::new("alice.aid.net", 1, 1);
        let bytes = req.encode();
        assert!(HeartbeatRequest::decode(&bytes[..bytes.len() - 4]).is_err());
    }
}
