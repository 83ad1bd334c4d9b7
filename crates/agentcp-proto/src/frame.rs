//! Binary framing for WebSocket stream traffic.
//!
//! A frame is a fixed 28-byte header followed by the payload. The header
//! carries two magic bytes, a version, routing metadata and a CRC-32 of the
//! payload as shipped. Text payloads of 512 bytes or more are zlib-compressed
//! before the CRC is computed.

use std::io::Read;

use thiserror::Error;

/// `0x4D 0x55` — the two magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 2] = [0x4D, 0x55];

/// Protocol version carried in the header.
pub const FRAME_VERSION: u16 = 0x0101;

/// Header length in bytes.
pub const HEADER_SIZE: usize = 28;

/// Payloads at or above this size are zlib-compressed.
const COMPRESS_THRESHOLD: usize = 512;

/// Message type for JSON text payloads.
pub const MSG_TYPE_JSON: u16 = 1;
/// Message type for binary file chunks.
pub const MSG_TYPE_CHUNK: u16 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    Truncated(usize),
    #[error("bad magic bytes")]
    BadMagic,
    #[error("payload length mismatch: header says {header}, got {actual}")]
    LengthMismatch { header: u32, actual: usize },
    #[error("crc mismatch: header says {header:#010x}, computed {computed:#010x}")]
    CrcMismatch { header: u32, computed: u32 },
    #[error("invalid compressed flag: {0}")]
    BadCompressedFlag(u8),
    #[error("zlib inflate failed")]
    Inflate,
}

/// Fixed frame header. Field order matches the wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub flags: u32,
    pub msg_type: u16,
    pub msg_seq: u32,
    pub content_type: u8,
    pub compressed: u8,
    /// File byte offset for chunk frames, zero otherwise.
    pub reserved: u32,
    pub crc32: u32,
    pub payload_length: u32,
}

impl FrameHeader {
    fn new(msg_type: u16, msg_seq: u32, content_type: u8) -> Self {
        Self {
            version: FRAME_VERSION,
            flags: 0,
            msg_type,
            msg_seq,
            content_type,
            compressed: 0,
            reserved: 0,
            crc32: 0,
            payload_length: 0,
        }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&FRAME_MAGIC);
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.msg_type.to_be_bytes());
        buf.extend_from_slice(&self.msg_seq.to_be_bytes());
        buf.push(self.content_type);
        buf.push(self.compressed);
        buf.extend_from_slice(&self.reserved.to_be_bytes());
        buf.extend_from_slice(&self.crc32.to_be_bytes());
        buf.extend_from_slice(&self.payload_length.to_be_bytes());
    }

    fn read(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::Truncated(data.len()));
        }
        if data[0..2] != FRAME_MAGIC {
            return Err(FrameError::BadMagic);
        }
        let be16 = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);
        let be32 = |i: usize| u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        Ok(Self {
            version: be16(2),
            flags: be32(4),
            msg_type: be16(8),
            msg_seq: be32(10),
            content_type: data[14],
            compressed: data[15],
            reserved: be32(16),
            crc32: be32(20),
            payload_length: be32(24),
        })
    }
}

/// A decoded frame: header plus the payload with compression undone.
#[derive(Debug, Clone)]
pub struct BinaryFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// Encode a JSON text payload as a frame, compressing when large enough.
pub fn encode_json_frame(json: &str, msg_seq: u32) -> Vec<u8> {
    let mut header = FrameHeader::new(MSG_TYPE_JSON, msg_seq, 1);
    let payload = if json.len() >= COMPRESS_THRESHOLD {
        header.compressed = 1;
        deflate(json.as_bytes())
    } else {
        json.as_bytes().to_vec()
    };
    finish(header, &payload)
}

/// Encode a raw binary chunk frame. `offset` is the byte offset of this chunk
/// within the file it belongs to.
pub fn encode_chunk_frame(chunk: &[u8], msg_seq: u32, offset: u32) -> Vec<u8> {
    let mut header = FrameHeader::new(MSG_TYPE_CHUNK, msg_seq, 5);
    header.reserved = offset;
    finish(header, chunk)
}

fn finish(mut header: FrameHeader, payload: &[u8]) -> Vec<u8> {
    header.crc32 = crc32fast::hash(payload);
    header.payload_length = payload.len() as u32;
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    header.write(&mut out);
    out.extend_from_slice(payload);
    out
}

/// Decode a frame, verifying magic, length and CRC, and inflating the payload
/// when the compressed flag is set.
pub fn decode_frame(data: &[u8]) -> Result<BinaryFrame, FrameError> {
    let header = FrameHeader::read(data)?;
    let payload = &data[HEADER_SIZE..];

    if payload.len() != header.payload_length as usize {
        return Err(FrameError::LengthMismatch {
            header: header.payload_length,
            actual: payload.len(),
        });
    }
    let computed = crc32fast::hash(payload);
    if computed != header.crc32 {
        return Err(FrameError::CrcMismatch {
            header: header.crc32,
            computed,
        });
    }
    match header.compressed {
        0 => Ok(BinaryFrame {
            header,
            payload: payload.to_vec(),
        }),
        1 => {
            let payload = inflate(payload)?;
            Ok(BinaryFrame { header, payload })
        }
        other => Err(FrameError::BadCompressedFlag(other)),
    }
}

/// Decode a JSON frame straight to its text payload.
pub fn decode_json_frame(data: &[u8]) -> Result<String, FrameError> {
    let frame = decode_frame(data)?;
    String::from_utf8(frame.payload).map_err(|_| FrameError::Inflate)
}

fn deflate(data: &[u8]) -> Vec<u8> {
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail.
    enc.write_all(data).expect("zlib write to vec");
    enc.finish().expect("zlib finish to vec")
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    // Output bound: five doublings of a 4x initial estimate.
    let cap = (data.len().max(256) * 4) << 5;
    let mut out = Vec::with_capacity(data.len() * 4);
    let mut dec = flate2::read::ZlibDecoder::new(data).take(cap as u64 + 1);
    dec.read_to_end(&mut out).map_err(|_| FrameError::Inflate)?;
    if out.len() > cap {
        return Err(FrameError::Inflate);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_frame_roundtrip() {
        let json = r#"{"cmd":"session_message","data":{}}"#;
        let encoded = encode_json_frame(json, 7);
        let frame = decode_frame(&encoded).unwrap();
        assert_eq!(frame.header.msg_type, MSG_TYPE_JSON);
        assert_eq!(frame.header.msg_seq, 7);
        assert_eq!(frame.header.compressed, 0);
        assert_eq!(frame.payload, json.as_bytes());
    }

    #[test]
    fn large_payload_is_compressed() {
        let json = "x".repeat(4096);
        let encoded = encode_json_frame(&json, 1);
        let header = FrameHeader::read(&encoded).unwrap();
        assert_eq!(header.compressed, 1);
        assert!((header.payload_length as usize) < json.len());
        assert_eq!(decode_json_frame(&encoded).unwrap(), json);
    }

    #[test]
    fn chunk_frame_carries_offset() {
        let chunk = vec![0xAB; 1024];
        let encoded = encode_chunk_frame(&chunk, 3, 65536);
        let frame = decode_frame(&encoded).unwrap();
        assert_eq!(frame.header.msg_type, MSG_TYPE_CHUNK);
        assert_eq!(frame.header.reserved, 65536);
        // Chunk frames are never compressed.
        assert_eq!(frame.header.compressed, 0);
        assert_eq!(frame.payload, chunk);
    }

    #[test]
    fn corrupting_payload_flips_crc() {
        let encoded = encode_json_frame(r#"{"cmd":"ping","data":{}}"#, 9);
        for i in HEADER_SIZE..encoded.len() {
            let mut bad = encoded.clone();
            bad[i] ^= 0xFF;
            assert!(
                matches!(decode_frame(&bad), Err(FrameError::CrcMismatch { .. })),
                "payload byte {i} accepted"
            );
        }
    }

    #[test]
    fn corrupting_checked_header_fields_fails_decode() {
        let encoded = encode_json_frame(r#"{"cmd":"ping","data":{}}"#, 9);
        // Magic, CRC and payload_length are validated on decode.
        for i in [0, 1, 20, 21, 22, 23, 24, 25, 26, 27] {
            let mut bad = encoded.clone();
            bad[i] ^= 0xFF;
            assert!(decode_frame(&bad).is_err(), "header byte {i} accepted");
        }
    }

    #[test]
    fn truncated_input_is_rejected() {
        let encoded = encode_json_frame("{}", 0);
        assert!(matches!(
            decode_frame(&encoded[..10]),
            Err(FrameError::Truncated(_))
        ));
        assert!(matches!(
            decode_frame(&encoded[..encoded.len() - 1]),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut encoded = encode_json_frame("{}", 0);
        encoded[0] = 0x00;
        assert_eq!(decode_frame(&encoded).unwrap_err(), FrameError::BadMagic);
    }

    #[test]
    fn bad_compressed_flag_is_rejected() {
        let mut encoded = encode_json_frame("{}", 0);
        encoded[15] = 2;
        // Recompute the CRC so only the flag is wrong.
        let crc = crc32fast::hash(&encoded[HEADER_SIZE..]);
        encoded[20..24].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(
            decode_frame(&encoded).unwrap_err(),
            FrameError::BadCompressedFlag(2)
        );
    }

    #[test]
    fn roundtrip_arbitrary_sizes() {
        for len in [0usize, 1, 511, 512, 513, 64 * 1024] {
            let payload: String = (0..len).map(|i| ((i % 26) as u8 + b'a') as char).collect();
            let encoded = encode_json_frame(&payload, len as u32);
            assert_eq!(decode_json_frame(&encoded).unwrap(), payload, "len={len}");
        }
    }
}
