//! # Wire Protocol Messages
//!
//! Every datagram carries exactly one [`Envelope`], serialized as JSON
//! text with a fixed field order so that independent implementations
//! interoperate:
//!
//! ```text
//! {"version":N,"msg_id":"…","msg_type":"…","sender_id":"…",
//!  "sender_addr":"ip:port","timestamp_ms":N,"ttl":N,"payload":<value>}
//! ```
//!
//! ## Message Types
//!
//! | Type | Payload | Purpose |
//! |------|---------|---------|
//! | `HELLO` | capabilities + optional PoW envelope | join / admission |
//! | `GET_PEERS` | `{max_peers}` | request peer exchange |
//! | `PEERS_LIST` | `{peers:[{addr},…]}` | peer exchange reply |
//! | `GOSSIP` | opaque application value | eager push payload |
//! | `PING` / `PONG` | `{ping_id}` / `{reply_to}` | liveness probing |
//! | `IHAVE` | `{ids:[…], max_ids}` | lazy pull advertisement |
//! | `IWANT` | `{ids:[…]}` | lazy pull solicitation |
//!
//! The engine treats `payload` as opaque; handlers that need structure
//! parse it with the typed payload structs below. Parsing is tolerant:
//! unknown keys are ignored and a backslash-escaped quote inside a string
//! does not terminate the value.
//!
//! ## Size Limits
//!
//! Encoding and decoding are bounded so a peer cannot force oversized
//! allocations: the whole datagram must fit [`MAX_SERIALIZED_LEN`],
//! payloads [`MSG_BUF_SIZE`], and message ids [`ID_LEN`]. Decode on
//! malformed input fails cleanly and the listener drops the datagram.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version stamped on every outbound envelope.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum length of a message identifier.
pub const ID_LEN: usize = 128;

/// Maximum serialized payload size in bytes.
pub const MSG_BUF_SIZE: usize = 8 * 1024;

/// Maximum size of one serialized datagram in bytes.
pub const MAX_SERIALIZED_LEN: usize = 10 * 1024;

/// Wire vocabulary. Tags outside the vocabulary decode to [`MsgType::Unknown`]
/// and are dropped by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MsgType {
    Hello,
    GetPeers,
    PeersList,
    Gossip,
    Ping,
    Pong,
    Ihave,
    Iwant,
    Unknown,
}

impl MsgType {
    pub fn wire_name(self) -> &'static str {
        match self {
            MsgType::Hello => "HELLO",
            MsgType::GetPeers => "GET_PEERS",
            MsgType::PeersList => "PEERS_LIST",
            MsgType::Gossip => "GOSSIP",
            MsgType::Ping => "PING",
            MsgType::Pong => "PONG",
            MsgType::Ihave => "IHAVE",
            MsgType::Iwant => "IWANT",
            MsgType::Unknown => "UNKNOWN",
        }
    }
}

impl From<String> for MsgType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "HELLO" => MsgType::Hello,
            "GET_PEERS" => MsgType::GetPeers,
            "PEERS_LIST" => MsgType::PeersList,
            "GOSSIP" => MsgType::Gossip,
            "PING" => MsgType::Ping,
            "PONG" => MsgType::Pong,
            "IHAVE" => MsgType::Ihave,
            "IWANT" => MsgType::Iwant,
            _ => MsgType::Unknown,
        }
    }
}

impl From<MsgType> for String {
    fn from(t: MsgType) -> Self {
        t.wire_name().to_string()
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One wire message. Field declaration order is the wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub msg_id: String,
    pub msg_type: MsgType,
    pub sender_id: String,
    pub sender_addr: String,
    pub timestamp_ms: u64,
    pub ttl: u32,
    pub payload: Value,
}

impl Envelope {
    /// Build an envelope stamped with the current protocol version and time.
    pub fn new(
        msg_type: MsgType,
        msg_id: String,
        sender_id: &str,
        sender_addr: &str,
        ttl: u32,
        payload: Value,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_id,
            msg_type,
            sender_id: sender_id.to_string(),
            sender_addr: sender_addr.to_string(),
            timestamp_ms: crate::identity::now_ms(),
            ttl,
            payload,
        }
    }
}

// ============================================================================
// Typed payloads (shallow, tolerant parsing via serde_json::from_value)
//
// Only payloads a handler parses get a struct; outbound-only payloads
// (GET_PEERS, PING, PONG) are built inline at the send site.
// ============================================================================

/// HELLO payload: advertised capabilities plus the optional admission proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub pow: Option<PowEnvelope>,
}

/// Admission proof carried inside a HELLO payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowEnvelope {
    pub hash_alg: String,
    pub difficulty_k: u32,
    pub nonce: u64,
    pub digest_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersPayload {
    pub peers: Vec<PeerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IhavePayload {
    pub ids: Vec<String>,
    #[serde(default)]
    pub max_ids: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IwantPayload {
    pub ids: Vec<String>,
}

// ============================================================================
// Bounded codec
// ============================================================================

#[derive(Debug)]
pub enum CodecError {
    Json(serde_json::Error),
    Oversize { len: usize, limit: usize },
    PayloadOversize { len: usize },
    IdTooLong { len: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Json(e) => write!(f, "invalid message: {e}"),
            CodecError::Oversize { len, limit } => {
                write!(f, "datagram of {len} bytes exceeds limit of {limit}")
            }
            CodecError::PayloadOversize { len } => {
                write!(f, "payload of {len} bytes exceeds limit of {MSG_BUF_SIZE}")
            }
            CodecError::IdTooLong { len } => {
                write!(f, "msg_id of {len} bytes exceeds limit of {ID_LEN}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Json(e)
    }
}

/// Enforce the per-field limits on an envelope, whichever direction it is
/// travelling: id length and serialized payload size.
fn check_limits(msg: &Envelope) -> Result<(), CodecError> {
    if msg.msg_id.len() > ID_LEN {
        return Err(CodecError::IdTooLong {
            len: msg.msg_id.len(),
        });
    }
    let payload_len = serde_json::to_vec(&msg.payload)?.len();
    if payload_len > MSG_BUF_SIZE {
        return Err(CodecError::PayloadOversize { len: payload_len });
    }
    Ok(())
}

/// Serialize an envelope, enforcing the datagram, payload, and id limits.
pub fn encode(msg: &Envelope) -> Result<Vec<u8>, CodecError> {
    check_limits(msg)?;
    let bytes = serde_json::to_vec(msg)?;
    if bytes.len() > MAX_SERIALIZED_LEN {
        return Err(CodecError::Oversize {
            len: bytes.len(),
            limit: MAX_SERIALIZED_LEN,
        });
    }
    Ok(bytes)
}

/// Parse one datagram. Input beyond the datagram bound is rejected before
/// it touches the parser; a parsed envelope must still honor the payload
/// and id limits.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    if bytes.len() > MAX_SERIALIZED_LEN {
        return Err(CodecError::Oversize {
            len: bytes.len(),
            limit: MAX_SERIALIZED_LEN,
        });
    }
    let msg: Envelope = serde_json::from_slice(bytes)?;
    check_limits(&msg)?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gossip_envelope() -> Envelope {
        Envelope {
            version: PROTOCOL_VERSION,
            msg_id: "n1_1700000000000".to_string(),
            msg_type: MsgType::Gossip,
            sender_id: "n1".to_string(),
            sender_addr: "127.0.0.1:5000".to_string(),
            timestamp_ms: 1_700_000_000_000,
            ttl: 5,
            payload: json!({ "data": "hi" }),
        }
    }

    #[test]
    fn wire_layout_is_fixed() {
        let bytes = encode(&gossip_envelope()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "{\"version\":1,\"msg_id\":\"n1_1700000000000\",\"msg_type\":\"GOSSIP\",\
             \"sender_id\":\"n1\",\"sender_addr\":\"127.0.0.1:5000\",\
             \"timestamp_ms\":1700000000000,\"ttl\":5,\"payload\":{\"data\":\"hi\"}}"
        );
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let original = gossip_envelope();
        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn escaped_quotes_do_not_terminate_values() {
        let mut msg = gossip_envelope();
        msg.payload = json!({ "data": "say \"hello\" twice" });
        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.payload["data"], "say \"hello\" twice");
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(decode(b"{\"version\":1,").is_err());
        assert!(decode(&[0xFF, 0xFE, 0xFD]).is_err());
        assert!(decode(b"42").is_err());
        assert!(decode(b"{}").is_err());
    }

    #[test]
    fn oversized_input_is_rejected_before_parsing() {
        let huge = vec![b'x'; MAX_SERIALIZED_LEN + 1];
        assert!(matches!(decode(&huge), Err(CodecError::Oversize { .. })));
    }

    #[test]
    fn oversized_payload_is_rejected_in_both_directions() {
        // Just over the payload bound, while the whole datagram still fits
        // the datagram bound: the payload limit must catch it on its own.
        let mut msg = gossip_envelope();
        msg.payload = json!({ "data": "y".repeat(MSG_BUF_SIZE) });
        assert!(matches!(
            encode(&msg),
            Err(CodecError::PayloadOversize { .. })
        ));

        let raw = format!(
            "{{\"version\":1,\"msg_id\":\"m\",\"msg_type\":\"GOSSIP\",\
             \"sender_id\":\"n\",\"sender_addr\":\"127.0.0.1:1\",\
             \"timestamp_ms\":1,\"ttl\":1,\"payload\":{{\"data\":\"{}\"}}}}",
            "y".repeat(MSG_BUF_SIZE)
        );
        assert!(raw.len() <= MAX_SERIALIZED_LEN);
        assert!(matches!(
            decode(raw.as_bytes()),
            Err(CodecError::PayloadOversize { .. })
        ));
    }

    #[test]
    fn overlong_msg_id_fails_both_ways() {
        let mut msg = gossip_envelope();
        msg.msg_id = "i".repeat(ID_LEN + 1);
        assert!(matches!(encode(&msg), Err(CodecError::IdTooLong { .. })));

        let raw = format!(
            "{{\"version\":1,\"msg_id\":\"{}\",\"msg_type\":\"GOSSIP\",\
             \"sender_id\":\"n\",\"sender_addr\":\"127.0.0.1:1\",\
             \"timestamp_ms\":1,\"ttl\":1,\"payload\":null}}",
            "i".repeat(ID_LEN + 1)
        );
        assert!(matches!(
            decode(raw.as_bytes()),
            Err(CodecError::IdTooLong { .. })
        ));
    }

    #[test]
    fn unknown_type_decodes_to_unknown() {
        let raw = b"{\"version\":1,\"msg_id\":\"x\",\"msg_type\":\"BOGUS\",\
                    \"sender_id\":\"n\",\"sender_addr\":\"127.0.0.1:1\",\
                    \"timestamp_ms\":1,\"ttl\":1,\"payload\":null}";
        let decoded = decode(raw).unwrap();
        assert_eq!(decoded.msg_type, MsgType::Unknown);
    }

    #[test]
    fn field_order_in_input_does_not_matter() {
        let raw = b"{\"payload\":{\"a\":1},\"ttl\":2,\"timestamp_ms\":9,\
                    \"sender_addr\":\"127.0.0.1:2\",\"sender_id\":\"n2\",\
                    \"msg_type\":\"PING\",\"msg_id\":\"p1\",\"version\":1}";
        let decoded = decode(raw).unwrap();
        assert_eq!(decoded.msg_type, MsgType::Ping);
        assert_eq!(decoded.ttl, 2);
    }

    #[test]
    fn hello_payload_parses_with_and_without_pow() {
        let with_pow = json!({
            "capabilities": ["udp", "json"],
            "pow": {
                "hash_alg": "sha256",
                "difficulty_k": 3,
                "nonce": 812,
                "digest_hex": "000abc"
            },
            "extra_key": true
        });
        let parsed: HelloPayload = serde_json::from_value(with_pow).unwrap();
        let pow = parsed.pow.expect("pow should parse");
        assert_eq!(pow.difficulty_k, 3);
        assert_eq!(pow.nonce, 812);

        let without: HelloPayload =
            serde_json::from_value(json!({ "capabilities": ["udp"] })).unwrap();
        assert!(without.pow.is_none());
    }

    #[test]
    fn ihave_and_iwant_payloads_round_trip() {
        let ihave: IhavePayload =
            serde_json::from_value(json!({ "ids": ["a", "b"], "max_ids": 32 })).unwrap();
        assert_eq!(ihave.ids, vec!["a", "b"]);
        assert_eq!(ihave.max_ids, 32);

        let iwant: IwantPayload = serde_json::from_value(json!({ "ids": ["a"] })).unwrap();
        assert_eq!(iwant.ids, vec!["a"]);
    }
}
