//! Continuity marker wire format and lookup.
//!
//! Layout: the 4-byte magic `LRCM`, a version byte, then a sequence of
//! fields `tag:u8 | len:u32 big-endian | bytes`. Tags:
//! `v` vendor, `p` protocol variant, `m` model id, `s` session id,
//! `r` upstream response id, `e` expiry (unix millis, 8 bytes big-endian).
//! Unknown tags are skipped so newer writers stay readable.

use bytes::{Buf, BufMut};
use tracing::debug;

use crate::error::CodecError;
use crate::protocol::canonical::{ConversationMessage, MessagePart, ProtocolVariant, Role};

/// Mime type of the side-channel data part carrying a marker.
pub const CONTINUITY_MIME: &str = "application/vnd.llm-relay.continuity";

const MAGIC: &[u8; 4] = b"LRCM";
const VERSION: u8 = 1;

const TAG_VENDOR: u8 = b'v';
const TAG_PROTOCOL: u8 = b'p';
const TAG_MODEL: u8 = b'm';
const TAG_SESSION: u8 = b's';
const TAG_RESPONSE: u8 = b'r';
const TAG_EXPIRES: u8 = b'e';

/// Server-side continuation state attached to an assistant turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuityMarker {
    pub vendor: String,
    pub protocol: ProtocolVariant,
    pub model_id: String,
    pub session_id: String,
    pub upstream_response_id: String,
    /// Unix milliseconds after which the vendor no longer honors it.
    pub expires_at: Option<u64>,
}

impl ContinuityMarker {
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| now_ms >= expires_at)
    }

    #[must_use]
    pub fn matches(&self, vendor: &str, protocol: ProtocolVariant, model_id: &str) -> bool {
        self.vendor == vendor && self.protocol == protocol && self.model_id == model_id
    }
}

#[must_use]
pub fn encode_marker(marker: &ContinuityMarker) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        MAGIC.len()
            + 1
            + 5 * 6
            + marker.vendor.len()
            + marker.model_id.len()
            + marker.session_id.len()
            + marker.upstream_response_id.len()
            + 24,
    );
    out.put_slice(MAGIC);
    out.put_u8(VERSION);
    put_field(&mut out, TAG_VENDOR, marker.vendor.as_bytes());
    put_field(&mut out, TAG_PROTOCOL, marker.protocol.as_str().as_bytes());
    put_field(&mut out, TAG_MODEL, marker.model_id.as_bytes());
    put_field(&mut out, TAG_SESSION, marker.session_id.as_bytes());
    put_field(&mut out, TAG_RESPONSE, marker.upstream_response_id.as_bytes());
    if let Some(expires_at) = marker.expires_at {
        put_field(&mut out, TAG_EXPIRES, &expires_at.to_be_bytes());
    }
    out
}

fn put_field(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
    out.put_u8(tag);
    out.put_u32(len);
    out.put_slice(&value[..len as usize]);
}

/// Decode a payload produced by [`encode_marker`].
///
/// # Errors
///
/// Returns [`CodecError`] when the payload is not a marker or is damaged.
pub fn decode_marker(payload: &[u8]) -> Result<ContinuityMarker, CodecError> {
    let mut buf = payload;
    if buf.remaining() < MAGIC.len() + 1 || &buf[..MAGIC.len()] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    buf.advance(MAGIC.len());
    let version = buf.get_u8();
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let mut vendor = None;
    let mut protocol = None;
    let mut model_id = None;
    let mut session_id = None;
    let mut upstream_response_id = None;
    let mut expires_at = None;

    while buf.has_remaining() {
        if buf.remaining() < 5 {
            return Err(CodecError::Truncated("field header"));
        }
        let tag = buf.get_u8();
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(CodecError::Truncated("field value"));
        }
        let value = &buf[..len];
        match tag {
            TAG_VENDOR => vendor = Some(utf8(value, "vendor")?),
            TAG_PROTOCOL => {
                let name = utf8(value, "protocol")?;
                protocol = Some(
                    ProtocolVariant::parse(&name).ok_or(CodecError::UnknownProtocol(name))?,
                );
            }
            TAG_MODEL => model_id = Some(utf8(value, "model")?),
            TAG_SESSION => session_id = Some(utf8(value, "session")?),
            TAG_RESPONSE => upstream_response_id = Some(utf8(value, "response")?),
            TAG_EXPIRES => {
                let bytes: [u8; 8] = value
                    .try_into()
                    .map_err(|_| CodecError::Truncated("expires_at"))?;
                expires_at = Some(u64::from_be_bytes(bytes));
            }
            _ => {}
        }
        buf.advance(len);
    }

    Ok(ContinuityMarker {
        vendor: vendor.ok_or(CodecError::MissingField("vendor"))?,
        protocol: protocol.ok_or(CodecError::MissingField("protocol"))?,
        model_id: model_id.ok_or(CodecError::MissingField("model"))?,
        session_id: session_id.ok_or(CodecError::MissingField("session"))?,
        upstream_response_id: upstream_response_id
            .ok_or(CodecError::MissingField("response"))?,
        expires_at,
    })
}

fn utf8(value: &[u8], field: &'static str) -> Result<String, CodecError> {
    std::str::from_utf8(value)
        .map(str::to_string)
        .map_err(|_| CodecError::InvalidUtf8(field))
}

/// A marker found in history and the index of the message carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    pub message_index: usize,
    pub marker: ContinuityMarker,
}

/// Scan assistant turns newest first for a live marker minted for this
/// vendor, protocol and model. Mismatched, expired and undecodable markers
/// are passed over, never treated as errors.
#[must_use]
pub fn find_continuity_marker(
    history: &[ConversationMessage],
    vendor: &str,
    protocol: ProtocolVariant,
    model_id: &str,
    now_ms: u64,
) -> Option<MarkerMatch> {
    for (message_index, message) in history.iter().enumerate().rev() {
        if message.role != Role::Assistant {
            continue;
        }
        for part in message.parts.iter().rev() {
            let MessagePart::Data { mime, payload } = part else {
                continue;
            };
            if mime != CONTINUITY_MIME {
                continue;
            }
            let marker = match decode_marker(payload) {
                Ok(marker) => marker,
                Err(err) => {
                    debug!(message_index, error = %err, "skipping undecodable continuity marker");
                    continue;
                }
            };
            if !marker.matches(vendor, protocol, model_id) {
                continue;
            }
            if marker.is_expired(now_ms) {
                debug!(message_index, "skipping expired continuity marker");
                continue;
            }
            return Some(MarkerMatch {
                message_index,
                marker,
            });
        }
    }
    None
}
