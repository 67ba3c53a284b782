use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
const HEX: &[u8; 16] = b"0123456789abcdef";

#[inline]
pub(crate) fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        })
}

/// Id for a tool call whose vendor did not supply one.
#[inline]
pub(crate) fn next_call_id() -> String {
    let id = CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut out = String::with_capacity(21);
    out.push_str("call_");
    push_u64_hex_16(&mut out, id);
    out
}

pub(crate) fn next_chain_id() -> String {
    let mut out = String::with_capacity(41);
    out.push_str("thinking_");
    out.push_str(&uuid::Uuid::new_v4().simple().to_string());
    out
}

/// Longest prefix of `text` holding at most `max_chars` characters.
#[inline]
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Longest prefix of `text` no longer than `max_bytes`, cut on a char boundary.
#[inline]
pub(crate) fn truncate_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[inline]
fn push_u64_hex_16(out: &mut String, value: u64) {
    for shift in (0..16).rev() {
        let nibble = ((value >> (shift * 4)) & 0x0f) as usize;
        out.push(char::from(HEX[nibble]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_ids_are_unique() {
        let a = next_call_id();
        let b = next_call_id();
        assert!(a.starts_with("call_"));
        assert_eq!(a.len(), 21);
        assert_ne!(a, b);
    }

    #[test]
    fn test_chain_id_shape() {
        let id = next_chain_id();
        assert!(id.starts_with("thinking_"));
        assert_eq!(id.len(), 41);
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_truncate_bytes_respects_boundary() {
        // 'é' is two bytes; cutting at 2 would split it.
        assert_eq!(truncate_bytes("hé", 2), "h");
        assert_eq!(truncate_bytes("hello", 10), "hello");
    }
}
