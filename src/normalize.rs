//! Conversion of backend payloads into [`ChatMessage`].
//!
//! Backends disagree on field names and casing, so every field is probed
//! across a short list of alternatives, case-insensitively, first present
//! wins. Missing fields fall back to their zero value; normalization never
//! fails.

use std::sync::Arc;

use serde_json::Value;

use crate::message::{ChatMessage, Roles};
use crate::transport::BackendKind;

const SENDER_FIELDS: &[&str] = &["Sender", "User", "Author"];
const DISPLAY_NAME_FIELDS: &[&str] = &["DisplayName", "UserName", "Name"];
const TEXT_FIELDS: &[&str] = &["Message", "Text", "Content"];
const MODERATOR_FIELDS: &[&str] = &["IsModerator", "Moderator", "IsMod"];
const VIP_FIELDS: &[&str] = &["IsVip", "Vip"];
const SUBSCRIBER_FIELDS: &[&str] = &["IsSubscriber", "Subscriber", "IsSub"];
const BROADCASTER_FIELDS: &[&str] = &["IsBroadcaster", "Broadcaster"];
const BITS_FIELDS: &[&str] = &["Bits", "BitsAmount", "CheerAmount"];

/// Normalize one raw payload delivered by `origin`.
pub fn normalize(raw: &Value, origin: BackendKind) -> ChatMessage {
    normalize_shared(Arc::new(raw.clone()), origin)
}

/// Same as [`normalize`] but takes ownership of an already shared payload.
pub fn normalize_shared(raw: Arc<Value>, origin: BackendKind) -> ChatMessage {
    let sender_obj = probe(&raw, SENDER_FIELDS);

    let sender = match sender_obj {
        Some(Value::String(name)) => name.clone(),
        Some(obj @ Value::Object(_)) => probe_str(obj, DISPLAY_NAME_FIELDS),
        // No sender entity: some SDKs flatten the name onto the message.
        _ => probe_str(&raw, DISPLAY_NAME_FIELDS),
    };

    let flag = |names: &[&str]| {
        probe(&raw, names)
            .or_else(|| sender_obj.and_then(|s| probe(s, names)))
            .map(as_bool)
            .unwrap_or(false)
    };

    let roles = Roles {
        moderator: flag(MODERATOR_FIELDS),
        vip: flag(VIP_FIELDS),
        subscriber: flag(SUBSCRIBER_FIELDS),
        broadcaster: flag(BROADCASTER_FIELDS),
    };

    let bits = probe(&raw, BITS_FIELDS)
        .or_else(|| sender_obj.and_then(|s| probe(s, BITS_FIELDS)))
        .map(as_bits)
        .unwrap_or(0);

    let text = probe_str(&raw, TEXT_FIELDS);

    ChatMessage {
        sender,
        text,
        roles,
        bits,
        origin,
        raw,
    }
}

/// First non-null field among `names`, matched case-insensitively.
fn probe<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    let obj = value.as_object()?;
    names.iter().find_map(|name| {
        obj.iter()
            .find(|(key, v)| key.eq_ignore_ascii_case(name) && !v.is_null())
            .map(|(_, v)| v)
    })
}

fn probe_str(value: &Value, names: &[&str]) -> String {
    match probe(value, names) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        Value::String(s) => s.eq_ignore_ascii_case("true") || s == "1",
        _ => false,
    }
}

/// Bits are non-negative and fit in 32 bits; wider values saturate.
fn as_bits(value: &Value) -> u32 {
    let wide = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|v| i64::try_from(v).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    };
    u32::try_from(wide.max(0)).unwrap_or(u32::MAX)
}
