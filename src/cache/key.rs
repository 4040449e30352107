//! Deterministic cache key composition

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialized parameter sets longer than this are content-hashed to keep
/// keys bounded.
const MAX_INLINE_PARAMS: usize = 50;

/// Build a cache key from a normalized symbol and an optional parameter set.
///
/// Parameters are serialized with sorted keys so the same logical set
/// always produces the same string; long serializations collapse to an
/// 8-hex-char SHA-256 prefix.
pub fn cache_key(symbol: &str, params: Option<&Value>) -> String {
    let mut parts = vec![symbol.to_uppercase()];

    if let Some(params) = params {
        let serialized = canonicalize(params);
        if serialized.len() > MAX_INLINE_PARAMS {
            let digest = Sha256::digest(serialized.as_bytes());
            parts.push(hex_prefix(&digest, 8));
        } else {
            parts.push(serialized);
        }
    }

    parts.join(":")
}

/// Serialize a JSON value with object keys in sorted order.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", fields.join(","))
        }
        other => other.to_string(),
    }
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}
