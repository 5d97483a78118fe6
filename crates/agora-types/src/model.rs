//! Message models and their content digests.
//!
//! Messages are routed by the hash of their *structure*, never by a Rust type
//! name. A model's schema digest is the SHA-256 of its JSON Schema rendered in
//! canonical form (sorted keys, no whitespace), prefixed with `model:`. Two
//! independent implementations that describe the same structure under the same
//! title therefore agree on the digest.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Prefix carried by every schema digest.
pub const MODEL_DIGEST_PREFIX: &str = "model:";

/// Prefix carried by every protocol digest.
pub const PROTOCOL_DIGEST_PREFIX: &str = "proto:";

/// A message type that can ride inside an envelope.
///
/// Implemented automatically for every type that is serializable and
/// describes itself with `schemars::JsonSchema`.
pub trait Model: Serialize + DeserializeOwned + JsonSchema + Send + Sync + 'static {
    /// Content hash of this model's structure.
    fn schema_digest() -> String {
        schema_digest::<Self>()
    }

    /// The JSON Schema the digest is computed over.
    fn schema() -> Value {
        model_schema::<Self>()
    }
}

impl<T> Model for T where T: Serialize + DeserializeOwned + JsonSchema + Send + Sync + 'static {}

/// JSON Schema of a type as a plain JSON value.
pub fn model_schema<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or(Value::Null)
}

/// Compute the schema digest of a model type.
pub fn schema_digest<T: JsonSchema>() -> String {
    let canonical = canonical_json(&model_schema::<T>());
    format!("{MODEL_DIGEST_PREFIX}{}", sha256_hex(canonical.as_bytes()))
}

/// Hex-encoded SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Whether a string has the shape of a schema digest.
pub fn is_schema_digest(s: &str) -> bool {
    s.strip_prefix(MODEL_DIGEST_PREFIX)
        .map(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// Render a JSON value with object keys sorted at every depth and no
/// insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // A string key always serializes.
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Greeting {
        text: String,
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Farewell {
        text: String,
        reason: Option<String>,
    }

    mod shadow {
        use super::*;

        #[derive(Serialize, Deserialize, JsonSchema)]
        pub struct Greeting {
            pub text: String,
        }
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(Greeting::schema_digest(), Greeting::schema_digest());
        assert!(is_schema_digest(&Greeting::schema_digest()));
    }

    #[test]
    fn test_different_structures_differ() {
        assert_ne!(Greeting::schema_digest(), Farewell::schema_digest());
    }

    #[test]
    fn test_digest_ignores_rust_path() {
        // Routing depends on structure, not on which module declared the type.
        assert_eq!(
            Greeting::schema_digest(),
            shadow::Greeting::schema_digest()
        );
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = serde_json::json!({"b": 1, "a": {"d": [1, 2], "c": "x"}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":"x","d":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_is_schema_digest_rejects_garbage() {
        assert!(!is_schema_digest("model:abc"));
        assert!(!is_schema_digest("proto:00"));
        assert!(!is_schema_digest(""));
    }
}
