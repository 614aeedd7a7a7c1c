//! Schema fingerprints: key-order independent content hashes.
use serde_json::{Map, Value};

/// Rebuild `v` with every object's keys in sorted order. Arrays keep their order.
pub fn canonicalize(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(xs) => Value::Array(xs.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Hex-encoded BLAKE3 digest of the canonical serialization.
pub fn fingerprint(schema: &Value) -> String {
    // `to_string` on a `Value` cannot fail: keys are always strings.
    let canonical = canonicalize(schema).to_string();
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

pub fn same_schema(a: &Value, b: &Value) -> bool {
    fingerprint(a) == fingerprint(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stable_under_key_permutation() {
        let a = json!({
            "type": "object",
            "properties": { "qty": { "type": "number" }, "price": { "type": "number", "minimum": 0 } },
            "required": ["qty"]
        });
        let b = json!({
            "required": ["qty"],
            "properties": { "price": { "minimum": 0, "type": "number" }, "qty": { "type": "number" } },
            "type": "object"
        });
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert!(same_schema(&a, &b));
    }

    #[test]
    fn differs_on_any_scalar_change() {
        let a = json!({ "properties": { "qty": { "type": "number", "minimum": 0 } } });
        let b = json!({ "properties": { "qty": { "type": "number", "minimum": 1 } } });
        let c = json!({ "properties": { "qty": { "type": "integer", "minimum": 0 } } });
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(fingerprint(&json!(["a", "b"])), fingerprint(&json!(["b", "a"])));
    }
}
