//! JSON Schema handling: composition, overlays, tree/terminal projection.
//!
//! Schemas stay `serde_json::Value` throughout (with `preserve_order`, so key
//! order of the input survives every stage). The helpers in this file are
//! the few primitives the stages share.
pub mod compose;
pub mod overlay;
pub mod path;
pub mod tree;

use serde_json::{Map, Value};

pub use compose::resolve_composition;
pub use overlay::{apply_overlays, SchemaOverlay};
pub use path::{BranchLabel, PathSegment, SchemaPath};
pub use tree::{build_tree, flatten, Terminal, TreeNode};

/// Keywords consumed by composition; never copied into the resolved schema.
pub const COMPOSITION_KEYWORDS: &[&str] = &["allOf", "anyOf", "oneOf", "if", "then", "else"];

/// Recursive deep-merge of `patch` into `target`.
///
/// - objects merge key by key
/// - `required` arrays are unioned (order: target first, then new names)
/// - everything else: last writer wins
///
/// Idempotent: merging the same patch twice equals merging it once.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            for (k, pv) in p {
                match t.get_mut(k) {
                    Some(tv) if k == "required" && tv.is_array() && pv.is_array() => {
                        union_strings(tv, pv);
                    }
                    Some(tv) if tv.is_object() && pv.is_object() => deep_merge(tv, pv),
                    _ => {
                        t.insert(k.clone(), pv.clone());
                    }
                }
            }
        }
        (t, p) => *t = p.clone(),
    }
}

fn union_strings(target: &mut Value, extra: &Value) {
    let (Value::Array(t), Value::Array(e)) = (target, extra) else { return };
    for v in e {
        if !t.contains(v) {
            t.push(v.clone());
        }
    }
}

/// The primary (non-null) type of a schema, with `object`/`array` inferred from
/// `properties`/`items` when `type` is absent.
pub fn schema_type(schema: &Value) -> Option<&str> {
    match schema.get("type") {
        Some(Value::String(s)) => return Some(s.as_str()),
        Some(Value::Array(types)) => {
            if let Some(t) = types.iter().filter_map(Value::as_str).find(|t| *t != "null") {
                return Some(t);
            }
        }
        _ => {}
    }
    if schema.get("properties").is_some() {
        Some("object")
    } else if schema.get("items").is_some() {
        Some("array")
    } else {
        None
    }
}

pub fn is_object_schema(schema: &Value) -> bool {
    schema_type(schema) == Some("object")
}

pub fn properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

/// Get (or create) the `properties` map of an object schema.
pub fn properties_mut(schema: &mut Value) -> Option<&mut Map<String, Value>> {
    let obj = schema.as_object_mut()?;
    let entry = obj.entry("properties").or_insert_with(|| Value::Object(Map::new()));
    entry.as_object_mut()
}

pub fn required_names(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|xs| xs.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Literal rendering used in discriminator signatures (`type=6`, `kind=http`).
pub fn literal_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_recurses_and_unions_required() {
        let mut base = json!({
            "type": "object",
            "required": ["a"],
            "properties": { "a": { "type": "string" }, "n": { "type": "object", "properties": { "x": { "type": "number" } } } }
        });
        let patch = json!({
            "required": ["b", "a"],
            "properties": { "b": { "type": "boolean" }, "n": { "properties": { "y": { "type": "string" } } } }
        });
        deep_merge(&mut base, &patch);
        assert_eq!(base["required"], json!(["a", "b"]));
        assert_eq!(base["properties"]["n"]["properties"]["x"]["type"], "number");
        assert_eq!(base["properties"]["n"]["properties"]["y"]["type"], "string");
        assert_eq!(base["properties"]["b"]["type"], "boolean");
    }

    #[test]
    fn deep_merge_is_idempotent() {
        let base = json!({ "properties": { "a": { "type": "string", "enum": ["x"] } }, "required": ["a"] });
        let patch = json!({ "properties": { "a": { "enum": ["y", "z"] }, "c": { "type": "number" } }, "required": ["c"] });
        let mut once = base.clone();
        deep_merge(&mut once, &patch);
        let mut twice = once.clone();
        deep_merge(&mut twice, &patch);
        assert_eq!(once, twice);
    }

    #[test]
    fn schema_type_infers_structure() {
        assert_eq!(schema_type(&json!({ "type": ["null", "integer"] })), Some("integer"));
        assert_eq!(schema_type(&json!({ "properties": {} })), Some("object"));
        assert_eq!(schema_type(&json!({ "items": {} })), Some("array"));
        assert_eq!(schema_type(&json!({ "description": "anything" })), None);
    }
}
