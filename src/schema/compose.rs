//! Schema composition resolver.
//!
//! Collapses `allOf` / `anyOf` / `oneOf` and `if/then/else` into one walkable
//! schema:
//! - non-conditional `allOf` parts deep-merge into the base
//! - `anyOf` / `oneOf` arms deep-merge into a best-effort union view
//! - `if/then[/else]` arms keyed by a literal discriminator (`type == 6`)
//!   become synthetic `@branch:` children under every property that varies
//!   between arms
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use super::path::{BranchLabel, SchemaPath};
use super::{
    deep_merge, is_object_schema, literal_text, properties, properties_mut, required_names,
    schema_type, COMPOSITION_KEYWORDS,
};

pub const UNION_NOTE: &str = "(union of multiple types)";
pub const ELSE_LABEL: &str = "Other";

/// `field == literal`, read from an `if` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Discriminator {
    pub field: String,
    pub value: Value,
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
struct Branch {
    label: BranchLabel,
    schema: Value,
}

// ————————————————————————————————————————————————————————————————————————————
// DISCRIMINATORS
// ————————————————————————————————————————————————————————————————————————————

impl Discriminator {
    /// First property in `if.properties` pinned to a single literal (`const`
    /// or a one-element `enum`).
    pub fn from_if(if_clause: &Value) -> Option<Self> {
        for (field, cond) in properties(if_clause)? {
            let value = match (cond.get("const"), cond.get("enum")) {
                (Some(v), _) => v.clone(),
                (None, Some(Value::Array(xs))) if xs.len() == 1 => xs[0].clone(),
                _ => continue,
            };
            return Some(Self {
                field: field.clone(),
                value,
                title: cond.get("title").and_then(Value::as_str).map(str::to_string),
            });
        }
        None
    }

    pub fn signature(&self) -> String {
        format!("{}={}", self.field, literal_text(&self.value))
    }
}

pub fn discriminator_signature(if_clause: &Value) -> Option<String> {
    Discriminator::from_if(if_clause).map(|d| d.signature())
}

fn json_type_of(v: &Value) -> &'static str {
    match v {
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        _ => "string",
    }
}

// ————————————————————————————————————————————————————————————————————————————
// RESOLVER
// ————————————————————————————————————————————————————————————————————————————

pub fn resolve_composition(schema: &Value, sink: &mut dyn DiagnosticSink) -> Value {
    resolve_at(schema, &SchemaPath::root(), sink)
}

fn resolve_at(schema: &Value, at: &SchemaPath, sink: &mut dyn DiagnosticSink) -> Value {
    let Value::Object(map) = schema else { return schema.clone() };

    let mut base = Value::Object(
        map.iter()
            .filter(|(k, _)| !COMPOSITION_KEYWORDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    let mut branches = Vec::new();

    // 1) allOf: plain parts merge, conditional parts become branches
    if let Some(Value::Array(parts)) = map.get("allOf") {
        for part in parts {
            if part.get("if").is_some() {
                collect_conditional(part, &mut base, &mut branches, at, sink);
            } else {
                let resolved = resolve_at(part, at, sink);
                deep_merge(&mut base, &resolved);
            }
        }
    }

    // 2) a bare if/then/else on the schema itself
    if map.contains_key("if") {
        collect_conditional(schema, &mut base, &mut branches, at, sink);
    }

    // 3) non-discriminated unions
    for keyword in ["anyOf", "oneOf"] {
        if let Some(Value::Array(arms)) = map.get(keyword) {
            let arms: Vec<Value> = arms.iter().map(|arm| resolve_at(arm, at, sink)).collect();
            merge_union(&mut base, &arms);
        }
    }

    // 4) synthesize branch containers
    if !branches.is_empty() {
        apply_branches(&mut base, branches, at, sink);
    }

    resolve_children(&mut base, at, sink);
    base
}

fn collect_conditional(
    part: &Value,
    base: &mut Value,
    branches: &mut Vec<Branch>,
    at: &SchemaPath,
    sink: &mut dyn DiagnosticSink,
) {
    let then = part.get("then").map(|t| resolve_at(t, at, sink));
    let otherwise = part.get("else").map(|e| resolve_at(e, at, sink));

    let Some(disc) = part.get("if").and_then(Discriminator::from_if) else {
        sink.emit(
            Diagnostic::info(
                "conditional-without-discriminator",
                "`if` clause pins no property to a literal; its branches are merged as a union",
            )
            .at(at.to_string()),
        );
        let arms: Vec<Value> = then.into_iter().chain(otherwise).collect();
        merge_union(base, &arms);
        return;
    };

    ensure_discriminator_property(base, &disc);
    let value = literal_text(&disc.value);

    if let Some(then) = then {
        let label = then
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| disc.title.clone())
            .unwrap_or_else(|| format!("{} {}", disc.field, value));
        branches.push(Branch { label: BranchLabel::new(&disc.field, &value, &label), schema: then });
    }
    if let Some(otherwise) = otherwise {
        let label = otherwise.get("title").and_then(Value::as_str).unwrap_or(ELSE_LABEL).to_string();
        branches.push(Branch {
            label: BranchLabel::new(&disc.field, &value, &label).negated(),
            schema: otherwise,
        });
    }
}

/// The discriminator must exist as a plain property. When the base schema
/// does not declare it, synthesize an enum of the observed literals.
fn ensure_discriminator_property(base: &mut Value, disc: &Discriminator) {
    let Some(props) = properties_mut(base) else { return };
    match props.get_mut(&disc.field) {
        None => {
            props.insert(
                disc.field.clone(),
                json!({ "type": json_type_of(&disc.value), "enum": [disc.value.clone()], "x-discriminator": true }),
            );
        }
        Some(existing) if existing.get("x-discriminator") == Some(&Value::Bool(true)) => {
            if let Some(Value::Array(values)) = existing.get_mut("enum") {
                if !values.contains(&disc.value) {
                    values.push(disc.value.clone());
                }
            }
        }
        Some(_) => {}
    }
}

fn apply_branches(base: &mut Value, branches: Vec<Branch>, at: &SchemaPath, sink: &mut dyn DiagnosticSink) {
    let mut by_field: IndexMap<String, Vec<Branch>> = IndexMap::new();
    for branch in branches {
        by_field.entry(branch.label.field.clone()).or_default().push(branch);
    }

    for (field, group) in &by_field {
        // property name → (branch index, that branch's schema for it)
        let mut variants: IndexMap<&str, Vec<(usize, &Value)>> = IndexMap::new();
        for (i, branch) in group.iter().enumerate() {
            let Some(props) = properties(&branch.schema) else { continue };
            for (name, schema) in props {
                if name != field {
                    variants.entry(name.as_str()).or_default().push((i, schema));
                }
            }
        }

        for (name, versions) in variants {
            let Some(props) = properties_mut(base) else { return };
            let uniform = versions.len() == group.len()
                && versions.windows(2).all(|w| w[0].1 == w[1].1);
            if uniform {
                match props.get_mut(name) {
                    Some(existing) => deep_merge(existing, versions[0].1),
                    None => {
                        props.insert(name.to_string(), versions[0].1.clone());
                    }
                }
                continue;
            }

            report_type_conflict(name, &versions, &at.property(name), sink);

            let container = props.entry(name.to_string()).or_insert_with(|| json!({ "type": "object" }));
            into_container(container, field);
            if let Some(children) = properties_mut(container) {
                for (i, schema) in versions {
                    children.insert(group[i].label.property_name(), schema.clone());
                }
            }
        }
    }
}

/// Turn an existing property into a branch container, keeping its own
/// properties when it already was an object.
fn into_container(schema: &mut Value, field: &str) {
    if !is_object_schema(schema) {
        let mut container = Map::new();
        container.insert("type".into(), Value::from("object"));
        for key in ["title", "description"] {
            if let Some(v) = schema.get(key) {
                container.insert(key.into(), v.clone());
            }
        }
        *schema = Value::Object(container);
    }
    if let Some(obj) = schema.as_object_mut() {
        obj.insert("type".into(), Value::from("object"));
        obj.insert("x-discriminator".into(), Value::from(field));
        obj.entry("properties").or_insert_with(|| Value::Object(Map::new()));
    }
}

fn report_type_conflict(name: &str, versions: &[(usize, &Value)], at: &SchemaPath, sink: &mut dyn DiagnosticSink) {
    let mut types: Vec<&str> = Vec::new();
    for (_, schema) in versions {
        if let Some(t) = schema_type(schema) {
            if !types.contains(&t) {
                types.push(t);
            }
        }
    }
    if types.len() > 1 {
        sink.emit(
            Diagnostic::warning(
                "branch-type-conflict",
                format!(
                    "discriminated branches disagree on the type of `{name}` ({}); each branch keeps its own",
                    types.join(", ")
                ),
            )
            .at(at.to_string()),
        );
    }
}

/// Best-effort union view of `anyOf` / `oneOf` arms.
///
/// Same-named object properties merge recursively and get a union note;
/// other conflicts resolve last-arm-wins. `required` keeps only the names
/// every arm requires.
fn merge_union(base: &mut Value, arms: &[Value]) {
    let mut common: Option<Vec<String>> = None;
    for arm in arms {
        let names: Vec<String> = required_names(arm).into_iter().map(str::to_string).collect();
        common = Some(match common {
            None => names,
            Some(mut prev) => {
                prev.retain(|n| names.contains(n));
                prev
            }
        });
    }

    for arm in arms {
        if base.get("type").is_none() && is_object_schema(arm) {
            base["type"] = Value::from("object");
        }
        let Some(arm_props) = properties(arm) else { continue };
        let Some(props) = properties_mut(base) else { return };
        for (name, schema) in arm_props {
            match props.get_mut(name) {
                Some(existing) if is_object_schema(existing) && is_object_schema(schema) => {
                    deep_merge(existing, schema);
                    add_union_note(existing);
                }
                _ => {
                    props.insert(name.clone(), schema.clone());
                }
            }
        }
    }

    if let Some(common) = common.filter(|c| !c.is_empty()) {
        let patch = json!({ "required": common });
        deep_merge(base, &patch);
    }
}

fn add_union_note(schema: &mut Value) {
    let description = match schema.get("description").and_then(Value::as_str) {
        Some(d) if d.ends_with(UNION_NOTE) => return,
        Some(d) if !d.is_empty() => format!("{d} {UNION_NOTE}"),
        _ => UNION_NOTE.to_string(),
    };
    schema["description"] = Value::from(description);
}

fn resolve_children(base: &mut Value, at: &SchemaPath, sink: &mut dyn DiagnosticSink) {
    if let Some(props) = base.get_mut("properties").and_then(Value::as_object_mut) {
        for (name, child) in props.iter_mut() {
            let resolved = resolve_at(child, &at.property(name), sink);
            *child = resolved;
        }
    }
    match base.get_mut("items") {
        Some(items @ Value::Object(_)) => {
            let resolved = resolve_at(items, &at.items(), sink);
            *items = resolved;
        }
        Some(Value::Array(tuple)) => {
            for item in tuple.iter_mut() {
                let resolved = resolve_at(item, &at.items(), sink);
                *item = resolved;
            }
        }
        _ => {}
    }
    if let Some(extra @ Value::Object(_)) = base.get_mut("additionalProperties") {
        let resolved = resolve_at(extra, at, sink);
        *extra = resolved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_schema() -> Value {
        json!({
            "type": "object",
            "required": ["type"],
            "allOf": [
                { "properties": { "type": { "type": "integer", "enum": [6, 7] }, "name": { "type": "string" } } },
                {
                    "if": { "properties": { "type": { "const": 6 } } },
                    "then": {
                        "title": "HTTP Task",
                        "properties": {
                            "type": { "const": 6 },
                            "config": { "type": "object", "properties": { "url": { "type": "string" } } },
                            "retries": { "type": "integer" }
                        }
                    }
                },
                {
                    "if": { "properties": { "type": { "const": 7 } } },
                    "then": {
                        "title": "Script Task",
                        "properties": {
                            "config": { "type": "object", "properties": { "script": { "type": "string" } } },
                            "retries": { "type": "integer" }
                        }
                    }
                }
            ]
        })
    }

    #[test]
    fn discriminated_branches_are_isolated() {
        let mut sink: Vec<Diagnostic> = Vec::new();
        let resolved = resolve_composition(&task_schema(), &mut sink);
        assert!(resolved.get("allOf").is_none());

        let config = &resolved["properties"]["config"];
        let children = config["properties"].as_object().unwrap();
        let names: Vec<&String> = children.keys().collect();
        assert_eq!(names, ["@branch:type=6:HTTP Task", "@branch:type=7:Script Task"]);

        let http = &children["@branch:type=6:HTTP Task"]["properties"];
        let script = &children["@branch:type=7:Script Task"]["properties"];
        assert!(http.get("url").is_some() && http.get("script").is_none());
        assert!(script.get("script").is_some() && script.get("url").is_none());
        assert_eq!(config["x-discriminator"], "type");
        assert!(sink.is_empty(), "{sink:?}");
    }

    #[test]
    fn discriminator_and_uniform_properties_are_not_branched() {
        let resolved = resolve_composition(&task_schema(), &mut Vec::<Diagnostic>::new());
        let props = resolved["properties"].as_object().unwrap();
        // `type` keeps its own schema; `retries` is identical in both arms
        assert_eq!(props["type"], json!({ "type": "integer", "enum": [6, 7] }));
        assert_eq!(props["retries"], json!({ "type": "integer" }));
        assert_eq!(props["name"]["type"], "string");
        assert_eq!(resolved["required"], json!(["type"]));
    }

    #[test]
    fn missing_discriminator_property_is_synthesized() {
        let schema = json!({
            "allOf": [
                { "if": { "properties": { "kind": { "const": "a" } } }, "then": { "properties": { "x": { "type": "string" } } } },
                { "if": { "properties": { "kind": { "const": "b" } } }, "then": { "properties": { "y": { "type": "number" } } } }
            ]
        });
        let resolved = resolve_composition(&schema, &mut Vec::<Diagnostic>::new());
        assert_eq!(resolved["properties"]["kind"]["enum"], json!(["a", "b"]));
        // labels fall back to `field value`
        assert!(resolved["properties"]["x"]["properties"].get("@branch:kind=a:kind a").is_some());
    }

    #[test]
    fn else_branch_is_negated() {
        let schema = json!({
            "properties": { "mode": { "type": "string" } },
            "if": { "properties": { "mode": { "const": "fast" } } },
            "then": { "properties": { "limit": { "type": "integer" } } },
            "else": { "properties": { "limit": { "type": "string" } } }
        });
        let mut sink: Vec<Diagnostic> = Vec::new();
        let resolved = resolve_composition(&schema, &mut sink);
        let limit = resolved["properties"]["limit"]["properties"].as_object().unwrap();
        assert!(limit.contains_key("@branch:mode=fast:mode fast"));
        assert!(limit.contains_key("@branch:mode!=fast:Other"));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].code, "branch-type-conflict");
        assert_eq!(sink[0].path.as_deref(), Some("limit"));
    }

    #[test]
    fn any_of_merges_without_branching() {
        let schema = json!({
            "anyOf": [
                { "type": "object", "required": ["id", "a"], "properties": {
                    "id": { "type": "string" },
                    "meta": { "type": "object", "description": "metadata", "properties": { "p": { "type": "string" } } },
                    "v": { "type": "string" }
                } },
                { "type": "object", "required": ["id"], "properties": {
                    "meta": { "type": "object", "properties": { "q": { "type": "number" } } },
                    "v": { "type": "number" }
                } }
            ]
        });
        let resolved = resolve_composition(&schema, &mut Vec::<Diagnostic>::new());
        let meta = &resolved["properties"]["meta"];
        assert!(meta["properties"].get("p").is_some() && meta["properties"].get("q").is_some());
        assert_eq!(meta["description"], "metadata (union of multiple types)");
        assert_eq!(resolved["properties"]["v"]["type"], "number", "last arm wins");
        assert_eq!(resolved["required"], json!(["id"]));
        assert_eq!(resolved["type"], "object");
    }

    #[test]
    fn nested_compositions_resolve_recursively() {
        let schema = json!({
            "type": "object",
            "properties": {
                "items": { "type": "array", "items": { "allOf": [
                    { "properties": { "a": { "type": "string" } } },
                    { "properties": { "b": { "type": "string" } } }
                ] } }
            }
        });
        let resolved = resolve_composition(&schema, &mut Vec::<Diagnostic>::new());
        let item = &resolved["properties"]["items"]["items"];
        assert!(item.get("allOf").is_none());
        assert_eq!(item["properties"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn conditional_without_literal_is_reported_and_merged() {
        let schema = json!({
            "allOf": [{ "if": { "required": ["x"] }, "then": { "properties": { "y": { "type": "string" } } } }]
        });
        let mut sink: Vec<Diagnostic> = Vec::new();
        let resolved = resolve_composition(&schema, &mut sink);
        assert_eq!(resolved["properties"]["y"]["type"], "string");
        assert_eq!(sink[0].code, "conditional-without-discriminator");
    }

    #[test]
    fn signature_reads_const_or_single_enum() {
        assert_eq!(discriminator_signature(&json!({ "properties": { "type": { "const": 6 } } })).as_deref(), Some("type=6"));
        assert_eq!(discriminator_signature(&json!({ "properties": { "k": { "enum": ["x"] } } })).as_deref(), Some("k=x"));
        assert_eq!(discriminator_signature(&json!({ "properties": { "k": { "enum": ["x", "y"] } } })), None);
    }
}
