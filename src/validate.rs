//! Structural checks on a MapSpec, independent of generation.
use std::collections::{HashMap, HashSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::diagnostics::Diagnostic;
use crate::mapspec::{MapSpec, Side};
use crate::reference::{is_embedded_ref, ReferenceKey};
use crate::schema::SchemaPath;

static VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d+(\.\d+)?$").expect("static pattern"));

pub fn validate(spec: &MapSpec) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    check_identity(spec, &mut out);
    check_parts(spec, &mut out);
    check_nodes(spec, &mut out);
    check_edges(spec, &mut out);
    check_cycles(spec, &mut out);
    check_contract(spec, &mut out);
    out
}

fn check_identity(spec: &MapSpec, out: &mut Vec<Diagnostic>) {
    match spec.version.as_deref().map(str::trim) {
        None | Some("") => out.push(Diagnostic::error("missing-version", "`version` is required").at("version")),
        Some(version) if !VERSION.is_match(version) => out.push(
            Diagnostic::info("version-format", format!("version `{version}` is not MAJOR.MINOR[.PATCH]")).at("version"),
        ),
        Some(_) => {}
    }
    if spec.name().map(str::trim).filter(|n| !n.is_empty()).is_none() {
        out.push(Diagnostic::error("missing-name", "`metadata.name` is required").at("metadata.name"));
    }
}

fn check_parts(spec: &MapSpec, out: &mut Vec<Diagnostic>) {
    for side in [Side::Source, Side::Target] {
        let parts = spec.parts(side);
        if parts.is_empty() {
            out.push(
                Diagnostic::warning("empty-schema-parts", format!("no {} schema parts defined", side.as_str()))
                    .at(format!("schemaParts.{}", side.as_str())),
            );
        }
        for (name, part) in parts {
            let location = format!("schemaParts.{}.{name}", side.as_str());
            if is_embedded_ref(&part.schema_ref) {
                if part.schema.is_none() {
                    out.push(
                        Diagnostic::warning(
                            "missing-embedded-schema",
                            format!("part `{name}` is `{}` but carries no schema", part.schema_ref),
                        )
                        .at(location),
                    );
                }
                continue;
            }
            if let Err(error) = part.schema_ref.parse::<ReferenceKey>() {
                out.push(Diagnostic::error("malformed-schema-ref", error.to_string()).at(location));
            }
        }
    }
}

fn check_nodes(spec: &MapSpec, out: &mut Vec<Diagnostic>) {
    let mut seen = HashSet::new();
    for node in &spec.nodes {
        if !seen.insert(node.id.as_str()) {
            out.push(Diagnostic::error("duplicate-node-id", format!("node id `{}` is used more than once", node.id)).at(&node.id));
        }
    }
}

/// An endpoint is fine when it names a node, or a path rooted at a part of
/// the expected side. A side with no parts cannot be checked.
fn check_edges(spec: &MapSpec, out: &mut Vec<Diagnostic>) {
    let node_ids: HashSet<&str> = spec.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut targets: HashMap<String, usize> = HashMap::new();

    for (index, edge) in spec.edges.iter().enumerate() {
        let location = edge.id.clone().unwrap_or_else(|| format!("edges[{index}]"));

        if !node_ids.contains(edge.source.as_str()) {
            let raw = edge.source_handle.as_deref().unwrap_or(&edge.source);
            if !terminal_exists(spec, Side::Source, raw) {
                out.push(
                    Diagnostic::error("dangling-edge", format!("source `{raw}` is neither a node nor a source terminal"))
                        .at(&location),
                );
            }
        }
        if !node_ids.contains(edge.target.as_str()) {
            let raw = edge.target_handle.as_deref().unwrap_or(&edge.target);
            if !terminal_exists(spec, Side::Target, raw) {
                out.push(
                    Diagnostic::error("dangling-edge", format!("target `{raw}` is neither a node nor a target terminal"))
                        .at(&location),
                );
            }
            *targets.entry(SchemaPath::parse(raw).real().to_string()).or_default() += 1;
        }
    }

    let mut crowded: Vec<(String, usize)> = targets.into_iter().filter(|(_, n)| *n > 1).collect();
    crowded.sort();
    for (path, count) in crowded {
        out.push(
            Diagnostic::warning("duplicate-target", format!("`{path}` is driven by {count} edges; only the first is used"))
                .at(path),
        );
    }
}

fn terminal_exists(spec: &MapSpec, side: Side, raw: &str) -> bool {
    let parts = spec.parts(side);
    if parts.is_empty() {
        return true;
    }
    SchemaPath::parse(raw).first_property().is_some_and(|part| parts.contains_key(part))
}

fn check_cycles(spec: &MapSpec, out: &mut Vec<Diagnostic>) {
    let mut next: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in &spec.nodes {
        next.entry(node.id.as_str()).or_default();
    }
    for edge in &spec.edges {
        if next.contains_key(edge.target.as_str()) {
            if let Some(targets) = next.get_mut(edge.source.as_str()) {
                targets.push(edge.target.as_str());
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Active,
        Done,
    }
    fn visit<'a>(id: &'a str, next: &HashMap<&'a str, Vec<&'a str>>, marks: &mut HashMap<&'a str, Mark>, out: &mut Vec<Diagnostic>) {
        marks.insert(id, Mark::Active);
        for &child in next.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            match marks.get(child) {
                Some(Mark::Active) => out.push(
                    Diagnostic::error("cycle", format!("edge `{id}` → `{child}` closes a cycle")).at(child),
                ),
                Some(Mark::Done) => {}
                None => visit(child, next, marks, out),
            }
        }
        marks.insert(id, Mark::Done);
    }

    let mut marks = HashMap::new();
    for node in &spec.nodes {
        if !marks.contains_key(node.id.as_str()) {
            visit(node.id.as_str(), &next, &mut marks, out);
        }
    }
}

/// `metadata.contract.methods` lists method names (or `{ "name": ... }`);
/// with more than one, each needs an entry in `metadata.handlers`.
fn check_contract(spec: &MapSpec, out: &mut Vec<Diagnostic>) {
    let Some(methods) = spec.metadata.get("contract").and_then(|c| c.get("methods")).and_then(Value::as_array) else {
        return;
    };
    if methods.len() < 2 {
        return;
    }
    let handlers = spec.metadata.get("handlers");
    for method in methods {
        let name = match method {
            Value::String(s) => s.as_str(),
            other => match other.get("name").and_then(Value::as_str) {
                Some(name) => name,
                None => continue,
            },
        };
        let handled = match handlers {
            Some(Value::Object(map)) => map.contains_key(name),
            Some(Value::Array(list)) => list.iter().any(|h| {
                h.as_str() == Some(name) || h.get("method").and_then(Value::as_str) == Some(name)
            }),
            _ => false,
        };
        if !handled {
            out.push(
                Diagnostic::error("missing-handler", format!("contract method `{name}` has no handler"))
                    .at(format!("metadata.handlers.{name}")),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{has_errors, Severity};
    use serde_json::json;

    fn spec(v: Value) -> MapSpec {
        serde_json::from_value(v).unwrap()
    }

    fn codes(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    fn valid() -> Value {
        json!({
            "version": "1.2",
            "metadata": { "name": "orders" },
            "schemaParts": {
                "source": { "body": { "schemaRef": "custom", "schema": { "type": "object" } } },
                "target": { "body": { "schemaRef": "orders/outbound/order@2" } }
            },
            "nodes": [{ "id": "up", "kind": "String.Upper" }],
            "edges": [
                { "source": "body.name", "target": "up" },
                { "source": "up", "target": "body.name" }
            ]
        })
    }

    #[test]
    fn a_complete_spec_is_clean() {
        assert_eq!(validate(&spec(valid())), vec![]);
    }

    #[test]
    fn identity_fields() {
        let mut v = valid();
        v["version"] = json!("v1");
        v["metadata"] = json!({});
        let diagnostics = validate(&spec(v));
        assert_eq!(codes(&diagnostics), ["version-format", "missing-name"]);
        assert_eq!(diagnostics[0].severity, Severity::Info);

        let mut v = valid();
        v.as_object_mut().unwrap().remove("version");
        assert_eq!(codes(&validate(&spec(v))), ["missing-version"]);
    }

    #[test]
    fn parts_and_references() {
        let mut v = valid();
        v["schemaParts"]["target"] = json!({ "body": { "schemaRef": "orders/order" } });
        v["schemaParts"]["source"] = json!({});
        v["edges"] = json!([]);
        let diagnostics = validate(&spec(v));
        assert_eq!(codes(&diagnostics), ["empty-schema-parts", "malformed-schema-ref"]);
        assert!(has_errors(&diagnostics));
    }

    #[test]
    fn edges_must_land_somewhere() {
        let mut v = valid();
        v["edges"] = json!([
            { "source": "headers.x", "target": "up" },
            { "source": "up", "target": "body.a" },
            { "source": "up", "target": "body.a" },
            { "id": "e9", "source": "up", "target": "nowhere.b" }
        ]);
        let diagnostics = validate(&spec(v));
        assert_eq!(codes(&diagnostics), ["dangling-edge", "dangling-edge", "duplicate-target"]);
        assert_eq!(diagnostics[1].path.as_deref(), Some("e9"));
    }

    #[test]
    fn cycles_and_duplicate_ids() {
        let mut v = valid();
        v["nodes"] = json!([
            { "id": "a", "kind": "String.Upper" },
            { "id": "b", "kind": "String.Lower" },
            { "id": "b", "kind": "String.Trim" }
        ]);
        v["edges"] = json!([
            { "source": "a", "target": "b" },
            { "source": "b", "target": "a" },
            { "source": "a", "target": "body.x" }
        ]);
        assert_eq!(codes(&validate(&spec(v))), ["duplicate-node-id", "cycle"]);
    }

    #[test]
    fn multi_method_contracts_need_handlers() {
        let mut v = valid();
        v["metadata"] = json!({
            "name": "orders",
            "contract": { "methods": ["create", { "name": "cancel" }] },
            "handlers": { "create": {} }
        });
        let diagnostics = validate(&spec(v));
        assert_eq!(codes(&diagnostics), ["missing-handler"]);
        assert_eq!(diagnostics[0].path.as_deref(), Some("metadata.handlers.cancel"));

        let mut v = valid();
        v["metadata"] = json!({ "name": "orders", "contract": { "methods": ["create"] } });
        assert!(validate(&spec(v)).is_empty());
    }
}
