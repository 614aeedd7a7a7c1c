//! Schema overlays: out-of-band extensions applied without touching the
//! schema file.
//!
//! Overlays are grouped by scope (`metadata.schemaPath`). Within a scope,
//! plain overlays deep-merge into the scoped schema, and conditional overlays
//! (`if`/`then`) either merge into the existing conditional with the same
//! discriminator signature or are appended as a new `allOf` branch.
use std::collections::BTreeSet;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use super::compose::discriminator_signature;
use super::deep_merge;
use super::path::normalize_path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaOverlay {
    #[serde(rename = "$id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_clause: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<Value>,
    #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
    pub else_clause: Option<Value>,
    #[serde(default)]
    pub metadata: OverlayMetadata,
    /// The plain JSON Schema extension (`properties`, `required`, ...).
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayMetadata {
    /// Where in the part schema to apply: a JSON Pointer (`/properties/config`)
    /// or a dotted property path (`config`, `lines[]`). Root when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<String>,
    /// Full path of the leaf this overlay adds (`body.config.retries`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    /// Which schema part the overlay belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SchemaOverlay {
    pub fn is_conditional(&self) -> bool {
        self.if_clause.is_some() && (self.then.is_some() || self.else_clause.is_some())
    }

    pub fn scope(&self) -> &str {
        self.metadata.schema_path.as_deref().unwrap_or("")
    }

    fn extension(&self) -> Value {
        Value::Object(self.body.clone())
    }

    fn conditional_entry(&self) -> Value {
        let mut entry = Map::new();
        if let Some(v) = &self.if_clause {
            entry.insert("if".into(), v.clone());
        }
        if let Some(v) = &self.then {
            entry.insert("then".into(), v.clone());
        }
        if let Some(v) = &self.else_clause {
            entry.insert("else".into(), v.clone());
        }
        Value::Object(entry)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// MERGER
// ————————————————————————————————————————————————————————————————————————————

pub fn apply_overlays(base: &Value, overlays: &[SchemaOverlay], sink: &mut dyn DiagnosticSink) -> Value {
    let mut out = base.clone();

    let mut by_scope: IndexMap<&str, Vec<&SchemaOverlay>> = IndexMap::new();
    for overlay in overlays {
        by_scope.entry(overlay.scope()).or_default().push(overlay);
    }

    for (scope, group) in by_scope {
        let Some(target) = scope_mut(&mut out, scope) else {
            sink.emit(
                Diagnostic::warning(
                    "overlay-scope-not-found",
                    format!("overlay scope `{scope}` does not resolve to a schema; {} overlay(s) skipped", group.len()),
                )
                .at(scope),
            );
            continue;
        };
        let (conditional, plain): (Vec<&SchemaOverlay>, Vec<&SchemaOverlay>) =
            group.into_iter().partition(|o| o.is_conditional());

        for overlay in plain {
            deep_merge(target, &overlay.extension());
        }
        for overlay in conditional {
            merge_conditional(target, overlay);
        }
    }
    out
}

fn merge_conditional(target: &mut Value, overlay: &SchemaOverlay) {
    let signature = overlay.if_clause.as_ref().and_then(discriminator_signature);

    if let Some(signature) = &signature {
        // the scope's own if/then
        if target.get("if").and_then(discriminator_signature).as_ref() == Some(signature) {
            merge_arms(target, overlay);
            return;
        }
        if let Some(Value::Array(parts)) = target.get_mut("allOf") {
            let existing = parts.iter_mut().find(|part| {
                part.get("if").and_then(discriminator_signature).as_ref() == Some(signature)
            });
            if let Some(existing) = existing {
                merge_arms(existing, overlay);
                return;
            }
        }
    }

    let Some(obj) = target.as_object_mut() else { return };
    let all_of = obj.entry("allOf").or_insert_with(|| Value::Array(Vec::new()));
    if !all_of.is_array() {
        *all_of = Value::Array(Vec::new());
    }
    if let Value::Array(parts) = all_of {
        parts.push(overlay.conditional_entry());
    }
}

fn merge_arms(existing: &mut Value, overlay: &SchemaOverlay) {
    for (key, arm) in [("then", &overlay.then), ("else", &overlay.else_clause)] {
        let Some(arm) = arm else { continue };
        match existing.get_mut(key) {
            Some(current) => deep_merge(current, arm),
            None => existing[key] = arm.clone(),
        }
    }
}

/// Resolve an overlay scope to the schema node it names.
fn scope_mut<'a>(root: &'a mut Value, scope: &str) -> Option<&'a mut Value> {
    let scope = scope.trim();
    let node = if scope.is_empty() || scope == "/" || scope == "$" {
        Some(root)
    } else if scope.starts_with('/') {
        root.pointer_mut(scope)
    } else {
        let mut node = root;
        for token in normalize_path(scope).split('.').filter(|t| !t.is_empty()) {
            let mut name = token;
            let mut items = 0;
            while let Some(stripped) = name.strip_suffix("[]") {
                name = stripped;
                items += 1;
            }
            if !name.is_empty() {
                node = property_mut(node, name)?;
            }
            for _ in 0..items {
                node = node.get_mut("items")?;
            }
        }
        Some(node)
    }?;
    node.is_object().then_some(node)
}

/// A property declared directly or inside a composition part or branch;
/// direct declarations win, then parts in document order.
fn property_mut<'a>(node: &'a mut Value, name: &str) -> Option<&'a mut Value> {
    let route = declaring_route(node, name)?;
    let mut node = node;
    for (key, index) in route {
        node = node.get_mut(key)?;
        if let Some(index) = index {
            node = node.get_mut(index)?;
        }
    }
    node.get_mut("properties")?.get_mut(name)
}

fn declaring_route(node: &Value, name: &str) -> Option<Vec<(&'static str, Option<usize>)>> {
    if node.get("properties").and_then(|p| p.get(name)).is_some() {
        return Some(Vec::new());
    }
    for key in ["allOf", "anyOf", "oneOf"] {
        let Some(Value::Array(parts)) = node.get(key) else { continue };
        for (index, part) in parts.iter().enumerate() {
            if let Some(mut route) = declaring_route(part, name) {
                route.insert(0, (key, Some(index)));
                return Some(route);
            }
        }
    }
    for key in ["then", "else"] {
        if let Some(mut route) = node.get(key).and_then(|branch| declaring_route(branch, name)) {
            route.insert(0, (key, None));
            return Some(route);
        }
    }
    None
}

/// `metadata.targetPath` of every non-conditional overlay, normalized (no `$.` root).
pub fn user_added_paths(overlays: &[SchemaOverlay]) -> BTreeSet<String> {
    overlays
        .iter()
        .filter(|o| !o.is_conditional())
        .filter_map(|o| o.metadata.target_path.as_deref())
        .map(|p| normalize_path(p).to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Pick the overlays that apply to `part`: an explicit `metadata.part`, else a
/// `targetPath` starting with the part name, else the first part on the side.
pub fn overlays_for_part<'a>(overlays: &'a [SchemaOverlay], part: &str, part_names: &[&str]) -> Vec<&'a SchemaOverlay> {
    overlays
        .iter()
        .filter(|o| {
            if let Some(explicit) = o.metadata.part.as_deref() {
                return explicit == part;
            }
            let named = o
                .metadata
                .target_path
                .as_deref()
                .map(normalize_path)
                .and_then(|p| p.split('.').next())
                .map(|head| head.trim_end_matches("[]"))
                .filter(|head| part_names.contains(head));
            match named {
                Some(head) => head == part,
                None => part_names.first() == Some(&part),
            }
        })
        .collect()
}
