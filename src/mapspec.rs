//! The persisted mapper artifact: multi-part schemas plus a functoid graph.
pub mod kind;

use std::path::Path;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::MapSpecError;
use crate::reference::{is_embedded_ref, ReferenceKey, SchemaResolver};
use crate::schema::overlay::SchemaOverlay;

pub use kind::{Category, NodeKind};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Free-form authoring info (name, author, contract, handlers, ...).
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(default)]
    pub schema_parts: SchemaParts,
    #[serde(default)]
    pub schema_overlays: SchemaOverlays,
    #[serde(default)]
    pub nodes: Vec<MapSpecNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaParts {
    #[serde(default)]
    pub source: IndexMap<String, PartDefinition>,
    #[serde(default)]
    pub target: IndexMap<String, PartDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartDefinition {
    #[serde(default = "default_schema_ref")]
    pub schema_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

fn default_schema_ref() -> String {
    "custom".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaOverlays {
    #[serde(default)]
    pub source: Vec<SchemaOverlay>,
    #[serde(default)]
    pub target: Vec<SchemaOverlay>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSpecNode {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

/// `source`/`target` are node ids or terminal paths. For editor-style schema
/// nodes the path may instead sit in the handle (`source: "source-schema",
/// sourceHandle: "body.qty"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Source,
    Target,
}

/// A part whose schema is in hand (embedded or resolved).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPart {
    pub name: String,
    pub schema: Value,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Source => "source",
            Side::Target => "target",
        }
    }
}

impl MapSpec {
    pub fn parse(src: &str) -> Result<Self, MapSpecError> {
        crate::path_de::from_str_with_path("MapSpec", src)
    }

    pub fn from_file(path: &Path) -> Result<Self, MapSpecError> {
        crate::path_de::from_file_with_path("MapSpec", path)
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.get("name").and_then(Value::as_str)
    }

    pub fn parts(&self, side: Side) -> &IndexMap<String, PartDefinition> {
        match side {
            Side::Source => &self.schema_parts.source,
            Side::Target => &self.schema_parts.target,
        }
    }

    pub fn overlays(&self, side: Side) -> &[SchemaOverlay] {
        match side {
            Side::Source => &self.schema_overlays.source,
            Side::Target => &self.schema_overlays.target,
        }
    }

    pub fn node(&self, id: &str) -> Option<&MapSpecNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Resolve every part on `side` to a concrete schema. Parts that cannot be
    /// resolved are reported and skipped; a malformed reference key is the only
    /// hard failure.
    pub fn resolve_parts(
        &self,
        side: Side,
        resolver: &dyn SchemaResolver,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<Vec<ResolvedPart>, MapSpecError> {
        let mut out = Vec::new();
        for (name, part) in self.parts(side) {
            let location = format!("schemaParts.{}.{}", side.as_str(), name);
            if let Some(schema) = &part.schema {
                out.push(ResolvedPart { name: name.clone(), schema: schema.clone() });
                continue;
            }
            if is_embedded_ref(&part.schema_ref) {
                sink.emit(
                    Diagnostic::warning(
                        "missing-embedded-schema",
                        format!("part `{name}` is `{}` but carries no schema", part.schema_ref),
                    )
                    .at(location),
                );
                continue;
            }
            let key: ReferenceKey = part.schema_ref.parse()?;
            match resolver.resolve(&key) {
                Some(schema) => out.push(ResolvedPart { name: name.clone(), schema }),
                None => sink.emit(
                    Diagnostic::warning(
                        "unresolved-schema-ref",
                        format!("no schema found for `{key}`"),
                    )
                    .at(location),
                ),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{NoResolver, StaticResolver};
    use serde_json::json;

    fn sample() -> MapSpec {
        serde_json::from_value(json!({
            "version": "1.0",
            "metadata": { "name": "order-lines" },
            "schemaParts": {
                "source": {
                    "body": { "schemaRef": "custom", "schema": { "type": "object" } },
                    "headers": { "schemaRef": "sales/orders/headers@2" }
                },
                "target": { "body": { "schemaRef": "custom" } }
            },
            "nodes": [
                { "id": "n1", "kind": "Binary.Multiply", "position": { "x": 10, "y": 20 } },
                { "id": "n2", "kind": "Vendor.Magic", "config": { "a": 1 } }
            ],
            "edges": [
                { "source": "body.qty", "target": "n1", "targetHandle": "left" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn loads_editor_documents() {
        let spec = sample();
        assert_eq!(spec.name(), Some("order-lines"));
        assert_eq!(spec.nodes[0].kind, NodeKind::Multiply);
        assert_eq!(spec.nodes[1].kind, NodeKind::Unknown("Vendor.Magic".into()));
        assert_eq!(spec.edges[0].target_handle.as_deref(), Some("left"));
        assert_eq!(spec.parts(Side::Target)["body"].schema_ref, "custom");
    }

    #[test]
    fn resolve_parts_uses_resolver_and_reports_gaps() {
        let spec = sample();
        let mut sink: Vec<Diagnostic> = Vec::new();
        let resolver = StaticResolver::new().with(
            "sales/orders/headers@2".parse().unwrap(),
            json!({ "type": "object", "properties": { "id": { "type": "string" } } }),
        );
        let source = spec.resolve_parts(Side::Source, &resolver, &mut sink).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source[1].name, "headers");
        assert!(sink.is_empty());

        let source = spec.resolve_parts(Side::Source, &NoResolver, &mut sink).unwrap();
        assert_eq!(source.len(), 1);
        assert_eq!(sink[0].code, "unresolved-schema-ref");

        let target = spec.resolve_parts(Side::Target, &NoResolver, &mut sink).unwrap();
        assert!(target.is_empty());
        assert_eq!(sink[1].code, "missing-embedded-schema");
    }

    #[test]
    fn malformed_reference_is_a_hard_error() {
        let mut spec = sample();
        spec.schema_parts.source.get_mut("headers").unwrap().schema_ref = "not-a-key".into();
        let err = spec.resolve_parts(Side::Source, &NoResolver, &mut Vec::<Diagnostic>::new()).unwrap_err();
        assert!(matches!(err, MapSpecError::ReferenceKey(_)));
    }
}
