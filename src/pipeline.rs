//! End-to-end compilation of one MapSpec.
//!
//! resolve parts → apply overlays → resolve composition → tree/terminals →
//! lower → generate. Every stage reports into the same diagnostics list; only
//! a malformed reference key aborts.
use serde::Serialize;
use serde_json::Value;

use crate::codegen::{generate_declarative, generate_structural, GeneratorOptions};
use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::error::MapSpecError;
use crate::ir::MapperIr;
use crate::lower::{lower, KnownTerminals};
use crate::mapspec::{MapSpec, Side};
use crate::reference::SchemaResolver;
use crate::schema::overlay::{overlays_for_part, user_added_paths};
use crate::schema::{apply_overlays, build_tree, flatten, resolve_composition, SchemaOverlay, SchemaPath, Terminal, TreeNode};

/// One schema part after overlays and composition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedPart {
    pub name: String,
    pub schema: Value,
    pub tree: TreeNode,
    pub terminals: Vec<Terminal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    pub ir: MapperIr,
    pub structural: String,
    pub declarative: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Prepare every resolvable part on one side, in declaration order.
///
/// With `with_overlays` unset the raw (composed) schema is returned, which
/// is what the `schema --no-overlays` view shows.
pub fn prepare_side(
    spec: &MapSpec,
    side: Side,
    resolver: &dyn SchemaResolver,
    with_overlays: bool,
    sink: &mut dyn DiagnosticSink,
) -> Result<Vec<PreparedPart>, MapSpecError> {
    let resolved = spec.resolve_parts(side, resolver, sink)?;
    let part_names: Vec<&str> = spec.parts(side).keys().map(String::as_str).collect();
    let mut out = Vec::with_capacity(resolved.len());

    for part in resolved {
        let overlays: Vec<SchemaOverlay> = if with_overlays {
            overlays_for_part(spec.overlays(side), &part.name, &part_names).into_iter().cloned().collect()
        } else {
            Vec::new()
        };
        let extended = apply_overlays(&part.schema, &overlays, sink);
        let schema = resolve_composition(&extended, sink);
        let root = SchemaPath::root().property(&part.name);
        let tree = build_tree(&schema, &root, &user_added_paths(&overlays));
        let terminals = flatten(&schema, &root);
        tracing::debug!(
            side = side.as_str(),
            part = %part.name,
            overlays = overlays.len(),
            terminals = terminals.len(),
            "prepared schema part"
        );
        out.push(PreparedPart { name: part.name, schema, tree, terminals });
    }
    Ok(out)
}

/// Parts that could not be resolved stay registered but unchecked, so edges
/// into them are lowered without path warnings.
pub fn known_terminals(spec: &MapSpec, source: &[PreparedPart], target: &[PreparedPart]) -> KnownTerminals {
    let mut known = KnownTerminals::new();
    for (side, prepared) in [(Side::Source, source), (Side::Target, target)] {
        for name in spec.parts(side).keys() {
            match prepared.iter().find(|p| &p.name == name) {
                Some(part) => known.insert_tree(side, name.clone(), &part.tree),
                None => known.insert_part(side, name.clone(), None),
            }
        }
    }
    known
}

/// Schema preparation and lowering, without code generation.
pub fn lower_spec(
    spec: &MapSpec,
    resolver: &dyn SchemaResolver,
    sink: &mut dyn DiagnosticSink,
) -> Result<MapperIr, MapSpecError> {
    let source = prepare_side(spec, Side::Source, resolver, true, sink)?;
    let target = prepare_side(spec, Side::Target, resolver, true, sink)?;
    let known = known_terminals(spec, &source, &target);
    let ir = lower(spec, &known, sink);
    tracing::debug!(
        mappings = ir.mappings.len(),
        shared = ir.shared_expressions.len(),
        "lowered mapspec"
    );
    Ok(ir)
}

pub fn compile(
    spec: &MapSpec,
    resolver: &dyn SchemaResolver,
    options: &GeneratorOptions,
) -> Result<Compilation, MapSpecError> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let ir = lower_spec(spec, resolver, &mut diagnostics)?;
    let structural = generate_structural(&ir, options, spec.name());
    let declarative = generate_declarative(&ir, options, spec.name());
    for diagnostic in &diagnostics {
        TracingSink.emit(diagnostic.clone());
    }
    tracing::info!(
        name = spec.name().unwrap_or("(unnamed)"),
        diagnostics = diagnostics.len(),
        "compiled mapspec"
    );
    Ok(Compilation { ir, structural, declarative, diagnostics })
}
