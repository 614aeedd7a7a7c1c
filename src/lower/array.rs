//! Array grouping.
//!
//! Targets below an array indicator (`out.lines[].sku`) cannot be assigned one
//! by one; every mapping sharing an array base becomes a single `map` call
//! over a source array, with element fields rewritten to an item scope.
//! Nested arrays recurse with the next scope (`$item1`, ...).
use indexmap::IndexMap;

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::ir::{item_scope, Expression, Mapping, SharedExpression};
use crate::schema::{PathSegment, SchemaPath};

type Entry = (SchemaPath, Expression);

pub fn group_mappings(entries: Vec<Entry>, shared: &[SharedExpression], sink: &mut dyn DiagnosticSink) -> Vec<Mapping> {
    let level = Level { depth: 0, parent_scope: None };
    group_level(entries, &level, shared, sink)
        .into_iter()
        .map(|(target, expression)| Mapping { target: target.to_string(), expression })
        .collect()
}

struct Level<'s> {
    depth: usize,
    parent_scope: Option<&'s str>,
}

enum Slot {
    Single(Entry),
    Group { base: SchemaPath, members: Vec<Entry> },
}

/// Collapse every array group at this level; the result has no `[]` targets.
/// Output order is first appearance (a group sits where its first member was).
fn group_level(entries: Vec<Entry>, level: &Level<'_>, shared: &[SharedExpression], sink: &mut dyn DiagnosticSink) -> Vec<Entry> {
    let mut slots: Vec<Slot> = Vec::new();
    let mut group_index: IndexMap<SchemaPath, usize> = IndexMap::new();

    for (target, expression) in entries {
        let Some((base, rest)) = target.split_first_items() else {
            slots.push(Slot::Single((target, expression)));
            continue;
        };
        match group_index.get(&base) {
            Some(&at) => {
                if let Slot::Group { members, .. } = &mut slots[at] {
                    members.push((rest, expression));
                }
            }
            None => {
                group_index.insert(base.clone(), slots.len());
                slots.push(Slot::Group { base, members: vec![(rest, expression)] });
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| match slot {
            Slot::Single(entry) => entry,
            Slot::Group { base, members } => {
                let expression = build_group(&base, members, level, shared, sink);
                (base, expression)
            }
        })
        .collect()
}

fn build_group(
    base: &SchemaPath,
    mut members: Vec<Entry>,
    level: &Level<'_>,
    shared: &[SharedExpression],
    sink: &mut dyn DiagnosticSink,
) -> Expression {
    let scope = item_scope(level.depth);
    let source = match members.iter().find_map(|(_, e)| find_source_array(e, shared)) {
        Some(source) => source,
        None => {
            let fallback = match level.parent_scope {
                Some(parent) => SchemaPath::parse(parent).concat(base),
                None => base.clone(),
            };
            sink.emit(
                Diagnostic::warning(
                    "array-source-not-inferred",
                    format!("no source array feeds `{base}[]`; iterating `{fallback}`"),
                )
                .at(base.to_string()),
            );
            fallback
        }
    };

    let scoped = source.items();
    for (_, expression) in &mut members {
        expression.rewrite_fields(&mut |path| rescope(path, &scoped, &scope));
    }

    let inner = Level { depth: level.depth + 1, parent_scope: Some(&scope) };
    let members = group_level(members, &inner, shared, sink);
    Expression::array_map(source.to_string(), &scope, element_expression(base, members, sink))
}

/// `source.items[].x` under scope `$item` → `$item.x`.
fn rescope(path: &str, scoped: &SchemaPath, scope: &str) -> Option<String> {
    let rest = SchemaPath::parse(path).strip_prefix(scoped)?;
    Some(SchemaPath::from_segments(vec![PathSegment::Property(scope.to_string())]).concat(&rest).to_string())
}

/// First field path crossing an array boundary, searching left operands and
/// first arguments before the rest. Returns the array's base path.
fn find_source_array(expression: &Expression, shared: &[SharedExpression]) -> Option<SchemaPath> {
    match expression {
        Expression::Field { path } => SchemaPath::parse(path).split_first_items().map(|(base, _)| base),
        Expression::SharedRef { var_name } => shared
            .iter()
            .find(|s| &s.var_name == var_name)
            .and_then(|s| find_source_array(&s.expression, shared)),
        other => other.children().into_iter().find_map(|child| find_source_array(child, shared)),
    }
}

/// Nest element members into an object tree keyed by their remaining path.
/// A member with an empty path is the element itself (primitive arrays).
fn element_expression(base: &SchemaPath, members: Vec<Entry>, sink: &mut dyn DiagnosticSink) -> Expression {
    let mut scalar: Option<Expression> = None;
    let mut properties: IndexMap<String, Expression> = IndexMap::new();

    for (rest, expression) in members {
        let names = rest.property_names();
        if names.is_empty() {
            if scalar.is_none() {
                scalar = Some(expression);
            }
            continue;
        }
        if !insert_nested(&mut properties, &names, expression) {
            sink.emit(
                Diagnostic::warning(
                    "array-element-conflict",
                    format!("`{base}[].{rest}` collides with a value mapped to one of its parents"),
                )
                .at(format!("{base}[].{rest}")),
            );
        }
    }

    match scalar {
        Some(element) => {
            if !properties.is_empty() {
                sink.emit(
                    Diagnostic::warning(
                        "array-element-conflict",
                        format!("`{base}[]` is mapped as a whole and field by field; keeping the whole element"),
                    )
                    .at(format!("{base}[]")),
                );
            }
            element
        }
        None => Expression::Object { properties },
    }
}

pub(crate) fn insert_nested(properties: &mut IndexMap<String, Expression>, names: &[&str], expression: Expression) -> bool {
    let Some((head, tail)) = names.split_first() else { return false };
    if tail.is_empty() {
        if properties.contains_key(*head) {
            return false;
        }
        properties.insert(head.to_string(), expression);
        return true;
    }
    let slot = properties
        .entry(head.to_string())
        .or_insert_with(|| Expression::Object { properties: IndexMap::new() });
    match slot {
        Expression::Object { properties } => insert_nested(properties, tail, expression),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Function};
    use serde_json::json;

    fn entry(target: &str, expression: Expression) -> Entry {
        (SchemaPath::parse(target), expression)
    }

    fn object(pairs: Vec<(&str, Expression)>) -> Expression {
        Expression::Object { properties: pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect() }
    }

    #[test]
    fn groups_sibling_fields_into_one_projection() {
        let mut sink: Vec<Diagnostic> = Vec::new();
        let mappings = group_mappings(
            vec![
                entry("out.id", Expression::field("in.id")),
                entry("out.items[].a", Expression::field("source.items[].x")),
                entry("out.total", Expression::call(Function::Sum, vec![Expression::field("source.items[].y")])),
                entry("out.items[].b", Expression::field("source.items[].y")),
            ],
            &[],
            &mut sink,
        );
        assert!(sink.is_empty());
        let targets: Vec<&str> = mappings.iter().map(|m| m.target.as_str()).collect();
        assert_eq!(targets, ["out.id", "out.items", "out.total"]);
        assert_eq!(
            mappings[1].expression,
            Expression::array_map(
                "source.items",
                "$item",
                object(vec![("a", Expression::field("$item.x")), ("b", Expression::field("$item.y"))])
            )
        );
        // Aggregates outside the group keep their full path.
        assert_eq!(mappings[2].expression, Expression::call(Function::Sum, vec![Expression::field("source.items[].y")]));
    }

    #[test]
    fn nested_arrays_get_nested_scopes() {
        let mut sink: Vec<Diagnostic> = Vec::new();
        let mappings = group_mappings(
            vec![
                entry("out.orders[].ref", Expression::field("in.orders[].id")),
                entry("out.orders[].lines[].code", Expression::field("in.orders[].lines[].sku")),
                entry(
                    "out.orders[].lines[].total",
                    Expression::binary(
                        BinaryOp::Multiply,
                        Expression::field("in.orders[].lines[].qty"),
                        Expression::field("in.orders[].lines[].price"),
                    ),
                ),
            ],
            &[],
            &mut sink,
        );
        assert!(sink.is_empty());
        assert_eq!(mappings.len(), 1);
        let lines = Expression::array_map(
            "$item.lines",
            "$item1",
            object(vec![
                ("code", Expression::field("$item1.sku")),
                (
                    "total",
                    Expression::binary(BinaryOp::Multiply, Expression::field("$item1.qty"), Expression::field("$item1.price")),
                ),
            ]),
        );
        assert_eq!(
            mappings[0].expression,
            Expression::array_map("in.orders", "$item", object(vec![("ref", Expression::field("$item.id")), ("lines", lines)]))
        );
    }

    #[test]
    fn source_inference_follows_shared_refs_and_falls_back() {
        let shared = vec![SharedExpression {
            var_name: "upper1".into(),
            expression: Expression::call(Function::Upper, vec![Expression::field("in.tags[]")]),
        }];
        let mut sink: Vec<Diagnostic> = Vec::new();
        let mappings = group_mappings(
            vec![
                entry("out.tags[]", Expression::shared_ref("upper1")),
                entry("out.fixed[].kind", Expression::literal(json!("static"))),
            ],
            &shared,
            &mut sink,
        );
        assert_eq!(mappings[0].expression.as_array_map().unwrap().source, "in.tags");
        assert!(matches!(mappings[0].expression.as_array_map().unwrap().element, Expression::SharedRef { .. }));

        let fixed = mappings[1].expression.as_array_map().unwrap();
        assert_eq!(fixed.source, "out.fixed");
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].code, "array-source-not-inferred");
    }

    #[test]
    fn nested_element_paths_build_object_trees() {
        let mut sink: Vec<Diagnostic> = Vec::new();
        let mappings = group_mappings(
            vec![
                entry("out.people[].address.city", Expression::field("in.people[].city")),
                entry("out.people[].address.zip", Expression::field("in.people[].zip")),
            ],
            &[],
            &mut sink,
        );
        let view = mappings[0].expression.as_array_map().unwrap();
        assert_eq!(
            view.element,
            &object(vec![(
                "address",
                object(vec![("city", Expression::field("$item.city")), ("zip", Expression::field("$item.zip"))])
            )])
        );
    }
}
