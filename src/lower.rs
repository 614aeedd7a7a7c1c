//! MapSpec graph → MapperIR.
//!
//! Every edge ending at a target terminal is resolved by walking backward
//! through the functoid graph. Each node is lowered once; nodes read by more
//! than one consumer are hoisted into `sharedExpressions` and referenced via
//! `sharedRef`. Array-indicator targets are then grouped (see [`array`]).
pub mod array;
pub mod graph;

use std::collections::{BTreeSet, HashMap, HashSet};
use indexmap::IndexMap;
use serde_json::Value;

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::ir::{BinaryOp, Expression, Function, MapperIr, SharedExpression, UnaryOp};
use crate::mapspec::{Edge, MapSpec, MapSpecNode, NodeKind, Side};
use crate::schema::{literal_text, SchemaPath, TreeNode};

use graph::{Endpoint, FunctoidGraph};

// ————————————————————————————————————————————————————————————————————————————
// KNOWN TERMINALS
// ————————————————————————————————————————————————————————————————————————————

/// Addressable paths per part, used to flag edges that point at nothing.
///
/// A part registered without a schema is unchecked; so is a side with no
/// parts registered at all.
#[derive(Debug, Clone, Default)]
pub struct KnownTerminals {
    source: IndexMap<String, Option<BTreeSet<String>>>,
    target: IndexMap<String, Option<BTreeSet<String>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathCheck {
    Known,
    Unchecked,
    UnknownPart,
    UnknownPath,
}

impl KnownTerminals {
    pub fn new() -> Self {
        Self::default()
    }

    fn side_mut(&mut self, side: Side) -> &mut IndexMap<String, Option<BTreeSet<String>>> {
        match side {
            Side::Source => &mut self.source,
            Side::Target => &mut self.target,
        }
    }

    pub fn insert_part(&mut self, side: Side, part: impl Into<String>, paths: Option<BTreeSet<String>>) {
        self.side_mut(side).insert(part.into(), paths);
    }

    /// Register every real path of a part's tree (containers included, so
    /// an aggregate may read a whole array).
    pub fn insert_tree(&mut self, side: Side, part: impl Into<String>, tree: &TreeNode) {
        let mut paths = BTreeSet::new();
        collect_real_paths(tree, &mut paths);
        self.insert_part(side, part, Some(paths));
    }

    pub fn check(&self, side: Side, path: &SchemaPath) -> PathCheck {
        let parts = match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        };
        if parts.is_empty() {
            return PathCheck::Unchecked;
        }
        let Some(part) = path.first_property() else { return PathCheck::UnknownPart };
        match parts.get(part) {
            None => PathCheck::UnknownPart,
            Some(None) => PathCheck::Unchecked,
            Some(Some(paths)) if paths.contains(&path.real().to_string()) => PathCheck::Known,
            Some(Some(_)) => PathCheck::UnknownPath,
        }
    }
}

fn collect_real_paths(node: &TreeNode, out: &mut BTreeSet<String>) {
    out.insert(node.real_path.clone());
    for child in &node.children {
        collect_real_paths(child, out);
    }
}

// ————————————————————————————————————————————————————————————————————————————
// ENTRY POINT
// ————————————————————————————————————————————————————————————————————————————

pub fn lower(spec: &MapSpec, known: &KnownTerminals, sink: &mut dyn DiagnosticSink) -> MapperIr {
    let graph = FunctoidGraph::new(spec);
    let mut lowerer = Lowerer::new(&graph, known, sink);
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for (target, edge) in graph.target_edges() {
        let real = target.real();
        let key = real.to_string();
        if !seen.insert(key.clone()) {
            lowerer.warn(
                Diagnostic::warning("duplicate-target", format!("`{key}` is driven by more than one edge; keeping the first"))
                    .at(key),
            );
            continue;
        }
        match known.check(Side::Target, &real) {
            PathCheck::UnknownPart | PathCheck::UnknownPath => lowerer.warn(
                Diagnostic::warning("unknown-target-path", format!("`{key}` is not a terminal of the target schema")).at(&key),
            ),
            PathCheck::Known | PathCheck::Unchecked => {}
        }
        let expression = lowerer.lower_source(*edge);
        entries.push((real, expression));
    }

    let shared_expressions = lowerer.finish();
    let mappings = array::group_mappings(entries, &shared_expressions, sink);
    MapperIr { mappings, shared_expressions }
}

// ————————————————————————————————————————————————————————————————————————————
// LOWERER
// ————————————————————————————————————————————————————————————————————————————

struct Lowerer<'g, 'a> {
    graph: &'g FunctoidGraph<'a>,
    known: &'g KnownTerminals,
    sink: &'g mut dyn DiagnosticSink,
    memo: HashMap<&'a str, Expression>,
    visiting: HashSet<&'a str>,
    shared: Vec<SharedExpression>,
    name_counters: HashMap<String, usize>,
}

impl<'g, 'a> Lowerer<'g, 'a> {
    fn new(graph: &'g FunctoidGraph<'a>, known: &'g KnownTerminals, sink: &'g mut dyn DiagnosticSink) -> Self {
        Self {
            graph,
            known,
            sink,
            memo: HashMap::new(),
            visiting: HashSet::new(),
            shared: Vec::new(),
            name_counters: HashMap::new(),
        }
    }

    fn warn(&mut self, diagnostic: Diagnostic) {
        self.sink.emit(diagnostic);
    }

    fn finish(self) -> Vec<SharedExpression> {
        self.shared
    }

    fn lower_source(&mut self, edge: &'a Edge) -> Expression {
        match self.graph.source_endpoint(edge) {
            Endpoint::Node(node) => self.lower_node(node),
            Endpoint::Terminal(path) => self.lower_terminal(&path),
        }
    }

    fn lower_terminal(&mut self, path: &SchemaPath) -> Expression {
        let real = path.real();
        let text = real.to_string();
        match self.known.check(Side::Source, &real) {
            PathCheck::Known | PathCheck::Unchecked => Expression::field(text),
            PathCheck::UnknownPart => {
                self.warn(Diagnostic::warning("unknown-source-part", format!("no source part for `{text}`")).at(&text));
                unresolved_field(&text)
            }
            PathCheck::UnknownPath => {
                self.warn(
                    Diagnostic::warning("unknown-source-path", format!("`{text}` is not a terminal of the source schema"))
                        .at(&text),
                );
                unresolved_field(&text)
            }
        }
    }

    fn lower_node(&mut self, node: &'a MapSpecNode) -> Expression {
        let id = node.id.as_str();
        if let Some(done) = self.memo.get(id) {
            return done.clone();
        }
        if !self.visiting.insert(id) {
            self.warn(Diagnostic::error("cycle", format!("node `{id}` depends on itself")).at(id));
            return Expression::null();
        }

        let graph = self.graph;
        let args: Vec<Expression> = graph.inputs(id).iter().map(|&edge| self.lower_source(edge)).collect();
        let expression = self.lower_kind(node, args);
        self.visiting.remove(id);

        // Array-item expressions only make sense inside their element scope;
        // an aggregate over an array is element-free unless it feeds an array
        // target, where its fields get rescoped per element.
        let hoist = graph.consumers(id) > 1
            && !expression.has_free_array_items()
            && !(expression.references_array_items() && graph.feeds_array_target(id));
        let result = if hoist {
            let var_name = self.fresh_name(&node.kind);
            self.shared.push(SharedExpression { var_name: var_name.clone(), expression });
            Expression::shared_ref(var_name)
        } else {
            expression
        };
        self.memo.insert(id, result.clone());
        result
    }

    fn fresh_name(&mut self, kind: &NodeKind) -> String {
        let slug = kind.slug();
        let counter = self.name_counters.entry(slug.clone()).or_default();
        *counter += 1;
        format!("{slug}{counter}")
    }

    // ————————————————————————————————————————————————————————————————————————
    // NODE KINDS
    // ————————————————————————————————————————————————————————————————————————

    fn lower_kind(&mut self, node: &MapSpecNode, args: Vec<Expression>) -> Expression {
        use NodeKind as K;
        match &node.kind {
            K::Add => self.binary(node, BinaryOp::Add, args),
            K::Subtract => self.binary(node, BinaryOp::Subtract, args),
            K::Multiply => self.binary(node, BinaryOp::Multiply, args),
            K::Divide => self.binary(node, BinaryOp::Divide, args),
            K::Modulo => self.binary(node, BinaryOp::Modulo, args),
            K::Power => self.binary(node, BinaryOp::Power, args),
            K::Equal => self.binary(node, BinaryOp::Equal, args),
            K::NotEqual => self.binary(node, BinaryOp::NotEqual, args),
            K::GreaterThan => self.binary(node, BinaryOp::GreaterThan, args),
            K::GreaterThanOrEqual => self.binary(node, BinaryOp::GreaterThanOrEqual, args),
            K::LessThan => self.binary(node, BinaryOp::LessThan, args),
            K::LessThanOrEqual => self.binary(node, BinaryOp::LessThanOrEqual, args),
            K::And => self.binary(node, BinaryOp::And, args),
            K::Or => self.binary(node, BinaryOp::Or, args),
            K::Coalesce => self.binary(node, BinaryOp::Coalesce, args),
            K::Negate => {
                let operand = self.take(node, &args, 0, "value");
                Expression::unary(UnaryOp::Negate, operand)
            }
            K::Not => {
                let operand = self.take(node, &args, 0, "value");
                Expression::unary(UnaryOp::Not, operand)
            }

            K::Abs => self.unary_call(node, Function::Abs, &args),
            K::Floor => self.unary_call(node, Function::Floor, &args),
            K::Ceil => self.unary_call(node, Function::Ceil, &args),
            K::Sqrt => self.unary_call(node, Function::Sqrt, &args),
            K::Round => {
                let mut call_args = vec![self.take(node, &args, 0, "value")];
                call_args.extend(param(node, &args, 1, "decimals"));
                Expression::call(Function::Round, call_args)
            }
            K::Min => self.variadic(node, Function::Min, args),
            K::Max => self.variadic(node, Function::Max, args),

            K::Concat => self.variadic(node, Function::Concat, args),
            K::Upper => self.unary_call(node, Function::Upper, &args),
            K::Lower => self.unary_call(node, Function::Lower, &args),
            K::Trim => self.unary_call(node, Function::Trim, &args),
            K::Length => self.unary_call(node, Function::Length, &args),
            K::Substring => {
                let mut call_args = vec![
                    self.take(node, &args, 0, "value"),
                    param(node, &args, 1, "start").unwrap_or_else(|| Expression::literal(Value::from(0))),
                ];
                call_args.extend(param(node, &args, 2, "length"));
                Expression::call(Function::Substring, call_args)
            }
            K::Replace => {
                let value = self.take(node, &args, 0, "value");
                let pattern = param(node, &args, 1, "pattern").unwrap_or_else(|| Expression::string(""));
                let replacement = param(node, &args, 2, "replacement").unwrap_or_else(|| Expression::string(""));
                Expression::call(Function::Replace, vec![value, pattern, replacement])
            }
            K::Split => self.with_separator(node, Function::Split, &args),
            K::Join => self.with_separator(node, Function::Join, &args),
            K::Contains => self.with_operand(node, Function::Contains, &args),
            K::StartsWith => self.with_operand(node, Function::StartsWith, &args),
            K::EndsWith => self.with_operand(node, Function::EndsWith, &args),
            K::PadLeft => {
                let value = self.take(node, &args, 0, "value");
                let width = param(node, &args, 1, "width").unwrap_or_else(|| Expression::literal(Value::from(0)));
                let pad = param(node, &args, 2, "padChar").unwrap_or_else(|| Expression::string(" "));
                Expression::call(Function::PadLeft, vec![value, width, pad])
            }

            K::IfElse => {
                let condition = self.take(node, &args, 0, "condition");
                let then = self.take(node, &args, 1, "then");
                let else_ = args.get(2).cloned().unwrap_or_else(Expression::null);
                Expression::conditional(condition, then, else_)
            }
            K::IsNull => self.unary_call(node, Function::IsNull, &args),
            K::IsEmpty => self.unary_call(node, Function::IsEmpty, &args),

            K::Distinct => self.unary_call(node, Function::Distinct, &args),
            K::First => self.unary_call(node, Function::First, &args),
            K::Last => self.unary_call(node, Function::Last, &args),
            K::Reverse => self.unary_call(node, Function::Reverse, &args),
            K::Sort => self.unary_call(node, Function::Sort, &args),
            K::Flatten => self.unary_call(node, Function::Flatten, &args),

            K::Sum => self.unary_call(node, Function::Sum, &args),
            K::Average => self.unary_call(node, Function::Average, &args),
            K::MinOf => self.unary_call(node, Function::MinOf, &args),
            K::MaxOf => self.unary_call(node, Function::MaxOf, &args),
            K::Count => self.unary_call(node, Function::Count, &args),

            K::ToString => self.unary_call(node, Function::ToString, &args),
            K::ToNumber => self.unary_call(node, Function::ToNumber, &args),
            K::ToInteger => self.unary_call(node, Function::ToInteger, &args),
            K::ToBoolean => self.unary_call(node, Function::ToBoolean, &args),
            K::ParseJson => self.unary_call(node, Function::ParseJson, &args),
            K::ToJson => self.unary_call(node, Function::ToJson, &args),

            K::Now => Expression::call(Function::Now, Vec::new()),
            K::FormatDate => self.with_format(node, Function::FormatDate, &args),
            K::ParseDate => self.with_format(node, Function::ParseDate, &args),
            K::AddDays => {
                let value = self.take(node, &args, 0, "value");
                let days = param(node, &args, 1, "days").unwrap_or_else(|| Expression::literal(Value::from(0)));
                Expression::call(Function::AddDays, vec![value, days])
            }
            K::ToUnix => self.unary_call(node, Function::ToUnix, &args),

            K::StringConstant => match node.config.get("value") {
                Some(Value::Null) | None => Expression::string(""),
                Some(v) => Expression::string(literal_text(v)),
            },
            K::NumberConstant => self.number_constant(node),
            K::BooleanConstant => {
                let value = match node.config.get("value") {
                    Some(Value::Bool(b)) => *b,
                    Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
                    _ => false,
                };
                Expression::literal(Value::Bool(value))
            }
            K::NullConstant => Expression::null(),

            K::CustomFunction => {
                let name = node.config.get("functionName").or_else(|| node.config.get("name")).and_then(Value::as_str);
                match name.filter(|n| !n.is_empty()) {
                    Some(name) => Expression::call(Function::Custom(name.to_string()), args),
                    None => {
                        self.warn(
                            Diagnostic::warning("custom-function-unnamed", format!("node `{}` has no `functionName`", node.id))
                                .at(&node.id),
                        );
                        unsupported(&node.kind, args, &node.config)
                    }
                }
            }
            K::CustomExpression => match node.config.get("expression").and_then(Value::as_str) {
                Some(text) => {
                    let mut call_args = vec![Expression::string(text)];
                    call_args.extend(args);
                    Expression::call(Function::Inline, call_args)
                }
                None => {
                    self.warn(
                        Diagnostic::warning("custom-expression-empty", format!("node `{}` has no `expression`", node.id))
                            .at(&node.id),
                    );
                    unsupported(&node.kind, args, &node.config)
                }
            },

            K::Unknown(raw) => {
                self.warn(
                    Diagnostic::warning("unknown-functoid", format!("node `{}` has unknown kind `{raw}`", node.id)).at(&node.id),
                );
                unsupported(&node.kind, args, &node.config)
            }
        }
    }

    /// Input `index`, or a null placeholder plus a warning.
    fn take(&mut self, node: &MapSpecNode, args: &[Expression], index: usize, port: &str) -> Expression {
        match args.get(index) {
            Some(arg) => arg.clone(),
            None => {
                self.warn(
                    Diagnostic::warning(
                        "missing-input",
                        format!("node `{}` ({}) has nothing wired to `{port}`", node.id, node.kind),
                    )
                    .at(&node.id),
                );
                Expression::null()
            }
        }
    }

    /// Left fold; extra inputs extend the chain (`a + b + c`).
    fn binary(&mut self, node: &MapSpecNode, op: BinaryOp, args: Vec<Expression>) -> Expression {
        let left = self.take(node, &args, 0, "left");
        let right = self.take(node, &args, 1, "right");
        args.into_iter()
            .skip(2)
            .fold(Expression::binary(op, left, right), |acc, next| Expression::binary(op, acc, next))
    }

    fn unary_call(&mut self, node: &MapSpecNode, function: Function, args: &[Expression]) -> Expression {
        let value = self.take(node, args, 0, "value");
        Expression::call(function, vec![value])
    }

    fn variadic(&mut self, node: &MapSpecNode, function: Function, args: Vec<Expression>) -> Expression {
        if args.is_empty() {
            let value = self.take(node, &args, 0, "input-0");
            return Expression::call(function, vec![value]);
        }
        Expression::call(function, args)
    }

    fn with_separator(&mut self, node: &MapSpecNode, function: Function, args: &[Expression]) -> Expression {
        let value = self.take(node, args, 0, "value");
        let separator = param(node, args, 1, "separator").unwrap_or_else(|| Expression::string(","));
        Expression::call(function, vec![value, separator])
    }

    fn with_operand(&mut self, node: &MapSpecNode, function: Function, args: &[Expression]) -> Expression {
        let value = self.take(node, args, 0, "value");
        let operand = match param(node, args, 1, "value") {
            Some(operand) => operand,
            None => self.take(node, args, 1, "operand"),
        };
        Expression::call(function, vec![value, operand])
    }

    fn with_format(&mut self, node: &MapSpecNode, function: Function, args: &[Expression]) -> Expression {
        let value = self.take(node, args, 0, "value");
        let format = param(node, args, 1, "format").unwrap_or_else(|| Expression::string(DEFAULT_DATE_FORMAT));
        Expression::call(function, vec![value, format])
    }

    fn number_constant(&mut self, node: &MapSpecNode) -> Expression {
        let parsed = match node.config.get("value") {
            Some(Value::Number(n)) => Some(Value::Number(n.clone())),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .ok()
                .or_else(|| s.trim().parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number)),
            _ => None,
        };
        match parsed {
            Some(value) => Expression::literal(value),
            None => {
                self.warn(
                    Diagnostic::warning("invalid-constant", format!("node `{}` has no numeric `value`", node.id)).at(&node.id),
                );
                Expression::null()
            }
        }
    }
}

const DEFAULT_DATE_FORMAT: &str = "yyyy-MM-dd";

/// Wired input `index`, else `config[key]` as a literal.
fn param(node: &MapSpecNode, args: &[Expression], index: usize, key: &str) -> Option<Expression> {
    args.get(index)
        .cloned()
        .or_else(|| node.config.get(key).filter(|v| !v.is_null()).cloned().map(Expression::literal))
}

fn unsupported(kind: &NodeKind, args: Vec<Expression>, config: &Value) -> Expression {
    Expression::Call { function: Function::Unsupported(kind.as_str().to_string()), args, config: config.clone() }
}

fn unresolved_field(path: &str) -> Expression {
    Expression::call(Function::Unsupported(format!("field:{path}")), Vec::new())
}
