//! C# backend over Newtonsoft.Json (`JObject`/`JToken`).
//!
//! Each rendered expression carries the static C# type it produces, so
//! coercions are only inserted where needed: arithmetic and ordering read
//! operands through `Num(...)`, equality compares `Str(...)` forms (a type
//! mismatch compares unequal instead of throwing), and anything stored into
//! the output goes through `Tok(...)`.
use std::collections::HashMap;
use indexmap::IndexMap;
use serde_json::Value;

use super::{comment_text, identifier, output_leaves, output_tree, quote, GeneratorOptions, OutputTree, StructuralStyle, Writer};
use crate::ir::{is_item_scope, BinaryOp, Expression, Function, LiteralType, MapperIr, UnaryOp};
use crate::schema::{PathSegment, SchemaPath};

pub fn generate_structural(ir: &MapperIr, options: &GeneratorOptions, mapper_name: Option<&str>) -> String {
    let mut w = Writer::new(options.indent);
    let class_name = options.resolved_class_name(mapper_name);
    let input = identifier(&options.input_name);

    w.line("// <auto-generated>");
    match mapper_name {
        Some(name) => w.line(&format!("// Mapper: {}", comment_text(name))),
        None => w.line("// Mapper: (unnamed)"),
    }
    w.line("// </auto-generated>");
    for using in USINGS {
        w.line(&format!("using {using};"));
    }
    w.line("");

    if let Some(namespace) = &options.namespace {
        w.line(&format!("namespace {namespace}"));
        w.line("{");
        w.indent();
    }
    w.line(&format!("public static partial class {class_name}"));
    w.line("{");
    w.indent();
    w.line(&format!("public static JObject {}(JObject {input})", identifier(&options.method_name)));
    w.line("{");
    w.indent();

    let mut emitter = Emitter::new(input, w.unit().to_string());
    for shared in &ir.shared_expressions {
        let name = identifier(&shared.var_name);
        let rendered = emitter.render(&shared.expression);
        // Lazy sequences would be re-evaluated at every use.
        let (code, ty) = match rendered.ty {
            Cs::Items => (format!("new JArray({})", rendered.code), Cs::Token),
            ty => (rendered.code, ty),
        };
        w.line(&format!("var {name} = {code};"));
        emitter.shared_types.insert(shared.var_name.clone(), ty);
    }
    if !ir.shared_expressions.is_empty() {
        w.line("");
    }

    match options.structural_style {
        StructuralStyle::Assignments => emit_assignments(&mut w, &mut emitter, ir),
        StructuralStyle::ObjectLiteral => emit_object_literal(&mut w, &mut emitter, ir),
    }

    w.dedent();
    w.line("}");
    w.line("");
    for line in HELPERS.trim_matches('\n').lines() {
        w.line(&reindent(line, w.unit()));
    }
    w.dedent();
    w.line("}");
    if options.namespace.is_some() {
        w.dedent();
        w.line("}");
    }
    w.finish()
}

const USINGS: &[&str] = &[
    "System",
    "System.Collections.Generic",
    "System.Globalization",
    "System.Linq",
    "Newtonsoft.Json",
    "Newtonsoft.Json.Linq",
];

// ————————————————————————————————————————————————————————————————————————————
// PROGRAM SHAPES
// ————————————————————————————————————————————————————————————————————————————

/// Assignments walk the same output tree as the object-literal style, so a
/// leaf and a container claiming one path resolve identically in both.
fn emit_assignments(w: &mut Writer, emitter: &mut Emitter, ir: &MapperIr) {
    let tree = output_tree(ir);
    let leaves = output_leaves(&tree);

    let mut parts: IndexMap<String, String> = IndexMap::new();
    for (names, _) in &leaves {
        if let Some(part) = names.first() {
            if !parts.contains_key(part) {
                let var = part_variable(part, &emitter.input, &emitter.shared_types);
                parts.insert(part.clone(), var);
            }
        }
    }
    for var in parts.values() {
        w.line(&format!("JToken {var} = new JObject();"));
    }

    // Containers, parents before children.
    let mut containers: IndexMap<Vec<String>, ()> = IndexMap::new();
    for (names, _) in &leaves {
        for end in 2..names.len() {
            containers.insert(names[..end].to_vec(), ());
        }
    }
    let mut containers: Vec<Vec<String>> = containers.into_keys().collect();
    containers.sort_by_key(Vec::len);
    for names in &containers {
        w.line(&format!("{} ??= new JObject();", indexer_chain(&parts, names)));
    }
    if !parts.is_empty() {
        w.line("");
    }

    for (names, expression) in &leaves {
        let value = emitter.render(expression);
        let value = emitter.assignable(value);
        w.line(&format!("{} = {value};", indexer_chain(&parts, names)));
    }

    w.line("");
    w.line("var output = new JObject();");
    for (part, var) in &parts {
        w.line(&format!("output[{}] = {var};", quote(part)));
    }
    w.line("return output;");
}

fn emit_object_literal(w: &mut Writer, emitter: &mut Emitter, ir: &MapperIr) {
    let tree = output_tree(ir);
    let literal = emitter.tree_literal(&tree);
    w.line(&format!("return {literal};"));
}

fn indexer_chain(parts: &IndexMap<String, String>, names: &[String]) -> String {
    let Some((part, rest)) = names.split_first() else { return String::new() };
    let mut out = parts.get(part).cloned().unwrap_or_else(|| identifier(part));
    for name in rest {
        out.push_str(&format!("[{}]", quote(name)));
    }
    out
}

fn part_variable(part: &str, input: &str, shared: &HashMap<String, Cs>) -> String {
    let mut var = identifier(part);
    if var == input || var == "output" || shared.contains_key(&var) || is_lambda_name(&var) {
        var.push_str("Part");
    }
    if CSHARP_KEYWORDS.contains(&var.as_str()) {
        var.insert(0, '@');
    }
    var
}

/// Parameters of the lambdas this generator writes (`item1 =>`, `e0 =>`, `v =>`).
fn is_lambda_name(name: &str) -> bool {
    let digits = |rest: &str| rest.bytes().all(|b| b.is_ascii_digit());
    name == "v"
        || name.strip_prefix("item").is_some_and(|rest| digits(rest))
        || name.strip_prefix('e').is_some_and(|rest| !rest.is_empty() && digits(rest))
}

const CSHARP_KEYWORDS: &[&str] = &[
    "abstract", "as", "base", "bool", "break", "byte", "case", "catch", "char", "checked", "class", "const",
    "continue", "decimal", "default", "delegate", "do", "double", "else", "enum", "event", "explicit", "extern",
    "false", "finally", "fixed", "float", "for", "foreach", "goto", "if", "implicit", "in", "int", "interface",
    "internal", "is", "lock", "long", "namespace", "new", "null", "object", "operator", "out", "override",
    "params", "private", "protected", "public", "readonly", "ref", "return", "sbyte", "sealed", "short",
    "sizeof", "stackalloc", "static", "string", "struct", "switch", "this", "throw", "true", "try", "typeof",
    "uint", "ulong", "unchecked", "unsafe", "ushort", "using", "virtual", "void", "volatile", "while",
];

/// Helper source is written with 4-space indentation.
fn reindent(line: &str, unit: &str) -> String {
    let trimmed = line.trim_start_matches(' ');
    let depth = (line.len() - trimmed.len()) / 4;
    format!("{}{trimmed}", unit.repeat(depth))
}

// ————————————————————————————————————————————————————————————————————————————
// EXPRESSIONS
// ————————————————————————————————————————————————————————————————————————————

/// Static C# type of a rendered expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cs {
    Num,
    Str,
    Bool,
    /// `JToken`
    Token,
    /// `IEnumerable<JToken>`
    Items,
}

#[derive(Debug, Clone)]
struct Typed {
    code: String,
    ty: Cs,
}

impl Typed {
    fn new(code: impl Into<String>, ty: Cs) -> Self {
        Self { code: code.into(), ty }
    }
}

struct Emitter {
    input: String,
    unit: String,
    depth: usize,
    lambda_counter: usize,
    shared_types: HashMap<String, Cs>,
}

impl Emitter {
    fn new(input: String, unit: String) -> Self {
        Self { input, unit, depth: 0, lambda_counter: 0, shared_types: HashMap::new() }
    }

    fn num(&self, t: Typed) -> String {
        match t.ty {
            Cs::Num => t.code,
            _ => format!("Num({})", t.code),
        }
    }

    fn int(&self, t: Typed) -> String {
        format!("(int)({})", self.num(t))
    }

    fn str(&self, t: Typed) -> String {
        match t.ty {
            Cs::Str => t.code,
            _ => format!("Str({})", t.code),
        }
    }

    fn bool(&self, t: Typed) -> String {
        match t.ty {
            Cs::Bool => t.code,
            _ => format!("Bool({})", t.code),
        }
    }

    fn tok(&self, t: Typed) -> String {
        match t.ty {
            Cs::Token => t.code,
            Cs::Items => format!("new JArray({})", t.code),
            _ => format!("Tok({})", t.code),
        }
    }

    fn items(&self, t: Typed) -> String {
        match t.ty {
            Cs::Items => t.code,
            _ => format!("Items({})", t.code),
        }
    }

    /// Right-hand side of an indexer assignment; scalars convert implicitly.
    fn assignable(&self, t: Typed) -> String {
        match t.ty {
            Cs::Items => format!("new JArray({})", t.code),
            _ => t.code,
        }
    }

    fn fresh_lambda(&mut self) -> String {
        let name = format!("e{}", self.lambda_counter);
        self.lambda_counter += 1;
        name
    }

    fn arg(&mut self, args: &[Expression], index: usize) -> Typed {
        match args.get(index) {
            Some(arg) => self.render(arg),
            None => Typed::new("JValue.CreateNull()", Cs::Token),
        }
    }

    fn render(&mut self, expression: &Expression) -> Typed {
        if let Some(view) = expression.as_array_map() {
            let source = self.field(view.source);
            let seq = self.items(source);
            let var = scope_variable(view.scope);
            let element = self.render(view.element);
            let element = self.tok(element);
            return Typed::new(format!("new JArray({seq}.Select({var} => {element}))"), Cs::Token);
        }
        match expression {
            Expression::Literal { value, ty } => literal(value, *ty),
            Expression::Field { path } => self.field(path),
            Expression::SharedRef { var_name } => {
                let ty = self.shared_types.get(var_name).copied().unwrap_or(Cs::Token);
                Typed::new(identifier(var_name), ty)
            }
            Expression::Binary { operator, left, right } => {
                let left = self.render(left);
                let right = self.render(right);
                self.binary(*operator, left, right)
            }
            Expression::Unary { operator, operand } => {
                let operand = self.render(operand);
                match operator {
                    UnaryOp::Negate => Typed::new(format!("(-{})", self.num(operand)), Cs::Num),
                    UnaryOp::Not => Typed::new(format!("(!{})", self.bool(operand)), Cs::Bool),
                }
            }
            Expression::Call { function, args, .. } => self.call(function, args),
            Expression::Conditional { condition, then, else_ } => {
                let condition = self.render(condition);
                let then = self.render(then);
                let else_ = self.render(else_);
                Typed::new(
                    format!("({} ? {} : {})", self.bool(condition), self.tok(then), self.tok(else_)),
                    Cs::Token,
                )
            }
            Expression::Array { elements } => {
                let items: Vec<String> = elements
                    .iter()
                    .map(|e| {
                        let t = self.render(e);
                        self.tok(t)
                    })
                    .collect();
                Typed::new(format!("new JArray({})", items.join(", ")), Cs::Token)
            }
            Expression::Object { properties } => self.object(properties),
        }
    }

    fn object(&mut self, properties: &IndexMap<String, Expression>) -> Typed {
        if properties.is_empty() {
            return Typed::new("new JObject()", Cs::Token);
        }
        self.depth += 1;
        let pad = self.unit.repeat(self.depth);
        let mut entries = Vec::with_capacity(properties.len());
        for (key, value) in properties {
            let value = self.render(value);
            entries.push(format!("{pad}new JProperty({}, {})", quote(key), self.tok(value)));
        }
        self.depth -= 1;
        Typed::new(format!("new JObject(\n{})", entries.join(",\n")) + ")", Cs::Token)
    }

    fn tree_literal(&mut self, tree: &IndexMap<String, OutputTree<'_>>) -> String {
        if tree.is_empty() {
            return "new JObject()".to_string();
        }
        self.depth += 1;
        let pad = self.unit.repeat(self.depth);
        let mut entries = Vec::with_capacity(tree.len());
        for (key, node) in tree {
            let value = match node {
                OutputTree::Leaf(expression) => {
                    let t = self.render(expression);
                    self.tok(t)
                }
                OutputTree::Branch(children) => self.tree_literal(children),
            };
            entries.push(format!("{pad}new JProperty({}, {value})", quote(key)));
        }
        self.depth -= 1;
        format!("new JObject(\n{})", entries.join(",\n")) + ")"
    }

    /// `body.qty` → `input?["body"]?["qty"]`; `in.lines[].qty` →
    /// `Items(input?["in"]?["lines"]).Select(e0 => e0?["qty"])`.
    fn field(&mut self, path: &str) -> Typed {
        let path = SchemaPath::parse(path).real();
        let segments = path.segments();
        let (root, rest) = match segments.first() {
            Some(PathSegment::Property(name)) if is_item_scope(name) => (scope_variable(name), &segments[1..]),
            _ => (self.input.clone(), segments),
        };

        enum Acc {
            Single(String),
            Many { seq: String, var: String, elem: String },
        }
        let mut acc = Acc::Single(root);
        for segment in rest {
            acc = match (acc, segment) {
                (Acc::Single(code), PathSegment::Property(name)) => Acc::Single(format!("{code}?[{}]", quote(name))),
                (Acc::Many { seq, var, elem }, PathSegment::Property(name)) => {
                    Acc::Many { seq, var, elem: format!("{elem}?[{}]", quote(name)) }
                }
                (Acc::Single(code), PathSegment::Items) => {
                    let var = self.fresh_lambda();
                    Acc::Many { seq: format!("Items({code})"), elem: var.clone(), var }
                }
                (Acc::Many { seq, var, elem }, PathSegment::Items) => {
                    let next = self.fresh_lambda();
                    Acc::Many { seq: format!("{seq}.SelectMany({var} => Items({elem}))"), elem: next.clone(), var: next }
                }
                (acc, PathSegment::Branch(_)) => acc,
            };
        }
        match acc {
            Acc::Single(code) => Typed::new(code, Cs::Token),
            Acc::Many { seq, var, elem } if var == elem => Typed::new(seq, Cs::Items),
            Acc::Many { seq, var, elem } => Typed::new(format!("{seq}.Select({var} => {elem})"), Cs::Items),
        }
    }

    fn binary(&self, op: BinaryOp, left: Typed, right: Typed) -> Typed {
        let arithmetic = |symbol: &str, this: &Self, l: Typed, r: Typed| {
            Typed::new(format!("({} {symbol} {})", this.num(l), this.num(r)), Cs::Num)
        };
        let compare = |symbol: &str, this: &Self, l: Typed, r: Typed| {
            Typed::new(format!("({} {symbol} {})", this.num(l), this.num(r)), Cs::Bool)
        };
        match op {
            BinaryOp::Add => arithmetic("+", self, left, right),
            BinaryOp::Subtract => arithmetic("-", self, left, right),
            BinaryOp::Multiply => arithmetic("*", self, left, right),
            BinaryOp::Divide => arithmetic("/", self, left, right),
            BinaryOp::Modulo => arithmetic("%", self, left, right),
            BinaryOp::Power => Typed::new(format!("Math.Pow({}, {})", self.num(left), self.num(right)), Cs::Num),
            BinaryOp::Equal => Typed::new(format!("({} == {})", self.str(left), self.str(right)), Cs::Bool),
            BinaryOp::NotEqual => Typed::new(format!("({} != {})", self.str(left), self.str(right)), Cs::Bool),
            BinaryOp::GreaterThan => compare(">", self, left, right),
            BinaryOp::GreaterThanOrEqual => compare(">=", self, left, right),
            BinaryOp::LessThan => compare("<", self, left, right),
            BinaryOp::LessThanOrEqual => compare("<=", self, left, right),
            BinaryOp::And => Typed::new(format!("({} && {})", self.bool(left), self.bool(right)), Cs::Bool),
            BinaryOp::Or => Typed::new(format!("({} || {})", self.bool(left), self.bool(right)), Cs::Bool),
            BinaryOp::Coalesce => Typed::new(format!("Coalesce({}, {})", left.code, right.code), Cs::Token),
        }
    }

    fn call(&mut self, function: &Function, args: &[Expression]) -> Typed {
        use Function as F;
        let invariant = "CultureInfo.InvariantCulture";
        match function {
            F::Abs => self.math("Math.Abs", args),
            F::Floor => self.math("Math.Floor", args),
            F::Ceil => self.math("Math.Ceiling", args),
            F::Sqrt => self.math("Math.Sqrt", args),
            F::Round => {
                let value = self.arg(args, 0);
                let value = self.num(value);
                match args.get(1) {
                    Some(decimals) => {
                        let decimals = self.render(decimals);
                        let decimals = self.int(decimals);
                        Typed::new(format!("Math.Round({value}, {decimals}, MidpointRounding.AwayFromZero)"), Cs::Num)
                    }
                    None => Typed::new(format!("Math.Round({value}, MidpointRounding.AwayFromZero)"), Cs::Num),
                }
            }
            F::Min => self.extreme("Min", args),
            F::Max => self.extreme("Max", args),

            F::Concat => {
                let parts: Vec<String> = args
                    .iter()
                    .map(|a| {
                        let t = self.render(a);
                        self.str(t)
                    })
                    .collect();
                Typed::new(format!("string.Concat({})", parts.join(", ")), Cs::Str)
            }
            F::Upper => self.string_method(args, "?.ToUpperInvariant()"),
            F::Lower => self.string_method(args, "?.ToLowerInvariant()"),
            F::Trim => self.string_method(args, "?.Trim()"),
            F::Length => {
                let value = self.arg(args, 0);
                Typed::new(format!("(({} ?? \"\").Length)", self.str(value)), Cs::Num)
            }
            F::Substring => {
                let value = self.arg(args, 0);
                let start = self.arg(args, 1);
                let length = match args.get(2) {
                    Some(length) => {
                        let length = self.render(length);
                        self.int(length)
                    }
                    None => "null".to_string(),
                };
                Typed::new(format!("SafeSubstring({}, {}, {length})", self.str(value), self.int(start)), Cs::Str)
            }
            F::Replace => {
                let value = self.arg(args, 0);
                let pattern = self.arg(args, 1);
                let replacement = self.arg(args, 2);
                Typed::new(
                    format!("SafeReplace({}, {}, {})", self.str(value), self.str(pattern), self.str(replacement)),
                    Cs::Str,
                )
            }
            F::Split => {
                let value = self.arg(args, 0);
                let separator = self.arg(args, 1);
                Typed::new(
                    format!("Tok(({} ?? \"\").Split({} ?? \",\"))", self.str(value), self.str(separator)),
                    Cs::Token,
                )
            }
            F::Join => {
                let value = self.arg(args, 0);
                let separator = self.arg(args, 1);
                Typed::new(
                    format!("string.Join({} ?? \"\", {}.Select(v => Str(v)))", self.str(separator), self.items(value)),
                    Cs::Str,
                )
            }
            F::Contains => self.string_test("Contains", args),
            F::StartsWith => self.string_test("StartsWith", args),
            F::EndsWith => self.string_test("EndsWith", args),
            F::PadLeft => {
                let value = self.arg(args, 0);
                let width = self.arg(args, 1);
                let pad = self.arg(args, 2);
                Typed::new(
                    format!("({} ?? \"\").PadLeft({}, PadChar({}))", self.str(value), self.int(width), pad.code),
                    Cs::Str,
                )
            }

            F::IsNull => {
                let value = self.arg(args, 0);
                Typed::new(format!("IsNull({})", value.code), Cs::Bool)
            }
            F::IsEmpty => {
                let value = self.arg(args, 0);
                Typed::new(format!("IsEmpty({})", value.code), Cs::Bool)
            }

            F::Distinct => self.sequence(args, |seq| format!("new JArray({seq}.Distinct(JToken.EqualityComparer))")),
            F::First => self.sequence(args, |seq| format!("Tok({seq}.FirstOrDefault())")),
            F::Last => self.sequence(args, |seq| format!("Tok({seq}.LastOrDefault())")),
            F::Reverse => self.sequence(args, |seq| format!("new JArray({seq}.Reverse())")),
            F::Sort => self.sequence(args, |seq| format!("new JArray(Sorted({seq}))")),
            F::Flatten => self.sequence(args, |seq| format!("new JArray({seq}.SelectMany(v => Items(v)))")),

            F::Sum => self.aggregate(args, |seq| format!("{seq}.Sum(v => Num(v))")),
            F::Average => self.aggregate(args, |seq| format!("{seq}.Select(v => Num(v)).DefaultIfEmpty(0).Average()")),
            F::MinOf => self.aggregate(args, |seq| format!("{seq}.Select(v => Num(v)).DefaultIfEmpty(0).Min()")),
            F::MaxOf => self.aggregate(args, |seq| format!("{seq}.Select(v => Num(v)).DefaultIfEmpty(0).Max()")),
            F::Count => self.aggregate(args, |seq| format!("{seq}.Count()")),

            F::ToString => {
                let value = self.arg(args, 0);
                Typed::new(self.str(value), Cs::Str)
            }
            F::ToNumber => {
                let value = self.arg(args, 0);
                Typed::new(self.num(value), Cs::Num)
            }
            F::ToInteger => {
                let value = self.arg(args, 0);
                Typed::new(format!("Math.Truncate({})", self.num(value)), Cs::Num)
            }
            F::ToBoolean => {
                let value = self.arg(args, 0);
                Typed::new(self.bool(value), Cs::Bool)
            }
            F::ParseJson => {
                let value = self.arg(args, 0);
                Typed::new(format!("JToken.Parse({} ?? \"null\")", self.str(value)), Cs::Token)
            }
            F::ToJson => {
                let value = self.arg(args, 0);
                Typed::new(format!("Tok({}).ToString(Formatting.None)", value.code), Cs::Str)
            }

            F::Now => Typed::new(format!("DateTime.UtcNow.ToString(\"o\", {invariant})"), Cs::Str),
            F::FormatDate => {
                let value = self.arg(args, 0);
                let format = self.arg(args, 1);
                Typed::new(format!("AsDate({}).ToString({}, {invariant})", value.code, self.str(format)), Cs::Str)
            }
            F::ParseDate => {
                let value = self.arg(args, 0);
                let format = self.arg(args, 1);
                Typed::new(
                    format!(
                        "DateTime.ParseExact({}, {}, {invariant}).ToString(\"o\", {invariant})",
                        self.str(value),
                        self.str(format)
                    ),
                    Cs::Str,
                )
            }
            F::AddDays => {
                let value = self.arg(args, 0);
                let days = self.arg(args, 1);
                Typed::new(
                    format!("AsDate({}).AddDays({}).ToString(\"o\", {invariant})", value.code, self.num(days)),
                    Cs::Str,
                )
            }
            F::ToUnix => {
                let value = self.arg(args, 0);
                Typed::new(format!("new DateTimeOffset(AsDate({})).ToUnixTimeSeconds()", value.code), Cs::Num)
            }

            F::Custom(name) => {
                let rendered: Vec<String> = args
                    .iter()
                    .map(|a| {
                        let t = self.render(a);
                        self.tok(t)
                    })
                    .collect();
                Typed::new(format!("Tok({}({}))", identifier(name), rendered.join(", ")), Cs::Token)
            }
            F::Inline => {
                let text = match args.first() {
                    Some(Expression::Literal { value: Value::String(s), .. }) => s.as_str(),
                    _ => "",
                };
                placeholder(&format!("inline expression: {text}"))
            }
            // A well-formed map call was handled in `render`.
            F::Map => placeholder("malformed map"),
            F::Unsupported(kind) => placeholder(&format!("unsupported: {kind}")),
        }
    }

    fn math(&mut self, method: &str, args: &[Expression]) -> Typed {
        let value = self.arg(args, 0);
        Typed::new(format!("{method}({})", self.num(value)), Cs::Num)
    }

    /// `Math.Min`/`Math.Max`: a single input is treated as a collection.
    fn extreme(&mut self, which: &str, args: &[Expression]) -> Typed {
        if args.len() == 1 {
            let seq = self.arg(args, 0);
            return Typed::new(
                format!("{}.Select(v => Num(v)).DefaultIfEmpty(0).{which}()", self.items(seq)),
                Cs::Num,
            );
        }
        let values: Vec<String> = args
            .iter()
            .map(|a| {
                let t = self.render(a);
                self.num(t)
            })
            .collect();
        Typed::new(format!("new[] {{ {} }}.{which}()", values.join(", ")), Cs::Num)
    }

    fn string_method(&mut self, args: &[Expression], suffix: &str) -> Typed {
        let value = self.arg(args, 0);
        Typed::new(format!("{}{suffix}", self.str(value)), Cs::Str)
    }

    fn string_test(&mut self, method: &str, args: &[Expression]) -> Typed {
        let value = self.arg(args, 0);
        let operand = self.arg(args, 1);
        Typed::new(
            format!(
                "({} ?? \"\").{method}({} ?? \"\", StringComparison.Ordinal)",
                self.str(value),
                self.str(operand)
            ),
            Cs::Bool,
        )
    }

    fn sequence(&mut self, args: &[Expression], build: impl Fn(&str) -> String) -> Typed {
        let value = self.arg(args, 0);
        Typed::new(build(&self.items(value)), Cs::Token)
    }

    fn aggregate(&mut self, args: &[Expression], build: impl Fn(&str) -> String) -> Typed {
        let value = self.arg(args, 0);
        Typed::new(build(&self.items(value)), Cs::Num)
    }
}

fn literal(value: &Value, ty: LiteralType) -> Typed {
    match (ty, value) {
        (LiteralType::String, Value::String(s)) => Typed::new(quote(s), Cs::Str),
        (LiteralType::String, other) => Typed::new(quote(&other.to_string()), Cs::Str),
        (LiteralType::Number, Value::Number(n)) => Typed::new(n.to_string(), Cs::Num),
        (LiteralType::Boolean, Value::Bool(b)) => Typed::new(b.to_string(), Cs::Bool),
        (LiteralType::Null, _) => Typed::new("JValue.CreateNull()", Cs::Token),
        (ty, other) => placeholder(&format!("literal {other} is not a {ty:?}")),
    }
}

fn placeholder(note: &str) -> Typed {
    Typed::new(format!("JValue.CreateNull() /* {} */", comment_text(note)), Cs::Token)
}

/// `$item` → `item`, `$item2` → `item2`.
fn scope_variable(scope: &str) -> String {
    identifier(scope.trim_start_matches('$'))
}

const HELPERS: &str = r#"
private static bool IsNull(object value) => value switch
{
    null => true,
    JToken t => t.Type == JTokenType.Null || t.Type == JTokenType.Undefined,
    _ => false,
};

private static bool IsEmpty(object value) => value switch
{
    _ when IsNull(value) => true,
    string s => s.Length == 0,
    JValue v when v.Type == JTokenType.String => ((string)v).Length == 0,
    JContainer c => !c.HasValues,
    IEnumerable<JToken> xs => !xs.Any(),
    _ => false,
};

private static double Num(object value)
{
    switch (value)
    {
        case double d: return d;
        case int i: return i;
        case long l: return l;
        case bool b: return b ? 1 : 0;
        case JValue v when v.Type == JTokenType.Integer || v.Type == JTokenType.Float: return v.Value<double>();
        case JValue v when v.Type == JTokenType.Boolean: return v.Value<bool>() ? 1 : 0;
    }
    return double.TryParse(Str(value), NumberStyles.Float, CultureInfo.InvariantCulture, out var n) ? n : 0;
}

private static string Str(object value) => value switch
{
    _ when IsNull(value) => null,
    string s => s,
    bool b => b ? "true" : "false",
    JValue v when v.Type == JTokenType.Boolean => v.Value<bool>() ? "true" : "false",
    JValue v => Convert.ToString(v.Value, CultureInfo.InvariantCulture),
    JToken t => t.ToString(Formatting.None),
    IFormattable f => f.ToString(null, CultureInfo.InvariantCulture),
    _ => value.ToString(),
};

private static bool Bool(object value) => value switch
{
    _ when IsNull(value) => false,
    bool b => b,
    JValue v when v.Type == JTokenType.Boolean => v.Value<bool>(),
    string s => s.Length > 0 && !string.Equals(s, "false", StringComparison.OrdinalIgnoreCase),
    JValue v when v.Type == JTokenType.String => Bool((string)v),
    _ => Num(value) != 0,
};

private static JToken Tok(object value) => value switch
{
    null => JValue.CreateNull(),
    JToken t => t,
    string s => new JValue(s),
    IEnumerable<JToken> xs => new JArray(xs),
    _ => JToken.FromObject(value),
};

private static IEnumerable<JToken> Items(object value) => value switch
{
    _ when IsNull(value) => Enumerable.Empty<JToken>(),
    JArray a => a,
    JToken t => new[] { t },
    IEnumerable<JToken> xs => xs,
    _ => new[] { Tok(value) },
};

private static JToken Coalesce(object first, object second) => IsNull(first) ? Tok(second) : Tok(first);

private static string SafeSubstring(string value, int start, int? length)
{
    if (value == null) return null;
    start = Math.Clamp(start, 0, value.Length);
    var available = value.Length - start;
    return value.Substring(start, length is int n ? Math.Clamp(n, 0, available) : available);
}

private static string SafeReplace(string value, string pattern, string replacement) =>
    string.IsNullOrEmpty(pattern) ? value : value?.Replace(pattern, replacement ?? "");

private static char PadChar(object value) => Str(value) is { Length: > 0 } s ? s[0] : ' ';

private static DateTime AsDate(object value) =>
    DateTime.TryParse(Str(value), CultureInfo.InvariantCulture, DateTimeStyles.RoundtripKind, out var d) ? d : DateTime.MinValue;

private static IEnumerable<JToken> Sorted(IEnumerable<JToken> items) => items
    .OrderBy(v => v.Type == JTokenType.Integer || v.Type == JTokenType.Float ? 0 : 1)
    .ThenBy(v => Num(v))
    .ThenBy(v => Str(v), StringComparer.Ordinal);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{item_scope, Mapping, SharedExpression};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ir(mappings: Vec<(&str, Expression)>) -> MapperIr {
        MapperIr {
            mappings: mappings.into_iter().map(|(t, e)| Mapping { target: t.to_string(), expression: e }).collect(),
            shared_expressions: Vec::new(),
        }
    }

    fn body_of(source: &str) -> Vec<String> {
        let start = source.find("public static JObject Map").unwrap();
        let end = source.find("private static bool IsNull").unwrap();
        source[start..end].lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect()
    }

    #[test]
    fn multiply_is_numeric_and_assigned_into_its_part() {
        let ir = ir(vec![(
            "body.totals.lineTotal",
            Expression::binary(BinaryOp::Multiply, Expression::field("body.qty"), Expression::field("body.price")),
        )]);
        let source = generate_structural(&ir, &GeneratorOptions::default(), Some("order-lines"));
        assert!(source.contains("public static partial class OrderLinesMapper"));
        assert_eq!(
            body_of(&source),
            [
                "public static JObject Map(JObject input)",
                "{",
                "JToken body = new JObject();",
                "body[\"totals\"] ??= new JObject();",
                "body[\"totals\"][\"lineTotal\"] = (Num(input?[\"body\"]?[\"qty\"]) * Num(input?[\"body\"]?[\"price\"]));",
                "var output = new JObject();",
                "output[\"body\"] = body;",
                "return output;",
                "}",
            ]
        );
    }

    #[test]
    fn containers_are_guarded_in_depth_order() {
        let ir = ir(vec![
            ("doc.a.b.c", Expression::string("x")),
            ("doc.a.d", Expression::string("y")),
        ]);
        let source = generate_structural(&ir, &GeneratorOptions::default(), None);
        let a = source.find("doc[\"a\"] ??= new JObject();").unwrap();
        let ab = source.find("doc[\"a\"][\"b\"] ??= new JObject();").unwrap();
        let assign = source.find("doc[\"a\"][\"b\"][\"c\"] = \"x\";").unwrap();
        assert!(a < ab && ab < assign);
        assert_eq!(source.matches("doc[\"a\"] ??=").count(), 1);
    }

    #[test]
    fn equality_compares_string_forms() {
        let ir = ir(vec![(
            "doc.same",
            Expression::binary(BinaryOp::Equal, Expression::field("in.a"), Expression::literal(json!(6))),
        )]);
        let source = generate_structural(&ir, &GeneratorOptions::default(), None);
        assert!(source.contains("doc[\"same\"] = (Str(input?[\"in\"]?[\"a\"]) == Str(6));"));
    }

    #[test]
    fn array_mappings_project_each_source_item() {
        let mut element = IndexMap::new();
        element.insert("a".to_string(), Expression::field("$item.x"));
        element.insert("b".to_string(), Expression::field("$item.y"));
        let ir = ir(vec![(
            "body.items",
            Expression::array_map("source.items", &item_scope(0), Expression::Object { properties: element }),
        )]);
        let source = generate_structural(&ir, &GeneratorOptions::default(), None);
        assert!(source.contains("body[\"items\"] = new JArray(Items(input?[\"source\"]?[\"items\"]).Select(item => new JObject("));
        assert!(source.contains("new JProperty(\"a\", item?[\"x\"]),"));
        assert!(source.contains("new JProperty(\"b\", item?[\"y\"]))));"));
    }

    #[test]
    fn aggregates_flatten_array_paths() {
        let ir = ir(vec![("doc.total", Expression::call(Function::Sum, vec![Expression::field("in.orders[].lines[].qty")]))]);
        let source = generate_structural(&ir, &GeneratorOptions::default(), None);
        assert!(source.contains(
            "doc[\"total\"] = Items(input?[\"in\"]?[\"orders\"]).SelectMany(e0 => Items(e0?[\"lines\"])).Select(e1 => e1?[\"qty\"]).Sum(v => Num(v));"
        ));
    }

    #[test]
    fn shared_expressions_are_declared_once() {
        let mut ir = ir(vec![
            ("doc.a", Expression::shared_ref("now1")),
            ("doc.b", Expression::call(Function::Upper, vec![Expression::shared_ref("now1")])),
        ]);
        ir.shared_expressions.push(SharedExpression { var_name: "now1".into(), expression: Expression::call(Function::Now, vec![]) });
        let source = generate_structural(&ir, &GeneratorOptions::default(), None);
        assert_eq!(source.matches("DateTime.UtcNow").count(), 1);
        assert!(source.contains("var now1 = DateTime.UtcNow.ToString(\"o\", CultureInfo.InvariantCulture);"));
        assert!(source.contains("doc[\"a\"] = now1;"));
        assert!(source.contains("doc[\"b\"] = now1?.ToUpperInvariant();"));
    }

    #[test]
    fn unsupported_shapes_degrade_to_commented_nulls() {
        let ir = ir(vec![("doc.d", Expression::call(Function::Unsupported("Geo.Distance".into()), vec![]))]);
        let source = generate_structural(&ir, &GeneratorOptions::default(), None);
        assert!(source.contains("doc[\"d\"] = JValue.CreateNull() /* unsupported: Geo.Distance */;"));
    }

    #[test]
    fn object_literal_style_builds_one_composite_value() {
        let ir = ir(vec![
            ("body.a.b", Expression::literal(json!(1))),
            ("body.c", Expression::literal(json!(true))),
        ]);
        let options = GeneratorOptions { structural_style: StructuralStyle::ObjectLiteral, ..GeneratorOptions::default() };
        let source = generate_structural(&ir, &options, None);
        assert!(!source.contains("??="));
        assert_eq!(
            body_of(&source)[2..],
            [
                "return new JObject(",
                "new JProperty(\"body\", new JObject(",
                "new JProperty(\"a\", new JObject(",
                "new JProperty(\"b\", Tok(1)))),",
                "new JProperty(\"c\", Tok(true)))));",
                "}",
            ]
        );
    }

    #[test]
    fn overlapping_targets_keep_the_first_writer_in_both_styles() {
        for (mappings, kept, dropped) in [
            (
                vec![("doc.a.b", Expression::string("x")), ("doc.a", Expression::string("z"))],
                "doc[\"a\"][\"b\"] = \"x\";",
                "doc[\"a\"] = \"z\";",
            ),
            (
                vec![("doc.a", Expression::string("z")), ("doc.a.b", Expression::string("x"))],
                "doc[\"a\"] = \"z\";",
                "doc[\"a\"][\"b\"] = \"x\";",
            ),
        ] {
            let ir = ir(mappings);
            let assignments = generate_structural(&ir, &GeneratorOptions::default(), None);
            assert!(assignments.contains(kept), "{assignments}");
            assert!(!assignments.contains(dropped), "{assignments}");

            let options = GeneratorOptions { structural_style: StructuralStyle::ObjectLiteral, ..GeneratorOptions::default() };
            let literal = generate_structural(&ir, &options, None);
            assert_eq!(literal.matches("new JProperty(\"a\"").count(), 1);
        }
    }

    #[test]
    fn part_variables_avoid_lambda_parameters() {
        let ir = ir(vec![
            ("item.x", Expression::string("a")),
            ("e0.y", Expression::string("b")),
            ("v.z", Expression::string("c")),
            ("items.w", Expression::string("d")),
        ]);
        let source = generate_structural(&ir, &GeneratorOptions::default(), None);
        for declared in ["JToken itemPart = ", "JToken e0Part = ", "JToken vPart = ", "JToken items = "] {
            assert!(source.contains(declared), "{declared} missing in\n{source}");
        }
        assert!(source.contains("output[\"item\"] = itemPart;"));
    }
}
