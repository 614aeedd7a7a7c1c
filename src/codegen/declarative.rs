//! JSONata backend.
//!
//! The whole mapper is one expression: an object constructor nested by
//! target path, wrapped in a block that binds the shared expressions when
//! there are any. Array mappings become projections (`[src.{ ... }]`);
//! inside one, the current item is the context, enclosing items are reached
//! with `%` and input-rooted paths with `$$`.
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{comment_text, identifier, output_tree, quote, GeneratorOptions, OutputTree, Writer};
use crate::ir::{is_item_scope, BinaryOp, Expression, Function, LiteralType, MapperIr, UnaryOp};
use crate::schema::{PathSegment, SchemaPath};

pub fn generate_declarative(ir: &MapperIr, options: &GeneratorOptions, mapper_name: Option<&str>) -> String {
    let mut w = Writer::new(options.indent);
    if let Some(name) = mapper_name {
        w.line(&format!("/* Mapper: {} */", comment_text(name)));
    }
    let mut emitter = Emitter { unit: w.unit().to_string(), depth: 0, scopes: Vec::new() };
    let tree = output_tree(ir);

    if ir.shared_expressions.is_empty() {
        let body = emitter.tree(&tree);
        w.line(&body);
        return w.finish();
    }

    w.line("(");
    w.indent();
    for shared in &ir.shared_expressions {
        let value = emitter.render(&shared.expression);
        w.line(&format!("${} := {value};", identifier(&shared.var_name)));
    }
    let body = emitter.tree(&tree);
    w.line(&body);
    w.dedent();
    w.line(")");
    w.finish()
}

static PLAIN_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"));

const RESERVED: &[&str] = &["and", "or", "in", "true", "false", "null", "function"];

/// Path step; names JSONata would not read as a plain step are backticked.
fn step(name: &str) -> String {
    if PLAIN_NAME.is_match(name) && !RESERVED.contains(&name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "'"))
    }
}

struct Emitter {
    unit: String,
    depth: usize,
    /// Active item scopes, innermost last.
    scopes: Vec<String>,
}

impl Emitter {
    fn pad(&self, depth: usize) -> String {
        self.unit.repeat(depth)
    }

    fn tree(&mut self, tree: &IndexMap<String, OutputTree<'_>>) -> String {
        if tree.is_empty() {
            return "{}".to_string();
        }
        self.depth += 1;
        let pad = self.pad(self.depth);
        let mut entries = Vec::with_capacity(tree.len());
        for (key, node) in tree {
            let value = match node {
                OutputTree::Leaf(expression) => self.render(expression),
                OutputTree::Branch(children) => self.tree(children),
            };
            entries.push(format!("{pad}{}: {value}", quote(key)));
        }
        self.depth -= 1;
        format!("{{\n{}\n{}}}", entries.join(",\n"), self.pad(self.depth))
    }

    fn object(&mut self, properties: &IndexMap<String, Expression>) -> String {
        if properties.is_empty() {
            return "{}".to_string();
        }
        self.depth += 1;
        let pad = self.pad(self.depth);
        let mut entries = Vec::with_capacity(properties.len());
        for (key, value) in properties {
            let value = self.render(value);
            entries.push(format!("{pad}{}: {value}", quote(key)));
        }
        self.depth -= 1;
        format!("{{\n{}\n{}}}", entries.join(",\n"), self.pad(self.depth))
    }

    fn render(&mut self, expression: &Expression) -> String {
        if let Some(view) = expression.as_array_map() {
            let source = self.field(view.source);
            self.scopes.push(view.scope.to_string());
            let element = match view.element {
                Expression::Object { properties } => self.object(properties),
                other => format!("({})", self.render(other)),
            };
            self.scopes.pop();
            return format!("[{source}.{element}]");
        }
        match expression {
            Expression::Literal { value, ty } => literal(value, *ty),
            Expression::Field { path } => self.field(path),
            Expression::SharedRef { var_name } => format!("${}", identifier(var_name)),
            Expression::Binary { operator, left, right } => {
                let left = self.render(left);
                let right = self.render(right);
                binary(*operator, &left, &right)
            }
            Expression::Unary { operator, operand } => {
                let operand = self.render(operand);
                match operator {
                    UnaryOp::Negate => format!("-({operand})"),
                    UnaryOp::Not => format!("$not({operand})"),
                }
            }
            Expression::Call { function, args, .. } => self.call(function, args),
            Expression::Conditional { condition, then, else_ } => {
                let condition = self.render(condition);
                let then = self.render(then);
                let else_ = self.render(else_);
                format!("({condition} ? {then} : {else_})")
            }
            Expression::Array { elements } => {
                let items: Vec<String> = elements.iter().map(|e| self.render(e)).collect();
                format!("[{}]", items.join(", "))
            }
            Expression::Object { properties } => self.object(properties),
        }
    }

    /// Array indicators are dropped: JSONata maps over arrays along a path.
    fn field(&self, path: &str) -> String {
        let path = SchemaPath::parse(path).real();
        let names: Vec<&str> = path
            .segments()
            .iter()
            .filter_map(|s| match s {
                PathSegment::Property(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();

        let (mut prefix, rest) = match names.split_first() {
            Some((first, rest)) if is_item_scope(first) => match self.scopes.iter().rposition(|s| s == first) {
                Some(at) => {
                    let up = self.scopes.len() - 1 - at;
                    (vec!["%"; up].join("."), rest)
                }
                None => (format!("${}", identifier(first.trim_start_matches('$'))), rest),
            },
            _ if !self.scopes.is_empty() => ("$$".to_string(), names.as_slice()),
            _ => (String::new(), names.as_slice()),
        };

        let steps: Vec<String> = rest.iter().map(|n| step(n)).collect();
        match (prefix.is_empty(), steps.is_empty()) {
            (true, true) => "$".to_string(),
            (true, false) => steps.join("."),
            (false, true) => prefix,
            (false, false) => {
                prefix.push('.');
                prefix + &steps.join(".")
            }
        }
    }

    fn args(&mut self, args: &[Expression]) -> Vec<String> {
        args.iter().map(|a| self.render(a)).collect()
    }

    fn arg(&mut self, args: &[Expression], index: usize) -> String {
        match args.get(index) {
            Some(arg) => self.render(arg),
            None => "null".to_string(),
        }
    }

    fn call(&mut self, function: &Function, args: &[Expression]) -> String {
        use Function as F;
        let simple = |name: &str, this: &mut Self| format!("${name}({})", this.args(args).join(", "));
        match function {
            F::Abs => simple("abs", self),
            F::Floor => simple("floor", self),
            F::Ceil => simple("ceil", self),
            F::Sqrt => simple("sqrt", self),
            F::Round => simple("round", self),
            F::Min | F::Max => {
                let name = if matches!(function, F::Min) { "min" } else { "max" };
                let rendered = self.args(args);
                match rendered.as_slice() {
                    [single] => format!("${name}({single})"),
                    many => format!("${name}([{}])", many.join(", ")),
                }
            }

            F::Concat => {
                let rendered = self.args(args);
                if rendered.is_empty() { "\"\"".to_string() } else { format!("({})", rendered.join(" & ")) }
            }
            F::Upper => simple("uppercase", self),
            F::Lower => simple("lowercase", self),
            F::Trim => simple("trim", self),
            F::Length => simple("length", self),
            F::Substring => simple("substring", self),
            F::Replace => simple("replace", self),
            F::Split => simple("split", self),
            F::Join => simple("join", self),
            F::Contains => simple("contains", self),
            F::StartsWith => {
                let value = self.arg(args, 0);
                let prefix = self.arg(args, 1);
                format!("($substring({value}, 0, $length({prefix})) = {prefix})")
            }
            F::EndsWith => {
                let value = self.arg(args, 0);
                let suffix = self.arg(args, 1);
                format!("($length({suffix}) = 0 or $substring({value}, -$length({suffix})) = {suffix})")
            }
            F::PadLeft => {
                let value = self.arg(args, 0);
                let width = match args.get(1) {
                    Some(Expression::Literal { value: Value::Number(n), .. }) => format!("-{n}"),
                    Some(other) => format!("-({})", self.render(other)),
                    None => "0".to_string(),
                };
                let pad = match args.get(2) {
                    Some(pad) => self.render(pad),
                    None => quote(" "),
                };
                format!("$pad({value}, {width}, {pad})")
            }

            F::IsNull => {
                let value = self.arg(args, 0);
                format!("($exists({value}) = false or {value} = null)")
            }
            F::IsEmpty => {
                let value = self.arg(args, 0);
                format!("($exists({value}) = false or {value} = null or {value} = \"\" or {value} = [])")
            }

            F::Distinct => simple("distinct", self),
            F::First => format!("({})[0]", self.arg(args, 0)),
            F::Last => format!("({})[-1]", self.arg(args, 0)),
            F::Reverse => simple("reverse", self),
            F::Sort => simple("sort", self),
            F::Flatten => format!("$reduce({}, $append, [])", self.arg(args, 0)),

            F::Sum => simple("sum", self),
            F::Average => simple("average", self),
            F::MinOf => simple("min", self),
            F::MaxOf => simple("max", self),
            F::Count => simple("count", self),

            F::ToString | F::ToJson => simple("string", self),
            F::ToNumber => simple("number", self),
            F::ToInteger => format!("$floor($number({}))", self.arg(args, 0)),
            F::ToBoolean => simple("boolean", self),
            F::ParseJson => simple("eval", self),

            F::Now => "$now()".to_string(),
            F::FormatDate => {
                let value = self.arg(args, 0);
                let picture = self.picture(args.get(1));
                format!("$fromMillis($toMillis({value}), {picture})")
            }
            F::ParseDate => {
                let value = self.arg(args, 0);
                let picture = self.picture(args.get(1));
                format!("$fromMillis($toMillis({value}, {picture}))")
            }
            F::AddDays => {
                let value = self.arg(args, 0);
                let days = self.arg(args, 1);
                format!("$fromMillis($toMillis({value}) + {days} * 86400000)")
            }
            F::ToUnix => format!("$floor($toMillis({}) / 1000)", self.arg(args, 0)),

            F::Custom(name) => simple(&identifier(name), self),
            F::Inline => {
                let text = match args.first() {
                    Some(Expression::Literal { value: Value::String(s), .. }) => s.clone(),
                    _ => return placeholder("empty inline expression"),
                };
                let bindings: Vec<String> = args[1..]
                    .iter()
                    .enumerate()
                    .map(|(i, a)| format!("$input{i} := {};", self.render(a)))
                    .collect();
                if bindings.is_empty() {
                    format!("({text})")
                } else {
                    format!("({} {text})", bindings.join(" "))
                }
            }
            // A well-formed map call was handled in `render`.
            F::Map => placeholder("malformed map"),
            F::Unsupported(kind) => placeholder(&format!("unsupported: {kind}")),
        }
    }

    /// Date format argument; literal .NET-style formats become pictures.
    fn picture(&mut self, format: Option<&Expression>) -> String {
        match format {
            Some(Expression::Literal { value: Value::String(s), .. }) => quote(&date_picture(s)),
            Some(other) => self.render(other),
            None => quote(&date_picture("yyyy-MM-dd")),
        }
    }
}

fn literal(value: &Value, ty: LiteralType) -> String {
    match (ty, value) {
        (LiteralType::String, Value::String(s)) => quote(s),
        (LiteralType::String, other) => quote(&other.to_string()),
        (LiteralType::Null, _) => "null".to_string(),
        (_, Value::Number(_) | Value::Bool(_)) => value.to_string(),
        (ty, other) => placeholder(&format!("literal {other} is not a {ty:?}")),
    }
}

fn binary(op: BinaryOp, left: &str, right: &str) -> String {
    let symbol = match op {
        BinaryOp::Power => return format!("$power({left}, {right})"),
        BinaryOp::Coalesce => return format!("($exists({left}) and {left} != null ? {left} : {right})"),
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::Modulo => "%",
        BinaryOp::Equal => "=",
        BinaryOp::NotEqual => "!=",
        BinaryOp::GreaterThan => ">",
        BinaryOp::GreaterThanOrEqual => ">=",
        BinaryOp::LessThan => "<",
        BinaryOp::LessThanOrEqual => "<=",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
    };
    format!("({left} {symbol} {right})")
}

fn placeholder(note: &str) -> String {
    format!("null /* {} */", comment_text(note))
}

/// `yyyy-MM-dd HH:mm` → `[Y0001]-[M01]-[D01] [H01]:[m01]`.
fn date_picture(format: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        ("yyyy", "[Y0001]"),
        ("yy", "[Y01]"),
        ("MM", "[M01]"),
        ("dd", "[D01]"),
        ("HH", "[H01]"),
        ("hh", "[h01]"),
        ("mm", "[m01]"),
        ("ss", "[s01]"),
        ("fff", "[f001]"),
        ("tt", "[P]"),
    ];
    let mut out = String::with_capacity(format.len() * 2);
    let mut rest = format;
    'scan: while !rest.is_empty() {
        for (token, picture) in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(picture);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            match c {
                '[' => out.push_str("[["),
                ']' => out.push_str("]]"),
                c => out.push(c),
            }
        }
        rest = chars.as_str();
    }
    out
}

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

    fn object(pairs: Vec<(&str, Expression)>) -> Expression {
        Expression::Object { properties: pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect() }
    }

    fn options(indent: usize) -> GeneratorOptions {
        GeneratorOptions { indent, ..GeneratorOptions::default() }
    }

    #[test]
    fn multiply_nests_under_the_part_name() {
        let ir = ir(vec![(
            "body.lineTotal",
            Expression::binary(BinaryOp::Multiply, Expression::field("body.qty"), Expression::field("body.price")),
        )]);
        assert_eq!(
            generate_declarative(&ir, &options(2), None),
            "{\n  \"body\": {\n    \"lineTotal\": (body.qty * body.price)\n  }\n}\n"
        );
    }

    #[test]
    fn array_groups_render_as_one_projection() {
        let ir = ir(vec![(
            "body.items",
            Expression::array_map(
                "source.items",
                &item_scope(0),
                object(vec![("a", Expression::field("$item.x")), ("b", Expression::field("$item.y"))]),
            ),
        )]);
        let text = generate_declarative(&ir, &options(2), None);
        assert_eq!(text.matches("source.items.{").count(), 1);
        assert_eq!(
            text,
            "{\n  \"body\": {\n    \"items\": [source.items.{\n      \"a\": x,\n      \"b\": y\n    }]\n  }\n}\n"
        );
    }

    #[test]
    fn nested_scopes_reach_parents_and_root() {
        let inner = Expression::array_map(
            "$item.lines",
            "$item1",
            object(vec![
                ("sku", Expression::field("$item1.sku")),
                ("order", Expression::field("$item.id")),
                ("currency", Expression::field("in.currency")),
            ]),
        );
        let ir = ir(vec![("out.orders", Expression::array_map("in.orders", "$item", object(vec![("lines", inner)])))]);
        let text = generate_declarative(&ir, &options(2), None);
        assert!(text.contains("\"lines\": [lines.{"));
        assert!(text.contains("\"sku\": sku,"));
        assert!(text.contains("\"order\": %.id,"));
        assert!(text.contains("\"currency\": $$.`in`.currency"));
        assert!(text.contains("[`in`.orders.{"));
    }

    #[test]
    fn primitive_elements_use_a_parenthesized_body() {
        let ir = ir(vec![(
            "out.tags",
            Expression::array_map("in.tags", "$item", Expression::call(Function::Upper, vec![Expression::field("$item")])),
        )]);
        let text = generate_declarative(&ir, &options(2), None);
        assert!(text.contains("\"tags\": [`in`.tags.($uppercase($))]"));
    }

    #[test]
    fn shared_expressions_are_bound_once() {
        let mut ir = ir(vec![
            ("out.a", Expression::shared_ref("now1")),
            ("out.b", Expression::call(Function::Upper, vec![Expression::shared_ref("now1")])),
        ]);
        ir.shared_expressions.push(SharedExpression { var_name: "now1".into(), expression: Expression::call(Function::Now, vec![]) });
        let text = generate_declarative(&ir, &options(2), Some("clock"));
        assert_eq!(text.matches("$now()").count(), 1);
        assert_eq!(
            text,
            "/* Mapper: clock */\n(\n  $now1 := $now();\n  {\n    \"out\": {\n      \"a\": $now1,\n      \"b\": $uppercase($now1)\n    }\n  }\n)\n"
        );
    }

    #[test]
    fn operators_and_functions_translate() {
        let ir = ir(vec![
            ("o.c", Expression::binary(BinaryOp::Coalesce, Expression::field("i.a"), Expression::string("n/a"))),
            ("o.e", Expression::binary(BinaryOp::And, Expression::field("i.x"), Expression::literal(json!(true)))),
            (
                "o.d",
                Expression::call(Function::FormatDate, vec![Expression::field("i.when"), Expression::string("dd/MM/yyyy")]),
            ),
            ("o.p", Expression::call(Function::PadLeft, vec![Expression::field("i.n"), Expression::literal(json!(5)), Expression::string("0")])),
            ("o.u", Expression::call(Function::Unsupported("Geo.Distance".into()), vec![])),
        ]);
        let text = generate_declarative(&ir, &options(2), None);
        assert!(text.contains("\"c\": ($exists(i.a) and i.a != null ? i.a : \"n/a\")"));
        assert!(text.contains("\"e\": (i.x and true)"));
        assert!(text.contains("\"d\": $fromMillis($toMillis(i.when), \"[D01]/[M01]/[Y0001]\")"));
        assert!(text.contains("\"p\": $pad(i.n, -5, \"0\")"));
        assert!(text.contains("\"u\": null /* unsupported: Geo.Distance */"));
    }

    #[test]
    fn awkward_names_are_backticked() {
        assert_eq!(step("line-total"), "`line-total`");
        assert_eq!(step("or"), "`or`");
        assert_eq!(step("total"), "total");
        assert_eq!(date_picture("HH:mm [x]"), "[H01]:[m01] [[x]]");
    }
}
