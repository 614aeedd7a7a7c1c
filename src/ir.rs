//! Backend-agnostic mapper IR.
//!
//! Everything the code generators see is in this file: a list of target
//! mappings plus the shared expressions they reference. The IR serializes to
//! the `kind`-tagged JSON shape the editor tooling consumes.
use std::fmt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Element scope of the outermost array mapping; nested ones are `$item1`, `$item2`, ...
pub const ITEM_SCOPE: &str = "$item";

pub fn item_scope(depth: usize) -> String {
    if depth == 0 { ITEM_SCOPE.to_string() } else { format!("{ITEM_SCOPE}{depth}") }
}

pub fn is_item_scope(name: &str) -> bool {
    name.strip_prefix(ITEM_SCOPE).is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
}

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapperIr {
    pub mappings: Vec<Mapping>,
    pub shared_expressions: Vec<SharedExpression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    /// Real target path (`body.lineTotal`, or the array base `body.lines` for array mappings).
    pub target: String,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedExpression {
    pub var_name: String,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Expression {
    Literal {
        value: Value,
        #[serde(rename = "type")]
        ty: LiteralType,
    },
    Field {
        path: String,
    },
    #[serde(rename_all = "camelCase")]
    SharedRef {
        var_name: String,
    },
    Binary {
        operator: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        operator: UnaryOp,
        operand: Box<Expression>,
    },
    Call {
        function: Function,
        args: Vec<Expression>,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        config: Value,
    },
    Conditional {
        condition: Box<Expression>,
        then: Box<Expression>,
        #[serde(rename = "else")]
        else_: Box<Expression>,
    },
    Array {
        elements: Vec<Expression>,
    },
    Object {
        properties: IndexMap<String, Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiteralType {
    String,
    Number,
    Boolean,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")] Add,
    #[serde(rename = "-")] Subtract,
    #[serde(rename = "*")] Multiply,
    #[serde(rename = "/")] Divide,
    #[serde(rename = "%")] Modulo,
    #[serde(rename = "**")] Power,
    #[serde(rename = "==")] Equal,
    #[serde(rename = "!=")] NotEqual,
    #[serde(rename = ">")] GreaterThan,
    #[serde(rename = ">=")] GreaterThanOrEqual,
    #[serde(rename = "<")] LessThan,
    #[serde(rename = "<=")] LessThanOrEqual,
    #[serde(rename = "&&")] And,
    #[serde(rename = "||")] Or,
    #[serde(rename = "??")] Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "-")] Negate,
    #[serde(rename = "!")] Not,
}

macro_rules! functions {
    ($( $variant:ident => $wire:literal, )*) => {
        /// Named IR functions. The set is closed; user functions travel as
        /// [`Function::Custom`] (`custom:<name>` on the wire), and kinds no
        /// backend understands as [`Function::Unsupported`]
        /// (`unsupported:<kind>`).
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum Function {
            $( $variant, )*
            Custom(String),
            Unsupported(String),
        }

        impl Function {
            pub fn name(&self) -> &str {
                match self {
                    $( Function::$variant => $wire, )*
                    Function::Custom(name) => name,
                    Function::Unsupported(kind) => kind,
                }
            }

            fn from_wire(raw: &str) -> Function {
                if let Some(kind) = raw.strip_prefix(UNSUPPORTED_PREFIX) {
                    return Function::Unsupported(kind.to_string());
                }
                if let Some(name) = raw.strip_prefix(CUSTOM_PREFIX) {
                    return Function::Custom(name.to_string());
                }
                match raw {
                    $( $wire => Function::$variant, )*
                    other => Function::Custom(other.to_string()),
                }
            }
        }
    };
}

const UNSUPPORTED_PREFIX: &str = "unsupported:";
const CUSTOM_PREFIX: &str = "custom:";

functions! {
    Abs => "abs",
    Round => "round",
    Floor => "floor",
    Ceil => "ceil",
    Sqrt => "sqrt",
    Min => "min",
    Max => "max",
    Concat => "concat",
    Upper => "upper",
    Lower => "lower",
    Trim => "trim",
    Substring => "substring",
    Replace => "replace",
    Split => "split",
    Join => "join",
    Length => "length",
    Contains => "contains",
    StartsWith => "startsWith",
    EndsWith => "endsWith",
    PadLeft => "padLeft",
    IsNull => "isNull",
    IsEmpty => "isEmpty",
    Distinct => "distinct",
    First => "first",
    Last => "last",
    Reverse => "reverse",
    Sort => "sort",
    Flatten => "flatten",
    Sum => "sum",
    Average => "average",
    MinOf => "minOf",
    MaxOf => "maxOf",
    Count => "count",
    ToString => "string",
    ToNumber => "number",
    ToInteger => "integer",
    ToBoolean => "boolean",
    ParseJson => "parseJson",
    ToJson => "toJson",
    Now => "now",
    FormatDate => "formatDate",
    ParseDate => "parseDate",
    AddDays => "addDays",
    ToUnix => "toUnix",
    Map => "map",
    Inline => "inline",
}

impl From<String> for Function {
    fn from(raw: String) -> Self {
        Function::from_wire(&raw)
    }
}

impl From<Function> for String {
    fn from(f: Function) -> Self {
        match f {
            Function::Unsupported(kind) => format!("{UNSUPPORTED_PREFIX}{kind}"),
            Function::Custom(name) => format!("{CUSTOM_PREFIX}{name}"),
            other => other.name().to_string(),
        }
    }
}

impl Function {
    /// Calls that reduce or reorder a whole array given as first argument.
    pub fn folds_array(&self) -> bool {
        matches!(
            self,
            Function::Sum
                | Function::Average
                | Function::MinOf
                | Function::MaxOf
                | Function::Count
                | Function::Distinct
                | Function::First
                | Function::Last
                | Function::Reverse
                | Function::Sort
                | Function::Flatten
                | Function::Join
        )
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Borrowed view of an array-producing mapping (`call map`).
#[derive(Debug, Clone, Copy)]
pub struct ArrayMap<'a> {
    pub source: &'a str,
    pub scope: &'a str,
    /// Usually an object literal; a scalar element for primitive arrays.
    pub element: &'a Expression,
}

// ————————————————————————————————————————————————————————————————————————————
// CONSTRUCTORS
// ————————————————————————————————————————————————————————————————————————————

impl Expression {
    pub fn literal(value: Value) -> Self {
        let ty = match &value {
            Value::String(_) => LiteralType::String,
            Value::Number(_) => LiteralType::Number,
            Value::Bool(_) => LiteralType::Boolean,
            Value::Null => LiteralType::Null,
            // composite literals travel as their JSON text
            other => return Expression::Literal { value: Value::String(other.to_string()), ty: LiteralType::String },
        };
        Expression::Literal { value, ty }
    }

    pub fn null() -> Self {
        Expression::Literal { value: Value::Null, ty: LiteralType::Null }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expression::Literal { value: Value::String(s.into()), ty: LiteralType::String }
    }

    pub fn field(path: impl Into<String>) -> Self {
        Expression::Field { path: path.into() }
    }

    pub fn shared_ref(var_name: impl Into<String>) -> Self {
        Expression::SharedRef { var_name: var_name.into() }
    }

    pub fn binary(operator: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary { operator, left: Box::new(left), right: Box::new(right) }
    }

    pub fn unary(operator: UnaryOp, operand: Expression) -> Self {
        Expression::Unary { operator, operand: Box::new(operand) }
    }

    pub fn call(function: Function, args: Vec<Expression>) -> Self {
        Expression::Call { function, args, config: Value::Null }
    }

    pub fn conditional(condition: Expression, then: Expression, else_: Expression) -> Self {
        Expression::Conditional { condition: Box::new(condition), then: Box::new(then), else_: Box::new(else_) }
    }

    pub fn array_map(source: impl Into<String>, scope: &str, element: Expression) -> Self {
        let mut config = Map::new();
        config.insert("itemScope".to_string(), Value::String(scope.to_string()));
        Expression::Call {
            function: Function::Map,
            args: vec![Expression::field(source), element],
            config: Value::Object(config),
        }
    }

    pub fn as_array_map(&self) -> Option<ArrayMap<'_>> {
        let Expression::Call { function: Function::Map, args, config } = self else { return None };
        let (Some(Expression::Field { path }), Some(element), 2) = (args.first(), args.get(1), args.len()) else {
            return None;
        };
        let scope = config.get("itemScope").and_then(Value::as_str).unwrap_or(ITEM_SCOPE);
        Some(ArrayMap { source: path, scope, element })
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self, Expression::Literal { ty: LiteralType::Null, .. })
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TRAVERSAL
// ————————————————————————————————————————————————————————————————————————————

impl Expression {
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Literal { .. } | Expression::Field { .. } | Expression::SharedRef { .. } => Vec::new(),
            Expression::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expression::Unary { operand, .. } => vec![operand.as_ref()],
            Expression::Call { args, .. } => args.iter().collect(),
            Expression::Conditional { condition, then, else_ } => vec![condition.as_ref(), then.as_ref(), else_.as_ref()],
            Expression::Array { elements } => elements.iter().collect(),
            Expression::Object { properties } => properties.values().collect(),
        }
    }

    pub fn any(&self, pred: &impl Fn(&Expression) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any(pred))
    }

    /// Rewrite every field path in place.
    pub fn rewrite_fields(&mut self, f: &mut impl FnMut(&str) -> Option<String>) {
        match self {
            Expression::Field { path } => {
                if let Some(next) = f(path) {
                    *path = next;
                }
            }
            Expression::Literal { .. } | Expression::SharedRef { .. } => {}
            Expression::Binary { left, right, .. } => {
                left.rewrite_fields(f);
                right.rewrite_fields(f);
            }
            Expression::Unary { operand, .. } => operand.rewrite_fields(f),
            Expression::Call { args, .. } => args.iter_mut().for_each(|a| a.rewrite_fields(f)),
            Expression::Conditional { condition, then, else_ } => {
                condition.rewrite_fields(f);
                then.rewrite_fields(f);
                else_.rewrite_fields(f);
            }
            Expression::Array { elements } => elements.iter_mut().for_each(|e| e.rewrite_fields(f)),
            Expression::Object { properties } => properties.values_mut().for_each(|e| e.rewrite_fields(f)),
        }
    }

    /// Does any field path cross an array boundary (`[]`)?
    pub fn references_array_items(&self) -> bool {
        self.any(&|e| matches!(e, Expression::Field { path } if path.contains("[]")))
    }

    /// Like [`Self::references_array_items`], but a field read as the folded
    /// argument of an aggregate or collection call does not count: the call
    /// consumes the whole array and its value no longer depends on an element.
    pub fn has_free_array_items(&self) -> bool {
        match self {
            Expression::Field { path } => path.contains("[]"),
            Expression::Call { function, args, .. } if function.folds_array() => {
                args.iter().skip(1).any(Expression::has_free_array_items)
            }
            other => other.children().into_iter().any(Expression::has_free_array_items),
        }
    }

    pub fn shared_refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_shared_refs(&mut out);
        out
    }

    fn collect_shared_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Expression::SharedRef { var_name } = self {
            out.push(var_name);
        }
        for child in self.children() {
            child.collect_shared_refs(out);
        }
    }
}

impl MapperIr {
    pub fn shared(&self, var_name: &str) -> Option<&Expression> {
        self.shared_expressions.iter().find(|s| s.var_name == var_name).map(|s| &s.expression)
    }

    pub fn to_json_pretty(&self) -> String {
        // Only string keys and JSON values inside; serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expressions_serialize_as_kind_tagged_json() {
        let expr = Expression::binary(
            BinaryOp::Multiply,
            Expression::field("body.qty"),
            Expression::call(Function::Round, vec![Expression::field("body.price"), Expression::literal(json!(2))]),
        );
        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!({
                "kind": "binary",
                "operator": "*",
                "left": { "kind": "field", "path": "body.qty" },
                "right": {
                    "kind": "call",
                    "function": "round",
                    "args": [
                        { "kind": "field", "path": "body.price" },
                        { "kind": "literal", "value": 2, "type": "number" }
                    ]
                }
            })
        );
        assert_eq!(
            serde_json::to_value(Expression::shared_ref("now1")).unwrap(),
            json!({ "kind": "sharedRef", "varName": "now1" })
        );
    }

    #[test]
    fn function_names_survive_the_wire() {
        for f in [Function::StartsWith, Function::Custom("geoHash".into()), Function::Unsupported("Geo.Distance".into())] {
            let wire = serde_json::to_string(&f).unwrap();
            let back: Function = serde_json::from_str(&wire).unwrap();
            assert_eq!(back, f);
        }
        assert_eq!(String::from(Function::Unsupported("X.Y".into())), "unsupported:X.Y");
    }

    #[test]
    fn custom_functions_never_shadow_builtins() {
        let custom = Function::Custom("sum".into());
        let wire = serde_json::to_value(&custom).unwrap();
        assert_eq!(wire, json!("custom:sum"));
        assert_eq!(serde_json::from_value::<Function>(wire).unwrap(), custom);
        assert_eq!(serde_json::from_value::<Function>(json!("sum")).unwrap(), Function::Sum);
        assert_eq!(serde_json::from_value::<Function>(json!("geoHash")).unwrap(), Function::Custom("geoHash".into()));
    }

    #[test]
    fn folded_array_fields_are_not_free() {
        let sum = Expression::call(Function::Sum, vec![Expression::field("in.items[].price")]);
        assert!(sum.references_array_items());
        assert!(!sum.has_free_array_items());

        let scaled = Expression::binary(BinaryOp::Multiply, sum, Expression::field("in.items[].qty"));
        assert!(scaled.has_free_array_items());

        let joined = Expression::call(Function::Join, vec![Expression::field("in.tags[]"), Expression::field("in.rows[].sep")]);
        assert!(joined.has_free_array_items());
    }

    #[test]
    fn array_map_view() {
        let mut element = IndexMap::new();
        element.insert("a".to_string(), Expression::field("$item.x"));
        let expr = Expression::array_map("source.items", &item_scope(0), Expression::Object { properties: element });
        let view = expr.as_array_map().unwrap();
        assert_eq!(view.source, "source.items");
        assert_eq!(view.scope, "$item");
        assert!(matches!(view.element, Expression::Object { properties } if properties.len() == 1));
        assert!(is_item_scope("$item2"));
        assert!(!is_item_scope("$items"));
    }

    #[test]
    fn rewrite_fields_reaches_every_leaf() {
        let mut expr = Expression::conditional(
            Expression::field("a[].x"),
            Expression::Array { elements: vec![Expression::field("a[].y")] },
            Expression::null(),
        );
        assert!(expr.references_array_items());
        expr.rewrite_fields(&mut |p| p.strip_prefix("a[].").map(|rest| format!("$item.{rest}")));
        assert!(!expr.references_array_items());
        assert_eq!(expr.children()[0], &Expression::field("$item.x"));
    }
}
