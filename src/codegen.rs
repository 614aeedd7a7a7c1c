//! Code generation from [`MapperIr`].
//!
//! Two backends read the same IR:
//! - [`structural`]: a C# class over Newtonsoft `JObject`s (property assignments
//!   or one composite object literal)
//! - [`declarative`]: a single JSONata expression
//!
//! Neither backend fails. IR they cannot express becomes an inert value with
//! a comment next to it, so the output always parses.
pub mod declarative;
pub mod structural;

use std::path::Path;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::MapSpecError;
use crate::ir::{Expression, MapperIr};
use crate::schema::SchemaPath;

pub use declarative::generate_declarative;
pub use structural::generate_structural;

// ————————————————————————————————————————————————————————————————————————————
// OPTIONS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StructuralStyle {
    /// Lazily created containers plus one assignment per mapping.
    #[default]
    Assignments,
    /// One nested `new JObject(...)` literal.
    ObjectLiteral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorOptions {
    /// Generated class name; derived from the MapSpec name when empty.
    pub class_name: String,
    pub method_name: String,
    pub input_name: String,
    pub namespace: Option<String>,
    pub structural_style: StructuralStyle,
    pub indent: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            class_name: String::new(),
            method_name: "Map".to_string(),
            input_name: "input".to_string(),
            namespace: None,
            structural_style: StructuralStyle::Assignments,
            indent: 4,
        }
    }
}

impl GeneratorOptions {
    pub fn from_file(path: &Path) -> Result<Self, MapSpecError> {
        crate::path_de::from_file_with_path("generator options", path)
    }

    /// `order-lines` → `OrderLinesMapper`.
    pub fn resolved_class_name(&self, mapper_name: Option<&str>) -> String {
        if !self.class_name.is_empty() {
            return identifier(&self.class_name);
        }
        let base = mapper_name.map(pascal_case).filter(|s| !s.is_empty()).unwrap_or_else(|| "Generated".to_string());
        format!("{}Mapper", identifier(&base))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// OUTPUT TREE
// ————————————————————————————————————————————————————————————————————————————

/// Mappings nested by target path segment (`body.a.b` → body → a → b).
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OutputTree<'ir> {
    Leaf(&'ir Expression),
    Branch(IndexMap<String, OutputTree<'ir>>),
}

/// First writer wins when a leaf and a container claim the same path.
pub(crate) fn output_tree(ir: &MapperIr) -> IndexMap<String, OutputTree<'_>> {
    let mut root = IndexMap::new();
    for mapping in &ir.mappings {
        let path = SchemaPath::parse(&mapping.target);
        let names = path.property_names();
        insert(&mut root, &names, &mapping.expression);
    }
    root
}

/// Leaves of an output tree with their full name paths, in tree order.
pub(crate) fn output_leaves<'ir>(tree: &IndexMap<String, OutputTree<'ir>>) -> Vec<(Vec<String>, &'ir Expression)> {
    fn walk<'ir>(
        level: &IndexMap<String, OutputTree<'ir>>,
        prefix: &mut Vec<String>,
        out: &mut Vec<(Vec<String>, &'ir Expression)>,
    ) {
        for (name, node) in level {
            prefix.push(name.clone());
            match node {
                OutputTree::Leaf(expression) => out.push((prefix.clone(), *expression)),
                OutputTree::Branch(children) => walk(children, prefix, out),
            }
            prefix.pop();
        }
    }
    let mut out = Vec::new();
    walk(tree, &mut Vec::new(), &mut out);
    out
}

fn insert<'ir>(level: &mut IndexMap<String, OutputTree<'ir>>, names: &[&str], expression: &'ir Expression) {
    let Some((head, tail)) = names.split_first() else { return };
    if tail.is_empty() {
        level.entry(head.to_string()).or_insert(OutputTree::Leaf(expression));
        return;
    }
    let slot = level.entry(head.to_string()).or_insert_with(|| OutputTree::Branch(IndexMap::new()));
    if let OutputTree::Branch(children) = slot {
        insert(children, tail, expression);
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TEXT HELPERS
// ————————————————————————————————————————————————————————————————————————————

/// Double-quoted string literal; JSON escapes are valid in both targets.
pub(crate) fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Text safe to place inside a `/* ... */` comment.
pub(crate) fn comment_text(s: &str) -> String {
    s.replace("*/", "* /").replace(['\n', '\r'], " ")
}

pub(crate) fn identifier(raw: &str) -> String {
    let mut out: String = raw.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn pascal_case(raw: &str) -> String {
    raw.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Line-oriented text buffer with an indent level.
pub(crate) struct Writer {
    buf: String,
    unit: String,
    level: usize,
}

impl Writer {
    pub(crate) fn new(indent: usize) -> Self {
        Self { buf: String::new(), unit: " ".repeat(indent.max(1)), level: 0 }
    }

    pub(crate) fn line(&mut self, text: &str) {
        if text.is_empty() {
            self.buf.push('\n');
            return;
        }
        for part in text.split('\n') {
            self.buf.push_str(&self.unit.repeat(self.level));
            self.buf.push_str(part);
            self.buf.push('\n');
        }
    }

    pub(crate) fn indent(&mut self) {
        self.level += 1;
    }

    pub(crate) fn dedent(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    pub(crate) fn unit(&self) -> &str {
        &self.unit
    }

    pub(crate) fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Mapping;

    #[test]
    fn class_names_derive_from_mapper_name() {
        let options = GeneratorOptions::default();
        assert_eq!(options.resolved_class_name(Some("order-lines v2")), "OrderLinesV2Mapper");
        assert_eq!(options.resolved_class_name(None), "GeneratedMapper");
        let named = GeneratorOptions { class_name: "Custom.Name".into(), ..GeneratorOptions::default() };
        assert_eq!(named.resolved_class_name(Some("ignored")), "Custom_Name");
    }

    #[test]
    fn options_fill_missing_fields_with_defaults() {
        let options: GeneratorOptions = serde_json::from_str(r#"{ "structuralStyle": "objectLiteral", "indent": 2 }"#).unwrap();
        assert_eq!(options.structural_style, StructuralStyle::ObjectLiteral);
        assert_eq!(options.method_name, "Map");
        assert_eq!(options.indent, 2);
    }

    #[test]
    fn output_tree_nests_by_segment_and_keeps_first_writer() {
        let ir = MapperIr {
            mappings: vec![
                Mapping { target: "body.a.b".into(), expression: Expression::string("x") },
                Mapping { target: "body.c".into(), expression: Expression::string("y") },
                Mapping { target: "body.a".into(), expression: Expression::string("z") },
            ],
            shared_expressions: Vec::new(),
        };
        let tree = output_tree(&ir);
        let OutputTree::Branch(body) = &tree["body"] else { panic!("body should be a branch") };
        assert_eq!(body.keys().collect::<Vec<_>>(), ["a", "c"]);
        assert!(matches!(&body["a"], OutputTree::Branch(_)));
    }

    #[test]
    fn comments_cannot_be_closed_early() {
        assert_eq!(comment_text("a */ b\nc"), "a * / b c");
        assert_eq!(quote("say \"hi\""), r#""say \"hi\"""#);
    }
}
