//! Two projections of a resolved schema: a navigable tree (for binding in the
//! editor) and the flat list of leaf terminals (graph connection points).
use std::collections::BTreeSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::path::{BranchLabel, PathSegment, SchemaPath};
use super::{properties, required_names, schema_type};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    /// Display path, may contain `@branch:` segments.
    pub path: String,
    /// Addressable path with branch segments stripped.
    pub real_path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub children: Vec<TreeNode>,
    pub is_leaf: bool,
    pub is_array_item: bool,
    pub is_user_added: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchLabel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Terminal {
    /// Display path (unique per terminal).
    pub id: String,
    /// Real path; what edges and generated code address.
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

fn type_name(schema: &Value) -> String {
    schema_type(schema).unwrap_or("any").to_string()
}

fn is_container_type(ty: &str) -> bool {
    ty == "object" || ty == "array"
}

// ————————————————————————————————————————————————————————————————————————————
// TREE
// ————————————————————————————————————————————————————————————————————————————

pub fn build_tree(schema: &Value, root: &SchemaPath, user_added: &BTreeSet<String>) -> TreeNode {
    build_node(schema, root, false, user_added)
}

fn build_node(schema: &Value, path: &SchemaPath, is_array_item: bool, user_added: &BTreeSet<String>) -> TreeNode {
    let mut children = Vec::new();
    if let Some(props) = properties(schema) {
        for (name, child) in props {
            children.push(build_node(child, &path.property(name), false, user_added));
        }
    }
    if let Some(items) = schema.get("items").filter(|i| i.is_object()) {
        children.push(build_node(items, &path.items(), true, user_added));
    }

    let ty = type_name(schema);
    let display = path.to_string();
    let real = path.real().to_string();
    let branch = match path.segments().last() {
        Some(PathSegment::Branch(b)) => Some(b.clone()),
        _ => None,
    };
    TreeNode {
        id: display.clone(),
        path: display,
        is_user_added: user_added.contains(&real),
        real_path: real,
        name: path.last_name(),
        is_leaf: children.is_empty() && !is_container_type(&ty),
        ty,
        children,
        is_array_item,
        branch,
    }
}

impl TreeNode {
    /// Depth-first search by display path.
    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(path))
    }

    pub fn leaves(&self) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a TreeNode>) {
        if self.is_leaf {
            out.push(self);
        }
        for child in &self.children {
            child.collect_leaves(out);
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// FLATTEN
// ————————————————————————————————————————————————————————————————————————————

/// Depth-first walk to leaf terminals.
///
/// `optional` comes from the nearest ancestor's `required` list. Anything
/// under an array boundary or a discriminated branch is optional.
pub fn flatten(schema: &Value, root: &SchemaPath) -> Vec<Terminal> {
    let mut out = Vec::new();
    walk(schema, root, false, false, &mut out);
    out
}

fn walk(schema: &Value, path: &SchemaPath, optional: bool, always_optional: bool, out: &mut Vec<Terminal>) {
    let ty = type_name(schema);
    let props = properties(schema);
    let items = schema.get("items").filter(|i| i.is_object());

    if let Some(props) = props {
        let required = required_names(schema);
        for (name, child) in props {
            let child_path = path.property(name);
            let conditional = matches!(child_path.segments().last(), Some(PathSegment::Branch(_)));
            let forced = always_optional || conditional;
            let child_optional = forced || !required.contains(&name.as_str());
            walk(child, &child_path, child_optional, forced, out);
        }
    }
    if let Some(items) = items {
        walk(items, &path.items(), true, true, out);
    }
    if props.is_none() && items.is_none() && !is_container_type(&ty) {
        out.push(Terminal {
            id: path.to_string(),
            path: path.real().to_string(),
            name: path.last_name(),
            ty,
            optional,
            format: schema.get("format").and_then(Value::as_str).map(str::to_string),
        });
    }
}
