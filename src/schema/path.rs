//! Typed schema paths.
//!
//! Display paths look like `body.config.@branch:type=6:HTTP Task.url` or
//! `body.items[].sku`. Internally a path is a list of [`PathSegment`]s, so
//! stripping branches or splitting at the first array boundary never has to
//! guess at string structure.
use std::fmt;
use serde::{Deserialize, Serialize};

pub const BRANCH_PREFIX: &str = "@branch:";
pub const ARRAY_INDICATOR: &str = "[]";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchLabel {
    pub field: String,
    pub value: String,
    /// `else` branches: matches when `field != value`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub negated: bool,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Property(String),
    Items,
    Branch(BranchLabel),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaPath(Vec<PathSegment>);

// ————————————————————————————————————————————————————————————————————————————
// BRANCH LABELS
// ————————————————————————————————————————————————————————————————————————————

/// Labels end up inside dotted paths; `.` and brackets would split them.
fn sanitize_label(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if matches!(c, '.' | '[' | ']' | ':') { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl BranchLabel {
    pub fn new(field: impl Into<String>, value: impl Into<String>, label: &str) -> Self {
        let value: String = value.into();
        Self { field: field.into(), value: sanitize_label(&value), negated: false, label: sanitize_label(label) }
    }

    pub fn negated(mut self) -> Self {
        self.negated = true;
        self
    }

    /// `type=6` / `type!=6`
    pub fn signature(&self) -> String {
        let op = if self.negated { "!=" } else { "=" };
        format!("{}{}{}", self.field, op, self.value)
    }

    /// Property name of the synthetic child in a resolved schema.
    pub fn property_name(&self) -> String {
        format!("{BRANCH_PREFIX}{}:{}", self.signature(), self.label)
    }

    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(BRANCH_PREFIX)?;
        let (signature, label) = rest.split_once(':')?;
        let (field, value, negated) = match signature.split_once("!=") {
            Some((f, v)) => (f, v, true),
            None => {
                let (f, v) = signature.split_once('=')?;
                (f, v, false)
            }
        };
        if field.is_empty() {
            return None;
        }
        Some(Self { field: field.to_string(), value: value.to_string(), negated, label: label.to_string() })
    }
}

pub fn is_branch_name(name: &str) -> bool {
    name.starts_with(BRANCH_PREFIX)
}

// ————————————————————————————————————————————————————————————————————————————
// PATHS
// ————————————————————————————————————————————————————————————————————————————

/// Strip the JSONPath root marker: `$.body.qty` → `body.qty`, `$` → ``.
pub fn normalize_path(raw: &str) -> &str {
    let s = raw.trim();
    if s == "$" {
        ""
    } else if let Some(rest) = s.strip_prefix("$.") {
        rest
    } else {
        s
    }
}

impl SchemaPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        for token in normalize_path(raw).split('.') {
            if token.is_empty() {
                continue;
            }
            if let Some(branch) = BranchLabel::parse(token) {
                segments.push(PathSegment::Branch(branch));
                continue;
            }
            let mut name = token;
            let mut items = 0;
            while let Some(stripped) = name.strip_suffix(ARRAY_INDICATOR) {
                name = stripped;
                items += 1;
            }
            if !name.is_empty() {
                segments.push(PathSegment::Property(name.to_string()));
            }
            segments.extend(std::iter::repeat_n(PathSegment::Items, items));
        }
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut next = self.0.clone();
        next.push(segment);
        Self(next)
    }

    pub fn property(&self, name: &str) -> Self {
        match BranchLabel::parse(name) {
            Some(branch) => self.child(PathSegment::Branch(branch)),
            None => self.child(PathSegment::Property(name.to_string())),
        }
    }

    pub fn items(&self) -> Self {
        self.child(PathSegment::Items)
    }

    /// The addressable path: branch segments removed.
    pub fn real(&self) -> Self {
        Self(self.0.iter().filter(|s| !matches!(s, PathSegment::Branch(_))).cloned().collect())
    }

    pub fn has_branch(&self) -> bool {
        self.0.iter().any(|s| matches!(s, PathSegment::Branch(_)))
    }

    pub fn has_items(&self) -> bool {
        self.0.contains(&PathSegment::Items)
    }

    /// Split at the first array boundary: `body.items[].sku` → (`body.items`, `sku`).
    pub fn split_first_items(&self) -> Option<(SchemaPath, SchemaPath)> {
        let at = self.0.iter().position(|s| *s == PathSegment::Items)?;
        Some((Self(self.0[..at].to_vec()), Self(self.0[at + 1..].to_vec())))
    }

    pub fn starts_with(&self, prefix: &SchemaPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn strip_prefix(&self, prefix: &SchemaPath) -> Option<SchemaPath> {
        self.starts_with(prefix).then(|| Self(self.0[prefix.0.len()..].to_vec()))
    }

    pub fn concat(&self, other: &SchemaPath) -> SchemaPath {
        let mut next = self.0.clone();
        next.extend(other.0.iter().cloned());
        Self(next)
    }

    /// Property names only, in order (array boundaries and branches dropped).
    pub fn property_names(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter_map(|s| match s {
                PathSegment::Property(p) => Some(p.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn first_property(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathSegment::Property(p)) => Some(p),
            _ => None,
        }
    }

    pub fn last_name(&self) -> String {
        match self.0.last() {
            Some(PathSegment::Property(p)) => p.clone(),
            Some(PathSegment::Items) => "items".to_string(),
            Some(PathSegment::Branch(b)) => b.label.clone(),
            None => String::new(),
        }
    }
}

impl fmt::Display for SchemaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.0 {
            match segment {
                PathSegment::Items => f.write_str(ARRAY_INDICATOR)?,
                PathSegment::Property(name) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                PathSegment::Branch(branch) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(&branch.property_name())?;
                }
            }
            first = false;
        }
        Ok(())
    }
}
