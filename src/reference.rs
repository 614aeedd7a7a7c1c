//! Schema references and the resolver capability.
//!
//! This crate never goes looking for schemas on its own: callers hand in a
//! [`SchemaResolver`] and the pipeline asks it for `{domain, flow, key, version}`.
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use serde_json::Value;

use crate::error::ReferenceKeyError;

/// `domain/flow/key@version`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceKey {
    pub domain: String,
    pub flow: String,
    pub key: String,
    pub version: String,
}

/// `schemaRef` values that mean "the schema is embedded in the part definition".
const EMBEDDED_REF_PREFIXES: &[&str] = &["custom", "embedded"];

pub fn is_embedded_ref(schema_ref: &str) -> bool {
    EMBEDDED_REF_PREFIXES.iter().any(|prefix| {
        schema_ref == *prefix
            || schema_ref.starts_with(&format!("{prefix}/"))
            || schema_ref.starts_with(&format!("{prefix}:"))
    })
}

fn valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn check_segment(input: &str, segment: &'static str, value: &str) -> Result<(), ReferenceKeyError> {
    if value.is_empty() {
        return Err(ReferenceKeyError::EmptySegment { input: input.to_string(), segment });
    }
    if let Some(ch) = value.chars().find(|c| !valid_char(*c)) {
        return Err(ReferenceKeyError::InvalidCharacter { input: input.to_string(), segment, ch });
    }
    Ok(())
}

impl FromStr for ReferenceKey {
    type Err = ReferenceKeyError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ReferenceKeyError::Empty);
        }
        let (body, version) = trimmed
            .rsplit_once('@')
            .ok_or_else(|| ReferenceKeyError::MissingVersion(trimmed.to_string()))?;
        if version.is_empty() {
            return Err(ReferenceKeyError::EmptyVersion(trimmed.to_string()));
        }
        let segments: Vec<&str> = body.split('/').collect();
        if segments.len() != 3 {
            return Err(ReferenceKeyError::SegmentCount {
                input: trimmed.to_string(),
                found: segments.len(),
            });
        }
        check_segment(trimmed, "domain", segments[0])?;
        check_segment(trimmed, "flow", segments[1])?;
        check_segment(trimmed, "key", segments[2])?;
        check_segment(trimmed, "version", version)?;
        Ok(ReferenceKey {
            domain: segments[0].to_string(),
            flow: segments[1].to_string(),
            key: segments[2].to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}@{}", self.domain, self.flow, self.key, self.version)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// RESOLVERS
// ————————————————————————————————————————————————————————————————————————————

pub trait SchemaResolver {
    /// `None` means "unknown reference"; the caller reports it.
    fn resolve(&self, key: &ReferenceKey) -> Option<Value>;
}

/// Resolves nothing. Embedded schemas still work.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResolver;

impl SchemaResolver for NoResolver {
    fn resolve(&self, _: &ReferenceKey) -> Option<Value> {
        None
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    schemas: HashMap<ReferenceKey, Value>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, key: ReferenceKey, schema: Value) -> Self {
        self.schemas.insert(key, schema);
        self
    }
}

impl SchemaResolver for StaticResolver {
    fn resolve(&self, key: &ReferenceKey) -> Option<Value> {
        self.schemas.get(key).cloned()
    }
}

/// Looks up `<root>/<domain>/<flow>/<key>@<version>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn file_path(&self, key: &ReferenceKey) -> PathBuf {
        self.root
            .join(&key.domain)
            .join(&key.flow)
            .join(format!("{}@{}.json", key.key, key.version))
    }
}

impl SchemaResolver for DirectoryResolver {
    fn resolve(&self, key: &ReferenceKey) -> Option<Value> {
        let path = self.file_path(key);
        let source = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Value>(&source) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "schema file is not valid JSON");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_key() {
        let key: ReferenceKey = "billing/invoice-flow/order.v2@1.4.0".parse().unwrap();
        assert_eq!(key.domain, "billing");
        assert_eq!(key.flow, "invoice-flow");
        assert_eq!(key.key, "order.v2");
        assert_eq!(key.version, "1.4.0");
        assert_eq!(key.to_string(), "billing/invoice-flow/order.v2@1.4.0");
    }

    #[test]
    fn malformed_keys_fail_fast() {
        assert_eq!("".parse::<ReferenceKey>(), Err(ReferenceKeyError::Empty));
        assert!(matches!(
            "a/b/c".parse::<ReferenceKey>(),
            Err(ReferenceKeyError::MissingVersion(_))
        ));
        assert!(matches!(
            "a/b/c@".parse::<ReferenceKey>(),
            Err(ReferenceKeyError::EmptyVersion(_))
        ));
        assert!(matches!(
            "a/b@1".parse::<ReferenceKey>(),
            Err(ReferenceKeyError::SegmentCount { found: 2, .. })
        ));
        assert!(matches!(
            "a//c@1".parse::<ReferenceKey>(),
            Err(ReferenceKeyError::EmptySegment { segment: "flow", .. })
        ));
        assert!(matches!(
            "a/b c/d@1".parse::<ReferenceKey>(),
            Err(ReferenceKeyError::InvalidCharacter { ch: ' ', .. })
        ));
    }

    #[test]
    fn embedded_refs_are_recognized() {
        assert!(is_embedded_ref("custom"));
        assert!(is_embedded_ref("embedded:body"));
        assert!(is_embedded_ref("custom/headers"));
        assert!(!is_embedded_ref("customer/flow/key@1"));
    }

    #[test]
    fn static_resolver_returns_registered_schema() {
        let key: ReferenceKey = "d/f/k@1".parse().unwrap();
        let resolver = StaticResolver::new().with(key.clone(), serde_json::json!({"type": "object"}));
        assert_eq!(resolver.resolve(&key), Some(serde_json::json!({"type": "object"})));
        assert_eq!(NoResolver.resolve(&key), None);
    }
}
