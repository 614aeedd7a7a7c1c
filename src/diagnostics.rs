//! Diagnostics as data.
//!
//! Every stage that can notice something questionable (resolver, overlay merger,
//! lowering, validation) takes a `&mut dyn DiagnosticSink` instead of printing.
//! The library stays silent by default; the CLI decides what to do with them.
use std::fmt;
use serde::{Deserialize, Serialize};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// structurally invalid
    Error,
    /// likely wrong, still processable
    Warning,
    /// advisory
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable, kebab-case identifier (e.g. `overlay-scope-not-found`).
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: Diagnostic);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

/// Forwards diagnostics to `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Diagnostic {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity, code: code.into(), message: message.into(), path: None }
    }
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }
    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }
    pub fn info(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, message)
    }
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.code, self.message)?;
        if let Some(path) = &self.path {
            write!(f, " (at {path})")?;
        }
        Ok(())
    }
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn emit(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

impl DiagnosticSink for NullSink {
    fn emit(&mut self, _: Diagnostic) {}
}

impl DiagnosticSink for TracingSink {
    fn emit(&mut self, d: Diagnostic) {
        match d.severity {
            Severity::Error => tracing::error!(code = %d.code, path = ?d.path, "{}", d.message),
            Severity::Warning => tracing::warn!(code = %d.code, path = ?d.path, "{}", d.message),
            Severity::Info => tracing::info!(code = %d.code, path = ?d.path, "{}", d.message),
        }
    }
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_path() {
        let d = Diagnostic::warning("empty-schema-part", "source part has no properties").at("body");
        assert_eq!(d.to_string(), "warning[empty-schema-part]: source part has no properties (at body)");
    }

    #[test]
    fn silenced_lowering_produces_the_same_ir() {
        use crate::lower::{lower, KnownTerminals};
        use crate::mapspec::MapSpec;

        let spec: MapSpec = serde_json::from_value(serde_json::json!({
            "nodes": [{ "id": "geo", "kind": "Geo.Distance" }],
            "edges": [{ "source": "in.a", "target": "geo" }, { "source": "geo", "target": "out.d" }]
        }))
        .unwrap();
        let mut collected: Vec<Diagnostic> = Vec::new();
        let reported = lower(&spec, &KnownTerminals::new(), &mut collected);
        let silenced = lower(&spec, &KnownTerminals::new(), &mut NullSink);
        assert_eq!(collected.len(), 1);
        assert_eq!(reported, silenced);
    }

    #[test]
    fn vec_sink_collects_in_order() {
        let mut sink: Vec<Diagnostic> = Vec::new();
        sink.emit(Diagnostic::info("a", "first"));
        sink.emit(Diagnostic::error("b", "second"));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0].code, "a");
        assert!(has_errors(&sink));
    }
}
