use std::path::PathBuf;
use thiserror::Error;

/// Malformed `domain/flow/key@version` strings. These fail fast; nothing
/// downstream can make sense of a half-parsed reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceKeyError {
    #[error("reference key is empty")]
    Empty,
    #[error("reference key `{0}` has no `@version` suffix")]
    MissingVersion(String),
    #[error("reference key `{0}` has an empty version after `@`")]
    EmptyVersion(String),
    #[error("reference key `{input}` must have exactly three `/`-separated segments (domain/flow/key), found {found}")]
    SegmentCount { input: String, found: usize },
    #[error("reference key `{input}` has an empty `{segment}` segment")]
    EmptySegment { input: String, segment: &'static str },
    #[error("reference key `{input}`: `{segment}` contains invalid character {ch:?}")]
    InvalidCharacter { input: String, segment: &'static str, ch: char },
}

#[derive(Debug, Error)]
pub enum MapSpecError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {what}: at JSON path {path} → {message}")]
    Parse {
        what: &'static str,
        path: String,
        message: String,
    },
    #[error(transparent)]
    ReferenceKey(#[from] ReferenceKeyError),
}
