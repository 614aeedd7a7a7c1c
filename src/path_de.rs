use std::path::Path;
use serde::de::DeserializeOwned;
use crate::error::MapSpecError;

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(what: &'static str, src: &str) -> Result<T, MapSpecError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| MapSpecError::Parse {
        what,
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    })
}

pub fn from_slice_with_path<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<T, MapSpecError> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| MapSpecError::Parse {
        what,
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    })
}

pub fn from_file_with_path<T: DeserializeOwned>(what: &'static str, path: &Path) -> Result<T, MapSpecError> {
    let bytes = std::fs::read(path).map_err(|source| MapSpecError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    from_slice_with_path(what, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    struct Outer {
        #[allow(dead_code)]
        inner: Inner,
    }
    #[derive(Debug, serde::Deserialize)]
    struct Inner {
        #[allow(dead_code)]
        count: u32,
    }

    #[test]
    fn parse_errors_carry_json_path() {
        let err = from_str_with_path::<Outer>("fixture", r#"{"inner": {"count": "x"}}"#).unwrap_err();
        match err {
            MapSpecError::Parse { path, what, .. } => {
                assert_eq!(what, "fixture");
                assert_eq!(path, "inner.count");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
