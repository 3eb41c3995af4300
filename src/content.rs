//! Operator-supplied content resolution
//!
//! `add-schema` and `add-transformer` accept inline text, `-` (or nothing)
//! for stdin, or `@path` for a file. Schema content is canonicalized before
//! storage; transformer content is stored verbatim.

use crate::db::{PayloadDraft, PayloadKind};
use std::io::Read;

/// Error type for content resolution and canonicalization
#[derive(Debug)]
pub enum ContentError {
    Stdin(std::io::Error),
    File(String, std::io::Error),
    InvalidJson(serde_json::Error),
}

impl std::fmt::Display for ContentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentError::Stdin(e) => write!(f, "Failed to read stdin: {}", e),
            ContentError::File(path, e) => write!(f, "Failed to read file '{}': {}", path, e),
            ContentError::InvalidJson(e) => write!(f, "Content is not valid JSON: {}", e),
        }
    }
}

impl std::error::Error for ContentError {}

impl From<serde_json::Error> for ContentError {
    fn from(e: serde_json::Error) -> Self {
        ContentError::InvalidJson(e)
    }
}

/// Resolve a content argument: empty or `-` reads stdin to end-of-stream,
/// `@path` reads the whole file, anything else is taken inline.
pub fn resolve(arg: &str) -> Result<String, ContentError> {
    if arg.is_empty() || arg == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .map_err(ContentError::Stdin)?;
        return Ok(content);
    }

    if let Some(path) = arg.strip_prefix('@') {
        return std::fs::read_to_string(path)
            .map_err(|e| ContentError::File(path.to_string(), e));
    }

    Ok(arg.to_string())
}

/// Parse and re-serialize JSON into its canonical form: sorted keys, no
/// insignificant whitespace. Equal logical content stores byte-identically.
pub fn canonicalize_json(content: &str) -> Result<String, ContentError> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    Ok(serde_json::to_string(&value)?)
}

/// Build a `schema` payload from operator content. The content must be
/// valid JSON and is canonicalized before storage.
pub fn schema_payload(content: &str) -> Result<PayloadDraft, ContentError> {
    let canonical = canonicalize_json(content)?;
    Ok(PayloadDraft::new(
        PayloadKind::Schema,
        "cli",
        "schema",
        canonical,
    ))
}

/// Build a `transformer` payload from operator content, stored verbatim
/// since transformer definitions are not guaranteed to be JSON.
pub fn transformer_payload(content: &str) -> PayloadDraft {
    PayloadDraft::new(
        PayloadKind::Transformer,
        "cli",
        "transformer",
        content.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_inline() {
        assert_eq!(resolve(r#"{"a":1}"#).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn test_resolve_file() {
        let path = std::env::temp_dir().join(format!("sediment-content-{}", std::process::id()));
        std::fs::write(&path, "file content").unwrap();

        let arg = format!("@{}", path.display());
        assert_eq!(resolve(&arg).unwrap(), "file content");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_resolve_missing_file() {
        match resolve("@/no/such/sediment/file") {
            Err(ContentError::File(path, _)) => assert_eq!(path, "/no/such/sediment/file"),
            other => panic!("expected File error, got {:?}", other),
        }
    }

    #[test]
    fn test_canonicalize_sorts_keys_and_strips_whitespace() {
        let a = canonicalize_json("{\"b\": 2,\n  \"a\": 1}").unwrap();
        let b = canonicalize_json(r#"{"a":1,"b":2}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_schema_payload_is_canonical() {
        let draft = schema_payload("{ \"required\": [\"a\"],\n\"type\": \"object\" }").unwrap();
        assert_eq!(draft.kind, PayloadKind::Schema);
        assert_eq!(draft.device, "cli");
        assert_eq!(draft.topic, "schema");
        assert_eq!(draft.payload, r#"{"required":["a"],"type":"object"}"#);
    }

    #[test]
    fn test_schema_payload_rejects_invalid_json() {
        assert!(matches!(
            schema_payload("not json"),
            Err(ContentError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_transformer_payload_verbatim() {
        let expr = "{a: a, doubled: a}";
        let draft = transformer_payload(expr);
        assert_eq!(draft.kind, PayloadKind::Transformer);
        assert_eq!(draft.topic, "transformer");
        assert_eq!(draft.payload, expr);
    }
}
