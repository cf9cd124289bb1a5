//! JSON-level manifest rewriting
//!
//! These operate on the JSON document instead of the decoded model so that
//! fields this version does not know about survive, and are covered by the
//! signature.

use hotload_errors::{Error, ManifestError};
use serde_json::{Map, Value};

use crate::MANIFEST_MAX_SIZE;

const UNSIGNED: &str = "unsigned";

fn parse_object(manifest_json: &str) -> Result<Map<String, Value>, Error> {
    check_size(manifest_json.len())?;
    match serde_json::from_str::<Value>(manifest_json)? {
        Value::Object(object) => Ok(object),
        _ => Err(ManifestError::ParseError {
            message: "manifest is not a JSON object".to_string(),
        }
        .into()),
    }
}

pub(crate) fn check_size(size: usize) -> Result<(), ManifestError> {
    if size > MANIFEST_MAX_SIZE {
        return Err(ManifestError::TooLarge {
            size,
            max: MANIFEST_MAX_SIZE,
        });
    }
    Ok(())
}

/// The bytes that get signed: the manifest JSON with `unsigned` removed,
/// re-encoded compactly with keys in document order.
///
/// # Errors
/// Returns an error if `manifest_json` is not a JSON object or is oversized.
pub fn signature_payload(manifest_json: &str) -> Result<String, Error> {
    let mut object = parse_object(manifest_json)?;
    object.shift_remove(UNSIGNED);
    Ok(serde_json::to_string(&Value::Object(object))?)
}

/// Rewrite `unsigned.baseUrl`, placing `unsigned` first and `baseUrl` first
/// within it.
///
/// # Errors
/// Returns an error if `manifest_json` is not a JSON object or is oversized.
pub fn with_base_url(manifest_json: &str, base_url: &str) -> Result<String, Error> {
    rewrite_unsigned(manifest_json, "baseUrl", Value::String(base_url.to_string()))
}

/// Rewrite `unsigned.freshAtEpochMs`.
///
/// # Errors
/// Returns an error if `manifest_json` is not a JSON object or is oversized.
pub fn with_fresh_at(manifest_json: &str, fresh_at_epoch_ms: i64) -> Result<String, Error> {
    rewrite_unsigned(
        manifest_json,
        "freshAtEpochMs",
        Value::Number(fresh_at_epoch_ms.into()),
    )
}

fn rewrite_unsigned(manifest_json: &str, key: &str, value: Value) -> Result<String, Error> {
    let mut content = parse_object(manifest_json)?;

    let mut unsigned = match content.shift_remove(UNSIGNED) {
        Some(Value::Object(unsigned)) => unsigned,
        _ => Map::new(),
    };
    unsigned.shift_remove(key);

    let mut new_unsigned = Map::new();
    new_unsigned.insert(key.to_string(), value);
    new_unsigned.extend(unsigned);

    let mut new_content = Map::new();
    new_content.insert(UNSIGNED.to_string(), Value::Object(new_unsigned));
    new_content.extend(content);

    Ok(serde_json::to_string(&Value::Object(new_content))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_drops_unsigned_and_keeps_unknown_fields() {
        let json = r#"{"unsigned":{"signatures":{"k":"00"}},"modules":{},"mainModuleId":"a","extra":{"z":1,"a":2}}"#;
        assert_eq!(
            signature_payload(json).unwrap(),
            r#"{"modules":{},"mainModuleId":"a","extra":{"z":1,"a":2}}"#
        );
    }

    #[test]
    fn payload_ignores_whitespace() {
        let compact = r#"{"modules":{},"mainModuleId":"a"}"#;
        let pretty = "{\n  \"modules\": { },\n  \"mainModuleId\": \"a\"\n}";
        assert_eq!(
            signature_payload(compact).unwrap(),
            signature_payload(pretty).unwrap()
        );
    }

    #[test]
    fn base_url_goes_first_and_replaces_old_value() {
        let json = r#"{"modules":{},"unsigned":{"baseUrl":"old","signatures":{}},"mainModuleId":"a"}"#;
        assert_eq!(
            with_base_url(json, "https://cdn/app/").unwrap(),
            r#"{"unsigned":{"baseUrl":"https://cdn/app/","signatures":{}},"modules":{},"mainModuleId":"a"}"#
        );
    }

    #[test]
    fn rewriting_unsigned_does_not_change_payload() {
        let json = r#"{"modules":{},"mainModuleId":"a"}"#;
        let rewritten = with_fresh_at(&with_base_url(json, "u").unwrap(), 5).unwrap();
        assert_eq!(
            signature_payload(json).unwrap(),
            signature_payload(&rewritten).unwrap()
        );
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(signature_payload("[1,2]").is_err());
        assert!(signature_payload("not json").is_err());
    }
}
