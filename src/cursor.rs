//! # Cursor Utilities
//!
//! Opaque keyset pagination cursors for job listings. A cursor pins the
//! `(created_at, id)` of the last job on a page; the next page continues
//! strictly after it in newest-first order.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestratorError;

/// Position of the last job returned on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorData {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

/// Encode cursor data as an opaque base64 string
pub fn encode_cursor(created_at: &DateTime<Utc>, id: &Uuid) -> String {
    let cursor_data = CursorData {
        created_at: *created_at,
        id: *id,
    };
    // Serializing a timestamp and a uuid cannot fail.
    let json = serde_json::to_string(&cursor_data).unwrap_or_default();
    base64::engine::general_purpose::STANDARD.encode(json.as_bytes())
}

fn invalid(message: &str) -> OrchestratorError {
    OrchestratorError::invalid_field("cursor", message)
}

/// Decode cursor data from an opaque base64 string with validation
pub fn decode_cursor(cursor: &str) -> Result<CursorData, OrchestratorError> {
    if cursor.len() > 1000 {
        return Err(invalid("cursor is too long"));
    }

    if cursor.is_empty() {
        return Err(invalid("cursor cannot be empty"));
    }

    if !cursor
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
    {
        return Err(invalid("cursor contains invalid characters"));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(cursor)
        .map_err(|_| invalid("cursor is not valid base64"))?;

    if decoded.is_empty() {
        return Err(invalid("cursor is empty after decoding"));
    }

    if decoded.len() > 500 {
        return Err(invalid("decoded cursor is too large"));
    }

    let json =
        String::from_utf8(decoded).map_err(|_| invalid("cursor contains invalid UTF-8 data"))?;

    let cursor_data: CursorData = serde_json::from_str(&json)
        .map_err(|_| invalid("cursor contains invalid JSON structure"))?;

    if cursor_data.created_at > Utc::now() + chrono::Duration::days(1) {
        return Err(invalid("cursor timestamp is in the future"));
    }

    if cursor_data.id == Uuid::nil() {
        return Err(invalid("cursor contains invalid ID"));
    }

    Ok(cursor_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(err: OrchestratorError) -> String {
        match err {
            OrchestratorError::InvalidParameters { message, field } => {
                assert_eq!(field.as_deref(), Some("cursor"));
                message
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cursor_encoding_decoding() {
        let created_at = Utc::now();
        let id = Uuid::new_v4();

        let cursor_str = encode_cursor(&created_at, &id);
        let decoded = decode_cursor(&cursor_str).unwrap();

        assert_eq!(decoded.created_at, created_at);
        assert_eq!(decoded.id, id);
    }

    #[test]
    fn test_old_cursor_is_accepted() {
        let created_at = Utc::now() - chrono::Duration::days(900);
        let id = Uuid::new_v4();
        assert!(decode_cursor(&encode_cursor(&created_at, &id)).is_ok());
    }

    #[test]
    fn test_empty_cursor() {
        let err = decode_cursor("").unwrap_err();
        assert!(message(err).contains("cannot be empty"));
    }

    #[test]
    fn test_cursor_too_long() {
        let err = decode_cursor(&"a".repeat(1001)).unwrap_err();
        assert!(message(err).contains("too long"));
    }

    #[test]
    fn test_cursor_invalid_characters() {
        let err = decode_cursor("cursor@#$%").unwrap_err();
        assert!(message(err).contains("invalid characters"));
    }

    #[test]
    fn test_cursor_invalid_utf8() {
        let err = decode_cursor("//8=").unwrap_err();
        assert!(message(err).contains("invalid UTF-8"));
    }

    #[test]
    fn test_cursor_invalid_json() {
        // "invalid json"
        let err = decode_cursor("aW52YWxpZCBqc29u").unwrap_err();
        assert!(message(err).contains("invalid JSON structure"));
    }

    #[test]
    fn test_cursor_nil_uuid() {
        let cursor_str = encode_cursor(&Utc::now(), &Uuid::nil());
        let err = decode_cursor(&cursor_str).unwrap_err();
        assert!(message(err).contains("invalid ID"));
    }

    #[test]
    fn test_cursor_timestamp_in_future() {
        let created_at = Utc::now() + chrono::Duration::days(30);
        let cursor_str = encode_cursor(&created_at, &Uuid::new_v4());
        let err = decode_cursor(&cursor_str).unwrap_err();
        assert!(message(err).contains("future"));
    }
}
