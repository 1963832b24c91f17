//! Record file codec.
//!
//! Encode writes one canonical shape; decode is a fixed-priority ladder over
//! the shapes found in the wild, each tried as a pure function:
//!
//! 1. canonical object: `content` + `timestamp` (+ optional `id`)
//! 2. legacy object: `message` with optional `time`/`date`
//! 3. plain text: whole file is the content, timestamp from file mtime
//!
//! Shapes 1 and 2 must stay readable indefinitely. A failure to decode one
//! file never aborts its siblings; callers log and skip.

use serde_json::Value;
use thiserror::Error;

use crate::core::{MessageRecord, Timestamp, ValidationError};
use crate::error::{Effect, Transience};

/// Extension for canonical/legacy structured records.
pub const STRUCTURED_EXT: &str = "json";
/// Extension for plain-text records.
pub const PLAIN_EXT: &str = "txt";

/// One record file failed to decode.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record file is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("structured record must be a JSON object")]
    NotAnObject,

    #[error("object has neither `content`+`timestamp` nor `message` fields")]
    UnknownShape,

    #[error("field `{field}` must be a string")]
    BadField { field: &'static str },

    #[error(transparent)]
    BadTimestamp(#[from] ValidationError),
}

impl DecodeError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

/// Which shape a record file decoded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    Canonical,
    LegacyMessage,
    PlainText,
}

/// A decoded record file, shape-tagged, not yet attributed to a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub content: String,
    pub timestamp: Timestamp,
    pub shape: RecordShape,
    /// Present only in canonical records that carry one.
    pub id: Option<String>,
}

/// Canonical serialized form of a record.
pub fn encode(record: &MessageRecord) -> Vec<u8> {
    let value = serde_json::json!({
        "id": record.id,
        "content": record.content,
        "timestamp": record.timestamp.to_rfc3339(),
    });
    // Serializing string fields cannot fail; fall back to compact on the
    // pathological path rather than panic.
    serde_json::to_vec_pretty(&value).unwrap_or_else(|_| value.to_string().into_bytes())
}

/// Decode a structured (`.json`) record file.
///
/// `now` is the decode-time instant used when a legacy record carries no
/// timestamp of its own.
pub fn decode_structured(raw: &[u8], now: Timestamp) -> Result<Decoded, DecodeError> {
    let value: Value = serde_json::from_slice(raw)?;
    let Value::Object(map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let string_field = |field: &'static str| -> Result<Option<String>, DecodeError> {
        match map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(DecodeError::BadField { field }),
        }
    };

    // Shape 1: canonical.
    if let (Some(content), Some(ts)) = (string_field("content")?, string_field("timestamp")?) {
        return Ok(Decoded {
            content,
            timestamp: Timestamp::parse(&ts)?,
            shape: RecordShape::Canonical,
            id: string_field("id")?,
        });
    }

    // Shape 2: legacy `message` with optional `time`/`date`.
    if let Some(content) = string_field("message")? {
        let timestamp = match string_field("time")?.or(string_field("date")?) {
            Some(ts) => Timestamp::parse(&ts)?,
            None => now,
        };
        return Ok(Decoded {
            content,
            timestamp,
            shape: RecordShape::LegacyMessage,
            id: None,
        });
    }

    Err(DecodeError::UnknownShape)
}

/// Decode a plain-text (`.txt`) record file.
///
/// The file's last-modified time stands in for the timestamp; an empty file
/// contributes nothing and is not an error.
pub fn decode_plain(raw: &[u8], mtime: Timestamp) -> Result<Option<Decoded>, DecodeError> {
    let content = std::str::from_utf8(raw)?.trim();
    if content.is_empty() {
        return Ok(None);
    }
    Ok(Some(Decoded {
        content: content.to_string(),
        timestamp: mtime,
        shape: RecordShape::PlainText,
        id: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Timestamp {
        Timestamp::parse("2025-06-01T00:00:00Z").expect("now")
    }

    #[test]
    fn canonical_roundtrip() {
        let rec = MessageRecord::at(
            "hello world",
            "m-1",
            Timestamp::parse("2025-01-02T03:04:05Z").expect("ts"),
        )
        .expect("record");

        let bytes = encode(&rec);
        let decoded = decode_structured(&bytes, now()).expect("decode");
        assert_eq!(decoded.shape, RecordShape::Canonical);
        assert_eq!(decoded.content, "hello world");
        assert_eq!(decoded.timestamp, rec.timestamp);
        assert_eq!(decoded.id.as_deref(), Some("m-1"));
    }

    #[test]
    fn legacy_message_with_time_field() {
        let raw = br#"{"message": "y", "time": "2025-01-01T00:00:00Z"}"#;
        let decoded = decode_structured(raw, now()).expect("decode");
        assert_eq!(decoded.shape, RecordShape::LegacyMessage);
        assert_eq!(decoded.content, "y");
        assert_eq!(
            decoded.timestamp,
            Timestamp::parse("2025-01-01T00:00:00Z").expect("ts")
        );
    }

    #[test]
    fn legacy_message_accepts_date_field() {
        let raw = br#"{"message": "y", "date": "2025-02-01T00:00:00Z"}"#;
        let decoded = decode_structured(raw, now()).expect("decode");
        assert_eq!(
            decoded.timestamp,
            Timestamp::parse("2025-02-01T00:00:00Z").expect("ts")
        );
    }

    #[test]
    fn legacy_message_without_time_gets_decode_time() {
        let raw = br#"{"message": "y"}"#;
        let decoded = decode_structured(raw, now()).expect("decode");
        assert_eq!(decoded.shape, RecordShape::LegacyMessage);
        assert_eq!(decoded.timestamp, now());
    }

    #[test]
    fn legacy_decodes_to_same_shape_as_canonical() {
        // Both shapes collapse to the same Decoded view apart from the tag.
        let canonical =
            decode_structured(br#"{"content": "x", "timestamp": "2025-01-01T00:00:00Z"}"#, now())
                .expect("canonical");
        let legacy = decode_structured(br#"{"message": "x", "time": "2025-01-01T00:00:00Z"}"#, now())
            .expect("legacy");
        assert_eq!(canonical.content, legacy.content);
        assert_eq!(canonical.timestamp, legacy.timestamp);
    }

    #[test]
    fn canonical_wins_over_legacy_fields() {
        let raw = br#"{"content": "a", "timestamp": "2025-01-01T00:00:00Z", "message": "b"}"#;
        let decoded = decode_structured(raw, now()).expect("decode");
        assert_eq!(decoded.shape, RecordShape::Canonical);
        assert_eq!(decoded.content, "a");
    }

    #[test]
    fn malformed_inputs_fail_per_file() {
        assert!(matches!(
            decode_structured(b"{not json", now()),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_structured(b"[1, 2]", now()),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            decode_structured(br#"{"other": 1}"#, now()),
            Err(DecodeError::UnknownShape)
        ));
        assert!(matches!(
            decode_structured(br#"{"content": 3, "timestamp": "2025-01-01T00:00:00Z"}"#, now()),
            Err(DecodeError::BadField { field: "content" })
        ));
        assert!(matches!(
            decode_structured(br#"{"content": "x", "timestamp": "yesterday"}"#, now()),
            Err(DecodeError::BadTimestamp(_))
        ));
    }

    #[test]
    fn plain_text_uses_mtime_and_skips_empty() {
        let mtime = Timestamp::parse("2025-03-01T00:00:00Z").expect("ts");
        let decoded = decode_plain(b"  raw note \n", mtime).expect("decode");
        let decoded = decoded.expect("non-empty");
        assert_eq!(decoded.shape, RecordShape::PlainText);
        assert_eq!(decoded.content, "raw note");
        assert_eq!(decoded.timestamp, mtime);

        assert!(decode_plain(b"   \n", mtime).expect("decode").is_none());
        assert!(decode_plain(&[0xff, 0xfe], mtime).is_err());
    }
}
