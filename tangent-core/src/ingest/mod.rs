//! Ingestion layer for chat exports
//!
//! Detects which of the two supported export schemas a file uses and
//! normalizes it into a flat stream of [`Message`] records.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌──────────────────┐
//! │ export .json │ ──► │ detect_export │ ──► │  ParsedExport    │
//! └──────────────┘     └───────────────┘     │  ├─ ChatGpt(..)  │
//!                                            │  └─ Claude(..)   │
//!                                            └────────┬─────────┘
//!                                                     ▼ normalize()
//!                                            ┌──────────────────┐
//!                                            │ NormalizeResult  │
//!                                            └──────────────────┘
//! ```
//!
//! Detection only inspects the first top-level item: a `mapping` field means
//! ChatGPT, a `chat_messages` field means Claude. Everything after detection
//! is lenient; malformed conversations and messages become warnings.

pub mod parsers;

use crate::error::{Error, Result};
use crate::types::{ChatType, Message};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use parsers::{ChatGptExport, ClaudeExport};
use serde_json::Value;
use std::path::Path;

/// A detected export, tagged by schema.
#[derive(Debug)]
pub enum ParsedExport {
    ChatGpt(ChatGptExport),
    Claude(ClaudeExport),
}

impl ParsedExport {
    pub fn chat_type(&self) -> ChatType {
        match self {
            ParsedExport::ChatGpt(_) => ChatType::ChatGpt,
            ParsedExport::Claude(_) => ChatType::Claude,
        }
    }

    /// Number of conversations accepted during detection
    pub fn conversation_count(&self) -> usize {
        match self {
            ParsedExport::ChatGpt(export) => export.conversation_count(),
            ParsedExport::Claude(export) => export.conversation_count(),
        }
    }

    /// Flatten the export into partially-filled messages.
    ///
    /// Branch ids are left at the root value; see [`crate::branch::reconstruct`].
    pub fn normalize(&self) -> NormalizeResult {
        let result = match self {
            ParsedExport::ChatGpt(export) => export.normalize(),
            ParsedExport::Claude(export) => export.normalize(),
        };
        for warning in &result.warnings {
            tracing::warn!(chat_type = %result.chat_type, "{}", warning);
        }
        tracing::debug!(
            chat_type = %result.chat_type,
            messages = result.messages.len(),
            warnings = result.warnings.len(),
            "Normalized export"
        );
        result
    }
}

/// Output of normalization.
#[derive(Debug)]
pub struct NormalizeResult {
    pub chat_type: ChatType,
    pub messages: Vec<Message>,
    /// Non-fatal problems: dropped conversations, nodes and messages
    pub warnings: Vec<String>,
}

/// Detect the schema of already-parsed JSON.
///
/// Fails with [`Error::UnknownFormat`] when the top level is not a non-empty
/// array or its first item carries neither marker field.
pub fn detect_export(value: Value) -> Result<ParsedExport> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(Error::UnknownFormat(format!(
                "expected a top-level array, found {}",
                json_kind(&other)
            )))
        }
    };

    let first = items
        .first()
        .ok_or_else(|| Error::UnknownFormat("export contains no conversations".to_string()))?;

    let Some(first) = first.as_object() else {
        return Err(Error::UnknownFormat(format!(
            "first item is {}, not an object",
            json_kind(first)
        )));
    };

    if first.contains_key("mapping") {
        Ok(ParsedExport::ChatGpt(ChatGptExport::from_items(items)))
    } else if first.contains_key("chat_messages") {
        Ok(ParsedExport::Claude(ClaudeExport::from_items(items)))
    } else {
        Err(Error::UnknownFormat(
            "first conversation has neither `mapping` nor `chat_messages`".to_string(),
        ))
    }
}

/// Read and detect an export file.
pub fn read_export(path: &Path) -> Result<ParsedExport> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| Error::UnknownFormat(format!("{}: not valid JSON: {}", path.display(), e)))?;
    let export = detect_export(value)?;
    tracing::info!(
        path = %path.display(),
        chat_type = %export.chat_type(),
        conversations = export.conversation_count(),
        "Detected chat export"
    );
    Ok(export)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================
// Timestamps
// ============================================

/// Parse a timestamp field: UNIX seconds (number or numeric string),
/// RFC 3339, or naive ISO 8601 read as UTC.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_unix_seconds),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

/// String form of [`parse_timestamp`].
pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    s.parse::<f64>().ok().and_then(from_unix_seconds)
}

fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    #[test]
    fn test_detect_chatgpt() {
        let export = detect_export(json!([{"title": "t", "mapping": {}}])).unwrap();
        assert_eq!(export.chat_type(), ChatType::ChatGpt);
    }

    #[test]
    fn test_detect_claude() {
        let export = detect_export(json!([{"name": "n", "chat_messages": []}])).unwrap();
        assert_eq!(export.chat_type(), ChatType::Claude);
    }

    #[test]
    fn test_detect_rejects_unknown_shapes() {
        for value in [
            json!([]),
            json!({"mapping": {}}),
            json!([42]),
            json!([{"messages": []}]),
        ] {
            match detect_export(value) {
                Err(Error::UnknownFormat(_)) => {}
                other => panic!("expected UnknownFormat, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_unix_seconds() {
        let ts = parse_timestamp(&json!(1678886400)).unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2023, 3, 15));

        let ts = parse_timestamp(&json!(1678886400.5)).unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_parse_iso_variants() {
        let rfc = parse_timestamp_str("2024-03-15T10:00:00.123456Z").unwrap();
        assert_eq!(rfc.hour(), 10);

        let offset = parse_timestamp_str("2024-03-15T12:00:00+02:00").unwrap();
        assert_eq!(offset.hour(), 10);

        let naive = parse_timestamp_str("2024-03-15 10:00:00").unwrap();
        assert_eq!(naive, rfc.with_nanosecond(0).unwrap());

        let date = parse_timestamp_str("2024-03-15").unwrap();
        assert_eq!(date.hour(), 0);
    }

    #[test]
    fn test_parse_garbage_timestamps() {
        assert!(parse_timestamp(&json!(null)).is_none());
        assert!(parse_timestamp(&json!("")).is_none());
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!({"t": 1})).is_none());
    }
}
