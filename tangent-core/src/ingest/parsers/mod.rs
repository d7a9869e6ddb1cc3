//! Schema-specific export parsers
//!
//! ## Supported Exports
//!
//! | Chat type | Module | Marker field |
//! |-----------|--------|--------------|
//! | ChatGPT | [`chatgpt`] | `mapping` |
//! | Claude | [`claude`] | `chat_messages` |

mod chatgpt;
mod claude;

pub use chatgpt::ChatGptExport;
pub use claude::ClaudeExport;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize each top-level item, keeping the ones that fit.
fn lenient_items<T: DeserializeOwned>(items: Vec<Value>, kind: &str) -> (Vec<T>, Vec<String>) {
    let mut accepted = Vec::with_capacity(items.len());
    let mut warnings = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<T>(item) {
            Ok(parsed) => accepted.push(parsed),
            Err(e) => warnings.push(format!("skipping {} #{}: {}", kind, index, e)),
        }
    }
    (accepted, warnings)
}

/// Treat empty strings the same as missing ones.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}
