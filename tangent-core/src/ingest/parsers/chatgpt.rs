//! ChatGPT export parser
//!
//! ChatGPT's `conversations.json` is an array of conversations, each holding a
//! `mapping` from node id to `{message, parent, children}`. Structural nodes
//! (the synthetic root, for example) carry a null `message` and are skipped;
//! their children then become conversation roots.
//!
//! Node ids double as message ids because `parent` links refer to node ids.

use super::{lenient_items, non_empty};
use crate::error::Error;
use crate::ingest::{parse_timestamp, NormalizeResult};
use crate::types::{ChatType, Message, Sender, ROOT_BRANCH};
use serde::Deserialize;
use serde_json::{Map, Value};

const DEFAULT_TITLE: &str = "Untitled Chat";

/// A detected ChatGPT export.
#[derive(Debug)]
pub struct ChatGptExport {
    conversations: Vec<RawConversation>,
    warnings: Vec<String>,
}

// ============================================
// Raw export types (serde deserialization)
// ============================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConversation {
    id: Option<String>,
    title: Option<String>,
    mapping: Map<String, Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawNode {
    message: Option<RawMessage>,
    parent: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    create_time: Option<Value>,
    content: Option<Value>,
    author: Option<RawAuthor>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawAuthor {
    role: Option<String>,
}

impl ChatGptExport {
    pub(crate) fn from_items(items: Vec<Value>) -> Self {
        let (conversations, warnings) = lenient_items(items, "conversation");
        Self {
            conversations,
            warnings,
        }
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Flatten every conversation and sort the result by timestamp.
    ///
    /// The sort is stable, so siblings with equal timestamps keep mapping order.
    pub fn normalize(&self) -> NormalizeResult {
        let mut warnings = self.warnings.clone();
        let mut messages = Vec::new();

        for conversation in &self.conversations {
            let chat_name = non_empty(conversation.title.as_deref())
                .unwrap_or(DEFAULT_TITLE)
                .to_string();
            let chat_id = conversation.id.clone().unwrap_or_default();

            for (node_id, node_value) in &conversation.mapping {
                let node = match RawNode::deserialize(node_value) {
                    Ok(node) => node,
                    Err(e) => {
                        warnings.push(format!(
                            "chat {:?}: skipping malformed node {}: {}",
                            chat_name, node_id, e
                        ));
                        continue;
                    }
                };

                let Some(raw) = node.message else {
                    continue;
                };

                let Some(timestamp) = raw.create_time.as_ref().and_then(parse_timestamp) else {
                    let value = raw
                        .create_time
                        .as_ref()
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "missing".to_string());
                    warnings.push(
                        Error::Timestamp {
                            message_id: node_id.clone(),
                            value,
                        }
                        .to_string(),
                    );
                    continue;
                };

                let sender = match raw.author.and_then(|a| a.role).as_deref() {
                    Some("user") => Sender::Human,
                    _ => Sender::Assistant,
                };

                messages.push(Message {
                    chat_name: chat_name.clone(),
                    chat_id: chat_id.clone(),
                    message_id: node_id.clone(),
                    parent_message_id: node.parent.filter(|p| !p.is_empty()),
                    branch_id: ROOT_BRANCH.to_string(),
                    sender,
                    timestamp,
                    text: extract_text(raw.content.as_ref()),
                    is_branch_point: false,
                });
            }
        }

        messages.sort_by_key(|m| m.timestamp);

        NormalizeResult {
            chat_type: ChatType::ChatGpt,
            messages,
            warnings,
        }
    }
}

/// Join `content.parts` with single spaces; otherwise render `content` itself.
fn extract_text(content: Option<&Value>) -> String {
    let Some(content) = content else {
        return String::new();
    };

    match content.get("parts").and_then(Value::as_array) {
        Some(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        None => match content {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}
