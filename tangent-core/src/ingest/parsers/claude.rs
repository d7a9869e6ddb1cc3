//! Claude export parser
//!
//! Claude's `conversations.json` is an array of conversations, each with a
//! flat `chat_messages` list whose entries point at their parent via
//! `parent` (older exports) or `parent_message_uuid`.
//!
//! Message order is kept exactly as exported.

use super::{lenient_items, non_empty};
use crate::error::Error;
use crate::ingest::{parse_timestamp, NormalizeResult};
use crate::types::{ChatType, Message, Sender, ROOT_BRANCH};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

const DEFAULT_NAME: &str = "Unnamed Chat";

/// A detected Claude export.
#[derive(Debug)]
pub struct ClaudeExport {
    conversations: Vec<RawConversation>,
    warnings: Vec<String>,
}

// ============================================
// Raw export types (serde deserialization)
// ============================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConversation {
    uuid: Option<String>,
    name: Option<String>,
    chat_messages: Vec<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawChatMessage {
    uuid: Option<String>,
    #[serde(alias = "parent_message_uuid")]
    parent: Option<String>,
    sender: Option<String>,
    text: Option<String>,
    created_at: Option<Value>,
    /// Newer exports also carry typed content blocks
    content: Option<Vec<RawContentBlock>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawContentBlock {
    #[serde(rename = "type")]
    block_type: Option<String>,
    text: Option<String>,
}

impl ClaudeExport {
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

    pub fn normalize(&self) -> NormalizeResult {
        let mut warnings = self.warnings.clone();
        let mut messages = Vec::new();

        for conversation in &self.conversations {
            let chat_name = non_empty(conversation.name.as_deref())
                .unwrap_or(DEFAULT_NAME)
                .to_string();
            let chat_id = conversation.uuid.clone().unwrap_or_default();
            let mut seen: HashSet<String> = HashSet::new();

            for (index, value) in conversation.chat_messages.iter().enumerate() {
                let raw = match RawChatMessage::deserialize(value) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warnings.push(format!(
                            "chat {:?}: skipping malformed message #{}: {}",
                            chat_name, index, e
                        ));
                        continue;
                    }
                };

                let Some(message_id) = non_empty(raw.uuid.as_deref()).map(str::to_string) else {
                    warnings.push(format!(
                        "chat {:?}: skipping message #{} without uuid",
                        chat_name, index
                    ));
                    continue;
                };

                if !seen.insert(message_id.clone()) {
                    warnings.push(format!(
                        "chat {:?}: skipping duplicate message {}",
                        chat_name, message_id
                    ));
                    continue;
                }

                let Some(timestamp) = raw.created_at.as_ref().and_then(parse_timestamp) else {
                    let value = raw
                        .created_at
                        .as_ref()
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "missing".to_string());
                    warnings.push(Error::Timestamp { message_id, value }.to_string());
                    continue;
                };

                let sender = raw
                    .sender
                    .as_deref()
                    .and_then(|s| s.parse::<Sender>().ok())
                    .unwrap_or(Sender::Unknown);

                messages.push(Message {
                    chat_name: chat_name.clone(),
                    chat_id: chat_id.clone(),
                    message_id,
                    parent_message_id: raw.parent.filter(|p| !p.is_empty()),
                    branch_id: ROOT_BRANCH.to_string(),
                    sender,
                    timestamp,
                    text: message_text(raw.text, raw.content.as_deref().unwrap_or(&[])),
                    is_branch_point: false,
                });
            }
        }

        NormalizeResult {
            chat_type: ChatType::Claude,
            messages,
            warnings,
        }
    }
}

/// Prefer the flat `text`; fall back to joined text blocks.
fn message_text(text: Option<String>, content: &[RawContentBlock]) -> String {
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        return text;
    }
    content
        .iter()
        .filter(|block| block.block_type.as_deref() == Some("text"))
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}
