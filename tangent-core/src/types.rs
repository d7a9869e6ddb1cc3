//! Core domain types for tangent
//!
//! These types are the canonical data model shared by every pipeline stage,
//! from the normalized message stream up to the persisted monthly snapshots.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Chat type** | Which export schema a file uses (ChatGPT or Claude) |
//! | **Conversation** | One exported chat, identified by `chat_id` |
//! | **Branch id** | Dotted path through a conversation's fork points, root `"0"` |
//! | **Branch point** | A message with more than one child |
//! | **Edit branch** | A sibling continuation started long after its predecessor |
//! | **Snapshot** | The cumulative topic map for one calendar month |
//! | **Task** | One uploaded export travelling through the pipeline |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Branch id of every conversation root.
pub const ROOT_BRANCH: &str = "0";

/// Cluster label used for unassigned points before outlier repair.
pub const NOISE: i32 = -1;

// ============================================
// Chat types
// ============================================

/// Supported chat export schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    /// Graph-of-nodes export with a `mapping` per conversation
    #[serde(rename = "chatgpt")]
    ChatGpt,
    /// Flat `chat_messages` list per conversation
    Claude,
}

impl ChatType {
    /// Returns the display name for this chat type
    pub fn display_name(&self) -> &'static str {
        match self {
            ChatType::ChatGpt => "ChatGPT",
            ChatType::Claude => "Claude",
        }
    }

    /// Returns the identifier used for output directories and CLI flags
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::ChatGpt => "chatgpt",
            ChatType::Claude => "claude",
        }
    }
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chatgpt" | "ChatGPT" => Ok(ChatType::ChatGpt),
            "claude" | "Claude" => Ok(ChatType::Claude),
            _ => Err(format!("unknown chat type: {}", s)),
        }
    }
}

// ============================================
// Messages
// ============================================

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Human,
    Assistant,
    Unknown,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::Human => "human",
            Sender::Assistant => "assistant",
            Sender::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Sender::Human),
            "assistant" => Ok(Sender::Assistant),
            "unknown" => Ok(Sender::Unknown),
            _ => Err(format!("unknown sender: {}", s)),
        }
    }
}

/// A single normalized chat message.
///
/// Produced by the schema parsers with `branch_id = "0"` and
/// `is_branch_point = false`; both fields are final once the branch
/// reconstructor has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Conversation display name
    pub chat_name: String,
    /// Conversation identifier from the export
    pub chat_id: String,
    /// Unique within its conversation
    pub message_id: String,
    /// Parent link as exported (may point at a message that was dropped)
    pub parent_message_id: Option<String>,
    /// Dotted branch path, see [`ROOT_BRANCH`]
    pub branch_id: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    /// True iff the message has more than one child
    #[serde(default)]
    pub is_branch_point: bool,
}

impl Message {
    /// Calendar month key (`YYYY-MM`) of the message timestamp
    pub fn month_year(&self) -> String {
        month_key(&self.timestamp)
    }
}

/// Calendar month key (`YYYY-MM`) for a timestamp
pub fn month_key(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m").to_string()
}

/// A likely human edit or regeneration, inferred from sibling timing.
///
/// This is an annotation next to the structural branch ids; it never
/// changes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditBranch {
    pub parent_message_id: String,
    /// The earlier of the two siblings
    pub original_child: Message,
    /// The sibling that started after the gap
    pub edit_child: Message,
    pub time_gap_seconds: f64,
    /// `edit_child` and its whole subtree, depth-first
    pub descendant_messages: Vec<Message>,
}

// ============================================
// Snapshots
// ============================================

/// Per-cluster topic information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetadata {
    /// Short topic label
    pub topic: String,
    /// Number of titles in the cluster
    pub size: usize,
    /// Mean pairwise similarity of members (1.0 for singletons)
    pub coherence: f64,
    /// Filled by a later enrichment step; empty when produced here
    #[serde(default)]
    pub reflection: String,
}

/// Cumulative topic map for one month.
///
/// `points`, `clusters` and `titles` are index-aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySnapshot {
    pub month_year: String,
    pub points: Vec<[f64; 2]>,
    pub clusters: Vec<i32>,
    pub titles: Vec<String>,
    pub topics: BTreeMap<i32, ClusterMetadata>,
    pub total_conversations: usize,
}

impl MonthlySnapshot {
    /// Checks the alignment and labelling invariants of a stored snapshot:
    /// aligned sequences, no noise labels, and a topic for every cluster id.
    pub fn is_consistent(&self) -> bool {
        self.points.len() == self.clusters.len()
            && self.clusters.len() == self.titles.len()
            && self
                .clusters
                .iter()
                .all(|c| *c != NOISE && self.topics.contains_key(c))
    }
}

/// Listing entry for a stored snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSummary {
    pub month_year: String,
    pub total_conversations: usize,
}

// ============================================
// Tasks
// ============================================

/// Lifecycle of a processing task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Completed and failed tasks never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One uploaded export and its progress through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub task_id: String,
    pub file_path: PathBuf,
    pub status: TaskStatus,
    /// 0-100
    pub progress: f64,
    pub chat_type: ChatType,
    /// Output root for this chat type
    pub data_dir: PathBuf,
    pub error: Option<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message_at(ts: DateTime<Utc>) -> Message {
        Message {
            chat_name: "Chat".to_string(),
            chat_id: "c1".to_string(),
            message_id: "m1".to_string(),
            parent_message_id: None,
            branch_id: ROOT_BRANCH.to_string(),
            sender: Sender::Human,
            timestamp: ts,
            text: "hello".to_string(),
            is_branch_point: false,
        }
    }

    #[test]
    fn test_month_year_uses_calendar_month() {
        let msg = message_at(Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap());
        assert_eq!(msg.month_year(), "2024-03");
    }

    #[test]
    fn test_chat_type_round_trip_names() {
        assert_eq!("chatgpt".parse::<ChatType>().unwrap(), ChatType::ChatGpt);
        assert_eq!("claude".parse::<ChatType>().unwrap(), ChatType::Claude);
        assert!("bard".parse::<ChatType>().is_err());
        assert_eq!(
            serde_json::to_string(&ChatType::ChatGpt).unwrap(),
            "\"chatgpt\""
        );
    }

    #[test]
    fn test_snapshot_consistency_rejects_noise_and_orphans() {
        let mut topics = BTreeMap::new();
        topics.insert(
            0,
            ClusterMetadata {
                topic: "Rust".to_string(),
                size: 2,
                coherence: 0.9,
                reflection: String::new(),
            },
        );
        let mut snapshot = MonthlySnapshot {
            month_year: "2024-01".to_string(),
            points: vec![[0.0, 0.0], [1.0, 1.0]],
            clusters: vec![0, 0],
            titles: vec!["a".to_string(), "b".to_string()],
            topics,
            total_conversations: 2,
        };
        assert!(snapshot.is_consistent());

        snapshot.clusters[1] = NOISE;
        assert!(!snapshot.is_consistent());

        snapshot.clusters[1] = 3;
        assert!(!snapshot.is_consistent());
    }

    #[test]
    fn test_topics_serialize_with_string_keys() {
        let mut topics = BTreeMap::new();
        topics.insert(
            2,
            ClusterMetadata {
                topic: "Cooking".to_string(),
                size: 1,
                coherence: 1.0,
                reflection: String::new(),
            },
        );
        let json = serde_json::to_value(&topics).unwrap();
        assert!(json.get("2").is_some());
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }
}
