//! Conversation tree reconstruction
//!
//! Two independent passes over the normalized messages of each conversation:
//!
//! 1. [`reconstruct`] rebuilds the parent/child tree and assigns every message
//!    a dotted `branch_id`. A message with several children is a branch point
//!    and its children get `"<branch>.<index>"`; an only child inherits its
//!    parent's branch id.
//! 2. [`detect_edit_branches`] looks at sibling timing instead of structure
//!    and flags siblings started more than [`EDIT_GAP_SECONDS`] after the
//!    previous one as likely edits or regenerations.
//!
//! The second pass never touches branch ids.

use crate::types::{EditBranch, Message, ROOT_BRANCH};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Sibling gap above which a continuation counts as an edit.
pub const EDIT_GAP_SECONDS: f64 = 60.0;

/// Parent/child adjacency for one conversation, by index into `messages`.
struct ConversationTree<'a> {
    messages: Vec<&'a Message>,
    /// parent id -> children, in message order; parents in first-seen order
    parents: Vec<&'a str>,
    children_by_parent: HashMap<&'a str, Vec<usize>>,
    roots: Vec<usize>,
}

impl<'a> ConversationTree<'a> {
    fn build(messages: Vec<&'a Message>) -> Self {
        let mut ids: HashMap<&str, usize> = HashMap::with_capacity(messages.len());
        for (idx, msg) in messages.iter().enumerate() {
            ids.entry(msg.message_id.as_str()).or_insert(idx);
        }

        let mut parents = Vec::new();
        let mut children_by_parent: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();

        for (idx, msg) in messages.iter().enumerate() {
            let Some(parent) = msg.parent_message_id.as_deref() else {
                roots.push(idx);
                continue;
            };
            children_by_parent
                .entry(parent)
                .or_insert_with(|| {
                    parents.push(parent);
                    Vec::new()
                })
                .push(idx);
            if !ids.contains_key(parent) {
                roots.push(idx);
            }
        }

        Self {
            messages,
            parents,
            children_by_parent,
            roots,
        }
    }

    fn children_of(&self, idx: usize) -> &[usize] {
        self.children_by_parent
            .get(self.messages[idx].message_id.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Breadth-first labelling from every root.
    ///
    /// Messages no root reaches (cycles) are promoted to roots in message
    /// order, so every message is labelled exactly once.
    fn label(&self) -> Vec<(usize, String, bool)> {
        let n = self.messages.len();
        let mut visited = vec![false; n];
        let mut labelled = Vec::with_capacity(n);
        let mut queue: VecDeque<(usize, String)> = VecDeque::new();

        let starts: Vec<usize> = self.roots.iter().copied().chain(0..n).collect();
        for start in starts {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            queue.push_back((start, ROOT_BRANCH.to_string()));

            while let Some((idx, branch)) = queue.pop_front() {
                let children = self.children_of(idx);
                let is_branch_point = children.len() > 1;

                if is_branch_point {
                    for (position, &child) in children.iter().enumerate() {
                        if !visited[child] {
                            visited[child] = true;
                            queue.push_back((child, format!("{}.{}", branch, position)));
                        }
                    }
                } else if let Some(&child) = children.first() {
                    if !visited[child] {
                        visited[child] = true;
                        queue.push_back((child, branch.clone()));
                    }
                }

                labelled.push((idx, branch, is_branch_point));
            }
        }

        labelled
    }

    /// `start` and everything below it, depth-first pre-order.
    fn subtree(&self, start: usize) -> Vec<&'a Message> {
        let mut visited = vec![false; self.messages.len()];
        let mut out = Vec::new();
        let mut stack = vec![start];

        while let Some(idx) = stack.pop() {
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            out.push(self.messages[idx]);
            stack.extend(self.children_of(idx).iter().rev().copied());
        }

        out
    }

    fn edit_branches(&self) -> Vec<EditBranch> {
        let mut found = Vec::new();

        for parent in &self.parents {
            let Some(children) = self.children_by_parent.get(parent) else {
                continue;
            };
            if children.len() < 2 {
                continue;
            }

            let mut siblings = children.clone();
            siblings.sort_by_key(|&idx| self.messages[idx].timestamp);

            for pair in siblings.windows(2) {
                let (original, edit) = (self.messages[pair[0]], self.messages[pair[1]]);
                let gap = (edit.timestamp - original.timestamp).num_milliseconds() as f64 / 1000.0;
                if gap > EDIT_GAP_SECONDS {
                    found.push(EditBranch {
                        parent_message_id: parent.to_string(),
                        original_child: original.clone(),
                        edit_child: edit.clone(),
                        time_gap_seconds: gap,
                        descendant_messages: self
                            .subtree(pair[1])
                            .into_iter()
                            .cloned()
                            .collect(),
                    });
                }
            }
        }

        found
    }
}

/// Split messages by `chat_id`, conversations in first-appearance order.
fn by_conversation(messages: &[Message]) -> Vec<Vec<&Message>> {
    let mut order: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<&Message>> = Vec::new();
    for msg in messages {
        let slot = *order.entry(msg.chat_id.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(msg);
    }
    groups
}

/// Assign final `branch_id` and `is_branch_point` to every message.
///
/// The result lists each conversation in breadth-first order, conversations
/// in order of first appearance. No message is dropped.
pub fn reconstruct(messages: &[Message]) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len());

    for group in by_conversation(messages) {
        let tree = ConversationTree::build(group);
        for (idx, branch_id, is_branch_point) in tree.label() {
            let mut msg = tree.messages[idx].clone();
            msg.branch_id = branch_id;
            msg.is_branch_point = is_branch_point;
            out.push(msg);
        }
    }

    tracing::debug!(messages = out.len(), "Reconstructed conversation trees");
    out
}

/// Find likely human edits: siblings more than a minute apart.
///
/// Parents are visited in the order they are first referenced; within a
/// parent, siblings are compared in timestamp order.
pub fn detect_edit_branches(messages: &[Message]) -> Vec<EditBranch> {
    by_conversation(messages)
        .into_iter()
        .flat_map(|group| ConversationTree::build(group).edit_branches())
        .collect()
}

// ============================================
// Branch report
// ============================================

/// Edit-branch summary for one conversation
#[derive(Debug, Clone, Serialize)]
pub struct ChatBranchSummary {
    pub chat_name: String,
    pub chat_id: String,
    pub edit_branches: Vec<EditBranch>,
    pub total_edit_points: usize,
    /// Length of each edit branch's descendant list
    pub branch_lengths: Vec<usize>,
    pub average_time_gap: f64,
}

/// Edit-branch analysis over a whole message list
#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    /// Only conversations with at least one edit branch
    pub branched_chats: Vec<ChatBranchSummary>,
    pub total_chats_analyzed: usize,
    pub total_branched_chats: usize,
    pub total_messages_processed: usize,
}

/// Run edit-branch detection per conversation and summarise it.
pub fn branch_report(messages: &[Message]) -> BranchReport {
    let groups = by_conversation(messages);
    let total_chats_analyzed = groups.len();

    let branched_chats: Vec<ChatBranchSummary> = groups
        .into_iter()
        .filter_map(|group| {
            let first = group.first().copied()?;
            let (chat_name, chat_id) = (first.chat_name.clone(), first.chat_id.clone());
            let edit_branches = ConversationTree::build(group).edit_branches();
            if edit_branches.is_empty() {
                return None;
            }

            let branch_lengths = edit_branches
                .iter()
                .map(|b| b.descendant_messages.len())
                .collect();
            let average_time_gap = edit_branches.iter().map(|b| b.time_gap_seconds).sum::<f64>()
                / edit_branches.len() as f64;

            Some(ChatBranchSummary {
                chat_name,
                chat_id,
                total_edit_points: edit_branches.len(),
                branch_lengths,
                average_time_gap,
                edit_branches,
            })
        })
        .collect();

    BranchReport {
        total_chats_analyzed,
        total_branched_chats: branched_chats.len(),
        total_messages_processed: messages.len(),
        branched_chats,
    }
}
