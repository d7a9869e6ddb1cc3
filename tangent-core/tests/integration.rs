//! End-to-end tests: fixture exports through the supervisor into the store.
//!
//! The model services are replaced with deterministic keyword fakes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tangent_core::branch::{branch_report, detect_edit_branches, reconstruct};
use tangent_core::pipeline::PipelineSettings;
use tangent_core::services::{EmbeddingClient, TextGenerator};
use tangent_core::supervisor::new_task_store;
use tangent_core::{
    read_export, ChatType, Error, Pipeline, Result, Sender, SnapshotStore, TaskStatus,
    TaskSupervisor, NOISE,
};
use tempfile::TempDir;

const KEYWORDS: [&str; 3] = ["rust", "sourdough", "knitting"];

/// Rust titles on one axis, everything else on another, plus a small offset.
struct KeywordEmbedder;

impl EmbeddingClient for KeywordEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let rust = text.to_lowercase().contains("rust");
                let offset = 0.02 * (i % 3) as f32;
                if rust {
                    vec![1.0, 0.0, offset]
                } else {
                    vec![0.0, 1.0, offset]
                }
            })
            .collect())
    }
}

/// Names the cluster after the first keyword found in the prompt.
struct KeywordLabeller;

impl TextGenerator for KeywordLabeller {
    fn generate(&self, prompt: &str, _temperature: f32) -> Result<String> {
        let titles = prompt.split("Titles:").nth(1).unwrap_or_default().to_lowercase();
        let label = KEYWORDS
            .iter()
            .find(|k| titles.contains(*k))
            .map(|k| format!("\"{} Topics\"", k))
            .unwrap_or_default();
        Ok(label)
    }
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn supervisor(data_dir: &Path) -> TaskSupervisor {
    tangent_core::logging::init_test();
    let mut settings = PipelineSettings::default();
    settings.projection.n_epochs = Some(60);
    let pipeline = Pipeline::new(Box::new(KeywordEmbedder), Box::new(KeywordLabeller), settings);
    TaskSupervisor::start(pipeline, data_dir, new_task_store()).expect("failed to start supervisor")
}

#[test]
fn chatgpt_export_normalizes_and_reconstructs_branches() {
    let export = read_export(&fixture("chatgpt_export.json")).unwrap();
    assert_eq!(export.chat_type(), ChatType::ChatGpt);
    assert_eq!(export.conversation_count(), 4);

    let normalized = export.normalize();
    assert_eq!(normalized.messages.len(), 9);
    assert_eq!(normalized.warnings.len(), 1, "{:?}", normalized.warnings);
    assert!(normalized.warnings[0].contains("k2"));

    let messages = reconstruct(&normalized.messages);
    let by_id = |id: &str| {
        messages
            .iter()
            .find(|m| m.message_id == id)
            .unwrap_or_else(|| panic!("missing message {id}"))
    };

    let root = by_id("n1");
    assert_eq!(root.branch_id, "0");
    assert!(root.is_branch_point);
    assert_eq!(root.sender, Sender::Human);
    assert_eq!(root.text, "Why does the borrow checker reject this?");
    assert_eq!(by_id("n2").branch_id, "0.0");
    assert_eq!(by_id("n3").branch_id, "0.0");
    assert_eq!(by_id("n4").branch_id, "0.1");
    assert!(!by_id("n2").is_branch_point);

    for m in &messages {
        if let Some(parent) = m
            .parent_message_id
            .as_deref()
            .and_then(|p| messages.iter().find(|x| x.message_id == p))
        {
            assert!(
                m.branch_id == parent.branch_id
                    || m.branch_id.starts_with(&format!("{}.", parent.branch_id)),
                "{} ({}) is not under {} ({})",
                m.message_id,
                m.branch_id,
                parent.message_id,
                parent.branch_id
            );
        }
    }

    let edits = detect_edit_branches(&messages);
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].parent_message_id, "n1");
    assert_eq!(edits[0].original_child.message_id, "n2");
    assert_eq!(edits[0].edit_child.message_id, "n4");
    assert_eq!(edits[0].time_gap_seconds, 290.0);
}

#[test]
fn claude_export_normalizes_with_warnings() {
    let export = read_export(&fixture("claude_export.json")).unwrap();
    assert_eq!(export.chat_type(), ChatType::Claude);

    let normalized = export.normalize();
    assert_eq!(normalized.messages.len(), 6);
    assert_eq!(normalized.warnings.len(), 1);

    let s1 = normalized
        .messages
        .iter()
        .find(|m| m.message_id == "s1")
        .unwrap();
    assert_eq!(s1.text, "What hydration for a first loaf?");

    let report = branch_report(&reconstruct(&normalized.messages));
    assert_eq!(report.total_chats_analyzed, 3);
    assert_eq!(report.total_branched_chats, 1);
    assert_eq!(report.branched_chats[0].chat_name, "Sourdough hydration");
    assert_eq!(report.total_messages_processed, 6);
}

#[test]
fn chatgpt_pipeline_writes_cumulative_snapshots() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path());

    let id = sup.start_task(&fixture("chatgpt_export.json")).unwrap();
    let task = sup.wait_for(&id, Duration::from_secs(120)).unwrap();
    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);
    assert_eq!(task.progress, 100.0);
    assert_eq!(task.data_dir, dir.path().join("chatgpt"));

    let store = SnapshotStore::for_chat_type(dir.path(), ChatType::ChatGpt);
    let states = store.list_states().unwrap();
    let months: Vec<&str> = states.iter().map(|s| s.month_year.as_str()).collect();
    assert_eq!(months, vec!["2024-01", "2024-02", "2024-03"]);
    let totals: Vec<usize> = states.iter().map(|s| s.total_conversations).collect();
    assert_eq!(totals, vec![3, 5, 6]);

    let mut previous: BTreeSet<String> = BTreeSet::new();
    for state in &states {
        let snapshot = store.load_state(&state.month_year).unwrap().unwrap();
        assert!(snapshot.is_consistent());
        assert!(!snapshot.clusters.contains(&NOISE));

        let titles: BTreeSet<String> = snapshot.titles.iter().cloned().collect();
        assert!(previous.is_subset(&titles));
        previous = titles;
    }

    let march = store.load_state("2024-03").unwrap().unwrap();
    let rust_cluster = march.clusters[march
        .titles
        .iter()
        .position(|t| t == "Rust async runtimes (Branch 0)")
        .unwrap()];
    let ownership_cluster = march.clusters[march
        .titles
        .iter()
        .position(|t| t == "Rust ownership (Branch 0.1)")
        .unwrap()];
    assert_eq!(rust_cluster, ownership_cluster);
    assert_eq!(march.topics[&rust_cluster].topic, "rust Topics");

    let latest = store.load_latest().unwrap();
    assert_eq!(latest.titles, march.titles);
    assert_eq!(latest.clusters, march.clusters);
    assert_eq!(latest.points, march.points);

    let branch = store.chat_messages("Rust ownership (Branch 0.0)").unwrap();
    let ids: Vec<&str> = branch.iter().map(|m| m.message_id.as_str()).collect();
    assert_eq!(ids, vec!["n2", "n3"]);

    let branches = store.chat_branches("Rust ownership").unwrap();
    assert_eq!(
        branches.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["0", "0.0", "0.1"]
    );
}

#[test]
fn claude_pipeline_skips_single_title_month() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path());

    let id = sup.start_task(&fixture("claude_export.json")).unwrap();
    let task = sup.wait_for(&id, Duration::from_secs(120)).unwrap();
    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);
    assert_eq!(task.progress, 100.0);

    let store = SnapshotStore::for_chat_type(dir.path(), ChatType::Claude);
    let states = store.list_states().unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].month_year, "2024-02");
    assert_eq!(states[0].total_conversations, 5);

    let messages = store.latest_messages().unwrap().unwrap();
    assert_eq!(messages.len(), 6);
    assert!(!dir.path().join("chatgpt/states/state_2024-02.json").exists());
    sup.shutdown().unwrap();
}

#[test]
fn unknown_format_is_rejected_before_queueing() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path());
    let bogus = dir.path().join("bogus.json");
    std::fs::write(&bogus, r#"{"conversations": []}"#).unwrap();

    assert!(matches!(
        sup.start_task(&bogus),
        Err(Error::UnknownFormat(_))
    ));
    assert!(sup.tasks().read().unwrap().is_empty());
}
