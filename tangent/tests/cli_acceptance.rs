use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tangent_core::{ClusterMetadata, Message, MonthlySnapshot, Sender, SnapshotStore};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    xdg_runtime: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let xdg_runtime = base.join("xdg-runtime");

        for dir in [&home, &xdg_data, &xdg_config, &xdg_state, &xdg_runtime] {
            fs::create_dir_all(dir).expect("failed to create test directory");
        }

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
            xdg_runtime,
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.xdg_data.join("tangent/processed_data")
    }

    /// Points both model services at a closed local port.
    fn write_unreachable_services_config(&self) {
        let dir = self.xdg_config.join("tangent");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(
            dir.join("config.toml"),
            r#"
[embedding]
endpoint = "http://127.0.0.1:9"
timeout_secs = 2

[generation]
endpoint = "http://127.0.0.1:9"
timeout_secs = 2
"#,
        )
        .expect("failed to write config");
    }
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../tangent-core/tests/fixtures")
        .join(name)
}

fn run_tangent(env: &CliTestEnv, args: &[&str]) -> Output {
    Command::new(PathBuf::from(assert_cmd::cargo::cargo_bin!("tangent")))
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env("XDG_RUNTIME_DIR", &env.xdg_runtime)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute tangent: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    panic!(
        "tangent {} failed with status {:?}\nstdout:\n{}\nstderr:\n{}",
        rendered_args,
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn stdout_json(args: &[&str], output: &Output) -> serde_json::Value {
    assert_success(args, output);
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}):\n{}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn message(chat: &str, id: &str, parent: Option<&str>, branch: &str, ts: &str) -> Message {
    Message {
        chat_name: chat.to_string(),
        chat_id: format!("{}-id", chat),
        message_id: id.to_string(),
        parent_message_id: parent.map(str::to_string),
        branch_id: branch.to_string(),
        sender: Sender::Human,
        timestamp: ts.parse().expect("bad fixture timestamp"),
        text: format!("text of {}", id),
        is_branch_point: false,
    }
}

/// One Claude month with an edited first prompt in "Bread".
fn seed_claude_store(data_dir: &Path) {
    let mut root = message("Bread", "b1", None, "0", "2024-01-05T10:00:00Z");
    root.is_branch_point = true;
    let messages = vec![
        root,
        message("Bread", "b2", Some("b1"), "0.0", "2024-01-05T10:00:05Z"),
        message("Bread", "b3", Some("b1"), "0.1", "2024-01-05T10:02:05Z"),
        message("Cheese", "c1", None, "0", "2024-01-06T09:00:00Z"),
    ];

    let mut topics = BTreeMap::new();
    topics.insert(
        0,
        ClusterMetadata {
            topic: "Home Baking".to_string(),
            size: 3,
            coherence: 0.9,
            reflection: String::new(),
        },
    );
    let snapshot = MonthlySnapshot {
        month_year: "2024-01".to_string(),
        points: vec![[0.0, 0.0], [0.1, 0.0], [0.2, 0.1]],
        clusters: vec![0, 0, 0],
        titles: vec![
            "Bread (Branch 0.0)".to_string(),
            "Bread (Branch 0.1)".to_string(),
            "Cheese (Branch 0)".to_string(),
        ],
        topics,
        total_conversations: 3,
    };

    SnapshotStore::new(data_dir.join("claude"))
        .save_month(&snapshot, &messages)
        .expect("failed to seed store");
}

#[test]
fn detect_reports_claude_export_shape() {
    let env = CliTestEnv::new();
    let file = fixture("claude_export.json");
    let file = file.to_string_lossy();
    let args = ["detect", file.as_ref(), "--json"];

    let report = stdout_json(&args, &run_tangent(&env, &args));
    assert_eq!(report["chat_type"], "claude");
    assert_eq!(report["conversations"], 3);
    assert_eq!(report["messages"], 6);
    assert_eq!(report["warnings"], 1);
    assert_eq!(report["months"], serde_json::json!(["2024-01", "2024-02"]));
}

#[test]
fn states_on_empty_store_prints_hint() {
    let env = CliTestEnv::new();
    let args = ["states"];
    let output = run_tangent(&env, &args);
    assert_success(&args, &output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("No snapshots"));
}

#[test]
fn process_rejects_unknown_export_format() {
    let env = CliTestEnv::new();
    let bogus = env.home.join("bogus.json");
    fs::write(&bogus, r#"[{"title": "no mapping here"}]"#).expect("failed to write export");
    let bogus = bogus.to_string_lossy();

    let output = run_tangent(&env, &["process", bogus.as_ref()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    assert!(stderr.contains("unknown"), "stderr: {stderr}");
    let states = SnapshotStore::new(env.data_dir().join("chatgpt"))
        .list_states()
        .expect("failed to list states");
    assert!(states.is_empty());
}

#[test]
fn process_completes_when_services_are_unreachable() {
    let env = CliTestEnv::new();
    env.write_unreachable_services_config();
    let file = fixture("chatgpt_export.json");
    let file = file.to_string_lossy();
    let args = ["process", file.as_ref(), "--json"];

    let task = stdout_json(&args, &run_tangent(&env, &args));
    assert_eq!(task["status"], "completed");
    assert_eq!(task["chat_type"], "chatgpt");
    assert_eq!(task["progress"], 100.0);

    let states = SnapshotStore::new(env.data_dir().join("chatgpt"))
        .list_states()
        .expect("failed to list states");
    assert!(states.is_empty());
}

#[test]
fn queries_read_a_seeded_store() {
    let env = CliTestEnv::new();
    seed_claude_store(&env.data_dir());

    let args = ["states", "--type", "claude", "--json"];
    let states = stdout_json(&args, &run_tangent(&env, &args));
    assert_eq!(states[0]["month_year"], "2024-01");
    assert_eq!(states[0]["total_conversations"], 3);

    let args = ["show", "2024-01", "--type", "claude"];
    let snapshot = stdout_json(&args, &run_tangent(&env, &args));
    assert_eq!(snapshot["topics"]["0"]["topic"], "Home Baking");

    let args = ["messages", "Bread (Branch 0.1)", "--type", "claude"];
    let messages = stdout_json(&args, &run_tangent(&env, &args));
    let ids: Vec<&str> = messages
        .as_array()
        .expect("messages should be an array")
        .iter()
        .filter_map(|m| m["message_id"].as_str())
        .collect();
    assert_eq!(ids, vec!["b3"]);

    let args = ["messages", "Bread", "--type", "claude", "--all"];
    let branches = stdout_json(&args, &run_tangent(&env, &args));
    let keys: Vec<&String> = branches
        .as_object()
        .expect("branches should be an object")
        .keys()
        .collect();
    assert_eq!(keys, vec!["0", "0.0", "0.1"]);

    let args = ["branches", "--type", "claude", "--json"];
    let report = stdout_json(&args, &run_tangent(&env, &args));
    assert_eq!(report["total_chats_analyzed"], 2);
    assert_eq!(report["total_branched_chats"], 1);
    assert_eq!(report["branched_chats"][0]["chat_name"], "Bread");

    let output = run_tangent(&env, &["messages", "Nope", "--type", "claude"]);
    assert!(!output.status.success());
}
