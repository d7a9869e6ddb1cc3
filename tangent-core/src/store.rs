//! On-disk snapshot store
//!
//! One root per chat type, laid out as:
//!
//! ```text
//! <data_dir>/<chatgpt|claude>/
//! ├── embeddings_2d.json      latest points
//! ├── clusters.json           latest cluster ids
//! ├── topics.json             latest cluster metadata
//! ├── chat_titles.json        latest titles
//! └── states/
//!     ├── state_<YYYY-MM>.json      full snapshot per month
//!     └── messages_<YYYY-MM>.json   cumulative messages per month
//! ```
//!
//! Every file is replaced atomically (temp file, then rename). For one month
//! the state file and message file are written before the latest pointers,
//! so a reader of the pointers only ever sees completed months. The four
//! pointers are renamed one at a time, though: while month M+1 is being
//! published a reader of the raw files can see M+1 points next to M
//! clusters. [`SnapshotStore::load_latest`] avoids that by reading the
//! newest state file, which is always complete.

use crate::error::{Error, Result};
use crate::types::{ChatType, ClusterMetadata, Message, MonthlySnapshot, StateSummary, ROOT_BRANCH};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const POINTS_FILE: &str = "embeddings_2d.json";
const CLUSTERS_FILE: &str = "clusters.json";
const TOPICS_FILE: &str = "topics.json";
const TITLES_FILE: &str = "chat_titles.json";
const STATES_DIR: &str = "states";

/// The "latest" pointer files, read together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestView {
    pub points: Vec<[f64; 2]>,
    pub clusters: Vec<i32>,
    pub topics: BTreeMap<i32, ClusterMetadata>,
    pub titles: Vec<String>,
}

/// Create the output root and `states/` directory of every chat type.
pub fn ensure_directories(data_dir: &Path) -> Result<()> {
    for chat_type in [ChatType::ChatGpt, ChatType::Claude] {
        fs::create_dir_all(SnapshotStore::for_chat_type(data_dir, chat_type).states_dir())?;
    }
    Ok(())
}

/// Split a display title into `(chat_name, branch_id)`.
///
/// `"Name (Branch 0.1)"` gives `("Name", "0.1")`; a string without the
/// suffix is a bare chat name on the root branch.
pub fn parse_title(title: &str) -> (String, String) {
    let parsed = title
        .strip_suffix(')')
        .and_then(|rest| rest.rfind(" (Branch ").map(|idx| (rest, idx)))
        .and_then(|(rest, idx)| {
            let branch = &rest[idx + " (Branch ".len()..];
            let valid = !branch.is_empty()
                && branch.chars().all(|c| c.is_ascii_digit() || c == '.');
            valid.then(|| (rest[..idx].to_string(), branch.to_string()))
        });
    parsed.unwrap_or_else(|| (title.to_string(), ROOT_BRANCH.to_string()))
}

/// Reader and writer over one chat type's output root.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<data_dir>/<chat_type>`
    pub fn for_chat_type(data_dir: &Path, chat_type: ChatType) -> Self {
        Self::new(data_dir.join(chat_type.as_str()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn states_dir(&self) -> PathBuf {
        self.root.join(STATES_DIR)
    }

    fn state_path(&self, month_year: &str) -> PathBuf {
        self.states_dir().join(format!("state_{}.json", month_year))
    }

    fn messages_path(&self, month_year: &str) -> PathBuf {
        self.states_dir().join(format!("messages_{}.json", month_year))
    }

    // ============================================
    // Writes
    // ============================================

    /// Persist one processed month: state, then messages, then latest pointers.
    ///
    /// A month that was stored before is replaced.
    pub fn save_month(&self, snapshot: &MonthlySnapshot, messages: &[Message]) -> Result<()> {
        fs::create_dir_all(self.states_dir())?;

        let month = &snapshot.month_year;
        write_json_atomic(&self.state_path(month), snapshot)?;
        write_json_atomic(&self.messages_path(month), messages)?;

        write_json_atomic(&self.root.join(POINTS_FILE), &snapshot.points)?;
        write_json_atomic(&self.root.join(CLUSTERS_FILE), &snapshot.clusters)?;
        write_json_atomic(&self.root.join(TOPICS_FILE), &snapshot.topics)?;
        write_json_atomic(&self.root.join(TITLES_FILE), &snapshot.titles)?;

        tracing::debug!(
            root = %self.root.display(),
            month = %month,
            titles = snapshot.titles.len(),
            messages = messages.len(),
            "Saved month"
        );
        Ok(())
    }

    // ============================================
    // Reads
    // ============================================

    /// Every stored monthly state, ascending by month.
    ///
    /// Unreadable state files are logged and left out.
    pub fn list_states(&self) -> Result<Vec<StateSummary>> {
        #[derive(Deserialize)]
        struct Header {
            month_year: String,
            total_conversations: usize,
        }

        let mut states = Vec::new();
        for path in self.month_files("state_")? {
            match read_json::<Header>(&path) {
                Ok(header) => states.push(StateSummary {
                    month_year: header.month_year,
                    total_conversations: header.total_conversations,
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable state file")
                }
            }
        }
        states.sort_by(|a, b| a.month_year.cmp(&b.month_year));
        Ok(states)
    }

    /// The stored snapshot for one month, if any.
    pub fn load_state(&self, month_year: &str) -> Result<Option<MonthlySnapshot>> {
        let path = self.state_path(month_year);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// The most recently completed month.
    ///
    /// Served from the newest state file so the four parts always belong
    /// to the same month. Without any state file the pointer files are read
    /// as they are, each missing file as empty.
    pub fn load_latest(&self) -> Result<LatestView> {
        if let Some(path) = self.month_files("state_")?.into_iter().max() {
            let snapshot: MonthlySnapshot = read_json(&path)?;
            return Ok(LatestView {
                points: snapshot.points,
                clusters: snapshot.clusters,
                topics: snapshot.topics,
                titles: snapshot.titles,
            });
        }

        Ok(LatestView {
            points: read_json_or_default(&self.root.join(POINTS_FILE))?,
            clusters: read_json_or_default(&self.root.join(CLUSTERS_FILE))?,
            topics: read_json_or_default(&self.root.join(TOPICS_FILE))?,
            titles: read_json_or_default(&self.root.join(TITLES_FILE))?,
        })
    }

    /// Messages of the newest stored month, if any month is stored.
    pub fn latest_messages(&self) -> Result<Option<Vec<Message>>> {
        match self.month_files("messages_")?.into_iter().max() {
            Some(path) => read_json(&path).map(Some),
            None => Ok(None),
        }
    }

    /// Messages of one chat branch, oldest first.
    ///
    /// `title` is a display title or a bare chat name (root branch).
    pub fn chat_messages(&self, title: &str) -> Result<Vec<Message>> {
        let (chat_name, branch_id) = parse_title(title);
        let mut messages: Vec<Message> = self
            .latest_messages()?
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.chat_name == chat_name && m.branch_id == branch_id)
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    /// Every branch of one chat, each oldest first.
    pub fn chat_branches(&self, title: &str) -> Result<BTreeMap<String, Vec<Message>>> {
        let (chat_name, _) = parse_title(title);
        let mut branches: BTreeMap<String, Vec<Message>> = BTreeMap::new();
        for message in self.latest_messages()?.unwrap_or_default() {
            if message.chat_name == chat_name {
                branches
                    .entry(message.branch_id.clone())
                    .or_default()
                    .push(message);
            }
        }
        for messages in branches.values_mut() {
            messages.sort_by_key(|m| m.timestamp);
        }
        Ok(branches)
    }

    /// `states/<prefix>*.json`, unordered.
    fn month_files(&self, prefix: &str) -> Result<Vec<PathBuf>> {
        let states_dir = self.states_dir();
        if !states_dir.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = format!(
            "{}/{}*.json",
            glob::Pattern::escape(&states_dir.to_string_lossy()),
            prefix
        );
        let paths = glob::glob(&pattern)
            .map_err(|e| Error::Config(format!("invalid glob pattern {}: {}", pattern, e)))?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable state entry");
                    None
                }
            })
            .collect();
        Ok(paths)
    }
}

/// Serialize to `<path>.tmp`, fsync, then rename over `path`.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let temp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&temp_path)?;
        serde_json::to_writer(&mut file, value)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path).map_err(|e| {
        tracing::warn!(from = %temp_path.display(), to = %path.display(), error = %e, "Rename failed");
        e
    })?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    read_json(path)
}
