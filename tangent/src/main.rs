//! tangent - topic maps of your AI chat history
//!
//! Processes a ChatGPT or Claude export into monthly topic snapshots and
//! answers queries over the stored snapshots.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Snapshots: $XDG_DATA_HOME/tangent/processed_data/<chatgpt|claude>/
//! - Logs: $XDG_STATE_HOME/tangent/tangent.log
//! - Config: $XDG_CONFIG_HOME/tangent/config.toml

mod process_lock;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::acquire_writer_guard;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tangent_core::branch::branch_report;
use tangent_core::pipeline::batcher::month_counts;
use tangent_core::store::ensure_directories;
use tangent_core::supervisor::new_task_store;
use tangent_core::{
    read_export, ChatType, Config, Pipeline, ProcessingTask, SnapshotStore, TaskStatus,
    TaskSupervisor,
};

#[derive(Parser)]
#[command(name = "tangent")]
#[command(about = "Branch-aware topic maps of your AI chat history")]
#[command(version)]
struct Args {
    /// Override the snapshot data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process an export into monthly snapshots
    Process {
        /// ChatGPT `conversations.json` or Claude export
        file: PathBuf,

        /// Print the final task record as JSON instead of a progress bar
        #[arg(long)]
        json: bool,
    },
    /// Detect the schema of an export without processing it
    Detect {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },
    /// List stored monthly snapshots
    States {
        #[arg(long = "type", default_value = "chatgpt")]
        chat_type: ChatType,

        #[arg(long)]
        json: bool,
    },
    /// Print one stored snapshot as JSON
    Show {
        /// Month key, `YYYY-MM`
        month: String,

        #[arg(long = "type", default_value = "chatgpt")]
        chat_type: ChatType,
    },
    /// Print the latest pointer files as JSON
    Latest {
        #[arg(long = "type", default_value = "chatgpt")]
        chat_type: ChatType,
    },
    /// Print the messages of one chat branch
    Messages {
        /// Display title (`Name (Branch 0.1)`) or bare chat name
        title: String,

        #[arg(long = "type", default_value = "chatgpt")]
        chat_type: ChatType,

        /// Every branch of the chat, grouped by branch id
        #[arg(long)]
        all: bool,
    },
    /// Edit-branch report over the latest stored messages
    Branches {
        #[arg(long = "type", default_value = "chatgpt")]
        chat_type: ChatType,

        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        tangent_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| config.storage.data_dir());
    tracing::info!(data_dir = %data_dir.display(), "tangent starting");

    match args.command {
        Command::Process { file, json } => process(&config, &data_dir, &file, json),
        Command::Detect { file, json } => detect(&data_dir, &file, json),
        Command::States { chat_type, json } => states(&store(&data_dir, chat_type), json),
        Command::Show { month, chat_type } => {
            let snapshot = store(&data_dir, chat_type)
                .load_state(&month)
                .with_context(|| format!("failed to read state for {}", month))?
                .with_context(|| format!("no stored state for {} ({})", month, chat_type))?;
            print_json(&snapshot)
        }
        Command::Latest { chat_type } => {
            let latest = store(&data_dir, chat_type)
                .load_latest()
                .context("failed to read latest files")?;
            print_json(&latest)
        }
        Command::Messages {
            title,
            chat_type,
            all,
        } => {
            let store = store(&data_dir, chat_type);
            if all {
                let branches = store
                    .chat_branches(&title)
                    .context("failed to read stored messages")?;
                anyhow::ensure!(!branches.is_empty(), "no messages found for chat: {}", title);
                print_json(&branches)
            } else {
                let messages = store
                    .chat_messages(&title)
                    .context("failed to read stored messages")?;
                anyhow::ensure!(!messages.is_empty(), "no messages found for chat: {}", title);
                print_json(&messages)
            }
        }
        Command::Branches { chat_type, json } => branches(&store(&data_dir, chat_type), json),
    }
}

fn store(data_dir: &Path, chat_type: ChatType) -> SnapshotStore {
    SnapshotStore::for_chat_type(data_dir, chat_type)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

fn process(config: &Config, data_dir: &Path, file: &Path, json: bool) -> Result<()> {
    let _writer = acquire_writer_guard(data_dir).context("failed to acquire writer lock")?;
    ensure_directories(data_dir).context("failed to create data directories")?;

    let pipeline = Pipeline::from_config(config).context("failed to create model clients")?;
    let supervisor = TaskSupervisor::start(pipeline, data_dir, new_task_store())
        .context("failed to start worker")?;
    let task_id = supervisor
        .start_task(file)
        .with_context(|| format!("failed to start task for {}", file.display()))?;

    let task = if json {
        wait(&supervisor, &task_id, None)?
    } else {
        println!("Task {} queued", task_id);
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
                .context("invalid progress template")?
                .progress_chars("#>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        let task = wait(&supervisor, &task_id, Some(&pb))?;
        pb.finish_and_clear();
        task
    };

    supervisor.shutdown().context("worker did not shut down cleanly")?;

    if json {
        print_json(&task)?;
    } else {
        print_task_summary(&task)?;
    }

    if task.status == TaskStatus::Failed {
        anyhow::bail!(
            "task {} failed: {}",
            task.task_id,
            task.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn wait(supervisor: &TaskSupervisor, task_id: &str, pb: Option<&ProgressBar>) -> Result<ProcessingTask> {
    loop {
        let task = supervisor
            .task_status(task_id)
            .context("lost track of task")?;
        if let Some(pb) = pb {
            pb.set_position(task.progress.round() as u64);
            pb.set_message(task.status.to_string());
        }
        if task.status.is_terminal() {
            return Ok(task);
        }
        anyhow::ensure!(
            supervisor.is_running(),
            "worker stopped before task {} finished",
            task_id
        );
        thread::sleep(Duration::from_millis(200));
    }
}

fn print_task_summary(task: &ProcessingTask) -> Result<()> {
    println!("Task {}: {}", task.task_id, task.status);
    println!("  Chat type:  {}", task.chat_type.display_name());
    println!("  Output:     {}", task.data_dir.display());
    if let Some(error) = &task.error {
        println!("  Error:      {}", error);
    }

    let states = SnapshotStore::new(&task.data_dir)
        .list_states()
        .context("failed to list stored states")?;
    println!("  Snapshots:  {}", states.len());
    for state in states {
        println!(
            "    {}  {} conversation(s)",
            state.month_year, state.total_conversations
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct DetectReport {
    chat_type: ChatType,
    conversations: usize,
    messages: usize,
    warnings: usize,
    months: Vec<String>,
    output_root: PathBuf,
}

fn detect(data_dir: &Path, file: &Path, json: bool) -> Result<()> {
    let export = read_export(file).with_context(|| format!("failed to read {}", file.display()))?;
    let normalized = export.normalize();
    let counts = month_counts(&normalized.messages);
    let report = DetectReport {
        chat_type: export.chat_type(),
        conversations: export.conversation_count(),
        messages: normalized.messages.len(),
        warnings: normalized.warnings.len(),
        months: counts.keys().cloned().collect(),
        output_root: store(data_dir, export.chat_type()).root().to_path_buf(),
    };

    if json {
        return print_json(&report);
    }

    println!("Chat type:      {}", report.chat_type.display_name());
    println!("Conversations:  {}", report.conversations);
    println!("Messages:       {}", report.messages);
    if report.warnings > 0 {
        println!("Warnings:       {} (see log)", report.warnings);
    }
    println!("Output root:    {}", report.output_root.display());
    println!("Months:");
    for (month, count) in &counts {
        println!("  {}  {} message(s)", month, count);
    }
    Ok(())
}

fn states(store: &SnapshotStore, json: bool) -> Result<()> {
    let states = store.list_states().context("failed to list stored states")?;
    if json {
        return print_json(&states);
    }
    if states.is_empty() {
        println!("No snapshots under {}", store.root().display());
        return Ok(());
    }
    println!("{:<10} {:>14}", "Month", "Conversations");
    for state in states {
        println!("{:<10} {:>14}", state.month_year, state.total_conversations);
    }
    Ok(())
}

fn branches(store: &SnapshotStore, json: bool) -> Result<()> {
    let messages = store
        .latest_messages()
        .context("failed to read stored messages")?
        .with_context(|| format!("no stored messages under {}", store.root().display()))?;
    let report = branch_report(&messages);

    if json {
        return print_json(&report);
    }

    println!(
        "Analyzed {} chat(s), {} message(s); {} with edit branches",
        report.total_chats_analyzed, report.total_messages_processed, report.total_branched_chats
    );
    for chat in &report.branched_chats {
        println!(
            "  {}  {} edit point(s), mean gap {:.0}s, branch lengths {:?}",
            chat.chat_name, chat.total_edit_points, chat.average_time_gap, chat.branch_lengths
        );
    }
    Ok(())
}
