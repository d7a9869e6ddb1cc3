//! Background task supervisor
//!
//! A single named worker thread drains a FIFO channel of jobs, so at most one
//! export is processed at a time and the snapshot store has one writer.
//!
//! Task lifecycle:
//!
//! ```text
//! queued ──► processing ──┬──► completed
//!                         └──► failed (error recorded, never retried)
//! ```
//!
//! A panic inside the pipeline fails the task it happened in and leaves the
//! worker running.
//!
//! Task records live in an injected [`TaskStore`] for as long as the process
//! runs. Readers poll it through [`TaskSupervisor::task_status`]; only the
//! worker mutates a task after it is queued.

use crate::branch;
use crate::error::{Error, Result};
use crate::ingest::{read_export, ParsedExport};
use crate::pipeline::{MonthOutcome, Pipeline};
use crate::store::SnapshotStore;
use crate::types::{ProcessingTask, TaskStatus};
use chrono::Utc;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Shared id-keyed task registry.
pub type TaskStore = Arc<RwLock<HashMap<String, ProcessingTask>>>;

/// Create an empty task registry.
pub fn new_task_store() -> TaskStore {
    Arc::new(RwLock::new(HashMap::new()))
}

struct Job {
    task_id: String,
    export: ParsedExport,
}

/// Owns the worker thread and its queue.
pub struct TaskSupervisor {
    tasks: TaskStore,
    data_dir: PathBuf,
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl TaskSupervisor {
    /// Spawn the worker. Snapshots go under `<data_dir>/<chat_type>`.
    pub fn start(pipeline: Pipeline, data_dir: impl Into<PathBuf>, tasks: TaskStore) -> Result<Self> {
        let data_dir = data_dir.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker_tasks = Arc::clone(&tasks);

        let worker = std::thread::Builder::new()
            .name("tangent-worker".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    run_job(&pipeline, &worker_tasks, job);
                }
                tracing::debug!("Task queue closed, worker exiting");
            })
            .map_err(|e| Error::Worker(format!("failed to spawn worker thread: {}", e)))?;

        tracing::info!(data_dir = %data_dir.display(), "Task supervisor started");
        Ok(Self {
            tasks,
            data_dir,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Detect the export at `file_path` and queue it.
    ///
    /// Undetectable files are rejected with [`Error::UnknownFormat`] and no
    /// task is created.
    pub fn start_task(&self, file_path: &Path) -> Result<String> {
        let export = read_export(file_path)?;
        let chat_type = export.chat_type();
        let task_id = uuid::Uuid::new_v4().to_string();

        let task = ProcessingTask {
            task_id: task_id.clone(),
            file_path: file_path.to_path_buf(),
            status: TaskStatus::Queued,
            progress: 0.0,
            chat_type,
            data_dir: SnapshotStore::for_chat_type(&self.data_dir, chat_type)
                .root()
                .to_path_buf(),
            error: None,
            completed: false,
            created_at: Utc::now(),
        };
        write_tasks(&self.tasks).insert(task_id.clone(), task);

        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::Worker("supervisor is shut down".to_string()))?;
        if sender
            .send(Job {
                task_id: task_id.clone(),
                export,
            })
            .is_err()
        {
            update_task(&self.tasks, &task_id, |t| {
                t.status = TaskStatus::Failed;
                t.error = Some("worker is not running".to_string());
            });
            return Err(Error::Worker("worker is not running".to_string()));
        }

        tracing::info!(
            task_id = %task_id,
            chat_type = %chat_type,
            file = %file_path.display(),
            "Queued task"
        );
        Ok(task_id)
    }

    /// Snapshot of one task's current state.
    pub fn task_status(&self, task_id: &str) -> Result<ProcessingTask> {
        read_tasks(&self.tasks)
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    /// Poll until the task is completed or failed.
    pub fn wait_for(&self, task_id: &str, timeout: Duration) -> Result<ProcessingTask> {
        let deadline = Instant::now() + timeout;
        loop {
            let task = self.task_status(task_id)?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            if Instant::now() >= deadline {
                return Err(Error::Worker(format!(
                    "task {} still {} after {:?}",
                    task_id, task.status, timeout
                )));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    /// True while the worker thread is alive to take jobs.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// The registry this supervisor writes to.
    pub fn tasks(&self) -> TaskStore {
        Arc::clone(&self.tasks)
    }

    /// Close the queue and wait for queued work to finish.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| Error::Worker("worker thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(error = %e, "Supervisor shutdown failed");
        }
    }
}

fn read_tasks(
    tasks: &TaskStore,
) -> std::sync::RwLockReadGuard<'_, HashMap<String, ProcessingTask>> {
    tasks.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_tasks(
    tasks: &TaskStore,
) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ProcessingTask>> {
    tasks.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn update_task(tasks: &TaskStore, task_id: &str, f: impl FnOnce(&mut ProcessingTask)) {
    if let Some(task) = write_tasks(tasks).get_mut(task_id) {
        f(task);
    }
}

fn run_job(pipeline: &Pipeline, tasks: &TaskStore, job: Job) {
    let Some(data_dir) = read_tasks(tasks).get(&job.task_id).map(|t| t.data_dir.clone()) else {
        tracing::warn!(task_id = %job.task_id, "Dropping job for unknown task");
        return;
    };

    update_task(tasks, &job.task_id, |t| t.status = TaskStatus::Processing);
    tracing::info!(task_id = %job.task_id, "Processing task");

    let started = Instant::now();
    let store = SnapshotStore::new(data_dir);
    // A panic fails this task only; the worker moves on to the next job.
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        process_export(pipeline, tasks, &job.task_id, &job.export, &store)
    }))
    .unwrap_or_else(|payload| {
        Err(Error::Worker(format!(
            "pipeline panicked: {}",
            panic_message(payload.as_ref())
        )))
    });

    match result {
        Ok(()) => {
            update_task(tasks, &job.task_id, |t| {
                t.status = TaskStatus::Completed;
                t.progress = 100.0;
                t.completed = true;
            });
            tracing::info!(
                task_id = %job.task_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Task completed"
            );
        }
        Err(e) => {
            update_task(tasks, &job.task_id, |t| {
                t.status = TaskStatus::Failed;
                t.error = Some(e.to_string());
            });
            tracing::error!(task_id = %job.task_id, error = %e, "Task failed");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn process_export(
    pipeline: &Pipeline,
    tasks: &TaskStore,
    task_id: &str,
    export: &ParsedExport,
    store: &SnapshotStore,
) -> Result<()> {
    let normalized = export.normalize();
    let messages = branch::reconstruct(&normalized.messages);
    tracing::info!(
        task_id = %task_id,
        messages = messages.len(),
        warnings = normalized.warnings.len(),
        "Reconstructed branches"
    );

    pipeline.run(messages, |update| {
        let progress = update.progress();
        if let MonthOutcome::Processed { snapshot, messages } = &update.outcome {
            store.save_month(snapshot, messages)?;
        }
        update_task(tasks, task_id, |t| t.progress = progress);
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineSettings;
    use crate::services::{EmbeddingClient, TextGenerator};
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::{NamedTempFile, TempDir};

    struct AxisEmbedder {
        fail: Arc<AtomicBool>,
    }

    impl EmbeddingClient for AxisEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::embedding("offline"));
            }
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    if t.contains("Rust") {
                        vec![1.0, 0.01 * i as f32]
                    } else {
                        vec![0.01 * i as f32, 1.0]
                    }
                })
                .collect())
        }
    }

    struct EchoGenerator;

    impl TextGenerator for EchoGenerator {
        fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            Ok("Topic".to_string())
        }
    }

    fn supervisor(data_dir: &Path, fail: Arc<AtomicBool>) -> TaskSupervisor {
        let mut settings = PipelineSettings::default();
        settings.projection.n_epochs = Some(30);
        let pipeline = Pipeline::new(
            Box::new(AxisEmbedder { fail }),
            Box::new(EchoGenerator),
            settings,
        );
        TaskSupervisor::start(pipeline, data_dir, new_task_store()).unwrap()
    }

    fn claude_export() -> NamedTempFile {
        let json = serde_json::json!([
            {
                "uuid": "c1",
                "name": "Rust traits",
                "chat_messages": [
                    {"uuid": "m1", "sender": "human", "text": "hi", "created_at": "2024-01-03T10:00:00Z"},
                    {"uuid": "m2", "parent": "m1", "sender": "assistant", "text": "hello", "created_at": "2024-01-03T10:00:05Z"}
                ]
            },
            {
                "uuid": "c2",
                "name": "Sourdough",
                "chat_messages": [
                    {"uuid": "m3", "sender": "human", "text": "bread", "created_at": "2024-02-10T08:00:00Z"}
                ]
            },
            {
                "uuid": "c3",
                "name": "Rust macros",
                "chat_messages": [
                    {"uuid": "m4", "sender": "human", "text": "macro", "created_at": "2024-02-11T08:00:00Z"}
                ]
            }
        ]);
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();
        file
    }

    #[test]
    fn test_unknown_format_creates_no_task() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path(), Arc::new(AtomicBool::new(false)));
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"foo": 1}}]"#).unwrap();

        assert!(matches!(
            sup.start_task(file.path()),
            Err(Error::UnknownFormat(_))
        ));
        assert!(sup.tasks().read().unwrap().is_empty());
    }

    #[test]
    fn test_task_runs_to_completion() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path(), Arc::new(AtomicBool::new(false)));
        let export = claude_export();

        let id = sup.start_task(export.path()).unwrap();
        let task = sup.wait_for(&id, Duration::from_secs(60)).unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed);
        assert_eq!(task.progress, 100.0);
        assert_eq!(task.data_dir, dir.path().join("claude"));

        // January has one title and is skipped; February is stored.
        let store = SnapshotStore::new(&task.data_dir);
        let states = store.list_states().unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].month_year, "2024-02");
        assert!(store.load_state("2024-02").unwrap().unwrap().is_consistent());
    }

    #[test]
    fn test_service_failure_skips_months_without_failing() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path(), Arc::new(AtomicBool::new(true)));
        let export = claude_export();

        let id = sup.start_task(export.path()).unwrap();
        let task = sup.wait_for(&id, Duration::from_secs(60)).unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(SnapshotStore::new(&task.data_dir)
            .list_states()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_empty_export_fails_task() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path(), Arc::new(AtomicBool::new(false)));
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"uuid": "c1", "name": "Empty", "chat_messages": []}}]"#
        )
        .unwrap();

        let id = sup.start_task(file.path()).unwrap();
        let task = sup.wait_for(&id, Duration::from_secs(10)).unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(!task.completed);
        assert!(task.error.unwrap().contains("no data"));
    }

    #[test]
    fn test_tasks_run_in_submission_order() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path(), Arc::new(AtomicBool::new(false)));
        let first = claude_export();
        let second = claude_export();

        let a = sup.start_task(first.path()).unwrap();
        let b = sup.start_task(second.path()).unwrap();
        let task_b = sup.wait_for(&b, Duration::from_secs(60)).unwrap();
        let task_a = sup.task_status(&a).unwrap();

        assert_eq!(task_b.status, TaskStatus::Completed);
        assert_eq!(task_a.status, TaskStatus::Completed);
    }

    struct PanickingEmbedder;

    impl EmbeddingClient for PanickingEmbedder {
        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            panic!("embedding backend exploded");
        }
    }

    #[test]
    fn test_pipeline_panic_fails_task_and_keeps_worker() {
        let dir = TempDir::new().unwrap();
        let mut settings = PipelineSettings::default();
        settings.projection.n_epochs = Some(30);
        let pipeline = Pipeline::new(Box::new(PanickingEmbedder), Box::new(EchoGenerator), settings);
        let sup = TaskSupervisor::start(pipeline, dir.path(), new_task_store()).unwrap();
        let export = claude_export();

        let first = sup.start_task(export.path()).unwrap();
        let task = sup.wait_for(&first, Duration::from_secs(10)).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(!task.completed);
        assert!(task.error.unwrap().contains("embedding backend exploded"));

        assert!(sup.is_running());
        let second = sup.start_task(export.path()).unwrap();
        let task = sup.wait_for(&second, Duration::from_secs(10)).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        sup.shutdown().unwrap();
    }

    #[test]
    fn test_unknown_task_id() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path(), Arc::new(AtomicBool::new(false)));
        assert!(matches!(
            sup.task_status("missing"),
            Err(Error::TaskNotFound(_))
        ));
        sup.shutdown().unwrap();
    }
}
