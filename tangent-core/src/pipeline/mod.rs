//! Month-by-month topic map pipeline
//!
//! Each month is recomputed from scratch over the cumulative message set:
//!
//! ```text
//! MonthBatch ─► embed titles ─► project (2-D)
//!                    │
//!                    └────────► cosine distances ─► cluster ─► label
//!                                                          │
//!                                                          ▼
//!                                                  MonthlySnapshot
//! ```
//!
//! A failure inside one month never stops the run: the month is reported as
//! failed and the next one starts. Only the callback that persists results
//! can abort a run.

pub mod batcher;
pub mod cluster;
pub mod metadata;
pub mod projection;

pub use batcher::{display_title, MonthBatch, MonthlyBatcher};

use crate::config::{ClusteringConfig, Config, ProjectionConfig};
use crate::error::{Error, Result};
use crate::services::{create_embedding_client, create_text_generator, EmbeddingClient, TextGenerator};
use crate::types::{Message, MonthlySnapshot};

/// Tunables for the numeric stages.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub projection: ProjectionConfig,
    pub clustering: ClusteringConfig,
    pub topic_temperature: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            projection: config.projection.clone(),
            clustering: config.clustering.clone(),
            topic_temperature: config.generation.topic_temperature,
        }
    }
}

/// What happened to one month.
#[derive(Debug)]
pub enum MonthOutcome {
    /// Snapshot computed; `messages` is the cumulative set it covers
    Processed {
        snapshot: MonthlySnapshot,
        messages: Vec<Message>,
    },
    /// Not enough titles to cluster
    Skipped { reason: String },
    /// An external service or a stage failed for this month only
    Failed { error: String },
}

/// Per-month report handed to the caller.
#[derive(Debug)]
pub struct MonthUpdate {
    pub month_year: String,
    /// 1-based position of this month
    pub index: usize,
    pub total_months: usize,
    pub outcome: MonthOutcome,
}

impl MonthUpdate {
    /// Share of months handled so far, 0-100
    pub fn progress(&self) -> f64 {
        if self.total_months == 0 {
            return 100.0;
        }
        self.index as f64 / self.total_months as f64 * 100.0
    }
}

/// Totals for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total_months: usize,
    pub processed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Embeds, projects, clusters and labels cumulative monthly batches.
pub struct Pipeline {
    embedder: Box<dyn EmbeddingClient>,
    generator: Box<dyn TextGenerator>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        embedder: Box<dyn EmbeddingClient>,
        generator: Box<dyn TextGenerator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            embedder,
            generator,
            settings,
        }
    }

    /// Build a pipeline talking to the configured services.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            create_embedding_client(&config.embedding)?,
            create_text_generator(&config.generation)?,
            PipelineSettings::from(config),
        ))
    }

    /// Compute the snapshot for one batch.
    ///
    /// Every failure comes back as [`Error::MonthProcessing`].
    pub fn process_month(&self, batch: &MonthBatch) -> Result<MonthlySnapshot> {
        self.compute(batch).map_err(|e| match e {
            Error::MonthProcessing { .. } => e,
            other => Error::MonthProcessing {
                month: batch.month_year.clone(),
                message: other.to_string(),
            },
        })
    }

    fn compute(&self, batch: &MonthBatch) -> Result<MonthlySnapshot> {
        let vectors: Vec<Vec<f64>> = self
            .embedder
            .embed(&batch.titles)?
            .into_iter()
            .map(|v| v.into_iter().map(f64::from).collect())
            .collect();
        if vectors.len() != batch.titles.len() {
            return Err(Error::embedding(format!(
                "expected {} vectors, got {}",
                batch.titles.len(),
                vectors.len()
            )));
        }

        let points = projection::project(&vectors, &self.settings.projection);
        let distances = cluster::cosine_distance_matrix(&vectors);
        let clusters = cluster::assign_clusters(&distances, &self.settings.clustering);
        let topics = metadata::generate_metadata(
            &clusters,
            &batch.titles,
            &distances,
            self.generator.as_ref(),
            self.settings.topic_temperature,
        );

        let snapshot = MonthlySnapshot {
            month_year: batch.month_year.clone(),
            points,
            clusters,
            titles: batch.titles.clone(),
            topics,
            total_conversations: batch.total_conversations(),
        };
        debug_assert!(snapshot.is_consistent());
        Ok(snapshot)
    }

    /// Run every month in ascending order, reporting each through `on_month`.
    ///
    /// Fails with [`Error::NoData`] on an empty message set, or with whatever
    /// error `on_month` returns.
    pub fn run<F>(&self, messages: Vec<Message>, mut on_month: F) -> Result<RunSummary>
    where
        F: FnMut(MonthUpdate) -> Result<()>,
    {
        let batcher = MonthlyBatcher::new(messages)?;
        let total_months = batcher.total_months();
        let mut summary = RunSummary {
            total_months,
            ..Default::default()
        };
        tracing::info!(months = total_months, "Starting pipeline run");

        for (i, batch) in batcher.batches().enumerate() {
            let month_year = batch.month_year.clone();
            let outcome = if batch.is_sparse() {
                tracing::info!(
                    month = %month_year,
                    titles = batch.titles.len(),
                    "Skipping month with too few conversations"
                );
                summary.skipped.push(month_year.clone());
                MonthOutcome::Skipped {
                    reason: format!("only {} distinct title(s)", batch.titles.len()),
                }
            } else {
                match self.process_month(&batch) {
                    Ok(snapshot) => {
                        tracing::info!(
                            month = %month_year,
                            titles = snapshot.titles.len(),
                            clusters = snapshot.topics.len(),
                            "Processed month"
                        );
                        summary.processed.push(month_year.clone());
                        MonthOutcome::Processed {
                            snapshot,
                            messages: batch.messages,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(month = %month_year, error = %e, "Month failed, continuing");
                        summary.failed.push(month_year.clone());
                        MonthOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            };

            on_month(MonthUpdate {
                month_year,
                index: i + 1,
                total_months,
                outcome,
            })?;
        }

        tracing::info!(
            processed = summary.processed.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Pipeline run complete"
        );
        Ok(summary)
    }
}
