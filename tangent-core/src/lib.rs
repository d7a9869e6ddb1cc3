//! # tangent-core
//!
//! Core library for tangent - a topic map of your AI chat history.
//!
//! This library provides:
//! - Detection and normalization of ChatGPT and Claude exports
//! - Branch reconstruction over each conversation's message tree
//! - A cumulative month-by-month embed, project, cluster and label pipeline
//! - A snapshot store and a single-worker task supervisor
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through the components once per uploaded export:
//! - **Ingest:** schema detection and normalization into [`Message`] records
//! - **Branch:** dotted branch ids and edit-branch annotations
//! - **Pipeline:** one [`MonthlySnapshot`] per cumulative month
//! - **Store:** state files per month plus "latest" pointer files
//!
//! ## Example
//!
//! ```rust,no_run
//! use tangent_core::{Config, Pipeline, TaskSupervisor};
//! use tangent_core::supervisor::new_task_store;
//! use std::path::Path;
//!
//! let config = Config::load().expect("failed to load config");
//! let pipeline = Pipeline::from_config(&config).expect("failed to create services");
//! let supervisor = TaskSupervisor::start(pipeline, config.storage.data_dir(), new_task_store())
//!     .expect("failed to start worker");
//! let task_id = supervisor
//!     .start_task(Path::new("conversations.json"))
//!     .expect("unsupported export");
//! println!("queued {}", task_id);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use ingest::{detect_export, read_export, ParsedExport};
pub use pipeline::{Pipeline, PipelineSettings};
pub use store::SnapshotStore;
pub use supervisor::TaskSupervisor;
pub use types::*;

// Public modules
pub mod branch;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod services;
pub mod store;
pub mod supervisor;
pub mod types;
