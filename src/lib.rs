#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Payroll Run Core
//!
//! Batch payroll-run orchestration: given a payroll period, resolve its
//! employees, run the calculation/storage/PDF/notification pipeline for each
//! of them in the background, and track run progress, per-employee failures
//! and latency metrics.
//!
//! ## Architecture
//!
//! - **Period store**, **run log** and **metric series** sit behind the
//!   [`repositories`] traits, with PostgreSQL and in-memory implementations.
//! - The [`orchestration`] layer validates requests synchronously, creates a
//!   run under a one-active-run-per-period guarantee and hands it to a
//!   supervised background worker. Outcomes are only observable through the
//!   run log.
//! - The [`metrics`] layer records stage timings and computes percentiles,
//!   success rates and dashboards on demand.
//!
//! ## Module Organization
//!
//! - [`config`] - layered YAML/env configuration
//! - [`database`] - pool construction and migrations
//! - [`error`] - crate error taxonomy
//! - [`logging`] - structured `tracing` setup and helpers
//! - [`models`] - periods, runs, metrics and collaborator payloads
//! - [`state_machine`] - period and run transition tables
//! - [`repositories`] - store traits and implementations
//! - [`orchestration`] - orchestrator, bulk operations, pipeline worker
//! - [`metrics`] - recorder and aggregator
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use payroll_run_core::config::ConfigManager;
//! use payroll_run_core::database::DatabaseConnection;
//! use payroll_run_core::orchestration::{Collaborators, PayrollOrchestrator, PayrollStores};
//! use payroll_run_core::repositories::{PgMetricRepository, PgPeriodRepository, PgRunLogRepository};
//! use std::sync::Arc;
//!
//! # async fn example(collaborators: Collaborators) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//! payroll_run_core::logging::init_structured_logging(&config.logging);
//!
//! let db = DatabaseConnection::connect(&config.database).await?;
//! let stores = PayrollStores {
//!     periods: Arc::new(PgPeriodRepository::new(db.pool().clone())),
//!     runs: Arc::new(PgRunLogRepository::new(db.pool().clone())),
//!     metrics: Arc::new(PgMetricRepository::new(db.pool().clone())),
//! };
//!
//! let orchestrator = PayrollOrchestrator::new(stores, collaborators, config.orchestration.clone());
//! let started = orchestrator.start(42, None, 1).await?;
//! let status = orchestrator.get_status(42).await?;
//! println!("run {} at {:.0}%", started.run_id, status.progress_percent);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestration;
pub mod repositories;
pub mod state_machine;

pub use config::{ConfigManager, PayrollConfig};
pub use error::{ErrorKind, PayrollError, Result};
pub use metrics::{AggregateStatistics, MetricsAggregator, MetricsRecorder};
pub use orchestration::{BulkOperations, PayrollOrchestrator, PayrollStores};
pub use state_machine::{PeriodStatus, RunStatus};
