//! Append-only metric writes.
//!
//! Metrics must never break the pipeline that produces them: batch writes
//! and [`MetricsRecorder::record_best_effort`] log and swallow store failures.
//!
//! ```rust
//! use payroll_run_core::metrics::MetricsRecorder;
//! use payroll_run_core::models::{MetricType, NewMetric};
//! use payroll_run_core::repositories::InMemoryMetricRepository;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let recorder = MetricsRecorder::new(Arc::new(InMemoryMetricRepository::new()));
//! let stored = recorder
//!     .record_best_effort(NewMetric::timing(MetricType::LeaveFetch, "leave_fetch", 18.5).for_run(7))
//!     .await
//!     .unwrap();
//! assert_eq!(stored.run_id, Some(7));
//! # });
//! ```

use crate::error::Result;
use crate::models::{Metric, NewMetric};
use crate::repositories::MetricRepository;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct MetricsRecorder {
    store: Arc<dyn MetricRepository>,
}

impl MetricsRecorder {
    pub fn new(store: Arc<dyn MetricRepository>) -> Self {
        Self { store }
    }

    pub async fn record(&self, metric: NewMetric) -> Result<Metric> {
        self.store.insert(metric).await
    }

    /// Single insert whose failure is logged and dropped
    pub async fn record_best_effort(&self, metric: NewMetric) -> Option<Metric> {
        let metric_type = metric.metric_type;
        match self.store.insert(metric).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(metric_type = %metric_type, error = %e, "Failed to record metric");
                None
            }
        }
    }

    /// Insert all or nothing; returns rows written, 0 on failure
    pub async fn record_batch(&self, metrics: Vec<NewMetric>) -> usize {
        if metrics.is_empty() {
            return 0;
        }
        let requested = metrics.len();
        match self.store.insert_batch(metrics).await {
            Ok(written) => {
                debug!(written, "Recorded metric batch");
                written
            }
            Err(e) => {
                warn!(requested, error = %e, "Failed to record metric batch");
                0
            }
        }
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder").finish_non_exhaustive()
    }
}

/// Wall-clock timer for one pipeline stage
#[derive(Debug, Clone, Copy)]
pub struct StageTimer {
    started: Instant,
}

impl StageTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}
