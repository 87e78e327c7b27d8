//! Dependencies shared by the orchestrator, bulk operations and the pipeline.

use super::collaborators::Collaborators;
use crate::config::OrchestrationConfig;
use crate::metrics::MetricsRecorder;
use crate::models::AuditEntry;
use crate::repositories::{MetricRepository, PeriodRepository, RunLogRepository};
use std::sync::Arc;
use tracing::warn;

/// The three stores this crate owns
#[derive(Clone)]
pub struct PayrollStores {
    pub periods: Arc<dyn PeriodRepository>,
    pub runs: Arc<dyn RunLogRepository>,
    pub metrics: Arc<dyn MetricRepository>,
}

impl std::fmt::Debug for PayrollStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayrollStores").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct OrchestrationContext {
    pub stores: PayrollStores,
    pub collaborators: Collaborators,
    pub recorder: MetricsRecorder,
    pub config: OrchestrationConfig,
}

impl OrchestrationContext {
    pub fn new(
        stores: PayrollStores,
        collaborators: Collaborators,
        config: OrchestrationConfig,
    ) -> Self {
        let recorder = MetricsRecorder::new(stores.metrics.clone());
        Self {
            stores,
            collaborators,
            recorder,
            config,
        }
    }

    pub fn periods(&self) -> &dyn PeriodRepository {
        self.stores.periods.as_ref()
    }

    pub fn runs(&self) -> &dyn RunLogRepository {
        self.stores.runs.as_ref()
    }

    /// Write an audit entry; sink failures are logged and dropped
    pub async fn audit(&self, entry: AuditEntry) {
        let action = entry.action.clone();
        if let Err(e) = self.collaborators.audit.log(entry).await {
            warn!(action = %action, error = %e, "Audit sink rejected entry");
        }
    }
}
