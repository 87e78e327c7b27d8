use super::{events::RunEvent, states::RunStatus};
use crate::constants::entity_types::PROCESSING_RUN;
use crate::error::{PayrollError, Result};

/// Transition table for processing runs.
///
/// ```text
/// started ──begin──▶ in_progress ──complete──▶ completed
///    │                    │
///    ├──fail──────────────┼──fail──▶ failed
///    └──cancel────────────┴──cancel─▶ cancelled
/// ```
///
/// Terminal states have no outgoing transitions. Persistence layers use
/// [`RunStateMachine::allowed_sources`] as the compare-and-set expectation so
/// a concurrent transition can never resurrect a terminal run.
pub struct RunStateMachine;

impl RunStateMachine {
    /// Resolve the target state for `event` applied in `current`
    pub fn target_state(current: RunStatus, event: RunEvent) -> Result<RunStatus> {
        let target = match (current, event) {
            (RunStatus::Started, RunEvent::Begin) => RunStatus::InProgress,
            (RunStatus::InProgress, RunEvent::Complete) => RunStatus::Completed,
            (RunStatus::Started | RunStatus::InProgress, RunEvent::Fail) => RunStatus::Failed,
            (RunStatus::Started | RunStatus::InProgress, RunEvent::Cancel) => RunStatus::Cancelled,
            (from, event) => {
                return Err(PayrollError::InvalidTransition {
                    entity: PROCESSING_RUN,
                    from: from.to_string(),
                    to: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// States from which `event` may be applied
    pub fn allowed_sources(event: RunEvent) -> &'static [RunStatus] {
        match event {
            RunEvent::Begin => &[RunStatus::Started],
            RunEvent::Complete => &[RunStatus::InProgress],
            RunEvent::Fail | RunEvent::Cancel => &RunStatus::ACTIVE,
        }
    }

    /// The state `event` leads to, independent of the source
    pub fn destination(event: RunEvent) -> RunStatus {
        match event {
            RunEvent::Begin => RunStatus::InProgress,
            RunEvent::Complete => RunStatus::Completed,
            RunEvent::Fail => RunStatus::Failed,
            RunEvent::Cancel => RunStatus::Cancelled,
        }
    }
}
