use super::{events::PeriodEvent, states::PeriodStatus};
use crate::constants::entity_types::PAYROLL_PERIOD;
use crate::error::{PayrollError, Result};

/// Transition table for payroll periods.
///
/// Period status is shared by `start`, `stop`, bulk close/open and pipeline
/// finalization, so every writer goes through a compare-and-set on
/// [`PeriodStateMachine::allowed_sources`].
pub struct PeriodStateMachine;

impl PeriodStateMachine {
    pub fn allowed_sources(event: PeriodEvent) -> &'static [PeriodStatus] {
        match event {
            PeriodEvent::BeginProcessing => &[PeriodStatus::Open],
            PeriodEvent::CompleteProcessing => &[PeriodStatus::Processing],
            PeriodEvent::RevertToOpen => &[PeriodStatus::Processing],
            PeriodEvent::Close => &[
                PeriodStatus::Draft,
                PeriodStatus::Open,
                PeriodStatus::Processing,
                PeriodStatus::Completed,
            ],
            PeriodEvent::Open => &[PeriodStatus::Draft, PeriodStatus::Closed],
        }
    }

    pub fn destination(event: PeriodEvent) -> PeriodStatus {
        match event {
            PeriodEvent::BeginProcessing => PeriodStatus::Processing,
            PeriodEvent::CompleteProcessing => PeriodStatus::Completed,
            PeriodEvent::RevertToOpen | PeriodEvent::Open => PeriodStatus::Open,
            PeriodEvent::Close => PeriodStatus::Closed,
        }
    }

    pub fn target_state(current: PeriodStatus, event: PeriodEvent) -> Result<PeriodStatus> {
        if Self::allowed_sources(event).contains(&current) {
            Ok(Self::destination(event))
        } else {
            Err(PayrollError::InvalidTransition {
                entity: PAYROLL_PERIOD,
                from: current.to_string(),
                to: event.event_type().to_string(),
            })
        }
    }
}
