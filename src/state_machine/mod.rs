// State machines for payroll periods and processing runs.
//
// Both machines are pure transition tables; persistence applies them as
// compare-and-set expectations so concurrent writers cannot lose updates.

pub mod events;
pub mod period_state_machine;
pub mod run_state_machine;
pub mod states;

pub use events::{PeriodEvent, RunEvent};
pub use period_state_machine::PeriodStateMachine;
pub use run_state_machine::RunStateMachine;
pub use states::{PeriodStatus, RunStatus};
