// Process and step state definitions for the credential lifecycle engine.
//
// Step statuses only move out of TODO; re-running a finished step goes through
// its retrigger companion, which schedules a fresh TODO step of the same type.

pub mod retrigger;
pub mod states;

pub use retrigger::{retrigger_step, retrigger_target, RetriggerEntry, RetriggerTable};
pub use states::{ProcessStepStatusId, ProcessStepTypeId, ProcessTypeId};
