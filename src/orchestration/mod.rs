//! # Orchestration Engine
//!
//! Drives credential processes step by step.
//!
//! ## Core Components
//!
//! - **ProcessWorker**: polls for due processes and activates them concurrently
//! - **CredentialProcessExecutor**: route table from step type to handler per workflow family
//! - **Step handlers**: creation, reissuance and decline steps
//! - **RetriggerService**: operator-initiated re-runs of failed steps
//! - **CancellationToken**: cooperative shutdown shared by the worker and the handlers

pub mod cancellation;
pub mod creation;
pub mod decline;
pub mod executor;
pub mod manual;
pub mod reissuance;
pub mod worker;

pub use cancellation::CancellationToken;
pub use executor::{
    CredentialProcessExecutor, NewProcess, ProcessTypeExecutor, StepContext, StepHandlerFn,
    StepOutcome, StepRoute,
};
pub use manual::{collapse_duplicates, ManualProcessStepData, RetriggerService};
pub use worker::{ActivationSummary, ProcessWorker};
