//! # Process Type Executor
//!
//! Dispatches pending steps of one workflow family to their handlers.
//!
//! ## Overview
//!
//! Each family (credential creation, credential decline) is served by a
//! [`CredentialProcessExecutor`] built from a declarative route table mapping
//! a step type to its handler function and lock requirement. The executor
//! resolves the credential a process belongs to, runs the handler and turns
//! handler errors into step outcomes:
//!
//! - recoverable service errors leave the step `TODO` so the next poll retries it
//! - every other error finalises the step `FAILED` with the error text
//! - cancellation and optimistic conflicts are returned as errors so that
//!   nothing is persisted for the step
//!
//! Step types without a route are a no-op: the step stays `TODO` and the
//! outcome reports `modified = false`.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::cancellation::CancellationToken;
use super::{creation, decline, reissuance};
use crate::config::CredentialSettings;
use crate::database::{CredentialChange, CredentialRepository, ProcessStore};
use crate::error::{IssuerError, Result};
use crate::models::Process;
use crate::services::{CallbackService, NotificationService, WalletService};
use crate::state_machine::{ProcessStepStatusId, ProcessStepTypeId, ProcessTypeId};

/// Collaborators and settings available to every step handler
pub struct StepContext {
    pub credentials: Arc<dyn CredentialRepository>,
    pub processes: Arc<dyn ProcessStore>,
    pub wallet: Arc<dyn WalletService>,
    pub notifications: Arc<dyn NotificationService>,
    pub callbacks: Arc<dyn CallbackService>,
    pub settings: CredentialSettings,
}

/// A process opened by a step, created in the same change set as the step outcome
#[derive(Debug, Clone, PartialEq)]
pub struct NewProcess {
    pub process: Process,
    /// Step types created `TODO` in the new process
    pub step_types: Vec<ProcessStepTypeId>,
}

/// Result of executing one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Step types to schedule next; `None` ends the chain
    pub next_step_types: Option<Vec<ProcessStepTypeId>>,
    pub status: ProcessStepStatusId,
    /// Whether the step record must be written
    pub modified: bool,
    pub message: Option<String>,
    pub credential_changes: Vec<CredentialChange>,
    pub new_processes: Vec<NewProcess>,
}

impl StepOutcome {
    pub fn done(next_step_types: Option<Vec<ProcessStepTypeId>>) -> Self {
        Self {
            next_step_types,
            status: ProcessStepStatusId::Done,
            modified: true,
            message: None,
            credential_changes: Vec::new(),
            new_processes: Vec::new(),
        }
    }

    pub fn skipped(
        message: impl Into<String>,
        next_step_types: Option<Vec<ProcessStepTypeId>>,
        modified: bool,
    ) -> Self {
        Self {
            next_step_types,
            status: ProcessStepStatusId::Skipped,
            modified,
            message: Some(message.into()),
            credential_changes: Vec::new(),
            new_processes: Vec::new(),
        }
    }

    /// The step was not handled and stays `TODO`
    pub fn unchanged() -> Self {
        Self {
            next_step_types: None,
            status: ProcessStepStatusId::Todo,
            modified: false,
            message: None,
            credential_changes: Vec::new(),
            new_processes: Vec::new(),
        }
    }

    pub fn from_error(err: &IssuerError) -> Self {
        Self {
            next_step_types: None,
            status: if err.is_recoverable() {
                ProcessStepStatusId::Todo
            } else {
                ProcessStepStatusId::Failed
            },
            modified: true,
            message: Some(err.to_string()),
            credential_changes: Vec::new(),
            new_processes: Vec::new(),
        }
    }

    pub fn with_change(mut self, change: CredentialChange) -> Self {
        self.credential_changes.push(change);
        self
    }

    pub fn with_changes(mut self, changes: impl IntoIterator<Item = CredentialChange>) -> Self {
        self.credential_changes.extend(changes);
        self
    }

    pub fn with_process(mut self, process: NewProcess) -> Self {
        self.new_processes.push(process);
        self
    }

    pub fn next_step_types(&self) -> &[ProcessStepTypeId] {
        self.next_step_types.as_deref().unwrap_or_default()
    }
}

pub type StepHandlerFn = fn(Uuid, Arc<StepContext>) -> BoxFuture<'static, Result<StepOutcome>>;

#[derive(Clone, Copy)]
pub struct StepRoute {
    pub step_type: ProcessStepTypeId,
    pub handler: StepHandlerFn,
    /// The step touches a second credential and needs exclusive access to the process
    pub requires_lock: bool,
}

impl std::fmt::Debug for StepRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRoute")
            .field("step_type", &self.step_type)
            .field("requires_lock", &self.requires_lock)
            .finish()
    }
}

#[async_trait]
pub trait ProcessTypeExecutor: Send + Sync {
    fn process_type_id(&self) -> ProcessTypeId;

    fn is_executable_step_type(&self, step_type: ProcessStepTypeId) -> bool;

    fn executable_step_types(&self) -> Vec<ProcessStepTypeId>;

    fn is_lock_required(&self, step_type: ProcessStepTypeId) -> bool;

    /// Resolve the credential the process works on
    async fn initialize(
        &self,
        process_id: Uuid,
        pending_step_types: &[ProcessStepTypeId],
    ) -> Result<Uuid>;

    async fn execute_step(
        &self,
        credential_id: Uuid,
        step_type: ProcessStepTypeId,
        pending_step_types: &[ProcessStepTypeId],
        cancel: &CancellationToken,
    ) -> Result<StepOutcome>;
}

/// Route-table driven executor for the credential workflow families
pub struct CredentialProcessExecutor {
    process_type_id: ProcessTypeId,
    routes: HashMap<ProcessStepTypeId, StepRoute>,
    /// Route order, used for reporting executable types deterministically
    order: Vec<ProcessStepTypeId>,
    context: Arc<StepContext>,
}

impl CredentialProcessExecutor {
    pub fn new(
        process_type_id: ProcessTypeId,
        routes: impl IntoIterator<Item = StepRoute>,
        context: Arc<StepContext>,
    ) -> Self {
        let mut table = HashMap::new();
        let mut order = Vec::new();
        for route in routes {
            if table.insert(route.step_type, route).is_none() {
                order.push(route.step_type);
            }
        }
        Self {
            process_type_id,
            routes: table,
            order,
            context,
        }
    }

    /// Creation family, including the reissuance steps that run inside creation processes
    pub fn creation(context: Arc<StepContext>) -> Self {
        Self::new(
            ProcessTypeId::CreateCredential,
            creation::routes().into_iter().chain(reissuance::routes()),
            context,
        )
    }

    pub fn decline(context: Arc<StepContext>) -> Self {
        Self::new(ProcessTypeId::DeclineCredential, decline::routes(), context)
    }
}

#[async_trait]
impl ProcessTypeExecutor for CredentialProcessExecutor {
    fn process_type_id(&self) -> ProcessTypeId {
        self.process_type_id
    }

    fn is_executable_step_type(&self, step_type: ProcessStepTypeId) -> bool {
        self.routes.contains_key(&step_type)
    }

    fn executable_step_types(&self) -> Vec<ProcessStepTypeId> {
        self.order.clone()
    }

    fn is_lock_required(&self, step_type: ProcessStepTypeId) -> bool {
        self.routes
            .get(&step_type)
            .is_some_and(|route| route.requires_lock)
    }

    #[instrument(skip(self), fields(process_type = %self.process_type_id))]
    async fn initialize(
        &self,
        process_id: Uuid,
        _pending_step_types: &[ProcessStepTypeId],
    ) -> Result<Uuid> {
        self.context
            .credentials
            .get_credential_id_for_process(process_id)
            .await?
            .ok_or_else(|| {
                IssuerError::NotFound(format!(
                    "process {process_id} does not exist or is not associated with an credential"
                ))
            })
    }

    #[instrument(skip(self, cancel), fields(process_type = %self.process_type_id))]
    async fn execute_step(
        &self,
        credential_id: Uuid,
        step_type: ProcessStepTypeId,
        _pending_step_types: &[ProcessStepTypeId],
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let Some(route) = self.routes.get(&step_type) else {
            debug!("No handler registered, step left untouched");
            return Ok(StepOutcome::unchanged());
        };

        if cancel.is_cancelled() {
            return Err(IssuerError::Cancelled);
        }

        let handler = (route.handler)(credential_id, Arc::clone(&self.context));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IssuerError::Cancelled),
            result = handler => result,
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_engine_signal() => Err(err),
            Err(err) => {
                warn!(
                    credential_id = %credential_id,
                    step_type = %step_type,
                    recoverable = err.is_recoverable(),
                    error = %err,
                    "Step handler failed"
                );
                Ok(StepOutcome::from_error(&err))
            }
        }
    }
}
