//! # Process Store
//!
//! Persistence seam of the process engine.
//!
//! ## Overview
//!
//! The store holds `Process` and `ProcessStep` records and is the only writer
//! of credential-side changes produced by step handlers. Every mutation goes
//! through [`ProcessStore::save`], which applies a [`ChangeSet`] atomically:
//! version checks, step modifications with status preconditions, new
//! processes, new steps and credential changes either all commit or none do.
//!
//! Locking is separate from `save` because it must be visible to other workers
//! before the step it guards starts running.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{CredentialDocument, CredentialStatus, DocumentStatus, ExpiryCheckType};
use crate::models::{NewProcessStep, Process, ProcessStep};
use crate::state_machine::{ProcessStepStatusId, ProcessStepTypeId, ProcessTypeId};

/// Status change of an existing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepModification {
    pub step_id: Uuid,
    /// The write only applies while the step still has this status
    pub expected_status: Option<ProcessStepStatusId>,
    pub status: ProcessStepStatusId,
    pub message: Option<String>,
}

impl StepModification {
    /// Finalise a `TODO` step
    pub fn finalize(step_id: Uuid, status: ProcessStepStatusId, message: Option<String>) -> Self {
        Self {
            step_id,
            expected_status: Some(ProcessStepStatusId::Todo),
            status,
            message,
        }
    }
}

/// Mutation of the credential tables carried alongside step updates
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialChange {
    SetExternalCredentialId {
        credential_id: Uuid,
        external_credential_id: Uuid,
    },
    StoreSignedCredential {
        credential_id: Uuid,
        credential: String,
        document: CredentialDocument,
    },
    SetCredentialStatus {
        credential_id: Uuid,
        expected: CredentialStatus,
        status: CredentialStatus,
    },
    SetDocumentStatus {
        credential_id: Uuid,
        document_id: Uuid,
        expected: DocumentStatus,
        status: DocumentStatus,
    },
    SetExpiryCheckType {
        credential_id: Uuid,
        expected: Option<ExpiryCheckType>,
        expiry_check_type: ExpiryCheckType,
    },
    LinkProcess {
        credential_id: Uuid,
        expected: Option<Uuid>,
        process_id: Uuid,
    },
    SetReissuedCredential {
        credential_id: Uuid,
        reissued_credential_id: Uuid,
    },
    RemoveCredential {
        credential_id: Uuid,
    },
}

impl CredentialChange {
    pub fn credential_id(&self) -> Uuid {
        match self {
            Self::SetExternalCredentialId { credential_id, .. }
            | Self::StoreSignedCredential { credential_id, .. }
            | Self::SetCredentialStatus { credential_id, .. }
            | Self::SetDocumentStatus { credential_id, .. }
            | Self::SetExpiryCheckType { credential_id, .. }
            | Self::LinkProcess { credential_id, .. }
            | Self::SetReissuedCredential { credential_id, .. }
            | Self::RemoveCredential { credential_id } => *credential_id,
        }
    }
}

/// Everything one unit of work writes, committed atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Processes whose version must be unchanged; each gets a new version
    pub version_checks: Vec<(Uuid, Uuid)>,
    pub step_modifications: Vec<StepModification>,
    pub new_processes: Vec<Process>,
    pub new_steps: Vec<NewProcessStep>,
    pub credential_changes: Vec<CredentialChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_version(&mut self, process: &Process) -> &mut Self {
        self.version_checks.push((process.id, process.version));
        self
    }

    pub fn modify_step(&mut self, modification: StepModification) -> &mut Self {
        self.step_modifications.push(modification);
        self
    }

    pub fn add_process(&mut self, process: Process) -> &mut Self {
        self.new_processes.push(process);
        self
    }

    pub fn add_step(&mut self, step: NewProcessStep) -> &mut Self {
        self.new_steps.push(step);
        self
    }

    pub fn change_credential(&mut self, change: CredentialChange) -> &mut Self {
        self.credential_changes.push(change);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.version_checks.is_empty()
            && self.step_modifications.is_empty()
            && self.new_processes.is_empty()
            && self.new_steps.is_empty()
            && self.credential_changes.is_empty()
    }
}

/// Result of a committed [`ChangeSet`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavedChanges {
    /// New version of every process whose version was checked
    pub process_versions: HashMap<Uuid, Uuid>,
    pub created_steps: Vec<ProcessStep>,
}

/// A process together with its pending steps of the requested types
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyProcessData {
    /// `None` when the process exists but belongs to another workflow family
    pub process: Option<Process>,
    pub process_steps: Option<Vec<ProcessStep>>,
}

#[async_trait]
pub trait ProcessStore: Send + Sync {
    /// Apply a change set atomically
    async fn save(&self, changes: ChangeSet) -> Result<SavedChanges>;

    async fn get_process(&self, process_id: Uuid) -> Result<Option<Process>>;

    /// Unlocked (or expired-lock) processes with a `TODO` step of one of `step_types`
    async fn get_active_processes(
        &self,
        process_types: &[ProcessTypeId],
        step_types: &[ProcessStepTypeId],
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Process>>;

    /// All steps of a process in creation order
    async fn get_process_steps(&self, process_id: Uuid) -> Result<Vec<ProcessStep>>;

    /// Take the lock when free or expired; `false` while another holder's lock is valid
    async fn try_lock(&self, process: &mut Process, lock_expiry_date: DateTime<Utc>)
        -> Result<bool>;

    /// Clear the lock; `false` when nothing was released
    async fn release_lock(&self, process: &mut Process) -> Result<bool>;

    /// Regenerate the version so concurrent readers observe a conflict
    async fn update_version(&self, process: &mut Process) -> Result<()>;

    async fn create_process(&self, process_type_id: ProcessTypeId) -> Result<Process> {
        let process = Process::new(process_type_id);
        let mut changes = ChangeSet::new();
        changes.add_process(process.clone());
        self.save(changes).await?;
        Ok(process)
    }

    async fn create_step(
        &self,
        process_id: Uuid,
        step_type: ProcessStepTypeId,
        status: ProcessStepStatusId,
    ) -> Result<ProcessStep> {
        let mut created = self
            .create_steps(vec![NewProcessStep {
                process_id,
                step_type,
                status,
            }])
            .await?;
        created.pop().ok_or_else(|| {
            crate::error::IssuerError::UnexpectedCondition(format!(
                "step {step_type} was not created for process {process_id}"
            ))
        })
    }

    async fn create_steps(&self, steps: Vec<NewProcessStep>) -> Result<Vec<ProcessStep>> {
        let changes = ChangeSet {
            new_steps: steps,
            ..ChangeSet::default()
        };
        Ok(self.save(changes).await?.created_steps)
    }

    async fn modify_steps(&self, modifications: Vec<StepModification>) -> Result<()> {
        let changes = ChangeSet {
            step_modifications: modifications,
            ..ChangeSet::default()
        };
        self.save(changes).await.map(|_| ())
    }

    /// Process plus its `TODO` steps of `step_types`; `None` when the process does not exist
    async fn verify_process(
        &self,
        process_id: Uuid,
        process_type_id: ProcessTypeId,
        step_types: &[ProcessStepTypeId],
    ) -> Result<Option<VerifyProcessData>> {
        let Some(process) = self.get_process(process_id).await? else {
            return Ok(None);
        };
        if process.process_type_id != process_type_id {
            return Ok(Some(VerifyProcessData {
                process: None,
                process_steps: None,
            }));
        }
        let steps = self
            .get_process_steps(process_id)
            .await?
            .into_iter()
            .filter(|step| step.is_pending() && step_types.contains(&step.step_type))
            .collect();
        Ok(Some(VerifyProcessData {
            process: Some(process),
            process_steps: Some(steps),
        }))
    }
}
