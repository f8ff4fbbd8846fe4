//! # Manual Process Steps
//!
//! Operator-facing verification and mutation of a single eligible step.
//!
//! [`ManualProcessStepData`] is obtained from a verified process and collects
//! every mutation (skips, new steps, finalisation) into one [`ChangeSet`]
//! committed by [`ManualProcessStepData::finalize_process_step`].
//! [`RetriggerService`] builds on it to re-run failed steps.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::database::{
    ChangeSet, ProcessStore, SavedChanges, StepModification, VerifyProcessData,
};
use crate::error::{IssuerError, Result};
use crate::models::{NewProcessStep, Process, ProcessStep};
use crate::state_machine::{ProcessStepStatusId, ProcessStepTypeId, RetriggerTable};

/// Finalise same-type pending steps: the first gets `status`, the rest become `DUPLICATE`
pub fn collapse_duplicates<'a>(
    steps: impl IntoIterator<Item = &'a ProcessStep>,
    status: ProcessStepStatusId,
    message: Option<&str>,
) -> Vec<StepModification> {
    steps
        .into_iter()
        .filter(|step| step.is_pending())
        .enumerate()
        .map(|(index, step)| {
            if index == 0 {
                StepModification::finalize(step.id, status, message.map(str::to_string))
            } else {
                StepModification::finalize(step.id, ProcessStepStatusId::Duplicate, None)
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct ManualProcessStepData {
    step_type: ProcessStepTypeId,
    process: Process,
    /// Pending steps of the verified step types
    steps: Vec<ProcessStep>,
    changes: ChangeSet,
}

impl ManualProcessStepData {
    /// Check that `step_type` may run now for the entity named `entity`
    pub fn from_verify_data(
        data: Option<VerifyProcessData>,
        step_type: ProcessStepTypeId,
        entity: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let data = data.ok_or_else(|| IssuerError::NotFound(format!("{entity} does not exist")))?;
        let process = data.process.ok_or_else(|| {
            IssuerError::Conflict(format!("{entity} is not associated with any process"))
        })?;

        if process.is_locked(now) {
            return Err(IssuerError::Conflict(format!(
                "process {} associated with {entity} is locked, lock expiry is set to {}",
                process.id,
                process
                    .lock_expiry_date
                    .map(|date| date.to_rfc3339())
                    .unwrap_or_default()
            )));
        }

        let steps = data.process_steps.ok_or_else(|| {
            IssuerError::UnexpectedCondition("processSteps should never be null here".to_string())
        })?;
        if steps.iter().any(|step| !step.is_pending()) {
            return Err(IssuerError::UnexpectedCondition(
                "processSteps should never have any other status than TODO here".to_string(),
            ));
        }
        if !steps.iter().any(|step| step.step_type == step_type) {
            return Err(IssuerError::Conflict(format!(
                "{entity}, process step {step_type} is not eligible to run"
            )));
        }

        Ok(Self {
            step_type,
            process,
            steps,
            changes: ChangeSet::new(),
        })
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    pub fn step_type(&self) -> ProcessStepTypeId {
        self.step_type
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub async fn request_lock(
        &mut self,
        store: &dyn ProcessStore,
        lock_expiry_date: DateTime<Utc>,
    ) -> Result<()> {
        if !store.try_lock(&mut self.process, lock_expiry_date).await? {
            return Err(IssuerError::UnexpectedCondition(
                "process TryLock should never fail here".to_string(),
            ));
        }
        Ok(())
    }

    fn skip_where(&mut self, predicate: impl Fn(ProcessStepTypeId) -> bool) {
        let mut by_type: BTreeMap<ProcessStepTypeId, Vec<&ProcessStep>> = BTreeMap::new();
        for step in self
            .steps
            .iter()
            .filter(|step| step.step_type != self.step_type && predicate(step.step_type))
        {
            by_type.entry(step.step_type).or_default().push(step);
        }
        for steps in by_type.into_values() {
            self.changes.step_modifications.extend(collapse_duplicates(
                steps,
                ProcessStepStatusId::Skipped,
                None,
            ));
        }
    }

    /// Skip pending steps of the given types
    pub fn skip_process_steps(&mut self, step_types: &[ProcessStepTypeId]) {
        self.skip_where(|step_type| step_types.contains(&step_type));
    }

    /// Skip every pending step whose type is not listed
    pub fn skip_process_steps_except(&mut self, keep: &[ProcessStepTypeId]) {
        self.skip_where(|step_type| !keep.contains(&step_type));
    }

    /// Schedule step types that are not already pending
    pub fn schedule_process_steps(&mut self, step_types: &[ProcessStepTypeId]) {
        for step_type in step_types {
            let pending = self.steps.iter().any(|step| step.step_type == *step_type)
                || self
                    .changes
                    .new_steps
                    .iter()
                    .any(|step| step.step_type == *step_type);
            if !pending {
                self.changes
                    .add_step(NewProcessStep::todo(self.process.id, *step_type));
            }
        }
    }

    /// Mark the step `DONE`, commit all collected changes and release the lock
    pub async fn finalize_process_step(self, store: &dyn ProcessStore) -> Result<SavedChanges> {
        let Self {
            step_type,
            mut process,
            steps,
            mut changes,
        } = self;

        changes.step_modifications.extend(collapse_duplicates(
            steps.iter().filter(|step| step.step_type == step_type),
            ProcessStepStatusId::Done,
            None,
        ));
        changes.check_version(&process);

        let saved = store.save(changes).await?;
        if let Some(version) = saved.process_versions.get(&process.id) {
            process.version = *version;
        }

        if process.lock_expiry_date.is_some() && !store.release_lock(&mut process).await? {
            store.update_version(&mut process).await?;
        }
        Ok(saved)
    }
}

/// Scheduling and execution of retrigger steps
pub struct RetriggerService {
    store: Arc<dyn ProcessStore>,
    table: &'static RetriggerTable,
}

impl RetriggerService {
    pub fn new(store: Arc<dyn ProcessStore>) -> Result<Self> {
        Ok(Self {
            store,
            table: RetriggerTable::global()?,
        })
    }

    /// Create a `TODO` retrigger step for a failed step of `step_type`
    #[instrument(skip(self))]
    pub async fn schedule_retrigger(
        &self,
        process_id: Uuid,
        step_type: ProcessStepTypeId,
    ) -> Result<ProcessStep> {
        let retrigger = self.table.retrigger_step(step_type)?;
        let process_type = self.table.process_type_of(step_type)?;

        let process = self
            .store
            .get_process(process_id)
            .await?
            .ok_or_else(|| IssuerError::NotFound(format!("process {process_id} does not exist")))?;
        if process.process_type_id != process_type {
            return Err(IssuerError::Conflict(format!(
                "process {process_id} is not a {process_type} process"
            )));
        }
        if process.is_locked(Utc::now()) {
            return Err(IssuerError::Conflict(format!(
                "process {process_id} is locked, lock expiry is set to {}",
                process
                    .lock_expiry_date
                    .map(|date| date.to_rfc3339())
                    .unwrap_or_default()
            )));
        }

        let steps = self.store.get_process_steps(process_id).await?;
        if !steps
            .iter()
            .any(|step| step.step_type == step_type && step.status == ProcessStepStatusId::Failed)
        {
            return Err(IssuerError::Conflict(format!(
                "process {process_id} has no failed {step_type} step"
            )));
        }
        if steps
            .iter()
            .any(|step| step.is_pending() && (step.step_type == step_type || step.step_type == retrigger))
        {
            return Err(IssuerError::Conflict(format!(
                "process {process_id} already has a pending {step_type} or {retrigger} step"
            )));
        }

        let mut changes = ChangeSet::new();
        changes
            .check_version(&process)
            .add_step(NewProcessStep::todo(process_id, retrigger));
        let saved = self.store.save(changes).await?;
        info!(process_id = %process_id, retrigger = %retrigger, "Retrigger scheduled");

        saved.created_steps.into_iter().next().ok_or_else(|| {
            IssuerError::UnexpectedCondition(format!("retrigger step {retrigger} was not created"))
        })
    }

    /// Run a pending retrigger step: schedule its forward step and finalise it
    #[instrument(skip(self))]
    pub async fn execute_retrigger(
        &self,
        process_id: Uuid,
        retrigger: ProcessStepTypeId,
    ) -> Result<SavedChanges> {
        let (process_type, step_type) = self.table.retrigger_target(retrigger)?;
        let data = self
            .store
            .verify_process(process_id, process_type, &[retrigger])
            .await?;

        let mut manual = ManualProcessStepData::from_verify_data(
            data,
            retrigger,
            &format!("process {process_id}"),
            Utc::now(),
        )?;
        manual.schedule_process_steps(&[step_type]);
        let saved = manual.finalize_process_step(self.store.as_ref()).await?;

        info!(process_id = %process_id, step_type = %step_type, "Step retriggered");
        Ok(saved)
    }
}
