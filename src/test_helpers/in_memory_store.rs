//! In-memory [`ProcessStore`] and [`CredentialRepository`].
//!
//! Applies change sets to a copy of the state and swaps it in on success, so
//! a violated precondition leaves nothing behind, matching the transactional
//! PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::{
    ChangeSet, CredentialChange, CredentialRepository, ProcessStore, SavedChanges,
    StepModification,
};
use crate::error::{IssuerError, Result};
use crate::models::{
    Credential, CredentialStatus, ExpiryThresholds, NewProcessStep, Process, ProcessStep,
};
use crate::state_machine::{ProcessStepStatusId, ProcessStepTypeId, ProcessTypeId};

#[derive(Debug, Clone, Default)]
struct StoreState {
    processes: HashMap<Uuid, Process>,
    steps: Vec<ProcessStep>,
    credentials: HashMap<Uuid, Credential>,
    last_created: Option<DateTime<Utc>>,
}

impl StoreState {
    /// Strictly increasing creation timestamps keep step order deterministic
    fn next_created(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_created {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created = Some(next);
        next
    }

    fn insert_step(&mut self, step: &NewProcessStep) -> ProcessStep {
        let created = ProcessStep::new(
            step.process_id,
            step.step_type,
            step.status,
            self.next_created(),
        );
        self.steps.push(created.clone());
        created
    }

    fn apply_step_modification(&mut self, modification: &StepModification) -> Result<()> {
        let step = self
            .steps
            .iter_mut()
            .find(|step| step.id == modification.step_id)
            .filter(|step| {
                modification
                    .expected_status
                    .map_or(true, |expected| step.status == expected)
            })
            .ok_or_else(|| {
                IssuerError::Conflict(format!(
                    "process step {} was modified concurrently",
                    modification.step_id
                ))
            })?;
        step.status = modification.status;
        step.message = modification.message.clone();
        step.date_last_changed = Some(Utc::now());
        Ok(())
    }

    fn apply_credential_change(&mut self, change: &CredentialChange) -> Result<()> {
        let credential_id = change.credential_id();
        let conflict = || {
            IssuerError::Conflict(format!(
                "credential {credential_id} was modified concurrently"
            ))
        };

        if let CredentialChange::RemoveCredential { .. } = change {
            return self
                .credentials
                .remove(&credential_id)
                .map(|_| ())
                .ok_or_else(conflict);
        }

        if let CredentialChange::SetReissuedCredential {
            reissued_credential_id,
            ..
        } = change
        {
            self.credentials
                .get_mut(&credential_id)
                .ok_or_else(conflict)?
                .reissued_credential_id = Some(*reissued_credential_id);
            if let Some(reissued) = self.credentials.get_mut(reissued_credential_id) {
                reissued.superseded_credential_id.get_or_insert(credential_id);
            }
            return Ok(());
        }

        let credential = self
            .credentials
            .get_mut(&credential_id)
            .ok_or_else(conflict)?;
        match change {
            CredentialChange::SetExternalCredentialId {
                external_credential_id,
                ..
            } => credential.external_credential_id = Some(*external_credential_id),
            CredentialChange::StoreSignedCredential {
                credential: signed,
                document,
                ..
            } => {
                credential.credential = Some(signed.clone());
                credential.documents.push(document.clone());
            }
            CredentialChange::SetCredentialStatus {
                expected, status, ..
            } => {
                if credential.status != *expected {
                    return Err(conflict());
                }
                credential.status = *status;
            }
            CredentialChange::SetDocumentStatus {
                document_id,
                expected,
                status,
                ..
            } => {
                let document = credential
                    .documents
                    .iter_mut()
                    .find(|document| document.id == *document_id && document.status == *expected)
                    .ok_or_else(conflict)?;
                document.status = *status;
            }
            CredentialChange::SetExpiryCheckType {
                expected,
                expiry_check_type,
                ..
            } => {
                if credential.expiry_check_type != *expected {
                    return Err(conflict());
                }
                credential.expiry_check_type = Some(*expiry_check_type);
            }
            CredentialChange::LinkProcess {
                expected,
                process_id,
                ..
            } => {
                if credential.process_id != *expected {
                    return Err(conflict());
                }
                credential.process_id = Some(*process_id);
            }
            CredentialChange::SetReissuedCredential { .. }
            | CredentialChange::RemoveCredential { .. } => {}
        }
        Ok(())
    }

    fn apply(&mut self, changes: &ChangeSet) -> Result<SavedChanges> {
        let mut saved = SavedChanges::default();

        for (process_id, expected_version) in &changes.version_checks {
            let process = self
                .processes
                .get_mut(process_id)
                .filter(|process| process.version == *expected_version)
                .ok_or(IssuerError::OptimisticConflict(*process_id))?;
            process.update_version();
            saved.process_versions.insert(*process_id, process.version);
        }
        for process in &changes.new_processes {
            self.processes.insert(process.id, process.clone());
        }
        for modification in &changes.step_modifications {
            self.apply_step_modification(modification)?;
        }
        for step in &changes.new_steps {
            saved.created_steps.push(self.insert_step(step));
        }
        for change in &changes.credential_changes {
            self.apply_credential_change(change)?;
        }
        Ok(saved)
    }
}

/// Simulated writes of another worker and the version bumps observed
#[derive(Debug, Default)]
struct Interference {
    lose_next_release: bool,
    write_before_next_save: Option<Uuid>,
    version_updates: usize,
}

/// Store used by the unit and integration tests
#[derive(Debug, Default)]
pub struct InMemoryIssuerStore {
    state: Mutex<StoreState>,
    interference: Mutex<Interference>,
}

impl InMemoryIssuerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_credential(&self, credential: Credential) {
        self.state.lock().credentials.insert(credential.id, credential);
    }

    pub fn credential(&self, credential_id: Uuid) -> Option<Credential> {
        self.state.lock().credentials.get(&credential_id).cloned()
    }

    pub fn credentials(&self) -> Vec<Credential> {
        self.state.lock().credentials.values().cloned().collect()
    }

    pub fn insert_process(&self, process: Process) {
        self.state.lock().processes.insert(process.id, process);
    }

    pub fn process(&self, process_id: Uuid) -> Option<Process> {
        self.state.lock().processes.get(&process_id).cloned()
    }

    pub fn processes(&self) -> Vec<Process> {
        self.state.lock().processes.values().cloned().collect()
    }

    /// Add a step outside of a change set
    pub fn insert_step(
        &self,
        process_id: Uuid,
        step_type: ProcessStepTypeId,
        status: ProcessStepStatusId,
    ) -> ProcessStep {
        self.state.lock().insert_step(&NewProcessStep {
            process_id,
            step_type,
            status,
        })
    }

    pub fn steps(&self, process_id: Uuid) -> Vec<ProcessStep> {
        self.state
            .lock()
            .steps
            .iter()
            .filter(|step| step.process_id == process_id)
            .cloned()
            .collect()
    }

    /// The next `release_lock` finds the lock already taken over and releases nothing
    pub fn lose_next_lock_release(&self) {
        self.interference.lock().lose_next_release = true;
    }

    /// Regenerate the process version right before the next `save`, as a concurrent writer would
    pub fn write_concurrently_before_next_save(&self, process_id: Uuid) {
        self.interference.lock().write_before_next_save = Some(process_id);
    }

    /// Number of `update_version` calls so far
    pub fn version_updates(&self) -> usize {
        self.interference.lock().version_updates
    }

    /// Lock a process as another worker would
    pub fn lock_process(&self, process_id: Uuid, lock_expiry_date: DateTime<Utc>) {
        if let Some(process) = self.state.lock().processes.get_mut(&process_id) {
            process.lock_expiry_date = Some(lock_expiry_date);
            process.update_version();
        }
    }
}

#[async_trait]
impl ProcessStore for InMemoryIssuerStore {
    async fn save(&self, changes: ChangeSet) -> Result<SavedChanges> {
        let concurrent_write = self.interference.lock().write_before_next_save.take();
        let mut state = self.state.lock();
        if let Some(process) = concurrent_write.and_then(|id| state.processes.get_mut(&id)) {
            process.update_version();
        }
        let mut next = state.clone();
        let saved = next.apply(&changes)?;
        *state = next;
        Ok(saved)
    }

    async fn get_process(&self, process_id: Uuid) -> Result<Option<Process>> {
        Ok(self.process(process_id))
    }

    async fn get_active_processes(
        &self,
        process_types: &[ProcessTypeId],
        step_types: &[ProcessStepTypeId],
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Process>> {
        let state = self.state.lock();
        let mut active: Vec<Process> = state
            .processes
            .values()
            .filter(|process| {
                process_types.contains(&process.process_type_id)
                    && !process.is_locked(now)
                    && state.steps.iter().any(|step| {
                        step.process_id == process.id
                            && step.is_pending()
                            && step_types.contains(&step.step_type)
                    })
            })
            .cloned()
            .collect();
        active.sort_by_key(|process| process.id);
        active.truncate(limit);
        Ok(active)
    }

    async fn get_process_steps(&self, process_id: Uuid) -> Result<Vec<ProcessStep>> {
        let mut steps = self.steps(process_id);
        steps.sort_by_key(|step| step.date_created);
        Ok(steps)
    }

    async fn try_lock(
        &self,
        process: &mut Process,
        lock_expiry_date: DateTime<Utc>,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let current = state.processes.get_mut(&process.id).ok_or_else(|| {
            IssuerError::NotFound(format!("process {} does not exist", process.id))
        })?;

        if current.is_locked(now) {
            return Ok(false);
        }
        if current.version != process.version {
            return Err(IssuerError::OptimisticConflict(process.id));
        }
        current.lock_expiry_date = Some(lock_expiry_date);
        current.update_version();
        *process = current.clone();
        Ok(true)
    }

    async fn release_lock(&self, process: &mut Process) -> Result<bool> {
        if std::mem::take(&mut self.interference.lock().lose_next_release) {
            return Ok(false);
        }
        let mut state = self.state.lock();
        let Some(current) = state.processes.get_mut(&process.id) else {
            return Ok(false);
        };
        if current.version != process.version || current.lock_expiry_date.is_none() {
            return Ok(false);
        }
        current.release_lock();
        current.update_version();
        *process = current.clone();
        Ok(true)
    }

    async fn update_version(&self, process: &mut Process) -> Result<()> {
        self.interference.lock().version_updates += 1;
        let mut state = self.state.lock();
        if let Some(current) = state.processes.get_mut(&process.id) {
            current.update_version();
            process.version = current.version;
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialRepository for InMemoryIssuerStore {
    async fn get_credential(&self, credential_id: Uuid) -> Result<Option<Credential>> {
        Ok(self.credential(credential_id))
    }

    async fn get_credential_id_for_process(&self, process_id: Uuid) -> Result<Option<Uuid>> {
        Ok(self
            .state
            .lock()
            .credentials
            .values()
            .find(|credential| credential.process_id == Some(process_id))
            .map(|credential| credential.id))
    }

    async fn get_expiry_candidates(
        &self,
        thresholds: &ExpiryThresholds,
    ) -> Result<Vec<Credential>> {
        let mut candidates: Vec<Credential> = self
            .credentials()
            .into_iter()
            .filter(|credential| thresholds.evaluate(credential).is_some())
            .collect();
        candidates.sort_by_key(|credential| credential.date_created);
        Ok(candidates)
    }

    async fn get_credentials_to_reissue(
        &self,
        expires_before: DateTime<Utc>,
    ) -> Result<Vec<Credential>> {
        Ok(self
            .credentials()
            .into_iter()
            .filter(|credential| {
                credential.status == CredentialStatus::Active
                    && credential.reissued_credential_id.is_none()
                    && credential.expiry_date.is_some_and(|e| e < expires_before)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CredentialTypeId;

    fn credential(status: CredentialStatus) -> Credential {
        Credential::new(
            "BPNL00000001TEST",
            "BPNL000000ISSUER",
            CredentialTypeId::Membership,
            status,
            Uuid::new_v4().to_string(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_reissuance_links_both_credentials() {
        let store = InMemoryIssuerStore::new();
        let old = credential(CredentialStatus::Active);
        let new = credential(CredentialStatus::Pending);
        store.insert_credential(old.clone());
        store.insert_credential(new.clone());

        let mut changes = ChangeSet::new();
        changes.change_credential(CredentialChange::SetReissuedCredential {
            credential_id: old.id,
            reissued_credential_id: new.id,
        });
        store.save(changes).await.unwrap();

        assert_eq!(store.credential(old.id).unwrap().reissued_credential_id, Some(new.id));
        assert_eq!(store.credential(new.id).unwrap().superseded_credential_id, Some(old.id));
    }

    #[tokio::test]
    async fn test_failed_change_set_leaves_state_untouched() {
        let store = InMemoryIssuerStore::new();
        let process = Process::new(ProcessTypeId::DeclineCredential);
        store.insert_process(process.clone());
        let stored = credential(CredentialStatus::Active);
        store.insert_credential(stored.clone());

        let mut changes = ChangeSet::new();
        changes
            .check_version(&process)
            .add_step(NewProcessStep::todo(process.id, ProcessStepTypeId::RevokeCredential))
            .change_credential(CredentialChange::SetCredentialStatus {
                credential_id: stored.id,
                expected: CredentialStatus::Pending,
                status: CredentialStatus::Revoked,
            });
        assert!(store.save(changes).await.is_err());

        assert_eq!(store.process(process.id).unwrap().version, process.version);
        assert!(store.steps(process.id).is_empty());
        assert_eq!(store.credential(stored.id).unwrap().status, CredentialStatus::Active);
    }

    #[tokio::test]
    async fn test_concurrent_write_rejects_next_save() {
        let store = InMemoryIssuerStore::new();
        let process = Process::new(ProcessTypeId::CreateCredential);
        store.insert_process(process.clone());
        store.write_concurrently_before_next_save(process.id);

        let mut changes = ChangeSet::new();
        changes.check_version(&process);
        let err = store.save(changes).await.unwrap_err();

        assert_eq!(err, IssuerError::OptimisticConflict(process.id));
        assert_ne!(store.process(process.id).unwrap().version, process.version);
    }
}
