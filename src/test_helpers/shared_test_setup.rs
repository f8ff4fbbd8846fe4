// Shared test setup for the process engine.
//
// Wires the in-memory store and the recording fakes into step contexts,
// executors and workers so tests only describe the data they need.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::fakes::{RecordingCallbacks, RecordingIssuer, RecordingNotifications, RecordingWallet};
use super::in_memory_store::InMemoryIssuerStore;
use crate::config::{CredentialSettings, ExpirySettings, ReissuanceSettings, WorkerConfig};
use crate::credentials::{ExpiryCheckService, ReissuanceService};
use crate::error::Result;
use crate::models::{Credential, CredentialStatus, CredentialTypeId, Process, ProcessStep};
use crate::orchestration::{
    CredentialProcessExecutor, ProcessTypeExecutor, ProcessWorker, RetriggerService, StepContext,
};
use crate::state_machine::{ProcessStepStatusId, ProcessStepTypeId, ProcessTypeId};

pub const TEST_ISSUER_BPN: &str = "BPNL00000003CRHK";
pub const TEST_HOLDER_BPN: &str = "BPNL00000001ACME";
pub const TEST_HOLDER_DID: &str = "did:web:example.com:ACME";

pub struct SharedTestSetup {
    pub store: Arc<InMemoryIssuerStore>,
    pub wallet: Arc<RecordingWallet>,
    pub notifications: Arc<RecordingNotifications>,
    pub callbacks: Arc<RecordingCallbacks>,
    pub issuer: Arc<RecordingIssuer>,
    pub settings: CredentialSettings,
    pub requester_id: Uuid,
}

impl Default for SharedTestSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedTestSetup {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryIssuerStore::new()),
            wallet: Arc::new(RecordingWallet::new()),
            notifications: Arc::new(RecordingNotifications::new()),
            callbacks: Arc::new(RecordingCallbacks::new()),
            issuer: Arc::new(RecordingIssuer::new()),
            settings: CredentialSettings {
                issuer_bpn: TEST_ISSUER_BPN.to_string(),
                revoke_reissued_via_decline_process: false,
            },
            requester_id: Uuid::new_v4(),
        }
    }

    /// Revoke superseded credentials through a decline process
    pub fn with_decline_revocation(mut self) -> Self {
        self.settings.revoke_reissued_via_decline_process = true;
        self
    }

    pub fn step_context(&self) -> Arc<StepContext> {
        Arc::new(StepContext {
            credentials: self.store.clone(),
            processes: self.store.clone(),
            wallet: self.wallet.clone(),
            notifications: self.notifications.clone(),
            callbacks: self.callbacks.clone(),
            settings: self.settings.clone(),
        })
    }

    pub fn creation_executor(&self) -> CredentialProcessExecutor {
        CredentialProcessExecutor::creation(self.step_context())
    }

    pub fn decline_executor(&self) -> CredentialProcessExecutor {
        CredentialProcessExecutor::decline(self.step_context())
    }

    pub fn worker(&self) -> Result<ProcessWorker> {
        self.worker_with_config(WorkerConfig {
            poll_interval_ms: 10,
            lock_duration_seconds: 60,
            max_concurrent_processes: 4,
            batch_size: 50,
        })
    }

    pub fn worker_with_config(&self, config: WorkerConfig) -> Result<ProcessWorker> {
        let context = self.step_context();
        let executors: Vec<Arc<dyn ProcessTypeExecutor>> = vec![
            Arc::new(CredentialProcessExecutor::creation(context.clone())),
            Arc::new(CredentialProcessExecutor::decline(context)),
        ];
        ProcessWorker::new(self.store.clone(), executors, config)
    }

    pub fn retrigger_service(&self) -> Result<RetriggerService> {
        RetriggerService::new(self.store.clone())
    }

    pub fn expiry_check_service(&self) -> ExpiryCheckService {
        ExpiryCheckService::new(
            self.store.clone(),
            self.store.clone(),
            self.notifications.clone(),
            ExpirySettings::default(),
        )
    }

    pub fn reissuance_service(&self) -> ReissuanceService {
        ReissuanceService::new(
            self.store.clone(),
            self.issuer.clone(),
            self.store.clone(),
            ReissuanceSettings::default(),
        )
    }

    /// A pending credential requested by this setup's requester, not yet stored
    pub fn credential(&self, type_id: CredentialTypeId) -> Credential {
        let mut credential = Credential::new(
            TEST_HOLDER_BPN,
            TEST_ISSUER_BPN,
            type_id,
            CredentialStatus::Pending,
            self.requester_id.to_string(),
            Utc::now() - Duration::days(1),
        );
        credential.schema = Some(json!({
            "type": ["VerifiableCredential", type_id.label().unwrap_or("Credential")],
            "issuer": format!("did:web:issuer.example.com:{TEST_ISSUER_BPN}"),
            "credentialSubject": {
                "id": TEST_HOLDER_DID,
                "holderIdentifier": TEST_HOLDER_BPN,
                "memberOf": "Catena-X"
            }
        }));
        credential
    }

    /// Store `credential` with a process of `process_type` holding one `TODO` step
    pub fn seed_process(
        &self,
        mut credential: Credential,
        process_type: ProcessTypeId,
        step_type: ProcessStepTypeId,
    ) -> (Credential, Process, ProcessStep) {
        let process = Process::new(process_type);
        credential.process_id = Some(process.id);
        self.store.insert_process(process.clone());
        let step = self
            .store
            .insert_step(process.id, step_type, ProcessStepStatusId::Todo);
        self.store.insert_credential(credential.clone());
        (credential, process, step)
    }

    /// A freshly requested credential at the start of its creation process
    pub fn seed_creation(&self, credential: Credential) -> (Credential, Process) {
        let (credential, process, _) = self.seed_process(
            credential,
            ProcessTypeId::CreateCredential,
            ProcessStepTypeId::CreateSignedCredential,
        );
        (credential, process)
    }

    /// An active credential issued earlier, with an external id and no process
    pub fn seed_issued(&self, type_id: CredentialTypeId) -> Credential {
        let mut credential = self.credential(type_id);
        credential.status = CredentialStatus::Active;
        credential.external_credential_id = Some(Uuid::new_v4());
        credential.credential = Some("{\"signed\":true}".to_string());
        self.store.insert_credential(credential.clone());
        credential
    }

    /// Step statuses of a process by type, in creation order
    pub fn step_statuses(&self, process_id: Uuid) -> Vec<(ProcessStepTypeId, ProcessStepStatusId)> {
        let mut steps = self.store.steps(process_id);
        steps.sort_by_key(|step| step.date_created);
        steps
            .into_iter()
            .map(|step| (step.step_type, step.status))
            .collect()
    }
}
