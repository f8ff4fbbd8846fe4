//! Tests for revoking a reissued credential's predecessor through a decline process.

mod common;

use common::{execute, setup};
use uuid::Uuid;

use issuer_core::database::CredentialChange;
use issuer_core::models::{CredentialTypeId, Process};
use issuer_core::state_machine::{ProcessStepStatusId, ProcessStepTypeId, ProcessTypeId};

#[tokio::test]
async fn test_revoke_reissued_opens_decline_process_for_superseded() {
    let setup = setup().with_decline_revocation();
    let superseded = setup.seed_issued(CredentialTypeId::Membership);
    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.superseded_credential_id = Some(superseded.id);
    let (credential, _) = setup.seed_creation(credential);

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::RevokeReissuedCredential,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Done);
    assert_eq!(
        outcome.next_step_types,
        Some(vec![ProcessStepTypeId::SaveCredentialDocument])
    );
    assert_eq!(outcome.new_processes.len(), 1);
    let decline = &outcome.new_processes[0];
    assert_eq!(decline.process.process_type_id, ProcessTypeId::DeclineCredential);
    assert_eq!(decline.step_types, vec![ProcessStepTypeId::RevokeCredential]);
    assert_eq!(
        outcome.credential_changes,
        vec![CredentialChange::LinkProcess {
            credential_id: superseded.id,
            expected: None,
            process_id: decline.process.id,
        }]
    );
    assert!(setup.wallet.revoked().is_empty());
}

#[tokio::test]
async fn test_revoke_reissued_allows_superseded_with_finished_process() {
    let setup = setup().with_decline_revocation();
    let mut superseded = setup.seed_issued(CredentialTypeId::Membership);
    let old_process = Process::new(ProcessTypeId::CreateCredential);
    setup.store.insert_process(old_process.clone());
    setup.store.insert_step(
        old_process.id,
        ProcessStepTypeId::TriggerCallback,
        ProcessStepStatusId::Done,
    );
    superseded.process_id = Some(old_process.id);
    setup.store.insert_credential(superseded.clone());

    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.superseded_credential_id = Some(superseded.id);
    let (credential, _) = setup.seed_creation(credential);

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::RevokeReissuedCredential,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Done);
    assert!(matches!(
        outcome.credential_changes.as_slice(),
        [CredentialChange::LinkProcess { expected: Some(id), .. }] if *id == old_process.id
    ));
}

#[tokio::test]
async fn test_revoke_reissued_rejects_superseded_attached_to_active_process() {
    let setup = setup().with_decline_revocation();
    let superseded = setup.seed_issued(CredentialTypeId::Membership);
    let (superseded, active_process, _) = setup.seed_process(
        superseded,
        ProcessTypeId::DeclineCredential,
        ProcessStepTypeId::RevokeCredential,
    );
    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.superseded_credential_id = Some(superseded.id);
    let (credential, _) = setup.seed_creation(credential);

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::RevokeReissuedCredential,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Failed);
    assert_eq!(
        outcome.message,
        Some(format!(
            "credential {} is already attached to active process {}",
            superseded.id, active_process.id
        ))
    );
    assert!(outcome.new_processes.is_empty());
}

#[tokio::test]
async fn test_revoke_reissued_requires_superseded_id() {
    let setup = setup().with_decline_revocation();
    let (credential, _) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::RevokeReissuedCredential,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Failed);
    assert_eq!(
        outcome.message.as_deref(),
        Some("Id of the credential to revoke should always be set here")
    );
}

#[tokio::test]
async fn test_revoke_reissued_with_unknown_superseded_is_conflict() {
    let setup = setup().with_decline_revocation();
    let missing = Uuid::new_v4();
    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.superseded_credential_id = Some(missing);
    let (credential, _) = setup.seed_creation(credential);

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::RevokeReissuedCredential,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Failed);
    assert_eq!(
        outcome.message,
        Some(format!("Credential {missing} does not exist"))
    );
    assert!(outcome.new_processes.is_empty());
}
