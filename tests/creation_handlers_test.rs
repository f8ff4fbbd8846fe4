//! Step handler tests for the credential creation family.

mod common;

use common::{active_document, execute, setup};
use uuid::Uuid;

use issuer_core::database::CredentialChange;
use issuer_core::error::IssuerError;
use issuer_core::models::{CredentialStatus, CredentialTypeId, DocumentStatus};
use issuer_core::orchestration::{CancellationToken, ProcessTypeExecutor, StepOutcome};
use issuer_core::services::IssuerResponseStatus;
use issuer_core::state_machine::{ProcessStepStatusId, ProcessStepTypeId};
use issuer_core::test_helpers::{WalletCall, TEST_HOLDER_BPN, TEST_ISSUER_BPN};

#[tokio::test]
async fn test_create_signed_credential_records_external_id() {
    let setup = setup();
    let (credential, _) = setup.seed_creation(setup.credential(CredentialTypeId::BusinessPartnerNumber));
    let executor = setup.creation_executor();

    let outcome = execute(&executor, credential.id, ProcessStepTypeId::CreateSignedCredential).await;

    assert_eq!(outcome.status, ProcessStepStatusId::Done);
    assert_eq!(
        outcome.next_step_types,
        Some(vec![ProcessStepTypeId::SaveCredentialDocument])
    );
    assert!(matches!(
        outcome.credential_changes.as_slice(),
        [CredentialChange::SetExternalCredentialId { credential_id, .. }] if *credential_id == credential.id
    ));
    assert_eq!(
        setup.wallet.calls(),
        vec![WalletCall::CreateSignedCredential(
            credential.schema.clone().unwrap()
        )]
    );
}

#[tokio::test]
async fn test_create_signed_credential_continues_with_reissued_revocation() {
    let setup = setup().with_decline_revocation();
    let superseded = setup.seed_issued(CredentialTypeId::BusinessPartnerNumber);
    let mut credential = setup.credential(CredentialTypeId::BusinessPartnerNumber);
    credential.superseded_credential_id = Some(superseded.id);
    let (credential, _) = setup.seed_creation(credential);

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::CreateSignedCredential,
    )
    .await;

    assert_eq!(
        outcome.next_step_types,
        Some(vec![ProcessStepTypeId::RevokeReissuedCredential])
    );
}

#[tokio::test]
async fn test_recoverable_service_error_keeps_step_pending() {
    let setup = setup();
    let (credential, _) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));
    setup
        .wallet
        .fail_with(IssuerError::recoverable_service("wallet", "timeout"));

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::CreateSignedCredential,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Todo);
    assert!(outcome.modified);
    assert_eq!(outcome.next_step_types, None);
    assert_eq!(outcome.message.as_deref(), Some("wallet service error: timeout"));
}

#[tokio::test]
async fn test_non_recoverable_error_fails_step_with_error_text() {
    let setup = setup();
    let (credential, _) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));
    let error = IssuerError::service("wallet", "schema rejected");
    setup.wallet.fail_with(error.clone());

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::CreateSignedCredential,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Failed);
    assert_eq!(outcome.message, Some(error.to_string()));
    assert_eq!(outcome.next_step_types, None);
}

#[tokio::test]
async fn test_missing_credential_fails_step() {
    let setup = setup();
    let missing = Uuid::new_v4();

    let outcome = execute(
        &setup.creation_executor(),
        missing,
        ProcessStepTypeId::CreateSignedCredential,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Failed);
    assert_eq!(
        outcome.message,
        Some(format!("Credential {missing} does not exist"))
    );
}

#[tokio::test]
async fn test_save_document_requires_external_id() {
    let setup = setup();
    let (credential, _) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::SaveCredentialDocument,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Failed);
    assert_eq!(
        outcome.message.as_deref(),
        Some("ExternalCredentialId must be set here")
    );
}

#[tokio::test]
async fn test_save_document_stores_signed_credential() {
    let setup = setup();
    let mut credential = setup.credential(CredentialTypeId::Membership);
    let external_id = Uuid::new_v4();
    credential.external_credential_id = Some(external_id);
    let (credential, _) = setup.seed_creation(credential);

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::SaveCredentialDocument,
    )
    .await;

    assert_eq!(
        outcome.next_step_types,
        Some(vec![ProcessStepTypeId::OfferCredentialToHolder])
    );
    match outcome.credential_changes.as_slice() {
        [CredentialChange::StoreSignedCredential { document, .. }] => {
            assert_eq!(document.name, "MEMBERSHIP.json");
            assert_eq!(document.status, DocumentStatus::Active);
        }
        other => panic!("unexpected changes {other:?}"),
    }
    assert_eq!(setup.wallet.calls(), vec![WalletCall::GetCredential(external_id)]);
}

#[tokio::test]
async fn test_offer_is_skipped_when_holder_is_issuer() {
    let setup = setup();

    for callback_url in [Some("https://requester.example.com/cb".to_string()), None] {
        let mut credential = setup.credential(CredentialTypeId::Membership);
        credential.bpnl = TEST_ISSUER_BPN.to_string();
        credential.callback_url = callback_url.clone();
        let (credential, _) = setup.seed_creation(credential);

        let outcome = execute(
            &setup.creation_executor(),
            credential.id,
            ProcessStepTypeId::OfferCredentialToHolder,
        )
        .await;

        assert_eq!(outcome.status, ProcessStepStatusId::Skipped);
        assert_eq!(
            outcome.message.as_deref(),
            Some("ProcessStep was skipped because the holder is the issuer")
        );
        let expected = if callback_url.is_some() {
            vec![ProcessStepTypeId::TriggerCallback]
        } else {
            Vec::new()
        };
        assert_eq!(outcome.next_step_types, Some(expected));
    }
    assert!(setup.wallet.calls().is_empty());
}

#[tokio::test]
async fn test_offer_delivers_to_holder_wallet() {
    let setup = setup();
    let mut credential = setup.credential(CredentialTypeId::BusinessPartnerNumber);
    let external_id = Uuid::new_v4();
    credential.external_credential_id = Some(external_id);
    credential.credential = Some("{\"vc\":1}".to_string());
    let (credential, _) = setup.seed_creation(credential);

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::OfferCredentialToHolder,
    )
    .await;

    assert_eq!(outcome, StepOutcome::done(Some(Vec::new())));
    assert_eq!(
        setup.wallet.calls(),
        vec![WalletCall::OfferCredentialToHolder {
            external_credential_id: external_id,
            credential_json: "{\"vc\":1}".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_offer_requires_signed_credential() {
    let setup = setup();
    let mut credential = setup.credential(CredentialTypeId::BusinessPartnerNumber);
    credential.external_credential_id = Some(Uuid::new_v4());
    let (credential, _) = setup.seed_creation(credential);

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::OfferCredentialToHolder,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Failed);
    assert_eq!(outcome.message.as_deref(), Some("Credential must be set here"));
}

#[tokio::test]
async fn test_revoke_superseded_without_superseded_id_is_skipped() {
    let setup = setup();
    let (credential, _) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::RevokeSupersededCredential,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Skipped);
    assert!(!outcome.modified);
    assert_eq!(outcome.next_step_types, None);
}

#[tokio::test]
async fn test_revoke_superseded_already_revoked_is_skipped() {
    let setup = setup();
    let mut superseded = setup.seed_issued(CredentialTypeId::Membership);
    superseded.status = CredentialStatus::Revoked;
    setup.store.insert_credential(superseded.clone());
    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.superseded_credential_id = Some(superseded.id);
    let (credential, _) = setup.seed_creation(credential);

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::RevokeSupersededCredential,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Skipped);
    assert!(setup.wallet.revoked().is_empty());
}

#[tokio::test]
async fn test_revoke_superseded_revokes_and_deactivates_documents() {
    let setup = setup();
    let mut superseded = setup.seed_issued(CredentialTypeId::Membership);
    superseded.documents.push(active_document("MEMBERSHIP.json"));
    setup.store.insert_credential(superseded.clone());
    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.superseded_credential_id = Some(superseded.id);
    credential.callback_url = Some("https://requester.example.com/cb".to_string());
    let (credential, _) = setup.seed_creation(credential);

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::RevokeSupersededCredential,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Done);
    assert_eq!(
        outcome.next_step_types,
        Some(vec![ProcessStepTypeId::TriggerCallback])
    );
    assert_eq!(
        setup.wallet.revoked(),
        vec![superseded.external_credential_id.unwrap()]
    );
    assert_eq!(
        outcome.credential_changes,
        vec![
            CredentialChange::SetDocumentStatus {
                credential_id: superseded.id,
                document_id: superseded.documents[0].id,
                expected: DocumentStatus::Active,
                status: DocumentStatus::Inactive,
            },
            CredentialChange::SetCredentialStatus {
                credential_id: superseded.id,
                expected: CredentialStatus::Active,
                status: CredentialStatus::Revoked,
            },
        ]
    );
}

#[tokio::test]
async fn test_trigger_callback_requires_url() {
    let setup = setup();
    let (credential, _) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::TriggerCallback,
    )
    .await;

    assert_eq!(outcome.status, ProcessStepStatusId::Failed);
    assert_eq!(outcome.message.as_deref(), Some("CallbackUrl must be set"));
}

#[tokio::test]
async fn test_trigger_callback_posts_success() {
    let setup = setup();
    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.callback_url = Some("https://requester.example.com/cb".to_string());
    let (credential, _) = setup.seed_creation(credential);

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::TriggerCallback,
    )
    .await;

    assert_eq!(outcome, StepOutcome::done(None));
    let calls = setup.callbacks.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "https://requester.example.com/cb");
    assert_eq!(calls[0].1.bpn, TEST_HOLDER_BPN);
    assert_eq!(calls[0].1.status, IssuerResponseStatus::Successful);
    assert_eq!(
        calls[0].1.message.as_deref(),
        Some("Successfully created Credential")
    );
}

#[tokio::test]
async fn test_unknown_step_type_is_a_no_op() {
    let setup = setup();
    let (credential, _) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));

    let outcome = execute(
        &setup.creation_executor(),
        credential.id,
        ProcessStepTypeId::TriggerMail,
    )
    .await;

    assert_eq!(outcome, StepOutcome::unchanged());
    assert!(!outcome.modified);
}

#[tokio::test]
async fn test_cancelled_step_returns_cancelled() {
    let setup = setup();
    let (credential, _) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = setup
        .creation_executor()
        .execute_step(
            credential.id,
            ProcessStepTypeId::CreateSignedCredential,
            &[ProcessStepTypeId::CreateSignedCredential],
            &cancel,
        )
        .await;

    assert_eq!(result, Err(IssuerError::Cancelled));
    assert!(setup.wallet.calls().is_empty());
}

#[tokio::test]
async fn test_initialize_requires_linked_credential() {
    let setup = setup();
    let process_id = Uuid::new_v4();

    let result = setup
        .creation_executor()
        .initialize(process_id, &[ProcessStepTypeId::CreateSignedCredential])
        .await;

    assert_eq!(
        result,
        Err(IssuerError::NotFound(format!(
            "process {process_id} does not exist or is not associated with an credential"
        )))
    );
}

#[tokio::test]
async fn test_executor_reports_routes_and_locks() {
    let setup = setup();
    let executor = setup.creation_executor();

    assert!(executor.is_executable_step_type(ProcessStepTypeId::RevokeReissuedCredential));
    assert!(!executor.is_executable_step_type(ProcessStepTypeId::RevokeCredential));
    assert!(executor.is_lock_required(ProcessStepTypeId::RevokeSupersededCredential));
    assert!(executor.is_lock_required(ProcessStepTypeId::RevokeReissuedCredential));
    assert!(!executor.is_lock_required(ProcessStepTypeId::CreateSignedCredential));
    assert_eq!(executor.executable_step_types().len(), 6);
}
