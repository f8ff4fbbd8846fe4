//! Process worker tests against the in-memory store.

mod common;

use chrono::{Duration, Utc};
use common::{active_document, setup};
use std::time::Duration as StdDuration;

use issuer_core::error::IssuerError;
use issuer_core::models::{CredentialStatus, CredentialTypeId, NotificationTypeId, Process};
use issuer_core::orchestration::CancellationToken;
use issuer_core::state_machine::{ProcessStepStatusId, ProcessStepTypeId, ProcessTypeId};
use issuer_core::test_helpers::{WalletCall, TEST_HOLDER_BPN};

use ProcessStepStatusId::{Done, Duplicate, Failed, Todo};
use ProcessStepTypeId::*;

#[tokio::test]
async fn test_creation_chain_runs_to_completion_in_one_activation() {
    let setup = setup();
    let mut credential = setup.credential(CredentialTypeId::BusinessPartnerNumber);
    credential.callback_url = Some("https://requester.example.com/cb".to_string());
    let (credential, process) = setup.seed_creation(credential);
    let worker = setup.worker().unwrap();

    let found = worker.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(found, 1);
    assert_eq!(
        setup.step_statuses(process.id),
        vec![
            (CreateSignedCredential, Done),
            (SaveCredentialDocument, Done),
            (OfferCredentialToHolder, Done),
            (TriggerCallback, Done),
        ]
    );
    let stored = setup.store.credential(credential.id).unwrap();
    assert!(stored.external_credential_id.is_some());
    assert!(stored.credential.is_some());
    assert_eq!(stored.documents.len(), 1);

    let callbacks = setup.callbacks.calls();
    assert_eq!(callbacks.len(), 1);
    assert_eq!(callbacks[0].1.bpn, TEST_HOLDER_BPN);

    assert_eq!(worker.run_once(&CancellationToken::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_inline_superseded_revocation_takes_and_releases_lock() {
    let setup = setup();
    let mut superseded = setup.seed_issued(CredentialTypeId::Membership);
    superseded.documents.push(active_document("MEMBERSHIP.json"));
    setup.store.insert_credential(superseded.clone());
    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.superseded_credential_id = Some(superseded.id);
    credential.callback_url = Some("https://requester.example.com/cb".to_string());
    let (_, process) = setup.seed_creation(credential);

    setup
        .worker()
        .unwrap()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        setup.step_statuses(process.id),
        vec![
            (CreateSignedCredential, Done),
            (SaveCredentialDocument, Done),
            (OfferCredentialToHolder, Done),
            (RevokeSupersededCredential, Done),
            (TriggerCallback, Done),
        ]
    );
    let revoked = setup.store.credential(superseded.id).unwrap();
    assert_eq!(revoked.status, CredentialStatus::Revoked);
    assert!(revoked
        .documents
        .iter()
        .all(|document| document.status == issuer_core::models::DocumentStatus::Inactive));
    assert_eq!(
        setup.wallet.revoked(),
        vec![superseded.external_credential_id.unwrap()]
    );

    let stored = setup.store.process(process.id).unwrap();
    assert_eq!(stored.lock_expiry_date, None);
    assert_ne!(stored.version, process.version);
}

#[tokio::test]
async fn test_reissued_credential_is_revoked_through_decline_process() {
    let setup = setup().with_decline_revocation();
    let mut superseded = setup.seed_issued(CredentialTypeId::Membership);
    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.superseded_credential_id = Some(superseded.id);
    superseded.reissued_credential_id = Some(credential.id);
    setup.store.insert_credential(superseded.clone());
    let (_, process) = setup.seed_creation(credential);
    let worker = setup.worker().unwrap();

    assert_eq!(worker.run_once(&CancellationToken::new()).await.unwrap(), 1);

    assert_eq!(
        setup.step_statuses(process.id),
        vec![
            (CreateSignedCredential, Done),
            (RevokeReissuedCredential, Done),
            (SaveCredentialDocument, Done),
            (OfferCredentialToHolder, Done),
        ]
    );
    let decline_process_id = setup
        .store
        .credential(superseded.id)
        .unwrap()
        .process_id
        .unwrap();
    assert_eq!(
        setup.store.process(decline_process_id).unwrap().process_type_id,
        ProcessTypeId::DeclineCredential
    );
    assert_eq!(
        setup.step_statuses(decline_process_id),
        vec![(RevokeCredential, Todo)]
    );
    assert!(setup.wallet.revoked().is_empty());
    assert_eq!(setup.store.process(process.id).unwrap().lock_expiry_date, None);

    assert_eq!(worker.run_once(&CancellationToken::new()).await.unwrap(), 1);

    assert_eq!(
        setup.step_statuses(decline_process_id),
        vec![
            (RevokeCredential, Done),
            (TriggerNotification, Done),
            (TriggerMail, Done),
        ]
    );
    assert_eq!(
        setup.wallet.revoked(),
        vec![superseded.external_credential_id.unwrap()]
    );
    assert_eq!(
        setup.store.credential(superseded.id).unwrap().status,
        CredentialStatus::Revoked
    );
    let notifications = setup.notifications.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].category, NotificationTypeId::CredentialRenewal);
    let mails = setup.notifications.mails();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].template, "CredentialRenewal");
}

#[tokio::test]
async fn test_duplicate_pending_steps_collapse() {
    let setup = setup();
    let (_, process) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));
    setup
        .store
        .insert_step(process.id, CreateSignedCredential, Todo);

    setup
        .worker()
        .unwrap()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        setup.step_statuses(process.id),
        vec![
            (CreateSignedCredential, Done),
            (CreateSignedCredential, Duplicate),
            (SaveCredentialDocument, Done),
            (OfferCredentialToHolder, Done),
        ]
    );
    let creations = setup
        .wallet
        .calls()
        .into_iter()
        .filter(|call| matches!(call, WalletCall::CreateSignedCredential(_)))
        .count();
    assert_eq!(creations, 1);
}

#[tokio::test]
async fn test_locked_process_is_not_polled() {
    let setup = setup();
    let (_, process) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));
    setup
        .store
        .lock_process(process.id, Utc::now() + Duration::hours(1));

    let found = setup
        .worker()
        .unwrap()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(found, 0);
    assert_eq!(
        setup.step_statuses(process.id),
        vec![(CreateSignedCredential, Todo)]
    );
}

#[tokio::test]
async fn test_expired_lock_does_not_block_polling() {
    let setup = setup();
    let (_, process) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));
    setup
        .store
        .lock_process(process.id, Utc::now() - Duration::minutes(1));

    let found = setup
        .worker()
        .unwrap()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(found, 1);
    assert_eq!(setup.step_statuses(process.id)[0], (CreateSignedCredential, Done));
}

#[tokio::test]
async fn test_recoverable_failure_is_retried_on_next_poll() {
    let setup = setup();
    let (_, process) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));
    let worker = setup.worker().unwrap();
    setup
        .wallet
        .fail_with(IssuerError::recoverable_service("wallet", "timeout"));

    worker.run_once(&CancellationToken::new()).await.unwrap();

    let steps = setup.store.steps(process.id);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, Todo);
    assert_eq!(steps[0].message.as_deref(), Some("wallet service error: timeout"));

    setup.wallet.succeed();
    assert_eq!(worker.run_once(&CancellationToken::new()).await.unwrap(), 1);

    assert_eq!(
        setup.step_statuses(process.id),
        vec![
            (CreateSignedCredential, Done),
            (SaveCredentialDocument, Done),
            (OfferCredentialToHolder, Done),
        ]
    );
}

#[tokio::test]
async fn test_non_recoverable_failure_finalises_step() {
    let setup = setup();
    let (_, process) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));
    let worker = setup.worker().unwrap();
    setup
        .wallet
        .fail_with(IssuerError::service("wallet", "schema rejected"));

    worker.run_once(&CancellationToken::new()).await.unwrap();

    let steps = setup.store.steps(process.id);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, Failed);
    assert_eq!(
        steps[0].message.as_deref(),
        Some("wallet service error: schema rejected")
    );
    assert_eq!(worker.run_once(&CancellationToken::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_initialize_failure_fails_pending_steps() {
    let setup = setup();
    let process = Process::new(ProcessTypeId::CreateCredential);
    setup.store.insert_process(process.clone());
    setup
        .store
        .insert_step(process.id, CreateSignedCredential, Todo);
    setup
        .store
        .insert_step(process.id, CreateSignedCredential, Todo);

    setup
        .worker()
        .unwrap()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        setup.step_statuses(process.id),
        vec![
            (CreateSignedCredential, Failed),
            (CreateSignedCredential, Duplicate),
        ]
    );
    let mut steps = setup.store.steps(process.id);
    steps.sort_by_key(|step| step.date_created);
    assert_eq!(
        steps[0].message,
        Some(format!(
            "process {} does not exist or is not associated with an credential",
            process.id
        ))
    );
}

#[tokio::test]
async fn test_cancelled_poll_persists_nothing() {
    let setup = setup();
    let (_, process) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let found = setup.worker().unwrap().run_once(&cancel).await.unwrap();

    assert_eq!(found, 1);
    assert_eq!(
        setup.step_statuses(process.id),
        vec![(CreateSignedCredential, Todo)]
    );
    assert_eq!(setup.store.process(process.id).unwrap().version, process.version);
    assert!(setup.wallet.calls().is_empty());
}

#[tokio::test]
async fn test_run_loop_stops_when_cancelled() {
    let setup = setup();
    let (_, process) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));
    let worker = setup.worker().unwrap();
    let cancel = CancellationToken::new();

    let stop = async {
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        cancel.cancel();
    };
    tokio::time::timeout(StdDuration::from_secs(5), async {
        tokio::join!(worker.run(cancel.clone()), stop)
    })
    .await
    .expect("worker should stop after cancellation");

    assert_eq!(
        setup.step_statuses(process.id).last(),
        Some(&(OfferCredentialToHolder, Done))
    );
}

#[tokio::test]
async fn test_activation_defers_lock_steps_while_process_is_locked() {
    let setup = setup();
    let superseded = setup.seed_issued(CredentialTypeId::Membership);
    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.superseded_credential_id = Some(superseded.id);
    let (_, process, _) = setup.seed_process(
        credential,
        ProcessTypeId::CreateCredential,
        RevokeSupersededCredential,
    );
    setup
        .store
        .lock_process(process.id, Utc::now() + Duration::minutes(5));
    let locked = setup.store.process(process.id).unwrap();

    let summary = setup
        .worker()
        .unwrap()
        .activate(locked.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.deferred);
    assert!(summary.executed.is_empty());
    assert_eq!(
        setup.step_statuses(process.id),
        vec![(RevokeSupersededCredential, Todo)]
    );
    assert_eq!(setup.store.process(process.id).unwrap(), locked);
    assert!(setup.wallet.revoked().is_empty());
}

#[tokio::test]
async fn test_lock_taken_after_poll_defers_activation() {
    let setup = setup();
    let superseded = setup.seed_issued(CredentialTypeId::Membership);
    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.superseded_credential_id = Some(superseded.id);
    let (_, process, _) = setup.seed_process(
        credential,
        ProcessTypeId::CreateCredential,
        RevokeSupersededCredential,
    );
    let polled = setup.store.process(process.id).unwrap();
    setup
        .store
        .lock_process(process.id, Utc::now() + Duration::minutes(5));

    let summary = setup
        .worker()
        .unwrap()
        .activate(polled, &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.deferred);
    assert!(summary.executed.is_empty());
    assert_eq!(
        setup.step_statuses(process.id),
        vec![(RevokeSupersededCredential, Todo)]
    );
    assert!(setup.wallet.revoked().is_empty());
}

#[tokio::test]
async fn test_lost_lock_release_bumps_version() {
    let setup = setup();
    let superseded = setup.seed_issued(CredentialTypeId::Membership);
    let mut credential = setup.credential(CredentialTypeId::Membership);
    credential.superseded_credential_id = Some(superseded.id);
    let (_, process, _) = setup.seed_process(
        credential,
        ProcessTypeId::CreateCredential,
        RevokeSupersededCredential,
    );
    setup.store.lose_next_lock_release();

    let summary = setup
        .worker()
        .unwrap()
        .activate(process.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.executed, vec![(RevokeSupersededCredential, Done)]);
    assert_eq!(setup.store.version_updates(), 1);
    let stored = setup.store.process(process.id).unwrap();
    assert_ne!(stored.version, process.version);
    assert!(stored.lock_expiry_date.is_some());
}

#[tokio::test]
async fn test_concurrent_write_discards_step_outcome() {
    let setup = setup();
    let (credential, process) = setup.seed_creation(setup.credential(CredentialTypeId::Membership));
    setup.store.write_concurrently_before_next_save(process.id);

    let err = setup
        .worker()
        .unwrap()
        .activate(process.clone(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, IssuerError::OptimisticConflict(process.id));
    assert_eq!(
        setup.step_statuses(process.id),
        vec![(CreateSignedCredential, Todo)]
    );
    assert_eq!(
        setup.store.credential(credential.id).unwrap().external_credential_id,
        None
    );
    assert_ne!(setup.store.process(process.id).unwrap().version, process.version);
    assert_eq!(setup.store.version_updates(), 0);
}
