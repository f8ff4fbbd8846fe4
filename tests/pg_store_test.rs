//! PostgreSQL store tests.
//!
//! Each test gets a fresh database with the `migrations/` schema applied;
//! run with `DATABASE_URL` set and `cargo test -- --ignored`.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use issuer_core::database::{
    ChangeSet, CredentialChange, CredentialRepository, PgCredentialRepository, PgProcessStore,
    ProcessStore,
};
use issuer_core::models::{CredentialStatus, CredentialTypeId};

async fn insert_credential(
    pool: &PgPool,
    status: CredentialStatus,
    expiry_date: Option<DateTime<Utc>>,
) -> sqlx::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO issuer.company_ssi_details
            (id, bpnl, issuer_bpn, verified_credential_type_id, company_ssi_detail_status_id,
             date_created, creator_user_id, expiry_date)
        VALUES ($1, 'BPNL00000001ACME', 'BPNL00000003CRHK', $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(CredentialTypeId::Membership.id())
    .bind(status.id())
    .bind(Utc::now() - Duration::days(500))
    .bind(Uuid::new_v4().to_string())
    .bind(expiry_date)
    .execute(pool)
    .await?;
    Ok(id)
}

async fn reissuance_rows(pool: &PgPool, credential_id: Uuid) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM issuer.reissuances WHERE id = $1")
        .bind(credential_id)
        .fetch_one(pool)
        .await
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_reissued_credential_can_be_removed(pool: PgPool) -> sqlx::Result<()> {
    let store = PgProcessStore::new(pool.clone());
    let repository = PgCredentialRepository::new(pool.clone());
    let old = insert_credential(
        &pool,
        CredentialStatus::Active,
        Some(Utc::now() - Duration::days(400)),
    )
    .await?;
    let new = insert_credential(&pool, CredentialStatus::Pending, None).await?;

    let mut changes = ChangeSet::new();
    changes.change_credential(CredentialChange::SetReissuedCredential {
        credential_id: old,
        reissued_credential_id: new,
    });
    store.save(changes).await.unwrap();

    let reissued = repository.get_credential(new).await.unwrap().unwrap();
    assert_eq!(reissued.superseded_credential_id, Some(old));
    assert_eq!(reissuance_rows(&pool, old).await?, 1);

    let mut changes = ChangeSet::new();
    changes.change_credential(CredentialChange::RemoveCredential { credential_id: old });
    store.save(changes).await.unwrap();

    assert!(repository.get_credential(old).await.unwrap().is_none());
    assert_eq!(reissuance_rows(&pool, old).await?, 0);
    assert!(repository.get_credential(new).await.unwrap().is_some());
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_expired_pending_credential_moves_to_inactive(pool: PgPool) -> sqlx::Result<()> {
    let store = PgProcessStore::new(pool.clone());
    let repository = PgCredentialRepository::new(pool.clone());
    let id = insert_credential(&pool, CredentialStatus::Pending, None).await?;

    let mut changes = ChangeSet::new();
    changes.change_credential(CredentialChange::SetCredentialStatus {
        credential_id: id,
        expected: CredentialStatus::Pending,
        status: CredentialStatus::Inactive,
    });
    store.save(changes.clone()).await.unwrap();

    assert_eq!(
        repository.get_credential(id).await.unwrap().unwrap().status,
        CredentialStatus::Inactive
    );
    assert!(store.save(changes).await.is_err());
    Ok(())
}
