//! # PostgreSQL Process Store
//!
//! [`ProcessStore`] backed by the `issuer` schema.
//!
//! ## Key Features
//!
//! - **Single transaction per change set**: a violated version check or status
//!   precondition rolls the whole change set back
//! - **Conditional lock acquisition**: `try_lock` only succeeds on an unlocked
//!   or expired row with an unchanged version
//! - **Runtime queries**: no database is required at compile time

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::process_store::{
    ChangeSet, CredentialChange, ProcessStore, SavedChanges, StepModification,
};
use crate::error::{IssuerError, Result};
use crate::models::core::{ProcessRow, ProcessStepRow};
use crate::models::{NewProcessStep, Process, ProcessStep};
use crate::state_machine::{ProcessStepStatusId, ProcessStepTypeId, ProcessTypeId};

const SELECT_PROCESS: &str = r#"
    SELECT id, process_type_id, lock_expiry_date, version
    FROM issuer.processes
    WHERE id = $1
"#;

pub struct PgProcessStore {
    pool: PgPool,
}

impl PgProcessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn apply_step_modification(
        tx: &mut Transaction<'_, Postgres>,
        modification: &StepModification,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE issuer.process_steps
            SET process_step_status_id = $1, message = $2, date_last_changed = $3
            WHERE id = $4 AND ($5::INTEGER IS NULL OR process_step_status_id = $5)
            "#,
        )
        .bind(modification.status.id())
        .bind(&modification.message)
        .bind(now)
        .bind(modification.step_id)
        .bind(modification.expected_status.map(ProcessStepStatusId::id))
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(IssuerError::Conflict(format!(
                "process step {} was modified concurrently",
                modification.step_id
            )));
        }
        Ok(())
    }

    async fn insert_step(
        tx: &mut Transaction<'_, Postgres>,
        step: &NewProcessStep,
        now: DateTime<Utc>,
    ) -> Result<ProcessStep> {
        let row = sqlx::query_as::<_, ProcessStepRow>(
            r#"
            INSERT INTO issuer.process_steps
                (id, process_step_type_id, process_step_status_id, process_id, date_created)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, process_id, process_step_type_id, process_step_status_id,
                      date_created, date_last_changed, message
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(step.step_type.id())
        .bind(step.status.id())
        .bind(step.process_id)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;

        ProcessStep::try_from(row)
    }

    async fn apply_credential_change(
        tx: &mut Transaction<'_, Postgres>,
        change: &CredentialChange,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let affected = match change {
            CredentialChange::SetExternalCredentialId {
                credential_id,
                external_credential_id,
            } => sqlx::query(
                r#"
                UPDATE issuer.company_ssi_details
                SET external_credential_id = $2, date_last_changed = $3
                WHERE id = $1
                "#,
            )
            .bind(credential_id)
            .bind(external_credential_id)
            .bind(now)
            .execute(&mut **tx)
            .await?
            .rows_affected(),

            CredentialChange::StoreSignedCredential {
                credential_id,
                credential,
                document,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO issuer.documents
                        (id, date_created, document_name, document_content, document_status_id)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(document.id)
                .bind(now)
                .bind(&document.name)
                .bind(serde_json::to_vec(&document.content)?)
                .bind(document.status.id())
                .execute(&mut **tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO issuer.company_ssi_detail_assigned_documents
                        (document_id, company_ssi_detail_id)
                    VALUES ($1, $2)
                    "#,
                )
                .bind(document.id)
                .bind(credential_id)
                .execute(&mut **tx)
                .await?;

                sqlx::query(
                    r#"
                    UPDATE issuer.company_ssi_details
                    SET credential = $2, date_last_changed = $3
                    WHERE id = $1
                    "#,
                )
                .bind(credential_id)
                .bind(credential)
                .bind(now)
                .execute(&mut **tx)
                .await?
                .rows_affected()
            }

            CredentialChange::SetCredentialStatus {
                credential_id,
                expected,
                status,
            } => sqlx::query(
                r#"
                UPDATE issuer.company_ssi_details
                SET company_ssi_detail_status_id = $3, date_last_changed = $4
                WHERE id = $1 AND company_ssi_detail_status_id = $2
                "#,
            )
            .bind(credential_id)
            .bind(expected.id())
            .bind(status.id())
            .bind(now)
            .execute(&mut **tx)
            .await?
            .rows_affected(),

            CredentialChange::SetDocumentStatus {
                document_id,
                expected,
                status,
                ..
            } => sqlx::query(
                r#"
                UPDATE issuer.documents
                SET document_status_id = $3, date_last_changed = $4
                WHERE id = $1 AND document_status_id = $2
                "#,
            )
            .bind(document_id)
            .bind(expected.id())
            .bind(status.id())
            .bind(now)
            .execute(&mut **tx)
            .await?
            .rows_affected(),

            CredentialChange::SetExpiryCheckType {
                credential_id,
                expected,
                expiry_check_type,
            } => sqlx::query(
                r#"
                UPDATE issuer.company_ssi_details
                SET expiry_check_type_id = $3, date_last_changed = $4
                WHERE id = $1 AND expiry_check_type_id IS NOT DISTINCT FROM $2
                "#,
            )
            .bind(credential_id)
            .bind(expected.map(|e| e.id()))
            .bind(expiry_check_type.id())
            .bind(now)
            .execute(&mut **tx)
            .await?
            .rows_affected(),

            CredentialChange::LinkProcess {
                credential_id,
                expected,
                process_id,
            } => sqlx::query(
                r#"
                UPDATE issuer.company_ssi_details
                SET process_id = $3, date_last_changed = $4
                WHERE id = $1 AND process_id IS NOT DISTINCT FROM $2
                "#,
            )
            .bind(credential_id)
            .bind(expected)
            .bind(process_id)
            .bind(now)
            .execute(&mut **tx)
            .await?
            .rows_affected(),

            CredentialChange::SetReissuedCredential {
                credential_id,
                reissued_credential_id,
            } => sqlx::query(
                r#"
                INSERT INTO issuer.reissuances (id, reissued_credential_id, date_created)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE SET reissued_credential_id = EXCLUDED.reissued_credential_id
                "#,
            )
            .bind(credential_id)
            .bind(reissued_credential_id)
            .bind(now)
            .execute(&mut **tx)
            .await?
            .rows_affected(),

            CredentialChange::RemoveCredential { credential_id } => {
                sqlx::query(
                    r#"
                    WITH assigned AS (
                        DELETE FROM issuer.company_ssi_detail_assigned_documents
                        WHERE company_ssi_detail_id = $1
                        RETURNING document_id
                    )
                    DELETE FROM issuer.documents WHERE id IN (SELECT document_id FROM assigned)
                    "#,
                )
                .bind(credential_id)
                .execute(&mut **tx)
                .await?;

                sqlx::query("DELETE FROM issuer.reissuances WHERE id = $1")
                    .bind(credential_id)
                    .execute(&mut **tx)
                    .await?;

                sqlx::query("DELETE FROM issuer.company_ssi_details WHERE id = $1")
                    .bind(credential_id)
                    .execute(&mut **tx)
                    .await?
                    .rows_affected()
            }
        };

        if affected == 0 {
            warn!(
                credential_id = %change.credential_id(),
                change = ?change,
                "Credential change precondition not met"
            );
            return Err(IssuerError::Conflict(format!(
                "credential {} was modified concurrently",
                change.credential_id()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessStore for PgProcessStore {
    #[instrument(skip(self, changes), fields(
        version_checks = changes.version_checks.len(),
        step_modifications = changes.step_modifications.len(),
        new_steps = changes.new_steps.len(),
        credential_changes = changes.credential_changes.len()
    ))]
    async fn save(&self, changes: ChangeSet) -> Result<SavedChanges> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            IssuerError::Database(format!("Transaction start failed: {e}"))
        })?;
        let mut saved = SavedChanges::default();

        for (process_id, expected_version) in &changes.version_checks {
            let new_version = Uuid::new_v4();
            let result = sqlx::query(
                "UPDATE issuer.processes SET version = $1 WHERE id = $2 AND version = $3",
            )
            .bind(new_version)
            .bind(process_id)
            .bind(expected_version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                debug!(process_id = %process_id, "Process version check failed");
                return Err(IssuerError::OptimisticConflict(*process_id));
            }
            saved.process_versions.insert(*process_id, new_version);
        }

        for process in &changes.new_processes {
            sqlx::query(
                r#"
                INSERT INTO issuer.processes (id, process_type_id, lock_expiry_date, version)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(process.id)
            .bind(process.process_type_id.id())
            .bind(process.lock_expiry_date)
            .bind(process.version)
            .execute(&mut *tx)
            .await?;
        }

        for modification in &changes.step_modifications {
            Self::apply_step_modification(&mut tx, modification, now).await?;
        }

        for step in &changes.new_steps {
            saved
                .created_steps
                .push(Self::insert_step(&mut tx, step, now).await?);
        }

        for change in &changes.credential_changes {
            Self::apply_credential_change(&mut tx, change, now).await?;
        }

        tx.commit().await.map_err(|e| {
            error!("Failed to commit change set: {}", e);
            IssuerError::Database(format!("Transaction commit failed: {e}"))
        })?;

        Ok(saved)
    }

    async fn get_process(&self, process_id: Uuid) -> Result<Option<Process>> {
        sqlx::query_as::<_, ProcessRow>(SELECT_PROCESS)
            .bind(process_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Process::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_active_processes(
        &self,
        process_types: &[ProcessTypeId],
        step_types: &[ProcessStepTypeId],
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Process>> {
        let query = r#"
            SELECT p.id, p.process_type_id, p.lock_expiry_date, p.version
            FROM issuer.processes p
            WHERE p.process_type_id = ANY($1)
              AND (p.lock_expiry_date IS NULL OR p.lock_expiry_date <= $3)
              AND EXISTS (
                  SELECT 1 FROM issuer.process_steps s
                  WHERE s.process_id = p.id
                    AND s.process_step_status_id = $4
                    AND s.process_step_type_id = ANY($2)
              )
            ORDER BY p.lock_expiry_date NULLS FIRST, p.id
            LIMIT $5
        "#;

        let rows = sqlx::query_as::<_, ProcessRow>(query)
            .bind(process_types.iter().map(|t| t.id()).collect::<Vec<_>>())
            .bind(step_types.iter().map(|t| t.id()).collect::<Vec<_>>())
            .bind(now)
            .bind(ProcessStepStatusId::Todo.id())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to load active processes: {}", e);
                IssuerError::Database(format!("Active process query failed: {e}"))
            })?;

        rows.into_iter().map(Process::try_from).collect()
    }

    async fn get_process_steps(&self, process_id: Uuid) -> Result<Vec<ProcessStep>> {
        let rows = sqlx::query_as::<_, ProcessStepRow>(
            r#"
            SELECT id, process_id, process_step_type_id, process_step_status_id,
                   date_created, date_last_changed, message
            FROM issuer.process_steps
            WHERE process_id = $1
            ORDER BY date_created, id
            "#,
        )
        .bind(process_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProcessStep::try_from).collect()
    }

    #[instrument(skip(self, process), fields(process_id = %process.id))]
    async fn try_lock(
        &self,
        process: &mut Process,
        lock_expiry_date: DateTime<Utc>,
    ) -> Result<bool> {
        let now = Utc::now();
        let new_version = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            UPDATE issuer.processes
            SET lock_expiry_date = $2, version = $3
            WHERE id = $1 AND version = $4
              AND (lock_expiry_date IS NULL OR lock_expiry_date <= $5)
            "#,
        )
        .bind(process.id)
        .bind(lock_expiry_date)
        .bind(new_version)
        .bind(process.version)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            process.lock_expiry_date = Some(lock_expiry_date);
            process.version = new_version;
            return Ok(true);
        }

        match self.get_process(process.id).await? {
            None => Err(IssuerError::NotFound(format!(
                "process {} does not exist",
                process.id
            ))),
            Some(current) if current.is_locked(now) => Ok(false),
            Some(_) => Err(IssuerError::OptimisticConflict(process.id)),
        }
    }

    #[instrument(skip(self, process), fields(process_id = %process.id))]
    async fn release_lock(&self, process: &mut Process) -> Result<bool> {
        let new_version = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            UPDATE issuer.processes
            SET lock_expiry_date = NULL, version = $2
            WHERE id = $1 AND version = $3 AND lock_expiry_date IS NOT NULL
            "#,
        )
        .bind(process.id)
        .bind(new_version)
        .bind(process.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Ok(false);
        }
        process.lock_expiry_date = None;
        process.version = new_version;
        Ok(true)
    }

    async fn update_version(&self, process: &mut Process) -> Result<()> {
        let new_version = Uuid::new_v4();
        sqlx::query("UPDATE issuer.processes SET version = $2 WHERE id = $1")
            .bind(process.id)
            .bind(new_version)
            .execute(&self.pool)
            .await?;
        process.version = new_version;
        Ok(())
    }
}
