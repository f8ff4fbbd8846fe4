//! # PostgreSQL Credential Repository
//!
//! [`CredentialRepository`] over `issuer.company_ssi_details`, its detail
//! versions, reissuance links and assigned documents.
//!
//! Expiry candidates are pre-selected in SQL with the same cut-off dates the
//! sweep evaluates; the final action is still decided by
//! [`ExpiryThresholds::evaluate`].

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::credential_repository::CredentialRepository;
use crate::error::Result;
use crate::models::credential::{CredentialRow, DocumentRow};
use crate::models::{
    Credential, CredentialDocument, CredentialStatus, ExpiryThresholds,
};

const SELECT_CREDENTIALS: &str = r#"
    SELECT d.id, d.bpnl, d.issuer_bpn, d.verified_credential_type_id,
           d.company_ssi_detail_status_id, d.creator_user_id, d.date_created,
           d.expiry_date, d.expiry_check_type_id,
           v.version AS detail_version,
           d.verified_credential_external_type_detail_version_id AS detail_version_id,
           v.expiry AS detail_version_expiry,
           d.external_credential_id, d.process_id,
           COALESCE(d.superseded_credential_id, sup.id) AS superseded_credential_id,
           r.reissued_credential_id,
           d.schema, d.credential, d.callback_url
    FROM issuer.company_ssi_details d
    LEFT JOIN issuer.verified_credential_external_type_detail_versions v
           ON v.id = d.verified_credential_external_type_detail_version_id
    LEFT JOIN issuer.reissuances r ON r.id = d.id
    LEFT JOIN issuer.reissuances sup ON sup.reissued_credential_id = d.id
"#;

pub struct PgCredentialRepository {
    pool: PgPool,
}

impl PgCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert rows and attach their documents
    async fn hydrate(&self, rows: Vec<CredentialRow>) -> Result<Vec<Credential>> {
        let mut credentials = rows
            .into_iter()
            .map(Credential::try_from)
            .collect::<Result<Vec<_>>>()?;
        if credentials.is_empty() {
            return Ok(credentials);
        }

        let ids: Vec<Uuid> = credentials.iter().map(|credential| credential.id).collect();
        let document_rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT a.company_ssi_detail_id, doc.id, doc.document_name,
                   doc.document_status_id, doc.document_content
            FROM issuer.company_ssi_detail_assigned_documents a
            JOIN issuer.documents doc ON doc.id = a.document_id
            WHERE a.company_ssi_detail_id = ANY($1)
            ORDER BY doc.date_created
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut documents: HashMap<Uuid, Vec<CredentialDocument>> = HashMap::new();
        for row in document_rows {
            let owner = row.company_ssi_detail_id;
            documents
                .entry(owner)
                .or_default()
                .push(CredentialDocument::try_from(row)?);
        }
        for credential in &mut credentials {
            if let Some(assigned) = documents.remove(&credential.id) {
                credential.documents = assigned;
            }
        }
        Ok(credentials)
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn get_credential(&self, credential_id: Uuid) -> Result<Option<Credential>> {
        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            "{SELECT_CREDENTIALS} WHERE d.id = $1"
        ))
        .bind(credential_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(self.hydrate(rows).await?.into_iter().next())
    }

    async fn get_credential_id_for_process(&self, process_id: Uuid) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM issuer.company_ssi_details WHERE process_id = $1",
        )
        .bind(process_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    #[instrument(skip(self, thresholds), fields(now = %thresholds.now))]
    async fn get_expiry_candidates(
        &self,
        thresholds: &ExpiryThresholds,
    ) -> Result<Vec<Credential>> {
        let notify_until = thresholds
            .now
            .checked_add_months(Months::new(2))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            r#"{SELECT_CREDENTIALS}
            WHERE (d.company_ssi_detail_status_id = $1 AND d.date_created < $2)
               OR (d.company_ssi_detail_status_id IN ($1, $3) AND d.expiry_date < $4)
               OR (d.company_ssi_detail_status_id = $5 AND v.expiry < $6)
               OR (d.company_ssi_detail_status_id = $3 AND d.expiry_date <= $7)
            ORDER BY d.date_created
            "#
        ))
        .bind(CredentialStatus::Inactive.id())
        .bind(thresholds.inactive_vcs_to_delete)
        .bind(CredentialStatus::Active.id())
        .bind(thresholds.expired_vcs_to_delete)
        .bind(CredentialStatus::Pending.id())
        .bind(thresholds.now)
        .bind(notify_until)
        .fetch_all(&self.pool)
        .await?;

        let candidates: Vec<Credential> = self
            .hydrate(rows)
            .await?
            .into_iter()
            .filter(|credential| thresholds.evaluate(credential).is_some())
            .collect();
        debug!(count = candidates.len(), "Expiry candidates selected");
        Ok(candidates)
    }

    async fn get_credentials_to_reissue(
        &self,
        expires_before: DateTime<Utc>,
    ) -> Result<Vec<Credential>> {
        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            r#"{SELECT_CREDENTIALS}
            WHERE d.company_ssi_detail_status_id = $1
              AND d.expiry_date < $2
              AND r.id IS NULL
            ORDER BY d.expiry_date
            "#
        ))
        .bind(CredentialStatus::Active.id())
        .bind(expires_before)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }
}
