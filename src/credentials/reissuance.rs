//! # Reissuance
//!
//! Requests replacements for active credentials that expire soon.
//!
//! The replacement is created through the [`CredentialIssuer`] with the old
//! credential as the one it supersedes, so the replacement's creation process
//! revokes the old credential once the new one is delivered. The old record
//! then points to its replacement.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::did::did_to_document_url;
use crate::config::ReissuanceSettings;
use crate::database::{ChangeSet, CredentialChange, CredentialRepository, ProcessStore};
use crate::error::{IssuerError, Result};
use crate::models::{Credential, CredentialKind};
use crate::services::{
    CreateBpnCredentialRequest, CreateFrameworkCredentialRequest,
    CreateMembershipCredentialRequest, CredentialIssuer,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReissuanceSummary {
    pub reissued: usize,
    pub skipped: usize,
}

pub struct ReissuanceService {
    credentials: Arc<dyn CredentialRepository>,
    issuer: Arc<dyn CredentialIssuer>,
    processes: Arc<dyn ProcessStore>,
    settings: ReissuanceSettings,
}

impl ReissuanceService {
    pub fn new(
        credentials: Arc<dyn CredentialRepository>,
        issuer: Arc<dyn CredentialIssuer>,
        processes: Arc<dyn ProcessStore>,
        settings: ReissuanceSettings,
    ) -> Self {
        Self {
            credentials,
            issuer,
            processes,
            settings,
        }
    }

    #[instrument(skip(self))]
    pub async fn execute(&self, now: DateTime<Utc>) -> Result<ReissuanceSummary> {
        let expires_before =
            now + chrono::Duration::days(i64::from(self.settings.expired_vcs_to_reissue_in_days));
        let credentials = self
            .credentials
            .get_credentials_to_reissue(expires_before)
            .await?;

        let mut summary = ReissuanceSummary::default();
        for credential in credentials {
            match self.reissue(&credential).await {
                Ok(reissued_id) => {
                    info!(
                        credential_id = %credential.id,
                        reissued_credential_id = %reissued_id,
                        "Credential reissued"
                    );
                    summary.reissued += 1;
                }
                Err(err) => {
                    warn!(
                        credential_id = %credential.id,
                        credential_type = %credential.type_id,
                        error = %err,
                        "Credential could not be reissued"
                    );
                    summary.skipped += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn reissue(&self, credential: &Credential) -> Result<Uuid> {
        let subject = credential.subject_did().ok_or_else(|| {
            IssuerError::Conflict(format!(
                "credential {} has no credential subject",
                credential.id
            ))
        })?;
        let holder = did_to_document_url(subject)?;
        let callback_url = credential.callback_url.clone();

        let reissued_id = match credential.type_id.kind() {
            CredentialKind::Bpn => {
                self.issuer
                    .create_bpn_credential(
                        CreateBpnCredentialRequest {
                            holder,
                            business_partner_number: credential.bpnl.clone(),
                            callback_url,
                        },
                        credential.id,
                    )
                    .await?
            }
            CredentialKind::Membership => {
                let member_of = credential
                    .schema
                    .as_ref()
                    .and_then(|schema| schema.get("credentialSubject"))
                    .and_then(|subject| subject.get("memberOf"))
                    .and_then(|member_of| member_of.as_str())
                    .ok_or_else(|| {
                        IssuerError::Conflict(format!(
                            "credential {} has no memberOf",
                            credential.id
                        ))
                    })?
                    .to_string();
                self.issuer
                    .create_membership_credential(
                        CreateMembershipCredentialRequest {
                            holder,
                            holder_bpn: credential.bpnl.clone(),
                            member_of,
                            callback_url,
                        },
                        credential.id,
                    )
                    .await?
            }
            CredentialKind::Framework => {
                let version_id = credential.detail_version_id.ok_or_else(|| {
                    IssuerError::Conflict(format!(
                        "credential {} has no framework version",
                        credential.id
                    ))
                })?;
                self.issuer
                    .create_framework_credential(
                        CreateFrameworkCredentialRequest {
                            holder,
                            holder_bpn: credential.bpnl.clone(),
                            credential_type: credential.type_id,
                            use_case_framework_version_id: version_id,
                            callback_url,
                        },
                        credential.id,
                    )
                    .await?
            }
        };

        let mut changes = ChangeSet::new();
        changes.change_credential(CredentialChange::SetReissuedCredential {
            credential_id: credential.id,
            reissued_credential_id: reissued_id,
        });
        self.processes.save(changes).await?;
        Ok(reissued_id)
    }
}
