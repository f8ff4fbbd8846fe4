//! # Expiry Check
//!
//! Periodic sweep over credentials approaching or past their expiry.
//!
//! ## Overview
//!
//! Candidates are evaluated with [`ExpiryThresholds::evaluate`]:
//!
//! - **Delete**: stale inactive or long expired credentials are removed
//! - **Decline**: pending credentials whose framework version expired become
//!   inactive and get a `DECLINE_CREDENTIAL` process with one
//!   `REVOKE_CREDENTIAL` step
//! - **Notify**: active credentials are notified one month, two weeks and one
//!   day before expiry; the marker records the last notice sent
//!
//! Every credential is committed on its own. A failure is logged and counted
//! and the sweep continues with the next credential.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ExpirySettings;
use crate::database::{ChangeSet, CredentialChange, CredentialRepository, ProcessStore};
use crate::error::{IssuerError, Result};
use crate::models::{
    Credential, CredentialStatus, CredentialTypeId, ExpiryAction, ExpiryCheckType, ExpiryThresholds,
    NewProcessStep, NotificationTypeId, Process,
};
use crate::services::{MailParameter, NotificationService};
use crate::state_machine::{ProcessStepTypeId, ProcessTypeId};

const EXPIRY_MAIL_TEMPLATE: &str = "CredentialExpiry";
const NO_VERSION: &str = "no version";

/// Counts of one expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryCheckSummary {
    pub deleted: usize,
    pub declined: usize,
    pub notified: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExpiryNotificationContent<'a> {
    #[serde(rename = "type")]
    credential_type: CredentialTypeId,
    expiry_date: String,
    version: Option<&'a str>,
    credential_id: Uuid,
    expiry_check_type_id: ExpiryCheckType,
}

pub struct ExpiryCheckService {
    credentials: Arc<dyn CredentialRepository>,
    processes: Arc<dyn ProcessStore>,
    notifications: Arc<dyn NotificationService>,
    settings: ExpirySettings,
}

impl ExpiryCheckService {
    pub fn new(
        credentials: Arc<dyn CredentialRepository>,
        processes: Arc<dyn ProcessStore>,
        notifications: Arc<dyn NotificationService>,
        settings: ExpirySettings,
    ) -> Self {
        Self {
            credentials,
            processes,
            notifications,
            settings,
        }
    }

    #[instrument(skip(self))]
    pub async fn execute(&self, now: DateTime<Utc>) -> Result<ExpiryCheckSummary> {
        let thresholds = ExpiryThresholds::new(
            now,
            self.settings.inactive_vcs_to_delete_in_weeks,
            self.settings.expired_vcs_to_delete_in_months,
        );
        let candidates = self.credentials.get_expiry_candidates(&thresholds).await?;
        debug!(count = candidates.len(), "Expiry candidates loaded");

        let mut summary = ExpiryCheckSummary::default();
        for credential in candidates {
            let Some(action) = thresholds.evaluate(&credential) else {
                continue;
            };
            match self.handle(&credential, action).await {
                Ok(()) => match action {
                    ExpiryAction::Delete => summary.deleted += 1,
                    ExpiryAction::Decline => summary.declined += 1,
                    ExpiryAction::Notify(_) => summary.notified += 1,
                },
                Err(err) => {
                    warn!(
                        credential_id = %credential.id,
                        action = ?action,
                        error = %err,
                        "Expiry check failed for credential"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            deleted = summary.deleted,
            declined = summary.declined,
            notified = summary.notified,
            failed = summary.failed,
            "Expiry check finished"
        );
        Ok(summary)
    }

    async fn handle(&self, credential: &Credential, action: ExpiryAction) -> Result<()> {
        let mut changes = ChangeSet::new();
        match action {
            ExpiryAction::Delete => {
                changes.change_credential(CredentialChange::RemoveCredential {
                    credential_id: credential.id,
                });
            }
            ExpiryAction::Decline => {
                let process = Process::new(ProcessTypeId::DeclineCredential);
                changes
                    .add_step(NewProcessStep::todo(
                        process.id,
                        ProcessStepTypeId::RevokeCredential,
                    ))
                    .change_credential(CredentialChange::SetCredentialStatus {
                        credential_id: credential.id,
                        expected: CredentialStatus::Pending,
                        status: CredentialStatus::Inactive,
                    })
                    .change_credential(CredentialChange::LinkProcess {
                        credential_id: credential.id,
                        expected: credential.process_id,
                        process_id: process.id,
                    })
                    .add_process(process);
            }
            ExpiryAction::Notify(expiry_check_type) => {
                self.notify(credential, expiry_check_type).await?;
                changes.change_credential(CredentialChange::SetExpiryCheckType {
                    credential_id: credential.id,
                    expected: credential.expiry_check_type,
                    expiry_check_type,
                });
            }
        }

        self.processes.save(changes).await?;
        debug!(credential_id = %credential.id, action = ?action, "Expiry action applied");
        Ok(())
    }

    async fn notify(&self, credential: &Credential, expiry_check_type: ExpiryCheckType) -> Result<()> {
        let expiry_date = credential
            .expiry_date
            .ok_or_else(|| IssuerError::Conflict("Expiry Date must be set here".to_string()))?;
        let Ok(requester) = Uuid::parse_str(&credential.requester_id) else {
            debug!(
                credential_id = %credential.id,
                requester_id = %credential.requester_id,
                "Requester is not a user id, expiry notice skipped"
            );
            return Ok(());
        };

        let content = serde_json::to_string(&ExpiryNotificationContent {
            credential_type: credential.type_id,
            expiry_date: expiry_date.to_rfc3339(),
            version: credential.detail_version.as_deref(),
            credential_id: credential.id,
            expiry_check_type_id: expiry_check_type,
        })?;
        self.notifications
            .add_notification(&content, requester, NotificationTypeId::CredentialExpiry)
            .await?;

        let type_label = credential.type_id.label().ok_or_else(|| {
            IssuerError::UnexpectedCondition(format!(
                "VerifiedCredentialType {} does not exists",
                credential.type_id
            ))
        })?;
        let parameters = [
            MailParameter::new("typeId", type_label),
            MailParameter::new(
                "version",
                credential.detail_version.as_deref().unwrap_or(NO_VERSION),
            ),
            MailParameter::new("expiryDate", expiry_date.format("%d %B %Y").to_string()),
        ];
        self.notifications
            .trigger_mail(EXPIRY_MAIL_TEMPLATE, requester, &parameters)
            .await
    }
}
