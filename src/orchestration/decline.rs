//! # Credential Decline Handlers
//!
//! Steps of a `DECLINE_CREDENTIAL` process, opened for expired or replaced
//! credentials:
//!
//! ```text
//! REVOKE_CREDENTIAL -> TRIGGER_NOTIFICATION -> TRIGGER_MAIL
//! ```
//!
//! The requester is informed of a renewal when the credential has a reissued
//! counterpart and of a rejection otherwise. Legacy requester ids that are
//! not UUIDs receive nothing; the steps still complete.

use futures::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::creation::{load_credential, revocation_changes};
use super::executor::{StepContext, StepOutcome, StepRoute};
use crate::error::{IssuerError, Result};
use crate::models::{Credential, CredentialTypeId, NotificationTypeId};
use crate::services::MailParameter;
use crate::state_machine::ProcessStepTypeId;

const RENEWAL_TEMPLATE: &str = "CredentialRenewal";
const REJECTION_TEMPLATE: &str = "CredentialRejected";
const RENEWAL_REASON: &str =
    "The credential about to expiry is revoked and new credential was reissued";
const REJECTION_REASON: &str = "The credential is already expired";

pub fn routes() -> Vec<StepRoute> {
    vec![
        StepRoute {
            step_type: ProcessStepTypeId::RevokeCredential,
            handler: |id, ctx| revoke_credential(id, ctx).boxed(),
            requires_lock: false,
        },
        StepRoute {
            step_type: ProcessStepTypeId::TriggerNotification,
            handler: |id, ctx| trigger_notification(id, ctx).boxed(),
            requires_lock: false,
        },
        StepRoute {
            step_type: ProcessStepTypeId::TriggerMail,
            handler: |id, ctx| trigger_mail(id, ctx).boxed(),
            requires_lock: false,
        },
    ]
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeclineNotificationContent {
    #[serde(rename = "type")]
    credential_type: CredentialTypeId,
    credential_id: Uuid,
}

fn is_renewal(credential: &Credential) -> bool {
    credential.reissued_credential_id.is_some()
}

pub async fn revoke_credential(credential_id: Uuid, ctx: Arc<StepContext>) -> Result<StepOutcome> {
    let credential = load_credential(&ctx, credential_id).await?;
    let external_credential_id = credential.external_credential_id.ok_or_else(|| {
        IssuerError::Conflict(format!(
            "External Credential Id must be set for {credential_id}"
        ))
    })?;

    ctx.wallet.revoke_credential(external_credential_id).await?;
    info!(credential_id = %credential_id, "Credential revoked");

    Ok(
        StepOutcome::done(Some(vec![ProcessStepTypeId::TriggerNotification]))
            .with_changes(revocation_changes(&credential)),
    )
}

pub async fn trigger_notification(
    credential_id: Uuid,
    ctx: Arc<StepContext>,
) -> Result<StepOutcome> {
    let credential = load_credential(&ctx, credential_id).await?;

    match Uuid::parse_str(&credential.requester_id) {
        Ok(requester) => {
            let category = if is_renewal(&credential) {
                NotificationTypeId::CredentialRenewal
            } else {
                NotificationTypeId::CredentialRejected
            };
            let content = serde_json::to_string(&DeclineNotificationContent {
                credential_type: credential.type_id,
                credential_id,
            })?;
            ctx.notifications
                .add_notification(&content, requester, category)
                .await?;
        }
        Err(_) => debug!(
            credential_id = %credential_id,
            requester_id = %credential.requester_id,
            "Requester is not a user id, notification skipped"
        ),
    }

    Ok(StepOutcome::done(Some(vec![ProcessStepTypeId::TriggerMail])))
}

pub async fn trigger_mail(credential_id: Uuid, ctx: Arc<StepContext>) -> Result<StepOutcome> {
    let credential = load_credential(&ctx, credential_id).await?;
    let type_label = credential.type_id.label().ok_or_else(|| {
        IssuerError::UnexpectedCondition(format!(
            "VerifiedCredentialType {} does not exists",
            credential.type_id
        ))
    })?;

    if let Ok(requester) = Uuid::parse_str(&credential.requester_id) {
        let (template, reason) = if is_renewal(&credential) {
            (RENEWAL_TEMPLATE, RENEWAL_REASON)
        } else {
            (REJECTION_TEMPLATE, REJECTION_REASON)
        };
        let parameters = [
            MailParameter::new("requestName", type_label),
            MailParameter::new("reason", reason),
        ];
        ctx.notifications
            .trigger_mail(template, requester, &parameters)
            .await?;
    }

    Ok(StepOutcome::done(None))
}
