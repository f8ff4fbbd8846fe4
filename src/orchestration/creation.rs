//! # Credential Creation Handlers
//!
//! Steps of a `CREATE_CREDENTIAL` process:
//!
//! ```text
//! CREATE_SIGNED_CREDENTIAL -> SAVE_CREDENTIAL_DOCUMENT -> OFFER_CREDENTIAL_TO_HOLDER
//!     -> REVOKE_SUPERSEDED_CREDENTIAL (when replacing another credential)
//!     -> TRIGGER_CALLBACK (when a callback URL is known)
//! ```
//!
//! When superseded credentials are revoked through a decline process,
//! `CREATE_SIGNED_CREDENTIAL` continues with `REVOKE_REISSUED_CREDENTIAL`
//! instead (see [`reissuance`](super::reissuance)).

use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::executor::{StepContext, StepOutcome, StepRoute};
use crate::database::CredentialChange;
use crate::error::{IssuerError, Result};
use crate::models::{
    Credential, CredentialDocument, CredentialStatus, DocumentStatus,
};
use crate::services::{IssuerResponseData, IssuerResponseStatus};
use crate::state_machine::ProcessStepTypeId;

pub(crate) const HOLDER_IS_ISSUER_MESSAGE: &str =
    "ProcessStep was skipped because the holder is the issuer";
const CALLBACK_SUCCESS_MESSAGE: &str = "Successfully created Credential";

pub fn routes() -> Vec<StepRoute> {
    vec![
        StepRoute {
            step_type: ProcessStepTypeId::CreateSignedCredential,
            handler: |id, ctx| create_signed_credential(id, ctx).boxed(),
            requires_lock: false,
        },
        StepRoute {
            step_type: ProcessStepTypeId::SaveCredentialDocument,
            handler: |id, ctx| save_credential_document(id, ctx).boxed(),
            requires_lock: false,
        },
        StepRoute {
            step_type: ProcessStepTypeId::OfferCredentialToHolder,
            handler: |id, ctx| offer_credential_to_holder(id, ctx).boxed(),
            requires_lock: false,
        },
        StepRoute {
            step_type: ProcessStepTypeId::RevokeSupersededCredential,
            handler: |id, ctx| revoke_superseded_credential(id, ctx).boxed(),
            requires_lock: true,
        },
        StepRoute {
            step_type: ProcessStepTypeId::TriggerCallback,
            handler: |id, ctx| trigger_callback(id, ctx).boxed(),
            requires_lock: false,
        },
    ]
}

pub(crate) async fn load_credential(ctx: &StepContext, credential_id: Uuid) -> Result<Credential> {
    ctx.credentials
        .get_credential(credential_id)
        .await?
        .ok_or_else(|| IssuerError::NotFound(format!("Credential {credential_id} does not exist")))
}

pub async fn create_signed_credential(
    credential_id: Uuid,
    ctx: Arc<StepContext>,
) -> Result<StepOutcome> {
    let credential = load_credential(&ctx, credential_id).await?;
    let schema = credential.schema.as_ref().ok_or_else(|| {
        IssuerError::Conflict(format!("Schema must be set for credential {credential_id}"))
    })?;

    let created = ctx.wallet.create_signed_credential(schema).await?;
    debug!(
        credential_id = %credential_id,
        external_credential_id = %created.external_credential_id,
        "Signed credential created"
    );

    let next = if ctx.settings.revoke_reissued_via_decline_process
        && credential.superseded_credential_id.is_some()
    {
        ProcessStepTypeId::RevokeReissuedCredential
    } else {
        ProcessStepTypeId::SaveCredentialDocument
    };

    Ok(StepOutcome::done(Some(vec![next])).with_change(
        CredentialChange::SetExternalCredentialId {
            credential_id,
            external_credential_id: created.external_credential_id,
        },
    ))
}

pub async fn save_credential_document(
    credential_id: Uuid,
    ctx: Arc<StepContext>,
) -> Result<StepOutcome> {
    let credential = load_credential(&ctx, credential_id).await?;
    let external_credential_id = credential.external_credential_id.ok_or_else(|| {
        IssuerError::Conflict("ExternalCredentialId must be set here".to_string())
    })?;

    let content = ctx.wallet.get_credential(external_credential_id).await?;
    let signed = serde_json::to_string(&content)?;
    let document = CredentialDocument {
        id: Uuid::new_v4(),
        name: format!("{}.json", credential.type_id),
        status: DocumentStatus::Active,
        content,
    };

    Ok(
        StepOutcome::done(Some(vec![ProcessStepTypeId::OfferCredentialToHolder])).with_change(
            CredentialChange::StoreSignedCredential {
                credential_id,
                credential: signed,
                document,
            },
        ),
    )
}

/// Continuation after holder delivery, shared by the delivered and skipped branches
fn after_offer(credential: &Credential, revoke_via_decline: bool) -> Vec<ProcessStepTypeId> {
    if credential.superseded_credential_id.is_some() && !revoke_via_decline {
        vec![ProcessStepTypeId::RevokeSupersededCredential]
    } else if credential.callback_url.is_some() {
        vec![ProcessStepTypeId::TriggerCallback]
    } else {
        Vec::new()
    }
}

pub async fn offer_credential_to_holder(
    credential_id: Uuid,
    ctx: Arc<StepContext>,
) -> Result<StepOutcome> {
    let credential = load_credential(&ctx, credential_id).await?;
    let next = after_offer(&credential, ctx.settings.revoke_reissued_via_decline_process);

    if credential.holder_is_issuer() {
        return Ok(StepOutcome::skipped(
            HOLDER_IS_ISSUER_MESSAGE,
            Some(next),
            true,
        ));
    }

    let credential_json = credential
        .credential
        .as_deref()
        .ok_or_else(|| IssuerError::Conflict("Credential must be set here".to_string()))?;
    let external_credential_id = credential.external_credential_id.ok_or_else(|| {
        IssuerError::Conflict("ExternalCredentialId must be set here".to_string())
    })?;

    ctx.wallet
        .offer_credential_to_holder(external_credential_id, credential_json)
        .await?;
    info!(credential_id = %credential_id, "Credential offered to holder");

    Ok(StepOutcome::done(Some(next)))
}

/// Revocation side effects shared by every step that revokes a credential
pub(crate) fn revocation_changes(credential: &Credential) -> Vec<CredentialChange> {
    let mut changes: Vec<CredentialChange> = credential
        .documents
        .iter()
        .filter(|document| document.status != DocumentStatus::Inactive)
        .map(|document| CredentialChange::SetDocumentStatus {
            credential_id: credential.id,
            document_id: document.id,
            expected: document.status,
            status: DocumentStatus::Inactive,
        })
        .collect();
    if credential.status != CredentialStatus::Revoked {
        changes.push(CredentialChange::SetCredentialStatus {
            credential_id: credential.id,
            expected: credential.status,
            status: CredentialStatus::Revoked,
        });
    }
    changes
}

pub async fn revoke_superseded_credential(
    credential_id: Uuid,
    ctx: Arc<StepContext>,
) -> Result<StepOutcome> {
    let credential = load_credential(&ctx, credential_id).await?;
    let Some(superseded_id) = credential.superseded_credential_id else {
        return Ok(StepOutcome::skipped(
            format!("credential {credential_id} does not supersede another credential"),
            None,
            false,
        ));
    };

    let Some(superseded) = ctx.credentials.get_credential(superseded_id).await? else {
        return Ok(StepOutcome::skipped(
            format!("superseded credential {superseded_id} does not exist"),
            None,
            false,
        ));
    };
    if superseded.status == CredentialStatus::Revoked {
        return Ok(StepOutcome::skipped(
            format!("superseded credential {superseded_id} is already revoked"),
            None,
            false,
        ));
    }

    let external_credential_id = superseded.external_credential_id.ok_or_else(|| {
        IssuerError::Conflict(format!(
            "External Credential Id must be set for {superseded_id}"
        ))
    })?;
    ctx.wallet.revoke_credential(external_credential_id).await?;
    info!(
        credential_id = %credential_id,
        superseded_credential_id = %superseded_id,
        "Superseded credential revoked"
    );

    let next = credential
        .callback_url
        .is_some()
        .then(|| vec![ProcessStepTypeId::TriggerCallback]);
    Ok(StepOutcome::done(next).with_changes(revocation_changes(&superseded)))
}

pub async fn trigger_callback(credential_id: Uuid, ctx: Arc<StepContext>) -> Result<StepOutcome> {
    let credential = load_credential(&ctx, credential_id).await?;
    let callback_url = credential
        .callback_url
        .as_deref()
        .ok_or_else(|| IssuerError::Conflict("CallbackUrl must be set".to_string()))?;

    let data = IssuerResponseData {
        bpn: credential.bpnl.clone(),
        status: IssuerResponseStatus::Successful,
        message: Some(CALLBACK_SUCCESS_MESSAGE.to_string()),
    };
    ctx.callbacks.trigger_callback(callback_url, &data).await?;

    Ok(StepOutcome::done(None))
}
