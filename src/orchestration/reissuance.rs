//! Reissuance step run inside the creation process of a replacement credential.
//!
//! When superseded credentials are revoked through a decline process, the
//! replacement's creation process opens that decline process itself and
//! links it to the superseded credential before continuing with the document.

use futures::FutureExt;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::creation::load_credential;
use super::executor::{NewProcess, StepContext, StepOutcome, StepRoute};
use crate::database::CredentialChange;
use crate::error::{IssuerError, Result};
use crate::models::Process;
use crate::state_machine::{ProcessStepTypeId, ProcessTypeId};

pub fn routes() -> Vec<StepRoute> {
    vec![StepRoute {
        step_type: ProcessStepTypeId::RevokeReissuedCredential,
        handler: |id, ctx| revoke_reissued_credential(id, ctx).boxed(),
        requires_lock: true,
    }]
}

pub async fn revoke_reissued_credential(
    credential_id: Uuid,
    ctx: Arc<StepContext>,
) -> Result<StepOutcome> {
    let credential = load_credential(&ctx, credential_id).await?;
    let superseded_id = credential.superseded_credential_id.ok_or_else(|| {
        IssuerError::Conflict("Id of the credential to revoke should always be set here".to_string())
    })?;
    let superseded = ctx
        .credentials
        .get_credential(superseded_id)
        .await?
        .ok_or_else(|| IssuerError::Conflict(format!("Credential {superseded_id} does not exist")))?;

    if let Some(linked_process) = superseded.process_id {
        let steps = ctx.processes.get_process_steps(linked_process).await?;
        if steps.iter().any(|step| step.is_pending()) {
            return Err(IssuerError::Conflict(format!(
                "credential {superseded_id} is already attached to active process {linked_process}"
            )));
        }
    }

    let process = Process::new(ProcessTypeId::DeclineCredential);
    let process_id = process.id;
    info!(
        credential_id = %credential_id,
        superseded_credential_id = %superseded_id,
        decline_process_id = %process_id,
        "Opening decline process for superseded credential"
    );

    Ok(
        StepOutcome::done(Some(vec![ProcessStepTypeId::SaveCredentialDocument]))
            .with_process(NewProcess {
                process,
                step_types: vec![ProcessStepTypeId::RevokeCredential],
            })
            .with_change(CredentialChange::LinkProcess {
                credential_id: superseded_id,
                expected: superseded.process_id,
                process_id,
            }),
    )
}
