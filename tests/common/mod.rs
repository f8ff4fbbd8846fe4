//! Shared helpers for the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use issuer_core::config::LoggingConfig;
use issuer_core::logging::init_structured_logging;
use issuer_core::models::{CredentialDocument, DocumentStatus};
use issuer_core::orchestration::{CancellationToken, ProcessTypeExecutor, StepOutcome};
use issuer_core::state_machine::ProcessStepTypeId;
use issuer_core::test_helpers::SharedTestSetup;

pub fn setup() -> SharedTestSetup {
    init_structured_logging(&LoggingConfig::default());
    SharedTestSetup::new()
}

/// Run one step through an executor the way the worker does
pub async fn execute(
    executor: &dyn ProcessTypeExecutor,
    credential_id: Uuid,
    step_type: ProcessStepTypeId,
) -> StepOutcome {
    executor
        .execute_step(credential_id, step_type, &[step_type], &CancellationToken::new())
        .await
        .expect("step execution should produce an outcome")
}

pub fn active_document(name: &str) -> CredentialDocument {
    CredentialDocument {
        id: Uuid::new_v4(),
        name: name.to_string(),
        status: DocumentStatus::Active,
        content: serde_json::json!({ "signed": true }),
    }
}

pub fn in_hours(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    now + Duration::hours(hours)
}
