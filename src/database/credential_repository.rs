//! Read side of the credential tables.
//!
//! Writes never go through this trait; they are expressed as
//! [`CredentialChange`](super::CredentialChange) values and committed by the
//! [`ProcessStore`](super::ProcessStore).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Credential, ExpiryThresholds};

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn get_credential(&self, credential_id: Uuid) -> Result<Option<Credential>>;

    /// Credential currently linked to the process
    async fn get_credential_id_for_process(&self, process_id: Uuid) -> Result<Option<Uuid>>;

    /// Credentials the expiry check has to act on at `thresholds.now`
    async fn get_expiry_candidates(&self, thresholds: &ExpiryThresholds)
        -> Result<Vec<Credential>>;

    /// Active credentials expiring before `expires_before` without a reissued counterpart
    async fn get_credentials_to_reissue(
        &self,
        expires_before: DateTime<Utc>,
    ) -> Result<Vec<Credential>>;
}
