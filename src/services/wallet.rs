use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Credential signed and held by the issuer wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedCredential {
    pub external_credential_id: Uuid,
}

/// Issuer wallet. Revocation of an already revoked credential must succeed.
#[async_trait]
pub trait WalletService: Send + Sync {
    async fn create_signed_credential(&self, schema: &serde_json::Value)
        -> Result<CreatedCredential>;

    /// The signed artefact of a credential created earlier
    async fn get_credential(&self, external_credential_id: Uuid) -> Result<serde_json::Value>;

    async fn offer_credential_to_holder(
        &self,
        external_credential_id: Uuid,
        credential_json: &str,
    ) -> Result<()>;

    async fn revoke_credential(&self, external_credential_id: Uuid) -> Result<()>;
}
