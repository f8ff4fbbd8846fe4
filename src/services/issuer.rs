use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::CredentialTypeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBpnCredentialRequest {
    pub holder: String,
    pub business_partner_number: String,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMembershipCredentialRequest {
    pub holder: String,
    pub holder_bpn: String,
    pub member_of: String,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFrameworkCredentialRequest {
    pub holder: String,
    pub holder_bpn: String,
    pub credential_type: CredentialTypeId,
    pub use_case_framework_version_id: Uuid,
    pub callback_url: Option<String>,
}

/// Issuer business logic creating new credential requests.
///
/// `supersedes` names the credential the new one replaces; implementations
/// record it on the new credential so its creation process can revoke it.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn create_bpn_credential(
        &self,
        request: CreateBpnCredentialRequest,
        supersedes: Uuid,
    ) -> Result<Uuid>;

    async fn create_membership_credential(
        &self,
        request: CreateMembershipCredentialRequest,
        supersedes: Uuid,
    ) -> Result<Uuid>;

    async fn create_framework_credential(
        &self,
        request: CreateFrameworkCredentialRequest,
        supersedes: Uuid,
    ) -> Result<Uuid>;
}
