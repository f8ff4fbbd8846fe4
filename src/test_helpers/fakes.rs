//! Recording fakes for the external services.
//!
//! Every fake records its calls and can be told to fail the next calls with a
//! given error.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{IssuerError, Result};
use crate::models::NotificationTypeId;
use crate::services::{
    CallbackService, CreateBpnCredentialRequest, CreateFrameworkCredentialRequest,
    CreateMembershipCredentialRequest, CreatedCredential, CredentialIssuer, IssuerResponseData,
    MailParameter, NotificationService, WalletService,
};

#[derive(Debug, Default)]
struct Failure(Mutex<Option<IssuerError>>);

impl Failure {
    fn set(&self, error: IssuerError) {
        *self.0.lock() = Some(error);
    }

    fn clear(&self) {
        *self.0.lock() = None;
    }

    fn check(&self) -> Result<()> {
        match self.0.lock().as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalletCall {
    CreateSignedCredential(Value),
    GetCredential(Uuid),
    OfferCredentialToHolder {
        external_credential_id: Uuid,
        credential_json: String,
    },
    RevokeCredential(Uuid),
}

#[derive(Debug, Default)]
pub struct RecordingWallet {
    calls: Mutex<Vec<WalletCall>>,
    failure: Failure,
}

impl RecordingWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: IssuerError) {
        self.failure.set(error);
    }

    pub fn succeed(&self) {
        self.failure.clear();
    }

    pub fn calls(&self) -> Vec<WalletCall> {
        self.calls.lock().clone()
    }

    pub fn revoked(&self) -> Vec<Uuid> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                WalletCall::RevokeCredential(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: WalletCall) -> Result<()> {
        self.failure.check()?;
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl WalletService for RecordingWallet {
    async fn create_signed_credential(&self, schema: &Value) -> Result<CreatedCredential> {
        self.record(WalletCall::CreateSignedCredential(schema.clone()))?;
        Ok(CreatedCredential {
            external_credential_id: Uuid::new_v4(),
        })
    }

    async fn get_credential(&self, external_credential_id: Uuid) -> Result<Value> {
        self.record(WalletCall::GetCredential(external_credential_id))?;
        Ok(json!({
            "id": external_credential_id,
            "type": ["VerifiableCredential"],
            "proof": { "type": "JsonWebSignature2020" }
        }))
    }

    async fn offer_credential_to_holder(
        &self,
        external_credential_id: Uuid,
        credential_json: &str,
    ) -> Result<()> {
        self.record(WalletCall::OfferCredentialToHolder {
            external_credential_id,
            credential_json: credential_json.to_string(),
        })
    }

    async fn revoke_credential(&self, external_credential_id: Uuid) -> Result<()> {
        self.record(WalletCall::RevokeCredential(external_credential_id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub content: Value,
    pub recipient: Uuid,
    pub category: NotificationTypeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub template: String,
    pub recipient: Uuid,
    pub parameters: Vec<MailParameter>,
}

impl SentMail {
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|parameter| parameter.key == key)
            .map(|parameter| parameter.value.as_str())
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifications {
    notifications: Mutex<Vec<SentNotification>>,
    mails: Mutex<Vec<SentMail>>,
    failure: Failure,
}

impl RecordingNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: IssuerError) {
        self.failure.set(error);
    }

    pub fn succeed(&self) {
        self.failure.clear();
    }

    pub fn notifications(&self) -> Vec<SentNotification> {
        self.notifications.lock().clone()
    }

    pub fn mails(&self) -> Vec<SentMail> {
        self.mails.lock().clone()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifications {
    async fn add_notification(
        &self,
        content: &str,
        recipient: Uuid,
        category: NotificationTypeId,
    ) -> Result<()> {
        self.failure.check()?;
        self.notifications.lock().push(SentNotification {
            content: serde_json::from_str(content)?,
            recipient,
            category,
        });
        Ok(())
    }

    async fn trigger_mail(
        &self,
        template: &str,
        recipient: Uuid,
        parameters: &[MailParameter],
    ) -> Result<()> {
        self.failure.check()?;
        self.mails.lock().push(SentMail {
            template: template.to_string(),
            recipient,
            parameters: parameters.to_vec(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    calls: Mutex<Vec<(String, IssuerResponseData)>>,
    failure: Failure,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: IssuerError) {
        self.failure.set(error);
    }

    pub fn calls(&self) -> Vec<(String, IssuerResponseData)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CallbackService for RecordingCallbacks {
    async fn trigger_callback(&self, callback_url: &str, data: &IssuerResponseData) -> Result<()> {
        self.failure.check()?;
        self.calls
            .lock()
            .push((callback_url.to_string(), data.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IssuedRequest {
    Bpn(CreateBpnCredentialRequest),
    Membership(CreateMembershipCredentialRequest),
    Framework(CreateFrameworkCredentialRequest),
}

/// Issuer fake answering every request with a fresh credential id
#[derive(Debug, Default)]
pub struct RecordingIssuer {
    requests: Mutex<Vec<(IssuedRequest, Uuid, Uuid)>>,
    failure: Failure,
}

impl RecordingIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: IssuerError) {
        self.failure.set(error);
    }

    /// `(request, superseded credential, created credential)` in call order
    pub fn requests(&self) -> Vec<(IssuedRequest, Uuid, Uuid)> {
        self.requests.lock().clone()
    }

    fn record(&self, request: IssuedRequest, supersedes: Uuid) -> Result<Uuid> {
        self.failure.check()?;
        let created = Uuid::new_v4();
        self.requests.lock().push((request, supersedes, created));
        Ok(created)
    }
}

#[async_trait]
impl CredentialIssuer for RecordingIssuer {
    async fn create_bpn_credential(
        &self,
        request: CreateBpnCredentialRequest,
        supersedes: Uuid,
    ) -> Result<Uuid> {
        self.record(IssuedRequest::Bpn(request), supersedes)
    }

    async fn create_membership_credential(
        &self,
        request: CreateMembershipCredentialRequest,
        supersedes: Uuid,
    ) -> Result<Uuid> {
        self.record(IssuedRequest::Membership(request), supersedes)
    }

    async fn create_framework_credential(
        &self,
        request: CreateFrameworkCredentialRequest,
        supersedes: Uuid,
    ) -> Result<Uuid> {
        self.record(IssuedRequest::Framework(request), supersedes)
    }
}
