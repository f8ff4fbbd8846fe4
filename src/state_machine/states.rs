use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IssuerError;

/// Workflow families driven by the process engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessTypeId {
    /// Signing, storing and delivering a new credential
    CreateCredential,
    /// Revoking a credential and informing its requester
    DeclineCredential,
}

impl ProcessTypeId {
    pub const ALL: [Self; 2] = [Self::CreateCredential, Self::DeclineCredential];

    /// Persisted numeric id
    pub fn id(self) -> i32 {
        match self {
            Self::CreateCredential => 1,
            Self::DeclineCredential => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateCredential => "CREATE_CREDENTIAL",
            Self::DeclineCredential => "DECLINE_CREDENTIAL",
        }
    }
}

impl fmt::Display for ProcessTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessTypeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid process type: {s}"))
    }
}

impl TryFrom<i32> for ProcessTypeId {
    type Error = IssuerError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|t| t.id() == value)
            .ok_or_else(|| IssuerError::InvalidArgument(format!("unknown process type id {value}")))
    }
}

/// Every step type known to the engine, forward steps and their retrigger companions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStepTypeId {
    CreateSignedCredential,
    SaveCredentialDocument,
    OfferCredentialToHolder,
    TriggerCallback,
    RevokeReissuedCredential,
    RevokeSupersededCredential,
    RetriggerCreateSignedCredential,
    RetriggerSaveCredentialDocument,
    RetriggerOfferCredentialToHolder,
    RetriggerTriggerCallback,
    RetriggerRevokeReissuedCredential,
    RetriggerRevokeSupersededCredential,
    RevokeCredential,
    TriggerNotification,
    TriggerMail,
    RetriggerRevokeCredential,
    RetriggerTriggerNotification,
    RetriggerTriggerMail,
}

impl ProcessStepTypeId {
    pub const ALL: [Self; 18] = [
        Self::CreateSignedCredential,
        Self::SaveCredentialDocument,
        Self::OfferCredentialToHolder,
        Self::TriggerCallback,
        Self::RevokeReissuedCredential,
        Self::RevokeSupersededCredential,
        Self::RetriggerCreateSignedCredential,
        Self::RetriggerSaveCredentialDocument,
        Self::RetriggerOfferCredentialToHolder,
        Self::RetriggerTriggerCallback,
        Self::RetriggerRevokeReissuedCredential,
        Self::RetriggerRevokeSupersededCredential,
        Self::RevokeCredential,
        Self::TriggerNotification,
        Self::TriggerMail,
        Self::RetriggerRevokeCredential,
        Self::RetriggerTriggerNotification,
        Self::RetriggerTriggerMail,
    ];

    /// Persisted numeric id
    pub fn id(self) -> i32 {
        match self {
            Self::CreateSignedCredential => 1,
            Self::SaveCredentialDocument => 3,
            Self::OfferCredentialToHolder => 4,
            Self::TriggerCallback => 5,
            Self::RetriggerCreateSignedCredential => 6,
            Self::RetriggerSaveCredentialDocument => 7,
            Self::RetriggerOfferCredentialToHolder => 8,
            Self::RetriggerTriggerCallback => 9,
            Self::RevokeReissuedCredential => 10,
            Self::RevokeSupersededCredential => 11,
            Self::RetriggerRevokeReissuedCredential => 12,
            Self::RetriggerRevokeSupersededCredential => 13,
            Self::RevokeCredential => 100,
            Self::TriggerNotification => 101,
            Self::TriggerMail => 102,
            Self::RetriggerRevokeCredential => 103,
            Self::RetriggerTriggerNotification => 104,
            Self::RetriggerTriggerMail => 105,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateSignedCredential => "CREATE_SIGNED_CREDENTIAL",
            Self::SaveCredentialDocument => "SAVE_CREDENTIAL_DOCUMENT",
            Self::OfferCredentialToHolder => "OFFER_CREDENTIAL_TO_HOLDER",
            Self::TriggerCallback => "TRIGGER_CALLBACK",
            Self::RevokeReissuedCredential => "REVOKE_REISSUED_CREDENTIAL",
            Self::RevokeSupersededCredential => "REVOKE_SUPERSEDED_CREDENTIAL",
            Self::RetriggerCreateSignedCredential => "RETRIGGER_CREATE_SIGNED_CREDENTIAL",
            Self::RetriggerSaveCredentialDocument => "RETRIGGER_SAVE_CREDENTIAL_DOCUMENT",
            Self::RetriggerOfferCredentialToHolder => "RETRIGGER_OFFER_CREDENTIAL_TO_HOLDER",
            Self::RetriggerTriggerCallback => "RETRIGGER_TRIGGER_CALLBACK",
            Self::RetriggerRevokeReissuedCredential => "RETRIGGER_REVOKE_REISSUED_CREDENTIAL",
            Self::RetriggerRevokeSupersededCredential => "RETRIGGER_REVOKE_SUPERSEDED_CREDENTIAL",
            Self::RevokeCredential => "REVOKE_CREDENTIAL",
            Self::TriggerNotification => "TRIGGER_NOTIFICATION",
            Self::TriggerMail => "TRIGGER_MAIL",
            Self::RetriggerRevokeCredential => "RETRIGGER_REVOKE_CREDENTIAL",
            Self::RetriggerTriggerNotification => "RETRIGGER_TRIGGER_NOTIFICATION",
            Self::RetriggerTriggerMail => "RETRIGGER_TRIGGER_MAIL",
        }
    }
}

impl fmt::Display for ProcessStepTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessStepTypeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid process step type: {s}"))
    }
}

impl TryFrom<i32> for ProcessStepTypeId {
    type Error = IssuerError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::ALL.into_iter().find(|t| t.id() == value).ok_or_else(|| {
            IssuerError::InvalidArgument(format!("unknown process step type id {value}"))
        })
    }
}

/// Step status. Steps are created `Todo` and only ever move out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStepStatusId {
    Todo,
    Done,
    Skipped,
    Failed,
    Duplicate,
}

impl ProcessStepStatusId {
    pub const ALL: [Self; 5] = [
        Self::Todo,
        Self::Done,
        Self::Skipped,
        Self::Failed,
        Self::Duplicate,
    ];

    pub fn id(self) -> i32 {
        match self {
            Self::Todo => 1,
            Self::Done => 2,
            Self::Skipped => 3,
            Self::Failed => 4,
            Self::Duplicate => 5,
        }
    }

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Todo)
    }

    /// Whether a step may move from `self` to `next`
    pub fn can_transition_to(self, next: Self) -> bool {
        self == Self::Todo && next != Self::Todo
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::Done => "DONE",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
            Self::Duplicate => "DUPLICATE",
        }
    }
}

impl fmt::Display for ProcessStepStatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessStepStatusId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid process step status: {s}"))
    }
}

impl TryFrom<i32> for ProcessStepStatusId {
    type Error = IssuerError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::ALL.into_iter().find(|t| t.id() == value).ok_or_else(|| {
            IssuerError::InvalidArgument(format!("unknown process step status id {value}"))
        })
    }
}
