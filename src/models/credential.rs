//! # Credential Model
//!
//! Credential-side entities the process engine reads through
//! [`CredentialRepository`](crate::database::CredentialRepository) and mutates
//! only through [`CredentialChange`](crate::database::CredentialChange) values
//! committed by the process store.
//!
//! ## Database Schema
//!
//! Maps to `issuer.company_ssi_details` and `issuer.documents`:
//! ```sql
//! CREATE TABLE issuer.company_ssi_details (
//!   id UUID PRIMARY KEY,
//!   bpnl TEXT NOT NULL,
//!   issuer_bpn TEXT NOT NULL,
//!   verified_credential_type_id INTEGER NOT NULL,
//!   company_ssi_detail_status_id INTEGER NOT NULL,
//!   date_created TIMESTAMPTZ NOT NULL,
//!   creator_user_id UUID NOT NULL,
//!   expiry_date TIMESTAMPTZ,
//!   expiry_check_type_id INTEGER,
//!   process_id UUID,
//!   external_credential_id UUID,
//!   reissued_credential_id UUID,
//!   credential TEXT,
//!   -- ... other fields
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::error::IssuerError;

macro_rules! persisted_enum {
    ($name:ident, $what:literal { $($variant:ident = $id:literal => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            pub fn id(self) -> i32 {
                match self {
                    $(Self::$variant => $id),+
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<i32> for $name {
            type Error = IssuerError;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.id() == value)
                    .ok_or_else(|| IssuerError::InvalidArgument(format!(concat!("unknown ", $what, " id {}"), value)))
            }
        }
    };
}

persisted_enum!(CredentialTypeId, "credential type" {
    TraceabilityFramework = 1 => "TRACEABILITY_FRAMEWORK",
    PcfFramework = 2 => "PCF_FRAMEWORK",
    BehaviorTwinFramework = 3 => "BEHAVIOR_TWIN_FRAMEWORK",
    Membership = 4 => "MEMBERSHIP",
    CircularEconomy = 5 => "CIRCULAR_ECONOMY",
    FrameworkAgreementQuality = 6 => "FRAMEWORK_AGREEMENT_QUALITY",
    BusinessPartnerNumber = 7 => "BUSINESS_PARTNER_NUMBER",
    DemandAndCapacityManagement = 8 => "DEMAND_AND_CAPACITY_MANAGEMENT",
    DemandAndCapacityManagementPuris = 9 => "DEMAND_AND_CAPACITY_MANAGEMENT_PURIS",
    BusinessPartnerDataManagement = 10 => "BUSINESS_PARTNER_DATA_MANAGEMENT",
    FrameworkAgreement = 11 => "FRAMEWORK_AGREEMENT",
    DataExchangeGovernanceCredential = 12 => "DATA_EXCHANGE_GOVERNANCE_CREDENTIAL",
});

persisted_enum!(CredentialStatus, "credential status" {
    Pending = 1 => "PENDING",
    Active = 2 => "ACTIVE",
    Revoked = 3 => "REVOKED",
    Inactive = 4 => "INACTIVE",
});

persisted_enum!(DocumentStatus, "document status" {
    Pending = 1 => "PENDING",
    Active = 2 => "ACTIVE",
    Inactive = 3 => "INACTIVE",
});

persisted_enum!(ExpiryCheckType, "expiry check type" {
    OneMonth = 1 => "ONE_MONTH",
    TwoWeeks = 2 => "TWO_WEEKS",
    OneDay = 3 => "ONE_DAY",
});

persisted_enum!(NotificationTypeId, "notification type" {
    CredentialApproval = 1 => "CREDENTIAL_APPROVAL",
    CredentialRejected = 2 => "CREDENTIAL_REJECTED",
    CredentialExpiry = 3 => "CREDENTIAL_EXPIRY",
    CredentialRenewal = 4 => "CREDENTIAL_RENEWAL",
});

/// How a credential type is requested and reissued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialKind {
    Bpn,
    Membership,
    Framework,
}

impl CredentialTypeId {
    pub fn kind(self) -> CredentialKind {
        match self {
            Self::BusinessPartnerNumber => CredentialKind::Bpn,
            Self::Membership => CredentialKind::Membership,
            _ => CredentialKind::Framework,
        }
    }

    /// Human readable name used in mails; retired types have none
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::TraceabilityFramework => Some("TraceabilityCredential"),
            Self::PcfFramework => Some("PcfCredential"),
            Self::BehaviorTwinFramework => Some("BehaviorTwinCredential"),
            Self::Membership => Some("MembershipCredential"),
            Self::CircularEconomy => Some("CircularEconomyCredential"),
            Self::FrameworkAgreementQuality => Some("QualityCredential"),
            Self::BusinessPartnerNumber => Some("BpnCredential"),
            Self::DemandAndCapacityManagement => Some("DemandCapacityCredential"),
            Self::FrameworkAgreement => Some("FrameworkAgreementCredential"),
            Self::DataExchangeGovernanceCredential => Some("DataExchangeGovernanceCredential"),
            Self::DemandAndCapacityManagementPuris | Self::BusinessPartnerDataManagement => None,
        }
    }
}

/// Full credential record as held by the credential tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    /// Company the credential is issued to
    pub bpnl: String,
    pub issuer_bpn: String,
    pub type_id: CredentialTypeId,
    pub status: CredentialStatus,
    /// Creator of the request; free text in legacy rows, a user id otherwise
    pub requester_id: String,
    pub date_created: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub expiry_check_type: Option<ExpiryCheckType>,
    pub detail_version: Option<String>,
    pub detail_version_id: Option<Uuid>,
    pub detail_version_expiry: Option<DateTime<Utc>>,
    pub external_credential_id: Option<Uuid>,
    pub process_id: Option<Uuid>,
    /// Older credential this one replaces
    pub superseded_credential_id: Option<Uuid>,
    /// Newer credential issued to replace this one
    pub reissued_credential_id: Option<Uuid>,
    pub schema: Option<serde_json::Value>,
    /// Signed credential as returned by the wallet
    pub credential: Option<String>,
    pub callback_url: Option<String>,
    pub documents: Vec<CredentialDocument>,
}

impl Credential {
    pub fn new(
        bpnl: impl Into<String>,
        issuer_bpn: impl Into<String>,
        type_id: CredentialTypeId,
        status: CredentialStatus,
        requester_id: impl Into<String>,
        date_created: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bpnl: bpnl.into(),
            issuer_bpn: issuer_bpn.into(),
            type_id,
            status,
            requester_id: requester_id.into(),
            date_created,
            expiry_date: None,
            expiry_check_type: None,
            detail_version: None,
            detail_version_id: None,
            detail_version_expiry: None,
            external_credential_id: None,
            process_id: None,
            superseded_credential_id: None,
            reissued_credential_id: None,
            schema: None,
            credential: None,
            callback_url: None,
            documents: Vec::new(),
        }
    }

    pub fn holder_is_issuer(&self) -> bool {
        self.bpnl == self.issuer_bpn
    }

    /// The subject DID recorded in the stored schema
    pub fn subject_did(&self) -> Option<&str> {
        self.schema
            .as_ref()?
            .get("credentialSubject")?
            .get("id")?
            .as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialDocument {
    pub id: Uuid,
    pub name: String,
    pub status: DocumentStatus,
    pub content: serde_json::Value,
}

/// Which lifecycle action the expiry check selects for a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAction {
    Delete,
    Decline,
    Notify(ExpiryCheckType),
}

/// Cut-off dates evaluated by the expiry check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryThresholds {
    pub now: DateTime<Utc>,
    /// Inactive credentials created before this are removed
    pub inactive_vcs_to_delete: DateTime<Utc>,
    /// Active or inactive credentials that expired before this are removed
    pub expired_vcs_to_delete: DateTime<Utc>,
}

impl ExpiryThresholds {
    pub fn new(now: DateTime<Utc>, inactive_weeks: u32, expired_months: u32) -> Self {
        Self {
            now,
            inactive_vcs_to_delete: now - chrono::Duration::weeks(i64::from(inactive_weeks)),
            expired_vcs_to_delete: now
                .checked_sub_months(chrono::Months::new(expired_months))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Select the action for a credential, or `None` when it needs no attention
    pub fn evaluate(&self, credential: &Credential) -> Option<ExpiryAction> {
        use CredentialStatus::*;

        let expiry = credential.expiry_date;
        let is_delete = (credential.status == Inactive
            && credential.date_created < self.inactive_vcs_to_delete)
            || (matches!(credential.status, Active | Inactive)
                && expiry.is_some_and(|e| e < self.expired_vcs_to_delete));
        if is_delete {
            return Some(ExpiryAction::Delete);
        }

        let is_decline = credential.status == Pending
            && credential
                .detail_version_expiry
                .is_some_and(|e| e < self.now);
        if is_decline {
            return Some(ExpiryAction::Decline);
        }

        if credential.status != Active {
            return None;
        }
        let expiry = expiry?;
        let marker = credential.expiry_check_type;
        let one_day = self.now + chrono::Duration::days(1);
        let two_weeks = self.now + chrono::Duration::days(14);
        let two_months = self
            .now
            .checked_add_months(chrono::Months::new(2))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        if expiry <= one_day
            && matches!(
                marker,
                None | Some(ExpiryCheckType::OneMonth) | Some(ExpiryCheckType::TwoWeeks)
            )
        {
            Some(ExpiryAction::Notify(ExpiryCheckType::OneDay))
        } else if expiry > one_day
            && expiry <= two_weeks
            && matches!(marker, None | Some(ExpiryCheckType::OneMonth))
        {
            Some(ExpiryAction::Notify(ExpiryCheckType::TwoWeeks))
        } else if expiry > two_weeks && expiry <= two_months && marker.is_none() {
            Some(ExpiryAction::Notify(ExpiryCheckType::OneMonth))
        } else {
            None
        }
    }
}

/// Row shape of a credential joined with its detail version and reissuance links
#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub id: Uuid,
    pub bpnl: String,
    pub issuer_bpn: String,
    pub verified_credential_type_id: i32,
    pub company_ssi_detail_status_id: i32,
    pub creator_user_id: String,
    pub date_created: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub expiry_check_type_id: Option<i32>,
    pub detail_version: Option<String>,
    pub detail_version_id: Option<Uuid>,
    pub detail_version_expiry: Option<DateTime<Utc>>,
    pub external_credential_id: Option<Uuid>,
    pub process_id: Option<Uuid>,
    pub superseded_credential_id: Option<Uuid>,
    pub reissued_credential_id: Option<Uuid>,
    pub schema: Option<serde_json::Value>,
    pub credential: Option<String>,
    pub callback_url: Option<String>,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = IssuerError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            bpnl: row.bpnl,
            issuer_bpn: row.issuer_bpn,
            type_id: CredentialTypeId::try_from(row.verified_credential_type_id)?,
            status: CredentialStatus::try_from(row.company_ssi_detail_status_id)?,
            requester_id: row.creator_user_id,
            date_created: row.date_created,
            expiry_date: row.expiry_date,
            expiry_check_type: row
                .expiry_check_type_id
                .map(ExpiryCheckType::try_from)
                .transpose()?,
            detail_version: row.detail_version,
            detail_version_id: row.detail_version_id,
            detail_version_expiry: row.detail_version_expiry,
            external_credential_id: row.external_credential_id,
            process_id: row.process_id,
            superseded_credential_id: row.superseded_credential_id,
            reissued_credential_id: row.reissued_credential_id,
            schema: row.schema,
            credential: row.credential,
            callback_url: row.callback_url,
            documents: Vec::new(),
        })
    }
}

/// Row shape of `issuer.documents` assigned to a credential
#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub company_ssi_detail_id: Uuid,
    pub id: Uuid,
    pub document_name: String,
    pub document_status_id: i32,
    pub document_content: Vec<u8>,
}

impl TryFrom<DocumentRow> for CredentialDocument {
    type Error = IssuerError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.document_name,
            status: DocumentStatus::try_from(row.document_status_id)?,
            content: serde_json::from_slice(&row.document_content)?,
        })
    }
}
