//! # Models
//!
//! Process engine records ([`core`]) and the credential-side entities the
//! step handlers work on ([`credential`]).

pub mod core;
pub mod credential;

pub use self::core::{NewProcessStep, Process, ProcessStep};
pub use credential::{
    Credential, CredentialDocument, CredentialKind, CredentialStatus, CredentialTypeId,
    DocumentStatus, ExpiryAction, ExpiryCheckType, ExpiryThresholds, NotificationTypeId,
};
