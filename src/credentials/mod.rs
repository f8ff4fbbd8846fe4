//! # Credential Batch Services
//!
//! Jobs run outside the process worker: the expiry sweep and the reissuance
//! of credentials about to expire, plus `did:web` resolution used to address
//! holders.

pub mod did;
pub mod expiry_check;
pub mod reissuance;

pub use did::{did_to_document_url, ParsedDid};
pub use expiry_check::{ExpiryCheckService, ExpiryCheckSummary};
pub use reissuance::{ReissuanceService, ReissuanceSummary};
