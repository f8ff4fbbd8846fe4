//! # Database Operations
//!
//! Persistence seams of the process engine.
//!
//! ## Key Components
//!
//! - [`process_store`] - the [`ProcessStore`] trait and the [`ChangeSet`] it commits
//! - [`pg_process_store`] - PostgreSQL implementation on the `issuer` schema
//! - [`credential_repository`] - read access to credential records
//! - [`pg_credential_repository`] - PostgreSQL implementation of the read side
//! - [`connection`] - pool construction from configuration

pub mod connection;
pub mod credential_repository;
pub mod pg_credential_repository;
pub mod pg_process_store;
pub mod process_store;

pub use connection::DatabaseConnection;
pub use credential_repository::CredentialRepository;
pub use pg_credential_repository::PgCredentialRepository;
pub use pg_process_store::PgProcessStore;
pub use process_store::{
    ChangeSet, CredentialChange, ProcessStore, SavedChanges, StepModification, VerifyProcessData,
};
