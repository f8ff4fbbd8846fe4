#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Issuer Core
//!
//! Credential lifecycle process engine for a self-sovereign identity credential issuer.
//!
//! ## Overview
//!
//! Every credential request, expiry and replacement is driven by a persisted
//! process made of typed steps. A polling worker picks up processes with
//! pending steps, runs the matching handler against the wallet, notification
//! and callback services, and commits each outcome atomically together with
//! the credential changes it implies.
//!
//! ## Key Features
//!
//! - **Durable step state**: `TODO` steps survive restarts and are retried
//!   until they are finalised
//! - **Optimistic concurrency**: every write checks and regenerates the process
//!   version; steps touching a second credential also take the process lock
//! - **Retrigger steps**: failed steps are re-run on operator request through
//!   a companion step type
//! - **Batch services**: expiry notifications and declines, plus reissuance of
//!   credentials about to expire
//!
//! ## Module Organization
//!
//! - [`state_machine`] - process, step and status identifiers and the retrigger table
//! - [`models`] - process records and credential entities
//! - [`database`] - the process store seam and its PostgreSQL implementation
//! - [`services`] - wallet, notification, callback and issuer collaborators
//! - [`orchestration`] - step handlers, executors and the process worker
//! - [`credentials`] - expiry check and reissuance batch services
//! - [`config`] - layered TOML configuration
//! - [`logging`] - structured logging setup
//! - [`error`] - structured error handling
//! - [`test_helpers`] - in-memory store and service fakes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use issuer_core::config::ConfigManager;
//! use issuer_core::database::{DatabaseConnection, PgCredentialRepository, PgProcessStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let connection = DatabaseConnection::connect(&manager.config().database).await?;
//! let store = PgProcessStore::new(connection.pool().clone());
//! let credentials = PgCredentialRepository::new(connection.pool().clone());
//! # let _ = (store, credentials);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod services;
pub mod state_machine;
pub mod test_helpers;

pub use config::{ConfigManager, IssuerConfig};
pub use error::{IssuerError, Result};
pub use orchestration::{CancellationToken, ProcessWorker};
pub use state_machine::{ProcessStepStatusId, ProcessStepTypeId, ProcessTypeId};
