//! # Process Model
//!
//! A running instance of one workflow family.
//!
//! ## Overview
//!
//! A `Process` groups the steps of one credential workflow. Exclusive access
//! for steps that touch more than one credential is obtained through a lock
//! with an expiry; every write of the row regenerates `version`, which the
//! store compares to detect concurrent modification.
//!
//! ## Database Schema
//!
//! Maps to `issuer.processes`:
//! ```sql
//! CREATE TABLE issuer.processes (
//!   id UUID PRIMARY KEY,
//!   process_type_id INTEGER NOT NULL,
//!   lock_expiry_date TIMESTAMPTZ,
//!   version UUID NOT NULL
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::IssuerError;
use crate::state_machine::ProcessTypeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: Uuid,
    pub process_type_id: ProcessTypeId,
    pub lock_expiry_date: Option<DateTime<Utc>>,
    /// Concurrency token, regenerated on every write
    pub version: Uuid,
}

impl Process {
    pub fn new(process_type_id: ProcessTypeId) -> Self {
        Self::with_id(Uuid::new_v4(), process_type_id)
    }

    pub fn with_id(id: Uuid, process_type_id: ProcessTypeId) -> Self {
        Self {
            id,
            process_type_id,
            lock_expiry_date: None,
            version: Uuid::new_v4(),
        }
    }

    /// Locked means a lock is set and has not yet expired
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_expiry_date.is_some_and(|expiry| expiry > now)
    }

    /// Take the lock when free or expired
    pub fn try_lock(&mut self, lock_expiry_date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.is_locked(now) {
            return false;
        }
        self.lock_expiry_date = Some(lock_expiry_date);
        self.update_version();
        true
    }

    /// Clear the lock; `false` when nothing was held
    pub fn release_lock(&mut self) -> bool {
        if self.lock_expiry_date.take().is_none() {
            return false;
        }
        self.update_version();
        true
    }

    pub fn update_version(&mut self) {
        self.version = Uuid::new_v4();
    }
}

/// Row shape of `issuer.processes`
#[derive(Debug, Clone, FromRow)]
pub struct ProcessRow {
    pub id: Uuid,
    pub process_type_id: i32,
    pub lock_expiry_date: Option<DateTime<Utc>>,
    pub version: Uuid,
}

impl TryFrom<ProcessRow> for Process {
    type Error = IssuerError;

    fn try_from(row: ProcessRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            process_type_id: ProcessTypeId::try_from(row.process_type_id)?,
            lock_expiry_date: row.lock_expiry_date,
            version: row.version,
        })
    }
}
