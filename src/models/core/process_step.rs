//! # Process Step Model
//!
//! One unit of work inside a [`Process`](super::process::Process).
//!
//! Maps to `issuer.process_steps`:
//! ```sql
//! CREATE TABLE issuer.process_steps (
//!   id UUID PRIMARY KEY,
//!   process_step_type_id INTEGER NOT NULL,
//!   process_step_status_id INTEGER NOT NULL,
//!   process_id UUID NOT NULL REFERENCES issuer.processes (id),
//!   date_created TIMESTAMPTZ NOT NULL,
//!   date_last_changed TIMESTAMPTZ,
//!   message TEXT
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::IssuerError;
use crate::state_machine::{ProcessStepStatusId, ProcessStepTypeId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub id: Uuid,
    pub process_id: Uuid,
    pub step_type: ProcessStepTypeId,
    pub status: ProcessStepStatusId,
    pub date_created: DateTime<Utc>,
    pub date_last_changed: Option<DateTime<Utc>>,
    /// Outcome text of the last execution
    pub message: Option<String>,
}

impl ProcessStep {
    pub fn new(
        process_id: Uuid,
        step_type: ProcessStepTypeId,
        status: ProcessStepStatusId,
        date_created: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            process_id,
            step_type,
            status,
            date_created,
            date_last_changed: None,
            message: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProcessStepStatusId::Todo
    }
}

/// A step to be created by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewProcessStep {
    pub process_id: Uuid,
    pub step_type: ProcessStepTypeId,
    pub status: ProcessStepStatusId,
}

impl NewProcessStep {
    pub fn todo(process_id: Uuid, step_type: ProcessStepTypeId) -> Self {
        Self {
            process_id,
            step_type,
            status: ProcessStepStatusId::Todo,
        }
    }
}

/// Row shape of `issuer.process_steps`
#[derive(Debug, Clone, FromRow)]
pub struct ProcessStepRow {
    pub id: Uuid,
    pub process_id: Uuid,
    pub process_step_type_id: i32,
    pub process_step_status_id: i32,
    pub date_created: DateTime<Utc>,
    pub date_last_changed: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl TryFrom<ProcessStepRow> for ProcessStep {
    type Error = IssuerError;

    fn try_from(row: ProcessStepRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            process_id: row.process_id,
            step_type: ProcessStepTypeId::try_from(row.process_step_type_id)?,
            status: ProcessStepStatusId::try_from(row.process_step_status_id)?,
            date_created: row.date_created,
            date_last_changed: row.date_last_changed,
            message: row.message,
        })
    }
}
