//! # Retrigger Table
//!
//! Bidirectional mapping between every forward step type and the retrigger
//! companion an operator schedules to re-run it after a failure.
//!
//! The table is built once and validated on first access: every forward type
//! and every retrigger type appears exactly once, no type plays both roles and
//! every [`ProcessStepTypeId`] is covered. Lookups of values outside the table
//! return an error.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use super::states::{ProcessStepTypeId, ProcessTypeId};
use crate::error::{IssuerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetriggerEntry {
    pub process_type: ProcessTypeId,
    pub step: ProcessStepTypeId,
    pub retrigger: ProcessStepTypeId,
}

const fn entry(
    process_type: ProcessTypeId,
    step: ProcessStepTypeId,
    retrigger: ProcessStepTypeId,
) -> RetriggerEntry {
    RetriggerEntry {
        process_type,
        step,
        retrigger,
    }
}

pub const RETRIGGER_ENTRIES: [RetriggerEntry; 9] = {
    use ProcessStepTypeId::*;
    use ProcessTypeId::*;
    [
        entry(CreateCredential, CreateSignedCredential, RetriggerCreateSignedCredential),
        entry(CreateCredential, SaveCredentialDocument, RetriggerSaveCredentialDocument),
        entry(CreateCredential, OfferCredentialToHolder, RetriggerOfferCredentialToHolder),
        entry(CreateCredential, TriggerCallback, RetriggerTriggerCallback),
        entry(CreateCredential, RevokeReissuedCredential, RetriggerRevokeReissuedCredential),
        entry(CreateCredential, RevokeSupersededCredential, RetriggerRevokeSupersededCredential),
        entry(DeclineCredential, RevokeCredential, RetriggerRevokeCredential),
        entry(DeclineCredential, TriggerNotification, RetriggerTriggerNotification),
        entry(DeclineCredential, TriggerMail, RetriggerTriggerMail),
    ]
};

#[derive(Debug, Clone)]
pub struct RetriggerTable {
    by_step: HashMap<ProcessStepTypeId, RetriggerEntry>,
    by_retrigger: HashMap<ProcessStepTypeId, RetriggerEntry>,
}

static RETRIGGER_TABLE: OnceLock<Result<RetriggerTable>> = OnceLock::new();

impl RetriggerTable {
    /// Build and validate a table from its entries
    pub fn build(entries: &[RetriggerEntry]) -> Result<Self> {
        let mut by_step = HashMap::with_capacity(entries.len());
        let mut by_retrigger = HashMap::with_capacity(entries.len());

        for entry in entries {
            if by_step.insert(entry.step, *entry).is_some() {
                return Err(IssuerError::Configuration(format!(
                    "step type {} has more than one retrigger companion",
                    entry.step
                )));
            }
            if by_retrigger.insert(entry.retrigger, *entry).is_some() {
                return Err(IssuerError::Configuration(format!(
                    "retrigger step type {} is mapped more than once",
                    entry.retrigger
                )));
            }
        }

        if let Some(both) = by_step.keys().find(|step| by_retrigger.contains_key(*step)) {
            return Err(IssuerError::Configuration(format!(
                "step type {both} is both a forward and a retrigger step"
            )));
        }

        let covered: HashSet<ProcessStepTypeId> =
            by_step.keys().chain(by_retrigger.keys()).copied().collect();
        if let Some(missing) = ProcessStepTypeId::ALL
            .into_iter()
            .find(|step| !covered.contains(step))
        {
            return Err(IssuerError::Configuration(format!(
                "step type {missing} is not covered by the retrigger table"
            )));
        }

        Ok(Self {
            by_step,
            by_retrigger,
        })
    }

    /// The process-wide table, validated on first access
    pub fn global() -> Result<&'static RetriggerTable> {
        RETRIGGER_TABLE
            .get_or_init(|| Self::build(&RETRIGGER_ENTRIES))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn retrigger_step(&self, step: ProcessStepTypeId) -> Result<ProcessStepTypeId> {
        self.by_step
            .get(&step)
            .map(|entry| entry.retrigger)
            .ok_or_else(|| {
                IssuerError::InvalidArgument(format!("{step} has no retrigger companion"))
            })
    }

    pub fn retrigger_target(
        &self,
        retrigger: ProcessStepTypeId,
    ) -> Result<(ProcessTypeId, ProcessStepTypeId)> {
        self.by_retrigger
            .get(&retrigger)
            .map(|entry| (entry.process_type, entry.step))
            .ok_or_else(|| {
                IssuerError::InvalidArgument(format!("{retrigger} is not a retrigger step"))
            })
    }

    /// Number of forward/retrigger pairs
    pub fn len(&self) -> usize {
        self.by_step.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_step.is_empty()
    }

    pub fn is_retrigger(&self, step: ProcessStepTypeId) -> bool {
        self.by_retrigger.contains_key(&step)
    }

    /// Process type owning a forward or retrigger step
    pub fn process_type_of(&self, step: ProcessStepTypeId) -> Result<ProcessTypeId> {
        self.by_step
            .get(&step)
            .or_else(|| self.by_retrigger.get(&step))
            .map(|entry| entry.process_type)
            .ok_or_else(|| IssuerError::InvalidArgument(format!("unknown step type {step}")))
    }

    /// Retrigger companions of the given forward steps
    pub fn retrigger_steps_for(&self, steps: &[ProcessStepTypeId]) -> Vec<ProcessStepTypeId> {
        steps
            .iter()
            .filter_map(|step| self.by_step.get(step).map(|entry| entry.retrigger))
            .collect()
    }
}

pub fn retrigger_step(step: ProcessStepTypeId) -> Result<ProcessStepTypeId> {
    RetriggerTable::global()?.retrigger_step(step)
}

pub fn retrigger_target(retrigger: ProcessStepTypeId) -> Result<(ProcessTypeId, ProcessStepTypeId)> {
    RetriggerTable::global()?.retrigger_target(retrigger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_global_table_is_valid() {
        assert!(RetriggerTable::global().is_ok());
    }

    #[test]
    fn test_forward_and_retrigger_are_inverse() {
        let table = RetriggerTable::global().unwrap();
        for entry in RETRIGGER_ENTRIES {
            let retrigger = table.retrigger_step(entry.step).unwrap();
            assert_eq!(
                table.retrigger_target(retrigger).unwrap(),
                (entry.process_type, entry.step)
            );
            assert!(table.is_retrigger(retrigger));
            assert!(!table.is_retrigger(entry.step));
        }
    }

    #[test]
    fn test_out_of_domain_values_are_rejected() {
        let table = RetriggerTable::global().unwrap();
        assert!(table
            .retrigger_step(ProcessStepTypeId::RetriggerTriggerMail)
            .is_err());
        assert!(table
            .retrigger_target(ProcessStepTypeId::TriggerMail)
            .is_err());
    }

    #[test]
    fn test_duplicate_entries_fail_validation() {
        let mut entries = RETRIGGER_ENTRIES.to_vec();
        entries.push(entries[0]);
        assert!(matches!(
            RetriggerTable::build(&entries),
            Err(IssuerError::Configuration(_))
        ));
    }

    #[test]
    fn test_incomplete_table_fails_validation() {
        let entries = &RETRIGGER_ENTRIES[..8];
        let err = RetriggerTable::build(entries).unwrap_err();
        assert!(err.to_string().contains("TRIGGER_MAIL"));
    }

    #[test]
    fn test_overlapping_roles_fail_validation() {
        let mut entries = RETRIGGER_ENTRIES.to_vec();
        entries[8].retrigger = ProcessStepTypeId::TriggerNotification;
        assert!(RetriggerTable::build(&entries).is_err());
    }

    proptest! {
        #[test]
        fn prop_every_step_type_has_exactly_one_role(index in 0usize..ProcessStepTypeId::ALL.len()) {
            let table = RetriggerTable::global().unwrap();
            let step = ProcessStepTypeId::ALL[index];
            let forward = table.retrigger_step(step).is_ok();
            let retrigger = table.retrigger_target(step).is_ok();
            prop_assert!(forward ^ retrigger);
            prop_assert!(table.process_type_of(step).is_ok());
        }
    }
}
