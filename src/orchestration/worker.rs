//! # Process Worker
//!
//! Polls the store for processes with due steps and drives them forward.
//!
//! ## Activation
//!
//! Each active process is activated independently:
//!
//! 1. pending retrigger steps are executed first, scheduling their forward step
//! 2. the executor resolves the credential the process works on
//! 3. pending executable steps run in creation order; steps that require the
//!    process lock acquire it first, and a process locked by another worker is
//!    left for a later poll
//! 4. every step outcome is committed in one change set guarded by the process
//!    version; newly scheduled executable steps run in the same activation
//! 5. a held lock is released once at the end, bumping the version if the
//!    release fails
//!
//! Processes of one poll run concurrently up to `max_concurrent_processes`;
//! a failure in one activation is logged and does not affect the others.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::cancellation::CancellationToken;
use super::executor::{ProcessTypeExecutor, StepOutcome};
use super::manual::{collapse_duplicates, RetriggerService};
use crate::config::WorkerConfig;
use crate::database::{ChangeSet, ProcessStore, StepModification};
use crate::error::{IssuerError, Result};
use crate::logging::{log_error, log_step_outcome};
use crate::models::{NewProcessStep, Process, ProcessStep};
use crate::state_machine::{ProcessStepStatusId, ProcessStepTypeId, ProcessTypeId, RetriggerTable};

/// What one activation did, in execution order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivationSummary {
    pub retriggered: Vec<ProcessStepTypeId>,
    pub executed: Vec<(ProcessStepTypeId, ProcessStepStatusId)>,
    /// The process was locked by another worker and left for a later poll
    pub deferred: bool,
}

pub struct ProcessWorker {
    store: Arc<dyn ProcessStore>,
    executors: HashMap<ProcessTypeId, Arc<dyn ProcessTypeExecutor>>,
    retrigger: RetriggerService,
    table: &'static RetriggerTable,
    config: WorkerConfig,
}

impl ProcessWorker {
    /// Build a worker; fails when the retrigger table is inconsistent
    pub fn new(
        store: Arc<dyn ProcessStore>,
        executors: Vec<Arc<dyn ProcessTypeExecutor>>,
        config: WorkerConfig,
    ) -> Result<Self> {
        let table = RetriggerTable::global()?;
        let executors = executors
            .into_iter()
            .map(|executor| (executor.process_type_id(), executor))
            .collect();
        Ok(Self {
            retrigger: RetriggerService::new(Arc::clone(&store))?,
            store,
            executors,
            table,
            config,
        })
    }

    fn process_types(&self) -> Vec<ProcessTypeId> {
        ProcessTypeId::ALL
            .into_iter()
            .filter(|process_type| self.executors.contains_key(process_type))
            .collect()
    }

    /// Executable step types of every executor plus their retrigger companions
    fn polled_step_types(&self) -> Vec<ProcessStepTypeId> {
        let mut step_types = Vec::new();
        for process_type in self.process_types() {
            if let Some(executor) = self.executors.get(&process_type) {
                let executable = executor.executable_step_types();
                step_types.extend(self.table.retrigger_steps_for(&executable));
                step_types.extend(executable);
            }
        }
        step_types
    }

    /// Poll until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            process_types = ?self.process_types(),
            "Process worker started"
        );

        while !cancel.is_cancelled() {
            if let Err(err) = self.run_once(&cancel).await {
                log_error("process_worker", "poll", &err.to_string(), None);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!("Process worker stopped");
    }

    /// One poll: activate every due process; returns the number of processes found
    #[instrument(skip(self, cancel))]
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<usize> {
        let processes = self
            .store
            .get_active_processes(
                &self.process_types(),
                &self.polled_step_types(),
                Utc::now(),
                self.config.batch_size,
            )
            .await?;
        let found = processes.len();
        if found == 0 {
            debug!("No active processes");
            return Ok(0);
        }
        debug!(count = found, "Activating processes");

        stream::iter(processes)
            .for_each_concurrent(self.config.max_concurrent_processes, |process| async move {
                let process_id = process.id;
                match self.activate(process, cancel).await {
                    Ok(summary) => debug!(process_id = %process_id, summary = ?summary, "Process activation finished"),
                    Err(IssuerError::Cancelled) => debug!(process_id = %process_id, "Process activation cancelled"),
                    Err(err) => log_error(
                        "process_worker",
                        "activate",
                        &err.to_string(),
                        Some(&process_id.to_string()),
                    ),
                }
            })
            .await;

        Ok(found)
    }

    /// Drive one process as far as its pending steps allow
    #[instrument(skip(self, process, cancel), fields(process_id = %process.id, process_type = %process.process_type_id))]
    pub async fn activate(
        &self,
        mut process: Process,
        cancel: &CancellationToken,
    ) -> Result<ActivationSummary> {
        let executor = self
            .executors
            .get(&process.process_type_id)
            .cloned()
            .ok_or_else(|| {
                IssuerError::UnexpectedCondition(format!(
                    "no executor registered for process type {}",
                    process.process_type_id
                ))
            })?;
        let mut summary = ActivationSummary::default();
        let mut steps = self.store.get_process_steps(process.id).await?;

        let retriggers = distinct_pending(&steps, |step_type| self.table.is_retrigger(step_type));
        if !retriggers.is_empty() {
            for retrigger in &retriggers {
                if cancel.is_cancelled() {
                    return Err(IssuerError::Cancelled);
                }
                self.retrigger.execute_retrigger(process.id, *retrigger).await?;
                summary.retriggered.push(*retrigger);
            }
            process = self.store.get_process(process.id).await?.ok_or_else(|| {
                IssuerError::NotFound(format!("process {} does not exist", process.id))
            })?;
            steps = self.store.get_process_steps(process.id).await?;
        }

        let pending_types =
            distinct_pending(&steps, |step_type| executor.is_executable_step_type(step_type));
        if pending_types.is_empty() {
            return Ok(summary);
        }

        let credential_id = match executor.initialize(process.id, &pending_types).await {
            Ok(credential_id) => credential_id,
            Err(err) if err.is_engine_signal() => return Err(err),
            Err(err) => {
                warn!(error = %err, "Process initialization failed");
                self.finalize_after_initialize_failure(&process, &steps, &pending_types, &err)
                    .await?;
                let status = StepOutcome::from_error(&err).status;
                summary
                    .executed
                    .extend(pending_types.iter().map(|step_type| (*step_type, status)));
                return Ok(summary);
            }
        };

        let mut held_lock = false;
        let result = self
            .execute_pending(
                &mut process,
                &mut steps,
                credential_id,
                executor.as_ref(),
                pending_types,
                cancel,
                &mut held_lock,
                &mut summary,
            )
            .await;

        if held_lock && !self.store.release_lock(&mut process).await? {
            debug!("Lock release failed, bumping version");
            self.store.update_version(&mut process).await?;
        }

        result.map(|_| summary)
    }

    async fn finalize_after_initialize_failure(
        &self,
        process: &Process,
        steps: &[ProcessStep],
        pending_types: &[ProcessStepTypeId],
        err: &IssuerError,
    ) -> Result<()> {
        let outcome = StepOutcome::from_error(err);
        let mut changes = ChangeSet::new();
        changes.check_version(process);

        for step_type in pending_types {
            let of_type = steps
                .iter()
                .filter(|step| step.is_pending() && step.step_type == *step_type);
            changes
                .step_modifications
                .extend(step_modifications(of_type, &outcome));
        }

        self.store.save(changes).await.map(|_| ())
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_pending(
        &self,
        process: &mut Process,
        steps: &mut Vec<ProcessStep>,
        credential_id: Uuid,
        executor: &dyn ProcessTypeExecutor,
        pending_types: Vec<ProcessStepTypeId>,
        cancel: &CancellationToken,
        held_lock: &mut bool,
        summary: &mut ActivationSummary,
    ) -> Result<()> {
        let mut queue: VecDeque<ProcessStepTypeId> = pending_types.into();
        let mut executed: HashSet<ProcessStepTypeId> = HashSet::new();

        while let Some(step_type) = queue.pop_front() {
            if !executed.insert(step_type) {
                continue;
            }
            let pending_steps: Vec<ProcessStep> = steps
                .iter()
                .filter(|step| step.is_pending() && step.step_type == step_type)
                .cloned()
                .collect();
            if pending_steps.is_empty() {
                continue;
            }

            if executor.is_lock_required(step_type) && !*held_lock {
                let now = Utc::now();
                if process.is_locked(now) {
                    debug!(step_type = %step_type, "Process locked by another worker, deferring");
                    summary.deferred = true;
                    return Ok(());
                }
                let lock_expiry = now
                    + chrono::Duration::from_std(self.config.lock_duration()).map_err(|e| {
                        IssuerError::Configuration(format!("invalid lock duration: {e}"))
                    })?;
                if !self.store.try_lock(process, lock_expiry).await? {
                    debug!(
                        step_type = %step_type,
                        "Lock taken by another worker since the poll, deferring"
                    );
                    summary.deferred = true;
                    return Ok(());
                }
                *held_lock = true;
            }

            let still_pending = distinct_pending(steps, |t| executor.is_executable_step_type(t));
            let outcome = executor
                .execute_step(credential_id, step_type, &still_pending, cancel)
                .await?;

            if outcome.status == ProcessStepStatusId::Todo
                && !outcome.modified
                && outcome.next_step_types().is_empty()
                && outcome.credential_changes.is_empty()
                && outcome.new_processes.is_empty()
            {
                debug!(step_type = %step_type, "Step left untouched");
                continue;
            }

            let mut changes = ChangeSet::new();
            changes.check_version(process);
            changes
                .step_modifications
                .extend(step_modifications(&pending_steps, &outcome));

            if outcome.status != ProcessStepStatusId::Todo {
                for next in outcome.next_step_types() {
                    let already_pending = *next != step_type
                        && steps
                            .iter()
                            .any(|step| step.is_pending() && step.step_type == *next);
                    let already_added = changes.new_steps.iter().any(|s| s.step_type == *next);
                    if !already_pending && !already_added {
                        changes.add_step(NewProcessStep::todo(process.id, *next));
                    }
                }
            }
            for new_process in &outcome.new_processes {
                changes.add_process(new_process.process.clone());
                for new_step_type in &new_process.step_types {
                    changes.add_step(NewProcessStep::todo(new_process.process.id, *new_step_type));
                }
            }
            changes
                .credential_changes
                .extend(outcome.credential_changes.iter().cloned());

            let modifications = changes.step_modifications.clone();
            let saved = self.store.save(changes).await?;
            if let Some(version) = saved.process_versions.get(&process.id) {
                process.version = *version;
            }

            for modification in &modifications {
                if let Some(step) = steps.iter_mut().find(|step| step.id == modification.step_id) {
                    step.status = modification.status;
                    step.message = modification.message.clone();
                }
            }
            for created in saved.created_steps {
                if created.process_id != process.id {
                    continue;
                }
                if executor.is_executable_step_type(created.step_type)
                    && !queue.contains(&created.step_type)
                {
                    queue.push_back(created.step_type);
                }
                steps.push(created);
            }

            log_step_outcome(
                process.id,
                step_type,
                outcome.status,
                outcome.next_step_types(),
                outcome.message.as_deref(),
            );
            summary.executed.push((step_type, outcome.status));

            if outcome.status == ProcessStepStatusId::Todo {
                debug!(step_type = %step_type, "Step stays pending until the next poll");
            }
        }

        Ok(())
    }
}

/// Step writes for an outcome: a finalised status collapses duplicates, a
/// `TODO` outcome only records the message on the authoritative step
fn step_modifications<'a>(
    pending_steps: impl IntoIterator<Item = &'a ProcessStep>,
    outcome: &StepOutcome,
) -> Vec<StepModification> {
    if outcome.status != ProcessStepStatusId::Todo {
        return collapse_duplicates(pending_steps, outcome.status, outcome.message.as_deref());
    }
    pending_steps
        .into_iter()
        .find(|step| step.is_pending())
        .filter(|_| outcome.modified)
        .map(|step| StepModification {
            step_id: step.id,
            expected_status: Some(ProcessStepStatusId::Todo),
            status: ProcessStepStatusId::Todo,
            message: outcome.message.clone(),
        })
        .into_iter()
        .collect()
}

/// Distinct pending step types matching `filter`, in creation order
fn distinct_pending(
    steps: &[ProcessStep],
    filter: impl Fn(ProcessStepTypeId) -> bool,
) -> Vec<ProcessStepTypeId> {
    let mut ordered: Vec<&ProcessStep> = steps.iter().filter(|step| step.is_pending()).collect();
    ordered.sort_by_key(|step| step.date_created);

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .map(|step| step.step_type)
        .filter(|step_type| filter(*step_type) && seen.insert(*step_type))
        .collect()
}
