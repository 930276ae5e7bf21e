//! Saving an experiment into one row of a table.
//!
//! The row id is only known once the insert has come back, while the runner
//! may already be producing trials. Trials arriving before that are queued
//! and replayed in order once the row exists. If the row disappears later on,
//! it is re-created and the queue is replayed again.
//!
//! Trials are appended by reading the `trials` column, appending locally and
//! writing the whole list back. Two appends running at the same time can
//! therefore lose one of the trials; see [`RowManager::add_trial_data`].

use crate::{
    api::{
        error::StoreError,
        id::RowId,
        metadata::ExperimentMetadata,
        store::RowStore,
        trial::TrialData,
        TRIALS, UPDATED_AT,
    },
    tracking::{
        counter::OperationCounter, hooks::BackgroundWrites, new_record, Manager, ManagerError,
        ManagerOptions, Operation,
    },
};
use serde_json::{Map, Value};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

/// Automatic re-creations of a lost row before giving up.
pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
enum RowState {
    /// No row yet; trials wait for `initialize_experiment`.
    Uninitialized,
    /// The row was lost; the next trial re-creates it.
    Invalidated,
    Ready(RowId),
}

#[derive(Debug)]
struct Machine {
    state: RowState,
    pending: VecDeque<TrialData>,
    /// Overrides of the latest initialization, reused when re-creating.
    overrides: Map<String, Value>,
    /// An insert is in flight.
    initializing: bool,
    recoveries: u32,
}

struct Shared<S> {
    store: S,
    table: String,
    metadata: ExperimentMetadata,
    machine: Mutex<Machine>,
    operations: OperationCounter,
    background: BackgroundWrites,
}

/// Saves an experiment as one row, keeping the trials in a JSON column.
pub struct RowManager<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for RowManager<S> {
    fn clone(&self) -> Self {
        RowManager {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: RowStore + 'static> RowManager<S> {
    /// With `options.fixed_record_id` the manager writes to that row right
    /// away and never inserts one.
    pub fn new(store: S, options: ManagerOptions) -> Self {
        let state = match options.fixed_record_id {
            Some(id) => RowState::Ready(RowId::from(id)),
            None => RowState::Uninitialized,
        };
        RowManager {
            shared: Arc::new(Shared {
                store,
                table: options.collection,
                metadata: ExperimentMetadata::capture(options.metadata),
                machine: Mutex::new(Machine {
                    state,
                    pending: VecDeque::new(),
                    overrides: Map::new(),
                    initializing: false,
                    recoveries: 0,
                }),
                operations: OperationCounter::new(),
                background: BackgroundWrites::new(),
            }),
        }
    }

    /// The row currently written to, if any.
    pub fn row_id(&self) -> Option<RowId> {
        match &self.machine().state {
            RowState::Ready(id) => Some(id.clone()),
            _ => None,
        }
    }

    pub fn metadata(&self) -> &ExperimentMetadata {
        &self.shared.metadata
    }

    /// Creates the row, or refreshes its metadata if the row already exists.
    ///
    /// A fresh row is inserted with an empty trial list, after which every
    /// queued trial is replayed in order. A replayed trial that fails is
    /// logged and skipped.
    pub fn initialize_experiment(&self, overrides: Map<String, Value>) -> Result<(), ManagerError> {
        self.machine().recoveries = 0;
        self.initialize(overrides, false)
    }

    /// Saves one trial.
    ///
    /// Before the row exists the trial is queued and `Ok(())` is returned
    /// without any remote call.
    ///
    /// Otherwise the `trials` column is read, the trial appended and the list
    /// written back. Nothing guards the time between the read and the write:
    /// another append to the same row finishing in between is overwritten.
    pub fn add_trial_data(&self, trial: TrialData) -> Result<(), ManagerError> {
        let id = {
            let mut machine = self.machine();
            match machine.state.clone() {
                RowState::Ready(id) => id,
                RowState::Uninitialized => {
                    machine.pending.push_back(trial);
                    tracing::debug!(pending = machine.pending.len(), "row not created yet, trial queued");
                    return Ok(());
                }
                RowState::Invalidated => {
                    drop(machine);
                    return self.requeue_and_recover(None, trial);
                }
            }
        };
        let shared = &self.shared;

        let current = match shared.store.select_column(&shared.table, &id, TRIALS) {
            Ok(current) => current,
            Err(error) if error.indicates_missing_record() => {
                return self.requeue_and_recover(Some(&id), trial);
            }
            Err(error) => return Err(self.read_error(&id, error)),
        };
        let mut trials = match current {
            Value::Array(trials) => trials,
            Value::Null => Vec::new(),
            _ => return Err(ManagerError::MissingTrials(id.to_string())),
        };
        trials.push(trial.to_value()?);

        // Anything appended by someone else since the select is lost here.
        let mut changes = Map::new();
        changes.insert(TRIALS.to_owned(), Value::Array(trials));
        changes.insert(UPDATED_AT.to_owned(), Value::String(now()));
        match shared.store.update(&shared.table, &id, &changes) {
            Ok(()) => {
                shared.operations.record();
                self.machine().recoveries = 0;
                tracing::debug!(row = %id, trial_type = %trial.trial_type, "trial saved");
                Ok(())
            }
            Err(error) if error.indicates_missing_record() => self.requeue_and_recover(Some(&id), trial),
            Err(error) => Err(self.write_error(Operation::Update, error)),
        }
    }

    pub fn number_of_operations(&self) -> u64 {
        self.shared.operations.get()
    }

    /// Trials queued while no row is available.
    pub fn pending_trials(&self) -> usize {
        self.machine().pending.len()
    }

    /// `claimed` means the caller already set `initializing` for this insert.
    fn initialize(&self, overrides: Map<String, Value>, claimed: bool) -> Result<(), ManagerError> {
        let shared = &self.shared;
        let existing = {
            let mut machine = self.machine();
            machine.overrides = overrides.clone();
            match machine.state.clone() {
                RowState::Ready(id) => {
                    if claimed {
                        machine.initializing = false;
                    }
                    Some(id)
                }
                _ if claimed => None,
                _ if machine.initializing => {
                    // The insert in flight will drain the queue; the
                    // overrides apply to the next re-creation.
                    tracing::debug!(table = %shared.table, "row is being created already");
                    return Ok(());
                }
                _ => {
                    machine.initializing = true;
                    None
                }
            }
        };
        let metadata = shared.metadata.to_record();

        if let Some(id) = existing {
            let mut changes = new_record(&metadata, &overrides, None);
            changes.insert(UPDATED_AT.to_owned(), Value::String(now()));
            shared
                .store
                .update(&shared.table, &id, &changes)
                .map_err(|error| self.write_error(Operation::Update, error))?;
            shared.operations.record();
            tracing::info!(table = %shared.table, row = %id, "experiment row updated");
            return Ok(());
        }

        let row = new_record(&metadata, &overrides, Some(Value::Array(Vec::new())));
        let id = match shared.store.insert(&shared.table, &row) {
            Ok(id) => id,
            Err(error) => {
                self.machine().initializing = false;
                return Err(self.write_error(Operation::Insert, error));
            }
        };
        shared.operations.record();
        tracing::info!(table = %shared.table, row = %id, "experiment row created");

        let queued = {
            let mut machine = self.machine();
            machine.state = RowState::Ready(id);
            machine.initializing = false;
            machine.pending.drain(..).collect::<Vec<_>>()
        };
        if !queued.is_empty() {
            tracing::debug!(count = queued.len(), "replaying queued trials");
        }
        for trial in queued {
            let trial_type = trial.trial_type.clone();
            if let Err(error) = self.add_trial_data(trial) {
                tracing::warn!(trial_type = %trial_type, "replaying queued trial failed: {}", error);
            }
        }
        Ok(())
    }

    /// Queues `trial` and re-creates the row unless that is already happening.
    ///
    /// `lost` is the row that was found missing, if this call discovered it.
    fn requeue_and_recover(&self, lost: Option<&RowId>, trial: TrialData) -> Result<(), ManagerError> {
        let overrides = {
            let mut machine = self.machine();
            if let Some(lost) = lost {
                if machine.state == RowState::Ready(lost.clone()) {
                    tracing::warn!(row = %lost, "experiment row is gone, it will be re-created");
                    machine.state = RowState::Invalidated;
                }
            }
            machine.pending.push_back(trial);
            if machine.initializing {
                return Ok(());
            }
            if machine.state != RowState::Invalidated {
                // Another trial has re-created the row already.
                let next = machine.pending.pop_back();
                drop(machine);
                return match next {
                    Some(trial) => self.add_trial_data(trial),
                    None => Ok(()),
                };
            }
            if machine.recoveries >= MAX_RECOVERY_ATTEMPTS {
                return Err(ManagerError::RecoveryExhausted(machine.recoveries));
            }
            machine.recoveries += 1;
            machine.initializing = true;
            machine.overrides.clone()
        };
        self.initialize(overrides, true)
    }

    fn read_error(&self, id: &RowId, error: StoreError) -> ManagerError {
        match error {
            StoreError::PermissionDenied { .. } => self.permission_error(Operation::Select, error),
            error => ManagerError::RemoteRead {
                target: self.shared.table.clone(),
                id: id.to_string(),
                source: error,
            },
        }
    }

    fn write_error(&self, operation: Operation, error: StoreError) -> ManagerError {
        match error {
            StoreError::PermissionDenied { .. } => self.permission_error(operation, error),
            error => ManagerError::RemoteWrite {
                operation,
                target: self.shared.table.clone(),
                source: error,
            },
        }
    }

    fn permission_error(&self, operation: Operation, error: StoreError) -> ManagerError {
        let hint = rls_hint(&self.shared.table);
        tracing::error!(table = %self.shared.table, "{} denied by row level security\n{}", operation, hint);
        ManagerError::PermissionDenied {
            operation,
            target: self.shared.table.clone(),
            hint,
            source: error,
        }
    }

    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.shared.machine.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<S: RowStore + 'static> Manager for RowManager<S> {
    fn initialize_experiment(&self, overrides: Map<String, Value>) -> Result<(), ManagerError> {
        RowManager::initialize_experiment(self, overrides)
    }

    fn add_trial_data(&self, trial: TrialData) -> Result<(), ManagerError> {
        RowManager::add_trial_data(self, trial)
    }

    fn number_of_operations(&self) -> u64 {
        RowManager::number_of_operations(self)
    }

    fn pending_trials(&self) -> usize {
        RowManager::pending_trials(self)
    }

    fn background(&self) -> &BackgroundWrites {
        &self.shared.background
    }
}

/// The policies an anonymous client needs on `table`.
fn rls_hint(table: &str) -> String {
    format!(
        "The table `{table}` needs row level security policies that let the anon role insert, read and update rows:\n\
         \x20   alter table {table} enable row level security;\n\
         \x20   create policy \"anon insert\" on {table} for insert to anon with check (true);\n\
         \x20   create policy \"anon select\" on {table} for select to anon using (true);\n\
         \x20   create policy \"anon update\" on {table} for update to anon using (true) with check (true);",
        table = table
    )
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
