//! Managers that save an experiment while it runs.
//!
//! Both managers implement [`Manager`], which is all an experiment runner
//! needs: initialize once, add trials, and hand out the two lifecycle hooks.

pub mod counter;
pub mod document;
pub mod flatten;
pub mod hooks;
pub mod options;
pub mod row;

pub use document::DocumentManager;
pub use hooks::{BackgroundWrites, DataUpdateCallback, FinishCallback, FinishReport};
pub use options::ManagerOptions;
pub use row::RowManager;

use crate::api::{error::StoreError, trial::TrialData};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// The remote operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Select,
    Set,
    ArrayUnion,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Select => "select",
            Operation::Set => "set",
            Operation::ArrayUnion => "array union",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("{operation} of the experiment record in `{target}` failed: {source}")]
    RemoteWrite {
        operation: Operation,
        target: String,
        #[source]
        source: StoreError,
    },
    #[error("reading the trials of row {id} in `{target}` failed: {source}")]
    RemoteRead {
        target: String,
        id: String,
        #[source]
        source: StoreError,
    },
    #[error("{operation} on `{target}` was denied: {source}\n{hint}")]
    PermissionDenied {
        operation: Operation,
        target: String,
        hint: String,
        #[source]
        source: StoreError,
    },
    #[error("the trials column of row {0} does not hold a list")]
    MissingTrials(String),
    #[error("gave up re-creating the experiment row after {0} attempts")]
    RecoveryExhausted(u32),
    #[error("could not serialize trial data: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Saves one experiment to a remote store.
///
/// Implementations are cheap handles over shared state, so the hooks can keep
/// their own clone and write from background threads.
pub trait Manager: Send + Sync + 'static {
    /// Creates the remote record, or re-points an existing one.
    fn initialize_experiment(&self, overrides: Map<String, Value>) -> Result<(), ManagerError>;

    /// Saves one trial.
    fn add_trial_data(&self, trial: TrialData) -> Result<(), ManagerError>;

    /// Completed remote writes so far.
    fn number_of_operations(&self) -> u64;

    /// Trials accepted but not yet written.
    fn pending_trials(&self) -> usize {
        0
    }

    /// Background writes started by the data update hook.
    fn background(&self) -> &BackgroundWrites;

    /// Blocks until every background write started so far has finished.
    fn settle(&self) {
        self.background().settle();
    }

    /// Hook for the runner's per-trial data update.
    ///
    /// See [`hooks::data_update_callback`].
    fn create_data_update_callback(&self) -> DataUpdateCallback
    where
        Self: Clone + Sized,
    {
        hooks::data_update_callback(self)
    }

    /// Hook for the end of the experiment.
    ///
    /// See [`hooks::finish_callback`].
    fn create_finish_callback(&self) -> FinishCallback
    where
        Self: Clone + Sized,
    {
        hooks::finish_callback(self)
    }
}

/// Builds the record a new experiment starts with.
///
/// Overrides win over metadata. The trial list is always fresh.
pub(crate) fn new_record(
    metadata: &Map<String, Value>,
    overrides: &Map<String, Value>,
    trials: Option<Value>,
) -> Map<String, Value> {
    let mut record = metadata.clone();
    for (key, value) in overrides {
        if key == crate::api::TRIALS {
            tracing::warn!("ignoring `{}` in experiment overrides", key);
            continue;
        }
        record.insert(key.clone(), value.clone());
    }
    if let Some(trials) = trials {
        record.insert(crate::api::TRIALS.to_owned(), trials);
    }
    record
}
