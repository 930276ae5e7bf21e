use crate::{api::trial::TrialData, tracking::Manager};
use std::{
    fmt,
    sync::Mutex,
    thread::{self, JoinHandle},
};

/// Called by the runner with every finished trial; returns the trial to keep.
pub type DataUpdateCallback = Box<dyn Fn(TrialData) -> TrialData + Send + Sync>;

/// Called by the runner once the timeline has completed.
pub type FinishCallback = Box<dyn Fn() -> FinishReport + Send + Sync>;

/// Summary logged when the experiment finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishReport {
    pub operations: u64,
    pub unprocessed: usize,
}

impl fmt::Display for FinishReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} remote write operations", self.operations)?;
        if self.unprocessed > 0 {
            write!(f, ", {} trials never saved", self.unprocessed)?;
        }
        Ok(())
    }
}

/// Detached writes started from the data update hook.
///
/// Nobody waits on them while the experiment runs. They are only joined by
/// [`BackgroundWrites::settle`], so the process does not exit mid-write.
#[derive(Debug, Default)]
pub struct BackgroundWrites {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `write` on its own thread without waiting for it.
    pub fn spawn<F>(&self, write: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let spawned = thread::Builder::new()
            .name("trialsink-write".to_owned())
            .spawn(write);
        match spawned {
            Ok(handle) => {
                let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
                handles.retain(|handle| !handle.is_finished());
                handles.push(handle);
            }
            Err(error) => tracing::error!("could not start background write, trial dropped: {}", error),
        }
    }

    /// Writes started but not yet finished.
    pub fn in_flight(&self) -> usize {
        let handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.iter().filter(|handle| !handle.is_finished()).count()
    }

    /// Joins every write started so far.
    pub fn settle(&self) {
        loop {
            let handles = {
                let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *handles)
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if handle.join().is_err() {
                    tracing::warn!("a background write panicked");
                }
            }
        }
    }
}

/// Builds the per-trial hook.
///
/// A trial with `skip_save: true` loses the flag and is returned without any
/// remote call. Any other trial is saved on a background thread, whose
/// failure is only logged, and returned unchanged right away.
pub fn data_update_callback<M>(manager: &M) -> DataUpdateCallback
where
    M: Manager + Clone,
{
    let manager = manager.clone();
    Box::new(move |mut trial: TrialData| {
        if trial.take_skip_save() {
            tracing::debug!(trial_type = %trial.trial_type, "trial not saved");
            return trial;
        }
        let writer = manager.clone();
        let payload = trial.clone();
        manager.background().spawn(move || {
            let trial_type = payload.trial_type.clone();
            if let Err(error) = writer.add_trial_data(payload) {
                tracing::warn!(trial_type = %trial_type, "saving trial failed: {}", error);
            }
        });
        trial
    })
}

/// Builds the end-of-experiment hook.
///
/// Waits for background writes that are still running, then reports the
/// operation count and any trials left unsaved. Never fails.
pub fn finish_callback<M>(manager: &M) -> FinishCallback
where
    M: Manager + Clone,
{
    let manager = manager.clone();
    Box::new(move || {
        manager.settle();
        let report = FinishReport {
            operations: manager.number_of_operations(),
            unprocessed: manager.pending_trials(),
        };
        tracing::info!(operations = report.operations, "experiment finished");
        if report.unprocessed > 0 {
            tracing::warn!(
                unprocessed = report.unprocessed,
                "experiment finished with trials that were never saved"
            );
        }
        report
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::memory::{Fault, MemoryRowStore, RowCall, RowOp},
        tracking::{ManagerOptions, RowManager},
    };
    use serde_json::{json, Map};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn skipped_trial_is_stripped_and_not_saved() {
        let store = MemoryRowStore::new();
        let manager = RowManager::new(store.clone(), ManagerOptions::default().fixed_record_id("1"));
        let on_data_update = manager.create_data_update_callback();

        let trial = TrialData::new("instructions")
            .with_field("skip_save", true)
            .with_field("rt", 300);
        let returned = on_data_update(trial);
        manager.settle();

        assert_eq!(returned, TrialData::new("instructions").with_field("rt", 300));
        assert!(store.calls().is_empty());
        assert_eq!(manager.number_of_operations(), 0);
    }

    #[test]
    fn saved_trial_is_returned_unchanged() {
        let store = MemoryRowStore::new();
        let manager = RowManager::new(store.clone(), ManagerOptions::default());
        manager.initialize_experiment(Map::new()).unwrap();
        let on_data_update = manager.create_data_update_callback();

        let trial = TrialData::new("survey").with_field("response", json!({ "Q0": [1, 2] }));
        let returned = on_data_update(trial.clone());
        assert_eq!(returned, trial);

        manager.settle();
        assert_eq!(manager.number_of_operations(), 2);
        assert_eq!(store.trials(&"1".into()).unwrap(), vec![trial.to_value().unwrap()]);
    }

    #[test]
    fn background_failure_is_not_propagated() {
        let store = MemoryRowStore::new();
        let manager = RowManager::new(store.clone(), ManagerOptions::default());
        manager.initialize_experiment(Map::new()).unwrap();
        store.fail_next(RowOp::Update, Fault::Unavailable);

        let on_data_update = manager.create_data_update_callback();
        let returned = on_data_update(TrialData::new("flanker"));
        manager.settle();

        assert_eq!(returned.trial_type, "flanker");
        assert_eq!(manager.number_of_operations(), 1);
        assert!(store
            .calls()
            .iter()
            .any(|call| matches!(call, RowCall::Update { .. })));
    }

    #[test]
    fn finish_reports_operations_and_stuck_trials() {
        let store = MemoryRowStore::new();
        let manager = RowManager::new(store, ManagerOptions::default());
        let on_data_update = manager.create_data_update_callback();
        let on_finish = manager.create_finish_callback();

        on_data_update(TrialData::new("a"));
        on_data_update(TrialData::new("b"));
        let report = on_finish();

        assert_eq!(report, FinishReport { operations: 0, unprocessed: 2 });
        assert_eq!(report.to_string(), "0 remote write operations, 2 trials never saved");
    }

    #[test]
    fn settle_joins_every_write() {
        let background = BackgroundWrites::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let done = Arc::clone(&done);
            background.spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        background.settle();
        assert_eq!(done.load(Ordering::SeqCst), 8);
        assert_eq!(background.in_flight(), 0);
    }
}
