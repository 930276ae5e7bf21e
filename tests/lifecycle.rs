use serde_json::{json, Map};
use trialsink::{
    backend::memory::{MemoryDocumentStore, MemoryRowStore, RowCall},
    DocumentManager, Manager, ManagerOptions, RowManager, TrialData,
};

/// Drives a manager the way an experiment runner does.
fn run_timeline<M: Manager + Clone>(manager: &M, trials: Vec<TrialData>) -> Vec<TrialData> {
    let on_data_update = manager.create_data_update_callback();
    trials.into_iter().map(|trial| on_data_update(trial)).collect()
}

fn timeline() -> Vec<TrialData> {
    vec![
        TrialData::new("instructions").with_field("skip_save", true),
        TrialData::new("html-keyboard-response")
            .with_time_elapsed(1200)
            .with_field("rt", 388)
            .with_field("response", "f"),
        TrialData::new("survey-multi-choice")
            .with_time_elapsed(4100)
            .with_field("response", json!({ "Q0": ["a", "c"] })),
    ]
}

#[test]
fn row_session_with_late_initialization() {
    let store = MemoryRowStore::new();
    let manager = RowManager::new(
        store.clone(),
        ManagerOptions::default().metadata("version", "2.1"),
    );

    let returned = run_timeline(&manager, timeline());
    assert!(returned.iter().all(|trial| !trial.fields.contains_key("skip_save")));
    manager.settle();
    assert_eq!(manager.pending_trials(), 2);
    assert!(store.calls().is_empty());

    let mut overrides = Map::new();
    overrides.insert("participant".to_owned(), json!("p-019"));
    manager.initialize_experiment(overrides).unwrap();

    let report = manager.create_finish_callback()();
    assert_eq!(report.operations, 3);
    assert_eq!(report.unprocessed, 0);

    let id = manager.row_id().unwrap();
    let row = store.row("experiments", &id).unwrap();
    assert_eq!(row["participant"], json!("p-019"));
    assert_eq!(row["version"], json!("2.1"));
    // Each hook call writes from its own thread, so the queue order is not fixed.
    let mut types = store
        .trials(&id)
        .unwrap()
        .iter()
        .filter_map(|trial| trial["trial_type"].as_str().map(str::to_owned))
        .collect::<Vec<String>>();
    types.sort();
    assert_eq!(types, vec!["html-keyboard-response", "survey-multi-choice"]);
    assert_eq!(
        store.calls().iter().filter(|call| matches!(call, RowCall::Insert { .. })).count(),
        1
    );
}

#[test]
fn document_session() {
    let store = MemoryDocumentStore::new();
    let manager = DocumentManager::new(store.clone(), ManagerOptions::default().collection("pilot"));
    manager.initialize_experiment(Map::new()).unwrap();

    run_timeline(&manager, timeline());
    let report = manager.create_finish_callback()();
    assert_eq!(report.operations, 3);

    let document = store.document("pilot", manager.document_id()).unwrap();
    let trials = document["trials"].as_array().unwrap();
    assert_eq!(trials.len(), 2);
    let survey = trials
        .iter()
        .find(|trial| trial["trial_type"] == json!("survey-multi-choice"))
        .unwrap();
    assert_eq!(survey["response"], json!({ "Q0": { "0": "a", "1": "c" } }));
}

#[test]
fn managers_are_interchangeable_behind_the_trait() {
    fn start(manager: &dyn Manager) -> u64 {
        manager.initialize_experiment(Map::new()).unwrap();
        manager.add_trial_data(TrialData::new("t")).unwrap();
        manager.number_of_operations()
    }

    let rows = RowManager::new(MemoryRowStore::new(), ManagerOptions::default());
    let documents = DocumentManager::new(MemoryDocumentStore::new(), ManagerOptions::default());
    assert_eq!(start(&rows), 2);
    assert_eq!(start(&documents), 2);
}
