use serde_json::Map;
use trialsink::{backend::memory::MemoryRowStore, Manager, ManagerOptions, RowManager, TrialData};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = MemoryRowStore::new();
    let manager = RowManager::new(store.clone(), ManagerOptions::default());
    let on_data_update = manager.create_data_update_callback();
    let on_finish = manager.create_finish_callback();

    // Trials arriving before the row exists wait in the queue.
    on_data_update(TrialData::new("welcome").with_field("skip_save", true));
    on_data_update(TrialData::new("practice").with_field("rt", 512));
    manager.settle();

    manager
        .initialize_experiment(Map::new())
        .expect("Could not create the experiment row");

    for i in 0..3 {
        on_data_update(TrialData::new("main").with_field("block", i));
    }

    let report = on_finish();
    println!("{}", report);
    if let Some(id) = manager.row_id() {
        println!("{:#?}", store.row("experiments", &id));
    }
}
