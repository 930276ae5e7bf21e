use anyhow::Result;
use nanorand::{WyRand, RNG};
use serde_json::{json, Map};
use trialsink::{
    backend::memory::{MemoryDocumentStore, MemoryRowStore},
    config::{FirestoreConfig, PostgRestConfig},
    DocumentManager, Manager, ManagerOptions, RowManager, TrialData,
};

struct Args {
    backend: String,
    table: String,
    record: Option<String>,
    trials: u32,
    participant: Option<String>,
}

impl Args {
    pub fn from_env() -> Result<Self> {
        let mut args = pico_args::Arguments::from_env();
        Ok(Args {
            backend: args.opt_value_from_str(["-b", "--backend"])?.unwrap_or_else(|| "memory-rows".to_owned()),
            table: args.opt_value_from_str(["-t", "--table"])?.unwrap_or_else(|| "experiments".to_owned()),
            record: args.opt_value_from_str(["-r", "--record"])?,
            trials: args.opt_value_from_str(["-n", "--trials"])?.unwrap_or(10),
            participant: args.opt_value_from_str(["-p", "--participant"])?,
        })
    }
}

/// Runs a simulated reaction time task against `manager`.
fn session<M: Manager + Clone>(manager: M, args: &Args) -> Result<()> {
    let mut overrides = Map::new();
    if let Some(participant) = &args.participant {
        overrides.insert("participant".to_owned(), json!(participant));
    }
    let on_data_update = manager.create_data_update_callback();
    let on_finish = manager.create_finish_callback();

    on_data_update(TrialData::new("instructions").with_field("skip_save", true));
    manager.initialize_experiment(overrides)?;

    let mut rng = WyRand::new_seed(u64::from(args.trials));
    let mut elapsed = 0;
    for i in 0..args.trials {
        let rt = 250 + i64::from(rng.generate::<u16>() % 500);
        elapsed += rt + 1000;
        let correct = rng.generate::<u16>() % 10 != 0;
        on_data_update(
            TrialData::new("html-keyboard-response")
                .with_time_elapsed(elapsed)
                .with_field("trial_index", i)
                .with_field("rt", rt)
                .with_field("correct", correct)
                .with_field("key_history", json!([["f", rt], ["j", rt + 40]])),
        );
        // Rows are appended by read-modify-write; give each append room.
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    println!("{}", on_finish());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::from_env()?;
    let mut options = ManagerOptions::default().collection(args.table.clone());
    options.fixed_record_id = args.record.clone();

    match args.backend.as_str() {
        "firestore" => session(DocumentManager::new(FirestoreConfig::from_env()?.connect(), options), &args),
        "supabase" | "postgrest" => session(RowManager::new(PostgRestConfig::from_env()?.connect(), options), &args),
        "memory-documents" => session(DocumentManager::new(MemoryDocumentStore::new(), options), &args),
        "memory-rows" => session(RowManager::new(MemoryRowStore::new(), options), &args),
        other => {
            println!("Unknown backend {}.", other);
            println!("Use one of firestore, supabase, memory-documents or memory-rows.");
            Ok(())
        }
    }
}
