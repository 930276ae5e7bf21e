use crate::{
    api::{
        error::StoreError,
        id::DocumentId,
        metadata::ExperimentMetadata,
        store::DocumentStore,
        trial::TrialData,
        TRIALS,
    },
    tracking::{
        counter::OperationCounter, flatten::flatten_arrays, hooks::BackgroundWrites, new_record,
        Manager, ManagerError, ManagerOptions, Operation,
    },
};
use serde_json::{Map, Value};
use std::sync::Arc;

struct Shared<S> {
    store: S,
    collection: String,
    id: DocumentId,
    metadata: ExperimentMetadata,
    operations: OperationCounter,
    background: BackgroundWrites,
}

/// Saves an experiment as one document, appending trials atomically.
///
/// The document id is known from the start, so nothing ever needs to be
/// queued.
pub struct DocumentManager<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for DocumentManager<S> {
    fn clone(&self) -> Self {
        DocumentManager {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: DocumentStore + 'static> DocumentManager<S> {
    pub fn new(store: S, options: ManagerOptions) -> Self {
        let id = match options.fixed_record_id {
            Some(id) => DocumentId::from(id),
            None => store.new_document_id(&options.collection),
        };
        DocumentManager {
            shared: Arc::new(Shared {
                store,
                collection: options.collection,
                id,
                metadata: ExperimentMetadata::capture(options.metadata),
                operations: OperationCounter::new(),
                background: BackgroundWrites::new(),
            }),
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.shared.id
    }

    pub fn metadata(&self) -> &ExperimentMetadata {
        &self.shared.metadata
    }

    /// Overwrites the document with the metadata, `overrides` and an empty
    /// trial list.
    pub fn initialize_experiment(&self, overrides: Map<String, Value>) -> Result<(), ManagerError> {
        let shared = &self.shared;
        let document = new_record(
            &shared.metadata.to_record(),
            &overrides,
            Some(Value::Array(Vec::new())),
        );
        shared
            .store
            .set(&shared.collection, &shared.id, &document)
            .map_err(|error| self.write_error(Operation::Set, error))?;
        shared.operations.record();
        tracing::info!(collection = %shared.collection, document = %shared.id, "experiment document written");
        Ok(())
    }

    /// Appends one trial, with every array in it turned into an index-keyed map.
    pub fn add_trial_data(&self, trial: TrialData) -> Result<(), ManagerError> {
        let shared = &self.shared;
        let element = flatten_arrays(trial.to_value()?);
        shared
            .store
            .array_union(&shared.collection, &shared.id, TRIALS, &[element])
            .map_err(|error| self.write_error(Operation::ArrayUnion, error))?;
        shared.operations.record();
        tracing::debug!(document = %shared.id, trial_type = %trial.trial_type, "trial saved");
        Ok(())
    }

    pub fn number_of_operations(&self) -> u64 {
        self.shared.operations.get()
    }

    fn write_error(&self, operation: Operation, error: StoreError) -> ManagerError {
        let target = format!("{}/{}", self.shared.collection, self.shared.id);
        match error {
            StoreError::PermissionDenied { .. } => {
                let hint = rules_hint(&self.shared.collection);
                tracing::error!(document = %target, "{} denied by security rules\n{}", operation, hint);
                ManagerError::PermissionDenied {
                    operation,
                    target,
                    hint,
                    source: error,
                }
            }
            error => ManagerError::RemoteWrite {
                operation,
                target,
                source: error,
            },
        }
    }
}

impl<S: DocumentStore + 'static> Manager for DocumentManager<S> {
    fn initialize_experiment(&self, overrides: Map<String, Value>) -> Result<(), ManagerError> {
        DocumentManager::initialize_experiment(self, overrides)
    }

    fn add_trial_data(&self, trial: TrialData) -> Result<(), ManagerError> {
        DocumentManager::add_trial_data(self, trial)
    }

    fn number_of_operations(&self) -> u64 {
        DocumentManager::number_of_operations(self)
    }

    fn background(&self) -> &BackgroundWrites {
        &self.shared.background
    }
}

/// The security rules a client needs to write to `collection`.
fn rules_hint(collection: &str) -> String {
    format!(
        "The Firestore security rules must allow clients to create and update documents in `{collection}`:\n\
         \x20   match /{collection}/{{document}} {{\n\
         \x20     allow create, update: if true;\n\
         \x20   }}",
        collection = collection
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{DocumentCall, DocumentOp, Fault, MemoryDocumentStore};
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn initialize_writes_full_record() {
        let store = MemoryDocumentStore::new();
        let options = ManagerOptions::default().metadata("version", 2);
        let manager = DocumentManager::new(store.clone(), options);

        manager
            .initialize_experiment(object(json!({ "participant": "p-1", "version": 3 })))
            .unwrap();

        let document = store.document("experiments", manager.document_id()).unwrap();
        let metadata = manager.metadata();
        assert_eq!(
            Value::Object(document),
            json!({
                "date": metadata.date,
                "time": metadata.time,
                "version": 3,
                "participant": "p-1",
                "trials": []
            })
        );
        assert_eq!(manager.number_of_operations(), 1);
    }

    #[test]
    fn fixed_id_is_used_as_is() {
        let store = MemoryDocumentStore::new();
        let manager = DocumentManager::new(
            store.clone(),
            ManagerOptions::default().collection("pilot").fixed_record_id("session-42"),
        );
        manager.initialize_experiment(Map::new()).unwrap();

        assert_eq!(manager.document_id().as_ref(), "session-42");
        assert!(store.document("pilot", &"session-42".into()).is_some());
    }

    #[test]
    fn trials_are_flattened_and_appended() {
        let store = MemoryDocumentStore::new();
        let manager = DocumentManager::new(store.clone(), ManagerOptions::default());
        manager.initialize_experiment(Map::new()).unwrap();

        let trial = TrialData::new("grid")
            .with_field("a", json!([1, [2, 3]]))
            .with_field("b", "x");
        manager.add_trial_data(trial).unwrap();

        let calls = store.calls();
        match &calls[1] {
            DocumentCall::ArrayUnion { field, elements, .. } => {
                assert_eq!(field, "trials");
                assert_eq!(
                    elements,
                    &vec![json!({
                        "trial_type": "grid",
                        "a": { "0": 1, "1": { "0": 2, "1": 3 } },
                        "b": "x"
                    })]
                );
            }
            other => panic!("unexpected call {:?}", other),
        }
        assert_eq!(manager.number_of_operations(), 2);
    }

    #[test]
    fn failed_writes_are_returned_and_not_counted() {
        let store = MemoryDocumentStore::new();
        let manager = DocumentManager::new(store.clone(), ManagerOptions::default());
        store.fail_next(DocumentOp::Set, Fault::Unavailable);
        let error = manager.initialize_experiment(Map::new()).unwrap_err();
        assert!(matches!(error, ManagerError::RemoteWrite { operation: Operation::Set, .. }));

        store.fail_next(DocumentOp::ArrayUnion, Fault::PermissionDenied);
        let error = manager.add_trial_data(TrialData::new("t")).unwrap_err();
        match error {
            ManagerError::PermissionDenied { hint, .. } => {
                assert!(hint.contains("match /experiments/{document}"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(manager.number_of_operations(), 0);
    }

    #[test]
    fn hook_appends_in_background() {
        let store = MemoryDocumentStore::new();
        let manager = DocumentManager::new(store.clone(), ManagerOptions::default());
        manager.initialize_experiment(Map::new()).unwrap();
        let on_data_update = manager.create_data_update_callback();
        let on_finish = manager.create_finish_callback();

        for n in 0..5 {
            on_data_update(TrialData::new("rt").with_field("n", n));
        }
        let report = on_finish();

        assert_eq!(report.operations, 6);
        assert_eq!(report.unprocessed, 0);
        let document = store.document("experiments", manager.document_id()).unwrap();
        assert_eq!(document["trials"].as_array().unwrap().len(), 5);
    }
}
