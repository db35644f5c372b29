pub mod error;
pub mod reconcile;
pub mod resolver;

pub use error::EngineError;
pub use reconcile::{affected, ChangeReconciler, Outcome};
pub use resolver::{PathResolver, ResolvedChain};

use tracing::{debug, warn};

use nestlog_core::{
    field_value::FieldMap,
    history::HistoryRecord,
    ids::ActorId,
    Schema,
};
use nestlog_storage::DocumentStore;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Reject records whose signature does not match their modifier.
    pub verify_signatures: bool,
}

/// Owns a schema and a document store and applies history records to them.
pub struct Engine<S: DocumentStore> {
    schema: Schema,
    store: S,
    config: EngineConfig,
}

impl<S: DocumentStore> Engine<S> {
    pub fn new(schema: Schema, store: S) -> Self {
        Self::with_config(schema, store, EngineConfig::default())
    }

    pub fn with_config(schema: Schema, store: S, config: EngineConfig) -> Self {
        Self {
            schema,
            store,
            config,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn reconciler(&mut self) -> ChangeReconciler<'_, S> {
        ChangeReconciler::new(&self.schema, &mut self.store)
    }

    fn check(&self, record: &HistoryRecord) -> Result<(), EngineError> {
        if self.config.verify_signatures {
            record.verify_signature()?;
        }
        Ok(())
    }

    /// Resolve the record's association chain against the live hierarchy.
    pub fn resolve(&self, record: &HistoryRecord) -> Result<ResolvedChain, EngineError> {
        PathResolver::new(&self.schema, &self.store).resolve(&record.association_chain)
    }

    pub fn undo(&mut self, record: &HistoryRecord, modifier: ActorId) -> Result<Outcome, EngineError> {
        self.check(record)?;
        self.reconciler().undo(record, modifier)
    }

    pub fn redo(&mut self, record: &HistoryRecord, modifier: ActorId) -> Result<Outcome, EngineError> {
        self.check(record)?;
        self.reconciler().redo(record, modifier)
    }

    /// Field assignments `undo` would apply, without applying them.
    pub fn undo_attributes(
        &mut self,
        record: &HistoryRecord,
        modifier: ActorId,
    ) -> Result<FieldMap, EngineError> {
        let reconciler = self.reconciler();
        let chain = reconciler.resolve(record)?;
        reconciler.undo_attributes(record, &chain, modifier)
    }

    /// Field assignments `redo` would apply, without applying them.
    pub fn redo_attributes(
        &mut self,
        record: &HistoryRecord,
        modifier: ActorId,
    ) -> Result<FieldMap, EngineError> {
        let reconciler = self.reconciler();
        let chain = reconciler.resolve(record)?;
        reconciler.redo_attributes(record, &chain, modifier)
    }

    /// Undo a batch of records newest first (highest version, then latest
    /// capture time), stopping at the first failure.
    pub fn undo_all(
        &mut self,
        records: &[HistoryRecord],
        modifier: ActorId,
    ) -> Result<Vec<Outcome>, EngineError> {
        let mut ordered: Vec<&HistoryRecord> = records.iter().collect();
        ordered.sort_by(|a, b| {
            b.version
                .cmp(&a.version)
                .then(b.created_at.cmp(&a.created_at))
        });

        let mut outcomes = Vec::with_capacity(ordered.len());
        for record in ordered {
            match self.undo(record, modifier) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(record_id = %record.record_id, version = record.version, error = %e, "batch undo stopped");
                    return Err(e);
                }
            }
        }
        debug!(count = outcomes.len(), "batch undo complete");
        Ok(outcomes)
    }
}
